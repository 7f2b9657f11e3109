//! # Playback Error Types
//!
//! Error taxonomy for negotiation, feeding and session control.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur while negotiating or running a playback session.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Negotiation Errors
    // ========================================================================
    /// The selector exhausted every (source, transport) pair.
    #[error("No compatible source/transport combination: {0}")]
    NoCompatibleCombo(String),

    /// The transport connection failed or closed unexpectedly.
    #[error("Transport error: {0}")]
    Transport(String),

    // ========================================================================
    // Buffer Errors
    // ========================================================================
    /// The media buffer rejected an append (decode or capacity failure).
    #[error("Buffer append failed: {0}")]
    BufferAppend(String),

    /// A codec switch was requested with an unusable codec set.
    #[error("Codec switch aborted: {0}")]
    CodecSwitchAborted(String),

    // ========================================================================
    // Health
    // ========================================================================
    /// Playback progress fell below the health threshold.
    #[error("Playback degraded (score {score:.3})")]
    HealthDegraded { score: f64 },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// A binary frame was too short or otherwise malformed.
    #[error("Invalid media frame: {0}")]
    InvalidFrame(String),

    /// A control message could not be interpreted.
    #[error("Invalid control message: {0}")]
    InvalidControlMessage(String),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The session task is gone.
    #[error("Session closed")]
    SessionClosed,

    /// An operation was attempted in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ========================================================================
    // Wrapped Errors
    // ========================================================================
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlaybackError {
    /// Returns `true` if no automatic recovery is attempted for this error.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlaybackError::NoCompatibleCombo(_)
                | PlaybackError::SessionClosed
                | PlaybackError::Runtime(_)
        )
    }

    /// Returns `true` if the session should tear down and try the next combo.
    pub fn triggers_renegotiation(&self) -> bool {
        match self {
            PlaybackError::Transport(_)
            | PlaybackError::BufferAppend(_)
            | PlaybackError::HealthDegraded { .. } => true,
            PlaybackError::Bridge(err) => err.is_buffer_failure(),
            _ => false,
        }
    }

    /// What the session does when this error surfaces during playback.
    ///
    /// Errors that neither end the session nor implicate the current combo
    /// (malformed stream input, an aborted codec switch, host-side state
    /// errors) are shown as recoverable and playback continues. If playback
    /// really is broken the health monitor fails over once the error display
    /// lapses.
    pub fn recovery(&self) -> Recovery {
        if self.is_terminal() {
            Recovery::Fail
        } else if self.triggers_renegotiation() {
            Recovery::Renegotiate
        } else {
            Recovery::Absorb
        }
    }
}

/// Session reaction to a playback error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Report the error as recoverable and keep the current attempt.
    Absorb,
    /// Tear down the attempt and continue with the next combo.
    Renegotiate,
    /// Tear down and stop.
    Fail,
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
