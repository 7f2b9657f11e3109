use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The host primitive rejected the call in its current state
    /// (e.g. an append issued while the buffer is still updating).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Buffer quota exceeded")]
    QuotaExceeded,

    #[error("Media decode error: {0}")]
    Decode(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` if the error was raised by the buffer primitive itself
    /// (capacity or decode failure) rather than by the host plumbing.
    pub fn is_buffer_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::QuotaExceeded | BridgeError::Decode(_) | BridgeError::InvalidState(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
