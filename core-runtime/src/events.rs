//! # Event Bus System
//!
//! Typed session events delivered over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Sessions never poke the UI directly. Every externally interesting state
//! change (a combo was chosen, a codec switch finished, playback degraded) is
//! published as a [`CoreEvent`] on an [`EventBus`]. The UI layer subscribes to
//! render overlays and warnings; the health monitor subscribes to learn about
//! seeks and rate changes that invalidate its samples.
//!
//! ```text
//! ┌──────────────┐   emit    ┌───────────┐  subscribe  ┌──────────────┐
//! │ PlayerSession├──────────>│ EventBus  ├────────────>│ UI layer     │
//! └──────────────┘           │(broadcast)│             └──────────────┘
//!                            │           │  subscribe  ┌──────────────┐
//!                            │           ├────────────>│HealthMonitor │
//!                            └───────────┘             └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Session(SessionEvent::Seeked { position_ms: 42_000 })).ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.description(), "Playback position changed by seek");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep going.
//! - **`RecvError::Closed`**: every sender is gone; the session has ended.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Combo selection and renegotiation
    Selection(SelectionEvent),
    /// Session lifecycle and user-visible playback control
    Session(SessionEvent),
    /// Buffer-feed engine and drift control
    Feed(FeedEvent),
    /// Playback health
    Health(HealthEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Selection(e) => e.description(),
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Feed(e) => e.description(),
            CoreEvent::Health(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Selection(SelectionEvent::NoCompatibleCombo { .. }) => EventSeverity::Error,
            CoreEvent::Session(SessionEvent::Error { recoverable: false, .. }) => {
                EventSeverity::Error
            }
            CoreEvent::Session(SessionEvent::Error { .. })
            | CoreEvent::Selection(SelectionEvent::Renegotiating { .. })
            | CoreEvent::Feed(FeedEvent::CodecSwitchAborted { .. })
            | CoreEvent::Feed(FeedEvent::DropModeEntered { .. })
            | CoreEvent::Health(HealthEvent::Degraded { .. }) => EventSeverity::Warning,
            CoreEvent::Selection(SelectionEvent::ComboSelected { .. })
            | CoreEvent::Session(SessionEvent::Connected { .. })
            | CoreEvent::Feed(FeedEvent::CodecSwitchCompleted { .. })
            | CoreEvent::Health(HealthEvent::Recovered { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Selection Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SelectionEvent {
    /// A (transport, source) pair was chosen.
    ComboSelected {
        transport: String,
        source_url: String,
        mime_type: String,
        source_index: usize,
    },
    /// The active combo is being abandoned in favour of the next one.
    Renegotiating {
        /// Combo being abandoned.
        transport: String,
        source_index: usize,
        reason: String,
    },
    /// Every candidate pair has been tried.
    NoCompatibleCombo { reason: String },
}

impl SelectionEvent {
    fn description(&self) -> &str {
        match self {
            SelectionEvent::ComboSelected { .. } => "Delivery combo selected",
            SelectionEvent::Renegotiating { .. } => "Switching to next delivery combo",
            SelectionEvent::NoCompatibleCombo { .. } => "No compatible delivery combo",
        }
    }
}

// ============================================================================
// Session Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// A transport connection is being opened.
    Connecting { transport: String, url: String },
    /// The transport connection is up.
    Connected { transport: String },
    /// Playback position jumped (user seek or drift correction).
    Seeked { position_ms: u64 },
    /// Playback rate changed.
    RateChanged { rate: f64 },
    /// Server signalled end of stream.
    Ended,
    /// A session-level error. `recoverable` is false once fail-over is exhausted.
    Error { message: String, recoverable: bool },
    /// The session was torn down.
    Unloaded,
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::Connecting { .. } => "Connecting transport",
            SessionEvent::Connected { .. } => "Transport connected",
            SessionEvent::Seeked { .. } => "Playback position changed by seek",
            SessionEvent::RateChanged { .. } => "Playback rate changed",
            SessionEvent::Ended => "Stream ended",
            SessionEvent::Error { .. } => "Session error",
            SessionEvent::Unloaded => "Session unloaded",
        }
    }
}

// ============================================================================
// Feed Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum FeedEvent {
    /// A media buffer was created for the given codec set.
    BufferCreated { codecs: Vec<String> },
    /// Admission into the old buffer is frozen pending a codec switch.
    CodecSwitchStarted { from: Vec<String>, to: Vec<String> },
    /// The new buffer is open and positioned.
    CodecSwitchCompleted { codecs: Vec<String>, position_ms: u64 },
    /// A switch request was rejected.
    CodecSwitchAborted { reason: String },
    /// Consumer fell behind; non-keyframes are being discarded.
    DropModeEntered { queued: usize },
    /// A keyframe ended drop mode.
    DropModeExited { dropped: u64 },
    /// Old media was evicted from the buffer.
    Trimmed { before_secs: f64 },
    /// The drift controller changed the delivery or playback rate.
    RateAdjusted { rate: String, reason: String },
}

impl FeedEvent {
    fn description(&self) -> &str {
        match self {
            FeedEvent::BufferCreated { .. } => "Media buffer created",
            FeedEvent::CodecSwitchStarted { .. } => "Codec switch started",
            FeedEvent::CodecSwitchCompleted { .. } => "Codec switch completed",
            FeedEvent::CodecSwitchAborted { .. } => "Codec switch aborted",
            FeedEvent::DropModeEntered { .. } => "Dropping frames to catch up",
            FeedEvent::DropModeExited { .. } => "Frame dropping stopped",
            FeedEvent::Trimmed { .. } => "Buffer trimmed",
            FeedEvent::RateAdjusted { .. } => "Playback rate adjusted",
        }
    }
}

// ============================================================================
// Health Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum HealthEvent {
    /// Playback is progressing too slowly; a fail-over countdown is running.
    Degraded { score: f64 },
    /// Playback recovered before the countdown expired.
    Recovered { score: f64 },
}

impl HealthEvent {
    fn description(&self) -> &str {
        match self {
            HealthEvent::Degraded { .. } => "Poor playback performance",
            HealthEvent::Recovered { .. } => "Playback performance recovered",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every [`subscribe`](Self::subscribe)
/// creates an independent receiver that sees events emitted after it was
/// created.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none. Publishers normally ignore that error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let health_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Health(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events
    /// and `RecvError::Closed` once all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
