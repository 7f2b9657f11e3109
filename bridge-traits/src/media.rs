//! Media element and media buffer bridges.
//!
//! These traits describe the two host primitives the buffer-feed engine
//! drives: the playback surface (a `<video>` element, a native player view)
//! and the append-only media buffer attached to it (an MSE `SourceBuffer` or
//! an equivalent native sink).
//!
//! ## Completion model
//!
//! [`MediaBuffer::append`] and [`MediaBuffer::remove`] only *start* an
//! operation. Completion is reported asynchronously by the host (the
//! `updateend` / `error` events on the web), which the session forwards to
//! the engine. Calling either method while a previous operation is still in
//! flight is a contract violation and implementations are expected to reject
//! it with [`BridgeError::InvalidState`](crate::error::BridgeError::InvalidState).

use crate::{
    error::Result,
    platform::{PlatformSend, PlatformSendSync},
};
use bytes::Bytes;

/// A contiguous buffered interval, in seconds of media time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Length of the range in seconds.
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position <= self.end
    }
}

/// Handle to a single host media buffer.
///
/// A handle is owned by exactly one buffer-feed engine; it is never shared.
pub trait MediaBuffer: PlatformSend {
    /// Begin appending an encoded media segment.
    fn append(&mut self, data: Bytes) -> Result<()>;

    /// Begin evicting buffered media in `[start, end)` seconds.
    fn remove(&mut self, start: f64, end: f64) -> Result<()>;

    /// Abort any in-flight operation. Used only during teardown.
    fn abort(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether an append or remove is still in flight.
    fn is_updating(&self) -> bool;

    /// Currently buffered ranges.
    fn buffered(&self) -> Vec<TimeRange>;
}

/// The playback surface a session renders into.
///
/// Methods take `&self`; hosts provide their own interior mutability. The
/// element is shared between the session task and the health sampler.
pub trait MediaElement: PlatformSendSync {
    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    /// Request a new playback position. Hosts may round or clamp the value,
    /// so callers that need an exact position must read it back.
    fn set_current_time(&self, seconds: f64);

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&self, rate: f64);

    fn is_paused(&self) -> bool;

    /// Create a new media buffer for the given codec set.
    ///
    /// The buffer is not usable until the host reports it open.
    fn create_buffer(&self, codecs: &[String]) -> Result<Box<dyn MediaBuffer>>;

    /// Detach and release a buffer previously returned by
    /// [`create_buffer`](Self::create_buffer).
    fn release_buffer(&self, buffer: Box<dyn MediaBuffer>);
}
