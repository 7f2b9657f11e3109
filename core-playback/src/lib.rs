//! # Adaptive Playback Engine
//!
//! Chooses how to play a stream, feeds media into the host buffer and fails
//! over when playback degrades.
//!
//! ## Overview
//!
//! This module handles:
//! - Source catalog and transport registry
//! - Combo selection with resumable fallback
//! - Wire protocol decoding (binary frames, JSON control messages)
//! - Buffer feeding with single-flight appends, trimming, drop mode and
//!   codec switches
//! - Health scoring and drift/rate control
//! - The session controller that ties them together
//!
//! ## Quick start
//!
//! ```ignore
//! let session = PlayerSession::new(config, catalog, registry, element, connector)?;
//! let mut events = session.events().subscribe();
//! let handle = session.spawn();
//! // forward host buffer completions:
//! handle.update_end()?;
//! ```

pub mod catalog;
pub mod drift;
pub mod error;
pub mod feed;
pub mod health;
pub mod protocol;
pub mod registry;
pub mod resize;
pub mod selector;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use catalog::{Source, SourceCatalog, StreamInfo, StreamKind};
pub use error::{PlaybackError, Recovery, Result};
pub use feed::{BufferFeedEngine, BufferState, FeedStats};
pub use health::{HealthMonitor, HealthScorer};
pub use protocol::{ControlCommand, ControlMessage, MediaChunk, PlayRate};
pub use registry::{BrowserSupport, StaticTransport, TransportDescriptor, TransportRegistry};
pub use resize::ResizeCoordinator;
pub use selector::{select_combo, Combo, ResumeCursor, SelectOptions, SortKey};
pub use session::{PlayerSession, SessionHandle};
pub use transport::{TransportConnector, TransportEvent, TransportEventSender};
