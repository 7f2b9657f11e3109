//! # Host Bridge Traits
//!
//! Platform abstraction traits that each host embedding the player must
//! implement.
//!
//! ## Overview
//!
//! The player core decides *what* to do with a stream: which delivery path to
//! use, when a chunk may enter the buffer, when playback is unhealthy. It never
//! touches a socket, a decoder or a pixel itself. This crate defines the
//! contract for those host-owned primitives.
//!
//! ## Traits
//!
//! ### Media
//! - [`MediaElement`](media::MediaElement) - Playback surface: clock, rate, seek, buffer factory
//! - [`MediaBuffer`](media::MediaBuffer) - Single append/remove buffer handle
//!
//! ### Delivery
//! - [`TransportConnection`](transport::TransportConnection) - Outbound control channel of a transport adapter
//!
//! ### Utilities
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Host
//! implementations should map platform exceptions onto the closest variant;
//! in particular buffer capacity and decode failures must surface as
//! [`BridgeError::QuotaExceeded`] and [`BridgeError::Decode`] so the core can
//! classify them.
//!
//! ## Thread Safety
//!
//! On native targets the bridges require `Send + Sync` (see
//! [`platform`]); on `wasm32` the bounds are lifted.

pub mod error;
pub mod log;
pub mod media;
pub mod platform;
pub mod transport;

pub use error::BridgeError;

// Re-export commonly used types
pub use log::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use media::{MediaBuffer, MediaElement, TimeRange};
pub use transport::TransportConnection;
