//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the player core:
//! - Logging and tracing infrastructure
//! - Player configuration with validated defaults
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities every other player crate depends
//! on. It fixes the logging conventions, the set of recognised configuration
//! options and the typed events sessions publish to the UI layer.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
