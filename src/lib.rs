//! Workspace façade crate.
//!
//! Re-exports the player crates so host applications can depend on
//! `adaptive-player-workspace` alone. The engine lives behind the default
//! `playback` feature; hosts that only implement the bridge traits can turn
//! it off.

pub use bridge_traits;
pub use core_runtime;

#[cfg(feature = "playback")]
pub use core_playback;
