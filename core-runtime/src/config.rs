//! # Player Configuration
//!
//! Every option the player core recognises, with its documented default.
//!
//! ## Overview
//!
//! Configuration is a fixed struct rather than an open bag of options: an
//! unknown option is a compile error, a missing one falls back to the default
//! listed here. [`PlayerConfig::validate`] runs once when a session starts and
//! rejects inconsistent values before any network or buffer work begins.
//!
//! The numeric defaults (health thresholds, drop trigger, retention window,
//! trim cadence) are tuned values rather than derived ones. They are exposed
//! so deployments with unusual latency or memory profiles can override them.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::{IterationOrder, PlayerConfig};
//! use std::time::Duration;
//!
//! let config = PlayerConfig::builder()
//!     .force_type("html5/video/mp4")
//!     .iteration_order(IterationOrder::TransportFirst)
//!     .retention_window(Duration::from_secs(60))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.feed.retention_window, Duration::from_secs(60));
//! ```
//!
//! Configuration can also be deserialised; absent fields take their defaults:
//!
//! ```
//! use core_runtime::config::PlayerConfig;
//!
//! let config: PlayerConfig = serde_json::from_str(r#"{ "health": { "threshold": 0.6 } }"#).unwrap();
//! assert_eq!(config.health.threshold, 0.6);
//! assert_eq!(config.health.averaging_steps, 20);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Top-level configuration
// ============================================================================

/// Complete player configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub drift: DriftSettings,
    #[serde(default)]
    pub selection: SelectionSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

impl PlayerConfig {
    /// Creates a new builder for constructing a `PlayerConfig`.
    pub fn builder() -> PlayerConfigBuilder {
        PlayerConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.health.validate()?;
        self.feed.validate()?;
        self.drift.validate()?;
        self.selection.validate()?;
        self.session.validate()?;
        Ok(())
    }
}

// ============================================================================
// Health monitor
// ============================================================================

/// Playback health monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Sampling period.
    ///
    /// Default: 1 second.
    #[serde(default = "default_health_interval")]
    pub interval: Duration,

    /// Capacity of the sample ring.
    ///
    /// Default: 20 samples.
    #[serde(default = "default_averaging_steps")]
    pub averaging_steps: usize,

    /// Score below which playback counts as degraded.
    ///
    /// Default: 0.75.
    #[serde(default = "default_health_threshold")]
    pub threshold: f64,

    /// Threshold used for latency-intolerant transports.
    ///
    /// Default: 0.95.
    #[serde(default = "default_low_latency_threshold")]
    pub low_latency_threshold: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            averaging_steps: default_averaging_steps(),
            threshold: default_health_threshold(),
            low_latency_threshold: default_low_latency_threshold(),
        }
    }
}

impl HealthSettings {
    /// Threshold to apply for a transport of the given latency class.
    pub fn threshold_for(&self, latency_intolerant: bool) -> f64 {
        if latency_intolerant {
            self.low_latency_threshold
        } else {
            self.threshold
        }
    }

    fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("health.interval must be > 0".to_string()));
        }
        if self.averaging_steps < 2 {
            return Err(Error::Config(
                "health.averaging_steps must be at least 2".to_string(),
            ));
        }
        for (name, value) in [
            ("health.threshold", self.threshold),
            ("health.low_latency_threshold", self.low_latency_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::Config(format!(
                    "{} must be in (0.0, 1.0], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Buffer feed
// ============================================================================

/// Buffer-feed engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSettings {
    /// Number of completed appends between two trims of old media.
    ///
    /// Default: 500.
    #[serde(default = "default_trim_every_appends")]
    pub trim_every_appends: usize,

    /// How much media behind the playhead is kept when trimming.
    ///
    /// Default: 180 seconds.
    #[serde(default = "default_retention_window")]
    pub retention_window: Duration,

    /// Queued chunk count above which non-keyframes are dropped.
    ///
    /// Default: 20.
    #[serde(default = "default_drop_threshold")]
    pub drop_threshold: usize,

    /// Largest accepted difference, in seconds, between a requested and an
    /// observed playback position after a codec switch.
    ///
    /// Default: 0.001 (one millisecond rounding step).
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: f64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            trim_every_appends: default_trim_every_appends(),
            retention_window: default_retention_window(),
            drop_threshold: default_drop_threshold(),
            position_tolerance: default_position_tolerance(),
        }
    }
}

impl FeedSettings {
    fn validate(&self) -> Result<()> {
        if self.trim_every_appends == 0 {
            return Err(Error::Config(
                "feed.trim_every_appends must be > 0".to_string(),
            ));
        }
        if self.drop_threshold == 0 {
            return Err(Error::Config("feed.drop_threshold must be > 0".to_string()));
        }
        if self.position_tolerance < 0.0 || !self.position_tolerance.is_finite() {
            return Err(Error::Config(
                "feed.position_tolerance must be a finite, non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Drift / rate control
// ============================================================================

/// Drift controller settings. All times are in milliseconds because the
/// server reports its buffer bounds in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSettings {
    /// Floor of the target buffer-ahead window, added to the server delay.
    ///
    /// Default: 100 ms.
    #[serde(default = "default_min_buffer_ms")]
    pub min_buffer_ms: f64,

    /// Extra buffer-ahead targeted for VOD streams.
    ///
    /// Default: 2000 ms.
    #[serde(default = "default_vod_extra_buffer_ms")]
    pub vod_extra_buffer_ms: f64,

    /// How far behind the server position playback may fall before the
    /// controller seeks instead of adjusting the rate.
    ///
    /// Default: 1000 ms.
    #[serde(default = "default_behind_seek_threshold_ms")]
    pub behind_seek_threshold_ms: f64,

    /// Server send rate requested while a VOD buffer is comfortably ahead.
    ///
    /// Default: 0.5.
    #[serde(default = "default_vod_throttle_rate")]
    pub vod_throttle_rate: f64,

    /// Local playback rate used to catch up with a live edge.
    ///
    /// Default: 1.1.
    #[serde(default = "default_live_catchup_rate")]
    pub live_catchup_rate: f64,

    /// Number of round-trip samples averaged into the server delay estimate.
    ///
    /// Default: 3.
    #[serde(default = "default_delay_samples")]
    pub delay_samples: usize,
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            min_buffer_ms: default_min_buffer_ms(),
            vod_extra_buffer_ms: default_vod_extra_buffer_ms(),
            behind_seek_threshold_ms: default_behind_seek_threshold_ms(),
            vod_throttle_rate: default_vod_throttle_rate(),
            live_catchup_rate: default_live_catchup_rate(),
            delay_samples: default_delay_samples(),
        }
    }
}

impl DriftSettings {
    fn validate(&self) -> Result<()> {
        if self.min_buffer_ms < 0.0 || self.vod_extra_buffer_ms < 0.0 {
            return Err(Error::Config(
                "drift buffer targets must be non-negative".to_string(),
            ));
        }
        if self.behind_seek_threshold_ms <= 0.0 {
            return Err(Error::Config(
                "drift.behind_seek_threshold_ms must be > 0".to_string(),
            ));
        }
        if !(self.vod_throttle_rate > 0.0 && self.vod_throttle_rate < 1.0) {
            return Err(Error::Config(format!(
                "drift.vod_throttle_rate must be in (0.0, 1.0), got {}",
                self.vod_throttle_rate
            )));
        }
        if self.live_catchup_rate <= 1.0 {
            return Err(Error::Config(format!(
                "drift.live_catchup_rate must be > 1.0, got {}",
                self.live_catchup_rate
            )));
        }
        if self.delay_samples == 0 {
            return Err(Error::Config("drift.delay_samples must be > 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Combo selection
// ============================================================================

/// Order in which the selector nests its two candidate lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOrder {
    /// Outer loop over sources, inner loop over transports.
    #[default]
    SourceFirst,
    /// Outer loop over transports, inner loop over sources.
    TransportFirst,
}

/// Transport attribute a sort key can compare on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportField {
    Priority,
    ShortName,
    DisplayName,
}

/// Declarative transport sort key. Keys are applied in order; the first one
/// that distinguishes two transports decides.
///
/// Callback-based keys cannot be expressed in configuration and are added
/// programmatically through the selector options instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportSortKey {
    /// Compare an attribute, optionally descending.
    Field {
        field: TransportField,
        #[serde(default)]
        descending: bool,
    },
    /// Explicit ranking by short name; unlisted transports sort last.
    Rank { order: Vec<String> },
}

/// Forced values and ordering hints for combo selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSettings {
    /// Only consider sources with this MIME type.
    #[serde(default)]
    pub force_type: Option<String>,

    /// Only consider the source at this catalog index.
    #[serde(default)]
    pub force_source: Option<usize>,

    /// Only consider the transport with this short name.
    #[serde(default)]
    pub force_transport: Option<String>,

    /// Pre-ordering applied to transports before the search.
    #[serde(default)]
    pub sort_transports: Vec<TransportSortKey>,

    #[serde(default)]
    pub iteration: IterationOrder,
}

impl SelectionSettings {
    fn validate(&self) -> Result<()> {
        if matches!(&self.force_type, Some(t) if t.trim().is_empty()) {
            return Err(Error::Config(
                "selection.force_type cannot be empty".to_string(),
            ));
        }
        if matches!(&self.force_transport, Some(t) if t.trim().is_empty()) {
            return Err(Error::Config(
                "selection.force_transport cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Time a degradation warning stays up before the session fails over to
    /// the next combo.
    ///
    /// Default: 10 seconds.
    #[serde(default = "default_degraded_grace")]
    pub degraded_grace: Duration,

    /// How long a recoverable error stays on screen. While it shows, new
    /// degradation warnings and fail-over are held back.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_error_display")]
    pub error_display: Duration,

    /// Debounce window for resize notifications shared between players.
    ///
    /// Default: 100 ms.
    #[serde(default = "default_resize_debounce")]
    pub resize_debounce: Duration,

    /// Event bus capacity.
    ///
    /// Default: 100 events.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            degraded_grace: default_degraded_grace(),
            error_display: default_error_display(),
            resize_debounce: default_resize_debounce(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl SessionSettings {
    fn validate(&self) -> Result<()> {
        if self.error_display.is_zero() {
            return Err(Error::Config(
                "session.error_display must be > 0".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "session.event_buffer_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_health_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_averaging_steps() -> usize {
    20
}

fn default_health_threshold() -> f64 {
    0.75
}

fn default_low_latency_threshold() -> f64 {
    0.95
}

fn default_trim_every_appends() -> usize {
    500
}

fn default_retention_window() -> Duration {
    Duration::from_secs(180)
}

fn default_drop_threshold() -> usize {
    20
}

fn default_position_tolerance() -> f64 {
    0.001
}

fn default_min_buffer_ms() -> f64 {
    100.0
}

fn default_vod_extra_buffer_ms() -> f64 {
    2000.0
}

fn default_behind_seek_threshold_ms() -> f64 {
    1000.0
}

fn default_vod_throttle_rate() -> f64 {
    0.5
}

fn default_live_catchup_rate() -> f64 {
    1.1
}

fn default_delay_samples() -> usize {
    3
}

fn default_degraded_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_error_display() -> Duration {
    Duration::from_secs(5)
}

fn default_resize_debounce() -> Duration {
    Duration::from_millis(100)
}

fn default_event_buffer_size() -> usize {
    crate::events::DEFAULT_EVENT_BUFFER_SIZE
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for constructing [`PlayerConfig`] instances.
///
/// Every setter is optional; [`build`](PlayerConfigBuilder::build) fills in
/// defaults and validates the result.
#[derive(Debug, Default)]
pub struct PlayerConfigBuilder {
    config: PlayerConfig,
}

impl PlayerConfigBuilder {
    /// Sets the health sampling period.
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health.interval = interval;
        self
    }

    /// Sets the health sample ring capacity.
    pub fn averaging_steps(mut self, steps: usize) -> Self {
        self.config.health.averaging_steps = steps;
        self
    }

    /// Sets the default and latency-intolerant health thresholds.
    pub fn health_thresholds(mut self, threshold: f64, low_latency_threshold: f64) -> Self {
        self.config.health.threshold = threshold;
        self.config.health.low_latency_threshold = low_latency_threshold;
        self
    }

    pub fn trim_every_appends(mut self, appends: usize) -> Self {
        self.config.feed.trim_every_appends = appends;
        self
    }

    pub fn retention_window(mut self, window: Duration) -> Self {
        self.config.feed.retention_window = window;
        self
    }

    pub fn drop_threshold(mut self, queued_chunks: usize) -> Self {
        self.config.feed.drop_threshold = queued_chunks;
        self
    }

    pub fn drift(mut self, drift: DriftSettings) -> Self {
        self.config.drift = drift;
        self
    }

    pub fn force_type(mut self, mime: impl Into<String>) -> Self {
        self.config.selection.force_type = Some(mime.into());
        self
    }

    pub fn force_source(mut self, index: usize) -> Self {
        self.config.selection.force_source = Some(index);
        self
    }

    pub fn force_transport(mut self, short_name: impl Into<String>) -> Self {
        self.config.selection.force_transport = Some(short_name.into());
        self
    }

    /// Appends a transport sort key.
    pub fn sort_transports_by(mut self, key: TransportSortKey) -> Self {
        self.config.selection.sort_transports.push(key);
        self
    }

    pub fn iteration_order(mut self, order: IterationOrder) -> Self {
        self.config.selection.iteration = order;
        self
    }

    pub fn degraded_grace(mut self, grace: Duration) -> Self {
        self.config.session.degraded_grace = grace;
        self
    }

    pub fn error_display(mut self, display: Duration) -> Self {
        self.config.session.error_display = display;
        self
    }

    pub fn resize_debounce(mut self, debounce: Duration) -> Self {
        self.config.session.resize_debounce = debounce;
        self
    }

    pub fn event_buffer_size(mut self, capacity: usize) -> Self {
        self.config.session.event_buffer_size = capacity;
        self
    }

    /// Builds the final `PlayerConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn build(self) -> Result<PlayerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
