//! # Drift & Rate Control
//!
//! Keeps the amount of media buffered ahead of the playhead near a target
//! window derived from the measured server delay.
//!
//! Each `on_time` report gives the server's current position. With `o` the
//! offset between that position and the local playhead and `f` the target
//! window (both in milliseconds):
//!
//! | Condition                        | Decision                                   |
//! |----------------------------------|--------------------------------------------|
//! | `o < -behind_seek_threshold`     | seek to the server position                |
//! | not adjusted and `o - f > f`     | throttle (VOD: slower delivery, live: faster local playback) |
//! | adjusted and `f/2 <= o <= f`     | restore the unmodified rate                |
//!
//! At most one decision is made per report and none while a server speed
//! change is still unacknowledged.

use crate::catalog::StreamKind;
use crate::protocol::{ControlCommand, OnTime, PlayRate};
use core_runtime::config::DriftSettings;
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;
use tracing::{debug, info, trace};

// ============================================================================
// Server delay
// ============================================================================

/// Estimates the one-way server delay from command/reply round trips.
#[derive(Debug, Clone)]
pub struct DelayEstimator {
    sent: HashMap<&'static str, Instant>,
    samples: VecDeque<f64>,
    capacity: usize,
}

impl DelayEstimator {
    pub fn new(capacity: usize) -> Self {
        Self {
            sent: HashMap::new(),
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Remember when a command expecting a reply went out.
    pub fn on_sent(&mut self, command: &ControlCommand, now: Instant) {
        if let Some(kind) = command.reply_kind() {
            self.sent.insert(kind, now);
        }
    }

    /// Record the reply to an earlier command; returns the new sample in ms.
    pub fn on_reply(&mut self, kind: &str, now: Instant) -> Option<f64> {
        let sent = self.sent.remove(kind)?;
        let delay = now.duration_since(sent).as_secs_f64() * 1000.0 / 2.0;

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(delay);
        trace!(kind, delay_ms = delay, "Server delay sample");
        Some(delay)
    }

    /// Mean of the retained samples, zero before the first reply.
    pub fn estimate_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

// ============================================================================
// Rate decisions
// ============================================================================

/// How a rate change is carried out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateAction {
    /// Ask the server to change its delivery rate.
    RequestSpeed(PlayRate),
    /// Change the local playback rate.
    SetLocalRate(f64),
}

impl RateAction {
    pub fn label(&self) -> String {
        match self {
            RateAction::RequestSpeed(rate) => format!("server {}", rate),
            RateAction::SetLocalRate(rate) => format!("local {}", rate),
        }
    }
}

/// Outcome of evaluating one server report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    /// Playback is too far behind; jump to the server position.
    Seek { position_ms: f64 },
    /// Buffer is well above target; step the rate once.
    Throttle(RateAction),
    /// Buffer is back in range; undo the earlier step.
    Restore(RateAction),
}

/// Single-step rate controller.
#[derive(Debug, Clone)]
pub struct DriftController {
    settings: DriftSettings,
    kind: StreamKind,
    adjusted: bool,
    pending_speed: Option<PlayRate>,
    reports_while_pending: u32,
}

impl DriftController {
    pub fn new(settings: DriftSettings, kind: StreamKind) -> Self {
        Self {
            settings,
            kind,
            adjusted: false,
            pending_speed: None,
            reports_while_pending: 0,
        }
    }

    /// Target buffer-ahead window in milliseconds.
    pub fn target_window_ms(&self, delay_ms: f64, jitter_ms: f64) -> f64 {
        let base = (self.settings.min_buffer_ms + delay_ms).max(2.0 * delay_ms) + jitter_ms;
        match self.kind {
            StreamKind::Vod => base + self.settings.vod_extra_buffer_ms,
            StreamKind::Live => base,
        }
    }

    pub fn is_adjusted(&self) -> bool {
        self.adjusted
    }

    pub fn pending_speed(&self) -> Option<PlayRate> {
        self.pending_speed
    }

    /// The server confirmed a `set_speed` request.
    pub fn on_speed_ack(&mut self, rate: PlayRate) {
        if self.pending_speed.take().is_some() {
            debug!(%rate, "Server acknowledged speed change");
        }
        self.reports_while_pending = 0;
    }

    /// Evaluate one `on_time` report against the local playhead.
    pub fn evaluate(
        &mut self,
        report: &OnTime,
        local_position_ms: f64,
        delay_ms: f64,
    ) -> Option<RateDecision> {
        if let Some(pending) = self.pending_speed {
            if report.play_rate_curr == Some(pending) {
                self.on_speed_ack(pending);
            } else if self.reports_while_pending == 0 {
                self.reports_while_pending += 1;
                trace!(%pending, "Speed change pending, holding decision");
                return None;
            } else {
                debug!(%pending, "Speed change never acknowledged, continuing");
                self.pending_speed = None;
                self.reports_while_pending = 0;
            }
        }

        let target = self.target_window_ms(delay_ms, report.jitter);
        let offset = report.current - local_position_ms;
        trace!(offset_ms = offset, target_ms = target, "Drift evaluation");

        if offset < -self.settings.behind_seek_threshold_ms {
            info!(offset_ms = offset, server_ms = report.current, "Playback behind server, seeking");
            return Some(RateDecision::Seek {
                position_ms: report.current,
            });
        }

        if !self.adjusted && offset - target > target {
            self.adjusted = true;
            let action = match self.kind {
                StreamKind::Vod => self.request(PlayRate::Fixed(self.settings.vod_throttle_rate)),
                StreamKind::Live => RateAction::SetLocalRate(self.settings.live_catchup_rate),
            };
            info!(offset_ms = offset, target_ms = target, action = %action.label(), "Buffer ahead of target, throttling");
            return Some(RateDecision::Throttle(action));
        }

        if self.adjusted && offset >= target / 2.0 && offset <= target {
            self.adjusted = false;
            let action = match self.kind {
                StreamKind::Vod => self.request(PlayRate::Auto),
                StreamKind::Live => RateAction::SetLocalRate(1.0),
            };
            info!(offset_ms = offset, target_ms = target, action = %action.label(), "Buffer back on target, restoring rate");
            return Some(RateDecision::Restore(action));
        }

        None
    }

    fn request(&mut self, rate: PlayRate) -> RateAction {
        self.pending_speed = Some(rate);
        self.reports_while_pending = 0;
        RateAction::RequestSpeed(rate)
    }

    /// Forget any adjustment, e.g. after the session seeks.
    pub fn reset(&mut self) {
        self.adjusted = false;
        self.pending_speed = None;
        self.reports_while_pending = 0;
    }
}
