//! # Playback Health Monitor
//!
//! Periodically samples `(wall clock, media time)` pairs and scores how fast
//! media time advances relative to real time, normalised by the playback
//! rate. A healthy stream scores about `1.0`.
//!
//! ## Scoring
//!
//! With samples `s_0 .. s_n` in the ring:
//!
//! ```text
//! long    = (media_n - media_0)     / (clock_n - clock_0)     / rate
//! instant = (media_n - media_{n-1}) / (clock_n - clock_{n-1}) / rate
//! score   = max(long, instant)
//! ```
//!
//! Taking the maximum lets a session that just recovered from a short stall
//! score well immediately while one that keeps sliding behind still scores
//! poorly.
//!
//! The monitor's only output is the action callback. Deciding what to do with
//! a degradation (warn, wait, fail over) belongs to the session.

use crate::registry::RegisteredTransport;
use bridge_traits::MediaElement;
use core_runtime::config::HealthSettings;
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use futures::future;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// One observation of playback progress, both values in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSample {
    pub clock: f64,
    pub media: f64,
}

/// Bounded sample ring plus the scoring rules.
#[derive(Debug, Clone)]
pub struct HealthScorer {
    samples: VecDeque<HealthSample>,
    capacity: usize,
    threshold: f64,
    last_score: Option<f64>,
}

impl HealthScorer {
    pub fn new(capacity: usize, threshold: f64) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
            last_score: None,
        }
    }

    /// Add a sample, evicting the oldest beyond capacity, and score the ring.
    ///
    /// Returns `None` while fewer than two usable samples exist.
    pub fn record(&mut self, sample: HealthSample, playback_rate: f64) -> Option<f64> {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        let score = self.score(playback_rate);
        if score.is_some() {
            self.last_score = score;
        }
        score
    }

    fn score(&self, playback_rate: f64) -> Option<f64> {
        if self.samples.len() < 2 || playback_rate <= 0.0 {
            return None;
        }

        let first = self.samples.front()?;
        let last = self.samples.back()?;
        let previous = self.samples.get(self.samples.len() - 2)?;

        let long = progress(first, last)? / playback_rate;
        let instant = progress(previous, last).map(|p| p / playback_rate);

        Some(match instant {
            Some(instant) => long.max(instant),
            None => long,
        })
    }

    /// Whether `score` indicates degraded playback.
    ///
    /// Requires the ring to be at least half full so a fresh session is not
    /// judged on one or two samples.
    pub fn check(&self, score: f64) -> bool {
        self.samples.len() >= self.capacity.div_ceil(2) && score < self.threshold
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_score = None;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn last_score(&self) -> Option<f64> {
        self.last_score
    }
}

fn progress(from: &HealthSample, to: &HealthSample) -> Option<f64> {
    let elapsed = to.clock - from.clock;
    (elapsed > 0.0).then(|| (to.media - from.media) / elapsed)
}

/// Callback invoked once per unhealthy detection with the offending score.
pub type HealthAction = Arc<dyn Fn(f64) + Send + Sync>;

/// Periodic sampler driving a [`HealthScorer`].
pub struct HealthMonitor {
    element: Arc<dyn MediaElement>,
    interval: std::time::Duration,
    scorer: Arc<Mutex<HealthScorer>>,
    action: HealthAction,
    events: Option<EventBus>,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

impl HealthMonitor {
    pub fn new(
        element: Arc<dyn MediaElement>,
        settings: &HealthSettings,
        latency_intolerant: bool,
        action: HealthAction,
    ) -> Self {
        let threshold = settings.threshold_for(latency_intolerant);
        Self {
            element,
            interval: settings.interval,
            scorer: Arc::new(Mutex::new(HealthScorer::new(
                settings.averaging_steps,
                threshold,
            ))),
            action,
            events: None,
            task: None,
        }
    }

    /// Monitor configured for the transport of the active combo.
    pub fn for_transport(
        element: Arc<dyn MediaElement>,
        settings: &HealthSettings,
        transport: &RegisteredTransport,
        action: HealthAction,
    ) -> Self {
        Self::new(
            element,
            settings,
            transport.descriptor().latency_intolerant(),
            action,
        )
    }

    /// Reset the sample ring whenever a seek or rate change is published.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Start sampling. Restarts from an empty ring if already active.
    pub fn init(&mut self) {
        self.destroy();
        self.scorer.lock().reset();

        let cancel = CancellationToken::new();
        let sampler = Sampler {
            element: Arc::clone(&self.element),
            scorer: Arc::clone(&self.scorer),
            action: Arc::clone(&self.action),
            interval: self.interval,
            resets: self.events.as_ref().map(EventBus::subscribe),
        };
        let handle = tokio::spawn(sampler.run(cancel.clone()));

        debug!(interval_ms = self.interval.as_millis() as u64, "Health monitor started");
        self.task = Some((cancel, handle));
    }

    /// Clear the sample ring without stopping the sampler.
    pub fn reset(&self) {
        trace!("Health samples reset");
        self.scorer.lock().reset();
    }

    /// Stop sampling. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if let Some((cancel, handle)) = self.task.take() {
            cancel.cancel();
            handle.abort();
            debug!("Health monitor stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Whether the most recent score met the threshold. A monitor with no
    /// score yet counts as healthy.
    pub fn is_healthy(&self) -> bool {
        let scorer = self.scorer.lock();
        scorer
            .last_score()
            .map_or(true, |score| score >= scorer.threshold())
    }

    pub fn last_score(&self) -> Option<f64> {
        self.scorer.lock().last_score()
    }

    pub fn sample_count(&self) -> usize {
        self.scorer.lock().len()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct Sampler {
    element: Arc<dyn MediaElement>,
    scorer: Arc<Mutex<HealthScorer>>,
    action: HealthAction,
    interval: std::time::Duration,
    resets: Option<Receiver<CoreEvent>>,
}

impl Sampler {
    async fn run(mut self, cancel: CancellationToken) {
        let origin = Instant::now();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sample(origin),
                event = next_event(&mut self.resets) => match event {
                    Ok(CoreEvent::Session(SessionEvent::Seeked { .. }))
                    | Ok(CoreEvent::Session(SessionEvent::RateChanged { .. })) => {
                        self.scorer.lock().reset();
                        trace!("Health samples reset after seek or rate change");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // A missed seek would skew the score; start over.
                        warn!(skipped, "Health monitor lagged behind event bus");
                        self.scorer.lock().reset();
                    }
                    Err(RecvError::Closed) => self.resets = None,
                },
            }
        }
    }

    fn sample(&self, origin: Instant) {
        if self.element.is_paused() {
            self.scorer.lock().reset();
            return;
        }

        let sample = HealthSample {
            clock: origin.elapsed().as_secs_f64(),
            media: self.element.current_time(),
        };
        let rate = self.element.playback_rate();

        let degraded = {
            let mut scorer = self.scorer.lock();
            scorer
                .record(sample, rate)
                .filter(|score| scorer.check(*score))
        };

        if let Some(score) = degraded {
            warn!(score, "Playback health below threshold");
            (self.action)(score);
        }
    }
}

async fn next_event(resets: &mut Option<Receiver<CoreEvent>>) -> Result<CoreEvent, RecvError> {
    match resets {
        Some(receiver) => receiver.recv().await,
        None => future::pending().await,
    }
}
