//! # Session Controller
//!
//! Owns one playback attempt at a time and all of its parts: the selected
//! combo, the transport connection, the buffer-feed engine, the health
//! monitor and the drift controller.
//!
//! ## Task model
//!
//! [`PlayerSession::spawn`] starts a single task that runs a `select!` loop
//! over host commands, transport events, health signals and the degradation
//! timer. Every state change happens on that task, so the engine's
//! check-then-act sequences never interleave.
//!
//! ## Failure policy
//!
//! - Transport and append failures tear the attempt down and re-run the
//!   selector, resuming after the failed combo. An exhausted selector is
//!   terminal.
//! - Health degradation is reported first and acted on only after a grace
//!   period, unless health recovers or another error is still on screen.
//! - Recoverable hiccups (bad frames, aborted codec switches, host-side state
//!   errors) are shown for `session.error_display` and otherwise ignored.
//!
//! ## Teardown order
//!
//! Health monitor first, then the feed engine (so late buffer completions are
//! ignored), then the transport connection.

use crate::catalog::SourceCatalog;
use crate::drift::{DelayEstimator, DriftController, RateAction, RateDecision};
use crate::error::{PlaybackError, Recovery, Result};
use crate::feed::{BufferFeedEngine, FeedStats};
use crate::health::HealthMonitor;
use crate::protocol::{ControlCommand, ControlMessage, MediaChunk, PlayRate};
use crate::registry::TransportRegistry;
use crate::selector::{select_combo, Combo, ResumeCursor, SelectOptions};
use crate::transport::{TransportConnector, TransportEvent};
use bridge_traits::{MediaElement, TransportConnection};
use core_runtime::events::{
    CoreEvent, EventBus, FeedEvent, HealthEvent, SelectionEvent, SessionEvent,
};
use core_runtime::logging::redact_url_credentials;
use core_runtime::PlayerConfig;
use futures::future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

// ============================================================================
// Handle
// ============================================================================

#[derive(Debug)]
enum SessionCommand {
    Seek(f64),
    SetRate(f64),
    BufferOpen,
    UpdateEnd,
    UpdateError(String),
    Unload(oneshot::Sender<()>),
}

/// Cloneable handle for driving a running session.
///
/// Host media notifications (`buffer_open`, `update_end`, `update_error`)
/// must be forwarded from the media buffer's completion events.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Seek to `position` seconds.
    pub fn seek(&self, position: f64) -> Result<()> {
        self.send(SessionCommand::Seek(position))
    }

    /// Change the playback rate. Rejects non-positive rates up front.
    pub fn set_rate(&self, rate: f64) -> Result<()> {
        if rate.is_nan() || rate <= 0.0 {
            return Err(PlaybackError::InvalidState(format!(
                "playback rate must be positive, got {}",
                rate
            )));
        }
        self.send(SessionCommand::SetRate(rate))
    }

    /// The current media buffer is open and accepts appends.
    pub fn buffer_open(&self) -> Result<()> {
        self.send(SessionCommand::BufferOpen)
    }

    /// The media buffer finished its current operation.
    pub fn update_end(&self) -> Result<()> {
        self.send(SessionCommand::UpdateEnd)
    }

    /// The media buffer's current operation failed.
    pub fn update_error(&self, message: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::UpdateError(message.into()))
    }

    /// Tear the session down and wait until it is gone.
    pub async fn unload(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(SessionCommand::Unload(ack))?;
        done.await.map_err(|_| PlaybackError::SessionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PlaybackError::SessionClosed)
    }
}

// ============================================================================
// Session
// ============================================================================

/// A configured, not yet running, playback session.
pub struct PlayerSession {
    config: PlayerConfig,
    catalog: Arc<SourceCatalog>,
    registry: Arc<TransportRegistry>,
    element: Arc<dyn MediaElement>,
    connector: Arc<dyn TransportConnector>,
    events: EventBus,
}

impl PlayerSession {
    /// Validate `config` and assemble a session. Nothing runs until
    /// [`spawn`](Self::spawn).
    pub fn new(
        config: PlayerConfig,
        catalog: Arc<SourceCatalog>,
        registry: Arc<TransportRegistry>,
        element: Arc<dyn MediaElement>,
        connector: Arc<dyn TransportConnector>,
    ) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.session.event_buffer_size);
        Ok(Self {
            config,
            catalog,
            registry,
            element,
            connector,
            events,
        })
    }

    /// Publish on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start the session task.
    pub fn spawn(self) -> SessionHandle {
        let (task, handle) = self.into_task();
        let span = info_span!("session", id = %handle.id);
        tokio::spawn(task.run().instrument(span));
        handle
    }

    fn into_task(self) -> (SessionTask, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (health_tx, health_rx) = mpsc::unbounded_channel();

        let task = SessionTask {
            config: self.config,
            catalog: self.catalog,
            registry: self.registry,
            element: self.element,
            connector: self.connector,
            events: self.events,
            commands: commands_rx,
            health_tx,
            health_rx,
            attempt: None,
            degraded_deadline: None,
            error_shown_until: None,
            failed: false,
        };
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            commands: commands_tx,
        };
        (task, handle)
    }
}

/// Everything belonging to one combo.
struct Attempt {
    combo: Combo,
    connection: Box<dyn TransportConnection>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    feed: BufferFeedEngine,
    monitor: HealthMonitor,
    drift: DriftController,
    delay: DelayEstimator,
    opened: bool,
    pending_seek: Option<f64>,
}

impl Attempt {
    fn send(&mut self, command: ControlCommand) -> Result<()> {
        let value = command.to_value()?;
        self.connection
            .send_control(value)
            .map_err(|e| PlaybackError::Transport(e.to_string()))?;
        self.delay.on_sent(&command, Instant::now());
        trace!(?command, "Control command sent");
        Ok(())
    }
}

enum Flow {
    Continue,
    Stop(Option<oneshot::Sender<()>>),
}

struct SessionTask {
    config: PlayerConfig,
    catalog: Arc<SourceCatalog>,
    registry: Arc<TransportRegistry>,
    element: Arc<dyn MediaElement>,
    connector: Arc<dyn TransportConnector>,
    events: EventBus,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    health_tx: mpsc::UnboundedSender<f64>,
    health_rx: mpsc::UnboundedReceiver<f64>,
    attempt: Option<Attempt>,
    degraded_deadline: Option<Instant>,
    /// A recoverable error is on screen until then.
    error_shown_until: Option<Instant>,
    failed: bool,
}

impl SessionTask {
    async fn run(mut self) {
        info!(sources = self.catalog.len(), transports = self.registry.len(), "Session starting");

        if let Err(err) = self.start_attempt(None).await {
            self.handle_failure(err).await;
        }

        let ack = loop {
            let deadline = self.degraded_deadline;

            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    // Every handle is gone.
                    None => Flow::Stop(None),
                },
                event = next_transport_event(&mut self.attempt) => {
                    let result = self.on_transport_event(event);
                    self.settle(result).await
                }
                Some(score) = self.health_rx.recv() => {
                    self.on_degraded(score);
                    Flow::Continue
                }
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_grace_expired().await;
                    Flow::Continue
                }
            };

            if let Flow::Stop(ack) = flow {
                break ack;
            }
        };

        if let Some(attempt) = self.attempt.take() {
            teardown(attempt).await;
        }
        self.emit(CoreEvent::Session(SessionEvent::Unloaded));
        info!("Session unloaded");

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.events.emit(event);
    }

    fn error_showing(&self) -> bool {
        self.error_shown_until.is_some_and(|until| Instant::now() < until)
    }

    // ========================================================================
    // Negotiation
    // ========================================================================

    /// Select and connect combos until one connects or the selector is
    /// exhausted.
    async fn start_attempt(&mut self, mut resume: Option<ResumeCursor>) -> Result<()> {
        loop {
            let mut options = SelectOptions::from_settings(&self.config.selection);
            if let Some(cursor) = resume.take() {
                options = options.resume_after(cursor);
            }

            let Some(combo) = select_combo(&self.catalog, &self.registry, &options) else {
                return Err(PlaybackError::NoCompatibleCombo(if options.resume.is_some() {
                    "all remaining combos failed".to_string()
                } else {
                    "no transport can play any source".to_string()
                }));
            };

            self.emit(CoreEvent::Selection(SelectionEvent::ComboSelected {
                transport: combo.transport.short_name().to_string(),
                source_url: redact_url_credentials(&combo.source.url),
                mime_type: combo.source.mime_type.clone(),
                source_index: combo.source_index,
            }));

            match self.connect(combo.clone()).await {
                Ok(attempt) => {
                    self.attempt = Some(attempt);
                    self.error_shown_until = None;
                    return Ok(());
                }
                Err(err) if !err.is_terminal() => {
                    warn!(transport = combo.transport.short_name(), error = %err, "Connect failed, trying next combo");
                    self.emit(CoreEvent::Selection(SelectionEvent::Renegotiating {
                        transport: combo.transport.short_name().to_string(),
                        source_index: combo.source_index,
                        reason: err.to_string(),
                    }));
                    resume = Some(combo.resume_cursor());
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn connect(&mut self, combo: Combo) -> Result<Attempt> {
        let transport = combo.transport.short_name().to_string();
        let url = redact_url_credentials(&combo.source.url);
        info!(%transport, %url, "Connecting");
        self.emit(CoreEvent::Session(SessionEvent::Connecting {
            transport: transport.clone(),
            url,
        }));

        let (events_tx, transport_rx) = mpsc::unbounded_channel();
        let connection = self.connector.connect(&combo, events_tx).await?;
        self.emit(CoreEvent::Session(SessionEvent::Connected {
            transport: transport.clone(),
        }));

        let feed = BufferFeedEngine::new(Arc::clone(&self.element), self.config.feed.clone())
            .with_event_bus(self.events.clone());

        let health_tx = self.health_tx.clone();
        let monitor = HealthMonitor::for_transport(
            Arc::clone(&self.element),
            &self.config.health,
            &combo.transport,
            Arc::new(move |score: f64| {
                let _ = health_tx.send(score);
            }),
        )
        .with_event_bus(self.events.clone());

        let supported_combinations = supported_combinations(&self.catalog, &combo);
        let mut attempt = Attempt {
            drift: DriftController::new(self.config.drift.clone(), self.catalog.kind()),
            delay: DelayEstimator::new(self.config.drift.delay_samples),
            combo,
            connection,
            transport_rx,
            feed,
            monitor,
            opened: false,
            pending_seek: None,
        };

        if let Err(err) = attempt.send(ControlCommand::RequestCodecData {
            supported_combinations,
        }) {
            teardown(attempt).await;
            return Err(err);
        }

        Ok(attempt)
    }

    /// Abandon the current attempt and continue with the next combo.
    async fn renegotiate(&mut self, reason: String) -> Result<()> {
        let resume = match self.attempt.take() {
            Some(attempt) => {
                let cursor = attempt.combo.resume_cursor();
                info!(transport = %cursor.transport, source_index = cursor.source_index, %reason, "Renegotiating");
                self.emit(CoreEvent::Selection(SelectionEvent::Renegotiating {
                    transport: cursor.transport.clone(),
                    source_index: cursor.source_index,
                    reason,
                }));
                teardown(attempt).await;
                Some(cursor)
            }
            None => None,
        };

        // Scores the old monitor queued before it stopped.
        while self.health_rx.try_recv().is_ok() {}
        self.degraded_deadline = None;
        self.start_attempt(resume).await
    }

    // ========================================================================
    // Failure handling
    // ========================================================================

    async fn settle(&mut self, result: Result<()>) -> Flow {
        if let Err(err) = result {
            self.handle_failure(err).await;
        }
        Flow::Continue
    }

    async fn handle_failure(&mut self, err: PlaybackError) {
        let err = match err.recovery() {
            Recovery::Absorb => {
                warn!(error = %err, "Recoverable playback error");
                self.error_shown_until =
                    Some(Instant::now() + self.config.session.error_display);
                self.emit(CoreEvent::Session(SessionEvent::Error {
                    message: err.to_string(),
                    recoverable: true,
                }));
                return;
            }
            Recovery::Renegotiate => match self.renegotiate(err.to_string()).await {
                Ok(()) => return,
                Err(next) => next,
            },
            Recovery::Fail => err,
        };

        self.fail(err).await;
    }

    async fn fail(&mut self, err: PlaybackError) {
        error!(error = %err, "Playback failed");
        if let Some(attempt) = self.attempt.take() {
            teardown(attempt).await;
        }
        if let PlaybackError::NoCompatibleCombo(reason) = &err {
            self.emit(CoreEvent::Selection(SelectionEvent::NoCompatibleCombo {
                reason: reason.clone(),
            }));
        }
        self.emit(CoreEvent::Session(SessionEvent::Error {
            message: err.to_string(),
            recoverable: false,
        }));
        self.degraded_deadline = None;
        self.failed = true;
    }

    // ========================================================================
    // Health
    // ========================================================================

    fn on_degraded(&mut self, score: f64) {
        if self.attempt.is_none() || self.failed {
            return;
        }
        if self.degraded_deadline.is_some() {
            trace!(score, "Degradation already reported");
            return;
        }
        if self.error_showing() {
            debug!(score, "Degradation suppressed, another error is showing");
            return;
        }

        let grace = self.config.session.degraded_grace;
        warn!(score, grace_secs = grace.as_secs_f64(), "Playback degraded");
        self.emit(CoreEvent::Health(HealthEvent::Degraded { score }));
        self.degraded_deadline = Some(Instant::now() + grace);
    }

    async fn on_grace_expired(&mut self) {
        self.degraded_deadline = None;
        let (healthy, last_score) = match self.attempt.as_ref() {
            Some(attempt) => (attempt.monitor.is_healthy(), attempt.monitor.last_score()),
            None => return,
        };

        if healthy {
            let score = last_score.unwrap_or(1.0);
            info!(score, "Playback recovered");
            self.emit(CoreEvent::Health(HealthEvent::Recovered { score }));
            return;
        }
        if self.error_showing() {
            debug!("Fail-over suppressed, another error is showing");
            return;
        }

        let score = last_score.unwrap_or(0.0);
        self.handle_failure(PlaybackError::HealthDegraded { score }).await;
    }

    // ========================================================================
    // Host commands
    // ========================================================================

    async fn on_command(&mut self, command: SessionCommand) -> Flow {
        let result = match command {
            SessionCommand::Unload(ack) => return Flow::Stop(Some(ack)),
            SessionCommand::Seek(position) => self.seek(position),
            SessionCommand::SetRate(rate) => self.set_rate(rate),
            SessionCommand::BufferOpen => self.with_feed(|feed| feed.on_buffer_open()),
            SessionCommand::UpdateEnd => self.with_feed(|feed| feed.on_update_end()),
            SessionCommand::UpdateError(message) => {
                self.with_feed(|feed| feed.on_update_error(&message))
            }
        };
        self.settle(result).await
    }

    fn with_feed<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BufferFeedEngine) -> Result<()>,
    {
        match self.attempt.as_mut() {
            Some(attempt) => f(&mut attempt.feed),
            None => Ok(()),
        }
    }

    fn seek(&mut self, position: f64) -> Result<()> {
        let Some(attempt) = self.attempt.as_mut() else {
            debug!(position, "Seek without an active attempt ignored");
            return Ok(());
        };

        let position = position.max(0.0);
        attempt.send(ControlCommand::Seek {
            seek_time: (position * 1000.0).round() as u64,
        })?;
        attempt.pending_seek = Some(position);
        attempt.drift.reset();

        self.emit(CoreEvent::Session(SessionEvent::Seeked {
            position_ms: (position * 1000.0).round() as u64,
        }));
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        self.element.set_playback_rate(rate);
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.send(ControlCommand::SetSpeed {
                play_rate: PlayRate::Fixed(rate),
            })?;
        }
        self.emit(CoreEvent::Session(SessionEvent::RateChanged { rate }));
        Ok(())
    }

    // ========================================================================
    // Transport events
    // ========================================================================

    fn on_transport_event(&mut self, event: Option<TransportEvent>) -> Result<()> {
        let Some(event) = event else {
            return Err(PlaybackError::Transport(
                "transport event channel closed".to_string(),
            ));
        };

        match event {
            TransportEvent::Frame(frame) => {
                let chunk = MediaChunk::decode(frame)?;
                self.with_feed(|feed| feed.enqueue(chunk))
            }
            TransportEvent::Control(value) => {
                let message = ControlMessage::parse(value)?;
                self.on_control(message)
            }
            TransportEvent::Closed { reason } => Err(PlaybackError::Transport(
                reason.unwrap_or_else(|| "connection closed".to_string()),
            )),
            TransportEvent::Failed(reason) => Err(PlaybackError::Transport(reason)),
        }
    }

    fn on_control(&mut self, message: ControlMessage) -> Result<()> {
        let Some(attempt) = self.attempt.as_mut() else {
            return Ok(());
        };
        attempt.delay.on_reply(message.kind(), Instant::now());

        match message {
            ControlMessage::CodecData(data) => {
                if attempt.opened {
                    let position = self.element.current_time();
                    attempt.feed.request_switch(data.codecs, position)?;
                } else {
                    attempt.feed.open(data.codecs)?;
                    attempt.opened = true;
                    attempt.monitor.init();
                    attempt.send(ControlCommand::Play)?;
                }
            }
            ControlMessage::Tracks(change) => {
                attempt
                    .feed
                    .request_switch(change.codecs, change.current / 1000.0)?;
            }
            ControlMessage::OnTime(report) => {
                let local_ms = self.element.current_time() * 1000.0;
                let delay_ms = attempt.delay.estimate_ms();
                if let Some(decision) = attempt.drift.evaluate(&report, local_ms, delay_ms) {
                    self.apply_rate_decision(decision)?;
                }
            }
            ControlMessage::Seek(_) => {
                if let Some(position) = attempt.pending_seek.take() {
                    attempt.feed.set_position(position);
                }
            }
            ControlMessage::SetSpeed(change) => attempt.drift.on_speed_ack(change.play_rate),
            ControlMessage::Pause { paused } => debug!(paused, "Server pause state"),
            ControlMessage::OnStop => {
                info!("Server ended the stream");
                self.emit(CoreEvent::Session(SessionEvent::Ended));
            }
            ControlMessage::Error(message) => return Err(PlaybackError::Transport(message)),
            ControlMessage::Unknown { kind, .. } => trace!(%kind, "Unhandled control message"),
        }

        Ok(())
    }

    fn apply_rate_decision(&mut self, decision: RateDecision) -> Result<()> {
        let Some(attempt) = self.attempt.as_mut() else {
            return Ok(());
        };

        let (action, reason) = match decision {
            RateDecision::Seek { position_ms } => {
                let actual = attempt.feed.set_position(position_ms / 1000.0);
                self.emit(CoreEvent::Session(SessionEvent::Seeked {
                    position_ms: (actual.max(0.0) * 1000.0).round() as u64,
                }));
                return Ok(());
            }
            RateDecision::Throttle(action) => (action, "buffer ahead of target"),
            RateDecision::Restore(action) => (action, "buffer back on target"),
        };

        match action {
            RateAction::RequestSpeed(rate) => {
                attempt.send(ControlCommand::SetSpeed { play_rate: rate })?;
            }
            RateAction::SetLocalRate(rate) => {
                self.element.set_playback_rate(rate);
                self.emit(CoreEvent::Session(SessionEvent::RateChanged { rate }));
            }
        }

        self.emit(CoreEvent::Feed(FeedEvent::RateAdjusted {
            rate: action.label(),
            reason: reason.to_string(),
        }));
        Ok(())
    }
}

async fn next_transport_event(attempt: &mut Option<Attempt>) -> Option<TransportEvent> {
    match attempt {
        Some(attempt) => attempt.transport_rx.recv().await,
        None => future::pending().await,
    }
}

/// Stop the monitor, close the feed, then close the connection.
async fn teardown(mut attempt: Attempt) -> FeedStats {
    attempt.monitor.destroy();
    attempt.feed.close();
    attempt.transport_rx.close();
    if let Err(err) = attempt.connection.close().await {
        debug!(error = %err, "Closing transport failed");
    }

    let stats = attempt.feed.stats().clone();
    debug!(
        transport = attempt.combo.transport.short_name(),
        appends = stats.appends_completed,
        dropped = stats.chunks_dropped,
        "Attempt torn down"
    );
    stats
}

/// Codec lists offered to the server: one combination with a codec list per
/// track kind, restricted to the kinds the transport reported playable.
fn supported_combinations(catalog: &SourceCatalog, combo: &Combo) -> Vec<Vec<Vec<String>>> {
    let allowed = combo.support.tracks();
    let mut kinds: Vec<(String, Vec<String>)> = Vec::new();

    for track in catalog.tracks().values() {
        if allowed.is_some_and(|kinds| !kinds.iter().any(|k| *k == track.kind)) {
            continue;
        }
        match kinds.iter_mut().find(|(kind, _)| *kind == track.kind) {
            Some((_, codecs)) => {
                if !codecs.contains(&track.codec) {
                    codecs.push(track.codec.clone());
                }
            }
            None => kinds.push((track.kind.clone(), vec![track.codec.clone()])),
        }
    }

    if kinds.is_empty() {
        return Vec::new();
    }
    vec![kinds.into_iter().map(|(_, codecs)| codecs).collect()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Source, StreamInfo, StreamKind};
    use crate::registry::{BrowserSupport, StaticTransport};
    use crate::test_support::FakeElement;
    use bridge_traits::error::Result as BridgeResult;
    use mockall::mock;
    use serde_json::{json, Value};

    mock! {
        pub Connection {}

        #[async_trait::async_trait]
        impl TransportConnection for Connection {
            fn send_control(&self, message: Value) -> BridgeResult<()>;
            async fn close(&self) -> BridgeResult<()>;
            fn is_open(&self) -> bool;
        }
    }

    fn fixture(support: BrowserSupport) -> (SourceCatalog, Combo) {
        let info = StreamInfo::from_json(
            r#"{ "meta": { "tracks": {
                "a1": { "type": "audio", "codec": "AAC" },
                "v1": { "type": "video", "codec": "H264" },
                "v2": { "type": "video", "codec": "HEVC" },
                "v3": { "type": "video", "codec": "H264" }
            } }, "source": [] }"#,
        )
        .unwrap();
        let catalog = SourceCatalog::from_stream_info(info);

        let mut registry = TransportRegistry::new();
        registry
            .register(Arc::new(StaticTransport::new("mews", ["ws/video/mp4"])))
            .unwrap();
        let combo = Combo {
            transport: registry.get("mews").unwrap().clone(),
            source: Source::new("ws://h/live.mp4", "ws/video/mp4"),
            source_index: 0,
            support,
        };
        (catalog, combo)
    }

    #[test]
    fn test_supported_combinations_group_by_kind() {
        let (catalog, combo) = fixture(BrowserSupport::Supported);
        assert_eq!(
            supported_combinations(&catalog, &combo),
            vec![vec![
                vec!["AAC".to_string()],
                vec!["H264".to_string(), "HEVC".to_string()],
            ]]
        );

        let (catalog, combo) = combo_with_tracks(&["video"]);
        assert_eq!(
            supported_combinations(&catalog, &combo),
            vec![vec![vec!["H264".to_string(), "HEVC".to_string()]]]
        );
    }

    fn combo_with_tracks(kinds: &[&str]) -> (SourceCatalog, Combo) {
        fixture(BrowserSupport::Tracks(kinds.iter().map(|k| k.to_string()).collect()))
    }

    #[tokio::test]
    async fn test_attempt_send_records_and_maps_errors() {
        let (_catalog, combo) = fixture(BrowserSupport::Supported);
        let element = FakeElement::new();

        let mut connection = MockConnection::new();
        connection
            .expect_send_control()
            .withf(|msg| msg == &json!({ "type": "play" }))
            .times(1)
            .returning(|_| Ok(()));
        connection
            .expect_send_control()
            .withf(|msg| msg["type"] == "hold")
            .times(1)
            .returning(|_| Err(bridge_traits::BridgeError::Connection("socket closed".into())));
        connection.expect_close().times(1).returning(|| Ok(()));

        let (_tx, transport_rx) = mpsc::unbounded_channel();
        let config = PlayerConfig::default();
        let mut attempt = Attempt {
            feed: BufferFeedEngine::new(element.clone(), config.feed.clone()),
            monitor: HealthMonitor::for_transport(
                element.clone(),
                &config.health,
                &combo.transport,
                Arc::new(|_: f64| {}),
            ),
            drift: DriftController::new(config.drift.clone(), StreamKind::Live),
            delay: DelayEstimator::new(3),
            combo,
            connection: Box::new(connection),
            transport_rx,
            opened: false,
            pending_seek: None,
        };

        attempt.send(ControlCommand::Play).unwrap();
        let err = attempt.send(ControlCommand::Hold).unwrap_err();
        assert!(matches!(err, PlaybackError::Transport(_)));
        assert!(err.triggers_renegotiation());

        teardown(attempt).await;
    }

    /// Hands out connections that accept everything.
    struct OpenConnector;

    #[async_trait::async_trait]
    impl TransportConnector for OpenConnector {
        async fn connect(
            &self,
            _combo: &Combo,
            _events: crate::transport::TransportEventSender,
        ) -> Result<Box<dyn TransportConnection>> {
            let mut connection = MockConnection::new();
            connection.expect_send_control().returning(|_| Ok(()));
            connection.expect_close().returning(|| Ok(()));
            connection.expect_is_open().returning(|| true);
            Ok(Box::new(connection))
        }
    }

    #[tokio::test]
    async fn test_renegotiation_discards_stale_health_scores() {
        let catalog = SourceCatalog::new(
            vec![Source::new("ws://h/live.mp4", "ws/video/mp4")],
            StreamKind::Live,
        );
        let mut registry = TransportRegistry::new();
        for name in ["mews", "webrtc"] {
            registry
                .register(Arc::new(StaticTransport::new(name, ["ws/video/mp4"])))
                .unwrap();
        }

        let session = PlayerSession::new(
            PlayerConfig::default(),
            Arc::new(catalog),
            Arc::new(registry),
            FakeElement::new(),
            Arc::new(OpenConnector),
        )
        .unwrap();
        let (mut task, _handle) = session.into_task();
        task.start_attempt(None).await.unwrap();

        // Sampled by the first attempt's monitor just before the swap.
        task.health_tx.send(0.1).unwrap();
        task.renegotiate("socket reset".to_string()).await.unwrap();

        assert!(task.health_rx.try_recv().is_err());
        assert!(task.degraded_deadline.is_none());
        let attempt = task.attempt.as_ref().unwrap();
        assert_eq!(attempt.combo.transport.short_name(), "webrtc");
    }
}
