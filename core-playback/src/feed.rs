//! # Buffer-Feed Engine
//!
//! Single-flight admission controller between a transport's media chunks and
//! the host media buffer.
//!
//! ## Operation model
//!
//! The host buffer accepts one operation at a time and reports completion
//! asynchronously. The engine therefore keeps a FIFO of pending operations
//! (appends and trims) and starts the next one only from
//! [`on_update_end`](BufferFeedEngine::on_update_end). `enqueue` starts an
//! append directly only when nothing is in flight and nothing is queued.
//!
//! ## Codec switches
//!
//! A switch freezes admission into the current buffer. Chunks that arrive
//! afterwards are held for the new buffer. Once the queue has drained the old
//! buffer is cleared, released and replaced; when the replacement reports
//! open, the playhead is moved to the switch's resume position (verified and
//! retried once) and the held chunks are admitted. Several switches requested
//! in quick succession are executed in arrival order.
//!
//! ## Backpressure
//!
//! When the backlog reaches the drop threshold, non-keyframe chunks are
//! discarded until the next keyframe arrives.

use crate::error::{PlaybackError, Result};
use crate::protocol::MediaChunk;
use bridge_traits::{MediaBuffer, MediaElement, TimeRange};
use core_runtime::config::FeedSettings;
use core_runtime::events::{CoreEvent, EventBus, FeedEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Observable state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferState {
    /// Waiting for a buffer to be created or to report open.
    Uninitialized,
    /// Idle: nothing in flight and nothing queued.
    Ready,
    /// An operation is in flight.
    Appending,
    /// A codec switch is pending or executing.
    DrainingForSwitch,
    /// Torn down; every further event is ignored.
    Closed,
}

/// Counters kept over the engine's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub appends_completed: u64,
    pub trims_completed: u64,
    pub chunks_dropped: u64,
    /// Drops since drop mode was last entered.
    pub dropped_this_interval: u64,
    pub drop_intervals: u64,
    pub switches_completed: u64,
    pub switches_aborted: u64,
    pub absorbed_failures: u64,
}

#[derive(Debug)]
enum FeedOp {
    Append(MediaChunk),
    Trim { end: f64 },
}

#[derive(Debug, Clone, Copy)]
enum InFlight {
    Append,
    Trim { end: f64 },
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingOpen,
    Open,
    Clearing,
    Closed,
}

#[derive(Debug)]
struct PendingSwitch {
    codecs: Vec<String>,
    resume_at: f64,
    held: VecDeque<MediaChunk>,
}

/// Buffer being cleared or created; collects chunks meant for it.
#[derive(Debug)]
struct Transition {
    codecs: Vec<String>,
    resume_at: Option<f64>,
    held: VecDeque<MediaChunk>,
    is_switch: bool,
}

pub struct BufferFeedEngine {
    element: Arc<dyn MediaElement>,
    settings: FeedSettings,
    events: Option<EventBus>,
    phase: Phase,
    buffer: Option<Box<dyn MediaBuffer>>,
    codecs: Vec<String>,
    queue: VecDeque<FeedOp>,
    in_flight: Option<InFlight>,
    switches: VecDeque<PendingSwitch>,
    transition: Option<Transition>,
    drop_mode: bool,
    appends_since_trim: usize,
    stats: FeedStats,
}

impl BufferFeedEngine {
    pub fn new(element: Arc<dyn MediaElement>, settings: FeedSettings) -> Self {
        Self {
            element,
            settings,
            events: None,
            phase: Phase::AwaitingOpen,
            buffer: None,
            codecs: Vec::new(),
            queue: VecDeque::new(),
            in_flight: None,
            switches: VecDeque::new(),
            transition: None,
            drop_mode: false,
            appends_since_trim: 0,
            stats: FeedStats::default(),
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> BufferState {
        match self.phase {
            Phase::Closed => BufferState::Closed,
            Phase::Clearing => BufferState::DrainingForSwitch,
            Phase::AwaitingOpen => match &self.transition {
                Some(transition) if transition.is_switch => BufferState::DrainingForSwitch,
                _ => BufferState::Uninitialized,
            },
            Phase::Open if !self.switches.is_empty() => BufferState::DrainingForSwitch,
            Phase::Open if self.in_flight.is_some() => BufferState::Appending,
            Phase::Open => BufferState::Ready,
        }
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    /// Codec set of the current buffer.
    pub fn codecs(&self) -> &[String] {
        &self.codecs
    }

    /// Operations waiting behind the in-flight one.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_drop_mode(&self) -> bool {
        self.drop_mode
    }

    pub fn buffered(&self) -> Vec<TimeRange> {
        self.buffer
            .as_ref()
            .map(|buffer| buffer.buffered())
            .unwrap_or_default()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the first buffer. Chunks may be enqueued before or after; they
    /// are appended once the host reports the buffer open.
    pub fn open(&mut self, codecs: Vec<String>) -> Result<()> {
        if self.phase != Phase::AwaitingOpen || self.buffer.is_some() || self.transition.is_some() {
            return Err(PlaybackError::InvalidState(
                "media buffer already created".to_string(),
            ));
        }
        if !valid_codecs(&codecs) {
            return Err(PlaybackError::InvalidState(
                "cannot create a media buffer without codecs".to_string(),
            ));
        }

        self.transition = Some(Transition {
            codecs,
            resume_at: None,
            held: VecDeque::new(),
            is_switch: false,
        });
        self.replace_buffer()
    }

    /// Mark the engine closed, abort in-flight work and release the buffer.
    /// Later completions and chunks are ignored.
    pub fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;

        if let Some(mut buffer) = self.buffer.take() {
            if self.in_flight.take().is_some() {
                if let Err(err) = buffer.abort() {
                    debug!(error = %err, "Abort during teardown failed");
                }
            }
            self.element.release_buffer(buffer);
        }
        self.queue.clear();
        self.switches.clear();
        self.transition = None;

        info!(
            appends = self.stats.appends_completed,
            dropped = self.stats.chunks_dropped,
            switches = self.stats.switches_completed,
            "Buffer feed closed"
        );
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Admit a chunk, subject to drop-mode backpressure and switch freezes.
    pub fn enqueue(&mut self, chunk: MediaChunk) -> Result<()> {
        if self.phase == Phase::Closed {
            trace!("Chunk after close ignored");
            return Ok(());
        }
        if !self.admit(&chunk) {
            return Ok(());
        }

        if let Some(switch) = self.switches.back_mut() {
            switch.held.push_back(chunk);
            return Ok(());
        }
        if let Some(transition) = self.transition.as_mut() {
            transition.held.push_back(chunk);
            return Ok(());
        }

        self.queue.push_back(FeedOp::Append(chunk));
        self.pump()
    }

    fn backlog(&self) -> usize {
        let queued = self
            .queue
            .iter()
            .filter(|op| matches!(op, FeedOp::Append(_)))
            .count();
        let held: usize = self.switches.iter().map(|s| s.held.len()).sum();
        let transition = self.transition.as_ref().map_or(0, |t| t.held.len());
        queued + held + transition
    }

    fn admit(&mut self, chunk: &MediaChunk) -> bool {
        if self.drop_mode {
            if chunk.is_keyframe {
                self.drop_mode = false;
                info!(dropped = self.stats.dropped_this_interval, "Keyframe received, leaving drop mode");
                self.emit(FeedEvent::DropModeExited {
                    dropped: self.stats.dropped_this_interval,
                });
                return true;
            }
            self.stats.chunks_dropped += 1;
            self.stats.dropped_this_interval += 1;
            return false;
        }

        let backlog = self.backlog();
        if backlog >= self.settings.drop_threshold && !chunk.is_keyframe {
            self.drop_mode = true;
            self.stats.drop_intervals += 1;
            self.stats.dropped_this_interval = 1;
            self.stats.chunks_dropped += 1;
            warn!(queued = backlog, "Feed fell behind, dropping until next keyframe");
            self.emit(FeedEvent::DropModeEntered { queued: backlog });
            return false;
        }

        true
    }

    // ========================================================================
    // Codec switch
    // ========================================================================

    /// Schedule a switch to `codecs`, resuming playback at `resume_at`
    /// seconds. Returns `Ok(false)` when the codec set is unchanged.
    pub fn request_switch(&mut self, codecs: Vec<String>, resume_at: f64) -> Result<bool> {
        if self.phase == Phase::Closed {
            return Ok(false);
        }

        if !valid_codecs(&codecs) {
            self.stats.switches_aborted += 1;
            let reason = format!("invalid codec set {:?}", codecs);
            warn!(%reason, "Codec switch aborted");
            self.emit(FeedEvent::CodecSwitchAborted {
                reason: reason.clone(),
            });
            return Err(PlaybackError::CodecSwitchAborted(reason));
        }

        let current = self
            .switches
            .back()
            .map(|switch| &switch.codecs)
            .or(self.transition.as_ref().map(|t| &t.codecs))
            .unwrap_or(&self.codecs)
            .clone();
        if current == codecs {
            trace!(?codecs, "Track change keeps codec set");
            return Ok(false);
        }

        info!(from = ?current, to = ?codecs, resume_at, "Codec switch requested");
        self.emit(FeedEvent::CodecSwitchStarted {
            from: current,
            to: codecs.clone(),
        });
        self.switches.push_back(PendingSwitch {
            codecs,
            resume_at,
            held: VecDeque::new(),
        });

        self.pump()?;
        Ok(true)
    }

    fn begin_switch(&mut self, switch: PendingSwitch) -> Result<()> {
        debug!(codecs = ?switch.codecs, "Old buffer drained, clearing");
        self.phase = Phase::Clearing;
        self.transition = Some(Transition {
            codecs: switch.codecs,
            resume_at: Some(switch.resume_at),
            held: switch.held,
            is_switch: true,
        });

        let span = self.buffer.as_ref().and_then(|buffer| {
            let ranges = buffer.buffered();
            let start = ranges.iter().map(|r| r.start).reduce(f64::min)?;
            let end = ranges.iter().map(|r| r.end).reduce(f64::max)?;
            Some((start, end))
        });

        if let (Some((start, end)), Some(buffer)) = (span, self.buffer.as_mut()) {
            match buffer.remove(start, end) {
                Ok(()) => {
                    self.in_flight = Some(InFlight::Clear);
                    return Ok(());
                }
                Err(err) => warn!(error = %err, "Clearing old buffer failed, replacing anyway"),
            }
        }

        self.replace_buffer()
    }

    /// Release the current buffer (if any) and create one for the pending
    /// transition's codecs.
    fn replace_buffer(&mut self) -> Result<()> {
        let codecs = match &self.transition {
            Some(transition) => transition.codecs.clone(),
            None => {
                return Err(PlaybackError::InvalidState(
                    "no buffer transition in progress".to_string(),
                ))
            }
        };

        if let Some(old) = self.buffer.take() {
            self.element.release_buffer(old);
        }

        let buffer = self.element.create_buffer(&codecs)?;
        self.buffer = Some(buffer);
        self.codecs = codecs.clone();
        self.phase = Phase::AwaitingOpen;

        debug!(?codecs, "Media buffer created");
        self.emit(FeedEvent::BufferCreated { codecs });
        Ok(())
    }

    /// The host reports the current buffer open and ready for appends.
    pub fn on_buffer_open(&mut self) -> Result<()> {
        if self.phase != Phase::AwaitingOpen || self.buffer.is_none() {
            trace!(phase = ?self.phase, "Buffer open ignored");
            return Ok(());
        }
        self.phase = Phase::Open;

        if let Some(transition) = self.transition.take() {
            let position = transition.resume_at.map(|at| self.set_position(at));
            self.queue
                .extend(transition.held.into_iter().map(FeedOp::Append));

            if transition.is_switch {
                self.stats.switches_completed += 1;
                let position_ms = position.map_or(0, |p| (p.max(0.0) * 1000.0).round() as u64);
                info!(codecs = ?self.codecs, position_ms, "Codec switch completed");
                self.emit(FeedEvent::CodecSwitchCompleted {
                    codecs: self.codecs.clone(),
                    position_ms,
                });
            }
        }

        self.pump()
    }

    /// Move the playhead, reading it back and retrying once when the host did
    /// not land within tolerance. Returns the observed position.
    pub fn set_position(&self, target: f64) -> f64 {
        let tolerance = self.settings.position_tolerance;

        self.element.set_current_time(target);
        let mut actual = self.element.current_time();
        if (actual - target).abs() > tolerance {
            debug!(target, actual, "Position not honoured, retrying");
            self.element.set_current_time(target);
            actual = self.element.current_time();
            if (actual - target).abs() > tolerance {
                warn!(target, actual, "Position still off after retry");
            }
        }
        actual
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// The in-flight operation finished. The only place new work starts
    /// once the engine is busy.
    pub fn on_update_end(&mut self) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        let Some(done) = self.in_flight.take() else {
            debug!("Update end without an operation in flight");
            return Ok(());
        };

        match done {
            InFlight::Append => {
                self.stats.appends_completed += 1;
                self.appends_since_trim += 1;
                if self.appends_since_trim >= self.settings.trim_every_appends {
                    self.appends_since_trim = 0;
                    self.schedule_trim();
                }
            }
            InFlight::Trim { end } => {
                self.stats.trims_completed += 1;
                self.emit(FeedEvent::Trimmed { before_secs: end });
            }
            InFlight::Clear => return self.replace_buffer(),
        }

        self.pump()
    }

    /// The in-flight operation failed asynchronously.
    pub fn on_update_error(&mut self, message: &str) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }

        match self.in_flight.take() {
            Some(InFlight::Append) | None => {
                self.append_failed(message.to_string())?;
                self.pump()
            }
            Some(InFlight::Trim { .. }) => {
                warn!(error = message, "Trim failed");
                self.pump()
            }
            Some(InFlight::Clear) => {
                warn!(error = message, "Clearing old buffer failed, replacing anyway");
                self.replace_buffer()
            }
        }
    }

    fn append_failed(&mut self, message: String) -> Result<()> {
        if self.drop_mode {
            self.stats.absorbed_failures += 1;
            debug!(error = %message, "Append failure absorbed while dropping");
            return Ok(());
        }
        warn!(error = %message, "Append failed");
        Err(PlaybackError::BufferAppend(message))
    }

    fn schedule_trim(&mut self) {
        let end = self.element.current_time() - self.settings.retention_window.as_secs_f64();
        if end > 0.0 {
            debug!(before_secs = end, "Trim queued");
            self.queue.push_back(FeedOp::Trim { end });
        }
    }

    /// Start queued work if the buffer is idle.
    fn pump(&mut self) -> Result<()> {
        loop {
            if self.phase != Phase::Open || self.in_flight.is_some() {
                return Ok(());
            }

            match self.queue.pop_front() {
                Some(op) => {
                    if self.start(op)? {
                        return Ok(());
                    }
                }
                None => {
                    return match self.switches.pop_front() {
                        Some(switch) => self.begin_switch(switch),
                        None => Ok(()),
                    };
                }
            }
        }
    }

    /// Returns `true` if the operation is now in flight.
    fn start(&mut self, op: FeedOp) -> Result<bool> {
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| PlaybackError::InvalidState("no media buffer".to_string()))?;

        match op {
            FeedOp::Append(chunk) => match buffer.append(chunk.data) {
                Ok(()) => {
                    self.in_flight = Some(InFlight::Append);
                    Ok(true)
                }
                Err(err) => {
                    self.append_failed(err.to_string())?;
                    Ok(false)
                }
            },
            FeedOp::Trim { end } => match buffer.remove(0.0, end) {
                Ok(()) => {
                    self.in_flight = Some(InFlight::Trim { end });
                    Ok(true)
                }
                Err(err) => {
                    warn!(error = %err, "Trim rejected");
                    Ok(false)
                }
            },
        }
    }

    fn emit(&self, event: FeedEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.emit(CoreEvent::Feed(event));
        }
    }
}

fn valid_codecs(codecs: &[String]) -> bool {
    !codecs.is_empty() && codecs.iter().all(|codec| !codec.trim().is_empty())
}

impl Drop for BufferFeedEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeElement;
    use bytes::Bytes;
    use std::time::Duration;

    fn chunk(n: u64, keyframe: bool) -> MediaChunk {
        MediaChunk {
            track_index: 1,
            is_keyframe: keyframe,
            timestamp_ms: n * 40,
            output_offset_ms: 0,
            data: Bytes::from(n.to_be_bytes().to_vec()),
        }
    }

    fn codecs(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    fn open_engine(element: &Arc<FakeElement>, settings: FeedSettings) -> BufferFeedEngine {
        let mut engine = BufferFeedEngine::new(element.clone(), settings);
        engine.open(codecs(&["avc1.42e01e"])).unwrap();
        engine.on_buffer_open().unwrap();
        engine
    }

    /// Complete operations until the engine is idle.
    fn drain(engine: &mut BufferFeedEngine, element: &FakeElement) {
        for _ in 0..1000 {
            match engine.state() {
                BufferState::Appending | BufferState::DrainingForSwitch => {
                    element.finish();
                    if engine.state() == BufferState::DrainingForSwitch
                        && engine.phase == Phase::AwaitingOpen
                    {
                        engine.on_buffer_open().unwrap();
                    } else {
                        engine.on_update_end().unwrap();
                    }
                }
                _ => return,
            }
        }
        panic!("engine never settled");
    }

    #[test]
    fn test_enqueue_while_busy_is_serialized() {
        let element = FakeElement::new();
        let mut engine = open_engine(&element, FeedSettings::default());

        engine.enqueue(chunk(0, true)).unwrap();
        assert_eq!(engine.state(), BufferState::Appending);

        for n in 1..=7 {
            engine.enqueue(chunk(n, false)).unwrap();
        }
        assert_eq!(engine.queued(), 7);
        assert_eq!(element.current().lock().appends.len(), 1);

        drain(&mut engine, &element);

        let log = element.current();
        let log = log.lock();
        assert_eq!(log.appends.len(), 8);
        assert_eq!(log.violations, 0);
        assert_eq!(engine.stats().appends_completed, 8);
        assert_eq!(engine.state(), BufferState::Ready);
    }

    #[test]
    fn test_chunks_before_open_wait_for_buffer() {
        let element = FakeElement::new();
        let mut engine = BufferFeedEngine::new(element.clone(), FeedSettings::default());

        engine.enqueue(chunk(0, true)).unwrap();
        engine.open(codecs(&["vp9"])).unwrap();
        engine.enqueue(chunk(1, false)).unwrap();
        assert_eq!(engine.state(), BufferState::Uninitialized);
        assert!(element.current().lock().appends.is_empty());

        engine.on_buffer_open().unwrap();
        drain(&mut engine, &element);

        let log = element.current();
        let appends: Vec<_> = log.lock().appends.clone();
        assert_eq!(appends, vec![chunk(0, true).data, chunk(1, false).data]);
    }

    #[test]
    fn test_update_end_after_close_is_noop() {
        let element = FakeElement::new();
        let mut engine = open_engine(&element, FeedSettings::default());
        engine.enqueue(chunk(0, true)).unwrap();
        engine.enqueue(chunk(1, false)).unwrap();

        engine.close();
        assert_eq!(engine.state(), BufferState::Closed);
        assert!(element.current().lock().aborted);
        assert_eq!(element.released.load(std::sync::atomic::Ordering::SeqCst), 1);

        element.finish();
        engine.on_update_end().unwrap();
        engine.enqueue(chunk(2, false)).unwrap();
        assert_eq!(element.current().lock().appends.len(), 1);
        engine.close();
    }

    #[test]
    fn test_trim_every_k_appends() {
        let element = FakeElement::new();
        element.set_position(200.0);
        let settings = FeedSettings {
            trim_every_appends: 3,
            retention_window: Duration::from_secs(180),
            ..Default::default()
        };
        let mut engine = open_engine(&element, settings);

        for n in 0..6 {
            engine.enqueue(chunk(n, n == 0)).unwrap();
        }
        drain(&mut engine, &element);

        let log = element.current();
        let log = log.lock();
        assert_eq!(log.removes, vec![(0.0, 20.0), (0.0, 20.0)]);
        assert_eq!(log.violations, 0);
        assert_eq!(engine.stats().trims_completed, 2);
    }

    #[test]
    fn test_trim_skipped_near_start() {
        let element = FakeElement::new();
        element.set_position(30.0);
        let settings = FeedSettings {
            trim_every_appends: 1,
            ..Default::default()
        };
        let mut engine = open_engine(&element, settings);
        engine.enqueue(chunk(0, true)).unwrap();
        drain(&mut engine, &element);

        assert!(element.current().lock().removes.is_empty());
    }

    fn switch_with_queued(queued: u64) {
        let element = FakeElement::with_rounding(0.01);
        let mut engine = open_engine(&element, FeedSettings::default());
        element.current().lock().ranges = vec![TimeRange::new(0.0, 4.0), TimeRange::new(5.0, 9.5)];
        let old = element.current();

        // One chunk in flight plus `queued` behind it.
        for n in 0..=queued {
            engine.enqueue(chunk(n, n == 0)).unwrap();
        }

        assert!(engine
            .request_switch(codecs(&["hev1.1.6.L93.B0"]), 9.123)
            .unwrap());
        assert_eq!(engine.state(), BufferState::DrainingForSwitch);

        // Chunks for the new codec arrive before the old buffer has drained.
        engine.enqueue(chunk(100, true)).unwrap();
        engine.enqueue(chunk(101, false)).unwrap();

        drain(&mut engine, &element);

        {
            let old = old.lock();
            assert_eq!(old.appends.len() as u64, queued + 1);
            assert!(!old.appends.contains(&chunk(100, true).data));
            assert_eq!(old.removes.last(), Some(&(0.0, 9.5)));
            assert!(old.ranges.is_empty());
            assert_eq!(old.violations, 0);
        }

        assert_eq!(element.buffer_count(), 2);
        let new = element.current();
        let new = new.lock();
        assert_eq!(new.codecs, codecs(&["hev1.1.6.L93.B0"]));
        assert_eq!(new.appends, vec![chunk(100, true).data, chunk(101, false).data]);

        assert!((element.current_time() - 9.123).abs() <= 0.01);
        assert_eq!(engine.codecs(), &codecs(&["hev1.1.6.L93.B0"])[..]);
        assert_eq!(engine.stats().switches_completed, 1);
    }

    #[test]
    fn test_codec_switch_with_nothing_queued() {
        switch_with_queued(0);
    }

    #[test]
    fn test_codec_switch_with_one_queued() {
        switch_with_queued(1);
    }

    #[test]
    fn test_codec_switch_with_three_queued() {
        switch_with_queued(3);
    }

    #[test]
    fn test_codec_switch_from_idle_engine() {
        let element = FakeElement::new();
        let mut engine = open_engine(&element, FeedSettings::default());

        assert!(engine.request_switch(codecs(&["vp9"]), 2.0).unwrap());
        // Empty buffer: replaced immediately, waiting for the new one to open.
        assert_eq!(element.buffer_count(), 2);
        assert_eq!(engine.state(), BufferState::DrainingForSwitch);

        engine.on_buffer_open().unwrap();
        assert_eq!(engine.state(), BufferState::Ready);
        assert_eq!(element.current_time(), 2.0);
    }

    #[test]
    fn test_position_retried_once() {
        let element = FakeElement::new();
        let mut engine = open_engine(&element, FeedSettings::default());
        element.ignore_next_seeks(1);

        engine.request_switch(codecs(&["vp9"]), 7.5).unwrap();
        engine.on_buffer_open().unwrap();

        assert_eq!(element.seeks.lock().clone(), vec![7.5, 7.5]);
        assert_eq!(element.current_time(), 7.5);
    }

    #[test]
    fn test_rapid_switches_run_in_order() {
        let element = FakeElement::new();
        let mut engine = open_engine(&element, FeedSettings::default());
        engine.enqueue(chunk(0, true)).unwrap();

        assert!(engine.request_switch(codecs(&["vp9"]), 1.0).unwrap());
        engine.enqueue(chunk(1, true)).unwrap();
        assert!(engine.request_switch(codecs(&["av01.0.05M.08"]), 2.0).unwrap());
        engine.enqueue(chunk(2, true)).unwrap();
        // Same as the last pending target: nothing to do.
        assert!(!engine.request_switch(codecs(&["av01.0.05M.08"]), 3.0).unwrap());

        drain(&mut engine, &element);

        let buffers = element.buffers.lock().clone();
        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers[1].lock().codecs, codecs(&["vp9"]));
        assert_eq!(buffers[1].lock().appends, vec![chunk(1, true).data]);
        assert_eq!(buffers[2].lock().codecs, codecs(&["av01.0.05M.08"]));
        assert_eq!(buffers[2].lock().appends, vec![chunk(2, true).data]);
        assert_eq!(engine.stats().switches_completed, 2);
    }

    #[test]
    fn test_empty_codec_set_aborts_switch() {
        let element = FakeElement::new();
        let mut engine = open_engine(&element, FeedSettings::default());

        let err = engine.request_switch(vec![], 1.0).unwrap_err();
        assert!(matches!(err, PlaybackError::CodecSwitchAborted(_)));
        assert_eq!(err.recovery(), crate::error::Recovery::Absorb);
        let err = engine.request_switch(codecs(&[" "]), 1.0).unwrap_err();
        assert!(matches!(err, PlaybackError::CodecSwitchAborted(_)));

        assert_eq!(engine.stats().switches_aborted, 2);
        assert_eq!(element.buffer_count(), 1);
        assert_eq!(engine.state(), BufferState::Ready);

        engine.enqueue(chunk(0, true)).unwrap();
        assert_eq!(element.current().lock().appends.len(), 1);
    }

    #[test]
    fn test_same_codecs_is_not_a_switch() {
        let element = FakeElement::new();
        let mut engine = open_engine(&element, FeedSettings::default());
        assert!(!engine.request_switch(codecs(&["avc1.42e01e"]), 1.0).unwrap());
        assert_eq!(engine.state(), BufferState::Ready);
    }

    #[test]
    fn test_drop_mode_counts_exactly() {
        let element = FakeElement::new();
        let settings = FeedSettings {
            drop_threshold: 4,
            ..Default::default()
        };
        let mut engine = open_engine(&element, settings);

        // One in flight, four queued.
        for n in 0..5 {
            engine.enqueue(chunk(n, n == 0)).unwrap();
        }
        assert_eq!(engine.queued(), 4);
        assert!(!engine.is_drop_mode());

        // Non-keyframes from here on are dropped.
        let mut non_key = 0;
        for n in 5..12 {
            engine.enqueue(chunk(n, false)).unwrap();
            non_key += 1;
        }
        assert!(engine.is_drop_mode());
        assert_eq!(engine.queued(), 4);
        assert_eq!(engine.stats().chunks_dropped, non_key);
        assert_eq!(engine.stats().dropped_this_interval, non_key);

        engine.enqueue(chunk(12, true)).unwrap();
        assert!(!engine.is_drop_mode());
        assert_eq!(engine.queued(), 5);
        assert_eq!(engine.stats().chunks_dropped, non_key);

        drain(&mut engine, &element);
        let appends = element.current().lock().appends.clone();
        assert_eq!(appends.len(), 6);
        assert_eq!(appends.last(), Some(&chunk(12, true).data));
    }

    #[test]
    fn test_keyframe_at_threshold_is_admitted() {
        let element = FakeElement::new();
        let settings = FeedSettings {
            drop_threshold: 2,
            ..Default::default()
        };
        let mut engine = open_engine(&element, settings);
        for n in 0..3 {
            engine.enqueue(chunk(n, false)).unwrap();
        }
        engine.enqueue(chunk(3, true)).unwrap();
        assert!(!engine.is_drop_mode());
        assert_eq!(engine.queued(), 3);
    }

    #[test]
    fn test_append_failure_propagates() {
        let element = FakeElement::new();
        let mut engine = open_engine(&element, FeedSettings::default());
        element.current().lock().fail_next_append = true;

        let err = engine.enqueue(chunk(0, true)).unwrap_err();
        assert!(matches!(err, PlaybackError::BufferAppend(_)));
        assert!(err.triggers_renegotiation());

        engine.enqueue(chunk(1, true)).unwrap();
        let err = engine.on_update_error("decode error").unwrap_err();
        assert!(matches!(err, PlaybackError::BufferAppend(_)));
    }

    #[test]
    fn test_append_failure_absorbed_in_drop_mode() {
        let element = FakeElement::new();
        let settings = FeedSettings {
            drop_threshold: 1,
            ..Default::default()
        };
        let mut engine = open_engine(&element, settings);
        engine.enqueue(chunk(0, true)).unwrap();
        engine.enqueue(chunk(1, false)).unwrap();
        engine.enqueue(chunk(2, false)).unwrap();
        assert!(engine.is_drop_mode());

        element.finish();
        engine.on_update_error("decode error").unwrap();
        assert_eq!(engine.stats().absorbed_failures, 1);
        // The queued chunk went out next.
        assert_eq!(element.current().lock().appends.len(), 2);
    }

    #[test]
    fn test_feed_events_are_published() {
        let element = FakeElement::new();
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mut engine =
            BufferFeedEngine::new(element.clone(), FeedSettings::default()).with_event_bus(bus);

        engine.open(codecs(&["vp9"])).unwrap();
        engine.on_buffer_open().unwrap();
        let _ = engine.request_switch(vec![], 0.0);

        assert_eq!(
            rx.try_recv().unwrap(),
            CoreEvent::Feed(FeedEvent::BufferCreated {
                codecs: codecs(&["vp9"])
            })
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            CoreEvent::Feed(FeedEvent::CodecSwitchAborted { .. })
        ));
    }
}
