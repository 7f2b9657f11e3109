//! Host fakes for session integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{BridgeError, MediaBuffer, MediaElement, TimeRange, TransportConnection};
use bytes::{BufMut, Bytes, BytesMut};
use core_playback::error::{PlaybackError, Result};
use core_playback::{
    Combo, Source, SourceCatalog, StaticTransport, StreamKind, TransportConnector,
    TransportEvent, TransportEventSender, TransportRegistry,
};
use core_runtime::events::CoreEvent;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Host calls in the order they happened, shared between the element, its
/// buffers and the connections.
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

// ============================================================================
// Media element
// ============================================================================

#[derive(Debug, Default)]
pub struct BufferRecord {
    pub codecs: Vec<String>,
    pub appends: Vec<Bytes>,
    pub busy: bool,
}

struct TestBuffer {
    record: Arc<Mutex<BufferRecord>>,
    log: CallLog,
}

impl MediaBuffer for TestBuffer {
    fn append(&mut self, data: Bytes) -> BridgeResult<()> {
        let mut record = self.record.lock();
        if record.busy {
            return Err(BridgeError::InvalidState("append while updating".into()));
        }
        record.busy = true;
        record.appends.push(data);
        Ok(())
    }

    fn remove(&mut self, _start: f64, _end: f64) -> BridgeResult<()> {
        let mut record = self.record.lock();
        if record.busy {
            return Err(BridgeError::InvalidState("remove while updating".into()));
        }
        record.busy = true;
        Ok(())
    }

    fn abort(&mut self) -> BridgeResult<()> {
        self.log.lock().push("abort");
        self.record.lock().busy = false;
        Ok(())
    }

    fn is_updating(&self) -> bool {
        self.record.lock().busy
    }

    fn buffered(&self) -> Vec<TimeRange> {
        Vec::new()
    }
}

struct Clock {
    base: f64,
    running_since: Option<Instant>,
    rate: f64,
}

/// Element whose clock either follows tokio time or stays frozen.
pub struct TestElement {
    clock: Mutex<Clock>,
    pub buffers: Mutex<Vec<Arc<Mutex<BufferRecord>>>>,
    pub log: CallLog,
}

impl TestElement {
    /// A stalled element: media time does not advance.
    pub fn stalled() -> Arc<Self> {
        Arc::new(Self {
            clock: Mutex::new(Clock {
                base: 0.0,
                running_since: None,
                rate: 1.0,
            }),
            buffers: Mutex::new(Vec::new()),
            log: CallLog::default(),
        })
    }

    pub fn playing() -> Arc<Self> {
        let element = Self::stalled();
        element.resume();
        element
    }

    pub fn resume(&self) {
        let mut clock = self.clock.lock();
        if clock.running_since.is_none() {
            clock.running_since = Some(Instant::now());
        }
    }

    pub fn stall(&self) {
        let mut clock = self.clock.lock();
        clock.base = position(&clock);
        clock.running_since = None;
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn append_count(&self) -> usize {
        self.buffers.lock().iter().map(|b| b.lock().appends.len()).sum()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }

    /// Host side of an operation completing.
    pub fn finish(&self) {
        for buffer in self.buffers.lock().iter() {
            buffer.lock().busy = false;
        }
    }
}

fn position(clock: &Clock) -> f64 {
    clock.base
        + clock
            .running_since
            .map_or(0.0, |since| since.elapsed().as_secs_f64() * clock.rate)
}

impl MediaElement for TestElement {
    fn current_time(&self) -> f64 {
        position(&self.clock.lock())
    }

    fn set_current_time(&self, seconds: f64) {
        let mut clock = self.clock.lock();
        clock.base = seconds;
        if clock.running_since.is_some() {
            clock.running_since = Some(Instant::now());
        }
    }

    fn playback_rate(&self) -> f64 {
        self.clock.lock().rate
    }

    fn set_playback_rate(&self, rate: f64) {
        let mut clock = self.clock.lock();
        clock.base = position(&clock);
        if clock.running_since.is_some() {
            clock.running_since = Some(Instant::now());
        }
        clock.rate = rate;
    }

    /// Only the health sampler asks.
    fn is_paused(&self) -> bool {
        self.log.lock().push("sample");
        false
    }

    fn create_buffer(&self, codecs: &[String]) -> BridgeResult<Box<dyn MediaBuffer>> {
        let record = Arc::new(Mutex::new(BufferRecord {
            codecs: codecs.to_vec(),
            ..Default::default()
        }));
        self.buffers.lock().push(Arc::clone(&record));
        Ok(Box::new(TestBuffer {
            record,
            log: Arc::clone(&self.log),
        }))
    }

    fn release_buffer(&self, _buffer: Box<dyn MediaBuffer>) {
        self.log.lock().push("release_buffer");
    }
}

// ============================================================================
// Transport
// ============================================================================

/// One connection the session opened.
#[derive(Clone)]
pub struct ConnectionRecord {
    pub transport: String,
    pub url: String,
    pub events: TransportEventSender,
    pub sent: Arc<Mutex<Vec<Value>>>,
    pub closed: Arc<AtomicBool>,
}

impl ConnectionRecord {
    pub fn sent_types(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|msg| msg["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn control(&self, message: Value) {
        let _ = self.events.send(TransportEvent::Control(message));
    }

    pub fn frame(&self, is_keyframe: bool, timestamp_ms: u64) {
        let _ = self.events.send(TransportEvent::Frame(frame(is_keyframe, timestamp_ms)));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::Failed(reason.to_string()));
    }

    pub fn codec_data(&self, codecs: &[&str]) {
        self.control(json!({ "type": "codec_data", "data": { "codecs": codecs } }));
    }
}

struct TestConnection {
    sent: Arc<Mutex<Vec<Value>>>,
    closed: Arc<AtomicBool>,
    log: CallLog,
}

#[async_trait]
impl TransportConnection for TestConnection {
    fn send_control(&self, message: Value) -> BridgeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Connection("closed".into()));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn close(&self) -> BridgeResult<()> {
        self.log.lock().push("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct TestConnector {
    pub connections: Mutex<Vec<ConnectionRecord>>,
    refuse: Mutex<HashSet<String>>,
    log: CallLog,
}

impl TestConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record connection closes in `log`.
    pub fn with_log(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            ..Self::default()
        })
    }

    /// Fail every connect attempt through `transport`.
    pub fn refuse(&self, transport: &str) {
        self.refuse.lock().insert(transport.to_string());
    }

    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> ConnectionRecord {
        self.connections.lock()[index].clone()
    }
}

#[async_trait]
impl TransportConnector for TestConnector {
    async fn connect(
        &self,
        combo: &Combo,
        events: TransportEventSender,
    ) -> Result<Box<dyn TransportConnection>> {
        let transport = combo.transport.short_name().to_string();
        if self.refuse.lock().contains(&transport) {
            return Err(PlaybackError::Transport(format!("{} refused", transport)));
        }

        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.connections.lock().push(ConnectionRecord {
            transport,
            url: combo.source.url.clone(),
            events,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(TestConnection {
            sent,
            closed,
            log: Arc::clone(&self.log),
        }))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn frame(is_keyframe: bool, timestamp_ms: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u8(0);
    buf.put_u8(is_keyframe as u8);
    buf.put_u64(timestamp_ms);
    buf.put_u16(0);
    buf.put_slice(b"data");
    buf.freeze()
}

/// One source playable by each of the named transports, in registration
/// order.
pub fn setup(transports: &[&str]) -> (Arc<SourceCatalog>, Arc<TransportRegistry>) {
    let catalog = SourceCatalog::new(
        vec![Source::new("ws://media.example/live.mp4?token=abc", "ws/video/mp4")],
        StreamKind::Live,
    );

    let mut registry = TransportRegistry::new();
    for name in transports {
        registry
            .register(Arc::new(StaticTransport::new(*name, ["ws/video/mp4"])))
            .unwrap();
    }
    (Arc::new(catalog), Arc::new(registry))
}

/// Poll `condition` until it holds, yielding to the session in between.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Wait for the first event matching `predicate`.
pub async fn next_matching<F>(events: &mut broadcast::Receiver<CoreEvent>, mut predicate: F) -> CoreEvent
where
    F: FnMut(&CoreEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event not published")
}
