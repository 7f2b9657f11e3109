//! Recording fakes for the media bridges, shared by unit tests.
//!
//! The fake buffer rejects any call made while a previous operation is still
//! in flight, so single-flight violations surface as errors and are counted.

use bridge_traits::error::Result;
use bridge_traits::{BridgeError, MediaBuffer, MediaElement, TimeRange};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct BufferLog {
    pub codecs: Vec<String>,
    pub appends: Vec<Bytes>,
    pub removes: Vec<(f64, f64)>,
    pub ranges: Vec<TimeRange>,
    pub busy: bool,
    pub violations: usize,
    pub aborted: bool,
    pub fail_next_append: bool,
}

pub struct FakeBuffer {
    log: Arc<Mutex<BufferLog>>,
}

impl MediaBuffer for FakeBuffer {
    fn append(&mut self, data: Bytes) -> Result<()> {
        let mut log = self.log.lock();
        if log.busy {
            log.violations += 1;
            return Err(BridgeError::InvalidState("append while updating".into()));
        }
        if log.fail_next_append {
            log.fail_next_append = false;
            return Err(BridgeError::QuotaExceeded);
        }
        log.busy = true;
        log.appends.push(data);
        Ok(())
    }

    fn remove(&mut self, start: f64, end: f64) -> Result<()> {
        let mut log = self.log.lock();
        if log.busy {
            log.violations += 1;
            return Err(BridgeError::InvalidState("remove while updating".into()));
        }
        log.busy = true;
        log.removes.push((start, end));
        log.ranges = log
            .ranges
            .iter()
            .filter_map(|range| {
                if range.end <= start || range.start >= end {
                    Some(*range)
                } else if range.end > end {
                    Some(TimeRange::new(end, range.end))
                } else if range.start < start {
                    Some(TimeRange::new(range.start, start))
                } else {
                    None
                }
            })
            .collect();
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        let mut log = self.log.lock();
        log.aborted = true;
        log.busy = false;
        Ok(())
    }

    fn is_updating(&self) -> bool {
        self.log.lock().busy
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.log.lock().ranges.clone()
    }
}

/// Media element with a settable clock and optional position rounding.
#[derive(Default)]
pub struct FakeElement {
    position: Mutex<f64>,
    rate: Mutex<f64>,
    paused: AtomicBool,
    /// Positions are rounded to multiples of this step when non-zero.
    rounding: f64,
    /// Number of leading `set_current_time` calls that are ignored.
    ignore_seeks: AtomicUsize,
    pub buffers: Mutex<Vec<Arc<Mutex<BufferLog>>>>,
    pub released: AtomicUsize,
    pub seeks: Mutex<Vec<f64>>,
    pub fail_create: AtomicBool,
}

impl FakeElement {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rate: Mutex::new(1.0),
            ..Default::default()
        })
    }

    pub fn with_rounding(step: f64) -> Arc<Self> {
        Arc::new(Self {
            rate: Mutex::new(1.0),
            rounding: step,
            ..Default::default()
        })
    }

    pub fn ignore_next_seeks(&self, count: usize) {
        self.ignore_seeks.store(count, Ordering::SeqCst);
    }

    pub fn set_position(&self, seconds: f64) {
        *self.position.lock() = seconds;
    }

    /// Log of the most recently created buffer.
    pub fn current(&self) -> Arc<Mutex<BufferLog>> {
        self.buffers
            .lock()
            .last()
            .cloned()
            .expect("no buffer created")
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Host side of an operation completing: clear the busy flag.
    pub fn finish(&self) {
        for log in self.buffers.lock().iter() {
            log.lock().busy = false;
        }
    }
}

impl MediaElement for FakeElement {
    fn current_time(&self) -> f64 {
        *self.position.lock()
    }

    fn set_current_time(&self, seconds: f64) {
        self.seeks.lock().push(seconds);
        let ignored = self
            .ignore_seeks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if ignored {
            return;
        }

        let position = if self.rounding > 0.0 {
            (seconds / self.rounding).round() * self.rounding
        } else {
            seconds
        };
        *self.position.lock() = position;
    }

    fn playback_rate(&self) -> f64 {
        *self.rate.lock()
    }

    fn set_playback_rate(&self, rate: f64) {
        *self.rate.lock() = rate;
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn create_buffer(&self, codecs: &[String]) -> Result<Box<dyn MediaBuffer>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BridgeError::NotAvailable("media source closed".into()));
        }
        let log = Arc::new(Mutex::new(BufferLog {
            codecs: codecs.to_vec(),
            ..Default::default()
        }));
        self.buffers.lock().push(Arc::clone(&log));
        Ok(Box::new(FakeBuffer { log }))
    }

    fn release_buffer(&self, _buffer: Box<dyn MediaBuffer>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
