//! Bounded batch buffer between the sampler and the delivery engine.
//!
//! All mutations go through a single mutex so `push` and `drain` never
//! interleave partially. When a push brings the buffer to capacity, a flush
//! signal is posted on a capacity-one tokio mpsc channel with `try_send`;
//! a signal that is already pending absorbs the new one, so the producer
//! never blocks and repeated threshold crossings coalesce.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::sample::Sample;

/// Default number of samples that trigger a flush.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// Upper bound on the up-front queue allocation.
const PREALLOCATE_LIMIT: usize = 1_024;

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferStats {
    /// Total number of samples pushed
    pub samples_received: u64,

    /// Samples refused because they failed the validity check
    pub samples_rejected: u64,

    /// Total number of samples removed by drains
    pub samples_drained: u64,

    /// Number of flush signals actually posted to the engine
    pub flush_signals: u64,

    /// Number of threshold crossings absorbed by an already pending signal
    pub coalesced_signals: u64,

    /// Samples handed back by an interrupted delivery
    pub samples_restored: u64,
}

/// Errors that can occur during buffer operations.
#[derive(Debug, PartialEq)]
pub enum BufferError {
    /// The delivery engine has stopped listening for flush signals
    Closed,

    /// The sample carries the sentinel cell id or an unknown operator
    Rejected,
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Closed => write!(f, "Delivery engine is no longer accepting flush signals"),
            BufferError::Rejected => write!(f, "Sample failed the validity check"),
        }
    }
}

impl std::error::Error for BufferError {}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<Sample>,
    stats: BufferStats,
}

/// Capacity-limited FIFO of unsent samples.
///
/// Cheap to clone; all clones share the same queue and signal channel.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    flush_tx: mpsc::Sender<()>,
}

/// Receiving side of the flush signal, owned by the delivery engine.
#[derive(Debug)]
pub struct FlushSignal {
    rx: mpsc::Receiver<()>,
}

impl FlushSignal {
    /// Wait for the next flush signal. Returns `None` once every buffer
    /// handle has been dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

impl SampleBuffer {
    /// Create a buffer that signals a flush at `capacity` samples.
    ///
    /// Returns the buffer handle and the signal receiver for the engine.
    pub fn new(capacity: usize) -> (Self, FlushSignal) {
        let (flush_tx, rx) = mpsc::channel(1);
        let capacity = capacity.max(1);

        let buffer = Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
                stats: BufferStats::default(),
            })),
            capacity,
            flush_tx,
        };

        (buffer, FlushSignal { rx })
    }

    /// Create a buffer with the default capacity.
    pub fn with_defaults() -> (Self, FlushSignal) {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking producer must not wedge delivery; the queue is still
        // structurally sound after a poisoned lock.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a sample to the tail. Never blocks.
    ///
    /// If the buffer has reached capacity, a flush signal is posted. The
    /// buffer keeps growing past capacity while a drain is in flight.
    /// Returns `Err(BufferError::Rejected)` for an invalid sample, which is
    /// dropped, and `Err(BufferError::Closed)` if the engine has gone away;
    /// in that case the sample is still retained.
    pub fn push(&self, sample: Sample) -> Result<(), BufferError> {
        if !sample.is_valid() {
            self.lock().stats.samples_rejected += 1;
            debug!(cell_id = sample.cell_id(), operator = %sample.operator(), "Rejected invalid sample");
            return Err(BufferError::Rejected);
        }

        let len = {
            let mut inner = self.lock();
            inner.queue.push_back(sample);
            inner.stats.samples_received += 1;
            inner.queue.len()
        };

        trace!(buffered = len, capacity = self.capacity, "Sample buffered");

        if len >= self.capacity {
            return self.signal_flush(len);
        }
        Ok(())
    }

    fn signal_flush(&self, len: usize) -> Result<(), BufferError> {
        match self.flush_tx.try_send(()) {
            Ok(()) => {
                self.lock().stats.flush_signals += 1;
                debug!(buffered = len, "Flush threshold reached");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(())) => {
                self.lock().stats.coalesced_signals += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(())) => Err(BufferError::Closed),
        }
    }

    /// Atomically remove up to `max_items` samples from the head, in FIFO
    /// order.
    pub fn drain(&self, max_items: usize) -> Vec<Sample> {
        let mut inner = self.lock();
        let take = max_items.min(inner.queue.len());
        let drained: Vec<Sample> = inner.queue.drain(..take).collect();
        inner.stats.samples_drained += drained.len() as u64;
        drained
    }

    /// Put an undelivered batch back at the head, ahead of anything pushed
    /// since it was drained. Used when a delivery is cancelled.
    pub fn restore(&self, samples: Vec<Sample>) {
        let mut inner = self.lock();
        inner.stats.samples_restored += samples.len() as u64;
        for sample in samples.into_iter().rev() {
            inner.queue.push_front(sample);
        }
    }

    /// Remove everything currently buffered.
    pub fn drain_all(&self) -> Vec<Sample> {
        self.drain(usize::MAX)
    }

    /// Whether the backlog has reached the flush threshold.
    pub fn at_threshold(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Get the current number of buffered samples.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Get the flush threshold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get current buffer statistics.
    pub fn stats(&self) -> BufferStats {
        self.lock().stats.clone()
    }
}
