// Delivery queue between the network thread and the consumer
//
// The producer side never blocks: the FIFO is a fixed-capacity lock-free ring
// that evicts the oldest pending sample when full, and the latest-value cell is
// overwritten in place. Consumers poll or drain on their own schedule.

use crate::streaming::record::GazeRecord;
use crate::streaming::sink::SinkDispatcher;
use chrono::{DateTime, Utc};
use crossbeam::queue::ArrayQueue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A delivered record plus where and when it arrived
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GazeSample {
    pub record: GazeRecord,

    /// Connection epoch the frame arrived on (1 for the first connection)
    pub epoch: u64,

    /// Position of the record within its epoch, starting at 0
    pub sequence: u64,

    pub received_at: DateTime<Utc>,
}

impl GazeSample {
    /// Time elapsed since the sample was received
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.received_at
    }
}

/// Metrics for queue monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    pub total_pushed: u64,
    pub total_popped: u64,
    pub total_dropped: u64,
    pub current_size: usize,
    pub peak_size: usize,
    pub capacity: usize,
}

struct Inner {
    fifo: ArrayQueue<GazeSample>,
    latest: RwLock<Option<GazeSample>>,
    sink: RwLock<Option<SinkDispatcher>>,

    total_pushed: AtomicU64,
    total_popped: AtomicU64,
    total_dropped: AtomicU64,
    peak_size: AtomicUsize,
}

/// Bounded hand-off of decoded records to the consumer
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` pending samples
    ///
    /// `capacity` must be non-zero; the config layer validates this.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                fifo: ArrayQueue::new(capacity.max(1)),
                latest: RwLock::new(None),
                sink: RwLock::new(None),
                total_pushed: AtomicU64::new(0),
                total_popped: AtomicU64::new(0),
                total_dropped: AtomicU64::new(0),
                peak_size: AtomicUsize::new(0),
            }),
        }
    }

    /// Forward every subsequently pushed record to a sink dispatcher
    ///
    /// Replaces any previously attached dispatcher, which is returned.
    pub fn attach_sink(&self, dispatcher: SinkDispatcher) -> Option<SinkDispatcher> {
        self.inner.sink.write().replace(dispatcher)
    }

    pub fn detach_sink(&self) -> Option<SinkDispatcher> {
        self.inner.sink.write().take()
    }

    /// Publish a sample. Never blocks on the consumer.
    ///
    /// Returns the evicted sample when the FIFO was full.
    pub fn push(&self, sample: GazeSample) -> Option<GazeSample> {
        *self.inner.latest.write() = Some(sample);

        let evicted = self.inner.fifo.force_push(sample);
        if evicted.is_some() {
            self.inner.total_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.total_pushed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .peak_size
            .fetch_max(self.inner.fifo.len(), Ordering::Relaxed);

        if let Some(sink) = self.inner.sink.read().as_ref() {
            sink.offer(&sample.record);
        }

        evicted
    }

    /// Most recent record, held steady across disconnects and decode failures
    pub fn latest(&self) -> Option<GazeRecord> {
        self.inner.latest.read().map(|s| s.record)
    }

    pub fn latest_sample(&self) -> Option<GazeSample> {
        *self.inner.latest.read()
    }

    /// Oldest pending sample
    pub fn pop(&self) -> Option<GazeSample> {
        self.inner.fifo.pop().inspect(|_| {
            self.inner.total_popped.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Drain up to `max_items` samples, ordered oldest to newest
    pub fn drain(&self, max_items: usize) -> Vec<GazeSample> {
        let mut items = Vec::with_capacity(max_items.min(self.inner.fifo.len()));
        while items.len() < max_items {
            match self.pop() {
                Some(sample) => items.push(sample),
                None => break,
            }
        }
        items
    }

    pub fn len(&self) -> usize {
        self.inner.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fifo.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.fifo.capacity()
    }

    /// Clear pending samples; the latest value is kept
    pub fn clear(&self) {
        while self.inner.fifo.pop().is_some() {}
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            total_pushed: self.inner.total_pushed.load(Ordering::Relaxed),
            total_popped: self.inner.total_popped.load(Ordering::Relaxed),
            total_dropped: self.inner.total_dropped.load(Ordering::Relaxed),
            current_size: self.inner.fifo.len(),
            peak_size: self.inner.peak_size.load(Ordering::Relaxed),
            capacity: self.inner.fifo.capacity(),
        }
    }
}
