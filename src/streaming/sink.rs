// Per-field fan-out to downstream topics
//
// A sink republishes each field of a record under its own topic name. Sinks may
// be slow, so they run on a dedicated thread behind a bounded channel; the
// network thread only ever attempts a non-blocking send.

use crate::streaming::record::{GazeRecord, TopicValue};
use crate::streaming::types::{StreamError, StreamResult};
use crossbeam::channel::{self, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Destination for per-field gaze values
pub trait GazeSink: Send + 'static {
    fn publish(&mut self, topic: &'static str, value: TopicValue);

    /// Called once per record after all its topics are published
    fn flush(&mut self) {}
}

/// Sink that writes every topic value to the `log` facade
pub struct LogSink {
    level: log::Level,
}

impl LogSink {
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(log::Level::Debug)
    }
}

impl GazeSink for LogSink {
    fn publish(&mut self, topic: &'static str, value: TopicValue) {
        log::log!(self.level, "{}: {:?}", topic, value);
    }
}

#[derive(Default)]
struct DispatchCounters {
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Runs a [`GazeSink`] on its own thread
pub struct SinkDispatcher {
    sender: Option<Sender<GazeRecord>>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<DispatchCounters>,
}

impl SinkDispatcher {
    /// Spawn the sink thread with room for `capacity` pending records
    pub fn spawn<S: GazeSink>(mut sink: S, capacity: usize) -> StreamResult<Self> {
        let (sender, receiver) = channel::bounded::<GazeRecord>(capacity.max(1));
        let counters = Arc::new(DispatchCounters::default());

        let thread_counters = Arc::clone(&counters);
        let handle = std::thread::Builder::new()
            .name("gaze-sink".to_string())
            .spawn(move || {
                for record in receiver {
                    for (topic, value) in record.topics() {
                        sink.publish(topic, value);
                    }
                    sink.flush();
                    thread_counters.published.fetch_add(1, Ordering::Relaxed);
                }
                log::debug!("Sink dispatcher channel closed");
            })
            .map_err(StreamError::ThreadSpawn)?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            counters,
        })
    }

    /// Queue a record for publishing without blocking
    ///
    /// Returns `false` if the record was dropped because the sink is behind.
    pub fn offer(&self, record: &GazeRecord) -> bool {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };

        match sender.try_send(*record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    log::warn!("Sink is falling behind, {} records dropped so far", dropped);
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Records fully handed to the sink
    pub fn published(&self) -> u64 {
        self.counters.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Publish everything already queued, then stop the sink thread
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Sink thread panicked");
            }
        }
    }
}

impl Drop for SinkDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::record::{topics, EyeData};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    fn record(x: f32) -> GazeRecord {
        let eye = EyeData {
            origin: [1.0, 2.0, 3.0],
            direction: [0.0, 0.0, 1.0],
            pupil_diameter: 4.0,
        };
        GazeRecord {
            gaze2d: [x, 0.5],
            gaze_pixel_coords: [x * 100.0, 50.0],
            gaze3d: [0.0; 3],
            left_eye: eye,
            right_eye: eye,
        }
    }

    struct CollectingSink(Arc<Mutex<Vec<(&'static str, TopicValue)>>>);

    impl GazeSink for CollectingSink {
        fn publish(&mut self, topic: &'static str, value: TopicValue) {
            self.0.lock().push((topic, value));
        }
    }

    struct GatedSink {
        gate: mpsc::Receiver<()>,
    }

    impl GazeSink for GatedSink {
        fn publish(&mut self, _topic: &'static str, _value: TopicValue) {}

        fn flush(&mut self) {
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
        }
    }

    #[test]
    fn test_publishes_every_topic_in_order() {
        let published = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = SinkDispatcher::spawn(CollectingSink(Arc::clone(&published)), 8).unwrap();

        assert!(dispatcher.offer(&record(0.25)));
        assert!(dispatcher.offer(&record(0.75)));
        dispatcher.shutdown();

        let published = published.lock();
        assert_eq!(published.len(), 18);
        assert_eq!(published[0], (topics::GAZE_2D, TopicValue::Vec2([0.25, 0.5])));
        assert_eq!(
            published[10],
            (topics::PIXEL_COORDINATES, TopicValue::Vec2([75.0, 50.0]))
        );
        assert_eq!(
            published[17],
            (topics::RIGHT_PUPIL_DIAMETER, TopicValue::Scalar(4.0))
        );
    }

    #[test]
    fn test_slow_sink_drops_instead_of_blocking() {
        let (gate_tx, gate_rx) = mpsc::channel();
        let dispatcher = SinkDispatcher::spawn(GatedSink { gate: gate_rx }, 1).unwrap();

        let accepted = (0..10).filter(|i| dispatcher.offer(&record(*i as f32))).count();
        // One record may be held by the sink thread and one in the channel
        assert!(accepted <= 2, "accepted {accepted}");
        assert_eq!(dispatcher.dropped(), 10 - accepted as u64);

        for _ in 0..accepted {
            gate_tx.send(()).unwrap();
        }
        dispatcher.shutdown();
    }

    #[test]
    fn test_log_sink_accepts_values() {
        let dispatcher = SinkDispatcher::spawn(LogSink::default(), 4).unwrap();
        dispatcher.offer(&record(1.0));
        dispatcher.shutdown();
    }
}
