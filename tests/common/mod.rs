// Shared fixtures for integration tests
//
// `ScriptedTransport` replays a fixed sequence of connection attempts. Each
// accepted connection is fed by a channel the test holds; dropping the sender
// ends the stream with a zero-length read.

#![allow(dead_code)]

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use gaze_stream::streaming::{Closer, Connection};
use gaze_stream::{ClientConfig, ConnectionEvent, ConnectionManager, EyeData, GazeRecord, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fast_config() -> ClientConfig {
    ClientConfig {
        retry_delay_ms: 10,
        shutdown_timeout_ms: 2000,
        queue_capacity: 128,
        ..Default::default()
    }
}

/// A complete gaze record whose fields are derived from `x`
pub fn record(x: f32) -> GazeRecord {
    GazeRecord {
        gaze2d: [x, 1.0 - x],
        gaze_pixel_coords: [x * 1920.0, (1.0 - x) * 1080.0],
        gaze3d: [x * 10.0, 0.0, 600.0],
        left_eye: EyeData {
            origin: [-30.0, 0.0, 0.0],
            direction: [x, 0.0, 1.0],
            pupil_diameter: 3.0 + x,
        },
        right_eye: EyeData {
            origin: [30.0, 0.0, 0.0],
            direction: [-x, 0.0, 1.0],
            pupil_diameter: 3.5 + x,
        },
    }
}

/// Wire encoding of `record(x)`, newline terminated
pub fn frame(x: f32) -> String {
    let mut line = serde_json::to_string(&record(x)).expect("record serializes");
    line.push('\n');
    line
}

/// Poll `condition` until it holds or five seconds pass
pub fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Collect every event the manager emits
pub fn record_events(manager: &ConnectionManager) -> Arc<Mutex<Vec<ConnectionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    manager.set_event_callback(move |event| sink.lock().push(event));
    events
}

type Chunk = io::Result<Vec<u8>>;

enum Attempt {
    Refuse,
    Accept(Receiver<Chunk>),
}

/// Counters shared by the transport and all its connections
#[derive(Default)]
pub struct TransportLog {
    pub connect_calls: AtomicUsize,
    pub reads: AtomicUsize,
    pub reads_after_close: AtomicUsize,
    pub closes: AtomicUsize,
}

pub struct ScriptedTransport {
    script: Mutex<VecDeque<Attempt>>,
    log: Arc<TransportLog>,
    closed_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            log: Arc::new(TransportLog::default()),
            closed_flags: Mutex::new(Vec::new()),
        })
    }

    /// Queue `count` refused connection attempts
    pub fn refuse(&self, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(Attempt::Refuse);
        }
    }

    /// Queue an accepted connection and return its feed
    pub fn accept(&self) -> Feed {
        let (tx, rx) = channel::unbounded();
        self.script.lock().push_back(Attempt::Accept(rx));
        Feed { tx }
    }

    pub fn log(&self) -> &TransportLog {
        &self.log
    }

    /// Whether the `index`-th accepted connection has been closed
    pub fn connection_closed(&self, index: usize) -> bool {
        self.closed_flags
            .lock()
            .get(index)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Lets a test share one scripted transport with the manager
pub struct SharedTransport(pub Arc<ScriptedTransport>);

impl Transport for SharedTransport {
    fn connect(&self) -> io::Result<Box<dyn Connection>> {
        let transport = &self.0;
        transport.log.connect_calls.fetch_add(1, Ordering::SeqCst);

        match transport.script.lock().pop_front() {
            Some(Attempt::Accept(chunks)) => {
                let closed = Arc::new(AtomicBool::new(false));
                transport.closed_flags.lock().push(Arc::clone(&closed));
                Ok(Box::new(ScriptedConnection {
                    chunks,
                    pending: Vec::new(),
                    closed,
                    log: Arc::clone(&transport.log),
                }))
            }
            Some(Attempt::Refuse) | None => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

pub struct Feed {
    tx: Sender<Chunk>,
}

impl Feed {
    pub fn send(&self, bytes: impl AsRef<[u8]>) {
        self.tx.send(Ok(bytes.as_ref().to_vec())).expect("connection alive");
    }

    pub fn fail(&self, kind: io::ErrorKind) {
        self.tx
            .send(Err(io::Error::new(kind, "scripted failure")))
            .expect("connection alive");
    }

    /// End the stream with a zero-length read
    pub fn close(self) {}
}

struct ScriptedConnection {
    chunks: Receiver<Chunk>,
    pending: Vec<u8>,
    closed: Arc<AtomicBool>,
    log: Arc<TransportLog>,
}

impl Read for ScriptedConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.log.reads.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.log.reads_after_close.fetch_add(1, Ordering::SeqCst);
            return Ok(0);
        }

        while self.pending.is_empty() {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(0);
            }
            match self.chunks.recv_timeout(Duration::from_millis(2)) {
                Ok(Ok(bytes)) => self.pending = bytes,
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl Connection for ScriptedConnection {
    fn closer(&self) -> io::Result<Box<dyn Closer>> {
        Ok(Box::new(ScriptedCloser {
            closed: Arc::clone(&self.closed),
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedCloser {
    closed: Arc<AtomicBool>,
    log: Arc<TransportLog>,
}

impl Closer for ScriptedCloser {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connect-call accounting for `GatedTransport`
#[derive(Default)]
pub struct ConnectGate {
    pub entered: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

/// Holds every `connect()` until the gate sender is dropped, then defers to
/// the scripted transport
pub struct GatedTransport {
    inner: SharedTransport,
    gate: Receiver<()>,
    stats: Arc<ConnectGate>,
}

impl GatedTransport {
    pub fn new(inner: &Arc<ScriptedTransport>) -> (Self, Sender<()>, Arc<ConnectGate>) {
        let (release, gate) = channel::bounded(0);
        let stats = Arc::new(ConnectGate::default());
        let transport = Self {
            inner: SharedTransport(Arc::clone(inner)),
            gate,
            stats: Arc::clone(&stats),
        };
        (transport, release, stats)
    }
}

impl Transport for GatedTransport {
    fn connect(&self) -> io::Result<Box<dyn Connection>> {
        self.stats.entered.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        // Returns once the sender is gone
        let _ = self.gate.recv();
        let result = self.inner.connect();

        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn describe(&self) -> String {
        "gated".to_string()
    }
}
