// Connection manager - owns the server connection lifecycle
//
// The manager runs a dedicated thread that:
// - Connects to the gaze server, retrying forever at a fixed delay
// - Performs blocking reads and feeds them through the frame assembler
// - Decodes each frame and pushes good records to the delivery queue
// - Reconnects after the server closes the stream or a read fails
//
// State machine:
//
//   Disconnected -> Connecting -> Connected -> Closing -> Disconnected
//        ^                                                    |
//        +-------------------- retry delay -------------------+
//
// Shutdown is cooperative: `stop()` raises a flag checked before every state
// transition and read, wakes any retry sleep, shuts the active socket down to
// unblock a pending read, then waits a bounded time for the thread to exit.

use crate::config::ClientConfig;
use crate::streaming::{
    buffer::{DeliveryQueue, GazeSample},
    frame::FrameAssembler,
    record::decode_frame,
    sink::{GazeSink, SinkDispatcher},
    source::{create_transport, Closer, Connection, Transport},
    types::{
        ClientStats, ConnectionEvent, ConnectionState, DisconnectReason, StreamError, StreamResult,
    },
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type EventCallback = Box<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Manages one long-lived connection to the gaze server
pub struct ConnectionManager {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    queue: DeliveryQueue,
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
    /// A stopped worker that has not exited yet
    lingering: Mutex<Option<WorkerHandle>>,
}

impl ConnectionManager {
    /// Create a manager that connects over TCP as configured
    pub fn new(config: ClientConfig) -> StreamResult<Self> {
        let transport = create_transport(&config);
        Self::with_boxed_transport(config, transport)
    }

    /// Create a manager over a custom transport
    pub fn with_transport<T: Transport>(config: ClientConfig, transport: T) -> StreamResult<Self> {
        Self::with_boxed_transport(config, Box::new(transport))
    }

    fn with_boxed_transport(
        config: ClientConfig,
        transport: Box<dyn Transport>,
    ) -> StreamResult<Self> {
        config
            .validate()
            .map_err(|e| StreamError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            queue: DeliveryQueue::new(config.queue_capacity),
            transport: Arc::from(transport),
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
            lingering: Mutex::new(None),
            config,
        })
    }

    /// Set event callback function
    ///
    /// The callback runs on the connection thread and must not block or call
    /// back into this method.
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        *self.shared.event_callback.write() = Some(Box::new(callback));
    }

    /// Republish every delivered record through `sink` on its own thread
    pub fn attach_sink<S: GazeSink>(&self, sink: S) -> StreamResult<()> {
        let dispatcher = SinkDispatcher::spawn(sink, self.config.sink_capacity)?;
        if let Some(previous) = self.queue.attach_sink(dispatcher) {
            previous.shutdown();
        }
        Ok(())
    }

    /// Launch the management thread. Does nothing if it is already running.
    ///
    /// Fails with [`StreamError::StillStopping`] while the thread of an earlier
    /// `stop()` is still winding down, so two loops never share the queue.
    pub fn start(&self) -> StreamResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            log::debug!("Connection manager already running");
            return Ok(());
        }
        self.reap_lingering()?;

        log::info!(
            "Starting connection manager for {}",
            self.transport.describe()
        );

        let signal = Arc::new(ShutdownSignal::default());
        let (exit_guard, exited) = channel::bounded::<()>(0);

        let runner = ConnectionWorker {
            transport: Arc::clone(&self.transport),
            queue: self.queue.clone(),
            shared: Arc::clone(&self.shared),
            signal: Arc::clone(&signal),
            assembler: FrameAssembler::with_capacity(self.config.read_buffer_size),
            read_buffer_size: self.config.read_buffer_size,
            retry_delay: self.config.retry_delay(),
        };

        let handle = std::thread::Builder::new()
            .name("gaze-connection".to_string())
            .spawn(move || {
                // Dropped when the thread ends, including by panic
                let _exit_guard = exit_guard;
                runner.run();
            })
            .map_err(StreamError::ThreadSpawn)?;

        *worker = Some(WorkerHandle {
            signal,
            handle,
            exited,
        });

        Ok(())
    }

    /// Stop the management thread and close the connection
    ///
    /// Blocks until the thread has exited or the shutdown timeout elapses. A
    /// thread still busy after the timeout is detached, never killed, and
    /// blocks `start()` until it exits.
    pub fn stop(&self) {
        let (thread_id, exited) = {
            let mut worker = self.worker.lock();
            let Some(handle) = worker.take() else {
                return;
            };

            log::info!("Stopping connection manager");
            handle.signal.trigger();

            let waiting = (handle.handle.thread().id(), handle.exited.clone());
            *self.lingering.lock() = Some(handle);
            waiting
        };

        let timeout = self.config.shutdown_timeout();
        if let Err(RecvTimeoutError::Timeout) = exited.recv_timeout(timeout) {
            log::error!(
                "Connection thread did not exit within {:?}, detaching it",
                timeout
            );
            return;
        }

        let handle = {
            let mut lingering = self.lingering.lock();
            let ours = lingering
                .as_ref()
                .is_some_and(|handle| handle.handle.thread().id() == thread_id);
            // Otherwise already joined by a concurrent `start()`
            if ours {
                lingering.take()
            } else {
                None
            }
        };
        if let Some(handle) = handle {
            handle.join(&self.shared);
        }

        log::info!("Connection manager stopped");
    }

    /// Whether a management thread is alive, including one still winding down
    pub fn is_running(&self) -> bool {
        if self.worker.lock().is_some() {
            return true;
        }
        self.lingering
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.has_exited())
    }

    /// Join the thread of an earlier `stop()` if it has exited
    fn reap_lingering(&self) -> StreamResult<()> {
        let mut lingering = self.lingering.lock();
        match lingering.take() {
            Some(handle) if !handle.has_exited() => {
                *lingering = Some(handle);
                Err(StreamError::StillStopping)
            }
            Some(handle) => {
                handle.join(&self.shared);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Current connection state snapshot
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Number of connections established so far; the current epoch while connected
    pub fn epoch(&self) -> u64 {
        self.shared.counters.connections.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.counters.snapshot()
    }

    /// Handle to the queue decoded records are delivered to
    pub fn delivery(&self) -> DeliveryQueue {
        self.queue.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerHandle {
    signal: Arc<ShutdownSignal>,
    handle: JoinHandle<()>,
    /// Disconnects when the worker thread ends
    exited: Receiver<()>,
}

impl WorkerHandle {
    fn has_exited(&self) -> bool {
        matches!(self.exited.try_recv(), Err(TryRecvError::Disconnected))
    }

    fn join(self, shared: &Shared) {
        if self.handle.join().is_err() {
            log::error!("Connection thread panicked");
            shared.set_state(ConnectionState::Disconnected);
        }
    }
}

#[derive(Default)]
struct Counters {
    bytes_received: AtomicU64,
    frames_received: AtomicU64,
    records_delivered: AtomicU64,
    decode_errors: AtomicU64,
    connect_failures: AtomicU64,
    connections: AtomicU64,
    disconnects: AtomicU64,
    dropped_records: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ClientStats {
        ClientStats {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
        }
    }
}

/// State visible to both the manager and its worker thread
#[derive(Default)]
struct Shared {
    state: RwLock<ConnectionState>,
    counters: Counters,
    event_callback: RwLock<Option<EventCallback>>,
}

impl Shared {
    fn emit(&self, event: ConnectionEvent) {
        if let Some(callback) = self.event_callback.read().as_ref() {
            callback(event);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        {
            let mut current = self.state.write();
            if *current == state {
                return;
            }
            *current = state;
        }
        log::debug!("Connection state: {}", state);
        self.emit(ConnectionEvent::StateChanged { state });
    }
}

/// Shutdown flag plus the means to interrupt whatever the worker is blocked on
#[derive(Default)]
struct ShutdownSignal {
    requested: Mutex<bool>,
    wakeup: Condvar,
    active: Mutex<Option<Box<dyn Closer>>>,
}

impl ShutdownSignal {
    fn trigger(&self) {
        {
            let mut requested = self.requested.lock();
            *requested = true;
            self.wakeup.notify_all();
        }
        if let Some(closer) = self.active.lock().as_ref() {
            closer.close();
        }
    }

    fn is_requested(&self) -> bool {
        *self.requested.lock()
    }

    /// Sleep for `duration` unless shutdown is requested first.
    /// Returns `true` if shutdown was requested.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut requested = self.requested.lock();
        while !*requested {
            if self.wakeup.wait_until(&mut requested, deadline).timed_out() {
                break;
            }
        }
        *requested
    }

    /// Make `closer` reachable from `trigger`. Closes it immediately and
    /// returns `false` if shutdown was already requested.
    fn register(&self, closer: Box<dyn Closer>) -> bool {
        let mut active = self.active.lock();
        if self.is_requested() {
            closer.close();
            return false;
        }
        *active = Some(closer);
        true
    }

    fn unregister(&self) -> Option<Box<dyn Closer>> {
        self.active.lock().take()
    }
}

/// Everything the management thread owns
struct ConnectionWorker {
    transport: Arc<dyn Transport>,
    queue: DeliveryQueue,
    shared: Arc<Shared>,
    signal: Arc<ShutdownSignal>,
    assembler: FrameAssembler,
    read_buffer_size: usize,
    retry_delay: Duration,
}

impl ConnectionWorker {
    fn run(mut self) {
        log::debug!("Connection thread started");

        while !self.signal.is_requested() {
            self.shared.set_state(ConnectionState::Connecting);
            self.assembler.reset();

            let mut connection = match self.establish() {
                Ok(connection) => connection,
                Err(_) => break,
            };

            // A connect that was blocked when stop() arrived
            if self.signal.is_requested() {
                log::debug!("Discarding connection opened after shutdown was requested");
                drop(connection);
                break;
            }

            let epoch = self
                .shared
                .counters
                .connections
                .fetch_add(1, Ordering::Relaxed)
                + 1;
            self.assembler.reset();
            self.shared.set_state(ConnectionState::Connected);
            log::info!(
                "Connected to {} (epoch {})",
                self.transport.describe(),
                epoch
            );

            let reason = match self.receive(connection.as_mut(), epoch) {
                Ok(()) => DisconnectReason::PeerClosed,
                Err(StreamError::ShutdownRequested) => DisconnectReason::Shutdown,
                Err(e) => DisconnectReason::IoError(e.to_string()),
            };

            self.close(connection);
            self.shared
                .counters
                .disconnects
                .fetch_add(1, Ordering::Relaxed);

            match &reason {
                DisconnectReason::PeerClosed => log::warn!("Server has disconnected"),
                DisconnectReason::IoError(e) => log::error!("Error receiving data: {}", e),
                DisconnectReason::Shutdown => log::info!("Disconnected for shutdown"),
            }
            self.shared
                .emit(ConnectionEvent::Disconnected { epoch, reason });

            if self.signal.sleep(self.retry_delay) {
                break;
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        log::debug!("Connection thread exiting");
    }

    /// Connect, retrying at the fixed delay until success or shutdown
    fn establish(&mut self) -> StreamResult<Box<dyn Connection>> {
        let mut attempt = 0u64;
        loop {
            if self.signal.is_requested() {
                return Err(StreamError::ShutdownRequested);
            }

            attempt += 1;
            log::info!(
                "Attempting to connect to server at {}...",
                self.transport.describe()
            );

            match self.transport.connect() {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    let err = StreamError::Connect(e);
                    self.shared
                        .counters
                        .connect_failures
                        .fetch_add(1, Ordering::Relaxed);
                    log::warn!("{}. Retrying in {:?}...", err, self.retry_delay);
                    self.shared.emit(ConnectionEvent::ConnectFailed {
                        attempt,
                        error: err.to_string(),
                    });

                    if self.signal.sleep(self.retry_delay) {
                        return Err(StreamError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Read loop for one epoch. `Ok(())` means the server closed the stream.
    fn receive(&mut self, connection: &mut dyn Connection, epoch: u64) -> StreamResult<()> {
        match connection.closer() {
            Ok(closer) => {
                if !self.signal.register(closer) {
                    return Err(StreamError::ShutdownRequested);
                }
            }
            Err(e) => log::warn!("Connection cannot be closed remotely: {}", e),
        }

        let mut buffer = vec![0u8; self.read_buffer_size];
        let mut sequence = 0u64;

        loop {
            if self.signal.is_requested() {
                return Err(StreamError::ShutdownRequested);
            }

            let bytes_read = match connection.read(&mut buffer) {
                Ok(0) if self.signal.is_requested() => return Err(StreamError::ShutdownRequested),
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) if self.signal.is_requested() => {
                    return Err(StreamError::ShutdownRequested)
                }
                Err(e) => return Err(StreamError::Io(e)),
            };

            log::trace!("Read {} bytes", bytes_read);
            self.shared
                .counters
                .bytes_received
                .fetch_add(bytes_read as u64, Ordering::Relaxed);

            for frame in self.assembler.feed(&buffer[..bytes_read]) {
                self.shared
                    .counters
                    .frames_received
                    .fetch_add(1, Ordering::Relaxed);

                match decode_frame(&frame) {
                    Ok(record) => {
                        let sample = GazeSample {
                            record,
                            epoch,
                            sequence,
                            received_at: chrono::Utc::now(),
                        };
                        sequence += 1;

                        if self.queue.push(sample).is_some() {
                            self.shared
                                .counters
                                .dropped_records
                                .fetch_add(1, Ordering::Relaxed);
                        }
                        self.shared
                            .counters
                            .records_delivered
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.shared
                            .counters
                            .decode_errors
                            .fetch_add(1, Ordering::Relaxed);
                        log::warn!("Dropping malformed frame ({} bytes): {}", frame.len(), e);
                        self.shared.emit(ConnectionEvent::FrameRejected {
                            epoch,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Closing: release the socket and discard any partial frame
    fn close(&mut self, connection: Box<dyn Connection>) {
        self.shared.set_state(ConnectionState::Closing);
        if let Some(closer) = self.signal.unregister() {
            closer.close();
        }
        drop(connection);
        self.assembler.reset();
        self.shared.set_state(ConnectionState::Disconnected);
    }
}
