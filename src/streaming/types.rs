// Common types for the streaming module

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur during streaming operations
#[derive(Debug, Error)]
pub enum StreamError {
    /// Opening the socket failed. Retried by the connection manager, never fatal.
    #[error("Connection error: {0}")]
    Connect(#[source] std::io::Error),

    /// Read failure on an established connection. Treated as a disconnect.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A single frame could not be decoded into a gaze record.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Clean termination path, not a failure.
    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// A detached connection thread from an earlier `stop()` is still running.
    #[error("Previous connection thread has not exited yet")]
    StillStopping,
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Lifecycle state of the server connection
///
/// Owned by the connection manager; consumers only ever see snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Why a connection epoch ended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum DisconnectReason {
    /// Zero-length read: the server closed the stream
    PeerClosed,
    /// Read failed on the established connection
    IoError(String),
    /// `stop()` was called
    Shutdown,
}

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        state: ConnectionState,
    },
    ConnectFailed {
        attempt: u64,
        error: String,
    },
    FrameRejected {
        epoch: u64,
        error: String,
    },
    Disconnected {
        epoch: u64,
        reason: DisconnectReason,
    },
}

/// Counters describing client activity since construction
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub bytes_received: u64,
    pub frames_received: u64,
    pub records_delivered: u64,
    pub decode_errors: u64,
    pub connect_failures: u64,
    pub connections: u64,
    pub disconnects: u64,
    pub dropped_records: u64,
}
