// Resilient gaze data ingestion
//
// Architecture:
// - `frame`: Splits the raw byte stream into newline-delimited frames
// - `record`: Gaze record schema, frame decoding and per-field topics
// - `buffer`: Non-blocking hand-off of decoded records to the consumer
// - `sink`: Optional per-field republishing on its own thread
// - `source`: Transport seam and the TCP implementation
// - `controller`: Connection lifecycle, retry and cooperative shutdown
// - `types`: Errors, connection state, events and statistics

pub mod buffer;
pub mod controller;
pub mod frame;
pub mod record;
pub mod sink;
pub mod source;
pub mod types;

pub use buffer::{DeliveryQueue, GazeSample, QueueMetrics};
pub use controller::ConnectionManager;
pub use frame::{FrameAssembler, Frames};
pub use record::{decode_frame, topics, EyeData, GazeRecord, TopicValue};
pub use sink::{GazeSink, LogSink, SinkDispatcher};
pub use source::{Closer, Connection, TcpTransport, Transport};
pub use types::{
    ClientStats, ConnectionEvent, ConnectionState, DisconnectReason, StreamError, StreamResult,
};
