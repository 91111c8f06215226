//! # gaze-stream
//!
//! Long-lived client for an eye-tracking data server. It keeps a TCP
//! connection open (reconnecting forever at a fixed delay), splits the stream
//! into newline-delimited JSON frames, decodes each into a [`GazeRecord`] and
//! hands records to the consumer through a non-blocking [`DeliveryQueue`].
//!
//! ## Example
//!
//! ```no_run
//! use gaze_stream::{ClientConfig, ConnectionManager};
//!
//! let manager = ConnectionManager::new(ClientConfig::default()).unwrap();
//! let delivery = manager.delivery();
//! manager.start().unwrap();
//!
//! // Once per frame of the consumer's own loop
//! if let Some(gaze) = delivery.latest() {
//!     println!("looking at {:?}", gaze.gaze_pixel_coords);
//! }
//!
//! manager.stop();
//! ```

pub mod config;
pub mod streaming;

pub use config::{ClientConfig, ConfigError};
pub use streaming::{
    ClientStats, ConnectionEvent, ConnectionManager, ConnectionState, DeliveryQueue,
    DisconnectReason, EyeData, FrameAssembler, GazeRecord, GazeSample, GazeSink, LogSink,
    StreamError, StreamResult, TopicValue, Transport,
};
