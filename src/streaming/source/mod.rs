// Pluggable transport for the connection manager
//
// The manager only needs three things from the network: open a connection,
// read bytes from it, and close it from another thread to unblock a pending
// read. `Transport`, `Connection` and `Closer` capture exactly that, so tests
// can drive the manager with a scripted double instead of a socket.

mod tcp;

use crate::config::ClientConfig;
use std::io::{self, Read};

pub use tcp::TcpTransport;

/// Closes a connection from outside the thread reading it
pub trait Closer: Send + Sync {
    /// Best-effort; errors are swallowed by the implementation
    fn close(&self);
}

/// An established byte stream
pub trait Connection: Read + Send {
    /// A handle that can close this connection while a read is blocked on it
    fn closer(&self) -> io::Result<Box<dyn Closer>>;
}

/// Factory for new connections to the data server
pub trait Transport: Send + Sync + 'static {
    fn connect(&self) -> io::Result<Box<dyn Connection>>;

    /// Human-readable peer description for logs
    fn describe(&self) -> String;
}

/// Build the default TCP transport from configuration
pub fn create_transport(config: &ClientConfig) -> Box<dyn Transport> {
    Box::new(TcpTransport::new(config.address(), config.connect_timeout()))
}
