// TCP socket transport
//
// Connects to the gaze server with an optional timeout shared by all resolved
// addresses. Reads are blocking with no timeout: silence on an open socket is
// normal. Closing shuts down both directions on a cloned handle, which makes a
// read blocked on the other handle return.

use super::{Closer, Connection, Transport};
use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

pub struct TcpTransport {
    address: String,
    connect_timeout: Option<Duration>,
}

impl TcpTransport {
    /// `address` is `host:port`, with IPv6 hosts in brackets
    pub fn new(address: String, connect_timeout: Option<Duration>) -> Self {
        Self {
            address,
            connect_timeout,
        }
    }

    fn connect_stream(&self) -> io::Result<TcpStream> {
        let Some(timeout) = self.connect_timeout else {
            return TcpStream::connect(self.address.as_str());
        };

        // One budget shared by every resolved address
        let deadline = Instant::now() + timeout;
        let mut last_err = None;
        for addr in self.address.as_str().to_socket_addrs()? {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    log::trace!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} did not resolve to any address", self.address),
            )
        }))
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> io::Result<Box<dyn Connection>> {
        let stream = self.connect_stream()?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY: {}", e);
        }
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}

impl Connection for TcpStream {
    fn closer(&self) -> io::Result<Box<dyn Closer>> {
        Ok(Box::new(TcpCloser(self.try_clone()?)))
    }
}

struct TcpCloser(TcpStream);

impl Closer for TcpCloser {
    fn close(&self) {
        if let Err(e) = self.0.shutdown(Shutdown::Both) {
            log::trace!("Socket shutdown: {}", e);
        }
    }
}
