//! Socket liveness probing.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// How long a single connection attempt may take.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Answers "is something listening at host:port?".
pub trait SocketProbe: Send + Sync {
    /// True when a TCP connection to `host:port` succeeds.
    fn can_connect(&self, host: &str, port: u16) -> bool;
}

/// [`SocketProbe`] that opens real TCP connections.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    timeout: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            timeout: CONNECT_TIMEOUT,
        }
    }
}

impl TcpProbe {
    /// Create a probe with a custom per-address timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl SocketProbe for TcpProbe {
    fn can_connect(&self, host: &str, port: u16) -> bool {
        let Ok(addrs) = (host, port).to_socket_addrs() else {
            tracing::debug!("could not resolve {}:{}", host, port);
            return false;
        };

        for addr in addrs {
            if TcpStream::connect_timeout(&addr, self.timeout).is_ok() {
                tracing::debug!("{} is accepting connections", addr);
                return true;
            }
        }
        false
    }
}
