//! Byte links between nodes.
//!
//! A [`Link`] is a connected, non-blocking byte stream. Reads and writes
//! never wait; `writable` is the only readiness primitive the transport
//! needs, and it is always awaited with a bound.
//!
//! - TCP: `tokio::net::TcpStream`
//! - Unix: `tokio::net::UnixStream`
//! - In-process: [`MemoryLink`], for the local loopback node and tests

mod listener;
mod memory;

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

pub use listener::{Accepted, Listener};
pub use memory::MemoryLink;

/// Boxed future for link readiness.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A connected, non-blocking byte stream.
pub trait Link: Send + Sync + fmt::Debug {
    /// Read whatever is available. `Ok(0)` means the peer hung up;
    /// `WouldBlock` means nothing is available yet.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as much as fits without blocking.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Resolves once the link can accept more bytes.
    fn writable(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Human-readable peer description for logs.
    fn peer(&self) -> String;
}

/// Wait at most `wait` for the link to become writable.
pub async fn write_ready(link: &dyn Link, wait: Duration) -> bool {
    matches!(tokio::time::timeout(wait, link.writable()).await, Ok(Ok(())))
}

impl Link for TcpStream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(TcpStream::writable(self))
    }

    fn peer(&self) -> String {
        self.peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "(disconnected)".to_string())
    }
}

#[cfg(unix)]
impl Link for tokio::net::UnixStream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::net::UnixStream::try_read(self, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::UnixStream::try_write(self, buf)
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(tokio::net::UnixStream::writable(self))
    }

    fn peer(&self) -> String {
        self.peer_addr()
            .ok()
            .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "(unix socket)".to_string())
    }
}

/// Where a node can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAddress {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl NodeAddress {
    /// Open an outbound link.
    pub async fn connect(&self) -> io::Result<Box<dyn Link>> {
        match self {
            NodeAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            NodeAddress::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
        }
    }

    /// TCP socket address, if this is a TCP node.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            NodeAddress::Tcp(addr) => Some(*addr),
            #[cfg(unix)]
            NodeAddress::Unix(_) => None,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddress::Tcp(addr) => write!(f, "{}", addr),
            #[cfg(unix)]
            NodeAddress::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}
