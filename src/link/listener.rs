//! Listening sockets for inbound node connections.
//!
//! - TCP: any address, peers are matched to nodes by IP
//! - Unix: a socket path, removed again when the listener is dropped
//!
//! # Example
//!
//! ```ignore
//! use nodelink::link::{Listener, NodeAddress};
//!
//! let listener = Listener::bind(&NodeAddress::Tcp("0.0.0.0:15551".parse()?)).await?;
//! let accepted = listener.accept().await?;
//! transport.accept(node, accepted.link).await;
//! ```

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;

use super::{Link, NodeAddress};

/// A freshly accepted inbound link.
#[derive(Debug)]
pub struct Accepted {
    pub link: Box<dyn Link>,
    /// Remote address for TCP links.
    pub peer: Option<SocketAddr>,
}

/// TCP or Unix socket listener.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: std::path::PathBuf,
    },
}

impl Listener {
    /// Bind to an address.
    ///
    /// For Unix sockets any existing socket file at the path is removed
    /// before binding.
    pub async fn bind(addr: &NodeAddress) -> io::Result<Self> {
        match addr {
            NodeAddress::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr).await?)),
            #[cfg(unix)]
            NodeAddress::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = tokio::net::UnixListener::bind(path)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> io::Result<Accepted> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                tracing::debug!("Accepted inbound connection from {}", peer);
                Ok(Accepted {
                    link: Box::new(stream),
                    peer: Some(peer),
                })
            }
            #[cfg(unix)]
            Listener::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Accepted {
                    link: Box::new(stream),
                    peer: None,
                })
            }
        }
    }

    /// Bound address, e.g. to learn the port after binding port 0.
    pub fn local_addr(&self) -> io::Result<NodeAddress> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().map(NodeAddress::Tcp),
            #[cfg(unix)]
            Listener::Unix { path, .. } => Ok(NodeAddress::Unix(path.clone())),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Listener::Unix { path, .. } = self {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unix_listener_cleans_up_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = Listener::bind(&NodeAddress::Unix(path.clone())).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(addr.connect(), listener.accept());
        assert!(client.is_ok());
        assert!(accepted.unwrap().peer.is_none());

        drop(listener);
        assert!(!path.exists());
    }
}
