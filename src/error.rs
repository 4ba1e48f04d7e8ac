//! Error types for nodelink.

use thiserror::Error;

use crate::registry::NodeId;

/// Framing violations. Always fatal for the connection that produced them.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The packet did not start with the event signature.
    #[error("bad packet signature")]
    BadSignature,

    /// Fewer bytes than a full header.
    #[error("truncated header: have {have} bytes")]
    Truncated { have: usize },

    /// Declared body length is larger than the protocol allows.
    #[error("packet body of {len} bytes exceeds maximum {max}")]
    Oversize { len: usize, max: usize },

    /// Structurally valid header describing an unusable packet.
    #[error("malformed packet: {0}")]
    Malformed(String),
}

/// Errors raised by the two-tier backlog.
#[derive(Debug, Error)]
pub enum BacklogError {
    /// The backlog was invalidated after an incomplete write and refuses new data.
    #[error("backlog is invalidated")]
    Invalidated,

    /// A disk record could not be written in one piece.
    #[error("incomplete backlog write")]
    Incomplete,

    /// Neither tier has room for the entry.
    #[error("backlog full: {needed} bytes needed, limit {limit}")]
    NoSpace { needed: u64, limit: u64 },

    /// An unread entry could not be put back without breaking ordering.
    #[error("entry dropped")]
    Dropped,

    /// Spilling to disk was requested but the backlog has no file path.
    #[error("backlog has no file path")]
    NoPath,

    /// The on-disk record stream is misaligned or truncated.
    #[error("corrupt backlog: {0}")]
    Corrupt(String),

    /// The snapshot metadata could not be (de)serialized.
    #[error("snapshot metadata error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// I/O error on the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hard handshake failures. A node reporting any of these never reaches
/// the connected state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Incompatibility {
    #[error("CTRL_ACTIVE body too short: {len} bytes, need at least {min}")]
    BodyTooShort { len: usize, min: usize },

    #[error("node info version {theirs} is older than ours ({ours})")]
    InfoVersion { theirs: u32, ours: u32 },

    #[error("word size mismatch: theirs {theirs}, ours {ours}")]
    WordSize { theirs: u32, ours: u32 },

    #[error("byte order mismatch: theirs {theirs}, ours {ours}")]
    ByteOrder { theirs: u32, ours: u32 },

    #[error("object structure version mismatch: theirs {theirs}, ours {ours}")]
    ObjectStructure { theirs: u32, ours: u32 },

    #[error("protocol version mismatch: theirs {theirs}, ours {ours}")]
    Protocol { theirs: u16, ours: u16 },
}

/// Failure reported by a [`PacketCipher`](crate::node::PacketCipher).
#[derive(Debug, Error)]
#[error("cipher failure: {0}")]
pub struct CipherError(pub String);

/// Main error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("backlog error: {0}")]
    Backlog(#[from] BacklogError),

    #[error("incompatible node: {0}")]
    Incompatible(#[from] Incompatibility),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node is not connected")]
    NotConnected,

    /// The peer closed the link.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Config(err.to_string())
    }
}

/// Result type alias using TransportError.
pub type Result<T> = std::result::Result<T, TransportError>;
