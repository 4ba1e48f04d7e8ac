//! Encryption boundary.
//!
//! The transport never looks inside an event body. When a node has a
//! cipher, every packet is sealed right before it is written and opened
//! right after it is framed; the backlog always holds plaintext packets.

use std::fmt;

use crate::error::CipherError;
use crate::protocol::Header;

/// Seals and opens event bodies for one node.
///
/// Implementations may rewrite the body (and its length) and use the
/// header's `authtag` and `nonce` fields. The transport fixes up
/// `header.len` from the body afterwards.
pub trait PacketCipher: Send + Sync + fmt::Debug {
    fn seal(&self, header: &mut Header, body: &mut Vec<u8>) -> Result<(), CipherError>;

    fn open(&self, header: &mut Header, body: &mut Vec<u8>) -> Result<(), CipherError>;
}
