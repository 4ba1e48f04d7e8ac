//! Event struct: one header plus its body.
//!
//! The body is opaque to the transport. Higher layers encode check results
//! and other payloads into it; the transport only frames, queues and ships it.
//!
//! # Example
//!
//! ```
//! use nodelink::protocol::{Event, HEADER_SIZE};
//!
//! let event = Event::new(12, 0, &b"hello"[..]);
//! assert_eq!(event.body(), b"hello");
//! assert_eq!(event.packet_size(), HEADER_SIZE + 5);
//!
//! let packet = event.encode();
//! let back = Event::from_packet(packet.into()).unwrap();
//! assert_eq!(back.body(), b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{ctrl, Header, Timestamp, HEADER_SIZE, PROTOCOL_VERSION, SIGNATURE};
use crate::error::ProtocolError;

/// A complete event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Decoded header. `header.len` always matches `body.len()`.
    pub header: Header,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Event {
    /// Create a data event of the given type.
    pub fn new(kind: u16, selection: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            header: Header::new(kind, 0, selection, body.len() as u32),
            body,
        }
    }

    /// Create a control event. Most control codes carry no body;
    /// `CTRL_ACTIVE` carries the sender's node info.
    pub fn ctrl(code: u16, selection: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let mut header = Header::ctrl(code, selection);
        header.len = body.len() as u32;
        Self { header, body }
    }

    /// Create an event from an already decoded header and its body.
    pub fn from_parts(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Parse a contiguous packet, as produced by [`Event::encode`].
    ///
    /// # Errors
    ///
    /// Fails if the header is invalid or the declared length does not
    /// match the packet length exactly.
    pub fn from_packet(mut packet: Bytes) -> Result<Self, ProtocolError> {
        let header = super::validate_header(&packet)?;
        if packet.len() != header.packet_size() {
            return Err(ProtocolError::Malformed(format!(
                "packet is {} bytes, header declares {}",
                packet.len(),
                header.packet_size()
            )));
        }
        let body = packet.split_off(HEADER_SIZE);
        Ok(Self { header, body })
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub fn packet_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    #[inline]
    pub fn is_ctrl(&self) -> bool {
        self.header.is_ctrl()
    }

    #[inline]
    pub fn is_ctrl_code(&self, code: u16) -> bool {
        self.header.is_ctrl_code(code)
    }

    /// Handshake control events are regenerated on every connect and are
    /// never worth queueing.
    pub fn is_handshake(&self) -> bool {
        self.is_ctrl_code(ctrl::ACTIVE) || self.is_ctrl_code(ctrl::INACTIVE)
    }

    /// Prepare the header for transmission: signature, protocol version,
    /// body length, sender and send time.
    pub fn stamp(&mut self, sender: &str) {
        self.header.signature = SIGNATURE;
        self.header.protocol = PROTOCOL_VERSION;
        self.header.len = self.body.len() as u32;
        self.header.set_sender(sender);
        self.header.sent = Timestamp::now();
    }

    /// Encode into a single contiguous packet.
    pub fn encode(&self) -> Vec<u8> {
        build_event(&self.header, &self.body)
    }
}

/// Build a complete packet as a single byte vector. The header's `len`
/// is taken from the body.
pub fn build_event(header: &Header, body: &[u8]) -> Vec<u8> {
    let mut header = *header;
    header.len = body.len() as u32;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf.to_vec()
}
