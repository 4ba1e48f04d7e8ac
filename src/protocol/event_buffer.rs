//! Bounded streaming buffer for accumulating partial reads.
//!
//! Bytes arrive from the socket in arbitrary chunks. [`EventBuffer::get_event`]
//! hands out one complete event at a time and leaves an incomplete packet
//! (header included) in place until the rest of it has arrived.
//!
//! # Example
//!
//! ```
//! use nodelink::protocol::{Event, EventBuffer};
//!
//! let packet = Event::new(1, 0, &b"payload"[..]).encode();
//! let mut buffer = EventBuffer::default();
//!
//! buffer.extend(&packet[..100]);
//! assert!(buffer.get_event().unwrap().is_none());
//!
//! buffer.extend(&packet[100..]);
//! let event = buffer.get_event().unwrap().unwrap();
//! assert_eq!(event.body(), b"payload");
//! ```

use bytes::BytesMut;

use super::event::Event;
use super::wire_format::{Header, HEADER_SIZE, MAX_PKT_SIZE};
use crate::error::ProtocolError;

/// Default buffer limit (1 MiB).
pub const DEFAULT_READ_BUFFER_LIMIT: usize = 1 << 20;

/// Buffer for incoming bytes of one connection.
#[derive(Debug)]
pub struct EventBuffer {
    buffer: BytesMut,
    limit: usize,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_READ_BUFFER_LIMIT)
    }
}

impl EventBuffer {
    /// Create a buffer holding at most `limit` bytes. The limit never drops
    /// below one maximum-sized packet, or a large event could never complete.
    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.max(MAX_PKT_SIZE);
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            limit,
        }
    }

    /// Number of bytes that can still be appended.
    #[inline]
    pub fn spare(&self) -> usize {
        self.limit.saturating_sub(self.buffer.len())
    }

    /// Append newly received bytes. Callers size their reads by
    /// [`spare`](Self::spare); anything beyond the limit is not accepted.
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.spare());
        self.buffer.extend_from_slice(&data[..n]);
        n
    }

    /// Extract the next complete event.
    ///
    /// Returns:
    /// - `Ok(Some(event))` when a whole packet was buffered
    /// - `Ok(None)` when more data is needed; nothing is consumed
    /// - `Err(...)` on a bad signature or oversize length
    pub fn get_event(&mut self) -> Result<Option<Event>, ProtocolError> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = match Header::decode(&self.buffer[..HEADER_SIZE]) {
            Some(header) => header,
            None => return Ok(None),
        };
        header.validate()?;

        let size = header.packet_size();
        if self.buffer.len() < size {
            return Ok(None);
        }

        let mut packet = self.buffer.split_to(size).freeze();
        let body = packet.split_off(HEADER_SIZE);
        Ok(Some(Event::from_parts(header, body)))
    }

    /// Iterate over every complete event currently buffered.
    pub fn events(&mut self) -> Events<'_> {
        Events { buffer: self }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Lazy iterator over buffered events. Stops at the first incomplete
/// packet; after more bytes arrive a fresh iterator picks up there.
pub struct Events<'a> {
    buffer: &'a mut EventBuffer,
}

impl Iterator for Events<'_> {
    type Item = Result<Event, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.get_event().transpose()
    }
}
