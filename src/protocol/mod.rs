//! Protocol module - wire format, event framing and node info.
//!
//! This module implements the on-the-wire side of the transport:
//! - 128-byte header encoding/decoding and validation
//! - Event struct (header + opaque body)
//! - Bounded streaming buffer for accumulating partial reads
//! - Node info record exchanged during the handshake

mod event;
mod event_buffer;
mod nodeinfo;
mod wire_format;

pub use event::{build_event, Event};
pub use event_buffer::{EventBuffer, Events, DEFAULT_READ_BUFFER_LIMIT};
pub use nodeinfo::{
    native_byte_order, native_word_size, NodeInfo, CONFIG_HASH_SIZE, NODEINFO_SIZE,
    NODEINFO_VERSION, OBJECT_STRUCTURE_VERSION,
};
pub use wire_format::{
    ctrl, dest, packet_size, packet_type, validate_header, Header, Timestamp, AUTHTAG_SIZE,
    HEADER_SIZE, MAX_BODY_SIZE, MAX_PKT_SIZE, NONCE_SIZE, PROTOCOL_VERSION, SIGNATURE,
    UUID_FIELD_SIZE,
};
