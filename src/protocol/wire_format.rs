//! Wire format encoding and decoding.
//!
//! Every event starts with a fixed 128-byte header:
//! ```text
//! offset  size  field
//!      0     8  signature    "MRLNEVT\0"
//!      8     2  protocol     u16 LE
//!     10     2  type         u16 LE
//!     12     2  code         u16 LE
//!     14     2  selection    u16 LE
//!     16     4  len          u32 LE (body length)
//!     20    12  sent         i64 LE seconds + u32 LE microseconds
//!     32    16  authtag
//!     48    24  nonce
//!     72    37  from_uuid    NUL padded
//!    109    19  reserved     zero
//! ```
//!
//! The body follows immediately and is at most [`MAX_BODY_SIZE`] bytes.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ProtocolError;

/// Header size in bytes (fixed, exactly 128).
pub const HEADER_SIZE: usize = 128;

/// Maximum body size (128 KiB).
pub const MAX_BODY_SIZE: usize = 128 << 10;

/// Largest packet that may ever be sent or queued.
pub const MAX_PKT_SIZE: usize = HEADER_SIZE + MAX_BODY_SIZE;

/// Magic signature every header starts with.
pub const SIGNATURE: [u8; 8] = *b"MRLNEVT\0";

/// Wire protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 3;

pub const AUTHTAG_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 24;
pub const UUID_FIELD_SIZE: usize = 37;

const OFF_PROTOCOL: usize = 8;
const OFF_TYPE: usize = 10;
const OFF_CODE: usize = 12;
const OFF_SELECTION: usize = 14;
const OFF_LEN: usize = 16;
const OFF_SENT: usize = 20;
const OFF_AUTHTAG: usize = 32;
const OFF_NONCE: usize = OFF_AUTHTAG + AUTHTAG_SIZE;
const OFF_UUID: usize = OFF_NONCE + NONCE_SIZE;
const OFF_RESERVED: usize = OFF_UUID + UUID_FIELD_SIZE;

/// Packet type values at the top of the `u16` range. Anything below
/// [`packet_type::RUNCMD`] is an opaque data event type.
pub mod packet_type {
    pub const CTRL: u16 = 0xffff;
    pub const ACK: u16 = 0xfffe;
    pub const NAK: u16 = 0xfffd;
    pub const RUNCMD: u16 = 0xfffc;
}

/// Control sub-types carried in the `code` field of a `CTRL` packet.
pub mod ctrl {
    pub const GENERIC: u16 = 0;
    pub const PULSE: u16 = 1;
    pub const INACTIVE: u16 = 2;
    pub const ACTIVE: u16 = 3;
    pub const PATHS: u16 = 4;
    pub const STALL: u16 = 5;
    pub const RESUME: u16 = 6;
    pub const STOP: u16 = 7;
    pub const RUNCMD_CMD: u16 = 8;
    pub const RUNCMD_RESP: u16 = 9;

    const NAMES: [&str; 10] = [
        "CTRL_GENERIC",
        "CTRL_PULSE",
        "CTRL_INACTIVE",
        "CTRL_ACTIVE",
        "CTRL_PATHS",
        "CTRL_STALL",
        "CTRL_RESUME",
        "CTRL_STOP",
        "RUNCMD_CMD",
        "RUNCMD_RESP",
    ];

    /// Human-readable name of a control code.
    pub fn name(code: u16) -> &'static str {
        NAMES
            .get(code as usize)
            .copied()
            .unwrap_or("(invalid/unknown)")
    }
}

/// Routing destinations understood without consulting a router.
pub mod dest {
    pub const BROADCAST: u16 = 0xffff;
    pub const MAGIC: u16 = 0xfff0;
    pub const POLLERS: u16 = MAGIC | (1 << 1);
    pub const PEERS: u16 = MAGIC | (1 << 2);
    pub const MASTERS: u16 = MAGIC | (1 << 3);

    /// Whether the selection names a role set rather than a routing key.
    #[inline]
    pub fn is_magic(selection: u16) -> bool {
        selection & MAGIC == MAGIC
    }
}

/// Send timestamp, a `timeval` with explicit widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: d.as_secs() as i64,
            usec: d.subsec_micros(),
        }
    }

    pub(crate) fn encode_into(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.sec.to_le_bytes());
        buf[8..12].copy_from_slice(&self.usec.to_le_bytes());
    }

    pub(crate) fn decode(buf: &[u8]) -> Self {
        Self {
            sec: i64::from_le_bytes(le_array(&buf[0..8])),
            usec: u32::from_le_bytes(le_array(&buf[8..12])),
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub signature: [u8; 8],
    pub protocol: u16,
    pub kind: u16,
    pub code: u16,
    pub selection: u16,
    /// Body length in bytes.
    pub len: u32,
    pub sent: Timestamp,
    pub authtag: [u8; AUTHTAG_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub from_uuid: [u8; UUID_FIELD_SIZE],
}

impl Default for Header {
    fn default() -> Self {
        Self {
            signature: SIGNATURE,
            protocol: PROTOCOL_VERSION,
            kind: 0,
            code: 0,
            selection: 0,
            len: 0,
            sent: Timestamp::default(),
            authtag: [0; AUTHTAG_SIZE],
            nonce: [0; NONCE_SIZE],
            from_uuid: [0; UUID_FIELD_SIZE],
        }
    }
}

impl Header {
    /// Create a header for a data event of the given type.
    pub fn new(kind: u16, code: u16, selection: u16, len: u32) -> Self {
        Self {
            kind,
            code,
            selection,
            len,
            ..Self::default()
        }
    }

    /// Create a header for a control event.
    pub fn ctrl(code: u16, selection: u16) -> Self {
        Self::new(packet_type::CTRL, code, selection, 0)
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use nodelink::protocol::{Header, HEADER_SIZE};
    ///
    /// let header = Header::new(7, 0, 3, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(&bytes[..8], b"MRLNEVT\0");
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (128 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..OFF_PROTOCOL].copy_from_slice(&self.signature);
        buf[OFF_PROTOCOL..OFF_TYPE].copy_from_slice(&self.protocol.to_le_bytes());
        buf[OFF_TYPE..OFF_CODE].copy_from_slice(&self.kind.to_le_bytes());
        buf[OFF_CODE..OFF_SELECTION].copy_from_slice(&self.code.to_le_bytes());
        buf[OFF_SELECTION..OFF_LEN].copy_from_slice(&self.selection.to_le_bytes());
        buf[OFF_LEN..OFF_SENT].copy_from_slice(&self.len.to_le_bytes());
        self.sent.encode_into(&mut buf[OFF_SENT..OFF_AUTHTAG]);
        buf[OFF_AUTHTAG..OFF_NONCE].copy_from_slice(&self.authtag);
        buf[OFF_NONCE..OFF_UUID].copy_from_slice(&self.nonce);
        buf[OFF_UUID..OFF_RESERVED].copy_from_slice(&self.from_uuid);
        buf[OFF_RESERVED..HEADER_SIZE].fill(0);
    }

    /// Decode header from bytes without validating it.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            signature: le_array(&buf[0..OFF_PROTOCOL]),
            protocol: u16::from_le_bytes(le_array(&buf[OFF_PROTOCOL..OFF_TYPE])),
            kind: u16::from_le_bytes(le_array(&buf[OFF_TYPE..OFF_CODE])),
            code: u16::from_le_bytes(le_array(&buf[OFF_CODE..OFF_SELECTION])),
            selection: u16::from_le_bytes(le_array(&buf[OFF_SELECTION..OFF_LEN])),
            len: u32::from_le_bytes(le_array(&buf[OFF_LEN..OFF_SENT])),
            sent: Timestamp::decode(&buf[OFF_SENT..OFF_AUTHTAG]),
            authtag: le_array(&buf[OFF_AUTHTAG..OFF_NONCE]),
            nonce: le_array(&buf[OFF_NONCE..OFF_UUID]),
            from_uuid: le_array(&buf[OFF_UUID..OFF_RESERVED]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// The signature is checked before anything else is looked at.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.signature != SIGNATURE {
            return Err(ProtocolError::BadSignature);
        }
        if self.len as usize > MAX_BODY_SIZE {
            return Err(ProtocolError::Oversize {
                len: self.len as usize,
                max: MAX_BODY_SIZE,
            });
        }
        Ok(())
    }

    /// Header plus body length.
    #[inline]
    pub fn packet_size(&self) -> usize {
        HEADER_SIZE + self.len as usize
    }

    #[inline]
    pub fn is_ctrl(&self) -> bool {
        self.kind == packet_type::CTRL
    }

    /// Check if this is a control packet with the given code.
    #[inline]
    pub fn is_ctrl_code(&self, code: u16) -> bool {
        self.is_ctrl() && self.code == code
    }

    /// Sender UUID as text, without NUL padding.
    pub fn sender(&self) -> &str {
        let end = self
            .from_uuid
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(UUID_FIELD_SIZE);
        std::str::from_utf8(&self.from_uuid[..end]).unwrap_or("")
    }

    /// Stamp the sender UUID. Longer values are truncated to 36 bytes so
    /// the field stays NUL terminated.
    pub fn set_sender(&mut self, uuid: &str) {
        self.from_uuid = [0; UUID_FIELD_SIZE];
        let n = uuid.len().min(UUID_FIELD_SIZE - 1);
        self.from_uuid[..n].copy_from_slice(&uuid.as_bytes()[..n]);
    }
}

/// Total packet size of a header, as used for queueing and sending.
#[inline]
pub fn packet_size(header: &Header) -> usize {
    header.packet_size()
}

/// Decode and validate a header (standalone function).
///
/// # Errors
///
/// Returns `Truncated` for short input, `BadSignature` on a signature
/// mismatch and `Oversize` when the declared body exceeds [`MAX_BODY_SIZE`].
pub fn validate_header(buf: &[u8]) -> Result<Header, ProtocolError> {
    let header = Header::decode(buf).ok_or(ProtocolError::Truncated { have: buf.len() })?;
    header.validate()?;
    Ok(header)
}

fn le_array<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(src);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let mut original = Header::new(42, 1, 0x0102, 100);
        original.sent = Timestamp {
            sec: 1_700_000_000,
            usec: 123_456,
        };
        original.authtag = [7; AUTHTAG_SIZE];
        original.nonce = [9; NONCE_SIZE];
        original.set_sender("8c2b5a4e-0000-4000-8000-000000000001");

        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
        assert_eq!(decoded.sender(), "8c2b5a4e-0000-4000-8000-000000000001");
    }

    #[test]
    fn test_header_little_endian_layout() {
        let header = Header::new(0x0a0b, 0x0c0d, 0x0e0f, 0x01020304);
        let bytes = header.encode();

        assert_eq!(&bytes[0..8], b"MRLNEVT\0");
        assert_eq!(&bytes[8..10], &[3, 0]);
        assert_eq!(&bytes[10..12], &[0x0b, 0x0a]);
        assert_eq!(&bytes[12..14], &[0x0d, 0x0c]);
        assert_eq!(&bytes[14..16], &[0x0f, 0x0e]);
        assert_eq!(&bytes[16..20], &[0x04, 0x03, 0x02, 0x01]);
        assert!(bytes[OFF_RESERVED..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_header_size_is_exactly_128() {
        assert_eq!(HEADER_SIZE, 128);
        assert_eq!(OFF_RESERVED, 109);
        assert_eq!(Header::default().encode().len(), 128);
    }

    #[test]
    fn test_validate_header_too_short() {
        let err = validate_header(&[0u8; 127]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { have: 127 }));
    }

    #[test]
    fn test_validate_bad_signature_rejected() {
        let mut bytes = Header::new(1, 0, 0, 10).encode();
        bytes[0] = b'X';
        assert!(matches!(
            validate_header(&bytes),
            Err(ProtocolError::BadSignature)
        ));
    }

    #[test]
    fn test_validate_signature_checked_before_length() {
        let mut header = Header::new(1, 0, 0, u32::MAX);
        header.signature = *b"garbage!";
        assert!(matches!(
            header.validate(),
            Err(ProtocolError::BadSignature)
        ));
    }

    #[test]
    fn test_validate_oversize_body() {
        let header = Header::new(1, 0, 0, MAX_BODY_SIZE as u32 + 1);
        assert!(matches!(
            header.validate(),
            Err(ProtocolError::Oversize { .. })
        ));

        let header = Header::new(1, 0, 0, MAX_BODY_SIZE as u32);
        assert!(header.validate().is_ok());
        assert_eq!(packet_size(&header), MAX_PKT_SIZE);
    }

    #[test]
    fn test_ctrl_header() {
        let header = Header::ctrl(ctrl::ACTIVE, dest::BROADCAST);
        assert!(header.is_ctrl());
        assert!(header.is_ctrl_code(ctrl::ACTIVE));
        assert!(!header.is_ctrl_code(ctrl::INACTIVE));
        assert_eq!(header.packet_size(), HEADER_SIZE);
    }

    #[test]
    fn test_ctrl_names() {
        assert_eq!(ctrl::name(ctrl::ACTIVE), "CTRL_ACTIVE");
        assert_eq!(ctrl::name(ctrl::GENERIC), "CTRL_GENERIC");
        assert_eq!(ctrl::name(200), "(invalid/unknown)");
    }

    #[test]
    fn test_magic_destinations() {
        assert!(dest::is_magic(dest::BROADCAST));
        assert!(dest::is_magic(dest::PEERS));
        assert!(dest::is_magic(dest::POLLERS));
        assert!(dest::is_magic(dest::MASTERS));
        assert!(!dest::is_magic(0));
        assert!(!dest::is_magic(0x7ff0));
    }

    #[test]
    fn test_sender_is_truncated_and_terminated() {
        let mut header = Header::default();
        header.set_sender(&"x".repeat(64));
        assert_eq!(header.sender().len(), UUID_FIELD_SIZE - 1);
        assert_eq!(header.from_uuid[UUID_FIELD_SIZE - 1], 0);
    }
}
