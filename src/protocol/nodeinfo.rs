//! Node capability descriptor exchanged in `CTRL_ACTIVE`.
//!
//! Encoded as a fixed 96-byte little-endian record so that the byte order
//! and word size reported inside it are values, not properties of the
//! encoding.

use super::wire_format::Timestamp;

/// Current node info format version.
pub const NODEINFO_VERSION: u32 = 1;

/// Structure version of the monitored objects this build exchanges.
pub const OBJECT_STRUCTURE_VERSION: u32 = 1;

pub const CONFIG_HASH_SIZE: usize = 20;

/// Size of an encoded [`NodeInfo`]. Shorter `CTRL_ACTIVE` bodies are rejected.
pub const NODEINFO_SIZE: usize = 96;

/// Byte order marker of the running build (1234 little, 4321 big).
pub const fn native_byte_order() -> u32 {
    if cfg!(target_endian = "little") {
        1234
    } else {
        4321
    }
}

/// Word size of the running build, in bits.
pub const fn native_word_size() -> u32 {
    usize::BITS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub version: u32,
    pub word_size: u32,
    pub byte_order: u32,
    pub object_structure_version: u32,
    pub start: Timestamp,
    pub last_cfg_change: i64,
    pub config_hash: [u8; CONFIG_HASH_SIZE],
    pub peer_id: u32,
    pub active_peers: u32,
    pub configured_peers: u32,
    pub active_pollers: u32,
    pub configured_pollers: u32,
    pub active_masters: u32,
    pub configured_masters: u32,
    pub host_checks_handled: u32,
    pub service_checks_handled: u32,
    pub monitored_object_state_size: u32,
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            version: 0,
            word_size: 0,
            byte_order: 0,
            object_structure_version: 0,
            start: Timestamp::default(),
            last_cfg_change: 0,
            config_hash: [0; CONFIG_HASH_SIZE],
            peer_id: 0,
            active_peers: 0,
            configured_peers: 0,
            active_pollers: 0,
            configured_pollers: 0,
            active_masters: 0,
            configured_masters: 0,
            host_checks_handled: 0,
            service_checks_handled: 0,
            monitored_object_state_size: 0,
        }
    }
}

impl NodeInfo {
    /// Info describing this process, with version, word size and byte order
    /// filled in from the running build.
    pub fn local(start: Timestamp) -> Self {
        Self {
            version: NODEINFO_VERSION,
            word_size: native_word_size(),
            byte_order: native_byte_order(),
            object_structure_version: OBJECT_STRUCTURE_VERSION,
            start,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> [u8; NODEINFO_SIZE] {
        let mut out = [0u8; NODEINFO_SIZE];
        let mut w = Writer { buf: &mut out, pos: 0 };
        w.u32(self.version);
        w.u32(self.word_size);
        w.u32(self.byte_order);
        w.u32(self.object_structure_version);
        w.bytes(&self.start.sec.to_le_bytes());
        w.u32(self.start.usec);
        w.bytes(&self.last_cfg_change.to_le_bytes());
        w.bytes(&self.config_hash);
        for v in [
            self.peer_id,
            self.active_peers,
            self.configured_peers,
            self.active_pollers,
            self.configured_pollers,
            self.active_masters,
            self.configured_masters,
            self.host_checks_handled,
            self.service_checks_handled,
            self.monitored_object_state_size,
        ] {
            w.u32(v);
        }
        debug_assert_eq!(w.pos, NODEINFO_SIZE);
        out
    }

    /// Decode from a `CTRL_ACTIVE` body. Trailing bytes from newer
    /// versions are ignored. Returns `None` if the body is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < NODEINFO_SIZE {
            return None;
        }
        let mut r = Reader { buf, pos: 0 };
        let version = r.u32();
        let word_size = r.u32();
        let byte_order = r.u32();
        let object_structure_version = r.u32();
        let start = Timestamp {
            sec: r.i64(),
            usec: r.u32(),
        };
        let last_cfg_change = r.i64();
        let mut config_hash = [0u8; CONFIG_HASH_SIZE];
        config_hash.copy_from_slice(r.take(CONFIG_HASH_SIZE));
        Some(Self {
            version,
            word_size,
            byte_order,
            object_structure_version,
            start,
            last_cfg_change,
            config_hash,
            peer_id: r.u32(),
            active_peers: r.u32(),
            configured_peers: r.u32(),
            active_pollers: r.u32(),
            configured_pollers: r.u32(),
            active_masters: r.u32(),
            configured_masters: r.u32(),
            host_checks_handled: r.u32(),
            service_checks_handled: r.u32(),
            monitored_object_state_size: r.u32(),
        })
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn bytes(&mut self, src: &[u8]) {
        self.buf[self.pos..self.pos + src.len()].copy_from_slice(src);
        self.pos += src.len();
    }

    fn u32(&mut self, v: u32) {
        self.bytes(&v.to_le_bytes());
    }
}

// Only constructed after the length check in `decode`.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> &'a [u8] {
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        out
    }

    fn u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4));
        u32::from_le_bytes(b)
    }

    fn i64(&mut self) -> i64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8));
        i64::from_le_bytes(b)
    }
}
