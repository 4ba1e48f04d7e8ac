//! Compatibility checks on a received `CTRL_ACTIVE`.
//!
//! Hard checks decide whether the two processes can talk at all. Soft
//! checks compare topology and configuration; a mismatch there is worth a
//! log line but the connection goes ahead.

use std::fmt;

use super::NodeRole;
use crate::error::Incompatibility;
use crate::protocol::{Event, NodeInfo, NODEINFO_SIZE, PROTOCOL_VERSION};

/// Hard checks, in order: body size, node info version, word size, byte
/// order, object structure version, protocol version.
///
/// Returns the peer's decoded node info.
pub fn check_compat(event: &Event, ours: &NodeInfo) -> Result<NodeInfo, Incompatibility> {
    let theirs = NodeInfo::decode(event.body()).ok_or(Incompatibility::BodyTooShort {
        len: event.body().len(),
        min: NODEINFO_SIZE,
    })?;

    if theirs.version < ours.version {
        return Err(Incompatibility::InfoVersion {
            theirs: theirs.version,
            ours: ours.version,
        });
    }
    if theirs.word_size != ours.word_size {
        return Err(Incompatibility::WordSize {
            theirs: theirs.word_size,
            ours: ours.word_size,
        });
    }
    if theirs.byte_order != ours.byte_order {
        return Err(Incompatibility::ByteOrder {
            theirs: theirs.byte_order,
            ours: ours.byte_order,
        });
    }
    if theirs.object_structure_version != ours.object_structure_version {
        return Err(Incompatibility::ObjectStructure {
            theirs: theirs.object_structure_version,
            ours: ours.object_structure_version,
        });
    }
    if event.header.protocol != PROTOCOL_VERSION {
        return Err(Incompatibility::Protocol {
            theirs: event.header.protocol,
            ours: PROTOCOL_VERSION,
        });
    }

    Ok(theirs)
}

/// Topology disagreement between what a node reports and what we expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyMismatch {
    pub what: &'static str,
    pub theirs: u32,
    pub expected: u32,
}

impl fmt::Display for TopologyMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: theirs {}, expected {}",
            self.what, self.theirs, self.expected
        )
    }
}

/// Soft check of configured node counts.
///
/// A peer must see the same set of peers, pollers and masters as we do.
/// A poller must have our whole peer group (us included) as its masters.
/// Masters are not checked; their view depends on poller group layout.
pub fn check_topology(
    role: NodeRole,
    theirs: &NodeInfo,
    ours: &NodeInfo,
) -> Result<(), TopologyMismatch> {
    let checks: Vec<(&'static str, u32, u32)> = match role {
        NodeRole::Peer => vec![
            ("configured peers", theirs.configured_peers, ours.configured_peers),
            ("configured pollers", theirs.configured_pollers, ours.configured_pollers),
            ("configured masters", theirs.configured_masters, ours.configured_masters),
        ],
        NodeRole::Poller => vec![(
            "configured masters",
            theirs.configured_masters,
            ours.configured_peers + 1,
        )],
        NodeRole::Master | NodeRole::Local => Vec::new(),
    };

    for (what, theirs, expected) in checks {
        if theirs != expected {
            return Err(TopologyMismatch {
                what,
                theirs,
                expected,
            });
        }
    }
    Ok(())
}

/// Result of the configuration soft check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDrift {
    Same,
    /// Their configuration changed more recently than ours.
    TheirsNewer,
    OursNewer,
}

/// Soft check of configuration hash and change time. Masters own the
/// configuration of their pollers, so they are never compared.
pub fn check_config(role: NodeRole, theirs: &NodeInfo, ours: &NodeInfo) -> ConfigDrift {
    if role == NodeRole::Master || theirs.config_hash == ours.config_hash {
        return ConfigDrift::Same;
    }
    if theirs.last_cfg_change > ours.last_cfg_change {
        ConfigDrift::TheirsNewer
    } else {
        ConfigDrift::OursNewer
    }
}
