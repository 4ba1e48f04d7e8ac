//! Node table and destination routing.
//!
//! The registry owns every [`Node`] and hands out stable [`NodeId`]s.
//! Destinations with the magic prefix select nodes by role; everything
//! else is looked up through a [`Router`].

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use crate::node::{Node, NodeRole, NodeState};
use crate::protocol::dest;

/// Index of a node in its [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Id of a node that has not been added to a registry yet.
    pub(crate) const UNASSIGNED: NodeId = NodeId(usize::MAX);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Maps a non-magic destination to the nodes that should receive it.
pub trait Router: Send + Sync {
    fn route(&self, selection: u16, registry: &Registry) -> Vec<NodeId>;
}

/// Router for setups that only use magic destinations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRoutes;

impl Router for NoRoutes {
    fn route(&self, _selection: u16, _registry: &Registry) -> Vec<NodeId> {
        Vec::new()
    }
}

/// Fixed selection table.
#[derive(Debug, Default, Clone)]
pub struct StaticRouter {
    routes: HashMap<u16, Vec<NodeId>>,
}

impl StaticRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `selection` to `nodes` in addition to any existing targets.
    pub fn add(mut self, selection: u16, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let targets = self.routes.entry(selection).or_default();
        for id in nodes {
            if !targets.contains(&id) {
                targets.push(id);
            }
        }
        self
    }
}

impl Router for StaticRouter {
    fn route(&self, selection: u16, _registry: &Registry) -> Vec<NodeId> {
        self.routes.get(&selection).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    nodes: Vec<Node>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(Node::id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    pub fn by_role(&self, role: NodeRole) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.role() == role)
    }

    pub fn masters(&self) -> impl Iterator<Item = &Node> {
        self.by_role(NodeRole::Master)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Node> {
        self.by_role(NodeRole::Peer)
    }

    pub fn pollers(&self) -> impl Iterator<Item = &Node> {
        self.by_role(NodeRole::Poller)
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name() == name).map(Node::id)
    }

    /// Match an inbound TCP connection to a configured node.
    pub fn find_by_ip(&self, ip: IpAddr) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| {
                n.address()
                    .and_then(|a| a.socket_addr())
                    .is_some_and(|a| a.ip() == ip)
            })
            .map(Node::id)
    }

    pub fn configured_count(&self, role: NodeRole) -> u32 {
        self.by_role(role).count() as u32
    }

    pub fn active_count(&self, role: NodeRole) -> u32 {
        self.by_role(role)
            .filter(|n| n.state() == NodeState::Connected)
            .count() as u32
    }

    /// Nodes a destination selects.
    ///
    /// `BROADCAST` reaches every remote node. A magic destination reaches
    /// every node whose role bit is set. Other destinations go through
    /// `router`.
    pub fn resolve(&self, selection: u16, router: &dyn Router) -> Vec<NodeId> {
        if selection == dest::BROADCAST {
            return self
                .nodes
                .iter()
                .filter(|n| n.role() != NodeRole::Local)
                .map(Node::id)
                .collect();
        }
        if dest::is_magic(selection) {
            return self
                .nodes
                .iter()
                .filter(|n| n.role().dest_flag() & selection != 0)
                .map(Node::id)
                .collect();
        }
        router.route(selection, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::NodeAddress;

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.add(Node::new("local", NodeRole::Local));
        reg.add(
            Node::new("master", NodeRole::Master)
                .with_address(NodeAddress::Tcp("10.0.0.1:15551".parse().unwrap())),
        );
        reg.add(Node::new("peer-a", NodeRole::Peer));
        reg.add(Node::new("peer-b", NodeRole::Peer));
        reg.add(Node::new("poller", NodeRole::Poller));
        reg
    }

    #[test]
    fn test_ids_are_positions() {
        let reg = registry();
        assert_eq!(reg.len(), 5);
        assert_eq!(reg.find_by_name("peer-b"), Some(NodeId(3)));
        assert_eq!(reg.get(NodeId(3)).unwrap().id(), NodeId(3));
        assert_eq!(NodeId(3).to_string(), "#3");
        assert!(reg.get(NodeId(9)).is_none());
    }

    #[test]
    fn test_counts_by_role() {
        let reg = registry();
        assert_eq!(reg.configured_count(NodeRole::Peer), 2);
        assert_eq!(reg.configured_count(NodeRole::Master), 1);
        assert_eq!(reg.active_count(NodeRole::Peer), 0);
        assert_eq!(reg.pollers().count(), 1);
    }

    #[test]
    fn test_find_by_ip() {
        let reg = registry();
        assert_eq!(reg.find_by_ip("10.0.0.1".parse().unwrap()), Some(NodeId(1)));
        assert_eq!(reg.find_by_ip("10.0.0.2".parse().unwrap()), None);
    }

    #[test]
    fn test_resolve_broadcast_skips_local() {
        let reg = registry();
        let ids = reg.resolve(dest::BROADCAST, &NoRoutes);
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(3), NodeId(4)]);
    }

    #[test]
    fn test_resolve_magic_roles() {
        let reg = registry();
        assert_eq!(reg.resolve(dest::PEERS, &NoRoutes), vec![NodeId(2), NodeId(3)]);
        assert_eq!(
            reg.resolve(dest::PEERS | dest::MASTERS, &NoRoutes),
            vec![NodeId(1), NodeId(2), NodeId(3)]
        );
        assert_eq!(reg.resolve(dest::POLLERS, &NoRoutes), vec![NodeId(4)]);
    }

    #[test]
    fn test_resolve_through_router() {
        let reg = registry();
        let router = StaticRouter::new().add(7, [NodeId(4)]).add(7, [NodeId(4), NodeId(2)]);
        assert_eq!(reg.resolve(7, &router), vec![NodeId(4), NodeId(2)]);
        assert!(reg.resolve(8, &router).is_empty());
    }
}
