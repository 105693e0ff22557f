//! Edges and node ids.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Index of a node in a graph's arena. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an edge carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// A fixed connection inside the device.
    #[default]
    Static,
    /// A connection routed at runtime.
    Dynamic,
    /// Into a host receive streamer.
    RxStream,
    /// Out of a host transmit streamer.
    TxStream,
}

/// A directed connection from an output port to an input port.
///
/// Equality and hashing consider only the four identity fields; `kind` and
/// `propagation_active` are attributes of an edge, not part of what it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub src_block_id: String,
    pub src_port: usize,
    pub dst_block_id: String,
    pub dst_port: usize,
    pub kind: EdgeKind,
    /// Whether properties flow along this edge in the forward sweep. Back
    /// edges closing a loop have this cleared and are excluded from the
    /// topological order.
    pub propagation_active: bool,
}

impl Edge {
    /// A static, forward-propagating edge. Block ids are filled in on connect.
    pub fn new(src_port: usize, dst_port: usize) -> Self {
        Self {
            src_block_id: String::new(),
            src_port,
            dst_block_id: String::new(),
            dst_port,
            kind: EdgeKind::Static,
            propagation_active: true,
        }
    }

    /// Set the kind of connection the edge stands for.
    pub fn with_kind(mut self, kind: EdgeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark this edge as a back edge.
    pub fn back_edge(mut self) -> Self {
        self.propagation_active = false;
        self
    }

    pub(crate) fn same_attributes(&self, other: &Edge) -> bool {
        self.kind == other.kind && self.propagation_active == other.propagation_active
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.src_block_id == other.src_block_id
            && self.src_port == other.src_port
            && self.dst_block_id == other.dst_block_id
            && self.dst_port == other.dst_port
    }
}

impl Eq for Edge {}

impl Hash for Edge {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.src_block_id.hash(state);
        self.src_port.hash(state);
        self.dst_block_id.hash(state);
        self.dst_port.hash(state);
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_block_id, self.src_port, self.dst_block_id, self.dst_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_attributes() {
        let forward = Edge::new(0, 1);
        let back = Edge::new(0, 1).back_edge().with_kind(EdgeKind::Dynamic);
        assert_eq!(forward, back);
        assert!(!forward.same_attributes(&back));
        assert_ne!(forward, Edge::new(1, 1));
    }

    #[test]
    fn display_names_both_ends() {
        let edge = Edge {
            src_block_id: "0/Radio#0".into(),
            dst_block_id: "0/DDC#0".into(),
            ..Edge::new(0, 1)
        };
        assert_eq!(edge.to_string(), "0/Radio#0:0 -> 0/DDC#0:1");
    }
}
