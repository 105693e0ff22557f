//! Graph Topology
//!
//! Edges are kept in a flat list next to the vertex set. Graphs of radio
//! blocks rarely exceed a few dozen edges, so every lookup is a linear scan.
//!
//! # Ordering
//!
//! Resolution visits nodes in topological order of the forward edges, computed
//! with Kahn's algorithm. Back edges (`propagation_active == false`) are left
//! out of the sort, which is what allows a graph to contain loops as long as
//! every loop is closed by a back edge.

use std::collections::VecDeque;

use indexmap::IndexMap;
use tracing::{debug, error, info};

use super::edge::{Edge, NodeId};
use super::GraphState;
use crate::error::{GraphError, Result};
use crate::property::{SourceInfo, SourceKind};

/// An edge together with the arena ids of its endpoints.
#[derive(Debug, Clone)]
pub(crate) struct EdgeEntry {
    pub(crate) src: NodeId,
    pub(crate) dst: NodeId,
    pub(crate) edge: Edge,
}

impl GraphState {
    pub(crate) fn out_edges(&self, id: NodeId) -> impl Iterator<Item = &EdgeEntry> {
        self.edges.iter().filter(move |entry| entry.src == id)
    }

    pub(crate) fn in_edges(&self, id: NodeId) -> impl Iterator<Item = &EdgeEntry> {
        self.edges.iter().filter(move |entry| entry.dst == id)
    }

    fn degree(&self, id: NodeId) -> usize {
        self.edges
            .iter()
            .filter(|entry| entry.src == id || entry.dst == id)
            .count()
    }

    /// Add an edge, attaching both nodes. Fails without changing the graph if
    /// a port is already in use or the edge would close a forward cycle.
    pub(crate) fn connect(&mut self, src: NodeId, dst: NodeId, mut edge: Edge) -> Result<()> {
        edge.src_block_id = self.node(src)?.unique_id().to_string();
        edge.dst_block_id = self.node(dst)?.unique_id().to_string();

        if let Some(existing) = self
            .edges
            .iter()
            .find(|entry| entry.src == src && entry.dst == dst && entry.edge == edge)
        {
            if existing.edge.same_attributes(&edge) {
                info!(%edge, "ignoring repeated call to connect");
                return Ok(());
            }
            return Err(GraphError::Topology(format!(
                "attempting to modify properties of edge {edge}"
            )));
        }
        if let Some(existing) = self
            .out_edges(src)
            .find(|entry| entry.edge.src_port == edge.src_port)
        {
            return Err(GraphError::Topology(format!(
                "attempting to reconnect output port {}:{}, already connected as {}",
                edge.src_block_id, edge.src_port, existing.edge
            )));
        }
        if let Some(existing) = self
            .in_edges(dst)
            .find(|entry| entry.edge.dst_port == edge.dst_port)
        {
            return Err(GraphError::Topology(format!(
                "attempting to reconnect input port {}:{}, already connected as {}",
                edge.dst_block_id, edge.dst_port, existing.edge
            )));
        }

        let added = [src, dst].map(|id| self.vertices.insert(id));
        self.edges.push(EdgeEntry {
            src,
            dst,
            edge: edge.clone(),
        });
        if let Err(err) = self.topological_order() {
            self.edges.pop();
            for (id, added) in [src, dst].into_iter().zip(added) {
                if added {
                    self.vertices.shift_remove(&id);
                }
            }
            error!(%edge, "cannot add edge, it would close a loop without a back edge");
            return Err(err);
        }

        self.node_mut(src)?.attach();
        self.node_mut(dst)?.attach();
        debug!(%edge, propagation_active = edge.propagation_active, "connected");
        Ok(())
    }

    /// Remove an edge. Nodes left without any edges are detached.
    pub(crate) fn disconnect(&mut self, src: NodeId, dst: NodeId, mut edge: Edge) -> Result<()> {
        edge.src_block_id = self.node(src)?.unique_id().to_string();
        edge.dst_block_id = self.node(dst)?.unique_id().to_string();

        let before = self.edges.len();
        self.edges
            .retain(|entry| !(entry.src == src && entry.dst == dst && entry.edge == edge));
        if self.edges.len() == before {
            debug!(%edge, "edge not in graph, nothing to disconnect");
        }

        for id in [src, dst] {
            if self.vertices.contains(&id) && self.degree(id) == 0 {
                self.vertices.shift_remove(&id);
                self.node_mut(id)?.detach();
                debug!(node = %id, "detached node without edges");
            }
        }
        Ok(())
    }

    /// Drop a node and every edge touching it from the graph.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.node(id)?;
        self.edges.retain(|entry| entry.src != id && entry.dst != id);
        self.vertices.shift_remove(&id);
        self.node_mut(id)?.detach();
        Ok(())
    }

    /// Vertices ordered so that every forward edge points from an earlier to
    /// a later node.
    pub(crate) fn topological_order(&self) -> Result<Vec<NodeId>> {
        let forward = || self.edges.iter().filter(|entry| entry.edge.propagation_active);

        let mut in_degree: IndexMap<NodeId, usize> =
            self.vertices.iter().map(|&id| (id, 0)).collect();
        for entry in forward() {
            if let Some(degree) = in_degree.get_mut(&entry.dst) {
                *degree += 1;
            }
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        // Kahn's algorithm
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for entry in forward().filter(|entry| entry.src == id) {
                if let Some(degree) = in_degree.get_mut(&entry.dst) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(entry.dst);
                    }
                }
            }
        }

        if order.len() < self.vertices.len() {
            let stuck: Vec<String> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(&id, _)| self.display_name(id))
                .collect();
            return Err(GraphError::Topology(format!(
                "graph has a cycle without a back edge through {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// The node on the other end of `port` of `origin`, and the edge leading
    /// there. Only edge ports have neighbours.
    pub(crate) fn neighbour(&self, origin: NodeId, port: SourceInfo) -> Option<(NodeId, &Edge)> {
        match port.kind {
            SourceKind::InputEdge => self
                .in_edges(origin)
                .find(|entry| entry.edge.dst_port == port.instance)
                .map(|entry| (entry.src, &entry.edge)),
            SourceKind::OutputEdge => self
                .out_edges(origin)
                .find(|entry| entry.edge.src_port == port.instance)
                .map(|entry| (entry.dst, &entry.edge)),
            SourceKind::User | SourceKind::Framework => None,
        }
    }

    /// Ask every node whether it accepts its connected ports.
    pub(crate) fn check_topology(&self) -> Result<()> {
        let mut rejected = Vec::new();
        for &id in &self.vertices {
            let node = self.node(id)?;
            let inputs: Vec<usize> = self.in_edges(id).map(|entry| entry.edge.dst_port).collect();
            let outputs: Vec<usize> = self.out_edges(id).map(|entry| entry.edge.src_port).collect();
            if !node.check_topology(&inputs, &outputs) {
                error!(
                    node = %node.unique_id(),
                    ?inputs,
                    ?outputs,
                    num_inputs = node.num_input_ports(),
                    num_outputs = node.num_output_ports(),
                    "node cannot handle its current topology"
                );
                rejected.push(node.unique_id().to_string());
            }
        }
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(GraphError::Topology(format!(
                "graph topology is not valid, rejected by {}",
                rejected.join(", ")
            )))
        }
    }

    /// Graphviz rendering. Back edges are dashed.
    pub(crate) fn to_dot(&self) -> String {
        let mut dot = String::from("digraph sdrgraph {\n    rankdir=LR;\n");
        for &id in &self.vertices {
            dot.push_str(&format!(
                "    n{} [label=\"{}\"];\n",
                id.index(),
                escape(&self.display_name(id))
            ));
        }
        for entry in &self.edges {
            let style = if entry.edge.propagation_active {
                ""
            } else {
                ", style=dashed"
            };
            dot.push_str(&format!(
                "    n{} -> n{} [label=\"{} -> {}\"{style}];\n",
                entry.src.index(),
                entry.dst.index(),
                entry.edge.src_port,
                entry.edge.dst_port
            ));
        }
        dot.push_str("}\n");
        dot
    }

    pub(crate) fn display_name(&self, id: NodeId) -> String {
        self.node(id)
            .map(|node| node.unique_id().to_string())
            .unwrap_or_else(|_| id.to_string())
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::graph::{Edge, GraphState};
    use crate::node::Node;
    use crate::property::SourceInfo;

    fn state_with(names: &[&str]) -> GraphState {
        let mut state = GraphState::new(Default::default());
        for name in names {
            state.insert_node(Node::new(*name, 2, 2));
        }
        state
    }

    fn ids(state: &GraphState) -> Vec<crate::graph::NodeId> {
        state.node_ids()
    }

    #[test]
    fn order_respects_forward_edges() {
        let mut state = state_with(&["a", "b", "c"]);
        let [a, b, c] = [ids(&state)[0], ids(&state)[1], ids(&state)[2]];
        state.connect(b, c, Edge::new(0, 0)).unwrap();
        state.connect(a, b, Edge::new(0, 0)).unwrap();

        let order = state.topological_order().unwrap();
        let position = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(position(a) < position(b));
        assert!(position(b) < position(c));
    }

    #[test]
    fn cycle_is_rejected_and_rolled_back() {
        let mut state = state_with(&["a", "b"]);
        let [a, b] = [ids(&state)[0], ids(&state)[1]];
        state.connect(a, b, Edge::new(0, 0)).unwrap();

        let err = state.connect(b, a, Edge::new(0, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Topology);
        assert_eq!(state.edges.len(), 1);

        state.connect(b, a, Edge::new(0, 0).back_edge()).unwrap();
        assert_eq!(state.topological_order().unwrap(), vec![a, b]);
    }

    #[test]
    fn self_loop_needs_back_edge() {
        let mut state = state_with(&["a"]);
        let a = ids(&state)[0];
        assert!(state.connect(a, a, Edge::new(0, 0)).is_err());
        assert!(state.vertices.is_empty());
        assert!(!state.node(a).unwrap().is_attached());
    }

    #[test]
    fn neighbour_follows_port_numbers() {
        let mut state = state_with(&["a", "b"]);
        let [a, b] = [ids(&state)[0], ids(&state)[1]];
        state.connect(a, b, Edge::new(1, 0)).unwrap();

        let (node, edge) = state.neighbour(a, SourceInfo::output_edge(1)).unwrap();
        assert_eq!(node, b);
        assert_eq!(edge.dst_port, 0);
        assert_eq!(state.neighbour(b, SourceInfo::input_edge(0)).unwrap().0, a);
        assert!(state.neighbour(a, SourceInfo::output_edge(0)).is_none());
        assert!(state.neighbour(a, SourceInfo::user(1)).is_none());
    }

    #[test]
    fn disconnect_detaches_isolated_nodes() {
        let mut state = state_with(&["a", "b", "c"]);
        let [a, b, c] = [ids(&state)[0], ids(&state)[1], ids(&state)[2]];
        state.connect(a, b, Edge::new(0, 0)).unwrap();
        state.connect(b, c, Edge::new(0, 0)).unwrap();

        state.disconnect(a, b, Edge::new(0, 0)).unwrap();
        assert!(!state.node(a).unwrap().is_attached());
        assert!(state.node(b).unwrap().is_attached());
        assert_eq!(state.vertices.len(), 2);
    }

    #[test]
    fn dot_marks_back_edges() {
        let mut state = state_with(&["a", "b"]);
        let [a, b] = [ids(&state)[0], ids(&state)[1]];
        state.connect(a, b, Edge::new(0, 0)).unwrap();
        state.connect(b, a, Edge::new(1, 1).back_edge()).unwrap();

        let dot = state.to_dot();
        assert!(dot.contains("n0 [label=\"a\"]"));
        assert!(dot.contains("n0 -> n1 [label=\"0 -> 0\"];"));
        assert!(dot.contains("n1 -> n0 [label=\"1 -> 1\", style=dashed];"));
    }
}
