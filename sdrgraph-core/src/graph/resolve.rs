//! Graph Resolution
//!
//! Resolution brings every property in the graph to a consistent state.
//!
//! # Algorithm
//!
//! Starting at the node that triggered it, a sweep walks the topological
//! order back and forth:
//!
//! 1. Resolve the current node locally
//! 2. Push its edge properties to the neighbours on the other end of each
//!    edge whose propagation flag matches the sweep direction
//! 3. Clean the current node
//! 4. Step forward; at the last node turn around and walk back to the first
//!
//! Every time the walk passes the starting node going forward it has
//! completed a circuit. The sweep ends when nothing is dirty or after
//! `max_sweep_circuits` circuits. One sweep runs over forward edges, a second
//! over back edges; anything still dirty afterwards is an error.

use tracing::{debug, error, trace, warn};

use super::edge::NodeId;
use super::GraphState;
use crate::error::{DirtyProperty, GraphError, Result};
use crate::property::{Snapshot, SourceKind};

/// What started a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveContext {
    /// The graph was committed. Sweeps run to their circuit limit so that
    /// every node sees every edge property at least once.
    Init,
    /// A property was set. Sweeps stop as soon as nothing is dirty.
    NodeProp,
}

impl GraphState {
    /// Resolve starting at `initial`. Until the graph is committed only the
    /// node itself is resolved.
    pub(crate) fn resolve_all(&mut self, initial: NodeId, context: ResolveContext) -> Result<()> {
        if self.vertices.is_empty() {
            return Ok(());
        }
        if self.shutdown {
            trace!("skipping resolution, graph is shut down");
            return Ok(());
        }
        if self.release_count > 0 {
            let release_count = self.release_count;
            let node = self.node_mut(initial)?;
            debug!(node = %node.unique_id(), release_count, "graph not committed, resolving node locally");
            node.resolve_props()?;
            node.clean_props();
            self.collect_outbox(initial)?;
            return Ok(());
        }

        self.sweep(initial, context, true)?;
        self.sweep(initial, context, false)
    }

    fn sweep(&mut self, initial: NodeId, context: ResolveContext, forward: bool) -> Result<()> {
        let dirty_nodes = self.dirty_nodes();
        if dirty_nodes.len() > 1 {
            let names: Vec<String> = dirty_nodes.iter().map(|&id| self.display_name(id)).collect();
            warn!(nodes = ?names, "found more dirty nodes than expected, continuing with resolution");
        }

        let order = self.topological_order().inspect_err(|err| {
            error!(error = %err, "cannot resolve, graph is not a DAG");
        })?;
        let mut position = order
            .iter()
            .position(|&id| id == initial)
            .ok_or_else(|| {
                GraphError::Topology(format!(
                    "cannot resolve from {}, node is not part of the graph",
                    self.display_name(initial)
                ))
            })?;
        trace!(forward, nodes = order.len(), start = position, "starting sweep");

        let mut moving_forward = true;
        let mut circuits = 0;
        loop {
            let current = order[position];
            let node = self.node_mut(current)?;
            trace!(node = %node.unique_id(), "resolving node");
            if let Err(err) = node.resolve_props() {
                error!(node = %node.unique_id(), error = %err, "failed to resolve node");
                return Err(err);
            }
            self.forward_edge_properties(current, forward)?;
            self.node_mut(current)?.clean_props();
            self.collect_outbox(current)?;

            if context == ResolveContext::NodeProp && !self.any_dirty() {
                trace!("no dirty properties left, ending sweep early");
                break;
            }

            if moving_forward {
                position += 1;
                if position == order.len() {
                    moving_forward = false;
                    position -= 1;
                }
            }
            if !moving_forward {
                if order.len() > 1 {
                    position -= 1;
                    if position == 0 {
                        moving_forward = true;
                    }
                } else {
                    moving_forward = true;
                }
            }

            if moving_forward && order[position] == initial {
                circuits += 1;
                if circuits >= self.config.max_sweep_circuits || !self.any_dirty() {
                    break;
                }
            }
        }

        let remaining = self.dirty_properties();
        if !remaining.is_empty() {
            for prop in &remaining {
                error!(property = %prop, "property still dirty after resolution");
            }
            return Err(GraphError::Unresolved { props: remaining });
        }
        Ok(())
    }

    /// Push the edge properties of `origin` to its neighbours.
    fn forward_edge_properties(&mut self, origin: NodeId, forward: bool) -> Result<()> {
        let props = self.node(origin)?.edge_properties();
        trace!(node = %self.display_name(origin), count = props.len(), forward, "forwarding edge properties");

        for prop in props {
            let Some((neighbour, edge)) = self.neighbour(origin, prop.source()) else {
                continue;
            };
            if edge.propagation_active != forward {
                continue;
            }
            let port = if prop.source().kind == SourceKind::InputEdge {
                edge.src_port
            } else {
                edge.dst_port
            };
            self.node_mut(neighbour)?.forward_edge_property(&prop, port)?;
        }
        Ok(())
    }

    fn dirty_nodes(&self) -> Vec<NodeId> {
        self.vertices
            .iter()
            .copied()
            .filter(|&id| self.node(id).is_ok_and(|node| node.has_dirty()))
            .collect()
    }

    fn any_dirty(&self) -> bool {
        self.vertices
            .iter()
            .any(|&id| self.node(id).is_ok_and(|node| node.has_dirty()))
    }

    fn dirty_properties(&self) -> Vec<DirtyProperty> {
        self.vertices
            .iter()
            .filter_map(|&id| self.node(id).ok())
            .flat_map(|node| node.dirty_properties())
            .collect()
    }

    /// Property values of every node in the arena.
    pub(crate) fn snapshot_nodes(&self) -> Vec<(NodeId, Snapshot)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| node.as_ref().map(|node| (NodeId(index), node.snapshot())))
            .collect()
    }

    pub(crate) fn restore_nodes(&mut self, snapshots: Vec<(NodeId, Snapshot)>) {
        for (id, snapshot) in snapshots {
            if let Ok(node) = self.node_mut(id) {
                node.restore(snapshot);
            }
        }
    }
}
