//! Property Graph
//!
//! A [`Graph`] owns the nodes of a block pipeline and the edges between them,
//! and keeps the properties of all nodes consistent across those edges.
//!
//! # Overview
//!
//! - Nodes live in an arena and are addressed by [`NodeId`]. A node becomes
//!   part of the graph (a vertex) when it is first connected and leaves it
//!   when its last edge is removed.
//! - Edges connect an output port of one node to an input port of another.
//!   Forward edges must form a DAG; loops are closed with back edges.
//! - Nothing resolves across nodes until the graph is committed. After that,
//!   every property write made through [`Graph::with_node_mut`] triggers a
//!   resolution of the whole graph before the call returns.
//!
//! # Design Decisions
//!
//! 1. All state sits behind one re-entrant lock. A resolver or action handler
//!    may call back into its graph from the resolving thread without
//!    deadlocking. [`Graph::set_property`], [`Graph::set_properties`] and
//!    [`Graph::post_action`] made that way are deferred: they return `Ok` at
//!    once and run, in call order, as soon as the operation in progress has
//!    finished. Every other call made from inside returns
//!    [`GraphError::Busy`], since the state it needs is mid-update.
//!
//! 2. Every mutating call is a transaction: if resolution or action delivery
//!    fails, the property values of every node are rolled back. Deferred
//!    calls queued by a failed operation are discarded with it.

mod actions;
mod config;
mod edge;
mod resolve;
mod topology;

use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use crate::error::{GraphError, Result};
use crate::node::{Action, Block, Node};
use crate::property::{PropertyDirectory, PropertyType, SourceInfo};

pub use config::GraphConfig;
pub use edge::{Edge, EdgeKind, NodeId};
pub use resolve::ResolveContext;

use actions::QueuedAction;
use topology::EdgeEntry;

pub(crate) struct GraphState {
    config: GraphConfig,
    nodes: Vec<Option<Node>>,
    /// Nodes with at least one edge, in the order they joined.
    vertices: IndexSet<NodeId>,
    edges: Vec<EdgeEntry>,
    release_count: usize,
    shutdown: bool,
    actions: VecDeque<QueuedAction>,
    handling_actions: bool,
}

impl GraphState {
    pub(crate) fn new(config: GraphConfig) -> Self {
        Self {
            release_count: config.initial_release_count,
            config,
            nodes: Vec::new(),
            vertices: IndexSet::new(),
            edges: Vec::new(),
            shutdown: false,
            actions: VecDeque::new(),
            handling_actions: false,
        }
    }

    pub(crate) fn insert_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        debug!(node = %node.unique_id(), %id, "adding node");
        self.nodes.push(Some(node));
        id
    }

    pub(crate) fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_some())
            .map(|(index, _)| NodeId(index))
            .collect()
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(GraphError::NodeNotFound(id.0))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(GraphError::NodeNotFound(id.0))
    }

    /// Run `op`, rolling back every node's properties and dropping queued
    /// actions if it fails.
    fn transaction<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let snapshots = self.snapshot_nodes();
        let result = op(self);
        if result.is_err() {
            self.restore_nodes(snapshots);
            self.actions.clear();
        }
        result
    }

    /// Finish an operation on `id`: queue what it posted, run the resolution
    /// it asked for, then deliver actions.
    fn settle(&mut self, id: NodeId) -> Result<()> {
        if !self.vertices.contains(&id) {
            return Ok(());
        }
        self.collect_outbox(id)?;
        if self.node_mut(id)?.take_resolve_request() {
            self.resolve_all(id, ResolveContext::NodeProp)?;
        }
        self.drain_actions()
    }

    /// Run `op` on a node, then resolve and deliver whatever it set off, all
    /// as one transaction.
    fn modify_node<R>(&mut self, id: NodeId, op: impl FnOnce(&mut Node) -> Result<R>) -> Result<R> {
        self.node(id)?;
        self.transaction(|state| {
            let value = op(state.node_mut(id)?)?;
            state.settle(id)?;
            Ok(value)
        })
    }

    fn commit(&mut self) -> Result<()> {
        self.release_count = self.release_count.saturating_sub(1);
        debug!(release_count = self.release_count, "committing graph");
        if self.release_count > 0 {
            return Ok(());
        }
        self.check_topology()?;
        let Some(&first) = self.vertices.first() else {
            return Ok(());
        };
        self.transaction(|state| {
            state.resolve_all(first, ResolveContext::Init)?;
            state.drain_actions()
        })
    }
}

/// A node write requested from inside a running graph operation.
type DeferredCall = Box<dyn FnOnce(&mut GraphState) -> Result<()> + Send>;

struct Shared {
    state: RefCell<GraphState>,
    deferred: RefCell<VecDeque<DeferredCall>>,
}

impl Shared {
    /// Apply deferred calls until none are left. Calls they defer in turn
    /// are applied too, up to the action iteration limit.
    fn run_deferred(&self, state: &mut GraphState) -> Result<()> {
        let mut applied = 0;
        loop {
            let Some(call) = self.deferred.borrow_mut().pop_front() else {
                return Ok(());
            };
            if applied == state.config.max_action_iterations {
                self.deferred.borrow_mut().clear();
                return Err(GraphError::Fatal(format!(
                    "terminating deferred graph calls after {applied} calls"
                )));
            }
            applied += 1;
            if let Err(err) = call(state) {
                self.deferred.borrow_mut().clear();
                return Err(err);
            }
        }
    }
}

/// A graph of nodes, safe to share between threads.
pub struct Graph {
    shared: ReentrantMutex<Shared>,
}

impl Graph {
    /// Create an empty graph with the default configuration.
    pub fn new() -> Self {
        Self::from_state(GraphState::new(GraphConfig::default()))
    }

    /// Create an empty graph with a validated configuration.
    pub fn with_config(config: GraphConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_state(GraphState::new(config)))
    }

    fn from_state(state: GraphState) -> Self {
        Self {
            shared: ReentrantMutex::new(Shared {
                state: RefCell::new(state),
                deferred: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Run `op` on the graph state, then apply whatever it deferred.
    fn with_state<R>(&self, op: impl FnOnce(&mut GraphState) -> Result<R>) -> Result<R> {
        let guard = self.shared.lock();
        let mut state = borrow_state(&guard)?;
        match op(&mut *state) {
            Ok(value) => {
                guard.run_deferred(&mut *state)?;
                Ok(value)
            }
            Err(err) => {
                guard.deferred.borrow_mut().clear();
                Err(err)
            }
        }
    }

    /// Run a node write now, or after the current operation if one is in
    /// progress on this thread.
    fn write_node<F>(&self, id: NodeId, op: F) -> Result<()>
    where
        F: FnOnce(&mut Node) -> Result<()> + Send + 'static,
    {
        let guard = self.shared.lock();
        if guard.state.try_borrow_mut().is_err() {
            trace!(%id, "graph busy, deferring node write");
            guard
                .deferred
                .borrow_mut()
                .push_back(Box::new(move |state: &mut GraphState| state.modify_node(id, op)));
            return Ok(());
        }
        self.with_state(|state| state.modify_node(id, op))
    }

    /// A copy of the configuration.
    pub fn config(&self) -> Result<GraphConfig> {
        self.with_state(|state| Ok(state.config.clone()))
    }

    /// Hand a node over to the graph. It takes part in resolution once it is
    /// connected.
    pub fn add_node(&self, node: Node) -> Result<NodeId> {
        self.with_state(|state| Ok(state.insert_node(node)))
    }

    /// Build the node for `block` and add it.
    pub fn add_block<B: Block>(&self, block: B) -> Result<NodeId> {
        self.add_node(Node::from_block(block)?)
    }

    /// Take a node back out of the arena. The node must not be connected.
    pub fn take_node(&self, id: NodeId) -> Result<Node> {
        self.with_state(|state| {
            if state.vertices.contains(&id) {
                return Err(GraphError::Topology(format!(
                    "cannot take {}, node is still connected",
                    state.display_name(id)
                )));
            }
            state
                .nodes
                .get_mut(id.0)
                .and_then(Option::take)
                .ok_or(GraphError::NodeNotFound(id.0))
        })
    }

    /// Remove a node and all of its edges from the graph. The node stays in
    /// the arena, unattached.
    pub fn remove(&self, id: NodeId) -> Result<()> {
        self.with_state(|state| state.remove_node(id))
    }

    /// Connect an output port of `src` to an input port of `dst`, attaching
    /// both nodes. Connecting an identical edge twice does nothing.
    pub fn connect(&self, src: NodeId, dst: NodeId, edge: Edge) -> Result<()> {
        self.with_state(|state| state.connect(src, dst, edge))
    }

    /// Remove an edge. Nodes left without edges are detached.
    pub fn disconnect(&self, src: NodeId, dst: NodeId, edge: Edge) -> Result<()> {
        self.with_state(|state| state.disconnect(src, dst, edge))
    }

    /// Take away one release. When none are left, the topology is checked
    /// and the whole graph is resolved.
    pub fn commit(&self) -> Result<()> {
        self.with_state(GraphState::commit)
    }

    /// Add a release. Resolution stays local to each node until a matching
    /// `commit`.
    pub fn release(&self) -> Result<()> {
        self.with_state(|state| {
            state.release_count = state.release_count.saturating_add(1);
            debug!(release_count = state.release_count, "releasing graph");
            Ok(())
        })
    }

    /// Stop all resolution and action delivery for good.
    pub fn shutdown(&self) -> Result<()> {
        self.with_state(|state| {
            debug!("shutting down graph");
            state.shutdown = true;
            state.release_count = usize::MAX;
            state.actions.clear();
            Ok(())
        })
    }

    /// Releases still to be committed before the graph resolves globally.
    pub fn release_count(&self) -> Result<usize> {
        self.with_state(|state| Ok(state.release_count))
    }

    /// Whether every release has been committed.
    pub fn is_committed(&self) -> Result<bool> {
        self.with_state(|state| Ok(state.release_count == 0))
    }

    /// Whether [`Graph::shutdown`] has been called.
    pub fn is_shut_down(&self) -> Result<bool> {
        self.with_state(|state| Ok(state.shutdown))
    }

    /// All edges, in the order they were connected.
    pub fn enumerate_edges(&self) -> Result<Vec<Edge>> {
        self.with_state(|state| Ok(state.edges.iter().map(|entry| entry.edge.clone()).collect()))
    }

    /// Ids of every node in the arena, connected or not.
    pub fn node_ids(&self) -> Result<Vec<NodeId>> {
        self.with_state(|state| Ok(state.node_ids()))
    }

    /// The topology in Graphviz DOT format.
    pub fn to_dot(&self) -> Result<String> {
        self.with_state(|state| Ok(state.to_dot()))
    }

    /// Run `op` on a shared reference to a node.
    pub fn with_node<R>(&self, id: NodeId, op: impl FnOnce(&Node) -> R) -> Result<R> {
        self.with_state(|state| Ok(op(state.node(id)?)))
    }

    /// Run `op` on a node, then resolve and deliver whatever it set off.
    ///
    /// If `op` or anything it triggers fails, every node's properties are
    /// rolled back to their values from before the call.
    pub fn with_node_mut<R>(&self, id: NodeId, op: impl FnOnce(&mut Node) -> Result<R>) -> Result<R> {
        self.with_state(|state| state.modify_node(id, op))
    }

    /// Set a user property of a node and resolve the graph.
    ///
    /// Called from a resolver or action handler of this graph, the write is
    /// deferred until the running operation completes. Errors it raises
    /// then surface from the outer call.
    pub fn set_property<T: PropertyType>(
        &self,
        id: NodeId,
        prop: &str,
        value: T,
        instance: usize,
    ) -> Result<()> {
        let prop = prop.to_string();
        self.write_node(id, move |node| node.set_property(&prop, value, instance))
    }

    /// Read a user property of a node.
    pub fn get_property<T: PropertyType>(&self, id: NodeId, prop: &str, instance: usize) -> Result<T> {
        self.with_state(|state| state.node(id)?.get_property(prop, instance))
    }

    /// Set user properties of a node from a `key=value,...` string. Deferred
    /// like [`Graph::set_property`] when called from inside the graph.
    pub fn set_properties(&self, id: NodeId, assignments: &str, instance: usize) -> Result<()> {
        let assignments = assignments.to_string();
        self.write_node(id, move |node| node.set_properties(&assignments, instance))
    }

    /// Post an action from node `id` through `source` and deliver it.
    /// Deferred like [`Graph::set_property`] when called from inside the
    /// graph.
    pub fn post_action(&self, id: NodeId, source: SourceInfo, action: impl Into<Arc<Action>>) -> Result<()> {
        let action = action.into();
        self.write_node(id, move |node| {
            node.post_action(source, action);
            Ok(())
        })
    }

    /// Resolve the graph starting at `id`.
    pub fn resolve_all(&self, id: NodeId, context: ResolveContext) -> Result<()> {
        self.with_state(|state| {
            state.transaction(|state| {
                state.resolve_all(id, context)?;
                state.drain_actions()
            })
        })
    }

    /// The node's property directory, readable without the graph lock.
    pub fn property_directory(&self, id: NodeId) -> Result<PropertyDirectory> {
        self.with_state(|state| Ok(state.node(id)?.property_directory()))
    }
}

fn borrow_state(shared: &Shared) -> Result<RefMut<'_, GraphState>> {
    shared.state.try_borrow_mut().map_err(|_| {
        GraphError::Busy("graph accessed from within its own resolution or action delivery".into())
    })
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.shared.lock();
        let Ok(state) = guard.state.try_borrow() else {
            return f.write_str("Graph { <busy> }");
        };
        f.debug_struct("Graph")
            .field("nodes", &state.node_ids().len())
            .field("vertices", &state.vertices.len())
            .field("edges", &state.edges.len())
            .field("release_count", &state.release_count)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}
