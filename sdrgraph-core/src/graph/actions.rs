//! Action Delivery
//!
//! Actions posted by nodes are collected into one FIFO queue per graph and
//! delivered one at a time. Whatever a delivery posts in turn is appended to
//! the back of the queue, so actions arrive in the order they were posted
//! even when handlers post more actions.

use std::sync::Arc;

use tracing::{trace, warn};

use super::edge::NodeId;
use super::resolve::ResolveContext;
use super::GraphState;
use crate::error::{GraphError, Result};
use crate::node::Action;
use crate::property::{SourceInfo, SourceKind};

/// An action waiting for delivery, with the node and port it left from.
#[derive(Debug, Clone)]
pub(crate) struct QueuedAction {
    pub(crate) origin: NodeId,
    pub(crate) source: SourceInfo,
    pub(crate) action: Arc<Action>,
}

impl GraphState {
    /// Queue an action leaving `origin` through `source`.
    ///
    /// Before the graph is committed, and after it is shut down, actions are
    /// dropped.
    pub(crate) fn enqueue_action(&mut self, origin: NodeId, source: SourceInfo, action: Arc<Action>) {
        if self.shutdown {
            trace!(key = %action.key(), "dropping action, graph is shut down");
            return;
        }
        if self.release_count > 0 {
            warn!(
                node = %self.display_name(origin),
                key = %action.key(),
                "cannot handle actions in a graph that is not committed, dropping action"
            );
            return;
        }
        self.actions.push_back(QueuedAction {
            origin,
            source,
            action,
        });
    }

    /// Move everything `id` posted into the queue.
    pub(crate) fn collect_outbox(&mut self, id: NodeId) -> Result<()> {
        for (source, action) in self.node_mut(id)?.take_outbox() {
            self.enqueue_action(id, source, action);
        }
        Ok(())
    }

    /// Deliver queued actions until the queue is empty.
    ///
    /// Calling this while a drain is already running returns at once; the
    /// running drain picks up whatever was queued. On error the queue is
    /// discarded.
    pub(crate) fn drain_actions(&mut self) -> Result<()> {
        if self.handling_actions {
            trace!(queued = self.actions.len(), "already delivering actions, deferring");
            return Ok(());
        }
        self.handling_actions = true;
        let result = self.deliver_queued();
        self.handling_actions = false;
        if result.is_err() {
            self.actions.clear();
        }
        result
    }

    fn deliver_queued(&mut self) -> Result<()> {
        let mut iterations = 0;
        while let Some(queued) = self.actions.pop_front() {
            if iterations == self.config.max_action_iterations {
                return Err(GraphError::Fatal(format!(
                    "terminating action handling after {iterations} deliveries, action `{}' still queued",
                    queued.action.key()
                )));
            }
            iterations += 1;
            self.deliver(queued)?;
        }
        Ok(())
    }

    fn deliver(&mut self, queued: QueuedAction) -> Result<()> {
        let QueuedAction {
            origin,
            source,
            action,
        } = queued;

        let (recipient, port) = if source.kind == SourceKind::User {
            (origin, source)
        } else {
            let Some((neighbour, edge)) = self.neighbour(origin, source) else {
                warn!(
                    node = %self.display_name(origin),
                    %source,
                    key = %action.key(),
                    "cannot forward action, no neighbour on this port"
                );
                return Ok(());
            };
            let instance = if source.kind == SourceKind::InputEdge {
                edge.src_port
            } else {
                edge.dst_port
            };
            (neighbour, SourceInfo::new(source.kind.invert(), instance))
        };

        let node = self.node_mut(recipient)?;
        trace!(node = %node.unique_id(), %port, key = %action.key(), id = action.id(), "delivering action");
        node.receive_action(port, action)?;

        self.collect_outbox(recipient)?;
        if self.node_mut(recipient)?.take_resolve_request() {
            self.resolve_all(recipient, ResolveContext::NodeProp)?;
        }
        Ok(())
    }
}
