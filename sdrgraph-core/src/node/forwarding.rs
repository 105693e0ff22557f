//! Edge Property Forwarding
//!
//! Edge properties travel between neighbors. When a property arrives at a
//! port on which the node never registered it, the node creates a dynamic
//! copy and decides, by its forwarding policy, which of its other ports the
//! property continues to. For every such port it adds a copy there too and a
//! resolver that keeps the two in sync. A node therefore never needs to know
//! which properties its neighbors introduce.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use tracing::trace;

use super::Node;
use crate::error::{GraphError, Result};
use crate::property::{PropHandle, PropertyCell, SourceInfo, SourceKind};

/// How an unregistered edge property or an unhandled action continues
/// through a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForwardingPolicy {
    /// To the port with the same index on the opposite side, if it exists.
    #[default]
    OneToOne,
    /// To every port on the opposite side.
    OneToFan,
    /// To every input port except the one it arrived on.
    OneToAllIn,
    /// To every output port except the one it arrived on.
    OneToAllOut,
    /// To every port except the one it arrived on.
    OneToAll,
    /// Nowhere.
    Drop,
    /// To the ports listed in the node's forwarding map.
    UseMap,
}

/// Explicit routes used by [`ForwardingPolicy::UseMap`], keyed by the port a
/// property or action arrives on.
pub type ForwardingMap = IndexMap<SourceInfo, Vec<SourceInfo>>;

pub(crate) type Targets = SmallVec<[SourceInfo; 4]>;

impl Node {
    /// Set the forwarding policy for edge properties with the given id. The
    /// empty id sets the default for all other ids.
    pub fn set_prop_forwarding_policy(&mut self, policy: ForwardingPolicy, id: &str) {
        self.prop_policies.insert(id.to_string(), policy);
    }

    /// Routes for edge properties under [`ForwardingPolicy::UseMap`].
    pub fn set_prop_forwarding_map(&mut self, map: ForwardingMap) {
        self.prop_map = map;
    }

    /// Set the forwarding policy for actions with the given key. The empty key
    /// sets the default for all other keys.
    pub fn set_action_forwarding_policy(&mut self, policy: ForwardingPolicy, key: &str) {
        self.action_policies.insert(key.to_string(), policy);
    }

    /// Routes for actions under [`ForwardingPolicy::UseMap`].
    pub fn set_action_forwarding_map(&mut self, map: ForwardingMap) {
        self.action_map = map;
    }

    pub(crate) fn has_port(&self, port: SourceInfo) -> bool {
        match port.kind {
            SourceKind::InputEdge => port.instance < self.num_inputs,
            SourceKind::OutputEdge => port.instance < self.num_outputs,
            SourceKind::User | SourceKind::Framework => false,
        }
    }

    fn ports(&self, kind: SourceKind) -> impl Iterator<Item = SourceInfo> {
        let count = match kind {
            SourceKind::InputEdge => self.num_inputs,
            SourceKind::OutputEdge => self.num_outputs,
            SourceKind::User | SourceKind::Framework => 0,
        };
        (0..count).map(move |i| SourceInfo::new(kind, i))
    }

    /// Ports that something arriving on `origin` continues to under `policy`.
    pub(crate) fn forwarding_targets(
        &self,
        policy: ForwardingPolicy,
        origin: SourceInfo,
        map: &ForwardingMap,
        what: &str,
    ) -> Result<Targets> {
        let opposite = origin.kind.invert();
        let targets = match policy {
            ForwardingPolicy::Drop => Targets::new(),
            ForwardingPolicy::OneToOne => {
                let target = SourceInfo::new(opposite, origin.instance);
                if self.has_port(target) {
                    smallvec![target]
                } else {
                    Targets::new()
                }
            }
            ForwardingPolicy::OneToFan => self.ports(opposite).collect(),
            ForwardingPolicy::OneToAllIn => self
                .ports(SourceKind::InputEdge)
                .filter(|port| *port != origin)
                .collect(),
            ForwardingPolicy::OneToAllOut => self
                .ports(SourceKind::OutputEdge)
                .filter(|port| *port != origin)
                .collect(),
            ForwardingPolicy::OneToAll => self
                .ports(SourceKind::InputEdge)
                .chain(self.ports(SourceKind::OutputEdge))
                .filter(|port| *port != origin)
                .collect(),
            ForwardingPolicy::UseMap => match map.get(&origin) {
                Some(destinations) => {
                    if let Some(missing) = destinations.iter().find(|d| !self.has_port(**d)) {
                        return Err(GraphError::Config(format!(
                            "destination port {missing} in {what} map of {} does not exist",
                            self.unique_id
                        )));
                    }
                    destinations.iter().copied().collect()
                }
                None => Targets::new(),
            },
        };
        Ok(targets)
    }

    fn prop_policy(&self, id: &str) -> ForwardingPolicy {
        self.prop_policies
            .get(id)
            .or_else(|| self.prop_policies.get(""))
            .copied()
            .unwrap_or_default()
    }

    /// Receive an edge property from the neighbor attached at `port`.
    ///
    /// The local counterpart has the inverted edge kind on `port`; it is
    /// created on first contact. Invalid properties are not forwarded.
    pub(crate) fn forward_edge_property(&mut self, incoming: &PropertyCell, port: usize) -> Result<()> {
        if !incoming.is_valid() {
            trace!(node = %self.unique_id, id = incoming.id(), source = %incoming.source(), "skipping invalid edge property");
            return Ok(());
        }

        let local_source = SourceInfo::new(incoming.source().kind.invert(), port);
        let index = match self.props.find(incoming.id(), local_source) {
            Some(index) => index,
            None => {
                trace!(node = %self.unique_id, id = incoming.id(), source = %local_source, "received unknown edge property");
                self.inject_edge_property(incoming, local_source)?
            }
        };

        let local = self
            .props
            .cell(index)
            .ok_or_else(|| GraphError::InvalidHandle {
                node: self.unique_id.clone(),
                index,
            })?;
        if local.kind() != incoming.kind() {
            return Err(GraphError::Type {
                id: incoming.id().to_string(),
                expected: local.kind(),
                found: incoming.kind(),
            });
        }
        match incoming.value() {
            Some(value) => self.props.force_write(index, value.clone()),
            None => Ok(()),
        }
    }

    /// Create a dynamic copy of `blueprint` on `source`, plus whatever copies
    /// and forwarding resolvers the policy for its id asks for. Returns the
    /// existing property if there already is one.
    pub(crate) fn inject_edge_property(
        &mut self,
        blueprint: &PropertyCell,
        source: SourceInfo,
    ) -> Result<usize> {
        if let Some(index) = self.props.find(blueprint.id(), source) {
            return Ok(index);
        }

        let cell = blueprint.clone_with_source(source);
        let index = self.register_cell(cell.clone())?;

        let policy = self.prop_policy(cell.id());
        let targets = self.forwarding_targets(policy, source, &self.prop_map, "property")?;
        if targets.is_empty() {
            trace!(node = %self.unique_id, id = cell.id(), %source, ?policy, "not forwarding edge property");
        }
        for target in targets {
            // Safe to recurse: this property is registered, so the opposite
            // side finds it instead of injecting it again.
            let target_index = self.inject_edge_property(&cell, target)?;
            self.add_forwarding_resolver(PropHandle(index), PropHandle(target_index));
        }
        Ok(index)
    }
}
