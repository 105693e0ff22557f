//! Nodes
//!
//! A [`Node`] is one block of a signal-processing pipeline as the graph sees
//! it: a registry of properties, the resolvers that keep them consistent, the
//! handlers for incoming actions, and the policies that decide how properties
//! and actions the node knows nothing about pass through it.
//!
//! # Lifecycle
//!
//! A node is built and registered while unattached. Writes through
//! [`Node::set_property`] then resolve locally on the spot. Once the node is
//! connected into a [`Graph`](crate::graph::Graph), writes only record that a
//! resolution is needed and the graph runs it, across all nodes, when the
//! current operation returns. Actions follow the same split: an unattached
//! node drops what it posts, an attached node queues it for the graph.

mod access;
mod action;
mod forwarding;
mod resolve;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::error::{DirtyProperty, GraphError, Result};
use crate::property::{
    Prop, PropHandle, PropertyCell, PropertyDirectory, PropertyInfo, PropertyStore, PropertyType,
    PropertyValue, Snapshot, SourceInfo,
};

pub use access::PropertyAccess;
pub use action::{
    Action, ActionHandler, ActionPayload, RxEventCode, StreamCommand, StreamMode, TxEventCode,
    RX_EVENT_KEY, STREAM_CMD_KEY, TX_EVENT_KEY,
};
pub use forwarding::{ForwardingMap, ForwardingPolicy};

pub(crate) use access::PendingAction;

use access::{lookup, read_typed};
use resolve::{CleanCallback, Resolver};

/// The capabilities a block implementation supplies to the graph.
///
/// A block declares its ports, registers its properties, resolvers and
/// action handlers on a fresh node, and may restrict which of its ports are
/// allowed to be connected.
pub trait Block: Send + 'static {
    /// Id of the block, unique within a graph.
    fn unique_id(&self) -> String;

    fn num_input_ports(&self) -> usize;

    fn num_output_ports(&self) -> usize;

    /// Register properties, resolvers and handlers on the block's node.
    fn register(&mut self, node: &mut Node) -> Result<()>;

    /// Whether the block accepts being connected on these ports. Checked when
    /// the graph is committed.
    fn check_topology(&self, connected_inputs: &[usize], connected_outputs: &[usize]) -> bool {
        ports_in_range(
            self.num_input_ports(),
            self.num_output_ports(),
            connected_inputs,
            connected_outputs,
        )
    }
}

/// Default topology rule: every connected port exists.
pub fn ports_in_range(
    num_inputs: usize,
    num_outputs: usize,
    connected_inputs: &[usize],
    connected_outputs: &[usize],
) -> bool {
    connected_inputs.iter().all(|&port| port < num_inputs)
        && connected_outputs.iter().all(|&port| port < num_outputs)
}

/// A block's properties, resolvers and action handling.
pub struct Node {
    unique_id: String,
    num_inputs: usize,
    num_outputs: usize,
    props: PropertyStore,
    directory: PropertyDirectory,
    resolvers: Vec<Resolver>,
    clean_callbacks: IndexMap<usize, CleanCallback>,
    prop_policies: IndexMap<String, ForwardingPolicy>,
    prop_map: ForwardingMap,
    action_policies: IndexMap<String, ForwardingPolicy>,
    action_map: ForwardingMap,
    action_handlers: IndexMap<String, ActionHandler>,
    command_times: IndexMap<usize, f64>,
    dirtifier: Prop<bool>,
    block: Option<Box<dyn Block>>,
    attached: bool,
    outbox: Vec<PendingAction>,
    resolve_requested: bool,
}

impl Node {
    /// Create an unattached node with the given port counts.
    pub fn new(unique_id: impl Into<String>, num_inputs: usize, num_outputs: usize) -> Self {
        let dirtifier = PropertyCell::dirtifier();
        let directory = PropertyDirectory::new();
        directory.insert(dirtifier.id(), dirtifier.source());
        let (props, dirtifier) = PropertyStore::seeded(dirtifier);

        let mut prop_policies = IndexMap::new();
        prop_policies.insert(String::new(), ForwardingPolicy::OneToOne);
        let mut action_policies = IndexMap::new();
        action_policies.insert(String::new(), ForwardingPolicy::OneToOne);

        Self {
            unique_id: unique_id.into(),
            num_inputs,
            num_outputs,
            props,
            directory,
            resolvers: Vec::new(),
            clean_callbacks: IndexMap::new(),
            prop_policies,
            prop_map: ForwardingMap::new(),
            action_policies,
            action_map: ForwardingMap::new(),
            action_handlers: IndexMap::new(),
            command_times: IndexMap::new(),
            dirtifier: Prop::new(dirtifier),
            block: None,
            attached: false,
            outbox: Vec::new(),
            resolve_requested: false,
        }
    }

    /// Build the node for a block: register everything the block declares
    /// and reconcile its defaults.
    pub fn from_block<B: Block>(mut block: B) -> Result<Self> {
        let mut node = Self::new(
            block.unique_id(),
            block.num_input_ports(),
            block.num_output_ports(),
        );
        block.register(&mut node)?;
        node.init_props()?;
        node.block = Some(Box::new(block));
        Ok(node)
    }

    /// Unique id of the block, such as `0/Radio#0`.
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Number of input ports the block declared.
    pub fn num_input_ports(&self) -> usize {
        self.num_inputs
    }

    /// Number of output ports the block declared.
    pub fn num_output_ports(&self) -> usize {
        self.num_outputs
    }

    /// The framework property that is dirty on every resolution. Resolvers
    /// listing it as an input run on every pass.
    pub fn always_dirty(&self) -> Prop<bool> {
        self.dirtifier
    }

    /// Register a property with a default value.
    ///
    /// Fails with a key collision if the node already has a property with
    /// this id and source.
    pub fn register_property<T: PropertyType>(
        &mut self,
        id: &str,
        source: SourceInfo,
        default: T,
    ) -> Result<Prop<T>> {
        let cell = PropertyCell::new(id, source, T::KIND, Some(default.into_value()));
        self.register_cell(cell).map(Prop::new)
    }

    /// Register a property without a default. It cannot be read until it is
    /// first written.
    pub fn register_optional_property<T: PropertyType>(
        &mut self,
        id: &str,
        source: SourceInfo,
    ) -> Result<Prop<T>> {
        let cell = PropertyCell::new(id, source, T::KIND, None);
        self.register_cell(cell).map(Prop::new)
    }

    /// Register a property whose settled value is reported to `on_clean`
    /// after every resolution that changed it.
    pub fn register_property_with_callback<T, F>(
        &mut self,
        id: &str,
        source: SourceInfo,
        default: T,
        mut on_clean: F,
    ) -> Result<Prop<T>>
    where
        T: PropertyType,
        F: FnMut(&T) + Send + 'static,
    {
        let prop = self.register_property(id, source, default)?;
        let callback: CleanCallback = Box::new(move |value: &PropertyValue| {
            if let Some(value) = T::from_value(value) {
                on_clean(&value);
            }
        });
        self.clean_callbacks.insert(prop.handle().0, callback);
        Ok(prop)
    }

    pub(crate) fn register_cell(&mut self, cell: PropertyCell) -> Result<usize> {
        let (id, source) = (cell.id().to_string(), cell.source());
        let index = self.props.register(cell)?;
        self.directory.insert(&id, source);
        Ok(index)
    }

    /// Add a resolver reading `inputs` and writing `outputs`. Resolvers run in
    /// the order they were added.
    pub fn add_resolver<I, O, F>(&mut self, inputs: I, outputs: O, resolver: F) -> Result<()>
    where
        I: IntoIterator<Item = PropHandle>,
        O: IntoIterator<Item = PropHandle>,
        F: FnMut(&mut PropertyAccess<'_>) -> Result<()> + Send + 'static,
    {
        let inputs: SmallVec<[usize; 4]> = inputs.into_iter().map(|h| h.0).collect();
        let outputs: SmallVec<[usize; 4]> = outputs.into_iter().map(|h| h.0).collect();
        if let Some(&index) = inputs
            .iter()
            .chain(&outputs)
            .find(|&&index| !self.props.contains(index))
        {
            return Err(GraphError::InvalidHandle {
                node: self.unique_id.clone(),
                index,
            });
        }
        self.resolvers.push(Resolver {
            inputs,
            outputs,
            func: Box::new(resolver),
        });
        Ok(())
    }

    /// Set a user property on the given instance.
    pub fn set_property<T: PropertyType>(&mut self, id: &str, value: T, instance: usize) -> Result<()> {
        self.set_property_at(id, value, SourceInfo::user(instance))
    }

    /// Set the property with the given id and source.
    ///
    /// Writing the value the property already holds does nothing. Otherwise
    /// the node resolves: locally when unattached, across the whole graph
    /// when attached. If that resolution fails, every property of the node
    /// is put back to its previous value.
    pub fn set_property_at<T: PropertyType>(
        &mut self,
        id: &str,
        value: T,
        source: SourceInfo,
    ) -> Result<()> {
        let index = self.find_property(id, source)?;
        self.write_and_resolve(|props| props.force_write(index, value.into_value()))
    }

    /// Read a user property on the given instance.
    pub fn get_property<T: PropertyType>(&self, id: &str, instance: usize) -> Result<T> {
        self.get_property_at(id, SourceInfo::user(instance))
    }

    /// Read the property with the given id and source.
    pub fn get_property_at<T: PropertyType>(&self, id: &str, source: SourceInfo) -> Result<T> {
        let index = self.find_property(id, source)?;
        read_typed(lookup(&self.props, &self.unique_id, PropHandle(index))?)
    }

    /// Set several user properties from a `key=value,key:instance=value`
    /// string. Values are parsed according to each property's type and
    /// resolution runs once, after all of them are written.
    pub fn set_properties(&mut self, assignments: &str, instance: usize) -> Result<()> {
        let mut writes = Vec::new();
        for pair in assignments.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, text) = pair.split_once('=').ok_or_else(|| {
                GraphError::Config(format!("malformed property assignment `{pair}'"))
            })?;
            let key = key.trim();
            let (id, instance) = match key.split_once(':') {
                Some((id, index)) => {
                    let index = index.trim().parse().map_err(|_| {
                        GraphError::Config(format!(
                            "property id `{id}' contains a malformed instance override"
                        ))
                    })?;
                    (id, index)
                }
                None => (key, instance),
            };
            let Some(index) = self.props.find(id, SourceInfo::user(instance)) else {
                warn!(node = %self.unique_id, id, instance, "cannot set property, no such property");
                continue;
            };
            let kind = lookup(&self.props, &self.unique_id, PropHandle(index))?.kind();
            writes.push((index, PropertyValue::parse(kind, text)?));
        }
        self.write_and_resolve(move |props| {
            writes
                .into_iter()
                .try_for_each(|(index, value)| props.force_write(index, value))
        })
    }

    /// Ids of all user properties.
    pub fn property_ids(&self) -> Vec<String> {
        self.directory.user_ids()
    }

    /// Shared view of the node's property identities.
    pub fn property_directory(&self) -> PropertyDirectory {
        self.directory.clone()
    }

    /// A snapshot of every property, framework ones included.
    pub fn properties(&self) -> Vec<PropertyInfo> {
        self.props.iter().map(|(_, cell)| cell.into()).collect()
    }

    /// Time, in seconds, at which commands on `instance` take effect.
    pub fn set_command_time(&mut self, time: f64, instance: usize) {
        self.command_times.insert(instance, time);
    }

    /// Command time of `instance`. `None` means commands execute as soon as
    /// possible.
    pub fn command_time(&self, instance: usize) -> Option<f64> {
        self.command_times.get(&instance).copied()
    }

    /// Go back to executing commands on `instance` as soon as possible.
    pub fn clear_command_time(&mut self, instance: usize) {
        self.command_times.shift_remove(&instance);
    }

    /// Send an action out through `source`. Unattached nodes drop it.
    pub fn post_action(&mut self, source: SourceInfo, action: impl Into<Arc<Action>>) {
        let action = action.into();
        if self.attached {
            self.outbox.push((source, action));
        } else {
            trace!(node = %self.unique_id, key = %action.key(), "dropping action posted by unattached node");
        }
    }

    /// Whether the node is currently connected into a graph.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    fn find_property(&self, id: &str, source: SourceInfo) -> Result<usize> {
        self.props
            .find(id, source)
            .ok_or_else(|| GraphError::PropertyNotFound {
                node: self.unique_id.clone(),
                id: id.to_string(),
                src: source,
            })
    }

    fn write_and_resolve<F>(&mut self, write: F) -> Result<()>
    where
        F: FnOnce(&mut PropertyStore) -> Result<()>,
    {
        let snapshot = self.props.snapshot();
        if let Err(err) = write(&mut self.props) {
            self.props.restore(snapshot);
            return Err(err);
        }
        if !self.has_dirty() {
            return Ok(());
        }
        if self.attached {
            self.resolve_requested = true;
            return Ok(());
        }

        let result = self.resolve_props();
        self.outbox.clear();
        match result {
            Ok(()) => {
                self.clean_props();
                Ok(())
            }
            Err(err) => {
                self.props.restore(snapshot);
                Err(err)
            }
        }
    }

    pub(crate) fn attach(&mut self) {
        self.attached = true;
    }

    pub(crate) fn detach(&mut self) {
        self.attached = false;
        self.outbox.clear();
        self.resolve_requested = false;
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<PendingAction> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn take_resolve_request(&mut self) -> bool {
        std::mem::take(&mut self.resolve_requested)
    }

    pub(crate) fn check_topology(&self, connected_inputs: &[usize], connected_outputs: &[usize]) -> bool {
        match &self.block {
            Some(block) => block.check_topology(connected_inputs, connected_outputs),
            None => ports_in_range(
                self.num_inputs,
                self.num_outputs,
                connected_inputs,
                connected_outputs,
            ),
        }
    }

    /// Dirty properties that hold up convergence.
    pub(crate) fn dirty_properties(&self) -> Vec<DirtyProperty> {
        self.props
            .iter()
            .filter(|(_, cell)| cell.blocks_convergence())
            .map(|(_, cell)| DirtyProperty {
                node: self.unique_id.clone(),
                source: cell.source(),
                id: cell.id().to_string(),
            })
            .collect()
    }

    pub(crate) fn has_dirty(&self) -> bool {
        self.props.iter().any(|(_, cell)| cell.blocks_convergence())
    }

    /// Copies of every input and output edge property.
    pub(crate) fn edge_properties(&self) -> Vec<PropertyCell> {
        self.props
            .iter()
            .filter(|(_, cell)| cell.source().kind.is_edge())
            .map(|(_, cell)| cell.clone())
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.props.snapshot()
    }

    /// Roll back to `snapshot` and drop anything queued since.
    pub(crate) fn restore(&mut self, snapshot: Snapshot) {
        self.props.restore(snapshot);
        self.outbox.clear();
        self.resolve_requested = false;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("unique_id", &self.unique_id)
            .field("num_inputs", &self.num_inputs)
            .field("num_outputs", &self.num_outputs)
            .field("properties", &self.props.len())
            .field("resolvers", &self.resolvers.len())
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::property::{SourceKind, ALWAYS_DIRTY_ID};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Radio {
        calls: Arc<AtomicUsize>,
    }

    impl Block for Radio {
        fn unique_id(&self) -> String {
            "0/Radio#0".into()
        }

        fn num_input_ports(&self) -> usize {
            1
        }

        fn num_output_ports(&self) -> usize {
            1
        }

        fn register(&mut self, node: &mut Node) -> Result<()> {
            let rate = node.register_property("rate", SourceInfo::user(0), 200e6)?;
            let spp = node.register_property("spp", SourceInfo::user(0), 2000_usize)?;
            let calls = Arc::clone(&self.calls);
            node.add_resolver([rate.handle()], [spp.handle()], move |p| {
                calls.fetch_add(1, Ordering::SeqCst);
                let current = p.get(spp)?;
                p.set(spp, current)
            })
        }

        fn check_topology(&self, inputs: &[usize], _outputs: &[usize]) -> bool {
            inputs.is_empty()
        }
    }

    fn radio() -> (Node, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = Node::from_block(Radio {
            calls: Arc::clone(&calls),
        })
        .unwrap();
        (node, calls)
    }

    #[test]
    fn from_block_registers_and_initializes() {
        let (node, calls) = radio();
        assert_eq!(node.unique_id(), "0/Radio#0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(node.get_property::<f64>("rate", 0).unwrap(), 200e6);
        assert!(node.dirty_properties().is_empty());
        assert!(!node.check_topology(&[0], &[0]));
        assert!(node.check_topology(&[], &[0]));
    }

    #[test]
    fn double_registration_is_key_collision() {
        let mut node = Node::new("DDC", 1, 1);
        node.register_property("rate", SourceInfo::user(0), 1.0).unwrap();
        let err = node
            .register_property("rate", SourceInfo::user(0), 2.0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyCollision);
        node.register_property("rate", SourceInfo::user(1), 2.0).unwrap();
    }

    #[test]
    fn resolver_with_foreign_handle_is_rejected() {
        let mut node = Node::new("DDC", 1, 1);
        let rate = node.register_property("rate", SourceInfo::user(0), 1.0).unwrap();
        let err = node
            .add_resolver([rate.handle()], [PropHandle(42)], |_| Ok(()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup);
    }

    #[test]
    fn missing_property_is_lookup_error() {
        let (mut node, _) = radio();
        assert_eq!(
            node.set_property("freq", 1e9, 0).unwrap_err().kind(),
            ErrorKind::Lookup
        );
        assert_eq!(
            node.get_property::<f64>("rate", 1).unwrap_err().kind(),
            ErrorKind::Lookup
        );
        assert_eq!(
            node.get_property::<i32>("rate", 0).unwrap_err().kind(),
            ErrorKind::Type
        );
    }

    #[test]
    fn setting_equal_value_does_not_resolve() {
        let (mut node, calls) = radio();
        node.set_property("rate", 200e6, 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        node.set_property("rate", 100e6, 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn set_properties_parses_by_type() {
        let (mut node, calls) = radio();
        node.set_properties("rate=100e6, spp=500, bogus=1", 0).unwrap();
        assert_eq!(node.get_property::<f64>("rate", 0).unwrap(), 100e6);
        assert_eq!(node.get_property::<usize>("spp", 0).unwrap(), 500);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let err = node.set_properties("rate:x=1", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = node.set_properties("spp=lots", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(node.get_property::<usize>("spp", 0).unwrap(), 500);
    }

    #[test]
    fn set_properties_honors_instance_override() {
        let mut node = Node::new("DDC", 2, 2);
        node.register_property("freq", SourceInfo::user(0), 0.0).unwrap();
        node.register_property("freq", SourceInfo::user(1), 0.0).unwrap();
        node.init_props().unwrap();

        node.set_properties("freq=1.5,freq:1=2.5", 0).unwrap();
        assert_eq!(node.get_property::<f64>("freq", 0).unwrap(), 1.5);
        assert_eq!(node.get_property::<f64>("freq", 1).unwrap(), 2.5);
    }

    #[test]
    fn property_ids_lists_user_properties() {
        let (node, _) = radio();
        let directory = node.property_directory();
        assert_eq!(node.property_ids(), vec!["rate", "spp"]);
        assert!(directory.contains(ALWAYS_DIRTY_ID, SourceInfo::framework()));

        let framework: Vec<_> = node
            .properties()
            .into_iter()
            .filter(|info| info.source.kind == SourceKind::Framework)
            .collect();
        assert_eq!(framework.len(), 1);
        assert!(framework[0].dirty);
    }

    #[test]
    fn command_time_defaults_to_asap() {
        let mut node = Node::new("RADIO", 0, 2);
        assert_eq!(node.command_time(1), None);
        node.set_command_time(1.25, 1);
        assert_eq!(node.command_time(1), Some(1.25));
        assert_eq!(node.command_time(0), None);
        node.clear_command_time(1);
        assert_eq!(node.command_time(1), None);
    }

    #[test]
    fn command_time_accepts_any_instance() {
        let mut node = Node::new("RADIO", 0, 1);
        node.set_command_time(2.5, usize::MAX);
        node.set_command_time(0.5, 1_000_000_000);
        assert_eq!(node.command_time(usize::MAX), Some(2.5));
        assert_eq!(node.command_time(1_000_000_000), Some(0.5));
        node.clear_command_time(usize::MAX);
        assert_eq!(node.command_time(usize::MAX), None);
        assert_eq!(node.command_time(1_000_000_000), Some(0.5));
    }

    #[test]
    fn unattached_node_drops_posted_actions() {
        let mut node = Node::new("RADIO", 0, 1);
        node.post_action(SourceInfo::output_edge(0), Action::new("x"));
        assert!(node.take_outbox().is_empty());

        node.attach();
        node.post_action(SourceInfo::output_edge(0), Action::new("x"));
        assert_eq!(node.take_outbox().len(), 1);
    }

    #[test]
    fn attached_write_defers_resolution() {
        let (mut node, calls) = radio();
        node.attach();
        node.set_property("rate", 1e6, 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(node.take_resolve_request());
        assert!(!node.take_resolve_request());
    }
}
