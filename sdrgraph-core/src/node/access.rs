//! Resolver Access
//!
//! Resolvers never touch a node directly. They receive a [`PropertyAccess`]
//! that reads any property of the node and writes those the node has opened
//! for the running resolver. Actions posted through it are queued on the node
//! and delivered once the current operation completes.

use std::sync::Arc;

use super::action::Action;
use crate::error::{GraphError, Result};
use crate::property::{
    Prop, PropHandle, PropertyCell, PropertyStore, PropertyType, PropertyValue, SourceInfo,
};

/// An action waiting to be handed to the graph.
pub(crate) type PendingAction = (SourceInfo, Arc<Action>);

/// Property access handed to a resolver while it runs.
pub struct PropertyAccess<'a> {
    node: &'a str,
    props: &'a mut PropertyStore,
    outbox: &'a mut Vec<PendingAction>,
}

impl<'a> PropertyAccess<'a> {
    pub(crate) fn new(
        node: &'a str,
        props: &'a mut PropertyStore,
        outbox: &'a mut Vec<PendingAction>,
    ) -> Self {
        Self {
            node,
            props,
            outbox,
        }
    }

    /// Unique id of the node being resolved.
    pub fn node_id(&self) -> &str {
        self.node
    }

    /// Read a property.
    pub fn get<T: PropertyType>(&self, prop: Prop<T>) -> Result<T> {
        read_typed(lookup(self.props, self.node, prop.handle())?)
    }

    /// Write a property. Only outputs of the running resolver are writable.
    pub fn set<T: PropertyType>(&mut self, prop: Prop<T>, value: T) -> Result<()> {
        self.set_value(prop.handle(), value.into_value())
    }

    /// Read a property without knowing its type.
    pub fn value(&self, handle: impl Into<PropHandle>) -> Result<&PropertyValue> {
        lookup(self.props, self.node, handle.into())?.get()
    }

    /// Write an untyped value. The kind must match the property.
    pub fn set_value(&mut self, handle: impl Into<PropHandle>, value: PropertyValue) -> Result<()> {
        lookup_mut(self.props, self.node, handle.into())?.set(value)
    }

    /// Mark a writable property dirty even though its value did not change.
    pub fn force_dirty(&mut self, handle: impl Into<PropHandle>) -> Result<()> {
        lookup_mut(self.props, self.node, handle.into())?.force_dirty()
    }

    /// Whether the property holds a value. Unknown handles are never valid.
    pub fn is_valid(&self, handle: impl Into<PropHandle>) -> bool {
        self.props
            .cell(handle.into().0)
            .is_some_and(PropertyCell::is_valid)
    }

    /// Whether the property changed since the node was last clean.
    pub fn is_dirty(&self, handle: impl Into<PropHandle>) -> bool {
        self.props
            .cell(handle.into().0)
            .is_some_and(PropertyCell::is_dirty)
    }

    /// Queue an action for delivery across the given port.
    pub fn post_action(&mut self, source: SourceInfo, action: impl Into<Arc<Action>>) {
        self.outbox.push((source, action.into()));
    }

    /// Copy the value of one property into another, bypassing the lock on the
    /// destination. Invalid sources are skipped.
    pub(crate) fn forward(&mut self, from: PropHandle, to: PropHandle) -> Result<()> {
        let Some(value) = lookup(self.props, self.node, from)?.value().cloned() else {
            return Ok(());
        };
        lookup(self.props, self.node, to)?;
        self.props.force_write(to.0, value)
    }
}

pub(crate) fn lookup<'s>(
    props: &'s PropertyStore,
    node: &str,
    handle: PropHandle,
) -> Result<&'s PropertyCell> {
    props.cell(handle.0).ok_or_else(|| GraphError::InvalidHandle {
        node: node.to_string(),
        index: handle.0,
    })
}

fn lookup_mut<'s>(
    props: &'s mut PropertyStore,
    node: &str,
    handle: PropHandle,
) -> Result<&'s mut PropertyCell> {
    props.cell_mut(handle.0).ok_or_else(|| GraphError::InvalidHandle {
        node: node.to_string(),
        index: handle.0,
    })
}

/// Read a cell as a concrete type.
pub(crate) fn read_typed<T: PropertyType>(cell: &PropertyCell) -> Result<T> {
    let value = cell.get()?;
    T::from_value(value).ok_or_else(|| GraphError::Type {
        id: cell.id().to_string(),
        expected: T::KIND,
        found: value.kind(),
    })
}
