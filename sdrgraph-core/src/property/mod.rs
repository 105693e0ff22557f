//! Properties
//!
//! A property is a typed, identified value owned by a node. Besides its value
//! it carries a dirty flag, set whenever the value changes and cleared when a
//! resolution pass settles, and an access mode that controls who may write it.
//!
//! # Handles
//!
//! Registration returns a [`Prop<T>`], a typed index into the owning node's
//! registry. Resolvers receive handles rather than references, so the node
//! can hand out write access per resolver without aliasing. [`PropHandle`] is
//! the type-erased form used in resolver input and output lists.

mod cell;
mod source;
mod store;
mod value;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

pub use cell::{AccessMode, ALWAYS_DIRTY_ID};
pub use source::{SourceInfo, SourceKind};
pub use value::{PropertyType, PropertyValue, ValueKind};

pub(crate) use cell::PropertyCell;
pub(crate) use store::{PropertyStore, Snapshot};

/// Type-erased handle to a property registered on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropHandle(pub(crate) usize);

impl PropHandle {
    /// Index into the owning node's registry.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Typed handle to a property registered on a node.
pub struct Prop<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Prop<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// The untyped handle, for resolver input and output lists.
    pub fn handle(self) -> PropHandle {
        PropHandle(self.index)
    }
}

impl<T> Clone for Prop<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Prop<T> {}

impl<T> PartialEq for Prop<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Prop<T> {}

impl<T> fmt::Debug for Prop<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Prop").field(&self.index).finish()
    }
}

impl<T> From<Prop<T>> for PropHandle {
    fn from(prop: Prop<T>) -> Self {
        prop.handle()
    }
}

/// Read-only snapshot of one property, for introspection.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PropertyInfo {
    pub id: String,
    pub source: SourceInfo,
    pub kind: ValueKind,
    pub value: Option<PropertyValue>,
    pub dirty: bool,
    /// Created by edge forwarding rather than by the node itself.
    pub dynamic: bool,
}

impl From<&PropertyCell> for PropertyInfo {
    fn from(cell: &PropertyCell) -> Self {
        Self {
            id: cell.id().to_string(),
            source: cell.source(),
            kind: cell.kind(),
            value: cell.value().cloned(),
            dirty: cell.is_dirty(),
            dynamic: cell.is_dynamic(),
        }
    }
}

/// Node-scoped list of property identities.
///
/// Cloning shares the underlying list, so a caller can keep a directory and
/// query it without going through the graph that owns the node.
#[derive(Debug, Clone, Default)]
pub struct PropertyDirectory {
    entries: Arc<RwLock<Vec<(String, SourceInfo)>>>,
}

impl PropertyDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, id: &str, source: SourceInfo) {
        self.entries.write().push((id.to_string(), source));
    }

    /// Ids of all user properties, in registration order. Ids registered on
    /// several instances are listed once per instance.
    pub fn user_ids(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, source)| source.kind == SourceKind::User)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether a property with this id and source is registered.
    pub fn contains(&self, id: &str, source: SourceInfo) -> bool {
        self.entries
            .read()
            .iter()
            .any(|(entry, src)| entry == id && *src == source)
    }

    /// Number of registered properties, of every source kind.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
