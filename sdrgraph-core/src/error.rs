//! Error Types
//!
//! Every fallible operation in the crate returns [`GraphError`]. Variants map
//! one-to-one onto the failure kinds a caller may want to react to, and
//! [`GraphError::kind`] collapses them into a small [`ErrorKind`] for callers
//! that only care about the category.

use std::fmt;

use thiserror::Error;

use crate::property::{SourceInfo, ValueKind};

/// Coarse classification of a [`GraphError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A property, node or port could not be found.
    Lookup,
    /// A property was written without write access, or read before it held a value.
    Access,
    /// A property with the same id and source was registered twice.
    KeyCollision,
    /// The requested connection or graph layout is invalid.
    Topology,
    /// Property resolution could not reach a consistent state.
    Resolve,
    /// A value did not match the type of the property it was written to.
    Type,
    /// Invalid configuration: forwarding maps, config files, property strings.
    Config,
    /// Non-recoverable failure of the action machinery.
    Fatal,
}

/// A property that was still dirty when a resolution pass gave up.
#[derive(Debug, Clone, PartialEq)]
pub struct DirtyProperty {
    /// Unique id of the node owning the property.
    pub node: String,
    /// Source of the property.
    pub source: SourceInfo,
    /// Property id.
    pub id: String,
}

impl fmt::Display for DirtyProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{} {}]", self.node, self.source, self.id)
    }
}

/// Errors produced by properties, nodes and graphs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// No property with this id and source exists on the node.
    #[error("property `{id}' [{src}] not found on {node}")]
    PropertyNotFound {
        node: String,
        id: String,
        src: SourceInfo,
    },

    /// The node id does not refer to a node owned by the graph.
    #[error("node #{0} not found in graph")]
    NodeNotFound(usize),

    /// A property handle that does not belong to the node it was used on.
    #[error("property handle #{index} is not registered on {node}")]
    InvalidHandle { node: String, index: usize },

    /// Write without write access, or read of a property that never held a value.
    #[error("access violation on property `{id}': {reason}")]
    AccessViolation { id: String, reason: String },

    /// A property with identical id and source is already registered.
    #[error("attempting to double-register property `{id}' [{src}]")]
    KeyCollision { id: String, src: SourceInfo },

    /// Invalid connection or invalid use of ports.
    #[error("topology error: {0}")]
    Topology(String),

    /// A resolver failed, or two resolvers disagreed about an output.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// A resolution pass terminated with properties still dirty.
    #[error("could not resolve properties: {}", format_dirty(.props))]
    Unresolved { props: Vec<DirtyProperty> },

    /// The value kind does not match the registered property kind.
    #[error("type error on property `{id}': expected {expected}, got {found}")]
    Type {
        id: String,
        expected: ValueKind,
        found: ValueKind,
    },

    /// Invalid forwarding map, configuration document or property string.
    #[error("configuration error: {0}")]
    Config(String),

    /// Action delivery did not converge.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The graph state was entered again while already borrowed by this thread.
    #[error("graph is busy: {0}")]
    Busy(String),
}

impl GraphError {
    /// The coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::PropertyNotFound { .. }
            | GraphError::NodeNotFound(_)
            | GraphError::InvalidHandle { .. } => ErrorKind::Lookup,
            GraphError::AccessViolation { .. } => ErrorKind::Access,
            GraphError::KeyCollision { .. } => ErrorKind::KeyCollision,
            GraphError::Topology(_) => ErrorKind::Topology,
            GraphError::Resolve(_) | GraphError::Unresolved { .. } => ErrorKind::Resolve,
            GraphError::Type { .. } => ErrorKind::Type,
            GraphError::Config(_) => ErrorKind::Config,
            GraphError::Fatal(_) | GraphError::Busy(_) => ErrorKind::Fatal,
        }
    }
}

fn format_dirty(props: &[DirtyProperty]) -> String {
    props
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = GraphError> = std::result::Result<T, E>;
