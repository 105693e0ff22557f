//! Property Sources
//!
//! A property is identified by its id plus a [`SourceInfo`]: where the value
//! comes from (the user, an input or output edge, or the framework) and which
//! instance (port or channel) it belongs to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a property's value originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// Set by the user through the node API.
    User,
    /// Shared with the upstream neighbor across an input port.
    InputEdge,
    /// Shared with the downstream neighbor across an output port.
    OutputEdge,
    /// Owned by the framework itself.
    Framework,
}

impl SourceKind {
    /// Whether this is an input or output edge.
    pub fn is_edge(self) -> bool {
        matches!(self, SourceKind::InputEdge | SourceKind::OutputEdge)
    }

    /// The opposite edge kind. Non-edge kinds are returned unchanged.
    pub fn invert(self) -> Self {
        match self {
            SourceKind::InputEdge => SourceKind::OutputEdge,
            SourceKind::OutputEdge => SourceKind::InputEdge,
            other => other,
        }
    }

    /// Canonical upper-case name, as used in log output.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::User => "USER",
            SourceKind::InputEdge => "INPUT_EDGE",
            SourceKind::OutputEdge => "OUTPUT_EDGE",
            SourceKind::Framework => "FRAMEWORK",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source kind plus instance (port or channel index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceInfo {
    pub kind: SourceKind,
    pub instance: usize,
}

impl SourceInfo {
    /// A source of the given kind. `instance` is the port number for edges.
    pub fn new(kind: SourceKind, instance: usize) -> Self {
        Self { kind, instance }
    }

    /// A user property on `instance`.
    pub fn user(instance: usize) -> Self {
        Self::new(SourceKind::User, instance)
    }

    /// An edge property on input `port`.
    pub fn input_edge(port: usize) -> Self {
        Self::new(SourceKind::InputEdge, port)
    }

    /// An edge property on output `port`.
    pub fn output_edge(port: usize) -> Self {
        Self::new(SourceKind::OutputEdge, port)
    }

    /// The source of properties the framework owns.
    pub fn framework() -> Self {
        Self::new(SourceKind::Framework, 0)
    }

    /// Same instance on the opposite edge kind.
    pub fn inverted(self) -> Self {
        Self::new(self.kind.invert(), self.instance)
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.instance)
    }
}
