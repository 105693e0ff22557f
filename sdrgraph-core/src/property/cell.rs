//! Property Cells
//!
//! A [`PropertyCell`] is the storage behind one registered property: its
//! identity, its current value, its dirty flag and its access mode.
//!
//! # Access Modes
//!
//! Cells are read-only outside of resolution. The owning node grants write
//! access only to the outputs of the resolver that is currently running:
//!
//! - [`AccessMode::ReadWrite`]: any value may be written; a different value
//!   marks the cell dirty.
//! - [`AccessMode::ReadWriteLocked`]: the cell was already written earlier in
//!   this pass. Writing the same value again is a no-op, writing a different
//!   one means two resolvers disagree and fails with a resolve error.
//! - [`AccessMode::ReadOnly`]: any write is an access violation.

use serde::{Deserialize, Serialize};

use super::source::{SourceInfo, SourceKind};
use super::value::{PropertyValue, ValueKind};
use crate::error::{GraphError, Result};

/// Id of the framework property that never becomes clean.
pub const ALWAYS_DIRTY_ID: &str = "__ALWAYS_DIRTY__";

/// Write permission of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    ReadWriteLocked,
}

impl AccessMode {
    /// Whether values may be written in this mode.
    pub fn is_writable(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

/// Storage for one registered property.
#[derive(Debug, Clone)]
pub(crate) struct PropertyCell {
    id: String,
    source: SourceInfo,
    kind: ValueKind,
    value: Option<PropertyValue>,
    dirty: bool,
    access: AccessMode,
    always_dirty: bool,
    dynamic: bool,
}

impl PropertyCell {
    /// Create a cell. New cells start dirty so the first resolution sees them.
    pub(crate) fn new(
        id: impl Into<String>,
        source: SourceInfo,
        kind: ValueKind,
        value: Option<PropertyValue>,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            kind,
            value,
            dirty: true,
            access: AccessMode::ReadOnly,
            always_dirty: false,
            dynamic: false,
        }
    }

    /// The framework cell that reports dirty on every resolution.
    pub(crate) fn dirtifier() -> Self {
        Self {
            always_dirty: true,
            ..Self::new(
                ALWAYS_DIRTY_ID,
                SourceInfo::framework(),
                ValueKind::Bool,
                Some(PropertyValue::Bool(true)),
            )
        }
    }

    /// Copy of this cell with a new source, used when an edge property is
    /// injected into a neighbor.
    pub(crate) fn clone_with_source(&self, source: SourceInfo) -> Self {
        Self {
            dynamic: true,
            ..Self::new(self.id.clone(), source, self.kind, self.value.clone())
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn source(&self) -> SourceInfo {
        self.source
    }

    pub(crate) fn kind(&self) -> ValueKind {
        self.kind
    }

    pub(crate) fn access(&self) -> AccessMode {
        self.access
    }

    pub(crate) fn set_access(&mut self, access: AccessMode) {
        self.access = access;
    }

    pub(crate) fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.value.is_some()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.always_dirty || self.dirty
    }

    /// Whether the graph should count this cell when looking for dirty nodes.
    pub(crate) fn blocks_convergence(&self) -> bool {
        self.is_dirty() && self.source.kind != SourceKind::Framework
    }

    pub(crate) fn value(&self) -> Option<&PropertyValue> {
        self.value.as_ref()
    }

    /// Read the value. Reading a cell that never held a value is an error.
    pub(crate) fn get(&self) -> Result<&PropertyValue> {
        self.value.as_ref().ok_or_else(|| GraphError::AccessViolation {
            id: self.id.clone(),
            reason: "attempting to read property before it was initialized".into(),
        })
    }

    /// Write a value, honoring the access mode.
    pub(crate) fn set(&mut self, value: PropertyValue) -> Result<()> {
        self.check_kind(&value)?;
        match self.access {
            AccessMode::ReadWrite => {
                if self.value.as_ref() != Some(&value) {
                    self.value = Some(value);
                    self.dirty = true;
                }
                Ok(())
            }
            AccessMode::ReadWriteLocked => match &self.value {
                Some(current) if *current != value => Err(GraphError::Resolve(format!(
                    "attempting to overwrite property `{}' [{}] with a new value after it was locked",
                    self.id, self.source
                ))),
                Some(_) => Ok(()),
                None => {
                    self.value = Some(value);
                    self.dirty = true;
                    Ok(())
                }
            },
            AccessMode::ReadOnly => Err(GraphError::AccessViolation {
                id: self.id.clone(),
                reason: format!("property [{}] is read-only", self.source),
            }),
        }
    }

    /// Mark dirty regardless of the value. Requires write access.
    pub(crate) fn force_dirty(&mut self) -> Result<()> {
        if !self.access.is_writable() {
            return Err(GraphError::AccessViolation {
                id: self.id.clone(),
                reason: "cannot force a read-only property dirty".into(),
            });
        }
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Restore a value from a snapshot, bypassing access checks.
    pub(crate) fn restore(&mut self, value: Option<PropertyValue>) {
        self.value = value;
        self.dirty = false;
        self.access = AccessMode::ReadOnly;
    }

    fn check_kind(&self, value: &PropertyValue) -> Result<()> {
        if value.kind() == self.kind {
            Ok(())
        } else {
            Err(GraphError::Type {
                id: self.id.clone(),
                expected: self.kind,
                found: value.kind(),
            })
        }
    }
}
