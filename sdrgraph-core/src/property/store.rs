//! Property Registry
//!
//! Every node keeps its properties in one [`PropertyStore`]. Cells live in an
//! append-only arena so that handles stay valid for the node's lifetime, and a
//! secondary index groups them by source kind for the lookups the forwarding
//! machinery performs.

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::cell::{AccessMode, PropertyCell};
use super::source::{SourceInfo, SourceKind};
use super::value::PropertyValue;
use crate::error::{GraphError, Result};

/// Saved property values, taken before a fallible mutation.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    values: Vec<Option<PropertyValue>>,
}

#[derive(Debug, Default)]
pub(crate) struct PropertyStore {
    cells: Vec<PropertyCell>,
    by_kind: IndexMap<SourceKind, SmallVec<[usize; 8]>>,
}

impl PropertyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A store holding a single cell, returned with its index.
    pub(crate) fn seeded(cell: PropertyCell) -> (Self, usize) {
        let mut store = Self::new();
        let index = store.insert(cell);
        (store, index)
    }

    /// Add a cell and grant it write access until the next clean.
    pub(crate) fn register(&mut self, mut cell: PropertyCell) -> Result<usize> {
        if self.find(cell.id(), cell.source()).is_some() {
            return Err(GraphError::KeyCollision {
                id: cell.id().to_string(),
                src: cell.source(),
            });
        }
        cell.set_access(AccessMode::ReadWrite);
        Ok(self.insert(cell))
    }

    fn insert(&mut self, cell: PropertyCell) -> usize {
        let index = self.cells.len();
        self.by_kind
            .entry(cell.source().kind)
            .or_default()
            .push(index);
        self.cells.push(cell);
        index
    }

    pub(crate) fn find(&self, id: &str, source: SourceInfo) -> Option<usize> {
        self.by_kind.get(&source.kind)?.iter().copied().find(|&i| {
            let cell = &self.cells[i];
            cell.id() == id && cell.source() == source
        })
    }

    pub(crate) fn contains(&self, index: usize) -> bool {
        index < self.cells.len()
    }

    pub(crate) fn cell(&self, index: usize) -> Option<&PropertyCell> {
        self.cells.get(index)
    }

    pub(crate) fn cell_mut(&mut self, index: usize) -> Option<&mut PropertyCell> {
        self.cells.get_mut(index)
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &PropertyCell)> {
        self.cells.iter().enumerate()
    }

    /// Indices of every cell with the given source kind, in registration order.
    pub(crate) fn of_kind(&self, kind: SourceKind) -> impl Iterator<Item = usize> + '_ {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flat_map(|indices| indices.iter().copied())
    }

    pub(crate) fn dirty(&self) -> Vec<usize> {
        self.iter()
            .filter(|(_, cell)| cell.is_dirty())
            .map(|(i, _)| i)
            .collect()
    }

    pub(crate) fn set_access(&mut self, index: usize, access: AccessMode) {
        if let Some(cell) = self.cells.get_mut(index) {
            cell.set_access(access);
        }
    }

    /// Write a value with temporary write access, whatever the current mode.
    pub(crate) fn force_write(&mut self, index: usize, value: PropertyValue) -> Result<()> {
        let Some(cell) = self.cells.get_mut(index) else {
            return Ok(());
        };
        let access = cell.access();
        cell.set_access(AccessMode::ReadWrite);
        let result = cell.set(value);
        cell.set_access(access);
        result
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            values: self.cells.iter().map(|c| c.value().cloned()).collect(),
        }
    }

    /// Put back the values of a snapshot and leave every cell clean and
    /// read-only. Cells registered after the snapshot keep their values.
    pub(crate) fn restore(&mut self, snapshot: Snapshot) {
        let mut values = snapshot.values.into_iter();
        for cell in &mut self.cells {
            match values.next() {
                Some(value) => cell.restore(value),
                None => {
                    cell.mark_clean();
                    cell.set_access(AccessMode::ReadOnly);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::ValueKind;

    fn cell(id: &str, source: SourceInfo, value: f64) -> PropertyCell {
        PropertyCell::new(id, source, ValueKind::Double, Some(PropertyValue::Double(value)))
    }

    #[test]
    fn register_rejects_duplicate_identity() {
        let mut store = PropertyStore::new();
        store.register(cell("rate", SourceInfo::user(0), 1.0)).unwrap();
        store.register(cell("rate", SourceInfo::user(1), 1.0)).unwrap();
        store
            .register(cell("rate", SourceInfo::input_edge(0), 1.0))
            .unwrap();

        let err = store
            .register(cell("rate", SourceInfo::user(0), 2.0))
            .unwrap_err();
        assert!(matches!(err, GraphError::KeyCollision { .. }));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn register_grants_write_access() {
        let mut store = PropertyStore::new();
        let index = store.register(cell("rate", SourceInfo::user(0), 1.0)).unwrap();
        assert_eq!(store.cell(index).unwrap().access(), AccessMode::ReadWrite);
    }

    #[test]
    fn find_matches_id_and_source() {
        let mut store = PropertyStore::new();
        let user = store.register(cell("rate", SourceInfo::user(0), 1.0)).unwrap();
        let edge = store
            .register(cell("rate", SourceInfo::output_edge(0), 1.0))
            .unwrap();

        assert_eq!(store.find("rate", SourceInfo::user(0)), Some(user));
        assert_eq!(store.find("rate", SourceInfo::output_edge(0)), Some(edge));
        assert_eq!(store.find("rate", SourceInfo::input_edge(0)), None);
        assert_eq!(store.of_kind(SourceKind::OutputEdge).collect::<Vec<_>>(), vec![edge]);
    }

    #[test]
    fn force_write_keeps_access_mode() {
        let (mut store, index) = PropertyStore::seeded(cell("rate", SourceInfo::user(0), 1.0));
        store.cell_mut(index).unwrap().mark_clean();
        assert_eq!(store.cell(index).unwrap().access(), AccessMode::ReadOnly);

        store.force_write(index, PropertyValue::Double(2.0)).unwrap();
        let rate = store.cell(index).unwrap();
        assert_eq!(rate.access(), AccessMode::ReadOnly);
        assert!(rate.is_dirty());

        let err = store.force_write(index, PropertyValue::Bool(true)).unwrap_err();
        assert!(matches!(err, GraphError::Type { .. }));
    }

    #[test]
    fn restore_resets_values_and_cleans() {
        let mut store = PropertyStore::new();
        let index = store.register(cell("rate", SourceInfo::user(0), 1.0)).unwrap();
        let snapshot = store.snapshot();

        store
            .cell_mut(index)
            .unwrap()
            .set(PropertyValue::Double(5.0))
            .unwrap();
        let late = store
            .register(cell("gain", SourceInfo::user(0), 3.0))
            .unwrap();

        store.restore(snapshot);
        let rate = store.cell(index).unwrap();
        assert_eq!(rate.value(), Some(&PropertyValue::Double(1.0)));
        assert!(!rate.is_dirty());
        assert_eq!(rate.access(), AccessMode::ReadOnly);

        let gain = store.cell(late).unwrap();
        assert_eq!(gain.value(), Some(&PropertyValue::Double(3.0)));
        assert!(!gain.is_dirty());
    }
}
