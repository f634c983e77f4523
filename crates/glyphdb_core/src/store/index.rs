//! Secondary indexes over table rows.

use crate::error::{CoreError, CoreResult};
use crate::schema::{index_key, IndexDef};
use crate::types::RecordId;
use crate::value::{Record, Value};
use std::collections::{BTreeMap, BTreeSet};

/// An ordered index from column values to record ids.
///
/// Records with a null or missing indexed column are not indexed, so they
/// never collide in a unique index.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    def: IndexDef,
    entries: BTreeMap<Vec<Value>, BTreeSet<RecordId>>,
}

impl ColumnIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: BTreeMap::new(),
        }
    }

    /// Returns the index definition.
    #[must_use]
    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    /// Returns the id of another record already holding `record`'s key in
    /// a unique index.
    #[must_use]
    pub fn conflict(&self, id: RecordId, record: &Record) -> Option<RecordId> {
        if !self.def.unique {
            return None;
        }
        let key = index_key(&self.def, record)?;
        self.entries
            .get(&key)
            .and_then(|ids| ids.iter().copied().find(|other| *other != id))
    }

    /// Adds `record` under `id`.
    ///
    /// # Errors
    ///
    /// Returns a unique violation if another record holds the same key.
    pub fn insert(&mut self, table: &str, id: RecordId, record: &Record) -> CoreResult<()> {
        if self.conflict(id, record).is_some() {
            return Err(self.violation(table, record));
        }
        if let Some(key) = index_key(&self.def, record) {
            self.entries.entry(key).or_default().insert(id);
        }
        Ok(())
    }

    /// Removes `record` stored under `id`.
    pub fn remove(&mut self, id: RecordId, record: &Record) {
        if let Some(key) = index_key(&self.def, record) {
            if let Some(ids) = self.entries.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Returns the ids stored under `key`, ascending.
    #[must_use]
    pub fn lookup(&self, key: &[Value]) -> Vec<RecordId> {
        self.entries
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Builds the unique violation error for `record`.
    #[must_use]
    pub fn violation(&self, table: &str, record: &Record) -> CoreError {
        let key = index_key(&self.def, record)
            .map(|values| {
                values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        CoreError::unique_violation(table, &self.def.name, format!("({key})"))
    }
}
