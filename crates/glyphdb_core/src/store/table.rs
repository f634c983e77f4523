//! In-memory state of one table.

use crate::error::{CoreError, CoreResult};
use crate::schema::TableDescriptor;
use crate::store::index::ColumnIndex;
use crate::types::RecordId;
use crate::value::{Record, Value, ID_FIELD};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rows, indexes and the id counter of one table.
///
/// Rows are kept in id order, so a full scan returns records in creation
/// order.
#[derive(Debug, Clone)]
pub struct TableState {
    descriptor: Arc<TableDescriptor>,
    rows: BTreeMap<RecordId, Record>,
    indexes: Vec<ColumnIndex>,
    next_id: u64,
}

impl TableState {
    /// Creates an empty table.
    #[must_use]
    pub fn new(descriptor: TableDescriptor) -> Self {
        let indexes = descriptor
            .indexes()
            .iter()
            .cloned()
            .map(ColumnIndex::new)
            .collect();
        Self {
            descriptor: Arc::new(descriptor),
            rows: BTreeMap::new(),
            indexes,
            next_id: 1,
        }
    }

    /// Returns the table descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns a row by id.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.rows.get(&id)
    }

    /// Iterates rows in id order.
    pub fn rows(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }

    /// Returns the id the next inserted record without one will get.
    ///
    /// Nothing is reserved: a successful [`put`](Self::put) of that id is
    /// what advances the counter.
    #[must_use]
    pub fn next_id(&self) -> RecordId {
        RecordId::new(self.next_id)
    }

    /// Returns the record holding `record`'s key in some unique index,
    /// other than `id` itself.
    #[must_use]
    pub fn unique_conflict(&self, id: RecordId, record: &Record) -> Option<CoreError> {
        self.indexes
            .iter()
            .find(|index| index.conflict(id, record).is_some())
            .map(|index| index.violation(self.name(), record))
    }

    /// Inserts or replaces a record. The record must carry its id.
    ///
    /// Unique indexes are checked before anything changes, so a failed put
    /// leaves the table untouched.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a missing id or a unique violation.
    pub fn put(&mut self, record: Record) -> CoreResult<()> {
        let id = record.id().ok_or_else(|| {
            CoreError::validation(format!("record for {} has no id", self.name()))
        })?;
        if let Some(err) = self.unique_conflict(id, &record) {
            return Err(err);
        }

        if let Some(old) = self.rows.get(&id) {
            for index in &mut self.indexes {
                index.remove(id, old);
            }
        }
        let name = self.descriptor.name().to_string();
        for index in &mut self.indexes {
            index.insert(&name, id, &record)?;
        }
        self.rows.insert(id, record);
        self.next_id = self.next_id.max(id.as_u64() + 1);
        Ok(())
    }

    /// Removes a record.
    pub fn remove(&mut self, id: RecordId) -> Option<Record> {
        let record = self.rows.remove(&id)?;
        for index in &mut self.indexes {
            index.remove(id, &record);
        }
        Some(record)
    }

    /// Removes every row. The id counter keeps its value.
    pub fn clear(&mut self) -> usize {
        let count = self.rows.len();
        self.rows.clear();
        for index in &mut self.indexes {
            *index = ColumnIndex::new(index.def().clone());
        }
        count
    }

    /// Looks up rows by a single-column index.
    ///
    /// Returns `None` when `column` has no single-column index.
    #[must_use]
    pub fn lookup(&self, column: &str, value: &Value) -> Option<Vec<&Record>> {
        if column == ID_FIELD {
            let id = value.as_integer().and_then(|i| u64::try_from(i).ok())?;
            return Some(self.rows.get(&RecordId::new(id)).into_iter().collect());
        }
        let def = self.descriptor.index_on(column)?;
        let index = self.indexes.iter().find(|i| i.def().name == def.name)?;
        Some(
            index
                .lookup(std::slice::from_ref(value))
                .into_iter()
                .filter_map(|id| self.rows.get(&id))
                .collect(),
        )
    }

    /// Returns a copy of this table under a new descriptor, rebuilding
    /// every index.
    ///
    /// # Errors
    ///
    /// Returns a unique violation if existing rows break a new unique index.
    pub fn redefine(&self, descriptor: TableDescriptor) -> CoreResult<Self> {
        self.rebuild(descriptor, None)
    }

    /// Like [`redefine`](Self::redefine), also stripping `column` from rows.
    ///
    /// # Errors
    ///
    /// Returns a unique violation if rebuilding an index fails.
    pub fn without_column(&self, descriptor: TableDescriptor, column: &str) -> CoreResult<Self> {
        self.rebuild(descriptor, Some(column))
    }

    fn rebuild(&self, descriptor: TableDescriptor, strip: Option<&str>) -> CoreResult<Self> {
        let mut table = Self::new(descriptor);
        table.next_id = self.next_id;
        for record in self.rows.values() {
            let mut record = record.clone();
            if let Some(column) = strip {
                record.remove(column);
            }
            table.put(record)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{compile_tables, parse_schema};

    fn users() -> TableState {
        let schema = parse_schema("TABLE: users\nemail: text unique\nteam: text").unwrap();
        TableState::new(compile_tables(&schema.tables).unwrap().remove(0))
    }

    fn row(id: i64, email: &str, team: &str) -> Record {
        Record::new().with("id", id).with("email", email).with("team", team)
    }

    #[test]
    fn put_get_and_lookup() {
        let mut t = users();
        t.put(row(1, "a@x", "red")).unwrap();
        t.put(row(2, "b@x", "red")).unwrap();

        assert_eq!(t.len(), 2);
        assert_eq!(t.get(RecordId::new(2)).unwrap().text("email"), Some("b@x"));
        let red = t.lookup("team", &Value::from("red")).unwrap();
        assert_eq!(red.len(), 2);
        assert_eq!(t.lookup("id", &Value::Integer(1)).unwrap().len(), 1);
        assert!(t.lookup("undeclared", &Value::Null).is_none());
    }

    #[test]
    fn failed_put_changes_nothing() {
        let mut t = users();
        t.put(row(1, "a@x", "red")).unwrap();
        t.put(row(2, "b@x", "blue")).unwrap();

        let err = t.put(row(2, "a@x", "green")).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(t.get(RecordId::new(2)).unwrap().text("team"), Some("blue"));
        assert_eq!(t.lookup("team", &Value::from("blue")).unwrap().len(), 1);
    }

    #[test]
    fn replacing_reindexes() {
        let mut t = users();
        t.put(row(1, "a@x", "red")).unwrap();
        t.put(row(1, "a@x", "blue")).unwrap();
        assert!(t.lookup("team", &Value::from("red")).unwrap().is_empty());
        assert_eq!(t.lookup("team", &Value::from("blue")).unwrap().len(), 1);
    }

    #[test]
    fn ids_are_not_reused() {
        let mut t = users();
        let id = t.next_id();
        t.put(row(id.as_i64(), "a@x", "red")).unwrap();
        t.remove(id).unwrap();
        t.clear();
        assert_eq!(t.next_id(), RecordId::new(2));
        t.put(row(10, "z@x", "red")).unwrap();
        assert_eq!(t.next_id(), RecordId::new(11));
    }

    #[test]
    fn failed_put_keeps_counter() {
        let mut t = users();
        t.put(row(1, "a@x", "red")).unwrap();
        t.put(row(2, "a@x", "red")).unwrap_err();
        assert_eq!(t.next_id(), RecordId::new(2));
    }
}
