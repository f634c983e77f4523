//! The set of tables making up committed state.

use crate::error::{CoreError, CoreResult};
use crate::schema::TableDescriptor;
use crate::store::journal::{CommitBatch, JournalOp, SchemaOp};
use crate::store::table::TableState;
use crate::types::SequenceNumber;
use std::collections::HashMap;
use std::sync::Arc;

/// All tables, in declaration order.
///
/// Tables sit behind `Arc`, so cloning a catalog is cheap and a writer
/// only copies the tables it actually modifies. Committed state is one
/// `Arc<Catalog>`; a commit swaps in a new one.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    database: String,
    order: Vec<String>,
    tables: HashMap<String, Arc<TableState>>,
    sequence: SequenceNumber,
}

impl Catalog {
    /// Creates a catalog with empty tables.
    #[must_use]
    pub fn new(database: impl Into<String>, descriptors: Vec<TableDescriptor>) -> Self {
        let mut catalog = Self {
            database: database.into(),
            ..Self::default()
        };
        for descriptor in descriptors {
            catalog.insert_table(TableState::new(descriptor));
        }
        catalog
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the sequence number of the last applied batch.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.sequence = sequence;
    }

    /// Returns table names in declaration order.
    #[must_use]
    pub fn table_names(&self) -> &[String] {
        &self.order
    }

    /// Returns true if the table exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Returns a table.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the table does not exist.
    pub fn table(&self, name: &str) -> CoreResult<&TableState> {
        self.tables
            .get(name)
            .map(|t| &**t)
            .ok_or_else(|| CoreError::table_not_found(name))
    }

    /// Returns a table for writing, copying it first if shared.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the table does not exist.
    pub fn table_mut(&mut self, name: &str) -> CoreResult<&mut TableState> {
        self.tables
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| CoreError::table_not_found(name))
    }

    /// Returns a descriptor by table name.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name).map(|t| t.descriptor())
    }

    fn insert_table(&mut self, table: TableState) {
        let name = table.name().to_string();
        if !self.tables.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tables.insert(name, Arc::new(table));
    }

    /// Applies a catalog change.
    ///
    /// # Errors
    ///
    /// Returns an error if the target table is missing or rebuilding its
    /// indexes fails.
    pub fn apply_schema(&mut self, op: &SchemaOp) -> CoreResult<()> {
        match op {
            SchemaOp::PutTable(descriptor) => {
                let table = match self.tables.get(descriptor.name()) {
                    Some(existing) => existing.redefine(descriptor.clone())?,
                    None => TableState::new(descriptor.clone()),
                };
                self.insert_table(table);
            }
            SchemaOp::DropTable { table } => {
                if self.tables.remove(table).is_none() {
                    return Err(CoreError::table_not_found(table));
                }
                self.order.retain(|name| name != table);
            }
            SchemaOp::DropColumn { table, column } => {
                let existing = self.table(table)?;
                let descriptor = existing.descriptor().without_column(column)?;
                let rebuilt = existing.without_column(descriptor, column)?;
                self.insert_table(rebuilt);
            }
        }
        Ok(())
    }

    /// Applies one journal operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation does not fit the current tables.
    pub fn apply(&mut self, op: &JournalOp) -> CoreResult<()> {
        match op {
            JournalOp::Schema(schema) => self.apply_schema(schema),
            JournalOp::Put { table, record } => self.table_mut(table)?.put(record.clone()),
            JournalOp::Delete { table, id } => {
                self.table_mut(table)?.remove(*id);
                Ok(())
            }
        }
    }

    /// Replays a recovered batch.
    ///
    /// # Errors
    ///
    /// Returns the first operation error.
    pub fn replay(&mut self, batch: &CommitBatch) -> CoreResult<()> {
        for op in &batch.ops {
            self.apply(op)?;
        }
        self.sequence = batch.sequence;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{compile_tables, parse_schema};
    use crate::types::RecordId;
    use crate::value::Record;

    fn catalog() -> Catalog {
        let schema = parse_schema("TABLE: a\nname: text\nTABLE: b\nref: integer foreign_key(a.id)").unwrap();
        Catalog::new("test", compile_tables(&schema.tables).unwrap())
    }

    #[test]
    fn clones_share_until_written() {
        let mut base = catalog();
        base.table_mut("a")
            .unwrap()
            .put(Record::new().with("id", 1).with("name", "x"))
            .unwrap();

        let mut copy = base.clone();
        copy.table_mut("a").unwrap().remove(RecordId::new(1));

        assert_eq!(base.table("a").unwrap().len(), 1);
        assert_eq!(copy.table("a").unwrap().len(), 0);
    }

    #[test]
    fn replay_applies_ops_in_order() {
        let mut c = catalog();
        let batch = CommitBatch {
            sequence: SequenceNumber::new(4),
            ops: vec![
                JournalOp::Put {
                    table: "a".into(),
                    record: Record::new().with("id", 1).with("name", "x"),
                },
                JournalOp::Schema(SchemaOp::DropColumn {
                    table: "a".into(),
                    column: "name".into(),
                }),
                JournalOp::Delete {
                    table: "b".into(),
                    id: RecordId::new(99),
                },
            ],
        };
        c.replay(&batch).unwrap();

        assert_eq!(c.sequence(), SequenceNumber::new(4));
        let row = c.table("a").unwrap().get(RecordId::new(1)).unwrap();
        assert!(row.get("name").is_none());
        assert!(c.descriptor("a").unwrap().column("name").is_none());
    }

    #[test]
    fn drop_table_updates_order() {
        let mut c = catalog();
        c.apply_schema(&SchemaOp::DropTable { table: "a".into() }).unwrap();
        assert_eq!(c.table_names(), ["b".to_string()]);
        assert!(c.table("a").unwrap_err().is_not_found());
    }
}
