//! Transaction state.

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::query::{Predicate, Query, RowSource};
use crate::schema::TableDescriptor;
use crate::store::{Catalog, JournalOp, SchemaOp, TableState};
use crate::types::{RecordId, Timestamp, TransactionId};
use crate::value::{Record, Value, ID_FIELD};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The tables a transaction may write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Only the named tables.
    Tables(BTreeSet<String>),
    /// Every table, including catalog changes. Used by migrations and
    /// restore.
    All,
}

impl Scope {
    /// Creates a scope over the given tables.
    pub fn tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Tables(tables.into_iter().map(Into::into).collect())
    }

    /// Returns true if `table` may be written.
    #[must_use]
    pub fn covers(&self, table: &str) -> bool {
        match self {
            Self::Tables(tables) => tables.contains(table),
            Self::All => true,
        }
    }
}

/// An open write scope.
///
/// Writes go to a private copy of the catalog, so reads inside the
/// transaction see its own writes while other readers keep seeing
/// committed state. Every write is also recorded as a journal operation;
/// committing appends them as one batch.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    scope: Scope,
    working: Catalog,
    ops: Vec<JournalOp>,
    clock: Arc<dyn Clock>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        scope: Scope,
        working: Catalog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            scope,
            working,
            ops: Vec::new(),
            clock,
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the write scope.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns the current time of the engine clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Returns the catalog as this transaction sees it.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.working
    }

    /// Returns the number of buffered operations.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn into_parts(self) -> (Catalog, Vec<JournalOp>) {
        (self.working, self.ops)
    }

    fn writable(&mut self, table: &str) -> CoreResult<&mut TableState> {
        if !self.scope.covers(table) {
            return Err(CoreError::validation(format!(
                "table {table} is outside the transaction scope"
            )));
        }
        self.working.table_mut(table)
    }

    /// Returns a record by id.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown table.
    pub fn get(&self, table: &str, id: RecordId) -> CoreResult<Option<Record>> {
        Ok(self.working.table(table)?.get(id).cloned())
    }

    /// Returns the records of `table` matching `predicate`, in id order.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown table.
    pub fn find(&self, table: &str, predicate: &Predicate) -> CoreResult<Vec<Record>> {
        Query::new().from(table).filter(predicate.clone()).execute(self)
    }

    /// Runs a query against this transaction's view.
    ///
    /// # Errors
    ///
    /// See [`Query::execute`].
    pub fn query(&self, query: &Query) -> CoreResult<Vec<Record>> {
        query.execute(self)
    }

    /// Inserts a record and returns it as stored.
    ///
    /// Declared defaults fill missing columns. A record without `id` gets
    /// the next free id; a record carrying one keeps it.
    ///
    /// # Errors
    ///
    /// - validation error: table outside scope, type or `not_null`
    ///   mismatch, dangling foreign key, negative id
    /// - conflict error: unique violation or an id already in use
    pub fn create(&mut self, table: &str, record: Record) -> CoreResult<Record> {
        self.insert(table, record, true)
    }

    /// Inserts a record like [`create`](Self::create) but leaves foreign
    /// keys unchecked. Callers must run
    /// [`check_table_foreign_keys`](Self::check_table_foreign_keys) before
    /// the scope commits.
    pub(crate) fn create_unchecked(&mut self, table: &str, record: Record) -> CoreResult<Record> {
        self.insert(table, record, false)
    }

    /// Checks the foreign keys of every row in `table` against the
    /// working state.
    pub(crate) fn check_table_foreign_keys(&self, table: &str) -> CoreResult<()> {
        let state = self.working.table(table)?;
        let descriptor = state.descriptor();
        if descriptor.foreign_keys().next().is_none() {
            return Ok(());
        }
        for record in state.rows() {
            self.check_foreign_keys(descriptor, record)?;
        }
        Ok(())
    }

    fn insert(&mut self, table: &str, mut record: Record, check_fk: bool) -> CoreResult<Record> {
        let descriptor = self.writable(table)?.descriptor().clone();

        let explicit = match record.get(ID_FIELD) {
            None | Some(Value::Null) => None,
            Some(_) => Some(record.id().ok_or_else(|| {
                CoreError::validation(format!("{table}.id must be a non-negative integer"))
            })?),
        };
        let id = match explicit {
            Some(id) => id,
            None => self.writable(table)?.next_id(),
        };
        record.insert(ID_FIELD, id);
        descriptor.apply_defaults(&mut record, self.clock.as_ref());
        descriptor.check(&record)?;
        if check_fk {
            self.check_foreign_keys(&descriptor, &record)?;
        }

        let state = self.writable(table)?;
        if explicit.is_some() && state.get(id).is_some() {
            return Err(CoreError::conflict(format!("{table} already holds id {id}")));
        }
        state.put(record.clone())?;

        self.ops.push(JournalOp::Put {
            table: table.to_string(),
            record: record.clone(),
        });
        Ok(record)
    }

    /// Merges `patch` into every record of `table` matching `predicate`
    /// and returns the number of records changed.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the patch touches `id` or breaks a
    /// column constraint, and a conflict error on a unique violation. On
    /// error the whole transaction must be abandoned.
    pub fn update(&mut self, table: &str, patch: &Record, predicate: &Predicate) -> CoreResult<usize> {
        if patch.contains(ID_FIELD) {
            return Err(CoreError::validation(format!("{table}.id cannot be updated")));
        }
        let descriptor = self.writable(table)?.descriptor().clone();
        let targets = self.find(table, predicate)?;

        for mut record in targets.iter().cloned() {
            record.merge(patch);
            descriptor.check(&record)?;
            self.check_foreign_keys(&descriptor, &record)?;
            self.writable(table)?.put(record.clone())?;
            self.ops.push(JournalOp::Put {
                table: table.to_string(),
                record,
            });
        }
        Ok(targets.len())
    }

    /// Updates one record by id and returns it.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the record does not exist, otherwise
    /// as [`update`](Self::update).
    pub fn update_record(&mut self, table: &str, id: RecordId, patch: &Record) -> CoreResult<Record> {
        if self.update(table, patch, &Predicate::id(id))? == 0 {
            return Err(CoreError::record_not_found(table, id));
        }
        self.get(table, id)?
            .ok_or_else(|| CoreError::record_not_found(table, id))
    }

    /// Deletes every record of `table` matching `predicate` and returns
    /// how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a table outside the scope.
    pub fn delete(&mut self, table: &str, predicate: &Predicate) -> CoreResult<usize> {
        self.writable(table)?;
        let ids: Vec<RecordId> = self
            .find(table, predicate)?
            .iter()
            .filter_map(Record::id)
            .collect();
        self.remove_ids(table, &ids)
    }

    /// Deletes one record by id. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a table outside the scope.
    pub fn delete_record(&mut self, table: &str, id: RecordId) -> CoreResult<bool> {
        Ok(self.remove_ids(table, &[id])? == 1)
    }

    /// Removes every row of `table`. Ids are not reused afterwards.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a table outside the scope.
    pub fn clear(&mut self, table: &str) -> CoreResult<usize> {
        let ids: Vec<RecordId> = self.writable(table)?.rows().filter_map(Record::id).collect();
        self.remove_ids(table, &ids)
    }

    fn remove_ids(&mut self, table: &str, ids: &[RecordId]) -> CoreResult<usize> {
        let state = self.writable(table)?;
        let mut removed = Vec::new();
        for id in ids {
            if state.remove(*id).is_some() {
                removed.push(*id);
            }
        }
        let count = removed.len();
        self.ops.extend(removed.into_iter().map(|id| JournalOp::Delete {
            table: table.to_string(),
            id,
        }));
        Ok(count)
    }

    /// Applies a catalog change. Only allowed in an all-tables scope.
    pub(crate) fn apply_schema(&mut self, op: SchemaOp) -> CoreResult<()> {
        if self.scope != Scope::All {
            return Err(CoreError::validation(
                "catalog changes need a scope over every table",
            ));
        }
        self.working.apply_schema(&op)?;
        self.ops.push(JournalOp::Schema(op));
        Ok(())
    }

    fn check_foreign_keys(&self, descriptor: &TableDescriptor, record: &Record) -> CoreResult<()> {
        for (column, target_table, target_column) in descriptor.foreign_keys() {
            let value = record.get_or_null(column);
            if value.is_null() {
                continue;
            }
            let target = self.working.table(target_table)?;
            let found = match target.lookup(target_column, value) {
                Some(rows) => !rows.is_empty(),
                None => target.rows().any(|r| r.get(target_column) == Some(value)),
            };
            if !found {
                return Err(CoreError::validation(format!(
                    "{}.{column} = {value} has no match in {target_table}.{target_column}",
                    descriptor.name()
                )));
            }
        }
        Ok(())
    }
}

impl RowSource for Transaction {
    fn scan(&self, table: &str) -> CoreResult<Vec<Record>> {
        self.working.scan(table)
    }

    fn lookup(&self, table: &str, column: &str, value: &Value) -> CoreResult<Option<Vec<Record>>> {
        self.working.lookup(table, column, value)
    }
}
