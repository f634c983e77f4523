//! Where query rows come from.

use crate::error::CoreResult;
use crate::store::Catalog;
use crate::value::{Record, Value};

/// Read access to tables, as seen by a query.
///
/// Implemented by the committed [`Catalog`], by the engine (committed
/// state) and by a transaction (its own pending writes over committed
/// state).
pub trait RowSource {
    /// Returns every row of `table` in id order.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown table.
    fn scan(&self, table: &str) -> CoreResult<Vec<Record>>;

    /// Returns the rows whose `column` equals `value` through an index,
    /// or `None` if no single-column index covers `column`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown table.
    fn lookup(&self, table: &str, column: &str, value: &Value) -> CoreResult<Option<Vec<Record>>> {
        let _ = (table, column, value);
        Ok(None)
    }
}

impl RowSource for Catalog {
    fn scan(&self, table: &str) -> CoreResult<Vec<Record>> {
        Ok(self.table(table)?.rows().cloned().collect())
    }

    fn lookup(&self, table: &str, column: &str, value: &Value) -> CoreResult<Option<Vec<Record>>> {
        Ok(self
            .table(table)?
            .lookup(column, value)
            .map(|rows| rows.into_iter().cloned().collect()))
    }
}

impl<S: RowSource + ?Sized> RowSource for &S {
    fn scan(&self, table: &str) -> CoreResult<Vec<Record>> {
        (**self).scan(table)
    }

    fn lookup(&self, table: &str, column: &str, value: &Value) -> CoreResult<Option<Vec<Record>>> {
        (**self).lookup(table, column, value)
    }
}
