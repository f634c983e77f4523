//! Schema-to-storage compiler.
//!
//! Turns declared [`TableDef`]s into [`TableDescriptor`]s: the one typed
//! description of a table that the store, the transaction layer, the
//! migration manager and the query evaluator all read.
//!
//! Compilation adds the integer identity column `id` when it is not
//! declared, derives one index per column (`<column>_idx`, unique when the
//! column is), appends the declared composite indexes, and checks that
//! defaults fit their column types and that indexes name real columns.
//! Foreign-key targets are checked separately, once every table of a
//! schema is known.

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::schema::model::{Column, ColumnType, Constraint, DefaultValue, IndexDef, TableDef};
use crate::value::{Record, Value, ID_FIELD};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A compiled table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// The declaration this descriptor was compiled from, including alters.
    def: TableDef,
    /// Columns with the identity column first.
    columns: Vec<Column>,
    /// Derived per-column indexes followed by declared ones.
    indexes: Vec<IndexDef>,
}

impl TableDescriptor {
    /// Compiles a declared table.
    ///
    /// # Errors
    ///
    /// Returns a validation error for duplicate columns, more than one
    /// primary key, a non-integer `id`, a default of the wrong type, or an
    /// index naming a missing column.
    pub fn compile(def: &TableDef) -> CoreResult<Self> {
        let table = &def.name;
        let mut seen = HashSet::new();
        for column in &def.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(CoreError::validation(format!(
                    "duplicate column {table}.{}",
                    column.name
                )));
            }
        }

        let primary_keys = def.columns.iter().filter(|c| c.is_primary_key()).count();
        if primary_keys > 1 {
            return Err(CoreError::validation(format!(
                "table {table} has more than one primary key"
            )));
        }

        let mut columns = Vec::with_capacity(def.columns.len() + 1);
        match def.columns.iter().find(|c| c.name == ID_FIELD) {
            Some(id) if id.column_type != ColumnType::Integer => {
                return Err(CoreError::validation(format!(
                    "{table}.id must be an integer, declared {}",
                    id.column_type
                )));
            }
            Some(id) => columns.push(id.clone()),
            None => {
                let id = Column::new(ID_FIELD, ColumnType::Integer);
                columns.push(if primary_keys == 0 {
                    id.with(Constraint::PrimaryKey)
                } else {
                    id.with(Constraint::Unique).with(Constraint::NotNull)
                });
            }
        }
        columns.extend(def.columns.iter().filter(|c| c.name != ID_FIELD).cloned());

        for column in &columns {
            if let Some(default) = column.default_value() {
                let fits = match default {
                    DefaultValue::Literal(v) => column.column_type.accepts(v),
                    DefaultValue::Now => matches!(
                        column.column_type,
                        ColumnType::Datetime | ColumnType::Integer | ColumnType::Json
                    ),
                };
                if !fits {
                    return Err(CoreError::validation(format!(
                        "default of {table}.{} does not fit type {}",
                        column.name, column.column_type
                    )));
                }
            }
        }

        let mut indexes: Vec<IndexDef> = columns
            .iter()
            .filter(|c| c.name != ID_FIELD)
            .map(|c| IndexDef::new(format!("{}_idx", c.name), vec![c.name.clone()], c.is_unique()))
            .collect();

        for index in &def.indexes {
            if index.columns.is_empty() {
                return Err(CoreError::validation(format!(
                    "index {table}.{} has no columns",
                    index.name
                )));
            }
            if let Some(missing) = index
                .columns
                .iter()
                .find(|name| !columns.iter().any(|c| &c.name == *name))
            {
                return Err(CoreError::validation(format!(
                    "index {table}.{} names unknown column {missing}",
                    index.name
                )));
            }
            if indexes.iter().any(|i| i.name == index.name) {
                return Err(CoreError::validation(format!(
                    "duplicate index {table}.{}",
                    index.name
                )));
            }
            indexes.push(index.clone());
        }

        Ok(Self {
            def: def.clone(),
            columns,
            indexes,
        })
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Returns all columns, identity first.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns all indexes.
    #[must_use]
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Looks up a column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the single-column index on `column`, if any.
    #[must_use]
    pub fn index_on(&self, column: &str) -> Option<&IndexDef> {
        self.indexes
            .iter()
            .find(|i| i.columns.len() == 1 && i.columns[0] == column)
    }

    /// Returns this table with the columns and indexes of `alter` added.
    ///
    /// # Errors
    ///
    /// Same as [`compile`](Self::compile).
    pub fn altered(&self, alter: &TableDef) -> CoreResult<Self> {
        let mut def = self.def.clone();
        def.columns.extend(alter.columns.iter().cloned());
        def.indexes.extend(alter.indexes.iter().cloned());
        Self::compile(&def)
    }

    /// Returns this table without a declared index.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the index is not declared or is one
    /// of the derived per-column indexes.
    pub fn without_index(&self, index: &str) -> CoreResult<Self> {
        if !self.def.indexes.iter().any(|i| i.name == index) {
            let derived = self.indexes.iter().any(|i| i.name == index);
            return Err(CoreError::validation(if derived {
                format!("index {}.{index} is derived from a column; drop the column instead", self.name())
            } else {
                format!("unknown index {}.{index}", self.name())
            }));
        }
        let mut def = self.def.clone();
        def.indexes.retain(|i| i.name != index);
        Self::compile(&def)
    }

    /// Returns this table without `column` and every index that uses it.
    ///
    /// # Errors
    ///
    /// Returns a validation error for `id` or an undeclared column.
    pub fn without_column(&self, column: &str) -> CoreResult<Self> {
        if column == ID_FIELD {
            return Err(CoreError::validation(format!(
                "cannot drop identity column {}.id",
                self.name()
            )));
        }
        if !self.def.columns.iter().any(|c| c.name == column) {
            return Err(CoreError::validation(format!(
                "unknown column {}.{column}",
                self.name()
            )));
        }
        let mut def = self.def.clone();
        def.columns.retain(|c| c.name != column);
        def.indexes.retain(|i| !i.columns.iter().any(|c| c == column));
        Self::compile(&def)
    }

    /// Returns the foreign keys of this table as `(column, table, target column)`.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.columns.iter().filter_map(|c| {
            c.foreign_key()
                .map(|(table, target)| (c.name.as_str(), table, target))
        })
    }

    /// Checks that every foreign key names an existing table and column.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first dangling reference.
    pub fn validate_foreign_keys<'a, F>(&self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<&'a TableDescriptor>,
    {
        for (column, table, target) in self.foreign_keys() {
            let found = if table == self.name() {
                self.column(target).is_some()
            } else {
                lookup(table).is_some_and(|t| t.column(target).is_some())
            };
            if !found {
                return Err(CoreError::validation(format!(
                    "{}.{column} references unknown column {table}.{target}",
                    self.name()
                )));
            }
        }
        Ok(())
    }

    /// Fills in declared defaults for columns the record lacks.
    pub fn apply_defaults(&self, record: &mut Record, clock: &dyn Clock) {
        for column in &self.columns {
            if let Some(default) = column.default_value() {
                if !record.contains(&column.name) {
                    record.insert(column.name.clone(), default.resolve(clock));
                }
            }
        }
    }

    /// Checks declared column types and `not_null` constraints.
    ///
    /// Undeclared fields pass through unchecked.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending column.
    pub fn check(&self, record: &Record) -> CoreResult<()> {
        for column in &self.columns {
            let value = record.get_or_null(&column.name);
            if value.is_null() {
                if column.is_not_null() {
                    return Err(CoreError::validation(format!(
                        "{}.{} must not be null",
                        self.name(),
                        column.name
                    )));
                }
                continue;
            }
            if !column.column_type.accepts(value) {
                return Err(CoreError::validation(format!(
                    "{}.{} expects {}, got {}",
                    self.name(),
                    column.name,
                    column.column_type,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }
}

/// Builds the key of `index` for `record`.
///
/// Returns `None` when any indexed column is null or missing; such
/// records are not indexed and never conflict.
#[must_use]
pub fn index_key(index: &IndexDef, record: &Record) -> Option<Vec<Value>> {
    index
        .columns
        .iter()
        .map(|c| match record.get_or_null(c) {
            Value::Null => None,
            v => Some(v.clone()),
        })
        .collect()
}

/// Compiles a set of tables and checks foreign keys across them.
///
/// # Errors
///
/// Returns the first compilation or foreign-key error.
pub fn compile_tables(defs: &[TableDef]) -> CoreResult<Vec<TableDescriptor>> {
    let descriptors = defs
        .iter()
        .map(TableDescriptor::compile)
        .collect::<CoreResult<Vec<_>>>()?;
    for descriptor in &descriptors {
        descriptor.validate_foreign_keys(|name| descriptors.iter().find(|d| d.name() == name))?;
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::schema::parser::parse_schema;
    use crate::ErrorKind;

    fn compile(text: &str) -> CoreResult<Vec<TableDescriptor>> {
        compile_tables(&parse_schema(text)?.tables)
    }

    #[test]
    fn adds_identity_and_per_column_indexes() {
        let tables = compile("TABLE: users\nemail: text unique not_null\nname: text").unwrap();
        let users = &tables[0];

        assert_eq!(users.columns()[0].name, "id");
        assert!(users.columns()[0].is_primary_key());
        let names: Vec<_> = users.indexes().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["email_idx", "name_idx"]);
        assert!(users.index_on("email").unwrap().unique);
        assert!(!users.index_on("name").unwrap().unique);
    }

    #[test]
    fn declared_id_must_be_integer() {
        let err = compile("TABLE: t\nid: text primary_key").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(compile("TABLE: t\nid: integer primary_key").is_ok());
    }

    #[test]
    fn other_primary_key_keeps_implicit_id() {
        let tables = compile("TABLE: sessions\ntoken: text primary_key").unwrap();
        let id = tables[0].column("id").unwrap();
        assert!(!id.is_primary_key());
        assert!(id.is_unique());
    }

    #[test]
    fn rejects_bad_defaults_and_indexes() {
        assert!(compile("TABLE: t\nn: integer default(abc)").is_err());
        assert!(compile("TABLE: t\nflag: boolean default(now())").is_err());
        assert!(compile("TABLE: t\nn: integer\nINDEX: i(n, missing)").is_err());
        assert!(compile("TABLE: t\nn: integer\nINDEX: n_idx(n)").is_err());
    }

    #[test]
    fn foreign_keys_must_resolve() {
        assert!(compile("TABLE: a\nTABLE: b\nref: integer foreign_key(a.id)").is_ok());
        assert!(compile("TABLE: b\nref: integer foreign_key(a.id)\nTABLE: a").is_ok());
        let err = compile("TABLE: b\nref: integer foreign_key(a.nope)\nTABLE: a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn defaults_and_checks() {
        let tables =
            compile("TABLE: t\nn: integer not_null default(3)\nat: datetime default(now())\nflag: boolean")
                .unwrap();
        let t = &tables[0];
        let clock = ManualClock::new(99);

        let mut record = Record::new();
        t.apply_defaults(&mut record, &clock);
        assert_eq!(record.integer("n"), Some(3));
        assert_eq!(record.integer("at"), Some(99));
        t.check(&record).unwrap();

        let bad = Record::new().with("n", 1).with("flag", "yes");
        assert_eq!(t.check(&bad).unwrap_err().kind(), ErrorKind::Validation);
        let missing = Record::new().with("flag", true);
        assert!(t.check(&missing).is_err());
        let extra = Record::new().with("n", 1).with("anything", "goes");
        assert!(t.check(&extra).is_ok());
    }

    #[test]
    fn alter_and_drop() {
        let tables = compile("TABLE: t\na: text\nb: text\nINDEX: ab(a, b)").unwrap();
        let t = &tables[0];

        let mut alter = TableDef::new("t");
        alter.columns.push(Column::new("c", ColumnType::Integer));
        let altered = t.altered(&alter).unwrap();
        assert!(altered.column("c").is_some());
        assert!(altered.index_on("c").is_some());

        let dropped = altered.without_column("b").unwrap();
        assert!(dropped.column("b").is_none());
        assert!(dropped.indexes().iter().all(|i| i.name != "ab"));

        assert!(t.without_index("ab").is_ok());
        assert!(t.without_index("a_idx").is_err());
        assert!(t.without_column("id").is_err());
    }

    #[test]
    fn index_key_skips_nulls() {
        let index = IndexDef::new("i", vec!["a".into(), "b".into()], true);
        assert_eq!(
            index_key(&index, &Record::new().with("a", 1).with("b", "x")),
            Some(vec![Value::Integer(1), Value::from("x")])
        );
        assert_eq!(index_key(&index, &Record::new().with("a", 1)), None);
    }
}
