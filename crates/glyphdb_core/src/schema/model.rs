//! Parsed schema objects.

use crate::clock::Clock;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// UTF-8 text.
    Text,
    /// 64-bit integer.
    Integer,
    /// Boolean.
    Boolean,
    /// Milliseconds since epoch (integer) or an ISO-8601 string.
    Datetime,
    /// Any value.
    Json,
    /// Raw bytes.
    Binary,
}

impl ColumnType {
    /// Returns true if `value` may be stored in a column of this type.
    ///
    /// `Null` is accepted by every type; `not_null` is checked separately.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (Self::Json, _) => true,
            (Self::Text, Value::Text(_))
            | (Self::Integer, Value::Integer(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Datetime, Value::Integer(_) | Value::Text(_))
            | (Self::Binary, Value::Bytes(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::Json => "json",
            Self::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// Value filled in when a created record lacks a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefaultValue {
    /// A fixed literal.
    Literal(Value),
    /// The clock reading at creation time.
    Now,
}

impl DefaultValue {
    /// Produces the value for a new record.
    #[must_use]
    pub fn resolve(&self, clock: &dyn Clock) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Now => Value::Integer(clock.now()),
        }
    }
}

/// A column constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constraint {
    /// Primary key (unique and not null).
    PrimaryKey,
    /// Unique among non-null values.
    Unique,
    /// Must be present and non-null.
    NotNull,
    /// Default on create.
    Default(DefaultValue),
    /// Must reference an existing row.
    ForeignKey {
        /// Referenced table.
        table: String,
        /// Referenced column.
        column: String,
    },
}

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub column_type: ColumnType,
    /// Constraints in declaration order.
    pub constraints: Vec<Constraint>,
}

impl Column {
    /// Creates an unconstrained column.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            constraints: Vec::new(),
        }
    }

    /// Returns the column with an extra constraint.
    #[must_use]
    pub fn with(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Returns true if declared primary key.
    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.constraints.contains(&Constraint::PrimaryKey)
    }

    /// Returns true if values must be unique.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.is_primary_key() || self.constraints.contains(&Constraint::Unique)
    }

    /// Returns true if values must be present.
    #[must_use]
    pub fn is_not_null(&self) -> bool {
        self.is_primary_key() || self.constraints.contains(&Constraint::NotNull)
    }

    /// Returns the default, if declared.
    #[must_use]
    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Default(d) => Some(d),
            _ => None,
        })
    }

    /// Returns the foreign-key target, if declared.
    #[must_use]
    pub fn foreign_key(&self) -> Option<(&str, &str)> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::ForeignKey { table, column } => Some((table.as_str(), column.as_str())),
            _ => None,
        })
    }
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name, unique within its table.
    pub name: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
    /// Whether keys must be unique.
    pub unique: bool,
}

impl IndexDef {
    /// Creates an index definition.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
        }
    }
}

/// A table as written in schema text, before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Declared columns.
    pub columns: Vec<Column>,
    /// Explicitly declared indexes.
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    /// Creates an empty table definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A parsed schema document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    /// Database name, if declared.
    pub database: Option<String>,
    /// Tables in declaration order.
    pub tables: Vec<TableDef>,
}

impl Schema {
    /// Looks up a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// One step of a schema or migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `DATABASE: name`
    Database(String),
    /// `TABLE: name` followed by its columns and indexes.
    CreateTable(TableDef),
    /// `ALTER: name` followed by added columns and indexes.
    AlterTable(TableDef),
    /// `DROP TABLE: name`
    DropTable(String),
    /// `DROP INDEX: table.index`
    DropIndex {
        /// Owning table.
        table: String,
        /// Index name.
        index: String,
    },
    /// `DROP COLUMN: table.column`
    DropColumn {
        /// Owning table.
        table: String,
        /// Column name.
        column: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn column_types_accept_matching_values() {
        assert!(ColumnType::Text.accepts(&Value::from("x")));
        assert!(!ColumnType::Text.accepts(&Value::Integer(1)));
        assert!(ColumnType::Datetime.accepts(&Value::Integer(1)));
        assert!(ColumnType::Datetime.accepts(&Value::from("2024-01-01T00:00:00Z")));
        assert!(ColumnType::Json.accepts(&Value::Array(vec![])));
        assert!(ColumnType::Binary.accepts(&Value::Null));
    }

    #[test]
    fn primary_key_implies_unique_and_not_null() {
        let col = Column::new("id", ColumnType::Integer).with(Constraint::PrimaryKey);
        assert!(col.is_unique());
        assert!(col.is_not_null());
    }

    #[test]
    fn now_default_reads_clock() {
        let clock = ManualClock::new(42);
        assert_eq!(DefaultValue::Now.resolve(&clock), Value::Integer(42));
    }
}
