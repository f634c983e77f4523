//! Property-based test generators using proptest.
//!
//! Provides strategies for generating schema text, records, predicates
//! and paths that stay inside what the engine accepts.

use glyphdb_core::{Predicate, Record, Value};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for scalar values (floats are not values).
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        1 => any::<bool>().prop_map(Value::Bool),
        3 => (-50i64..50).prop_map(Value::Integer),
        3 => "[a-d]{0,3}".prop_map(Value::Text),
    ]
}

/// Strategy for table or column names that are never `id`.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}")
        .expect("Invalid regex")
        .prop_map(|s| format!("c_{s}"))
}

/// Strategy for one column line.
pub fn column_line_strategy(name: String) -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["text", "integer", "boolean", "datetime", "json", "binary"]),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(move |(ty, unique, not_null)| {
            let mut line = format!("{name}: {ty}");
            if unique {
                line.push_str(" unique");
            }
            if not_null {
                line.push_str(" not_null");
            }
            line
        })
}

/// Strategy for a table block with distinct column names.
pub fn table_block_strategy(table: String) -> impl Strategy<Value = String> {
    prop::collection::btree_set(identifier_strategy(), 1..6).prop_flat_map(move |columns: BTreeSet<String>| {
        let table = table.clone();
        columns
            .into_iter()
            .map(column_line_strategy)
            .collect::<Vec<_>>()
            .prop_map(move |lines| format!("TABLE: {table}\n{}\n", lines.join("\n")))
    })
}

/// Strategy for a whole schema document with distinct table names.
pub fn schema_text_strategy() -> impl Strategy<Value = String> {
    prop::collection::btree_set(identifier_strategy(), 1..4).prop_flat_map(|tables: BTreeSet<String>| {
        tables
            .into_iter()
            .map(table_block_strategy)
            .collect::<Vec<_>>()
            .prop_map(|blocks| format!("DATABASE: generated\n\n{}", blocks.join("\n# next\n")))
    })
}

/// Strategy for a `notes` row (see [`NOTES_SCHEMA`](crate::NOTES_SCHEMA)).
pub fn note_strategy() -> impl Strategy<Value = Record> {
    (
        "[a-c]{1,2}",
        prop::option::of(prop::sample::select(vec!["red", "green", "blue"])),
        prop::option::of(-5i64..5),
    )
        .prop_map(|(title, tag, rank)| {
            let mut record = Record::new().with("title", title);
            if let Some(tag) = tag {
                record.insert("tag", tag);
            }
            if let Some(rank) = rank {
                record.insert("rank", rank);
            }
            record
        })
}

/// Strategy for a batch of `notes` rows.
pub fn notes_strategy(max: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(note_strategy(), 0..max)
}

/// A predicate clause together with a direct reading of its meaning.
#[derive(Debug, Clone)]
pub enum NaiveClause {
    /// Field equals value.
    Eq(String, Value),
    /// Field differs from value.
    Ne(String, Value),
    /// Field is greater than a value of the same type.
    Gt(String, Value),
    /// Field is less than a value of the same type.
    Lt(String, Value),
}

impl NaiveClause {
    /// Adds the clause to a predicate.
    #[must_use]
    pub fn apply(&self, predicate: Predicate) -> Predicate {
        match self {
            Self::Eq(f, v) => predicate.eq(f.as_str(), v.clone()),
            Self::Ne(f, v) => predicate.ne(f.as_str(), v.clone()),
            Self::Gt(f, v) => predicate.gt(f.as_str(), v.clone()),
            Self::Lt(f, v) => predicate.lt(f.as_str(), v.clone()),
        }
    }

    /// Evaluates the clause against a record without the engine.
    #[must_use]
    pub fn holds(&self, record: &Record) -> bool {
        let read = |f: &str| record.get(f).cloned().unwrap_or(Value::Null);
        match self {
            Self::Eq(f, v) => read(f) == *v,
            Self::Ne(f, v) => read(f) != *v,
            Self::Gt(f, v) => match (read(f), v) {
                (Value::Integer(a), Value::Integer(b)) => a > *b,
                (Value::Text(a), Value::Text(b)) => a > *b,
                (Value::Bool(a), Value::Bool(b)) => a & !*b,
                _ => false,
            },
            Self::Lt(f, v) => match (read(f), v) {
                (Value::Integer(a), Value::Integer(b)) => a < *b,
                (Value::Text(a), Value::Text(b)) => a < *b,
                (Value::Bool(a), Value::Bool(b)) => !a & *b,
                _ => false,
            },
        }
    }
}

/// Strategy for a clause over the `notes` fields.
pub fn naive_clause_strategy() -> impl Strategy<Value = NaiveClause> {
    let field = prop::sample::select(vec!["title", "tag", "rank", "missing"]).prop_map(String::from);
    (field, scalar_value_strategy(), 0..4u8).prop_map(|(field, value, op)| match op {
        0 => NaiveClause::Eq(field, value),
        1 => NaiveClause::Ne(field, value),
        2 => NaiveClause::Gt(field, value),
        _ => NaiveClause::Lt(field, value),
    })
}

/// Strategy for relative file paths.
pub fn relative_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9_-]{1,8}", 1..5).prop_map(|segments| segments.join("/"))
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
