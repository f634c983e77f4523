//! Schema text, parsed schema objects and the table descriptor compiler.
//!
//! ```text
//! schema text ──parse──▶ Schema / Statement ──compile──▶ TableDescriptor
//! ```
//!
//! The engine compiles [`builtin::BUILTIN_SCHEMA`] merged with the
//! caller's schema at open time. Migration scripts reuse the same parser
//! and compiler through [`Statement`].

pub mod builtin;
mod compiler;
mod model;
mod parser;

pub use compiler::{compile_tables, index_key, TableDescriptor};
pub use model::{
    Column, ColumnType, Constraint, DefaultValue, IndexDef, Schema, Statement, TableDef,
};
pub use parser::{parse_schema, parse_statements};

use crate::error::CoreResult;

/// Parses the built-in schema and merges `caller` over it.
///
/// Caller tables with a built-in name replace the built-in definition in
/// place; new tables are appended in declaration order.
///
/// # Errors
///
/// Returns a validation error if either text is malformed or the merged
/// tables do not compile.
pub fn base_schema(caller: Option<&str>) -> CoreResult<(String, Vec<TableDescriptor>)> {
    let mut schema = parse_schema(builtin::BUILTIN_SCHEMA)?;
    if let Some(text) = caller {
        let extra = parse_schema(text)?;
        if extra.database.is_some() {
            schema.database = extra.database;
        }
        for table in extra.tables {
            match schema.tables.iter_mut().find(|t| t.name == table.name) {
                Some(slot) => *slot = table,
                None => schema.tables.push(table),
            }
        }
    }
    let database = schema
        .database
        .unwrap_or_else(|| builtin::DEFAULT_DATABASE.to_string());
    Ok((database, compile_tables(&schema.tables)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schema_compiles() {
        let (database, tables) = base_schema(None).unwrap();
        assert_eq!(database, "glyphdb");
        let names: Vec<_> = tables.iter().map(TableDescriptor::name).collect();
        assert_eq!(
            names,
            [
                "users",
                "sessions",
                "projects",
                "files",
                "glyph_mappings",
                "file_changes",
                "api_keys",
                "usage_stats",
                "backups",
                "migrations"
            ]
        );
    }

    #[test]
    fn caller_tables_override_and_extend() {
        let (database, tables) = base_schema(Some(
            "DATABASE: notes\nTABLE: users\nid: integer primary_key\nemail: text unique not_null\nTABLE: notes\nbody: text",
        ))
        .unwrap();
        assert_eq!(database, "notes");
        let users = tables.iter().find(|t| t.name() == "users").unwrap();
        assert!(users.column("username").is_none());
        assert_eq!(tables.last().unwrap().name(), "notes");
    }
}
