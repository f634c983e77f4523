//! Schema migrations.
//!
//! A migration is a text descriptor:
//!
//! ```text
//! MIGRATION: 2
//! NAME: add_tags
//! UP:
//! TABLE: tags
//! label: text unique
//! DOWN:
//! DROP TABLE: tags
//! ```
//!
//! Scripts use the schema directives plus `ALTER:`, `DROP TABLE:`,
//! `DROP INDEX: table.index` and `DROP COLUMN: table.column`.
//!
//! Migrations are:
//! - **Sequential**: version `n + 1` is the only one accepted after `n`
//! - **Transactional**: the `migrations` row and every catalog change of
//!   the script commit together
//! - **Reversible**: `rollback` runs the latest `DOWN:` script

use crate::error::{CoreError, CoreResult};
use crate::query::{Direction, Predicate, Query};
use crate::schema::builtin::MIGRATIONS;
use crate::schema::{parse_statements, Statement, TableDescriptor};
use crate::store::{Catalog, SchemaOp};
use crate::transaction::Transaction;
use crate::types::Timestamp;
use crate::value::Record;

/// Version number for migrations.
pub type MigrationVersion = u64;

/// A parsed migration descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDescriptor {
    /// Version number, one above the current schema version.
    pub version: MigrationVersion,
    /// Human-readable name.
    pub name: String,
    /// Forward script.
    pub up: String,
    /// Reverse script, if any.
    pub down: Option<String>,
}

#[derive(Clone, Copy)]
enum Section {
    Header,
    Up,
    Down,
}

impl MigrationDescriptor {
    /// Creates a descriptor without a reverse script.
    pub fn new(version: MigrationVersion, name: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            up: up.into(),
            down: None,
        }
    }

    /// Sets the reverse script.
    #[must_use]
    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    /// Parses descriptor text.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the version, name or `UP:` section is
    /// missing, or if the header holds anything else.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let mut version = None;
        let mut name = None;
        let mut up: Option<Vec<&str>> = None;
        let mut down: Option<Vec<&str>> = None;
        let mut section = Section::Header;

        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let head = line.to_ascii_uppercase();
            if head == "UP:" {
                section = Section::Up;
                up.get_or_insert_with(Vec::new);
                continue;
            }
            if head == "DOWN:" {
                section = Section::Down;
                down.get_or_insert_with(Vec::new);
                continue;
            }
            match section {
                Section::Up => up.get_or_insert_with(Vec::new).push(raw),
                Section::Down => down.get_or_insert_with(Vec::new).push(raw),
                Section::Header => {
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    let (key, value) = line.split_once(':').ok_or_else(|| {
                        CoreError::validation(format!("migration line {}: expected KEY: value", n + 1))
                    })?;
                    let value = value.trim();
                    match key.trim().to_ascii_uppercase().as_str() {
                        "MIGRATION" => {
                            version = Some(value.parse::<MigrationVersion>().map_err(|_| {
                                CoreError::validation(format!("bad migration version {value:?}"))
                            })?);
                        }
                        "NAME" => name = Some(value.to_string()),
                        other => {
                            return Err(CoreError::validation(format!(
                                "migration line {}: unknown header {other}",
                                n + 1
                            )))
                        }
                    }
                }
            }
        }

        let version = version.ok_or_else(|| CoreError::validation("migration has no MIGRATION: version"))?;
        let name = name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CoreError::validation("migration has no NAME:"))?;
        let up = up.ok_or_else(|| CoreError::validation(format!("migration {version} has no UP: section")))?;
        Ok(Self {
            version,
            name,
            up: up.join("\n"),
            down: down.map(|lines| lines.join("\n")),
        })
    }
}

/// A row of the `migrations` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Version number.
    pub version: MigrationVersion,
    /// Name.
    pub name: String,
    /// When the migration committed.
    pub applied_at: Timestamp,
}

impl AppliedMigration {
    fn from_record(record: &Record) -> Self {
        Self {
            version: record
                .integer("version")
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or_default(),
            name: record.text("name").unwrap_or_default().to_string(),
            applied_at: record.integer("applied_at").unwrap_or_default(),
        }
    }
}

/// Returns applied migrations, oldest first.
///
/// # Errors
///
/// Returns a not-found error if the `migrations` table was dropped.
pub fn applied_migrations(catalog: &Catalog) -> CoreResult<Vec<AppliedMigration>> {
    Ok(Query::new()
        .from(MIGRATIONS)
        .order_by("version", Direction::Asc)
        .execute(catalog)?
        .iter()
        .map(AppliedMigration::from_record)
        .collect())
}

/// Returns the highest applied version, 0 if none.
///
/// # Errors
///
/// Returns a not-found error if the `migrations` table was dropped.
pub fn schema_version(catalog: &Catalog) -> CoreResult<MigrationVersion> {
    Ok(applied_migrations(catalog)?
        .last()
        .map_or(0, |m| m.version))
}

/// Applies `migration` inside `tx`, which must span every table.
pub(crate) fn apply(tx: &mut Transaction, migration: &MigrationDescriptor) -> CoreResult<()> {
    let current = schema_version(tx.catalog())?;
    let version = i64::try_from(migration.version)
        .map_err(|_| CoreError::validation(format!("migration version {} is too large", migration.version)))?;

    let already = tx.find(MIGRATIONS, &Predicate::new().eq("version", version))?;
    if !already.is_empty() {
        return Err(CoreError::conflict(format!(
            "migration {} is already applied",
            migration.version
        )));
    }
    if migration.version != current + 1 {
        return Err(CoreError::validation(format!(
            "migration {} does not follow current version {current}",
            migration.version
        )));
    }

    let statements = parse_statements(&migration.up)?;
    if let Some(down) = &migration.down {
        parse_statements(down)?;
    }

    let now = tx.now();
    tx.create(
        MIGRATIONS,
        Record::new()
            .with("version", version)
            .with("name", migration.name.as_str())
            .with("applied_at", now)
            .with("up", migration.up.as_str())
            .with("down", migration.down.clone()),
    )?;
    run_statements(tx, statements)
}

/// Reverts the latest migration inside `tx` and returns it.
pub(crate) fn revert(tx: &mut Transaction) -> CoreResult<AppliedMigration> {
    let latest = tx
        .query(
            &Query::new()
                .from(MIGRATIONS)
                .order_by("version", Direction::Desc)
                .limit(1),
        )?
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::not_found("no migration has been applied"))?;
    let applied = AppliedMigration::from_record(&latest);

    let down = latest.text("down").ok_or_else(|| {
        CoreError::validation(format!("migration {} has no DOWN: script", applied.version))
    })?;
    run_statements(tx, parse_statements(down)?)?;

    if let Some(id) = latest.id() {
        tx.delete_record(MIGRATIONS, id)?;
    }
    Ok(applied)
}

fn run_statements(tx: &mut Transaction, statements: Vec<Statement>) -> CoreResult<()> {
    for statement in statements {
        let op = match statement {
            Statement::Database(_) => continue,
            Statement::CreateTable(def) => {
                if tx.catalog().contains(&def.name) {
                    return Err(CoreError::validation(format!("table {} already exists", def.name)));
                }
                let descriptor = TableDescriptor::compile(&def)?;
                check_references(tx.catalog(), &descriptor)?;
                SchemaOp::PutTable(descriptor)
            }
            Statement::AlterTable(def) => {
                let descriptor = existing(tx.catalog(), &def.name)?.altered(&def)?;
                check_references(tx.catalog(), &descriptor)?;
                SchemaOp::PutTable(descriptor)
            }
            Statement::DropTable(table) => {
                existing(tx.catalog(), &table)?;
                ensure_unreferenced(tx.catalog(), &table, None)?;
                SchemaOp::DropTable { table }
            }
            Statement::DropIndex { table, index } => {
                SchemaOp::PutTable(existing(tx.catalog(), &table)?.without_index(&index)?)
            }
            Statement::DropColumn { table, column } => {
                existing(tx.catalog(), &table)?.without_column(&column)?;
                ensure_unreferenced(tx.catalog(), &table, Some(&column))?;
                SchemaOp::DropColumn { table, column }
            }
        };
        tx.apply_schema(op)?;
    }
    Ok(())
}

fn existing<'a>(catalog: &'a Catalog, table: &str) -> CoreResult<&'a TableDescriptor> {
    catalog
        .descriptor(table)
        .ok_or_else(|| CoreError::table_not_found(table))
}

fn check_references(catalog: &Catalog, descriptor: &TableDescriptor) -> CoreResult<()> {
    descriptor.validate_foreign_keys(|name| catalog.descriptor(name))
}

/// Fails if another table holds a foreign key into `table` (or into
/// `table.column` when given).
fn ensure_unreferenced(catalog: &Catalog, table: &str, column: Option<&str>) -> CoreResult<()> {
    for name in catalog.table_names() {
        let Some(other) = catalog.descriptor(name) else {
            continue;
        };
        if column.is_none() && name == table {
            continue;
        }
        if let Some((from, _, target)) = other
            .foreign_keys()
            .find(|(_, t, c)| *t == table && column.map_or(true, |col| col == *c))
        {
            return Err(CoreError::validation(format!(
                "{name}.{from} still references {table}.{target}"
            )));
        }
    }
    Ok(())
}
