//! Line-oriented schema text parser.
//!
//! ```text
//! DATABASE: glyphdb
//! # comment
//! TABLE: users
//! email: text unique not_null
//! created: datetime default(now())
//! owner: integer foreign_key(users.id)
//! INDEX: users_name_email(username, email) unique
//! ```
//!
//! Every keyword has a glyph alias (`⟁TB`, `⟁TX`, `⟁UQ`, `⟁DF: 0`, ...).
//! Both spellings resolve through [`TOKEN_TABLE`], which is turned into a
//! lookup map once on first use.
//!
//! A line is split at its first `:`. If the left side names a directive the
//! line is a directive, otherwise it is a column of the most recent table.
//! A column whose name collides with a directive keyword cannot be declared.

use crate::error::{CoreError, CoreResult};
use crate::schema::model::{
    Column, ColumnType, Constraint, DefaultValue, IndexDef, Schema, Statement, TableDef,
};
use crate::value::Value;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// A resolved keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Database,
    Table,
    Index,
    Alter,
    DropTable,
    DropIndex,
    DropColumn,
    Type(ColumnType),
    PrimaryKey,
    Unique,
    NotNull,
}

/// Every recognised keyword, lowercase, with its meaning.
const TOKEN_TABLE: &[(&str, Token)] = &[
    ("database", Token::Database),
    ("⟁db", Token::Database),
    ("table", Token::Table),
    ("⟁tb", Token::Table),
    ("index", Token::Index),
    ("⟁ix", Token::Index),
    ("alter", Token::Alter),
    ("drop table", Token::DropTable),
    ("drop index", Token::DropIndex),
    ("drop column", Token::DropColumn),
    ("text", Token::Type(ColumnType::Text)),
    ("⟁tx", Token::Type(ColumnType::Text)),
    ("integer", Token::Type(ColumnType::Integer)),
    ("number", Token::Type(ColumnType::Integer)),
    ("⟁nm", Token::Type(ColumnType::Integer)),
    ("boolean", Token::Type(ColumnType::Boolean)),
    ("⟁bl", Token::Type(ColumnType::Boolean)),
    ("datetime", Token::Type(ColumnType::Datetime)),
    ("⟁dt", Token::Type(ColumnType::Datetime)),
    ("json", Token::Type(ColumnType::Json)),
    ("⟁js", Token::Type(ColumnType::Json)),
    ("binary", Token::Type(ColumnType::Binary)),
    ("buffer", Token::Type(ColumnType::Binary)),
    ("⟁bf", Token::Type(ColumnType::Binary)),
    ("primary_key", Token::PrimaryKey),
    ("⟁pk", Token::PrimaryKey),
    ("unique", Token::Unique),
    ("⟁uq", Token::Unique),
    ("not_null", Token::NotNull),
    ("⟁nn", Token::NotNull),
];

static TOKENS: LazyLock<HashMap<&'static str, Token>> =
    LazyLock::new(|| TOKEN_TABLE.iter().copied().collect());

static DEFAULT_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?i)default\(((?:[^()]|\(\))*)\)|⟁DF:\s*(\w+\(\)|\S+)")
});

static FOREIGN_KEY_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?i)foreign_key\(\s*(\w+)\.(\w+)\s*\)|⟁FK:\s*(\w+)\.(\w+)")
});

static INDEX_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(\w+)\s*\(([^)]*)\)\s*(.*)$"));

fn pattern(re: &'static LazyLock<Result<Regex, regex::Error>>) -> CoreResult<&'static Regex> {
    re.as_ref()
        .map_err(|e| CoreError::validation(format!("schema pattern failed to compile: {e}")))
}

fn lookup(word: &str) -> Option<Token> {
    TOKENS.get(word.to_ascii_lowercase().as_str()).copied()
}

fn is_directive(token: Token) -> bool {
    matches!(
        token,
        Token::Database
            | Token::Table
            | Token::Index
            | Token::Alter
            | Token::DropTable
            | Token::DropIndex
            | Token::DropColumn
    )
}

/// Parses schema text into a [`Schema`].
///
/// Only `DATABASE`, `TABLE`, `INDEX` and column lines are allowed here;
/// `ALTER` and `DROP` belong to migration scripts.
///
/// # Errors
///
/// Returns a validation error for malformed lines, unknown tokens,
/// duplicate tables or columns, or more than one primary key per table.
pub fn parse_schema(text: &str) -> CoreResult<Schema> {
    let mut schema = Schema::default();
    for statement in parse_statements(text)? {
        match statement {
            Statement::Database(name) => {
                if schema.database.replace(name).is_some() {
                    return Err(CoreError::validation("DATABASE declared twice"));
                }
            }
            Statement::CreateTable(table) => {
                if schema.table(&table.name).is_some() {
                    return Err(CoreError::validation(format!(
                        "table {} declared twice",
                        table.name
                    )));
                }
                schema.tables.push(table);
            }
            other => {
                return Err(CoreError::validation(format!(
                    "{other:?} is only allowed in migration scripts"
                )))
            }
        }
    }
    Ok(schema)
}

/// Parses schema or migration script text into statements.
///
/// # Errors
///
/// Returns a validation error for any malformed line.
pub fn parse_statements(text: &str) -> CoreResult<Vec<Statement>> {
    let mut statements = Vec::new();
    let mut current: Option<(bool, TableDef)> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (head, rest) = line.split_once(':').ok_or_else(|| {
            CoreError::validation(format!("line {line_no}: expected `name: definition`"))
        })?;
        let head = head.trim();
        let rest = rest.trim();

        match lookup(head).filter(|t| is_directive(*t)) {
            Some(Token::Database) => {
                flush(&mut current, &mut statements);
                statements.push(Statement::Database(identifier(rest, line_no)?));
            }
            Some(Token::Table) => {
                flush(&mut current, &mut statements);
                current = Some((false, TableDef::new(identifier(rest, line_no)?)));
            }
            Some(Token::Alter) => {
                flush(&mut current, &mut statements);
                current = Some((true, TableDef::new(identifier(rest, line_no)?)));
            }
            Some(Token::Index) => {
                let (_, table) = current.as_mut().ok_or_else(|| {
                    CoreError::validation(format!("line {line_no}: INDEX before any TABLE"))
                })?;
                let index = parse_index(rest, line_no)?;
                if table.indexes.iter().any(|i| i.name == index.name) {
                    return Err(CoreError::validation(format!(
                        "line {line_no}: duplicate index {}",
                        index.name
                    )));
                }
                table.indexes.push(index);
            }
            Some(Token::DropTable) => {
                flush(&mut current, &mut statements);
                statements.push(Statement::DropTable(identifier(rest, line_no)?));
            }
            Some(Token::DropIndex) => {
                flush(&mut current, &mut statements);
                let (table, index) = qualified(rest, line_no)?;
                statements.push(Statement::DropIndex { table, index });
            }
            Some(Token::DropColumn) => {
                flush(&mut current, &mut statements);
                let (table, column) = qualified(rest, line_no)?;
                statements.push(Statement::DropColumn { table, column });
            }
            _ => {
                let (_, table) = current.as_mut().ok_or_else(|| {
                    CoreError::validation(format!(
                        "line {line_no}: column `{head}` declared before any TABLE"
                    ))
                })?;
                let column = parse_column(head, rest, line_no)?;
                if table.columns.iter().any(|c| c.name == column.name) {
                    return Err(CoreError::validation(format!(
                        "line {line_no}: duplicate column {}.{}",
                        table.name, column.name
                    )));
                }
                if column.is_primary_key() && table.columns.iter().any(Column::is_primary_key) {
                    return Err(CoreError::validation(format!(
                        "line {line_no}: table {} has more than one primary key",
                        table.name
                    )));
                }
                table.columns.push(column);
            }
        }
    }

    flush(&mut current, &mut statements);
    Ok(statements)
}

fn flush(current: &mut Option<(bool, TableDef)>, statements: &mut Vec<Statement>) {
    if let Some((alter, table)) = current.take() {
        statements.push(if alter {
            Statement::AlterTable(table)
        } else {
            Statement::CreateTable(table)
        });
    }
}

fn identifier(raw: &str, line_no: usize) -> CoreResult<String> {
    let raw = raw.trim();
    let mut chars = raw.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(raw.to_string())
    } else {
        Err(CoreError::validation(format!(
            "line {line_no}: `{raw}` is not a valid name"
        )))
    }
}

fn qualified(raw: &str, line_no: usize) -> CoreResult<(String, String)> {
    let (table, name) = raw.split_once('.').ok_or_else(|| {
        CoreError::validation(format!("line {line_no}: expected `table.name`, got `{raw}`"))
    })?;
    Ok((identifier(table, line_no)?, identifier(name, line_no)?))
}

fn parse_index(raw: &str, line_no: usize) -> CoreResult<IndexDef> {
    let caps = pattern(&INDEX_RE)?.captures(raw).ok_or_else(|| {
        CoreError::validation(format!(
            "line {line_no}: expected `name(column, ...) [unique]`, got `{raw}`"
        ))
    })?;
    let name = identifier(&caps[1], line_no)?;
    let columns = caps[2]
        .split(',')
        .map(|c| identifier(c, line_no))
        .collect::<CoreResult<Vec<_>>>()?;

    let mut unique = false;
    for word in caps[3].split_whitespace() {
        match lookup(word) {
            Some(Token::Unique) => unique = true,
            _ => {
                return Err(CoreError::validation(format!(
                    "line {line_no}: unknown index option `{word}`"
                )))
            }
        }
    }
    Ok(IndexDef::new(name, columns, unique))
}

fn parse_column(name: &str, spec: &str, line_no: usize) -> CoreResult<Column> {
    let name = identifier(name, line_no)?;
    let mut rest = spec.to_string();
    let mut constraints = Vec::new();

    if let Some((range, raw)) = pattern(&DEFAULT_RE)?.captures(&rest).and_then(|caps| {
        let whole = caps.get(0)?.range();
        let raw = caps.get(1).or_else(|| caps.get(2))?.as_str().to_string();
        Some((whole, raw))
    }) {
        rest.replace_range(range, " ");
        constraints.push(Constraint::Default(parse_default(&raw)));
    }

    if let Some((range, table, column)) = pattern(&FOREIGN_KEY_RE)?.captures(&rest).and_then(|caps| {
        let whole = caps.get(0)?.range();
        let table = caps.get(1).or_else(|| caps.get(3))?.as_str().to_string();
        let column = caps.get(2).or_else(|| caps.get(4))?.as_str().to_string();
        Some((whole, table, column))
    }) {
        rest.replace_range(range, " ");
        constraints.push(Constraint::ForeignKey { table, column });
    }

    let mut column_type = None;
    for word in rest.split_whitespace() {
        let constraint = match lookup(word) {
            Some(Token::Type(t)) => {
                if column_type.replace(t).is_some() {
                    return Err(CoreError::validation(format!(
                        "line {line_no}: column {name} declares more than one type"
                    )));
                }
                continue;
            }
            Some(Token::PrimaryKey) => Constraint::PrimaryKey,
            Some(Token::Unique) => Constraint::Unique,
            Some(Token::NotNull) => Constraint::NotNull,
            _ => {
                return Err(CoreError::validation(format!(
                    "line {line_no}: unknown token `{word}` in column {name}"
                )))
            }
        };
        if !constraints.contains(&constraint) {
            constraints.push(constraint);
        }
    }

    Ok(Column {
        name,
        column_type: column_type.unwrap_or(ColumnType::Text),
        constraints,
    })
}

fn parse_default(raw: &str) -> DefaultValue {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        "now()" | "now" | "current_timestamp" => return DefaultValue::Now,
        "null" => return DefaultValue::Literal(Value::Null),
        "true" => return DefaultValue::Literal(Value::Bool(true)),
        "false" => return DefaultValue::Literal(Value::Bool(false)),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return DefaultValue::Literal(Value::Integer(i));
    }
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| raw.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)));
    DefaultValue::Literal(Value::Text(unquoted.unwrap_or(raw).to_string()))
}
