//! Content-addressed file indexing.
//!
//! Every indexed file is known by the glyph of its normalized path. A
//! project groups the files found below one root directory and carries
//! the glyph of that root. Rewriting a file through
//! [`update_file_by_glyph`] appends one `file_changes` row per content
//! change, so [`file_history`] is the full edit trail of a glyph.
//!
//! Hashing and stat calls happen before the write scope is taken; only
//! the catalog work runs under the writer lock.

mod fs;
mod glyph;

pub use fs::{FileStat, FileSystem, LocalFileSystem, MemoryFileSystem};
pub use glyph::{
    compression_permille, content_hash, glyph_for, glyph_for_path, is_glyph, normalize_path,
    GLYPH_PREFIX, GLYPH_SYMBOLS,
};

use crate::error::{CoreError, CoreResult};
use crate::query::{Direction, Predicate, Query, RowSource};
use crate::schema::builtin::{FILES, FILE_CHANGES, GLYPH_MAPPINGS, PROJECTS};
use crate::session::{ensure_live, AuthSession};
use crate::transaction::{Scope, Transaction, TransactionManager};
use crate::value::{Record, Value};
use std::path::Path;
use tracing::{debug, info};

/// Outcome of [`index_project`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// The project row.
    pub project: Record,
    /// Files found below the root.
    pub scanned: usize,
    /// Files newly recorded.
    pub indexed: usize,
    /// Files already recorded for this project.
    pub skipped: usize,
}

/// A file row together with the current file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// The `files` row.
    pub record: Record,
    /// Bytes read from the filesystem.
    pub content: Vec<u8>,
}

#[derive(Debug)]
struct ScannedFile {
    path: String,
    glyph: String,
    hash: String,
    stat: FileStat,
}

fn scan(fs: &dyn FileSystem, root: &Path) -> CoreResult<Vec<ScannedFile>> {
    fs.list_files(root)?
        .into_iter()
        .map(|path| {
            let bytes = fs.read_file(&path)?;
            let stat = fs.stat(&path)?;
            let path = path.to_string_lossy().into_owned();
            Ok(ScannedFile {
                glyph: glyph_for_path(&path),
                hash: content_hash(&bytes),
                path,
                stat,
            })
        })
        .collect()
}

fn first<S: RowSource + ?Sized>(
    source: &S,
    table: &str,
    predicate: Predicate,
) -> CoreResult<Option<Record>> {
    Ok(Query::new()
        .from(table)
        .filter(predicate)
        .limit(1)
        .execute(source)?
        .into_iter()
        .next())
}

fn find_project(tx: &mut Transaction, auth: Option<&AuthSession>, root: &str) -> CoreResult<Record> {
    let glyph = glyph_for_path(root);
    if let Some(project) = first(&*tx, PROJECTS, Predicate::new().eq("glyph", glyph.as_str()))? {
        return Ok(project);
    }

    let name = Path::new(root)
        .file_name()
        .map_or_else(|| root.to_string(), |n| n.to_string_lossy().into_owned());
    let owner = auth.map_or(Value::Null, |a| Value::from(a.user_id()));
    let now = tx.now();
    let project = tx.create(
        PROJECTS,
        Record::new()
            .with("glyph", glyph)
            .with("owner_id", owner)
            .with("name", name)
            .with("path", root)
            .with("updated", now),
    )?;
    debug!(project = ?project.id(), root, "project created");
    Ok(project)
}

/// Indexes every file below `root`.
///
/// Files already recorded for the project are left untouched. A glyph
/// already mapped to another path aborts the whole run.
///
/// # Errors
///
/// - conflict error: glyph collision with a different path
/// - auth error: `auth` is given and no longer live
/// - not-found error: `root` does not exist
pub fn index_project(
    tm: &TransactionManager,
    fs: &dyn FileSystem,
    auth: Option<&AuthSession>,
    root: &Path,
) -> CoreResult<IndexReport> {
    let scanned = scan(fs, root)?;
    let root = root.to_string_lossy().into_owned();

    let report = tm.run(Scope::tables([PROJECTS, FILES, GLYPH_MAPPINGS]), |tx| {
        if let Some(auth) = auth {
            ensure_live(tx.catalog(), auth, tx.now())?;
        }
        let project = find_project(tx, auth, &root)?;
        let project_id = project
            .id()
            .ok_or_else(|| CoreError::integrity("project row has no id"))?;

        let (mut indexed, mut skipped) = (0, 0);
        for file in &scanned {
            let mapping = first(&*tx, GLYPH_MAPPINGS, Predicate::new().eq("glyph", file.glyph.as_str()))?;
            if let Some(mapped) = mapping.as_ref().and_then(|m| m.text("original_path")) {
                if mapped != file.path {
                    return Err(CoreError::conflict(format!(
                        "glyph {} of {} is already mapped to {mapped}",
                        file.glyph, file.path
                    )));
                }
            }

            let known = Predicate::new()
                .eq("project_id", project_id)
                .eq("glyph", file.glyph.as_str());
            if first(&*tx, FILES, known)?.is_some() {
                skipped += 1;
                continue;
            }

            tx.create(
                FILES,
                Record::new()
                    .with("project_id", project_id)
                    .with("glyph", file.glyph.as_str())
                    .with("path", file.path.as_str())
                    .with("hash", file.hash.as_str())
                    .with("size", i64::try_from(file.stat.size).unwrap_or(i64::MAX))
                    .with("modified", file.stat.modified),
            )?;
            if mapping.is_none() {
                tx.create(
                    GLYPH_MAPPINGS,
                    Record::new()
                        .with("glyph", file.glyph.as_str())
                        .with("original_path", file.path.as_str())
                        .with("compression_permille", compression_permille(&file.glyph, &file.path)),
                )?;
            }
            indexed += 1;
        }

        Ok(IndexReport {
            project,
            scanned: scanned.len(),
            indexed,
            skipped,
        })
    })?;

    info!(
        root,
        scanned = report.scanned,
        indexed = report.indexed,
        skipped = report.skipped,
        "project indexed"
    );
    Ok(report)
}

fn single_file<S: RowSource + ?Sized>(source: &S, glyph: &str) -> CoreResult<Record> {
    let mut rows = Query::new()
        .from(FILES)
        .filter(Predicate::new().eq("glyph", glyph))
        .limit(2)
        .execute(source)?;
    match rows.len() {
        0 => Err(CoreError::not_found(format!("no file with glyph {glyph}"))),
        1 => Ok(rows.remove(0)),
        _ => Err(CoreError::conflict(format!("glyph {glyph} names several files"))),
    }
}

fn file_path(record: &Record) -> CoreResult<&Path> {
    record
        .text("path")
        .map(Path::new)
        .ok_or_else(|| CoreError::integrity("file row has no path"))
}

/// Returns the file named by `glyph` and its current contents.
///
/// # Errors
///
/// Returns a not-found error if no file has this glyph and a conflict
/// error if several do.
pub fn get_file_by_glyph<S: RowSource + ?Sized>(
    source: &S,
    fs: &dyn FileSystem,
    glyph: &str,
) -> CoreResult<FileEntry> {
    let record = single_file(source, glyph)?;
    let content = fs.read_file(file_path(&record)?)?;
    Ok(FileEntry { record, content })
}

/// Rewrites the file named by `glyph` and records the change.
///
/// The file is written as the last step inside the scope, after the rows,
/// so concurrent updates of the same glyph chain their history rows and a
/// rejected row write never touches the disk. `modified` becomes the
/// scope's time. No history row is added when the content hash is
/// unchanged. Returns the updated `files` row.
///
/// # Errors
///
/// Same as [`get_file_by_glyph`], plus an auth error if `auth` is given
/// and no longer live.
pub fn update_file_by_glyph(
    tm: &TransactionManager,
    fs: &dyn FileSystem,
    auth: Option<&AuthSession>,
    glyph: &str,
    content: &[u8],
) -> CoreResult<Record> {
    let new_hash = content_hash(content);

    tm.run(Scope::tables([FILES, FILE_CHANGES]), |tx| {
        if let Some(auth) = auth {
            ensure_live(tx.catalog(), auth, tx.now())?;
        }
        let record = single_file(&*tx, glyph)?;
        let id = record
            .id()
            .ok_or_else(|| CoreError::integrity("file row has no id"))?;
        let path = file_path(&record)?.to_path_buf();

        let old_hash = record.get_or_null("hash").clone();
        let now = tx.now();
        let updated = tx.update_record(
            FILES,
            id,
            &Record::new()
                .with("hash", new_hash.as_str())
                .with("size", i64::try_from(content.len()).unwrap_or(i64::MAX))
                .with("modified", now),
        )?;

        if old_hash.as_text() != Some(new_hash.as_str()) {
            let actor = auth.map_or(Value::Null, |a| Value::from(a.user_id()));
            tx.create(
                FILE_CHANGES,
                Record::new()
                    .with("file_id", id)
                    .with("glyph", glyph)
                    .with("old_hash", old_hash)
                    .with("new_hash", new_hash.as_str())
                    .with("user_id", actor)
                    .with("change_type", "UPDATE"),
            )?;
            debug!(glyph, "file change recorded");
        }

        // Rows first, file last: a failed row write leaves the disk alone.
        fs.write_file(&path, content)?;
        Ok(updated)
    })
}

/// Returns the change history of `glyph`, oldest first.
///
/// # Errors
///
/// Only catalog failures; an unknown glyph has an empty history.
pub fn file_history<S: RowSource + ?Sized>(source: &S, glyph: &str) -> CoreResult<Vec<Record>> {
    Query::new()
        .from(FILE_CHANGES)
        .filter(Predicate::new().eq("glyph", glyph))
        .order_by("timestamp", Direction::Asc)
        .execute(source)
}
