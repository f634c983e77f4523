//! Encrypted snapshots of the catalog.
//!
//! A backup is a CBOR [`Snapshot`] encrypted with the owner's backup
//! subkey. The ciphertext is stored twice: in a `backups` row and in a
//! standalone artifact file:
//!
//! ```text
//! | magic "GLBK" (4) | version (2) | schema version (8) | created (8) | length (8) | ciphertext |
//! ```
//!
//! Integers are little-endian. The row carries a SHA-256 of the
//! ciphertext, checked before anything is decrypted.
//!
//! `users`, `sessions`, `migrations` and `backups` are never exported
//! nor restored; every other table named by the snapshot is cleared and
//! refilled with its original ids.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::indexer::{content_hash, FileSystem};
use crate::migration::schema_version;
use crate::schema::builtin::{BACKUPS, RESTORE_PROTECTED};
use crate::session::{ensure_live, AuthSession};
use crate::store::Catalog;
use crate::transaction::{Scope, TransactionManager};
use crate::types::{RecordId, Timestamp};
use crate::value::Record;
use crate::vault::{CryptoManager, KeyPurpose};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Magic bytes opening every artifact.
pub const BACKUP_MAGIC: [u8; 4] = *b"GLBK";

/// Current artifact format version.
pub const BACKUP_FORMAT_VERSION: u16 = 1;

/// Artifact file extension.
pub const BACKUP_EXTENSION: &str = "glbk";

const HEADER_SIZE: usize = 4 + 2 + 8 + 8 + 8;

/// Rows of one table inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDump {
    /// Table name.
    pub name: String,
    /// Rows in id order.
    pub rows: Vec<Record>,
}

/// The plaintext of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Database name at backup time.
    pub database: String,
    /// Schema version at backup time.
    pub schema_version: u64,
    /// Backup timestamp.
    pub created: Timestamp,
    /// Exported tables in catalog order.
    pub tables: Vec<TableDump>,
}

impl Snapshot {
    fn capture(catalog: &Catalog, export: &[String], created: Timestamp) -> CoreResult<Self> {
        let tables = export
            .iter()
            .map(|name| {
                Ok(TableDump {
                    name: name.clone(),
                    rows: catalog.table(name)?.rows().cloned().collect(),
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            database: catalog.database().to_string(),
            schema_version: schema_version(catalog)?,
            created,
            tables,
        })
    }

    /// Total number of rows.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// Summary of a stored backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    /// Id of the `backups` row.
    pub id: RecordId,
    /// Caller-chosen name.
    pub name: String,
    /// Backup timestamp.
    pub created: Timestamp,
    /// Ciphertext length in bytes.
    pub size: usize,
    /// Hex SHA-256 of the ciphertext.
    pub checksum: String,
    /// Schema version captured.
    pub schema_version: u64,
    /// Where the artifact was written.
    pub artifact_path: PathBuf,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    /// Tables cleared and refilled.
    pub tables: usize,
    /// Rows written.
    pub records: usize,
}

/// A decoded artifact file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    /// Format version from the header.
    pub format_version: u16,
    /// Schema version from the header.
    pub schema_version: u64,
    /// Backup timestamp from the header.
    pub created: Timestamp,
    /// The encrypted snapshot.
    pub ciphertext: Vec<u8>,
}

impl BackupArtifact {
    /// Serializes header and ciphertext.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len());
        out.extend_from_slice(&BACKUP_MAGIC);
        out.extend_from_slice(&self.format_version.to_le_bytes());
        out.extend_from_slice(&self.schema_version.to_le_bytes());
        out.extend_from_slice(&self.created.to_le_bytes());
        out.extend_from_slice(&(self.ciphertext.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parses and validates an artifact.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for a bad magic, truncated data or a
    /// length mismatch, and a validation error for an unknown version.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CoreError::integrity("backup artifact is truncated"));
        }
        if data[..4] != BACKUP_MAGIC {
            return Err(CoreError::integrity("not a backup artifact"));
        }
        let format_version = u16::from_le_bytes([data[4], data[5]]);
        if format_version != BACKUP_FORMAT_VERSION {
            return Err(CoreError::validation(format!(
                "unsupported backup format version {format_version}"
            )));
        }
        let word = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[at..at + 8]);
            buf
        };
        let schema_version = u64::from_le_bytes(word(6));
        let created = i64::from_le_bytes(word(14));
        let len = u64::from_le_bytes(word(22));

        let ciphertext = &data[HEADER_SIZE..];
        if ciphertext.len() as u64 != len {
            return Err(CoreError::integrity(format!(
                "backup artifact declares {len} bytes but holds {}",
                ciphertext.len()
            )));
        }
        Ok(Self {
            format_version,
            schema_version,
            created,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Decrypts the snapshot with the owner's session.
    ///
    /// # Errors
    ///
    /// Returns an integrity error if the key does not open the artifact or
    /// the plaintext is not a snapshot.
    pub fn open(&self, auth: &AuthSession) -> CoreResult<Snapshot> {
        open_snapshot(auth, self.created, &self.ciphertext)
    }
}

/// Reads and validates the artifact at `path`.
///
/// # Errors
///
/// See [`BackupArtifact::decode`]; also fails if the file cannot be read.
pub fn read_backup_artifact(fs: &dyn FileSystem, path: &Path) -> CoreResult<BackupArtifact> {
    BackupArtifact::decode(&fs.read_file(path)?)
}

fn aad(user_id: RecordId, created: Timestamp) -> Vec<u8> {
    format!("backups:{user_id}:{created}").into_bytes()
}

fn crypto(auth: &AuthSession) -> CoreResult<CryptoManager> {
    Ok(CryptoManager::new(&auth.key().subkey(KeyPurpose::Backups)?))
}

fn open_snapshot(auth: &AuthSession, created: Timestamp, ciphertext: &[u8]) -> CoreResult<Snapshot> {
    let plaintext = crypto(auth)?.decrypt_data(ciphertext, &aad(auth.user_id(), created))?;
    ciborium::from_reader(plaintext.as_slice())
        .map_err(|e| CoreError::integrity(format!("backup does not decode: {e}")))
}

fn export_set(catalog: &Catalog, config: &Config) -> CoreResult<Vec<String>> {
    match &config.export_tables {
        Some(tables) => {
            for table in tables {
                if !catalog.contains(table) {
                    return Err(CoreError::validation(format!(
                        "export table {table} does not exist"
                    )));
                }
                if RESTORE_PROTECTED.contains(&table.as_str()) {
                    return Err(CoreError::validation(format!(
                        "export table {table} is engine-owned and cannot be restored"
                    )));
                }
            }
            // Catalog order, so restores create referenced rows first.
            Ok(catalog
                .table_names()
                .iter()
                .filter(|name| tables.contains(*name))
                .cloned()
                .collect())
        }
        None => Ok(catalog
            .table_names()
            .iter()
            .filter(|name| !RESTORE_PROTECTED.contains(&name.as_str()))
            .cloned()
            .collect()),
    }
}

fn check_name(name: &str) -> CoreResult<()> {
    if name.trim().is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(CoreError::validation(format!("invalid backup name {name:?}")));
    }
    Ok(())
}

/// Snapshots the export set, stores it as a `backups` row owned by the
/// session user and writes the artifact below `backup_dir`.
///
/// # Errors
///
/// - auth error: the session is no longer live
/// - validation error: bad name or unknown export table
/// - storage error: the artifact cannot be written
pub fn backup(
    tm: &TransactionManager,
    fs: &dyn FileSystem,
    config: &Config,
    backup_dir: &Path,
    auth: &AuthSession,
    name: &str,
) -> CoreResult<BackupInfo> {
    check_name(name)?;
    let crypto = crypto(auth)?;

    let info = tm.run(Scope::tables([BACKUPS]), |tx| {
        let created = tx.now();
        ensure_live(tx.catalog(), auth, created)?;

        let export = export_set(tx.catalog(), config)?;
        let snapshot = Snapshot::capture(tx.catalog(), &export, created)?;
        let mut plaintext = Vec::new();
        ciborium::into_writer(&snapshot, &mut plaintext)?;
        let ciphertext = crypto.encrypt_data(&plaintext, &aad(auth.user_id(), created))?;
        let checksum = content_hash(&ciphertext);

        let artifact_path = backup_dir.join(format!("{name}_{created}.{BACKUP_EXTENSION}"));
        let artifact = BackupArtifact {
            format_version: BACKUP_FORMAT_VERSION,
            schema_version: snapshot.schema_version,
            created,
            ciphertext,
        };
        let encoded = artifact.encode();

        let size = artifact.ciphertext.len();
        let row = tx.create(
            BACKUPS,
            Record::new()
                .with("name", name)
                .with("user_id", auth.user_id())
                .with("created", created)
                .with("size", i64::try_from(size).unwrap_or(i64::MAX))
                .with("ciphertext", artifact.ciphertext)
                .with("checksum", checksum.as_str())
                .with("schema_version", i64::try_from(snapshot.schema_version).unwrap_or(i64::MAX))
                .with("artifact_path", artifact_path.to_string_lossy().into_owned()),
        )?;
        let id = row
            .id()
            .ok_or_else(|| CoreError::integrity("backup row has no id"))?;

        // Last step inside the scope: nothing after it can abort the
        // commit except the journal write itself.
        fs.write_file(&artifact_path, &encoded)?;

        Ok(BackupInfo {
            id,
            name: name.to_string(),
            created,
            size,
            checksum,
            schema_version: snapshot.schema_version,
            artifact_path,
        })
    })?;

    info!(
        backup = %info.id,
        name,
        size = info.size,
        schema_version = info.schema_version,
        "backup created"
    );
    Ok(info)
}

/// Replaces the contents of every unprotected snapshot table with the
/// backup's rows, in one transaction.
///
/// # Errors
///
/// - not-found error: no backup with this id
/// - auth error: the backup belongs to another user, or the session is
///   no longer live
/// - integrity error: checksum mismatch, undecryptable or undecodable
///   ciphertext
/// - validation error: the snapshot is newer than the current schema or
///   names a table that does not exist
pub fn restore(tm: &TransactionManager, auth: &AuthSession, backup_id: RecordId) -> CoreResult<RestoreReport> {
    let report = tm.run(Scope::All, |tx| {
        ensure_live(tx.catalog(), auth, tx.now())?;
        let row = tx
            .get(BACKUPS, backup_id)?
            .ok_or_else(|| CoreError::not_found(format!("backup {backup_id} does not exist")))?;
        if row.integer("user_id") != Some(auth.user_id().as_i64()) {
            return Err(CoreError::auth(format!("backup {backup_id} belongs to another user")));
        }

        let ciphertext = row
            .bytes("ciphertext")
            .ok_or_else(|| CoreError::integrity("backup row has no ciphertext"))?;
        let expected = row.text("checksum").unwrap_or_default();
        let actual = content_hash(ciphertext);
        if actual != expected {
            return Err(CoreError::integrity(format!(
                "backup {backup_id} checksum mismatch: expected {expected}, got {actual}"
            )));
        }

        let created = row.integer("created").unwrap_or_default();
        let snapshot = open_snapshot(auth, created, ciphertext)?;

        let current = schema_version(tx.catalog())?;
        if snapshot.schema_version > current {
            return Err(CoreError::validation(format!(
                "backup has schema version {} but the engine is at {current}",
                snapshot.schema_version
            )));
        }
        if let Some(unknown) = snapshot.tables.iter().find(|t| !tx.catalog().contains(&t.name)) {
            return Err(CoreError::validation(format!(
                "backup names unknown table {}",
                unknown.name
            )));
        }
        if snapshot.database != tx.catalog().database() {
            warn!(
                backup = snapshot.database.as_str(),
                current = tx.catalog().database(),
                "restoring a backup of another database"
            );
        }

        let targets: Vec<&TableDump> = snapshot
            .tables
            .iter()
            .filter(|t| !RESTORE_PROTECTED.contains(&t.name.as_str()))
            .collect();
        for table in targets.iter().rev() {
            tx.clear(&table.name)?;
        }
        // Rows may point forward, so foreign keys are checked once every
        // table is refilled.
        let mut records = 0;
        for table in &targets {
            for row in &table.rows {
                tx.create_unchecked(&table.name, row.clone())?;
                records += 1;
            }
        }
        for table in &targets {
            tx.check_table_foreign_keys(&table.name)?;
        }
        Ok(RestoreReport {
            tables: targets.len(),
            records,
        })
    })?;

    info!(
        backup = %backup_id,
        tables = report.tables,
        records = report.records,
        "backup restored"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> BackupArtifact {
        BackupArtifact {
            format_version: BACKUP_FORMAT_VERSION,
            schema_version: 3,
            created: 1_700_000_000_000,
            ciphertext: vec![9; 40],
        }
    }

    #[test]
    fn artifact_header_layout() {
        let bytes = artifact().encode();
        assert_eq!(&bytes[..4], b"GLBK");
        assert_eq!(bytes.len(), HEADER_SIZE + 40);
        assert_eq!(BackupArtifact::decode(&bytes).unwrap(), artifact());
    }

    #[test]
    fn damaged_artifacts_are_rejected() {
        let bytes = artifact().encode();

        let err = BackupArtifact::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Integrity);

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'X';
        assert_eq!(
            BackupArtifact::decode(&wrong_magic).unwrap_err().kind(),
            crate::ErrorKind::Integrity
        );

        let mut future = bytes;
        future[4] = 9;
        assert_eq!(
            BackupArtifact::decode(&future).unwrap_err().kind(),
            crate::ErrorKind::Validation
        );
        assert!(BackupArtifact::decode(b"GLBK").is_err());
    }

    #[test]
    fn names_cannot_escape_the_backup_dir() {
        assert!(check_name("nightly").is_ok());
        for bad in ["", "  ", "../x", "a/b", "a\\b", ".hidden"] {
            assert!(check_name(bad).is_err(), "{bad}");
        }
    }
}
