//! Engine facade and recovery.

use crate::backup::{self, BackupArtifact, BackupInfo, RestoreReport};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dir::EngineDir;
use crate::error::CoreResult;
use crate::indexer::{self, FileEntry, FileSystem, IndexReport, LocalFileSystem, MemoryFileSystem};
use crate::migration::{self, AppliedMigration, MigrationDescriptor, MigrationVersion};
use crate::query::{Predicate, Query, RowSource};
use crate::schema::base_schema;
use crate::session::{self, AuthSession};
use crate::store::{Catalog, Journal};
use crate::transaction::{Scope, Transaction, TransactionManager};
use crate::types::{RecordId, SequenceNumber};
use crate::value::{Record, Value};
use crate::vault;
use glyphdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

/// The main engine handle.
///
/// `Engine` is `Send + Sync`; share it between threads behind an `Arc`.
/// Reads see the last committed state and never block on writers. Writes
/// run one scope at a time.
///
/// # Opening an engine
///
/// ```rust,ignore
/// use glyphdb_core::{Config, Engine, Record};
///
/// let engine = Engine::open("my_data", Config::default())?;
/// let user = engine.register_user("ada", "correct horse")?;
/// let auth = engine.login("ada", "correct horse", serde_json::Value::Null)?;
/// engine.store_credential(&auth, "openai", "sk-...")?;
/// engine.close()?;
/// ```
///
/// # In-memory engines
///
/// `Engine::open_in_memory` keeps the journal in memory and indexes an
/// in-memory filesystem. Everything is lost on drop.
pub struct Engine {
    tm: TransactionManager,
    config: Config,
    fs: Arc<dyn FileSystem>,
    backup_dir: PathBuf,
    dir: Option<EngineDir>,
}

impl Engine {
    /// Opens (or creates) a persistent engine in the directory `path`.
    ///
    /// The directory is locked for the lifetime of the engine. The journal
    /// is replayed; a torn final frame is truncated with a warning.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DatabaseLocked`](crate::CoreError::DatabaseLocked):
    ///   another process has the directory open
    /// - validation error: the configured schema is malformed
    /// - integrity error: the journal is corrupt before its last frame
    pub fn open(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let dir = EngineDir::open(path.as_ref(), config.create_if_missing)?;
        let backend = FileBackend::open(&dir.journal_path())?;
        let backup_dir = config.backup_dir.clone().unwrap_or_else(|| dir.backup_dir());
        let mut engine = Self::open_with(
            config,
            Box::new(backend),
            Arc::new(LocalFileSystem),
            Arc::new(SystemClock),
        )?;
        engine.backup_dir = backup_dir;
        engine.dir = Some(dir);
        Ok(engine)
    }

    /// Opens a fresh engine backed by memory only.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configured schema is malformed.
    pub fn open_in_memory(config: Config) -> CoreResult<Self> {
        Self::open_with(
            config,
            Box::new(InMemoryBackend::new()),
            Arc::new(MemoryFileSystem::new()),
            Arc::new(SystemClock),
        )
    }

    /// Opens an engine over explicit collaborators.
    ///
    /// This is the lower-level constructor used by tests and embedders
    /// that supply their own journal backend, filesystem or clock.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus locking.
    pub fn open_with(
        config: Config,
        backend: Box<dyn StorageBackend>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let (database, tables) = base_schema(config.schema.as_deref())?;
        let mut catalog = Catalog::new(database, tables);

        let mut journal = Journal::new(backend, config.sync_on_commit);
        let batches = journal.recover()?;
        for batch in &batches {
            catalog.replay(batch)?;
        }
        info!(
            database = catalog.database(),
            tables = catalog.table_names().len(),
            batches = batches.len(),
            sequence = %catalog.sequence(),
            "engine opened"
        );

        let backup_dir = config
            .backup_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("backups"));
        Ok(Self {
            tm: TransactionManager::new(catalog, journal, clock),
            config,
            fs,
            backup_dir,
            dir: None,
        })
    }

    /// Syncs the journal and releases the directory lock.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the final sync fails.
    pub fn close(self) -> CoreResult<()> {
        self.tm.sync()?;
        info!(sequence = %self.tm.committed_seq(), "engine closed");
        Ok(())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the engine directory, if persistent.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(EngineDir::path)
    }

    /// Returns the engine clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.tm.clock()
    }

    /// Returns the filesystem used by the indexer and backups.
    #[must_use]
    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Returns the committed catalog.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.tm.snapshot()
    }

    /// Returns the sequence number of the last commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.tm.committed_seq()
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Inserts one record.
    ///
    /// # Errors
    ///
    /// See [`Transaction::create`].
    pub fn create(&self, table: &str, record: Record) -> CoreResult<Record> {
        self.tm.run(Scope::tables([table]), |tx| tx.create(table, record))
    }

    /// Returns one record by id.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown table.
    pub fn get(&self, table: &str, id: RecordId) -> CoreResult<Option<Record>> {
        Ok(self.tm.snapshot().table(table)?.get(id).cloned())
    }

    /// Returns every committed record of `table` matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown table.
    pub fn find(&self, table: &str, predicate: &Predicate) -> CoreResult<Vec<Record>> {
        Query::new().from(table).filter(predicate.clone()).execute(self)
    }

    /// Runs a query against committed state.
    ///
    /// # Errors
    ///
    /// See [`Query::execute`].
    pub fn query(&self, query: &Query) -> CoreResult<Vec<Record>> {
        query.execute(self)
    }

    /// Merges `patch` into every matching record.
    ///
    /// # Errors
    ///
    /// See [`Transaction::update`].
    pub fn update(&self, table: &str, patch: &Record, predicate: &Predicate) -> CoreResult<usize> {
        self.tm
            .run(Scope::tables([table]), |tx| tx.update(table, patch, predicate))
    }

    /// Deletes every matching record.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown table.
    pub fn delete(&self, table: &str, predicate: &Predicate) -> CoreResult<usize> {
        self.tm
            .run(Scope::tables([table]), |tx| tx.delete(table, predicate))
    }

    /// Runs `work` in a write scope over `tables`. Commits on `Ok`,
    /// discards every write on `Err`.
    ///
    /// # Errors
    ///
    /// Returns a conflict error when called from inside another scope on
    /// the same thread, otherwise whatever `work` or the commit returns.
    pub fn transaction<I, S, T, F>(&self, tables: I, work: F) -> CoreResult<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        self.tm.run(Scope::tables(tables), work)
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    /// Parses and applies a migration descriptor. Returns the new version.
    ///
    /// # Errors
    ///
    /// - conflict error: the version was already applied
    /// - validation error: malformed descriptor or script, or a version
    ///   other than current + 1
    pub fn migrate(&self, descriptor: &str) -> CoreResult<MigrationVersion> {
        self.apply_migration(&MigrationDescriptor::parse(descriptor)?)
    }

    /// Applies an already parsed migration. Returns the new version.
    ///
    /// # Errors
    ///
    /// See [`migrate`](Self::migrate).
    pub fn apply_migration(&self, descriptor: &MigrationDescriptor) -> CoreResult<MigrationVersion> {
        self.tm
            .run(Scope::All, |tx| migration::apply(tx, descriptor))?;
        info!(
            version = descriptor.version,
            name = descriptor.name.as_str(),
            "migration applied"
        );
        Ok(descriptor.version)
    }

    /// Reverts the latest migration and returns it.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if nothing was applied and a validation
    /// error if the latest migration has no down script.
    pub fn rollback(&self) -> CoreResult<AppliedMigration> {
        let reverted = self.tm.run(Scope::All, migration::revert)?;
        info!(
            version = reverted.version,
            name = reverted.name.as_str(),
            "migration rolled back"
        );
        Ok(reverted)
    }

    /// Returns the highest applied migration version, 0 if none.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the `migrations` table is missing.
    pub fn schema_version(&self) -> CoreResult<MigrationVersion> {
        migration::schema_version(&self.tm.snapshot())
    }

    /// Returns every applied migration, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the `migrations` table is missing.
    pub fn applied_migrations(&self) -> CoreResult<Vec<AppliedMigration>> {
        migration::applied_migrations(&self.tm.snapshot())
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    /// Returns the directory backup artifacts are written to.
    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Creates an encrypted backup owned by the session user.
    ///
    /// # Errors
    ///
    /// See [`backup::backup`].
    pub fn backup(&self, auth: &AuthSession, name: &str) -> CoreResult<BackupInfo> {
        backup::backup(
            &self.tm,
            self.fs.as_ref(),
            &self.config,
            &self.backup_dir,
            auth,
            name,
        )
    }

    /// Restores a backup.
    ///
    /// # Errors
    ///
    /// See [`backup::restore`].
    pub fn restore(&self, auth: &AuthSession, backup_id: RecordId) -> CoreResult<RestoreReport> {
        backup::restore(&self.tm, auth, backup_id)
    }

    /// Reads and validates a backup artifact file.
    ///
    /// # Errors
    ///
    /// See [`BackupArtifact::decode`].
    pub fn read_backup_artifact(&self, path: &Path) -> CoreResult<BackupArtifact> {
        backup::read_backup_artifact(self.fs.as_ref(), path)
    }

    // ------------------------------------------------------------------
    // Users and sessions
    // ------------------------------------------------------------------

    /// Creates a user account.
    ///
    /// # Errors
    ///
    /// See [`session::register_user`].
    pub fn register_user(&self, username: &str, password: &str) -> CoreResult<Record> {
        session::register_user(&self.tm, &self.config, username, password)
    }

    /// Logs in and returns the authenticated session.
    ///
    /// # Errors
    ///
    /// Returns an auth error for bad credentials or a disabled account.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> CoreResult<AuthSession> {
        session::login(&self.tm, &self.config, username, password, metadata)
    }

    /// Returns the session row of a live token.
    ///
    /// # Errors
    ///
    /// Returns an auth error if the token is unknown or expired.
    pub fn validate_session(&self, token: &str) -> CoreResult<Record> {
        session::live_session(&self.tm.snapshot(), token, self.clock().now())
    }

    /// Re-derives the master key for a live session.
    ///
    /// # Errors
    ///
    /// Returns an auth error if the session is not live or the password
    /// is wrong.
    pub fn resume_session(&self, token: &str, password: &str) -> CoreResult<AuthSession> {
        session::resume_session(&self.tm, &self.config, token, password)
    }

    /// Ends a session.
    ///
    /// # Errors
    ///
    /// Returns an auth error for an unknown token.
    pub fn logout(&self, token: &str) -> CoreResult<()> {
        session::logout(&self.tm, token)
    }

    /// Deletes expired session rows and returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    pub fn purge_expired_sessions(&self) -> CoreResult<usize> {
        session::purge_expired_sessions(&self.tm)
    }

    // ------------------------------------------------------------------
    // Vault
    // ------------------------------------------------------------------

    /// Encrypts and stores a provider secret. Returns the provider glyph.
    ///
    /// # Errors
    ///
    /// See [`vault::store_credential`].
    pub fn store_credential(&self, auth: &AuthSession, provider: &str, secret: &str) -> CoreResult<String> {
        vault::store_credential(&self.tm, auth, provider, secret)
    }

    /// Decrypts a provider secret.
    ///
    /// # Errors
    ///
    /// See [`vault::get_credential`].
    pub fn get_credential(&self, auth: &AuthSession, glyph: &str) -> CoreResult<Zeroizing<String>> {
        vault::get_credential(&self.tm, auth, glyph)
    }

    /// Counts one use of `glyph_type` today and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns an auth error if the session is not live.
    pub fn track_glyph_usage(&self, auth: &AuthSession, glyph_type: &str) -> CoreResult<i64> {
        vault::track_glyph_usage(&self.tm, auth, glyph_type)
    }

    // ------------------------------------------------------------------
    // File indexer
    // ------------------------------------------------------------------

    /// Indexes every file below `root`.
    ///
    /// # Errors
    ///
    /// See [`indexer::index_project`].
    pub fn index_project(&self, auth: Option<&AuthSession>, root: impl AsRef<Path>) -> CoreResult<IndexReport> {
        indexer::index_project(&self.tm, self.fs.as_ref(), auth, root.as_ref())
    }

    /// Returns the file named by `glyph` with its contents.
    ///
    /// # Errors
    ///
    /// See [`indexer::get_file_by_glyph`].
    pub fn get_file_by_glyph(&self, glyph: &str) -> CoreResult<FileEntry> {
        indexer::get_file_by_glyph(self, self.fs.as_ref(), glyph)
    }

    /// Rewrites the file named by `glyph`.
    ///
    /// # Errors
    ///
    /// See [`indexer::update_file_by_glyph`].
    pub fn update_file_by_glyph(
        &self,
        auth: Option<&AuthSession>,
        glyph: &str,
        content: &[u8],
    ) -> CoreResult<Record> {
        indexer::update_file_by_glyph(&self.tm, self.fs.as_ref(), auth, glyph, content)
    }

    /// Returns the change history of `glyph`, oldest first.
    ///
    /// # Errors
    ///
    /// Only catalog failures.
    pub fn file_history(&self, glyph: &str) -> CoreResult<Vec<Record>> {
        indexer::file_history(self, glyph)
    }
}

impl RowSource for Engine {
    fn scan(&self, table: &str) -> CoreResult<Vec<Record>> {
        self.tm.snapshot().scan(table)
    }

    fn lookup(&self, table: &str, column: &str, value: &Value) -> CoreResult<Option<Vec<Record>>> {
        self.tm.snapshot().lookup(table, column, value)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.path())
            .field("committed_seq", &self.committed_seq())
            .field("backup_dir", &self.backup_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::KdfParams;
    use crate::schema::builtin::{FILES, USERS};
    use crate::{CoreError, ErrorKind};

    fn fast() -> Config {
        Config::new().kdf(KdfParams::new(8, 1, 1)).sync_on_commit(false)
    }

    const NOTES: &str = "
TABLE: notes
title: text not_null
tag: text
rank: integer
";

    #[test]
    fn crud_on_committed_state() {
        let engine = Engine::open_in_memory(fast().schema(NOTES)).unwrap();
        let a = engine
            .create("notes", Record::new().with("title", "a").with("rank", 2))
            .unwrap();
        engine
            .create("notes", Record::new().with("title", "b").with("rank", 1))
            .unwrap();
        assert_eq!(a.id(), Some(RecordId::new(1)));
        assert_eq!(engine.get("notes", RecordId::new(1)).unwrap(), Some(a));

        let changed = engine
            .update(
                "notes",
                &Record::new().with("tag", "x"),
                &Predicate::new().gt("rank", 1),
            )
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(engine.find("notes", &Predicate::new().eq("tag", "x")).unwrap().len(), 1);

        assert_eq!(engine.delete("notes", &Predicate::new()).unwrap(), 2);
        assert!(engine.query(&Query::new().from("notes")).unwrap().is_empty());
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let engine = Engine::open_in_memory(fast().schema(NOTES)).unwrap();
        let before = engine.committed_seq();
        let err = engine
            .transaction(["notes"], |tx| {
                tx.create("notes", Record::new().with("title", "kept?"))?;
                tx.create("notes", Record::new())
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(engine.committed_seq(), before);
        assert!(engine.find("notes", &Predicate::new()).unwrap().is_empty());
    }

    #[test]
    fn nested_scope_on_same_thread_conflicts() {
        let engine = Engine::open_in_memory(fast().schema(NOTES)).unwrap();
        let err = engine
            .transaction(["notes"], |_| engine.create("notes", Record::new().with("title", "x")))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn journal_replays_on_reopen() {
        let backend = InMemoryBackend::new();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(10));
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        {
            let engine =
                Engine::open_with(fast().schema(NOTES), Box::new(backend.clone()), fs.clone(), clock.clone())
                    .unwrap();
            engine.create("notes", Record::new().with("title", "kept")).unwrap();
            engine
                .migrate("MIGRATION: 1\nNAME: tags\nUP:\nTABLE: tags\nlabel: text unique\nDOWN:\nDROP TABLE: tags\n")
                .unwrap();
        }

        let engine = Engine::open_with(fast().schema(NOTES), Box::new(backend), fs, clock).unwrap();
        assert_eq!(engine.find("notes", &Predicate::new()).unwrap().len(), 1);
        assert_eq!(engine.schema_version().unwrap(), 1);
        assert!(engine.snapshot().contains("tags"));
        assert_eq!(engine.committed_seq(), SequenceNumber::new(2));
    }

    #[test]
    fn torn_tail_is_dropped() {
        let backend = InMemoryBackend::new();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(10));
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        {
            let engine =
                Engine::open_with(fast().schema(NOTES), Box::new(backend.clone()), fs.clone(), clock.clone())
                    .unwrap();
            engine.create("notes", Record::new().with("title", "one")).unwrap();
            engine.create("notes", Record::new().with("title", "two")).unwrap();
        }
        let mut torn = backend.snapshot();
        torn.truncate(torn.len() - 3);

        let engine = Engine::open_with(
            fast().schema(NOTES),
            Box::new(InMemoryBackend::with_data(torn)),
            fs,
            clock,
        )
        .unwrap();
        let rows = engine.find("notes", &Predicate::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("title"), Some("one"));
    }

    #[test]
    fn directory_is_locked_while_open() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::open(tmp.path(), fast()).unwrap();
        engine.register_user("ada", "pw").unwrap();
        assert!(matches!(
            Engine::open(tmp.path(), fast()),
            Err(CoreError::DatabaseLocked)
        ));
        engine.close().unwrap();

        let engine = Engine::open(tmp.path(), fast()).unwrap();
        assert_eq!(engine.snapshot().table(USERS).unwrap().len(), 1);
        assert_eq!(engine.backup_dir(), tmp.path().join("backups"));
    }

    #[test]
    fn sessions_and_vault_through_the_facade() {
        let engine = Engine::open_in_memory(fast()).unwrap();
        engine.register_user("ada", "pw").unwrap();
        let auth = engine.login("ada", "pw", serde_json::Value::Null).unwrap();
        assert!(engine.validate_session(auth.token()).is_ok());

        let glyph = engine.store_credential(&auth, "anthropic", "sk-secret").unwrap();
        assert_eq!(engine.get_credential(&auth, &glyph).unwrap().as_str(), "sk-secret");
        assert_eq!(engine.track_glyph_usage(&auth, "code").unwrap(), 1);

        engine.logout(auth.token()).unwrap();
        assert_eq!(
            engine.get_credential(&auth, &glyph).unwrap_err().kind(),
            ErrorKind::Auth
        );
    }

    #[test]
    fn indexer_through_the_facade() {
        let fs = MemoryFileSystem::new().with_file("/p/a.txt", "alpha");
        let engine = Engine::open_with(
            fast(),
            Box::new(InMemoryBackend::new()),
            Arc::new(fs),
            Arc::new(SystemClock),
        )
        .unwrap();
        let report = engine.index_project(None, "/p").unwrap();
        assert_eq!(report.indexed, 1);

        let glyph = indexer::glyph_for_path("/p/a.txt");
        assert_eq!(engine.get_file_by_glyph(&glyph).unwrap().content, b"alpha");
        engine.update_file_by_glyph(None, &glyph, b"beta").unwrap();
        assert_eq!(engine.file_history(&glyph).unwrap().len(), 1);
        assert_eq!(engine.snapshot().table(FILES).unwrap().len(), 1);
    }

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
