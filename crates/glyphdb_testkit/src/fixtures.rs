//! Test fixtures and engine helpers.

use glyphdb_core::{AuthSession, Clock, Config, Engine, FileSystem, KdfParams, ManualClock, MemoryFileSystem};
use glyphdb_storage::InMemoryBackend;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Argon2 parameters cheap enough for tests.
pub const FAST_KDF: KdfParams = KdfParams::new(8, 1, 1);

/// 2023-11-14T22:13:20Z, where every fixture clock starts.
pub const START_TIME: i64 = 1_700_000_000_000;

/// A caller table used by query tests.
pub const NOTES_SCHEMA: &str = "
TABLE: notes
title: text not_null
tag: text
rank: integer
owner_id: integer foreign_key(users.id)
";

/// Configuration with fast key derivation and no fsync.
#[must_use]
pub fn fast_config() -> Config {
    Config::new().kdf(FAST_KDF).sync_on_commit(false)
}

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory engine whose clock, filesystem and journal stay
/// reachable from the test.
pub struct TestEngine {
    /// The engine instance.
    pub engine: Engine,
    /// The engine clock.
    pub clock: Arc<ManualClock>,
    /// The filesystem seen by the indexer and backups.
    pub fs: MemoryFileSystem,
    /// The journal backend, shared with reopened engines.
    pub backend: InMemoryBackend,
    config: Config,
}

impl TestEngine {
    /// Creates an engine with [`fast_config`] and [`NOTES_SCHEMA`].
    pub fn memory() -> Self {
        Self::with_config(fast_config().schema(NOTES_SCHEMA))
    }

    /// Creates an engine with `config`.
    pub fn with_config(config: Config) -> Self {
        Self::with_parts(config, MemoryFileSystem::new(), Arc::new(ManualClock::new(START_TIME)))
    }

    /// Creates an engine over a prepared filesystem.
    pub fn with_fs(fs: MemoryFileSystem) -> Self {
        Self::with_parts(
            fast_config().schema(NOTES_SCHEMA),
            fs,
            Arc::new(ManualClock::new(START_TIME)),
        )
    }

    fn with_parts(config: Config, fs: MemoryFileSystem, clock: Arc<ManualClock>) -> Self {
        init_tracing();
        let backend = InMemoryBackend::new();
        let engine = open(&config, &backend, &fs, &clock);
        Self {
            engine,
            clock,
            fs,
            backend,
            config,
        }
    }

    /// Drops the engine and replays its journal into a new one.
    #[must_use]
    pub fn reopen(self) -> Self {
        let Self {
            engine,
            clock,
            fs,
            backend,
            config,
        } = self;
        drop(engine);
        let engine = open(&config, &backend, &fs, &clock);
        Self {
            engine,
            clock,
            fs,
            backend,
            config,
        }
    }

    /// Registers `username` and logs in.
    pub fn user(&self, username: &str, password: &str) -> AuthSession {
        self.engine
            .register_user(username, password)
            .expect("Failed to register user");
        self.engine
            .login(username, password, serde_json::Value::Null)
            .expect("Failed to log in")
    }
}

fn open(config: &Config, backend: &InMemoryBackend, fs: &MemoryFileSystem, clock: &Arc<ManualClock>) -> Engine {
    let fs: Arc<dyn FileSystem> = Arc::new(fs.clone());
    let clock: Arc<dyn Clock> = clock.clone();
    Engine::open_with(config.clone(), Box::new(backend.clone()), fs, clock).expect("Failed to open engine")
}

impl std::ops::Deref for TestEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Runs a test with a temporary on-disk engine.
pub fn with_file_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Engine, &Path) -> R,
{
    init_tracing();
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let engine = Engine::open(temp_dir.path(), fast_config().schema(NOTES_SCHEMA))
        .expect("Failed to open file engine");
    f(&engine, temp_dir.path())
}
