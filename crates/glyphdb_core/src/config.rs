//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Argon2id cost parameters for master-key derivation and password hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Creates a parameter set.
    #[must_use]
    pub const fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP baseline for Argon2id.
        Self::new(19 * 1024, 2, 1)
    }
}

/// Configuration for opening an engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the engine directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Schema text applied on top of the built-in tables.
    pub schema: Option<String>,

    /// Lifetime of a login session.
    pub session_ttl: Duration,

    /// Key derivation cost.
    pub kdf: KdfParams,

    /// Where backup artifacts are written. Defaults to `<dir>/backups`
    /// for persistent engines and `backups` for in-memory ones.
    pub backup_dir: Option<PathBuf>,

    /// Tables exported by `backup`. `None` exports every table except
    /// the engine-owned ones.
    pub export_tables: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            schema: None,
            session_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            kdf: KdfParams::default(),
            backup_dir: None,
            export_tables: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the caller schema text.
    #[must_use]
    pub fn schema(mut self, text: impl Into<String>) -> Self {
        self.schema = Some(text.into());
        self
    }

    /// Sets the session lifetime.
    #[must_use]
    pub const fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Sets the key derivation cost.
    #[must_use]
    pub const fn kdf(mut self, params: KdfParams) -> Self {
        self.kdf = params;
        self
    }

    /// Sets the backup artifact directory.
    #[must_use]
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Restricts backups to the given tables.
    #[must_use]
    pub fn export_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.export_tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.session_ttl, Duration::from_secs(604_800));
        assert!(config.export_tables.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .kdf(KdfParams::new(8, 1, 1))
            .schema("TABLE: notes")
            .export_tables(["notes"]);

        assert!(!config.create_if_missing);
        assert_eq!(config.kdf.memory_kib, 8);
        assert_eq!(config.schema.as_deref(), Some("TABLE: notes"));
        assert_eq!(config.export_tables, Some(vec!["notes".to_string()]));
    }
}
