//! # GlyphDB Core
//!
//! Local-first data and credential engine.
//!
//! This crate provides:
//! - A table store made durable by an append-only commit journal
//! - Line-oriented schema text, a descriptor compiler and migrations
//! - An immutable query builder with predicates, ordering, windows,
//!   projection and a single join
//! - Serialized write scopes with all-or-nothing commits
//! - An Argon2id/AES-256-GCM vault for provider credentials
//! - Login sessions holding the per-user master key in memory only
//! - A content-addressed file indexer keyed by glyphs
//! - Encrypted backup and restore
//! - A bounded TTL cache for callers
//!
//! ## Example
//!
//! ```rust,ignore
//! use glyphdb_core::{Config, Engine, Predicate, Query, Direction};
//!
//! let engine = Engine::open_in_memory(Config::default())?;
//! let recent = engine.query(
//!     &Query::new()
//!         .from("projects")
//!         .filter(Predicate::new().like("name", "glyph%")?)
//!         .order_by("updated", Direction::Desc)
//!         .limit(10),
//! )?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backup;
mod cache;
pub mod clock;
mod config;
mod dir;
mod engine;
mod error;
pub mod indexer;
pub mod migration;
pub mod query;
pub mod schema;
pub mod session;
pub mod store;
pub mod transaction;
mod types;
mod value;
pub mod vault;

pub use backup::{BackupArtifact, BackupInfo, RestoreReport, Snapshot};
pub use cache::TtlCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, KdfParams};
pub use engine::Engine;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use indexer::{FileEntry, FileStat, FileSystem, IndexReport, LocalFileSystem, MemoryFileSystem};
pub use migration::{AppliedMigration, MigrationDescriptor, MigrationVersion};
pub use query::{Direction, Predicate, Query, RowSource};
pub use session::AuthSession;
pub use transaction::{Scope, Transaction};
pub use types::{RecordId, SequenceNumber, Timestamp, TransactionId};
pub use value::{Record, Value};
