//! Persistent table store.
//!
//! Tables live in memory as a [`Catalog`] of [`TableState`]s and are made
//! durable by the append-only [`Journal`]. Opening an engine compiles the
//! schema into an empty catalog and replays every journal batch on top.
//!
//! ## Invariants
//!
//! - a batch is either fully in the journal and fully applied, or neither
//! - replaying the journal twice from the same base yields the same catalog
//! - record ids are never reused within a table

mod catalog;
mod index;
mod journal;
mod table;

pub use catalog::Catalog;
pub use index::ColumnIndex;
pub use journal::{compute_crc32, CommitBatch, Journal, JournalOp, SchemaOp};
pub use table::TableState;
