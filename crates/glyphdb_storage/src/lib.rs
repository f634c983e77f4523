//! # GlyphDB Storage
//!
//! Append-only byte stores underneath the GlyphDB journal.
//!
//! Backends know nothing about tables, records or commit frames. They
//! hand out offsets on append, return exactly the bytes written at an
//! offset, and can be cut back to a shorter length when the engine finds
//! a torn tail during recovery.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - shared in-process buffer, used by in-memory engines and tests
//! - [`FileBackend`] - a single file on disk
//!
//! ## Example
//!
//! ```rust
//! use glyphdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
