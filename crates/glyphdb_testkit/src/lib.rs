//! # GlyphDB Testkit
//!
//! Test utilities for GlyphDB.
//!
//! This crate provides:
//! - Engine fixtures with a manual clock, an in-memory filesystem and
//!   cheap key derivation
//! - Property-based test generators using proptest
//! - Test logging through `tracing-subscriber`
//!
//! The cross-module property tests live in `tests/`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use glyphdb_testkit::prelude::*;
//!
//! #[test]
//! fn logs_in() {
//!     let engine = TestEngine::memory();
//!     let auth = engine.user("ada", "pw");
//!     assert!(engine.validate_session(auth.token()).is_ok());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
