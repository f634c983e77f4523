//! Structured reads over tables.
//!
//! A [`Query`] names a table, where clauses built from [`Predicate`]s,
//! ordering, a window, a projection and an optional join. It reads
//! through a [`RowSource`], so the same query runs against committed
//! state or inside a transaction.

mod builder;
mod predicate;
mod source;

pub use builder::{Direction, Query};
pub use predicate::{Clause, Condition, LikePattern, Predicate};
pub use source::RowSource;
