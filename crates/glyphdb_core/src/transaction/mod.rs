//! Transaction management.
//!
//! GlyphDB transactions are write scopes:
//! - **Atomicity**: every write of a scope commits as one journal batch, or none does
//! - **Isolation**: readers see the last committed catalog; a scope sees its own writes
//! - **Serialization**: one scope at a time, so read-modify-write inside a scope never loses updates
//! - **Durability**: the batch is in the journal before the new state is visible

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Scope, Transaction};
