//! Transaction manager.

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::store::{Catalog, CommitBatch, Journal};
use crate::transaction::state::{Scope, Transaction};
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::debug;

/// Runs write scopes against committed state.
///
/// ## Single-writer guarantee
///
/// The journal mutex doubles as the write lock: a scope holds it from
/// open to commit, so write scopes run one at a time. Readers never take
/// it; they clone the `Arc` of the committed catalog and are unaffected
/// by a commit that happens while they read.
///
/// ## Commit
///
/// 1. the closure builds the new catalog off to the side
/// 2. its operations are appended to the journal as one batch
/// 3. the new catalog replaces the committed one
///
/// A failure before step 3 leaves committed state untouched.
pub struct TransactionManager {
    committed: RwLock<Arc<Catalog>>,
    journal: Mutex<Journal>,
    writer: Mutex<Option<ThreadId>>,
    next_txid: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl TransactionManager {
    /// Creates a manager over a recovered catalog and its journal.
    pub fn new(catalog: Catalog, journal: Journal, clock: Arc<dyn Clock>) -> Self {
        Self {
            committed: RwLock::new(Arc::new(catalog)),
            journal: Mutex::new(journal),
            writer: Mutex::new(None),
            next_txid: AtomicU64::new(1),
            clock,
        }
    }

    /// Returns the committed catalog.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.committed.read())
    }

    /// Returns the sequence number of the last commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.committed.read().sequence()
    }

    /// Returns the engine clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Runs `work` in a write scope, committing on `Ok` and discarding
    /// every write on `Err`.
    ///
    /// # Errors
    ///
    /// Returns a conflict error if this thread already has a scope open,
    /// the error returned by `work`, or a storage error from the journal.
    pub fn run<T, F>(&self, scope: Scope, work: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let me = thread::current().id();
        if *self.writer.lock() == Some(me) {
            return Err(CoreError::conflict(
                "a write scope is already open on this thread",
            ));
        }

        let mut journal = self.journal.lock();
        let _owner = WriterMark::set(&self.writer, me);

        let base = self.snapshot();
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let mut txn = Transaction::new(id, scope, (*base).clone(), Arc::clone(&self.clock));

        let value = match work(&mut txn) {
            Ok(value) => value,
            Err(err) => {
                debug!(txn = %id, error = %err, "transaction aborted");
                return Err(err);
            }
        };

        let (mut working, ops) = txn.into_parts();
        if ops.is_empty() {
            return Ok(value);
        }

        let sequence = base.sequence().next();
        let op_count = ops.len();
        journal.append(&CommitBatch { sequence, ops })?;
        working.set_sequence(sequence);
        *self.committed.write() = Arc::new(working);

        debug!(txn = %id, %sequence, ops = op_count, "transaction committed");
        Ok(value)
    }

    /// Flushes and syncs the journal.
    ///
    /// # Errors
    ///
    /// Returns a storage error if syncing fails.
    pub fn sync(&self) -> CoreResult<()> {
        self.journal.lock().sync()
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_seq", &self.committed_seq())
            .field("next_txid", &self.next_txid.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Records the thread owning the write lock, cleared on drop so a panic
/// inside a scope doesn't wedge the thread.
struct WriterMark<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> WriterMark<'a> {
    fn set(slot: &'a Mutex<Option<ThreadId>>, owner: ThreadId) -> Self {
        *slot.lock() = Some(owner);
        Self { slot }
    }
}

impl Drop for WriterMark<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}
