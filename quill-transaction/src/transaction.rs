//! Transaction identity and lifecycle.
//!
//! The staging subsystem is single-writer per transaction: one thread of
//! execution drives a [`Transaction`], which exclusively owns its
//! [`LocalStorage`]. The [`TransactionManager`] allocates monotonically
//! increasing transaction and commit ids with atomic counters and runs the
//! commit and rollback paths.

use std::sync::atomic::{AtomicU64, Ordering};

use quill_result::Result;
use quill_types::TxnId;
use quill_types::reserved::FIRST_TXN_ID;

use crate::local_storage::{CommitState, LocalStorage};
use crate::wal::WriteAheadLog;

/// One in-flight transaction and its write buffer.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    storage: LocalStorage,
}

impl Transaction {
    fn new(id: TxnId) -> Self {
        Self {
            id,
            storage: LocalStorage::new(id),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// The transaction's staged writes.
    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut LocalStorage {
        &mut self.storage
    }
}

/// Allocates transaction identities and drives commit/rollback.
#[derive(Debug)]
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    next_commit_id: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(FIRST_TXN_ID),
            next_commit_id: AtomicU64::new(1),
        }
    }

    /// Begin a new transaction with a fresh, monotonically assigned id.
    pub fn begin(&self) -> Transaction {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(txn_id = id, "begin transaction");
        Transaction::new(id)
    }

    /// Commit a transaction: flush every staged table into its base table
    /// and report the append events (sealed by a commit marker) to `wal`.
    ///
    /// Returns the commit id on success. On a constraint violation the
    /// error propagates, the transaction is consumed, and its remaining
    /// staged state is discarded with it; nothing reaches the log.
    pub fn commit(
        &self,
        mut transaction: Transaction,
        mut wal: Option<&mut WriteAheadLog>,
    ) -> Result<TxnId> {
        let commit_id = self.next_commit_id.fetch_add(1, Ordering::SeqCst);
        let mut commit_state = CommitState::new(commit_id);
        transaction
            .storage
            .commit(&mut commit_state, wal.as_deref_mut())?;
        if let Some(wal) = wal {
            wal.log_commit(commit_id);
        }
        tracing::debug!(
            txn_id = transaction.id,
            commit_id,
            tables = commit_state.append_events.len(),
            "committed transaction"
        );
        Ok(commit_id)
    }

    /// Abort a transaction, discarding its entire write buffer. No log
    /// activity, no base-table changes beyond what the transaction already
    /// routed through the committed-side paths.
    pub fn rollback(&self, transaction: Transaction) {
        tracing::debug!(
            txn_id = transaction.id,
            staged_tables = transaction.storage.staged_table_count(),
            "rolled back transaction"
        );
        drop(transaction);
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
