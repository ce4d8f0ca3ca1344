//! Transaction plane for the quill engine.
//!
//! A transaction never writes into shared base tables directly. Its
//! insertions are staged in a per-transaction, per-table write buffer
//! ([`LocalStorage`] / [`LocalTableStorage`]) keyed by row ids in the
//! reserved range at and above `MAX_ROW_ID`. Uniqueness against the
//! transaction's own uncommitted rows is enforced eagerly through shadow
//! indexes; uniqueness against committed data is enforced when the buffer
//! is flushed into the base table at commit, with a compensating pass that
//! unwinds partially installed index entries on conflict.
//!
//! Modules:
//! - `local_storage`: the staging buffer and the flush/commit protocol.
//! - `transaction`: transaction identity and lifecycle.
//! - `wal`: the append-event records a commit contributes to the log.

#![forbid(unsafe_code)]

pub mod local_storage;
pub mod transaction;
pub mod wal;

pub use local_storage::{AppendEvent, CommitState, LocalStorage, LocalTableStorage};
pub use transaction::{Transaction, TransactionManager};
pub use wal::{WalRecord, WriteAheadLog};
