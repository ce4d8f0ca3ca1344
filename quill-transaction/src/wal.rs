//! Write-ahead log events contributed by commits.
//!
//! Only the event stream lives here: a committing transaction reports which
//! append regions became visible, and the commit marker seals them. The
//! durable encoding is `bitcode`; actual persistence, checkpointing, and
//! replay belong to the storage layer above this crate.

use bitcode::{Decode, Encode};

use quill_result::{Error, Result};
use quill_types::{RowId, TableId, TxnId};

/// One durable log record.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum WalRecord {
    /// A flushed append region: `count` rows became visible in `table_id`
    /// starting at `row_start`.
    Append {
        table_id: TableId,
        row_start: RowId,
        count: u64,
    },
    /// Seals the preceding records of one transaction.
    Commit { commit_id: TxnId },
}

/// In-memory sink for commit-time log records.
#[derive(Debug, Default)]
pub struct WriteAheadLog {
    records: Vec<WalRecord>,
}

impl WriteAheadLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an append region became visible.
    pub fn log_append(&mut self, table_id: TableId, row_start: RowId, count: u64) {
        tracing::trace!(table_id, row_start, count, "wal append record");
        self.records.push(WalRecord::Append {
            table_id,
            row_start,
            count,
        });
    }

    /// Record a commit marker.
    pub fn log_commit(&mut self, commit_id: TxnId) {
        tracing::trace!(commit_id, "wal commit record");
        self.records.push(WalRecord::Commit { commit_id });
    }

    pub fn records(&self) -> &[WalRecord] {
        &self.records
    }

    /// Serialize the record stream.
    pub fn encode(&self) -> Vec<u8> {
        bitcode::encode(&self.records)
    }

    /// Deserialize a record stream produced by [`WriteAheadLog::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Vec<WalRecord>> {
        bitcode::decode(bytes).map_err(|err| Error::Internal(format!("wal decode failed: {err}")))
    }
}
