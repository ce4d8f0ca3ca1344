//! Index capability trait and per-table index sets.
//!
//! Indexes are modeled as a capability interface: enumerate, unique flag,
//! keyed insert returning ok/conflict, and keyed removal. The default
//! implementation lives in [`crate::art`]; nothing outside that module
//! depends on how keys are stored.

use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};

use quill_result::{Error, Result};
use quill_types::{FieldId, RowId};

/// Key expression of an index.
///
/// Shadow indexes are constructed with copies of the base index's
/// expressions, so the variants here must stay cheaply cloneable.
#[derive(Debug, Clone)]
pub enum IndexExpr {
    /// The value of one table column.
    Column(FieldId),
}

impl IndexExpr {
    /// Evaluate against a full-width chunk.
    pub fn evaluate<'a>(&self, batch: &'a RecordBatch) -> Result<&'a ArrayRef> {
        match self {
            IndexExpr::Column(id) => batch.columns().get(*id as usize).ok_or_else(|| {
                Error::Internal(format!(
                    "index expression references column {id} but chunk has {}",
                    batch.num_columns()
                ))
            }),
        }
    }
}

/// Capability interface over one table index.
///
/// `insert` must be atomic per call: when it reports a conflict, no key from
/// that call remains installed. Removal is idempotent.
pub trait TableIndex: Send + Sync {
    /// Columns this index is declared over.
    fn column_ids(&self) -> &[FieldId];

    /// Key expressions, copied verbatim when a shadow index is built.
    fn expressions(&self) -> &[IndexExpr];

    /// Whether duplicate keys are rejected.
    fn is_unique(&self) -> bool;

    /// Insert keys derived from `batch`, one per row, keyed by `row_ids`.
    ///
    /// Returns a constraint error on a duplicate key in a unique index,
    /// including duplicates within `batch` itself.
    fn insert(&self, batch: &RecordBatch, row_ids: &[RowId]) -> Result<()>;

    /// Remove the keys previously installed for these rows.
    fn remove(&self, batch: &RecordBatch, row_ids: &[RowId]) -> Result<()>;

    /// Number of installed entries. Diagnostic.
    fn entry_count(&self) -> usize;

    /// Whether any installed entry is keyed by `row_id`. Diagnostic.
    fn contains_row(&self, row_id: RowId) -> bool;
}

/// Consecutive row ids starting at `base`.
pub fn contiguous_row_ids(base: RowId, count: usize) -> Vec<RowId> {
    (0..count as u64).map(|offset| base + offset).collect()
}

/// The indexes of one table (base or shadow side).
#[derive(Clone, Default)]
pub struct IndexSet {
    indexes: Vec<Arc<dyn TableIndex>>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_index(&mut self, index: Arc<dyn TableIndex>) {
        self.indexes.push(index);
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TableIndex>> {
        self.indexes.iter()
    }

    /// Visit each index until the visitor returns `true` (stop).
    pub fn scan(&self, mut visitor: impl FnMut(&dyn TableIndex) -> bool) {
        for index in &self.indexes {
            if visitor(index.as_ref()) {
                break;
            }
        }
    }

    /// Install one chunk into every index, keying rows from `base_row_id`.
    ///
    /// Chunk-atomic: if any index rejects, the installs already made into
    /// earlier indexes for this chunk are taken out again before the error
    /// is returned, so the caller never needs to compensate within a chunk.
    pub fn append_to_indexes(&self, batch: &RecordBatch, base_row_id: RowId) -> Result<()> {
        let row_ids = contiguous_row_ids(base_row_id, batch.num_rows());
        for (position, index) in self.indexes.iter().enumerate() {
            if let Err(conflict) = index.insert(batch, &row_ids) {
                for installed in &self.indexes[..position] {
                    let _ = installed.remove(batch, &row_ids);
                }
                return Err(conflict);
            }
        }
        Ok(())
    }

    /// Remove one chunk's entries from every index. Compensation primitive.
    pub fn remove_from_indexes(&self, batch: &RecordBatch, base_row_id: RowId) -> Result<()> {
        let row_ids = contiguous_row_ids(base_row_id, batch.num_rows());
        for index in &self.indexes {
            index.remove(batch, &row_ids)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for IndexSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSet")
            .field("len", &self.indexes.len())
            .finish()
    }
}
