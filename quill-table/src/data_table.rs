//! The committed side of a table.
//!
//! `DataTable` owns the committed row-group collection (rows based at id 0),
//! the table's index set, and its statistics. The transaction plane treats
//! it as a borrowed collaborator: staging never outlives the transaction,
//! and the transaction never outlives the table.
//!
//! Appends are two-phase from the caller's point of view: a region is
//! reserved with [`DataTable::initialize_append`], chunks are written
//! through the returned cursor, and a failed append is abandoned with
//! [`DataTable::revert_append`]. Committed-side versioning for transactional
//! delete/update is modeled as plain tombstones; full version chains are the
//! transaction manager's concern, not this crate's.

use std::sync::{Arc, Mutex};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;

use quill_result::{Error, Result};
use quill_types::{FieldId, RowId, TableId, TxnId};

use crate::filter::TableFilterSet;
use crate::index::{IndexSet, TableIndex};
use crate::row_groups::RowGroupCollection;
use crate::schema::TableSchema;
use crate::stats::ColumnStatsSet;

/// Cursor over a reserved append region of the base table.
#[derive(Debug)]
pub struct TableAppendState {
    /// First row id of the reserved region.
    pub row_start: RowId,
    /// Next row id to be written; advances as chunks are appended.
    pub current_row: RowId,
    reserved: u64,
}

impl TableAppendState {
    /// Rows written so far through this cursor.
    pub fn written(&self) -> u64 {
        self.current_row - self.row_start
    }
}

/// One table's committed storage: row groups, indexes, statistics.
#[derive(Debug)]
pub struct DataTable {
    table_id: TableId,
    name: String,
    schema: TableSchema,
    arrow_schema: SchemaRef,
    indexes: IndexSet,
    collection: Mutex<RowGroupCollection>,
    stats: Mutex<ColumnStatsSet>,
}

impl DataTable {
    pub fn new(table_id: TableId, name: impl Into<String>, schema: TableSchema) -> Self {
        let arrow_schema = schema.to_arrow();
        let column_count = schema.len();
        Self {
            table_id,
            name: name.into(),
            schema,
            arrow_schema: Arc::clone(&arrow_schema),
            indexes: IndexSet::new(),
            collection: Mutex::new(RowGroupCollection::new(arrow_schema, 0)),
            stats: Mutex::new(ColumnStatsSet::initialize_empty(column_count)),
        }
    }

    /// Register an index. Called while the table is being defined, before
    /// it is shared with any transaction.
    pub fn add_index(&mut self, index: Arc<dyn TableIndex>) {
        self.indexes.add_index(index);
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn arrow_schema(&self) -> &SchemaRef {
        &self.arrow_schema
    }

    pub fn indexes(&self) -> &IndexSet {
        &self.indexes
    }

    /// Live committed rows (appends minus tombstones).
    pub fn row_count(&self) -> u64 {
        let collection = self.collection.lock().expect("table lock poisoned");
        collection.total_rows() - collection.deleted_rows()
    }

    /// Snapshot of the table's statistics.
    pub fn stats(&self) -> ColumnStatsSet {
        self.stats.lock().expect("table stats lock poisoned").clone()
    }

    // ------------------------------------------------------------------
    // Append path
    // ------------------------------------------------------------------

    /// Reserve an append region of exactly `count` rows.
    pub fn initialize_append(&self, count: u64) -> TableAppendState {
        let collection = self.collection.lock().expect("table lock poisoned");
        let row_start = collection.total_rows();
        tracing::trace!(
            table = %self.name,
            row_start,
            count,
            "reserving base append region"
        );
        TableAppendState {
            row_start,
            current_row: row_start,
            reserved: count,
        }
    }

    /// Write a chunk at the cursor and advance it.
    pub fn append(&self, batch: &RecordBatch, state: &mut TableAppendState) -> Result<()> {
        if state.written() + batch.num_rows() as u64 > state.reserved {
            return Err(Error::Internal(format!(
                "append of {} rows overruns region of {} reserved at row {}",
                batch.num_rows(),
                state.reserved,
                state.row_start
            )));
        }
        let mut collection = self.collection.lock().expect("table lock poisoned");
        let mut append_state = collection.initialize_append(batch.num_rows());
        // Base-table statistics are published by the flush protocol, not per
        // physical chunk; feed a scratch accumulator here.
        let mut scratch = ColumnStatsSet::initialize_empty(self.schema.len());
        collection.append(batch, &mut append_state, &mut scratch)?;
        state.current_row += batch.num_rows() as u64;
        Ok(())
    }

    /// Install a chunk into this table's indexes, keying rows from
    /// `base_id`. Fails without residue on a duplicate key.
    pub fn append_to_indexes(&self, batch: &RecordBatch, base_id: RowId) -> Result<()> {
        self.indexes.append_to_indexes(batch, base_id)
    }

    /// Remove a chunk's entries from this table's indexes. Compensation
    /// primitive for a failed flush.
    pub fn remove_from_indexes(&self, batch: &RecordBatch, base_id: RowId) -> Result<()> {
        self.indexes.remove_from_indexes(batch, base_id)
    }

    /// Abandon a reserved region, discarding any rows written into it.
    pub fn revert_append(&self, row_start: RowId, count: u64) {
        tracing::debug!(
            table = %self.name,
            row_start,
            count,
            "reverting base append region"
        );
        let mut collection = self.collection.lock().expect("table lock poisoned");
        collection.truncate(row_start);
    }

    /// Fold flushed staging statistics into the table's statistics.
    pub fn merge_stats(&self, staged: &ColumnStatsSet) -> Result<()> {
        self.stats
            .lock()
            .expect("table stats lock poisoned")
            .merge(staged)
    }

    /// Append committed rows directly: reserve, index, write, account.
    ///
    /// This is the path by which already-committed data enters a table
    /// (bulk load, test seeding); transactional inserts go through the
    /// staging buffer instead.
    pub fn append_rows(&self, batch: &RecordBatch) -> Result<RowId> {
        let mut state = self.initialize_append(batch.num_rows() as u64);
        self.append_to_indexes(batch, state.row_start)?;
        self.append(batch, &mut state)?;
        let mut scratch = ColumnStatsSet::initialize_empty(self.schema.len());
        scratch.update(batch)?;
        self.merge_stats(&scratch)?;
        Ok(state.row_start)
    }

    // ------------------------------------------------------------------
    // Transactional delete / update of committed rows
    // ------------------------------------------------------------------

    /// Record tombstones for committed rows on behalf of a transaction.
    pub fn delete_rows(&self, txn_id: TxnId, row_ids: &[RowId]) -> Result<u64> {
        tracing::trace!(
            table = %self.name,
            txn_id,
            count = row_ids.len(),
            "deleting committed rows"
        );
        let mut collection = self.collection.lock().expect("table lock poisoned");
        collection.delete(row_ids)
    }

    /// Rewrite columns of committed rows on behalf of a transaction.
    pub fn update_rows(
        &self,
        txn_id: TxnId,
        row_ids: &[RowId],
        columns: &[FieldId],
        data: &RecordBatch,
    ) -> Result<()> {
        tracing::trace!(
            table = %self.name,
            txn_id,
            count = row_ids.len(),
            "updating committed rows"
        );
        let mut collection = self.collection.lock().expect("table lock poisoned");
        collection.update(row_ids, columns, data)
    }

    // ------------------------------------------------------------------
    // Scans
    // ------------------------------------------------------------------

    /// Collect every live committed chunk under the given projection.
    pub fn scan_committed(
        &self,
        projection: Option<Vec<FieldId>>,
        filters: Option<TableFilterSet>,
    ) -> Result<Vec<RecordBatch>> {
        let collection = self.collection.lock().expect("table lock poisoned");
        let projection = projection.unwrap_or_else(|| collection.full_projection());
        let mut state = collection.initialize_scan(projection, filters);
        let mut chunks = Vec::new();
        while let Some(chunk) = collection.scan(&mut state)? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}
