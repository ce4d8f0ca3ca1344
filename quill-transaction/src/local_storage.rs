//! Per-transaction staging of uncommitted writes.
//!
//! [`LocalStorage`] is the transaction's write buffer: a map from base-table
//! identity to [`LocalTableStorage`], the staging unit holding that table's
//! uncommitted rows in a columnar collection based at `MAX_ROW_ID`, the
//! shadow unique indexes mirroring the table's unique indexes, running
//! column statistics, and the deleted-row count.
//!
//! The flow at commit is [`LocalStorage::commit`]: every staged table is
//! drained through the per-table flush, which reserves an append region
//! on the base table, installs each staged chunk into the base indexes
//! before physically appending it, and on a conflict against committed data
//! walks the installed prefix back out of the indexes and abandons the
//! reserved region. Staged state for a table is destroyed whether its flush
//! succeeded or failed.

use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, UInt32Array};
use arrow::compute::take;
use rustc_hash::FxHashMap;

use quill_result::{Error, Result};
use quill_table::{
    Art, CollectionScanState, ColumnStatsSet, DataTable, IndexExpr, IndexSet,
    ParallelCollectionScanState, RowGroupCollection, TableFilterSet, TableIndex,
};
use quill_types::reserved::{MAX_ROW_ID, is_local_row_id, local_row_offset};
use quill_types::{FieldId, RowId, ScalarValue, TableId, TxnId};

use crate::wal::WriteAheadLog;

/// An append region made visible by a successful flush. Reported to the
/// write-ahead log at the end of the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEvent {
    pub table_id: TableId,
    pub row_start: RowId,
    pub count: u64,
}

/// Per-commit bookkeeping threaded through the flush of every staged table.
#[derive(Debug)]
pub struct CommitState {
    pub commit_id: TxnId,
    pub append_events: Vec<AppendEvent>,
}

impl CommitState {
    pub fn new(commit_id: TxnId) -> Self {
        Self {
            commit_id,
            append_events: Vec::new(),
        }
    }
}

/// One table's staged writes within one transaction.
pub struct LocalTableStorage {
    table: Arc<DataTable>,
    collection: RowGroupCollection,
    indexes: IndexSet,
    stats: ColumnStatsSet,
    deleted_rows: u64,
}

impl LocalTableStorage {
    /// Build the staging unit for `table`: an empty collection based at
    /// `MAX_ROW_ID`, empty statistics, and one shadow index per unique
    /// index on the base table, over copies of the same expressions and
    /// column ids, also marked unique.
    fn new(table: Arc<DataTable>) -> Self {
        let mut indexes = IndexSet::new();
        table.indexes().scan(|index| {
            if index.is_unique() {
                indexes.add_index(Arc::new(Art::new(
                    index.column_ids().to_vec(),
                    index.expressions().to_vec(),
                    true,
                )));
            }
            false
        });
        let collection = RowGroupCollection::new(Arc::clone(table.arrow_schema()), MAX_ROW_ID);
        let stats = ColumnStatsSet::initialize_empty(table.schema().len());
        Self {
            table,
            collection,
            indexes,
            stats,
            deleted_rows: 0,
        }
    }

    /// Rows that will survive to flush.
    pub fn appended_rows(&self) -> u64 {
        self.collection.total_rows() - self.deleted_rows
    }

    /// Prepare a scan over the staged rows; a staging unit with no rows
    /// yields an already-exhausted state.
    pub fn initialize_scan(
        &self,
        projection: Vec<FieldId>,
        filters: Option<TableFilterSet>,
    ) -> CollectionScanState {
        if self.collection.total_rows() == 0 {
            // nothing to scan
            return CollectionScanState::exhausted(projection, filters);
        }
        self.collection.initialize_scan(projection, filters)
    }

    /// Bytes staged for this table: surviving rows times the fixed width of
    /// the table's internal column representations.
    pub fn estimated_size(&self) -> u64 {
        let appended_rows = self.appended_rows();
        if appended_rows == 0 {
            return 0;
        }
        appended_rows * self.table.schema().row_width() as u64
    }

    /// Apply a staged-side update: mutate the collection, re-validating any
    /// shadow unique index whose key columns are touched.
    fn update(
        &mut self,
        offsets: &[u64],
        columns: &[FieldId],
        data: &RecordBatch,
    ) -> Result<()> {
        let affected: Vec<Arc<dyn TableIndex>> = self
            .indexes
            .iter()
            .filter(|index| {
                index.expressions().iter().any(|expr| match expr {
                    IndexExpr::Column(id) => columns.contains(id),
                })
            })
            .cloned()
            .collect();

        if affected.is_empty() {
            return self.collection.update(offsets, columns, data);
        }

        let old_rows = self.collection.fetch_rows(offsets)?;
        let new_rows = overlay_columns(&old_rows, columns, data)?;
        let row_ids: Vec<RowId> = offsets.iter().map(|offset| MAX_ROW_ID + offset).collect();

        for (position, index) in affected.iter().enumerate() {
            index.remove(&old_rows, &row_ids)?;
            if let Err(conflict) = index.insert(&new_rows, &row_ids) {
                // restore this index and every one already swapped
                index.insert(&old_rows, &row_ids)?;
                for prior in &affected[..position] {
                    prior.remove(&new_rows, &row_ids)?;
                    prior.insert(&old_rows, &row_ids)?;
                }
                return Err(conflict);
            }
        }
        self.collection.update(offsets, columns, data)
    }
}

impl std::fmt::Debug for LocalTableStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTableStorage")
            .field("table", &self.table.name())
            .field("total_rows", &self.collection.total_rows())
            .field("deleted_rows", &self.deleted_rows)
            .finish()
    }
}

/// The per-transaction staging root.
#[derive(Debug)]
pub struct LocalStorage {
    transaction_id: TxnId,
    table_storage: FxHashMap<TableId, LocalTableStorage>,
}

impl LocalStorage {
    pub fn new(transaction_id: TxnId) -> Self {
        Self {
            transaction_id,
            table_storage: FxHashMap::default(),
        }
    }

    pub fn transaction_id(&self) -> TxnId {
        self.transaction_id
    }

    /// Whether this transaction holds staged state for `table`.
    pub fn is_staged(&self, table: &DataTable) -> bool {
        self.table_storage.contains_key(&table.table_id())
    }

    /// Number of tables with staged state.
    pub fn staged_table_count(&self) -> usize {
        self.table_storage.len()
    }

    fn storage(&self, table: &DataTable) -> Option<&LocalTableStorage> {
        self.table_storage.get(&table.table_id())
    }

    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Stage a batch of insertions for `table`.
    ///
    /// The staging unit is created lazily on the first append. The batch is
    /// validated, then offered to the shadow unique indexes at ids starting
    /// at `MAX_ROW_ID + total_rows`; a duplicate key (against other staged
    /// rows or within the batch) fails the append with the staging
    /// collection untouched. On success the batch is written to the
    /// collection and folded into the column statistics.
    pub fn append(&mut self, table: &Arc<DataTable>, batch: &RecordBatch) -> Result<()> {
        let storage = self
            .table_storage
            .entry(table.table_id())
            .or_insert_with(|| LocalTableStorage::new(Arc::clone(table)));

        storage.collection.validate_chunk(batch)?;

        // append to the shadow unique indexes (if any)
        let base_id = MAX_ROW_ID + storage.collection.total_rows();
        if let Err(violation) = storage.indexes.append_to_indexes(batch, base_id) {
            tracing::trace!(
                table = %table.name(),
                txn_id = self.transaction_id,
                "staged append rejected by shadow index"
            );
            return Err(violation);
        }

        let mut state = storage.collection.initialize_append(batch.num_rows());
        storage
            .collection
            .append(batch, &mut state, &mut storage.stats)?;
        tracing::trace!(
            table = %table.name(),
            txn_id = self.transaction_id,
            rows = batch.num_rows(),
            total = storage.collection.total_rows(),
            "staged append"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scans
    // ------------------------------------------------------------------

    /// Prepare a scan over the rows staged for `table`. A table without
    /// staged state yields an already-exhausted scan.
    pub fn initialize_scan(
        &self,
        table: &DataTable,
        projection: Vec<FieldId>,
        filters: Option<TableFilterSet>,
    ) -> CollectionScanState {
        match self.storage(table) {
            Some(storage) => storage.initialize_scan(projection, filters),
            None => CollectionScanState::exhausted(projection, filters),
        }
    }

    /// Produce the next staged chunk, or `None` when exhausted.
    pub fn scan(
        &self,
        table: &DataTable,
        state: &mut CollectionScanState,
    ) -> Result<Option<RecordBatch>> {
        match self.storage(table) {
            Some(storage) => storage.collection.scan(state),
            None => Ok(None),
        }
    }

    /// Partition the staged rows of `table` for parallel readers. A table
    /// without staged state gets the explicit empty partitioning.
    pub fn initialize_parallel_scan(&self, table: &DataTable) -> ParallelCollectionScanState {
        match self.storage(table) {
            Some(storage) => storage.collection.initialize_parallel_scan(),
            None => ParallelCollectionScanState::empty(),
        }
    }

    /// Advance a parallel scan; `false` when the partitioning is exhausted.
    pub fn next_parallel_scan(
        &self,
        table: &DataTable,
        parallel: &ParallelCollectionScanState,
        state: &mut CollectionScanState,
    ) -> bool {
        match self.storage(table) {
            Some(storage) => storage.collection.next_parallel_scan(parallel, state),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Delete / update
    // ------------------------------------------------------------------

    /// Delete rows by id, honoring the row-id partition: committed ids are
    /// forwarded to the base table's transactional delete path, staged ids
    /// are tombstoned in the staging collection so flush skips them.
    ///
    /// Returns the number of rows newly deleted.
    pub fn delete(&mut self, table: &Arc<DataTable>, row_ids: &[RowId]) -> Result<u64> {
        let mut committed: Vec<RowId> = Vec::new();
        let mut local: Vec<u64> = Vec::new();
        for &row_id in row_ids {
            if is_local_row_id(row_id) {
                local.push(local_row_offset(row_id));
            } else {
                committed.push(row_id);
            }
        }

        let mut deleted = 0;
        if !committed.is_empty() {
            deleted += table.delete_rows(self.transaction_id, &committed)?;
        }
        if !local.is_empty() {
            let Some(storage) = self.table_storage.get_mut(&table.table_id()) else {
                return Err(Error::Internal(
                    "delete references staged rows of a table with no staged data".to_string(),
                ));
            };
            let newly_deleted = storage.collection.delete(&local)?;
            storage.deleted_rows += newly_deleted;
            deleted += newly_deleted;
        }
        Ok(deleted)
    }

    /// Update rows by id, honoring the row-id partition: committed ids go
    /// through the base table's transactional update path, staged ids are
    /// mutated in place in the staging collection (re-validating shadow
    /// unique indexes whose key columns are touched).
    ///
    /// `data` carries one column per entry of `columns` and one row per
    /// entry of `row_ids`, in the same order.
    pub fn update(
        &mut self,
        table: &Arc<DataTable>,
        row_ids: &[RowId],
        columns: &[FieldId],
        data: &RecordBatch,
    ) -> Result<()> {
        if data.num_rows() != row_ids.len() {
            return Err(Error::InvalidArgumentError(format!(
                "update data has {} rows for {} row ids",
                data.num_rows(),
                row_ids.len()
            )));
        }
        if data.num_columns() != columns.len() {
            return Err(Error::InvalidArgumentError(format!(
                "update data has {} columns for {} column ids",
                data.num_columns(),
                columns.len()
            )));
        }

        let mut committed_rows: Vec<RowId> = Vec::new();
        let mut committed_sources: Vec<u32> = Vec::new();
        let mut local_offsets: Vec<u64> = Vec::new();
        let mut local_sources: Vec<u32> = Vec::new();
        for (source, &row_id) in row_ids.iter().enumerate() {
            if is_local_row_id(row_id) {
                local_offsets.push(local_row_offset(row_id));
                local_sources.push(source as u32);
            } else {
                committed_rows.push(row_id);
                committed_sources.push(source as u32);
            }
        }

        if !committed_rows.is_empty() {
            let committed_data = take_rows(data, &committed_sources)?;
            table.update_rows(
                self.transaction_id,
                &committed_rows,
                columns,
                &committed_data,
            )?;
        }
        if !local_offsets.is_empty() {
            let Some(storage) = self.table_storage.get_mut(&table.table_id()) else {
                return Err(Error::Internal(
                    "update references staged rows of a table with no staged data".to_string(),
                ));
            };
            let local_data = take_rows(data, &local_sources)?;
            storage.update(&local_offsets, columns, &local_data)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accounting
    // ------------------------------------------------------------------

    /// Staged rows that will flush for `table` (appends minus staged
    /// deletes), or 0 when nothing is staged.
    pub fn added_rows(&self, table: &DataTable) -> u64 {
        self.storage(table)
            .map(LocalTableStorage::appended_rows)
            .unwrap_or(0)
    }

    /// Total staged bytes across all tables.
    pub fn estimated_size(&self) -> u64 {
        self.table_storage
            .values()
            .map(LocalTableStorage::estimated_size)
            .sum()
    }

    // ------------------------------------------------------------------
    // Schema evolution with staged data
    // ------------------------------------------------------------------

    /// Carry staged data across an ADD COLUMN from `old_table` to
    /// `new_table`, filling the new trailing column with the constant
    /// `default` for every staged row.
    ///
    /// Failure leaves the staged state exactly as it was; the DDL aborts
    /// cleanly.
    pub fn add_column(
        &mut self,
        old_table: &Arc<DataTable>,
        new_table: &Arc<DataTable>,
        default: &ScalarValue,
    ) -> Result<()> {
        let Some(storage) = self.table_storage.remove(&old_table.table_id()) else {
            return Ok(());
        };
        let new_collection = match storage
            .collection
            .add_column(Arc::clone(new_table.arrow_schema()), default)
        {
            Ok(collection) => collection,
            Err(err) => {
                self.table_storage.insert(old_table.table_id(), storage);
                return Err(err);
            }
        };
        let new_stats = match new_collection.compute_stats() {
            Ok(stats) => stats,
            Err(err) => {
                self.table_storage.insert(old_table.table_id(), storage);
                return Err(err);
            }
        };
        let LocalTableStorage {
            indexes,
            deleted_rows,
            ..
        } = storage;
        self.table_storage.insert(
            new_table.table_id(),
            LocalTableStorage {
                table: Arc::clone(new_table),
                collection: new_collection,
                indexes,
                stats: new_stats,
                deleted_rows,
            },
        );
        Ok(())
    }

    /// Carry staged data across an ALTER TYPE of `changed_column` from
    /// `old_table` to `new_table`, casting the staged values strictly.
    ///
    /// Not supported when the column participates in a shadow unique index
    /// (its encoded keys would change under the index). Failure leaves the
    /// staged state exactly as it was.
    pub fn change_type(
        &mut self,
        old_table: &Arc<DataTable>,
        new_table: &Arc<DataTable>,
        changed_column: FieldId,
    ) -> Result<()> {
        let Some(storage) = self.table_storage.get(&old_table.table_id()) else {
            return Ok(());
        };
        let indexed = storage.indexes.iter().any(|index| {
            index.expressions().iter().any(|expr| match expr {
                IndexExpr::Column(id) => *id == changed_column,
            })
        });
        if indexed {
            return Err(Error::NotSupported(
                "ALTER TYPE on a column with transaction-local index entries".to_string(),
            ));
        }

        let Some(storage) = self.table_storage.remove(&old_table.table_id()) else {
            return Ok(());
        };
        let new_collection = match storage
            .collection
            .cast_column(Arc::clone(new_table.arrow_schema()), changed_column)
        {
            Ok(collection) => collection,
            Err(err) => {
                self.table_storage.insert(old_table.table_id(), storage);
                return Err(err);
            }
        };
        let new_stats = match new_collection.compute_stats() {
            Ok(stats) => stats,
            Err(err) => {
                self.table_storage.insert(old_table.table_id(), storage);
                return Err(err);
            }
        };
        let LocalTableStorage {
            indexes,
            deleted_rows,
            ..
        } = storage;
        self.table_storage.insert(
            new_table.table_id(),
            LocalTableStorage {
                table: Arc::clone(new_table),
                collection: new_collection,
                indexes,
                stats: new_stats,
                deleted_rows,
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Flush / commit
    // ------------------------------------------------------------------

    /// Drain one table's staged rows into its base table.
    ///
    /// Runs under the committing transaction's write access to the base
    /// table. The staging unit is consumed: whether the flush succeeds or
    /// fails on a constraint, the staged state is gone afterwards.
    fn flush(&mut self, storage: LocalTableStorage, commit_state: &mut CommitState) -> Result<()> {
        let table = Arc::clone(&storage.table);
        let append_count = storage.appended_rows();
        if append_count == 0 {
            // every staged row was deleted again; nothing touches the base table
            tracing::trace!(table = %table.name(), "flush skipped, no surviving rows");
            return Ok(());
        }

        let mut append_state = table.initialize_append(append_count);
        let mut constraint_violated = false;
        scan_staged(&storage, |chunk| {
            // install this chunk into the base indexes before any physical row
            // is written, so a conflict is found while nothing needs undoing
            if table
                .append_to_indexes(&chunk, append_state.current_row)
                .is_err()
            {
                constraint_violated = true;
                return Ok(false);
            }
            table.append(&chunk, &mut append_state)?;
            Ok(true)
        })?;

        if constraint_violated {
            // walk exactly the installed prefix back out of the base indexes
            let mut current_row = append_state.row_start;
            scan_staged(&storage, |chunk| {
                if current_row >= append_state.current_row {
                    return Ok(false);
                }
                table.remove_from_indexes(&chunk, current_row)?;
                current_row += chunk.num_rows() as u64;
                Ok(current_row < append_state.current_row)
            })?;
            table.revert_append(append_state.row_start, append_count);
            tracing::debug!(
                table = %table.name(),
                txn_id = self.transaction_id,
                row_start = append_state.row_start,
                "flush aborted on base unique conflict"
            );
            return Err(Error::duplicate_key());
        }

        table.merge_stats(&storage.stats)?;
        commit_state.append_events.push(AppendEvent {
            table_id: table.table_id(),
            row_start: append_state.row_start,
            count: append_count,
        });
        tracing::debug!(
            table = %table.name(),
            txn_id = self.transaction_id,
            row_start = append_state.row_start,
            rows = append_count,
            "flushed staged rows"
        );
        Ok(())
    }

    /// Make every staged table's rows visible.
    ///
    /// Entries are taken out of the staging map before their flush runs, so
    /// a failed table is already gone when the error propagates and the map
    /// is never mutated mid-iteration. The first constraint violation
    /// terminates the commit; previously flushed tables stay flushed (the
    /// cross-table abort discipline belongs to the transaction manager).
    /// After a fully successful iteration the append events are written to
    /// the log.
    pub fn commit(
        &mut self,
        commit_state: &mut CommitState,
        mut wal: Option<&mut WriteAheadLog>,
    ) -> Result<()> {
        let table_ids: Vec<TableId> = self.table_storage.keys().copied().collect();
        for table_id in table_ids {
            let Some(storage) = self.table_storage.remove(&table_id) else {
                continue;
            };
            self.flush(storage, commit_state)?;
        }
        if let Some(wal) = wal.as_deref_mut() {
            for event in &commit_state.append_events {
                wal.log_append(event.table_id, event.row_start, event.count);
            }
        }
        self.table_storage.clear();
        Ok(())
    }
}

/// Scan a staging unit's surviving rows in column-id order, feeding each
/// chunk to `consume` until it returns `false` or the scan is exhausted.
fn scan_staged(
    storage: &LocalTableStorage,
    mut consume: impl FnMut(RecordBatch) -> Result<bool>,
) -> Result<()> {
    let mut state = storage
        .collection
        .initialize_scan(storage.collection.full_projection(), None);
    while let Some(chunk) = storage.collection.scan(&mut state)? {
        if !consume(chunk)? {
            break;
        }
    }
    Ok(())
}

/// Gather the given rows of `data` (by position) into a new batch.
fn take_rows(data: &RecordBatch, sources: &[u32]) -> Result<RecordBatch> {
    let indices = UInt32Array::from(sources.to_vec());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(data.num_columns());
    for column in data.columns() {
        columns.push(take(column.as_ref(), &indices, None).map_err(Error::Arrow)?);
    }
    RecordBatch::try_new(data.schema(), columns).map_err(Error::Arrow)
}

/// Overlay `data`'s columns (at positions `columns`) onto full-width rows.
fn overlay_columns(
    old_rows: &RecordBatch,
    columns: &[FieldId],
    data: &RecordBatch,
) -> Result<RecordBatch> {
    let mut merged: Vec<ArrayRef> = old_rows.columns().to_vec();
    for (position, column) in columns.iter().enumerate() {
        let slot = merged.get_mut(*column as usize).ok_or_else(|| {
            Error::InvalidArgumentError(format!("update references unknown column {column}"))
        })?;
        *slot = Arc::clone(data.column(position));
    }
    RecordBatch::try_new(old_rows.schema(), merged).map_err(Error::Arrow)
}
