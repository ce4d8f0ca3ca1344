//! Append-only columnar row-group storage.
//!
//! A [`RowGroupCollection`] stores chunks column-major in fixed-capacity row
//! groups, the unit of scan parallelism. The same structure backs both the
//! committed side of a table (rows based at id 0) and a transaction's
//! staging buffer (rows based at `MAX_ROW_ID`); only the base row id and the
//! owner differ.
//!
//! Deletions are tombstone bitmaps per row group: scans filter dead rows
//! out, physical rows are never moved. Updates rebuild the touched chunk's
//! arrays. Appends slice incoming batches across group boundaries.

use std::cmp::min;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::array::{ArrayRef, BooleanArray, RecordBatch};
use arrow::compute::{CastOptions, cast_with_options, concat_batches, filter_record_batch, interleave};
use arrow::datatypes::SchemaRef;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;

use quill_result::{Error, Result};
use quill_types::{FieldId, RowId, ScalarValue};

use crate::filter::TableFilterSet;
use crate::schema::scalar_to_array;
use crate::stats::ColumnStatsSet;

/// Number of rows per row group.
pub const ROW_GROUP_SIZE: usize = 8192;

/// One horizontal slice of a collection: its chunks plus a tombstone bitmap
/// of locally-deleted rows (offsets relative to the group start).
#[derive(Debug, Default)]
struct RowGroup {
    chunks: Vec<RecordBatch>,
    row_count: usize,
    deleted: RoaringBitmap,
}

impl RowGroup {
    fn is_full(&self) -> bool {
        self.row_count == ROW_GROUP_SIZE
    }
}

/// Cursor handed out when an append region is reserved.
#[derive(Debug)]
pub struct CollectionAppendState {
    remaining: usize,
}

impl CollectionAppendState {
    /// Rows still reserved but not yet written.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

/// Position of a sequential scan over a collection.
///
/// The projection and filters are fixed at initialization; the positional
/// fields advance as [`RowGroupCollection::scan`] produces chunks. Parallel
/// consumers get a fresh window via
/// [`RowGroupCollection::next_parallel_scan`].
#[derive(Debug, Clone)]
pub struct CollectionScanState {
    projection: Vec<FieldId>,
    filters: Option<TableFilterSet>,
    row_group_index: usize,
    chunk_index: usize,
    offset_in_group: usize,
    max_row_group: usize,
}

impl CollectionScanState {
    /// A scan that yields no rows, for tables with no storage behind them.
    pub fn exhausted(projection: Vec<FieldId>, filters: Option<TableFilterSet>) -> Self {
        Self {
            projection,
            filters,
            row_group_index: 0,
            chunk_index: 0,
            offset_in_group: 0,
            max_row_group: 0,
        }
    }

    pub fn projection(&self) -> &[FieldId] {
        &self.projection
    }
}

/// Coordinator for row-group-granular parallel scans.
///
/// Readers claim whole row groups through an atomic cursor; claims are
/// monotonic and never overlap. A table without storage is represented by
/// the explicit empty partitioning (`max_row == 0`), not by a null state.
#[derive(Debug)]
pub struct ParallelCollectionScanState {
    next_row_group: AtomicUsize,
    row_group_count: usize,
    max_row: u64,
}

impl ParallelCollectionScanState {
    /// The empty partitioning: no row groups, `max_row == 0`.
    pub fn empty() -> Self {
        Self {
            next_row_group: AtomicUsize::new(0),
            row_group_count: 0,
            max_row: 0,
        }
    }

    /// Upper bound (exclusive) on row offsets covered by this partitioning.
    pub fn max_row(&self) -> u64 {
        self.max_row
    }
}

/// Append-only columnar store with tombstone deletes.
#[derive(Debug)]
pub struct RowGroupCollection {
    schema: SchemaRef,
    row_start: RowId,
    row_groups: Vec<RowGroup>,
    total_rows: u64,
}

impl RowGroupCollection {
    /// An empty collection whose rows will be identified as
    /// `row_start + offset`.
    pub fn new(schema: SchemaRef, row_start: RowId) -> Self {
        Self {
            schema,
            row_start,
            row_groups: Vec::new(),
            total_rows: 0,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn row_start(&self) -> RowId {
        self.row_start
    }

    /// Rows ever appended, including tombstoned ones.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Rows currently tombstoned.
    pub fn deleted_rows(&self) -> u64 {
        self.row_groups.iter().map(|group| group.deleted.len()).sum()
    }

    /// Projection covering every column in schema order.
    pub fn full_projection(&self) -> Vec<FieldId> {
        (0..self.schema.fields().len() as FieldId).collect()
    }

    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Reserve an append region of exactly `count` rows.
    pub fn initialize_append(&self, count: usize) -> CollectionAppendState {
        CollectionAppendState { remaining: count }
    }

    /// Write a chunk at the append cursor, slicing across row-group
    /// boundaries, and fold it into `stats`.
    pub fn append(
        &mut self,
        batch: &RecordBatch,
        state: &mut CollectionAppendState,
        stats: &mut ColumnStatsSet,
    ) -> Result<()> {
        self.check_batch_schema(batch)?;
        if batch.num_rows() > state.remaining {
            return Err(Error::Internal(format!(
                "append of {} rows exceeds the {} reserved",
                batch.num_rows(),
                state.remaining
            )));
        }
        stats.update(batch)?;

        let mut offset = 0;
        while offset < batch.num_rows() {
            if self.row_groups.last().is_none_or(RowGroup::is_full) {
                self.row_groups.push(RowGroup::default());
            }
            let Some(group) = self.row_groups.last_mut() else {
                return Err(Error::Internal("row group missing after push".to_string()));
            };
            let take = min(ROW_GROUP_SIZE - group.row_count, batch.num_rows() - offset);
            group.chunks.push(batch.slice(offset, take));
            group.row_count += take;
            offset += take;
        }
        self.total_rows += batch.num_rows() as u64;
        state.remaining -= batch.num_rows();
        Ok(())
    }

    /// Discard every row at offset `new_total` and beyond.
    ///
    /// Used to abandon a reserved append region after a mid-append failure.
    pub fn truncate(&mut self, new_total: u64) {
        while self.total_rows > new_total {
            let excess = (self.total_rows - new_total) as usize;
            let Some(group) = self.row_groups.last_mut() else {
                break;
            };
            let Some(chunk) = group.chunks.pop() else {
                self.row_groups.pop();
                continue;
            };
            if chunk.num_rows() <= excess {
                group.row_count -= chunk.num_rows();
                self.total_rows -= chunk.num_rows() as u64;
            } else {
                let kept = chunk.num_rows() - excess;
                group.chunks.push(chunk.slice(0, kept));
                group.row_count -= excess;
                self.total_rows -= excess as u64;
            }
            group.deleted.remove_range(group.row_count as u32..);
            if group.row_count == 0 {
                self.row_groups.pop();
            }
        }
    }

    // ------------------------------------------------------------------
    // Scan
    // ------------------------------------------------------------------

    /// Prepare a sequential scan over every row group.
    pub fn initialize_scan(
        &self,
        projection: Vec<FieldId>,
        filters: Option<TableFilterSet>,
    ) -> CollectionScanState {
        CollectionScanState {
            projection,
            filters,
            row_group_index: 0,
            chunk_index: 0,
            offset_in_group: 0,
            max_row_group: self.row_groups.len(),
        }
    }

    /// Produce the next chunk of live rows, or `None` when exhausted.
    ///
    /// Tombstoned rows and rows failing the scan's filters are dropped;
    /// chunks that end up empty are skipped entirely.
    pub fn scan(&self, state: &mut CollectionScanState) -> Result<Option<RecordBatch>> {
        loop {
            let limit = min(state.max_row_group, self.row_groups.len());
            if state.row_group_index >= limit {
                return Ok(None);
            }
            let group = &self.row_groups[state.row_group_index];
            if state.chunk_index >= group.chunks.len() {
                state.row_group_index += 1;
                state.chunk_index = 0;
                state.offset_in_group = 0;
                continue;
            }
            let chunk = &group.chunks[state.chunk_index];
            let chunk_start = state.offset_in_group;
            state.chunk_index += 1;
            state.offset_in_group += chunk.num_rows();

            let batch = self.project_chunk(group, chunk, chunk_start, state)?;
            if batch.num_rows() > 0 {
                return Ok(Some(batch));
            }
        }
    }

    fn project_chunk(
        &self,
        group: &RowGroup,
        chunk: &RecordBatch,
        chunk_start: usize,
        state: &CollectionScanState,
    ) -> Result<RecordBatch> {
        let mut keep: Option<Vec<bool>> = None;
        if !group.deleted.is_empty() {
            let mask: Vec<bool> = (0..chunk.num_rows())
                .map(|row| !group.deleted.contains((chunk_start + row) as u32))
                .collect();
            keep = Some(mask);
        }
        if let Some(filters) = &state.filters {
            let filter_mask = filters.evaluate(chunk)?;
            let combined = match keep.take() {
                Some(mut mask) => {
                    for (slot, value) in mask.iter_mut().zip(filter_mask.iter()) {
                        *slot &= value.unwrap_or(false);
                    }
                    mask
                }
                None => filter_mask.iter().map(|v| v.unwrap_or(false)).collect(),
            };
            keep = Some(combined);
        }

        let filtered = match keep {
            Some(mask) if mask.iter().any(|slot| !slot) => {
                filter_record_batch(chunk, &BooleanArray::from(mask)).map_err(Error::Arrow)?
            }
            _ => chunk.clone(),
        };

        let indices: Vec<usize> = state.projection.iter().map(|id| *id as usize).collect();
        filtered.project(&indices).map_err(Error::Arrow)
    }

    /// Partition the collection for parallel consumers.
    pub fn initialize_parallel_scan(&self) -> ParallelCollectionScanState {
        ParallelCollectionScanState {
            next_row_group: AtomicUsize::new(0),
            row_group_count: self.row_groups.len(),
            max_row: self.total_rows,
        }
    }

    /// Claim the next row group for `state`, returning `false` when the
    /// partitioning is exhausted.
    pub fn next_parallel_scan(
        &self,
        parallel: &ParallelCollectionScanState,
        state: &mut CollectionScanState,
    ) -> bool {
        let claimed = parallel.next_row_group.fetch_add(1, Ordering::Relaxed);
        if claimed >= parallel.row_group_count {
            return false;
        }
        state.row_group_index = claimed;
        state.max_row_group = claimed + 1;
        state.chunk_index = 0;
        state.offset_in_group = 0;
        true
    }

    // ------------------------------------------------------------------
    // Delete / update / fetch
    // ------------------------------------------------------------------

    /// Tombstone the rows at the given offsets.
    ///
    /// Returns how many rows were newly marked dead (already-dead rows do
    /// not count twice).
    pub fn delete(&mut self, offsets: &[u64]) -> Result<u64> {
        let mut newly_deleted = 0;
        for &offset in offsets {
            let (group_index, row_in_group) = self.locate_group(offset)?;
            if self.row_groups[group_index].deleted.insert(row_in_group as u32) {
                newly_deleted += 1;
            }
        }
        Ok(newly_deleted)
    }

    /// Whether the row at `offset` is tombstoned.
    pub fn is_deleted(&self, offset: u64) -> Result<bool> {
        let (group_index, row_in_group) = self.locate_group(offset)?;
        Ok(self.row_groups[group_index].deleted.contains(row_in_group as u32))
    }

    /// Gather the full-width rows at the given offsets, in argument order.
    ///
    /// Tombstones are ignored: callers that need live rows filter first.
    pub fn fetch_rows(&self, offsets: &[u64]) -> Result<RecordBatch> {
        let mut singles = Vec::with_capacity(offsets.len());
        for &offset in offsets {
            let (group_index, chunk_index, row_in_chunk) = self.locate_chunk(offset)?;
            singles.push(self.row_groups[group_index].chunks[chunk_index].slice(row_in_chunk, 1));
        }
        if singles.is_empty() {
            return Ok(RecordBatch::new_empty(Arc::clone(&self.schema)));
        }
        concat_batches(&self.schema, singles.iter()).map_err(Error::Arrow)
    }

    /// Rewrite the given columns of the rows at `offsets` with the
    /// corresponding rows of `data` (one `data` column per entry of
    /// `columns`, one `data` row per offset).
    pub fn update(
        &mut self,
        offsets: &[u64],
        columns: &[FieldId],
        data: &RecordBatch,
    ) -> Result<()> {
        if data.num_rows() != offsets.len() {
            return Err(Error::InvalidArgumentError(format!(
                "update data has {} rows for {} row ids",
                data.num_rows(),
                offsets.len()
            )));
        }
        if data.num_columns() != columns.len() {
            return Err(Error::InvalidArgumentError(format!(
                "update data has {} columns for {} column ids",
                data.num_columns(),
                columns.len()
            )));
        }
        for (position, column) in columns.iter().enumerate() {
            let field = self.schema.fields().get(*column as usize).ok_or_else(|| {
                Error::InvalidArgumentError(format!("update references unknown column {column}"))
            })?;
            if data.column(position).data_type() != field.data_type() {
                return Err(Error::InvalidArgumentError(format!(
                    "update column {} is {} but table column is {}",
                    column,
                    data.column(position).data_type(),
                    field.data_type()
                )));
            }
        }

        // Plan chunk-local replacements before mutating anything.
        let mut per_chunk: FxHashMap<(usize, usize), Vec<(usize, usize)>> = FxHashMap::default();
        for (data_row, &offset) in offsets.iter().enumerate() {
            let (group_index, chunk_index, row_in_chunk) = self.locate_chunk(offset)?;
            per_chunk
                .entry((group_index, chunk_index))
                .or_default()
                .push((row_in_chunk, data_row));
        }

        for ((group_index, chunk_index), replacements) in per_chunk {
            let chunk = &self.row_groups[group_index].chunks[chunk_index];
            let mut new_columns: Vec<ArrayRef> = chunk.columns().to_vec();
            for (position, column) in columns.iter().enumerate() {
                let mut indices: Vec<(usize, usize)> =
                    (0..chunk.num_rows()).map(|row| (0, row)).collect();
                for &(row_in_chunk, data_row) in &replacements {
                    indices[row_in_chunk] = (1, data_row);
                }
                let merged = interleave(
                    &[
                        chunk.column(*column as usize).as_ref(),
                        data.column(position).as_ref(),
                    ],
                    &indices,
                )
                .map_err(Error::Arrow)?;
                new_columns[*column as usize] = merged;
            }
            let rebuilt = RecordBatch::try_new(Arc::clone(&self.schema), new_columns)
                .map_err(Error::Arrow)?;
            self.row_groups[group_index].chunks[chunk_index] = rebuilt;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Schema evolution
    // ------------------------------------------------------------------

    /// Re-materialize under `new_schema`, which extends the current schema
    /// with one trailing column filled from the constant `default`.
    ///
    /// Chunk boundaries, tombstones, and row offsets are preserved, so
    /// previously handed-out row ids stay valid.
    pub fn add_column(
        &self,
        new_schema: SchemaRef,
        default: &ScalarValue,
    ) -> Result<RowGroupCollection> {
        let Some(new_field) = new_schema.fields().last() else {
            return Err(Error::Internal("new schema has no columns".to_string()));
        };
        let mut result = RowGroupCollection::new(Arc::clone(&new_schema), self.row_start);
        for group in &self.row_groups {
            let mut new_group = RowGroup {
                chunks: Vec::with_capacity(group.chunks.len()),
                row_count: group.row_count,
                deleted: group.deleted.clone(),
            };
            for chunk in &group.chunks {
                let mut chunk_columns: Vec<ArrayRef> = chunk.columns().to_vec();
                chunk_columns.push(scalar_to_array(
                    default,
                    new_field.data_type(),
                    chunk.num_rows(),
                )?);
                new_group.chunks.push(
                    RecordBatch::try_new(Arc::clone(&new_schema), chunk_columns)
                        .map_err(Error::Arrow)?,
                );
            }
            result.row_groups.push(new_group);
        }
        result.total_rows = self.total_rows;
        Ok(result)
    }

    /// Re-materialize with `column` cast to its type in `new_schema`.
    ///
    /// The cast is strict: a value that does not convert fails the whole
    /// operation instead of degrading to NULL, leaving `self` untouched.
    pub fn cast_column(&self, new_schema: SchemaRef, column: FieldId) -> Result<RowGroupCollection> {
        let field = new_schema.fields().get(column as usize).ok_or_else(|| {
            Error::InvalidArgumentError(format!("cast references unknown column {column}"))
        })?;
        let options = CastOptions {
            safe: false,
            ..Default::default()
        };
        let mut result = RowGroupCollection::new(Arc::clone(&new_schema), self.row_start);
        for group in &self.row_groups {
            let mut new_group = RowGroup {
                chunks: Vec::with_capacity(group.chunks.len()),
                row_count: group.row_count,
                deleted: group.deleted.clone(),
            };
            for chunk in &group.chunks {
                let mut chunk_columns: Vec<ArrayRef> = chunk.columns().to_vec();
                let casted =
                    cast_with_options(chunk.column(column as usize), field.data_type(), &options)
                        .map_err(Error::Arrow)?;
                chunk_columns[column as usize] = casted;
                new_group.chunks.push(
                    RecordBatch::try_new(Arc::clone(&new_schema), chunk_columns)
                        .map_err(Error::Arrow)?,
                );
            }
            result.row_groups.push(new_group);
        }
        result.total_rows = self.total_rows;
        Ok(result)
    }

    /// Recompute full statistics by walking every stored chunk.
    ///
    /// Only used after schema evolution; the hot path accumulates
    /// incrementally instead.
    pub fn compute_stats(&self) -> Result<ColumnStatsSet> {
        let mut stats = ColumnStatsSet::initialize_empty(self.schema.fields().len());
        for group in &self.row_groups {
            for chunk in &group.chunks {
                stats.update(chunk)?;
            }
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Check that a chunk matches this collection's column layout.
    ///
    /// Callers that install a chunk into indexes before appending it must
    /// validate first, so a malformed chunk fails before any side effect.
    pub fn validate_chunk(&self, batch: &RecordBatch) -> Result<()> {
        self.check_batch_schema(batch)
    }

    fn check_batch_schema(&self, batch: &RecordBatch) -> Result<()> {
        if batch.num_columns() != self.schema.fields().len() {
            return Err(Error::InvalidArgumentError(format!(
                "chunk has {} columns but the table has {}",
                batch.num_columns(),
                self.schema.fields().len()
            )));
        }
        for (field, column) in self.schema.fields().iter().zip(batch.columns()) {
            if column.data_type() != field.data_type() {
                return Err(Error::InvalidArgumentError(format!(
                    "chunk column '{}' is {} but the table expects {}",
                    field.name(),
                    column.data_type(),
                    field.data_type()
                )));
            }
        }
        Ok(())
    }

    fn locate_group(&self, offset: u64) -> Result<(usize, usize)> {
        if offset >= self.total_rows {
            return Err(Error::Internal(format!(
                "row offset {} out of range for collection of {} rows",
                offset, self.total_rows
            )));
        }
        Ok((
            (offset / ROW_GROUP_SIZE as u64) as usize,
            (offset % ROW_GROUP_SIZE as u64) as usize,
        ))
    }

    fn locate_chunk(&self, offset: u64) -> Result<(usize, usize, usize)> {
        let (group_index, mut row_in_group) = self.locate_group(offset)?;
        for (chunk_index, chunk) in self.row_groups[group_index].chunks.iter().enumerate() {
            if row_in_group < chunk.num_rows() {
                return Ok((group_index, chunk_index, row_in_group));
            }
            row_in_group -= chunk.num_rows();
        }
        Err(Error::Internal(format!(
            "row offset {offset} not covered by any chunk"
        )))
    }
}
