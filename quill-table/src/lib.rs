//! Storage plane for the quill engine.
//!
//! This crate hosts everything a transaction stages data into and drains
//! data out of:
//!
//! - `schema`: table column definitions and their Arrow projection.
//! - `stats`: per-column null/min/max accumulation.
//! - `row_groups`: the append-only columnar [`RowGroupCollection`], shared
//!   by the committed side (based at row id 0) and the staging side (based
//!   at [`quill_types::reserved::MAX_ROW_ID`]).
//! - `filter`: minimal scan filter pushdown.
//! - `index` / `art`: the index capability trait and its default
//!   implementation over order-preserving encoded keys.
//! - `data_table`: the committed-side [`DataTable`] the transaction plane
//!   flushes into.

#![forbid(unsafe_code)]

pub mod art;
pub mod data_table;
pub mod filter;
pub mod index;
pub mod row_groups;
pub mod schema;
pub mod stats;

pub use art::Art;
pub use data_table::{DataTable, TableAppendState};
pub use filter::{FilterOp, TableFilter, TableFilterSet};
pub use index::{IndexExpr, IndexSet, TableIndex};
pub use row_groups::{
    CollectionAppendState, CollectionScanState, ParallelCollectionScanState, RowGroupCollection,
    ROW_GROUP_SIZE,
};
pub use schema::{ColumnDef, TableSchema};
pub use stats::{ColumnStats, ColumnStatsSet};
