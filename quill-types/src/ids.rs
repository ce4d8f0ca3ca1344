//! Identifier aliases shared across quill crates.

/// Field identifier type for addressing columns within a table.
///
/// Field ids are positional: field `k` is the `k`-th column of the table
/// schema. Projections and index column lists are expressed in field ids.
pub type FieldId = u32;

/// Row identifier type.
///
/// The row-id space is partitioned by [`crate::reserved::MAX_ROW_ID`]:
/// identifiers below it are committed rows assigned by the base table,
/// identifiers at or above it are transaction-local staged rows.
pub type RowId = u64;

/// Table identifier type.
pub type TableId = u64;

/// Transaction identifier type.
pub type TxnId = u64;
