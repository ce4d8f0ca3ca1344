//! Default index implementation over order-preserving encoded keys.
//!
//! [`Art`] keeps its entries sorted by a memcmp-comparable byte encoding of
//! the key expressions, the layout an adaptive radix tree traverses. Keys
//! are encoded once per row on insert: big-endian sign-flipped integers,
//! rank-converted IEEE-754 floats, and terminator-escaped strings, so plain
//! byte comparison agrees with value order across every supported type.
//!
//! Rows whose key contains NULL are not indexed; SQL uniqueness does not
//! constrain NULLs.

use std::collections::BTreeMap;
use std::sync::RwLock;

use arrow::array::{Array, AsArray, RecordBatch};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};

use quill_result::{Error, Result};
use quill_types::{FieldId, RowId};

use crate::index::{IndexExpr, TableIndex};

/// Ordered index over encoded keys. The engine's default index type.
#[derive(Debug)]
pub struct Art {
    column_ids: Vec<FieldId>,
    expressions: Vec<IndexExpr>,
    unique: bool,
    entries: RwLock<BTreeMap<Vec<u8>, RowId>>,
}

impl Art {
    pub fn new(column_ids: Vec<FieldId>, expressions: Vec<IndexExpr>, unique: bool) -> Self {
        Self {
            column_ids,
            expressions,
            unique,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Encode the key for every row of a chunk; `None` marks a NULL key.
    fn encode_keys(&self, batch: &RecordBatch) -> Result<Vec<Option<Vec<u8>>>> {
        let mut key_columns = Vec::with_capacity(self.expressions.len());
        for expression in &self.expressions {
            key_columns.push(expression.evaluate(batch)?);
        }

        let mut keys = Vec::with_capacity(batch.num_rows());
        'rows: for row in 0..batch.num_rows() {
            let mut key = Vec::new();
            for column in &key_columns {
                if column.is_null(row) {
                    keys.push(None);
                    continue 'rows;
                }
                encode_value(column.as_ref(), row, &mut key)?;
            }
            keys.push(Some(key));
        }
        Ok(keys)
    }

    /// The stored key: unique indexes store the key itself, non-unique ones
    /// append the row id so equal keys occupy distinct slots.
    fn storage_key(&self, key: &[u8], row_id: RowId) -> Vec<u8> {
        if self.unique {
            key.to_vec()
        } else {
            let mut composite = Vec::with_capacity(key.len() + 8);
            composite.extend_from_slice(key);
            composite.extend_from_slice(&row_id.to_be_bytes());
            composite
        }
    }
}

impl TableIndex for Art {
    fn column_ids(&self) -> &[FieldId] {
        &self.column_ids
    }

    fn expressions(&self) -> &[IndexExpr] {
        &self.expressions
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn insert(&self, batch: &RecordBatch, row_ids: &[RowId]) -> Result<()> {
        if row_ids.len() != batch.num_rows() {
            return Err(Error::Internal(format!(
                "index insert got {} row ids for {} rows",
                row_ids.len(),
                batch.num_rows()
            )));
        }
        let keys = self.encode_keys(batch)?;
        let mut entries = self.entries.write().expect("index lock poisoned");

        let mut installed: Vec<Vec<u8>> = Vec::new();
        for (key, &row_id) in keys.iter().zip(row_ids) {
            let Some(key) = key else {
                continue;
            };
            let storage_key = self.storage_key(key, row_id);
            if self.unique && entries.contains_key(&storage_key) {
                for undo in installed {
                    entries.remove(&undo);
                }
                return Err(Error::duplicate_key());
            }
            entries.insert(storage_key.clone(), row_id);
            installed.push(storage_key);
        }
        Ok(())
    }

    fn remove(&self, batch: &RecordBatch, row_ids: &[RowId]) -> Result<()> {
        if row_ids.len() != batch.num_rows() {
            return Err(Error::Internal(format!(
                "index remove got {} row ids for {} rows",
                row_ids.len(),
                batch.num_rows()
            )));
        }
        let keys = self.encode_keys(batch)?;
        let mut entries = self.entries.write().expect("index lock poisoned");
        for (key, &row_id) in keys.iter().zip(row_ids) {
            let Some(key) = key else {
                continue;
            };
            let storage_key = self.storage_key(key, row_id);
            // only drop the entry if this row still owns it
            if entries.get(&storage_key) == Some(&row_id) {
                entries.remove(&storage_key);
            }
        }
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.entries.read().expect("index lock poisoned").len()
    }

    fn contains_row(&self, row_id: RowId) -> bool {
        self.entries
            .read()
            .expect("index lock poisoned")
            .values()
            .any(|stored| *stored == row_id)
    }
}

/// Append the memcmp-ordered encoding of one non-null value.
fn encode_value(array: &dyn Array, row: usize, out: &mut Vec<u8>) -> Result<()> {
    match array.data_type() {
        DataType::Int32 => {
            encode_i64(array.as_primitive::<Int32Type>().value(row) as i64, out);
        }
        DataType::Int64 => {
            encode_i64(array.as_primitive::<Int64Type>().value(row), out);
        }
        DataType::Float32 => {
            encode_f64(array.as_primitive::<Float32Type>().value(row) as f64, out);
        }
        DataType::Float64 => {
            encode_f64(array.as_primitive::<Float64Type>().value(row), out);
        }
        DataType::Utf8 => {
            encode_str(array.as_string::<i32>().value(row), out);
        }
        other => {
            return Err(Error::NotSupported(format!("index keys over {other} columns")));
        }
    }
    Ok(())
}

/// Sign-flipped big-endian: byte order equals numeric order.
fn encode_i64(value: i64, out: &mut Vec<u8>) {
    out.extend_from_slice(&((value as u64) ^ (1 << 63)).to_be_bytes());
}

/// IEEE-754 rank conversion: negative floats reverse, positives offset,
/// so byte order equals `total_cmp` order.
fn encode_f64(value: f64, out: &mut Vec<u8>) {
    let bits = value.to_bits();
    let rank = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
    out.extend_from_slice(&rank.to_be_bytes());
}

/// Escaped bytes plus a two-byte terminator: 0x00 becomes 0x00 0xFF, the
/// key component ends with 0x00 0x00, keeping prefix ordering correct for
/// composite keys.
fn encode_str(value: &str, out: &mut Vec<u8>) {
    for byte in value.as_bytes() {
        if *byte == 0x00 {
            out.extend_from_slice(&[0x00, 0xFF]);
        } else {
            out.push(*byte);
        }
    }
    out.extend_from_slice(&[0x00, 0x00]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn int_batch(values: Vec<Option<i64>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("k", DataType::Int64, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).expect("batch")
    }

    fn unique_index() -> Art {
        Art::new(vec![0], vec![IndexExpr::Column(0)], true)
    }

    #[test]
    fn test_i64_encoding_orders_across_sign() {
        let mut neg = Vec::new();
        let mut zero = Vec::new();
        let mut pos = Vec::new();
        encode_i64(-5, &mut neg);
        encode_i64(0, &mut zero);
        encode_i64(5, &mut pos);
        assert!(neg < zero);
        assert!(zero < pos);
    }

    #[test]
    fn test_f64_encoding_orders_across_sign() {
        let mut values: Vec<Vec<u8>> = [-2.5f64, -0.0, 0.0, 1.25, f64::INFINITY]
            .iter()
            .map(|v| {
                let mut out = Vec::new();
                encode_f64(*v, &mut out);
                out
            })
            .collect();
        let sorted = values.clone();
        values.sort();
        assert_eq!(values, sorted);
    }

    #[test]
    fn test_str_encoding_keeps_prefix_order() {
        let mut a = Vec::new();
        let mut ab = Vec::new();
        encode_str("a", &mut a);
        encode_str("ab", &mut ab);
        assert!(a < ab);
    }

    #[test]
    fn test_unique_insert_rejects_existing_key() {
        let index = unique_index();
        index
            .insert(&int_batch(vec![Some(1), Some(2)]), &[10, 11])
            .expect("first insert");
        let err = index.insert(&int_batch(vec![Some(2)]), &[12]).unwrap_err();
        assert!(matches!(err, Error::ConstraintError(_)));
        // the failed call installed nothing
        assert_eq!(index.entry_count(), 2);
        assert!(!index.contains_row(12));
    }

    #[test]
    fn test_unique_insert_rejects_duplicate_within_batch() {
        let index = unique_index();
        let err = index
            .insert(&int_batch(vec![Some(3), Some(3)]), &[10, 11])
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintError(_)));
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn test_null_keys_are_not_indexed() {
        let index = unique_index();
        index
            .insert(&int_batch(vec![None, None, Some(1)]), &[10, 11, 12])
            .expect("nulls pass unique checks");
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_remove_then_reinsert() {
        let index = unique_index();
        let batch = int_batch(vec![Some(9)]);
        index.insert(&batch, &[10]).expect("insert");
        index.remove(&batch, &[10]).expect("remove");
        assert_eq!(index.entry_count(), 0);
        index.insert(&batch, &[11]).expect("reinsert");
        assert!(index.contains_row(11));
    }

    #[test]
    fn test_non_unique_allows_duplicates() {
        let index = Art::new(vec![0], vec![IndexExpr::Column(0)], false);
        index
            .insert(&int_batch(vec![Some(7), Some(7)]), &[10, 11])
            .expect("duplicates allowed");
        assert_eq!(index.entry_count(), 2);
    }

    #[test]
    fn test_composite_keys_over_mixed_types() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("s", DataType::Utf8, false),
            Field::new("f", DataType::Float64, false),
        ]));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                Arc::new(StringArray::from(vec!["a", "a"])),
                Arc::new(Float64Array::from(vec![1.0, 2.0])),
            ],
        )
        .expect("batch");
        let index = Art::new(
            vec![0, 1],
            vec![IndexExpr::Column(0), IndexExpr::Column(1)],
            true,
        );
        index.insert(&batch, &[10, 11]).expect("distinct composites");
        let err = index.insert(&batch.slice(0, 1), &[12]).unwrap_err();
        assert!(matches!(err, Error::ConstraintError(_)));
    }
}
