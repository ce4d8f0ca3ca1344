//! Scan filter pushdown.
//!
//! A [`TableFilterSet`] is a conjunction of per-column comparisons evaluated
//! against each chunk during a collection scan. Rows failing any filter are
//! dropped before the chunk is handed to the consumer.

use arrow::array::{Array, AsArray, BooleanArray, RecordBatch};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};

use quill_result::{Error, Result};
use quill_types::{FieldId, ScalarValue};

/// Comparison applied to one column.
#[derive(Debug, Clone)]
pub enum FilterOp {
    Equals(ScalarValue),
    GreaterThan(ScalarValue),
    GreaterThanOrEquals(ScalarValue),
    LessThan(ScalarValue),
    LessThanOrEquals(ScalarValue),
    IsNull,
    IsNotNull,
}

/// One pushed-down comparison against a column of the scanned table.
#[derive(Debug, Clone)]
pub struct TableFilter {
    pub column: FieldId,
    pub op: FilterOp,
}

impl TableFilter {
    pub fn new(column: FieldId, op: FilterOp) -> Self {
        Self { column, op }
    }
}

/// Conjunction of filters for one scan.
#[derive(Debug, Clone, Default)]
pub struct TableFilterSet {
    pub filters: Vec<TableFilter>,
}

impl TableFilterSet {
    pub fn new(filters: Vec<TableFilter>) -> Self {
        Self { filters }
    }

    /// Evaluate the conjunction over a chunk, producing a keep-mask.
    ///
    /// NULL never satisfies a comparison; only `IsNull` selects it.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        let mut keep = vec![true; batch.num_rows()];
        for filter in &self.filters {
            let column = batch
                .columns()
                .get(filter.column as usize)
                .ok_or_else(|| {
                    Error::InvalidArgumentError(format!(
                        "filter references column {} but chunk has {}",
                        filter.column,
                        batch.num_columns()
                    ))
                })?;
            apply_filter(column.as_ref(), &filter.op, &mut keep)?;
        }
        Ok(BooleanArray::from(keep))
    }
}

fn apply_filter(array: &dyn Array, op: &FilterOp, keep: &mut [bool]) -> Result<()> {
    match op {
        FilterOp::IsNull => {
            for (row, slot) in keep.iter_mut().enumerate() {
                *slot &= array.is_null(row);
            }
            return Ok(());
        }
        FilterOp::IsNotNull => {
            for (row, slot) in keep.iter_mut().enumerate() {
                *slot &= array.is_valid(row);
            }
            return Ok(());
        }
        _ => {}
    }

    match array.data_type() {
        DataType::Int32 => {
            let target = int_operand(op)?;
            let values = array.as_primitive::<Int32Type>();
            for (row, slot) in keep.iter_mut().enumerate() {
                *slot &= values.is_valid(row) && compare(values.value(row) as i64, target, op);
            }
        }
        DataType::Int64 => {
            let target = int_operand(op)?;
            let values = array.as_primitive::<Int64Type>();
            for (row, slot) in keep.iter_mut().enumerate() {
                *slot &= values.is_valid(row) && compare(values.value(row), target, op);
            }
        }
        DataType::Float32 => {
            let target = float_operand(op)?;
            let values = array.as_primitive::<Float32Type>();
            for (row, slot) in keep.iter_mut().enumerate() {
                *slot &= values.is_valid(row) && compare_f64(values.value(row) as f64, target, op);
            }
        }
        DataType::Float64 => {
            let target = float_operand(op)?;
            let values = array.as_primitive::<Float64Type>();
            for (row, slot) in keep.iter_mut().enumerate() {
                *slot &= values.is_valid(row) && compare_f64(values.value(row), target, op);
            }
        }
        DataType::Utf8 => {
            let target = string_operand(op)?;
            let values = array.as_string::<i32>();
            for (row, slot) in keep.iter_mut().enumerate() {
                *slot &= values.is_valid(row) && compare(values.value(row), target, op);
            }
        }
        other => {
            return Err(Error::NotSupported(format!(
                "scan filters on {other} columns"
            )));
        }
    }
    Ok(())
}

fn operand(op: &FilterOp) -> &ScalarValue {
    match op {
        FilterOp::Equals(v)
        | FilterOp::GreaterThan(v)
        | FilterOp::GreaterThanOrEquals(v)
        | FilterOp::LessThan(v)
        | FilterOp::LessThanOrEquals(v) => v,
        FilterOp::IsNull | FilterOp::IsNotNull => unreachable!("null checks have no operand"),
    }
}

fn int_operand(op: &FilterOp) -> Result<i64> {
    match operand(op) {
        ScalarValue::Int64(v) => Ok(*v),
        other => Err(Error::InvalidArgumentError(format!(
            "integer filter with {other} operand"
        ))),
    }
}

fn float_operand(op: &FilterOp) -> Result<f64> {
    match operand(op) {
        ScalarValue::Float64(v) => Ok(*v),
        ScalarValue::Int64(v) => Ok(*v as f64),
        other => Err(Error::InvalidArgumentError(format!(
            "float filter with {other} operand"
        ))),
    }
}

fn string_operand(op: &FilterOp) -> Result<&str> {
    match operand(op) {
        ScalarValue::Utf8(v) => Ok(v.as_str()),
        other => Err(Error::InvalidArgumentError(format!(
            "string filter with {other} operand"
        ))),
    }
}

fn compare<T: PartialOrd>(value: T, target: T, op: &FilterOp) -> bool {
    match op {
        FilterOp::Equals(_) => value == target,
        FilterOp::GreaterThan(_) => value > target,
        FilterOp::GreaterThanOrEquals(_) => value >= target,
        FilterOp::LessThan(_) => value < target,
        FilterOp::LessThanOrEquals(_) => value <= target,
        FilterOp::IsNull | FilterOp::IsNotNull => unreachable!("handled before dispatch"),
    }
}

fn compare_f64(value: f64, target: f64, op: &FilterOp) -> bool {
    compare(value, target, op)
}
