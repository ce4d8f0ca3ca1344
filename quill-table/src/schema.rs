//! Table column definitions and their Arrow projection.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::array::new_null_array;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use quill_result::{Error, Result};
use quill_types::ScalarValue;

/// Fixed width charged for variable-length columns in size estimates.
///
/// Matches the engine's inline string representation; the estimate is a
/// lower bound for long strings, which is acceptable for spill heuristics.
const VAR_WIDTH_COLUMN_SIZE: usize = 16;

/// A single column definition.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Ordered column list describing one table.
///
/// The schema is positional: field id `k` addresses `columns[k]`.
#[derive(Debug, Clone)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The Arrow schema scans and appends are validated against.
    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.data_type.clone(), c.nullable))
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Fixed bytes-per-row of the internal representation.
    ///
    /// The sum over columns of the type's primitive width, with a fixed
    /// charge for variable-width types. Consumed by staging size estimates.
    pub fn row_width(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.data_type.primitive_width().unwrap_or(VAR_WIDTH_COLUMN_SIZE))
            .sum()
    }

    /// Schema extended with one trailing column.
    pub fn with_column(&self, column: ColumnDef) -> TableSchema {
        let mut columns = self.columns.clone();
        columns.push(column);
        TableSchema::new(columns)
    }

    /// Schema with the type of one column replaced.
    pub fn with_column_type(&self, index: usize, data_type: DataType) -> Result<TableSchema> {
        let mut columns = self.columns.clone();
        let column = columns.get_mut(index).ok_or_else(|| {
            Error::InvalidArgumentError(format!("column index {index} out of range"))
        })?;
        column.data_type = data_type;
        Ok(TableSchema::new(columns))
    }
}

/// Materialize a constant scalar as an Arrow array of `len` rows.
///
/// Used to evaluate `ADD COLUMN` defaults over staged rows.
pub fn scalar_to_array(value: &ScalarValue, data_type: &DataType, len: usize) -> Result<ArrayRef> {
    match (value, data_type) {
        (ScalarValue::Null, _) => Ok(new_null_array(data_type, len)),
        (ScalarValue::Int64(v), DataType::Int64) => {
            Ok(Arc::new(Int64Array::from(vec![*v; len])) as ArrayRef)
        }
        (ScalarValue::Int64(v), DataType::Int32) => {
            let narrowed = i32::try_from(*v).map_err(|_| {
                Error::InvalidArgumentError(format!("default value {v} does not fit in INT"))
            })?;
            Ok(Arc::new(Int32Array::from(vec![narrowed; len])) as ArrayRef)
        }
        (ScalarValue::Float64(v), DataType::Float64) => {
            Ok(Arc::new(Float64Array::from(vec![*v; len])) as ArrayRef)
        }
        (ScalarValue::Float64(v), DataType::Float32) => {
            Ok(Arc::new(Float32Array::from(vec![*v as f32; len])) as ArrayRef)
        }
        (ScalarValue::Utf8(v), DataType::Utf8) => {
            Ok(Arc::new(StringArray::from(vec![v.as_str(); len])) as ArrayRef)
        }
        (value, data_type) => Err(Error::InvalidArgumentError(format!(
            "default value {value} cannot be materialized as {data_type}"
        ))),
    }
}
