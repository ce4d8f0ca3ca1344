//! Per-column running statistics.
//!
//! Statistics accumulate on every append into a staging collection and are
//! merged into the base table's statistics when the staging data is flushed
//! at commit. They are never recomputed from scratch on the hot path.

use arrow::array::{Array, AsArray, RecordBatch};
use arrow::compute;
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};

use quill_result::{Error, Result};
use quill_types::ScalarValue;

/// Running summary for a single column: null count plus min/max bounds.
///
/// Bounds are tracked for the primitive and string types the engine
/// aggregates; other types only accumulate null counts.
#[derive(Debug, Clone, Default)]
pub struct ColumnStats {
    pub null_count: u64,
    pub min: Option<ScalarValue>,
    pub max: Option<ScalarValue>,
}

impl ColumnStats {
    fn update_bounds(&mut self, candidate_min: ScalarValue, candidate_max: ScalarValue) {
        match &self.min {
            Some(current) if current.try_cmp(&candidate_min) != Some(std::cmp::Ordering::Greater) => {}
            _ => self.min = Some(candidate_min),
        }
        match &self.max {
            Some(current) if current.try_cmp(&candidate_max) != Some(std::cmp::Ordering::Less) => {}
            _ => self.max = Some(candidate_max),
        }
    }

    fn update_from_array(&mut self, array: &dyn Array) {
        self.null_count += array.null_count() as u64;
        if array.len() == array.null_count() {
            return;
        }
        match array.data_type() {
            DataType::Int32 => {
                let values = array.as_primitive::<Int32Type>();
                if let (Some(lo), Some(hi)) = (compute::min(values), compute::max(values)) {
                    self.update_bounds(
                        ScalarValue::Int64(lo as i64),
                        ScalarValue::Int64(hi as i64),
                    );
                }
            }
            DataType::Int64 => {
                let values = array.as_primitive::<Int64Type>();
                if let (Some(lo), Some(hi)) = (compute::min(values), compute::max(values)) {
                    self.update_bounds(ScalarValue::Int64(lo), ScalarValue::Int64(hi));
                }
            }
            DataType::Float32 => {
                let values = array.as_primitive::<Float32Type>();
                if let (Some(lo), Some(hi)) = (compute::min(values), compute::max(values)) {
                    self.update_bounds(
                        ScalarValue::Float64(lo as f64),
                        ScalarValue::Float64(hi as f64),
                    );
                }
            }
            DataType::Float64 => {
                let values = array.as_primitive::<Float64Type>();
                if let (Some(lo), Some(hi)) = (compute::min(values), compute::max(values)) {
                    self.update_bounds(ScalarValue::Float64(lo), ScalarValue::Float64(hi));
                }
            }
            DataType::Utf8 => {
                let values = array.as_string::<i32>();
                if let (Some(lo), Some(hi)) =
                    (compute::min_string(values), compute::max_string(values))
                {
                    self.update_bounds(
                        ScalarValue::Utf8(lo.to_string()),
                        ScalarValue::Utf8(hi.to_string()),
                    );
                }
            }
            _ => {}
        }
    }

    fn merge(&mut self, other: &ColumnStats) {
        self.null_count += other.null_count;
        if let (Some(lo), Some(hi)) = (other.min.clone(), other.max.clone()) {
            self.update_bounds(lo, hi);
        } else {
            if let Some(lo) = other.min.clone() {
                self.update_bounds(lo.clone(), lo);
            }
            if let Some(hi) = other.max.clone() {
                self.update_bounds(hi.clone(), hi);
            }
        }
    }
}

/// Statistics for every column of one table or staging collection.
#[derive(Debug, Clone)]
pub struct ColumnStatsSet {
    columns: Vec<ColumnStats>,
}

impl ColumnStatsSet {
    /// Empty statistics over `column_count` columns.
    pub fn initialize_empty(column_count: usize) -> Self {
        Self {
            columns: vec![ColumnStats::default(); column_count],
        }
    }

    pub fn column(&self, index: usize) -> Option<&ColumnStats> {
        self.columns.get(index)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Fold one appended chunk into the running summary.
    pub fn update(&mut self, batch: &RecordBatch) -> Result<()> {
        if batch.num_columns() != self.columns.len() {
            return Err(Error::Internal(format!(
                "statistics track {} columns but chunk has {}",
                self.columns.len(),
                batch.num_columns()
            )));
        }
        for (stats, column) in self.columns.iter_mut().zip(batch.columns()) {
            stats.update_from_array(column.as_ref());
        }
        Ok(())
    }

    /// Fold another summary into this one. Used at flush time to publish
    /// staging statistics into the base table.
    pub fn merge(&mut self, other: &ColumnStatsSet) -> Result<()> {
        if other.columns.len() != self.columns.len() {
            return Err(Error::Internal(format!(
                "cannot merge statistics over {} columns into {}",
                other.columns.len(),
                self.columns.len()
            )));
        }
        for (target, source) in self.columns.iter_mut().zip(&other.columns) {
            target.merge(source);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn batch(values: Vec<Option<i64>>, names: Vec<Option<&str>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("v", DataType::Int64, true),
            Field::new("n", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(values)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn test_update_tracks_bounds_and_nulls() {
        let mut stats = ColumnStatsSet::initialize_empty(2);
        stats
            .update(&batch(
                vec![Some(5), None, Some(-3)],
                vec![Some("m"), Some("a"), None],
            ))
            .expect("update");

        let ints = stats.column(0).expect("col 0");
        assert_eq!(ints.null_count, 1);
        assert_eq!(ints.min, Some(ScalarValue::Int64(-3)));
        assert_eq!(ints.max, Some(ScalarValue::Int64(5)));

        let strings = stats.column(1).expect("col 1");
        assert_eq!(strings.null_count, 1);
        assert_eq!(strings.min, Some(ScalarValue::from("a")));
        assert_eq!(strings.max, Some(ScalarValue::from("m")));
    }

    #[test]
    fn test_bounds_widen_across_updates() {
        let mut stats = ColumnStatsSet::initialize_empty(2);
        stats
            .update(&batch(vec![Some(2)], vec![Some("b")]))
            .expect("first");
        stats
            .update(&batch(vec![Some(9)], vec![Some("a")]))
            .expect("second");

        assert_eq!(stats.column(0).unwrap().min, Some(ScalarValue::Int64(2)));
        assert_eq!(stats.column(0).unwrap().max, Some(ScalarValue::Int64(9)));
        assert_eq!(stats.column(1).unwrap().min, Some(ScalarValue::from("a")));
    }

    #[test]
    fn test_merge_combines_summaries() {
        let mut base = ColumnStatsSet::initialize_empty(2);
        base.update(&batch(vec![Some(10)], vec![Some("k")]))
            .expect("base");

        let mut staged = ColumnStatsSet::initialize_empty(2);
        staged
            .update(&batch(vec![Some(-1), None], vec![Some("z"), None]))
            .expect("staged");

        base.merge(&staged).expect("merge");
        assert_eq!(base.column(0).unwrap().min, Some(ScalarValue::Int64(-1)));
        assert_eq!(base.column(0).unwrap().max, Some(ScalarValue::Int64(10)));
        assert_eq!(base.column(0).unwrap().null_count, 1);
        assert_eq!(base.column(1).unwrap().max, Some(ScalarValue::from("z")));
    }

    #[test]
    fn test_update_rejects_column_count_mismatch() {
        let mut stats = ColumnStatsSet::initialize_empty(1);
        let err = stats
            .update(&batch(vec![Some(1)], vec![Some("a")]))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
