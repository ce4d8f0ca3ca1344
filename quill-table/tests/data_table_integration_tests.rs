//! Base-table behavior through the public API: reserved append regions,
//! index maintenance ordering, filtered scans, and statistics publication.

use std::sync::Arc;

use arrow::array::{AsArray, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::DataType;

use quill_table::{
    Art, ColumnDef, ColumnStatsSet, DataTable, FilterOp, IndexExpr, TableFilter, TableFilterSet,
    TableSchema,
};
use quill_types::ScalarValue;

fn two_column_table() -> Arc<DataTable> {
    let schema = TableSchema::new(vec![
        ColumnDef::new("id", DataType::Int64, false),
        ColumnDef::new("name", DataType::Utf8, true),
    ]);
    let mut table = DataTable::new(1, "people", schema);
    table.add_index(Arc::new(Art::new(vec![0], vec![IndexExpr::Column(0)], true)));
    Arc::new(table)
}

fn people_batch(table: &DataTable, ids: Vec<i64>, names: Vec<Option<&str>>) -> RecordBatch {
    RecordBatch::try_new(
        Arc::clone(table.arrow_schema()),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(names)),
        ],
    )
    .expect("batch")
}

#[test]
fn filtered_projected_scan_over_committed_rows() {
    let table = two_column_table();
    table
        .append_rows(&people_batch(
            &table,
            vec![1, 2, 3, 4],
            vec![Some("ada"), Some("bo"), None, Some("cy")],
        ))
        .expect("seed");

    let filters = TableFilterSet::new(vec![TableFilter::new(
        0,
        FilterOp::GreaterThan(ScalarValue::Int64(1)),
    )]);
    let chunks = table
        .scan_committed(Some(vec![1]), Some(filters))
        .expect("scan");

    let names: Vec<Option<String>> = chunks
        .iter()
        .flat_map(|chunk| {
            chunk
                .column(0)
                .as_string::<i32>()
                .iter()
                .map(|name| name.map(str::to_string))
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(
        names,
        vec![Some("bo".to_string()), None, Some("cy".to_string())]
    );
}

#[test]
fn append_region_reservation_survives_multiple_chunks() {
    let table = two_column_table();
    let first = people_batch(&table, vec![1, 2], vec![Some("a"), Some("b")]);
    let second = people_batch(&table, vec![3], vec![Some("c")]);

    let mut state = table.initialize_append(3);
    table
        .append_to_indexes(&first, state.current_row)
        .expect("index first");
    table.append(&first, &mut state).expect("append first");
    table
        .append_to_indexes(&second, state.current_row)
        .expect("index second");
    table.append(&second, &mut state).expect("append second");

    assert_eq!(state.row_start, 0);
    assert_eq!(state.written(), 3);
    assert_eq!(table.row_count(), 3);
}

#[test]
fn overrunning_a_reserved_region_is_an_internal_error() {
    let table = two_column_table();
    let batch = people_batch(&table, vec![1, 2], vec![Some("a"), Some("b")]);
    let mut state = table.initialize_append(1);
    assert!(table.append(&batch, &mut state).is_err());
}

#[test]
fn revert_append_unwinds_rows_but_not_untouched_index_entries() {
    let table = two_column_table();
    table
        .append_rows(&people_batch(&table, vec![1], vec![Some("a")]))
        .expect("seed");

    let batch = people_batch(&table, vec![2, 3], vec![Some("b"), Some("c")]);
    let mut state = table.initialize_append(2);
    table
        .append_to_indexes(&batch, state.current_row)
        .expect("index");
    table.append(&batch, &mut state).expect("append");
    assert_eq!(table.row_count(), 3);

    // a caller abandoning the region removes its index entries first,
    // exactly as the flush compensation does
    table
        .remove_from_indexes(&batch, state.row_start)
        .expect("compensate");
    table.revert_append(state.row_start, 2);

    assert_eq!(table.row_count(), 1);
    table.indexes().scan(|index| {
        assert_eq!(index.entry_count(), 1);
        assert!(!index.contains_row(1));
        assert!(!index.contains_row(2));
        false
    });
}

#[test]
fn merged_stats_are_published_on_the_table() {
    let table = two_column_table();
    table
        .append_rows(&people_batch(&table, vec![5], vec![Some("m")]))
        .expect("seed");

    let mut staged = ColumnStatsSet::initialize_empty(2);
    staged
        .update(&people_batch(&table, vec![-2, 9], vec![Some("a"), None]))
        .expect("staged stats");
    table.merge_stats(&staged).expect("merge");

    let stats = table.stats();
    let ids = stats.column(0).expect("id stats");
    assert_eq!(ids.min, Some(ScalarValue::Int64(-2)));
    assert_eq!(ids.max, Some(ScalarValue::Int64(9)));
    let names = stats.column(1).expect("name stats");
    assert_eq!(names.null_count, 1);
    assert_eq!(names.min, Some(ScalarValue::from("a")));
}
