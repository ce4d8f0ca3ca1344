//! End-to-end behavior of the transaction-local write buffer: staged
//! appends, shadow uniqueness, flush-time conflicts with compensation, and
//! the delete/update row-id partition.

use std::sync::Arc;

use arrow::array::{AsArray, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Int64Type};

use quill_result::Error;
use quill_table::{Art, ColumnDef, DataTable, IndexExpr, TableSchema};
use quill_transaction::{CommitState, LocalStorage, TransactionManager, WalRecord, WriteAheadLog};
use quill_types::reserved::local_row_id;

fn table_with_pk(table_id: u64) -> Arc<DataTable> {
    let schema = TableSchema::new(vec![ColumnDef::new("a", DataType::Int64, false)]);
    let mut table = DataTable::new(table_id, "t", schema);
    table.add_index(Arc::new(Art::new(vec![0], vec![IndexExpr::Column(0)], true)));
    Arc::new(table)
}

fn plain_table(table_id: u64) -> Arc<DataTable> {
    let schema = TableSchema::new(vec![ColumnDef::new("a", DataType::Int64, false)]);
    Arc::new(DataTable::new(table_id, "t", schema))
}

fn int_batch(table: &DataTable, values: Vec<i64>) -> RecordBatch {
    RecordBatch::try_new(
        Arc::clone(table.arrow_schema()),
        vec![Arc::new(Int64Array::from(values))],
    )
    .expect("batch")
}

fn staged_values(storage: &LocalStorage, table: &DataTable) -> Vec<i64> {
    let mut state = storage.initialize_scan(table, vec![0], None);
    let mut values = Vec::new();
    while let Some(chunk) = storage.scan(table, &mut state).expect("scan") {
        values.extend(chunk.column(0).as_primitive::<Int64Type>().values().iter());
    }
    values
}

fn committed_values(table: &DataTable) -> Vec<i64> {
    table
        .scan_committed(None, None)
        .expect("scan")
        .iter()
        .flat_map(|chunk| {
            chunk
                .column(0)
                .as_primitive::<Int64Type>()
                .values()
                .iter()
                .copied()
                .collect::<Vec<_>>()
        })
        .collect()
}

fn commit(storage: &mut LocalStorage) -> quill_result::Result<CommitState> {
    let mut commit_state = CommitState::new(1);
    storage.commit(&mut commit_state, None)?;
    Ok(commit_state)
}

fn base_index_entries(table: &DataTable) -> usize {
    let mut entries = 0;
    table.indexes().scan(|index| {
        entries = index.entry_count();
        false
    });
    entries
}

#[test]
fn staged_insert_scans_back_and_commits() {
    let table = table_with_pk(1);
    let mut storage = LocalStorage::new(2);

    storage
        .append(&table, &int_batch(&table, vec![1, 2, 3]))
        .expect("append");
    assert_eq!(staged_values(&storage, &table), vec![1, 2, 3]);
    assert_eq!(storage.added_rows(&table), 3);
    // nothing visible in the base table before commit
    assert_eq!(table.row_count(), 0);

    let commit_state = commit(&mut storage).expect("commit");
    assert_eq!(committed_values(&table), vec![1, 2, 3]);
    assert!(!storage.is_staged(&table));
    assert_eq!(commit_state.append_events.len(), 1);
    assert_eq!(commit_state.append_events[0].row_start, 0);
    assert_eq!(commit_state.append_events[0].count, 3);
}

#[test]
fn intra_transaction_unique_conflict_leaves_staging_unchanged() {
    let table = table_with_pk(1);
    let mut storage = LocalStorage::new(2);

    storage
        .append(&table, &int_batch(&table, vec![1, 2]))
        .expect("first append");
    let err = storage
        .append(&table, &int_batch(&table, vec![2]))
        .unwrap_err();
    assert!(matches!(err, Error::ConstraintError(_)));

    // the failed append left no trace
    assert_eq!(staged_values(&storage, &table), vec![1, 2]);
    assert_eq!(storage.added_rows(&table), 2);

    // and the buffer keeps accepting fresh keys
    storage
        .append(&table, &int_batch(&table, vec![3]))
        .expect("third append");
    commit(&mut storage).expect("commit");
    assert_eq!(committed_values(&table), vec![1, 2, 3]);
}

#[test]
fn duplicate_within_one_batch_is_rejected() {
    let table = table_with_pk(1);
    let mut storage = LocalStorage::new(2);
    let err = storage
        .append(&table, &int_batch(&table, vec![4, 4]))
        .unwrap_err();
    assert!(matches!(err, Error::ConstraintError(_)));
    assert_eq!(storage.added_rows(&table), 0);
}

#[test]
fn commit_time_conflict_against_committed_data_reverts_cleanly() {
    let table = table_with_pk(1);
    table
        .append_rows(&int_batch(&table, vec![10]))
        .expect("seed committed row");

    let mut storage = LocalStorage::new(2);
    // the shadow index sees no conflict: 10 is committed, not staged
    storage
        .append(&table, &int_batch(&table, vec![20, 10, 30]))
        .expect("staged append succeeds");

    let err = commit(&mut storage).unwrap_err();
    assert!(matches!(err, Error::ConstraintError(_)));

    // base table is exactly as before the transaction
    assert_eq!(table.row_count(), 1);
    assert_eq!(committed_values(&table), vec![10]);
    assert_eq!(base_index_entries(&table), 1);
    // the staging entry is destroyed along with the failed flush
    assert!(!storage.is_staged(&table));
}

#[test]
fn mid_flush_conflict_compensates_installed_prefix() {
    let table = table_with_pk(1);
    table
        .append_rows(&int_batch(&table, vec![100]))
        .expect("seed");

    let mut storage = LocalStorage::new(2);
    // two staged chunks: the first flushes fine, the second conflicts
    storage
        .append(&table, &int_batch(&table, vec![1, 2]))
        .expect("first chunk");
    storage
        .append(&table, &int_batch(&table, vec![100]))
        .expect("second chunk");

    let err = commit(&mut storage).unwrap_err();
    assert!(matches!(err, Error::ConstraintError(_)));

    // the first chunk's rows and index entries are gone again
    assert_eq!(table.row_count(), 1);
    assert_eq!(committed_values(&table), vec![100]);
    assert_eq!(base_index_entries(&table), 1);
    table.indexes().scan(|index| {
        assert!(!index.contains_row(1));
        assert!(!index.contains_row(2));
        false
    });
}

#[test]
fn staged_delete_before_commit_skips_row_at_flush() {
    let table = table_with_pk(1);
    let mut storage = LocalStorage::new(2);
    storage
        .append(&table, &int_batch(&table, vec![1, 2, 3]))
        .expect("append");

    let deleted = storage
        .delete(&table, &[local_row_id(1)])
        .expect("staged delete");
    assert_eq!(deleted, 1);
    assert_eq!(storage.added_rows(&table), 2);
    assert_eq!(staged_values(&storage, &table), vec![1, 3]);

    commit(&mut storage).expect("commit");
    assert_eq!(committed_values(&table), vec![1, 3]);
    assert_eq!(table.row_count(), 2);
}

#[test]
fn fully_deleted_staging_flushes_as_noop() {
    let table = table_with_pk(1);
    let mut storage = LocalStorage::new(2);
    storage
        .append(&table, &int_batch(&table, vec![5]))
        .expect("append");
    storage
        .delete(&table, &[local_row_id(0)])
        .expect("delete");
    assert_eq!(storage.added_rows(&table), 0);

    let commit_state = commit(&mut storage).expect("commit");
    assert_eq!(table.row_count(), 0);
    assert!(commit_state.append_events.is_empty());
}

#[test]
fn delete_partitions_committed_and_staged_ids() {
    let table = table_with_pk(1);
    table
        .append_rows(&int_batch(&table, vec![10, 11]))
        .expect("seed");

    let mut storage = LocalStorage::new(2);
    storage
        .append(&table, &int_batch(&table, vec![20, 21]))
        .expect("append");

    // committed row 0 (value 10) and staged offset 1 (value 21)
    let deleted = storage
        .delete(&table, &[0, local_row_id(1)])
        .expect("delete");
    assert_eq!(deleted, 2);

    assert_eq!(committed_values(&table), vec![11]);
    assert_eq!(staged_values(&storage, &table), vec![20]);
    assert_eq!(storage.added_rows(&table), 1);

    commit(&mut storage).expect("commit");
    assert_eq!(committed_values(&table), vec![11, 20]);
}

#[test]
fn abort_discards_staging_without_base_or_wal_activity() {
    let table = table_with_pk(1);
    let manager = TransactionManager::new();
    let mut wal = WriteAheadLog::new();

    let mut txn = manager.begin();
    txn.storage_mut()
        .append(&table, &int_batch(&table, vec![7, 8, 9]))
        .expect("append");
    manager.rollback(txn);

    assert_eq!(table.row_count(), 0);
    assert!(wal.records().is_empty());

    // a later transaction is free to use the same keys
    let mut txn = manager.begin();
    txn.storage_mut()
        .append(&table, &int_batch(&table, vec![7]))
        .expect("append");
    manager.commit(txn, Some(&mut wal)).expect("commit");
    assert_eq!(committed_values(&table), vec![7]);
}

#[test]
fn commit_through_manager_writes_wal_records() {
    let table = table_with_pk(3);
    let manager = TransactionManager::new();
    let mut wal = WriteAheadLog::new();

    let mut txn = manager.begin();
    txn.storage_mut()
        .append(&table, &int_batch(&table, vec![1, 2]))
        .expect("append");
    let commit_id = manager.commit(txn, Some(&mut wal)).expect("commit");

    assert_eq!(
        wal.records(),
        &[
            WalRecord::Append {
                table_id: 3,
                row_start: 0,
                count: 2
            },
            WalRecord::Commit { commit_id },
        ]
    );
}

#[test]
fn failed_commit_through_manager_leaves_no_wal_records() {
    let table = table_with_pk(3);
    table
        .append_rows(&int_batch(&table, vec![1]))
        .expect("seed");
    let manager = TransactionManager::new();
    let mut wal = WriteAheadLog::new();

    let mut txn = manager.begin();
    txn.storage_mut()
        .append(&table, &int_batch(&table, vec![1]))
        .expect("staged append");
    let err = manager.commit(txn, Some(&mut wal)).unwrap_err();
    assert!(matches!(err, Error::ConstraintError(_)));
    assert!(wal.records().is_empty());
}

#[test]
fn estimated_size_tracks_surviving_rows() {
    let schema = TableSchema::new(vec![
        ColumnDef::new("a", DataType::Int32, false),
        ColumnDef::new("b", DataType::Int64, false),
    ]);
    let table = Arc::new(DataTable::new(1, "t", schema));
    let batch = RecordBatch::try_new(
        Arc::clone(table.arrow_schema()),
        vec![
            Arc::new(arrow::array::Int32Array::from_iter_values(0..100)),
            Arc::new(Int64Array::from_iter_values(0..100)),
        ],
    )
    .expect("batch");

    let mut storage = LocalStorage::new(2);
    storage.append(&table, &batch).expect("append");
    assert_eq!(storage.estimated_size(), 100 * (4 + 8));

    let doomed: Vec<u64> = (0..40).map(local_row_id).collect();
    storage.delete(&table, &doomed).expect("delete");
    assert_eq!(storage.estimated_size(), 60 * (4 + 8));
}

#[test]
fn scans_of_absent_tables_are_empty() {
    let table = plain_table(1);
    let storage = LocalStorage::new(2);

    assert_eq!(staged_values(&storage, &table), Vec::<i64>::new());
    assert_eq!(storage.added_rows(&table), 0);
    assert_eq!(storage.estimated_size(), 0);

    let parallel = storage.initialize_parallel_scan(&table);
    assert_eq!(parallel.max_row(), 0);
    let mut state = storage.initialize_scan(&table, vec![0], None);
    assert!(!storage.next_parallel_scan(&table, &parallel, &mut state));
}

#[test]
fn staged_update_rewrites_rows() {
    let table = plain_table(1);
    let mut storage = LocalStorage::new(2);
    storage
        .append(&table, &int_batch(&table, vec![1, 2, 3]))
        .expect("append");

    let data = int_batch(&table, vec![20]);
    storage
        .update(&table, &[local_row_id(1)], &[0], &data)
        .expect("update");
    assert_eq!(staged_values(&storage, &table), vec![1, 20, 3]);

    commit(&mut storage).expect("commit");
    assert_eq!(committed_values(&table), vec![1, 20, 3]);
}

#[test]
fn staged_update_revalidates_shadow_index() {
    let table = table_with_pk(1);
    let mut storage = LocalStorage::new(2);
    storage
        .append(&table, &int_batch(&table, vec![1, 2, 3]))
        .expect("append");

    // updating staged row 0 to collide with staged key 3 must fail ...
    let err = storage
        .update(&table, &[local_row_id(0)], &[0], &int_batch(&table, vec![3]))
        .unwrap_err();
    assert!(matches!(err, Error::ConstraintError(_)));
    // ... and leave both the collection and the shadow index unchanged
    assert_eq!(staged_values(&storage, &table), vec![1, 2, 3]);
    storage
        .append(&table, &int_batch(&table, vec![1]))
        .expect_err("key 1 still occupied");

    // a non-conflicting update passes and frees the old key
    storage
        .update(&table, &[local_row_id(0)], &[0], &int_batch(&table, vec![9]))
        .expect("update");
    assert_eq!(staged_values(&storage, &table), vec![9, 2, 3]);
    storage
        .append(&table, &int_batch(&table, vec![1]))
        .expect("key 1 free again");

    commit(&mut storage).expect("commit");
    assert_eq!(committed_values(&table), vec![9, 2, 3, 1]);
}

#[test]
fn update_partitions_committed_and_staged_ids() {
    let table = plain_table(1);
    table
        .append_rows(&int_batch(&table, vec![10, 11]))
        .expect("seed");

    let mut storage = LocalStorage::new(2);
    storage
        .append(&table, &int_batch(&table, vec![20, 21]))
        .expect("append");

    // one committed row and one staged row in the same call
    let data = int_batch(&table, vec![110, 121]);
    storage
        .update(&table, &[0, local_row_id(1)], &[0], &data)
        .expect("update");

    assert_eq!(committed_values(&table), vec![110, 11]);
    assert_eq!(staged_values(&storage, &table), vec![20, 121]);
}
