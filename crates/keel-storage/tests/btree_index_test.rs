//! B+ tree index integration tests.
//!
//! Exercises the index end-to-end against a real disk manager and
//! buffer pool in a temp directory:
//! - ordered inserts and range scans
//! - leaf and root splits, tree height growth
//! - bulk load from a heap relation
//! - close/reopen rebinding from the meta page
//! - scan validation errors and cursor pin discipline

use std::sync::Arc;

use rand::seq::SliceRandom;
use tempfile::tempdir;

use keel_buffer::{BufferPool, BufferPoolConfig};
use keel_common::page::PageId;
use keel_common::{AttrType, KeelError, Operator};
use keel_storage::{BTreeIndex, DiskManager, DiskManagerConfig, HeapFile, RecordId, LEAF_CAPACITY};

/// Byte offset of the indexed attribute inside test records.
const ATTR_OFFSET: usize = 8;

/// Record layout: 8 bytes of row header junk, then the i32 key,
/// then 4 bytes of padding.
fn make_record(row: u64, key: i32) -> Vec<u8> {
    let mut record = vec![0u8; 16];
    record[..8].copy_from_slice(&row.to_le_bytes());
    record[ATTR_OFFSET..ATTR_OFFSET + 4].copy_from_slice(&key.to_le_bytes());
    record
}

fn setup(frames: usize) -> (tempfile::TempDir, Arc<DiskManager>, Arc<BufferPool>) {
    let dir = tempdir().unwrap();
    let disk = Arc::new(
        DiskManager::new(DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        })
        .unwrap(),
    );
    let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: frames }));
    (dir, disk, pool)
}

/// Creates a heap relation holding one record per key, in the order
/// given. Returns the record IDs.
fn build_relation(
    disk: &Arc<DiskManager>,
    pool: &Arc<BufferPool>,
    name: &str,
    keys: &[i32],
) -> Vec<RecordId> {
    let heap = HeapFile::create(disk.clone(), pool.clone(), name).unwrap();
    let rids = keys
        .iter()
        .enumerate()
        .map(|(row, &key)| heap.insert_record(&make_record(row as u64, key)).unwrap())
        .collect();
    heap.flush().unwrap();
    rids
}

/// Opens the index over an empty relation so tests can drive
/// `insert_entry` directly.
fn empty_index(
    disk: &Arc<DiskManager>,
    pool: &Arc<BufferPool>,
    relation: &str,
) -> BTreeIndex {
    build_relation(disk, pool, relation, &[]);
    BTreeIndex::open(disk.clone(), pool.clone(), relation, ATTR_OFFSET, AttrType::Integer).unwrap()
}

fn insert_key(index: &mut BTreeIndex, key: i32, rid: RecordId) {
    index.insert_entry(&key.to_le_bytes(), rid).unwrap();
}

/// Runs a scan to completion and returns the emitted record IDs.
fn scan_range(
    index: &mut BTreeIndex,
    low: i32,
    low_op: Operator,
    high: i32,
    high_op: Operator,
) -> Result<Vec<RecordId>, KeelError> {
    index.start_scan(&low.to_le_bytes(), low_op, &high.to_le_bytes(), high_op)?;
    let mut rids = Vec::new();
    loop {
        match index.scan_next() {
            Ok(rid) => rids.push(rid),
            Err(KeelError::IndexScanCompleted) => break,
            Err(e) => return Err(e),
        }
    }
    index.end_scan()?;
    Ok(rids)
}

// =============================================================================
// Insert and scan ordering
// =============================================================================

#[test]
fn test_scan_returns_rids_in_key_order() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    // Keys 5, 2, 8, 1, 9, 3 inserted as r1..r6
    let rids: Vec<RecordId> = (1..=6).map(|i| RecordId::new(1, i)).collect();
    for (i, key) in [5, 2, 8, 1, 9, 3].into_iter().enumerate() {
        insert_key(&mut index, key, rids[i]);
    }

    let result = scan_range(&mut index, 0, Operator::Gt, 10, Operator::Lt).unwrap();
    // Key order 1, 2, 3, 5, 8, 9 -> r4, r2, r6, r1, r3, r5
    assert_eq!(
        result,
        vec![rids[3], rids[1], rids[5], rids[0], rids[2], rids[4]]
    );
}

#[test]
fn test_point_scan_returns_exactly_one_rid() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    let mut expected = None;
    for key in 0..=1000 {
        let rid = RecordId::new(1 + key as u32 / 100, (key % 100) as u16);
        insert_key(&mut index, key, rid);
        if key == 500 {
            expected = Some(rid);
        }
    }

    let result = scan_range(&mut index, 500, Operator::Gte, 500, Operator::Lte).unwrap();
    assert_eq!(result, vec![expected.unwrap()]);
}

#[test]
fn test_inclusive_and_exclusive_bounds() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    for key in 0..10 {
        insert_key(&mut index, key, RecordId::new(1, key as u16));
    }

    let gte_lte = scan_range(&mut index, 3, Operator::Gte, 6, Operator::Lte).unwrap();
    assert_eq!(gte_lte.len(), 4); // 3, 4, 5, 6

    let gt_lt = scan_range(&mut index, 3, Operator::Gt, 6, Operator::Lt).unwrap();
    assert_eq!(gt_lt.len(), 2); // 4, 5
}

#[test]
fn test_duplicate_keys_round_trip_through_equality_scan() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    for key in 0..20 {
        insert_key(&mut index, key, RecordId::new(1, key as u16));
    }
    let dup_rids: Vec<RecordId> = (0..5).map(|i| RecordId::new(99, i)).collect();
    for &rid in &dup_rids {
        insert_key(&mut index, 7, rid);
    }

    let mut result = scan_range(&mut index, 7, Operator::Gte, 7, Operator::Lte).unwrap();
    // The original key-7 entry plus the five duplicates, in any order
    assert_eq!(result.len(), 6);
    for rid in dup_rids {
        assert!(result.contains(&rid));
    }
    result.retain(|r| r.page_no == 1);
    assert_eq!(result, vec![RecordId::new(1, 7)]);
}

#[test]
fn test_random_insert_order_scans_sorted() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    let mut keys: Vec<i32> = (0..3000).collect();
    keys.shuffle(&mut rand::thread_rng());
    for &key in &keys {
        insert_key(&mut index, key, RecordId::new(1 + key as u32, 0));
    }

    let result = scan_range(&mut index, -1, Operator::Gt, 3000, Operator::Lt).unwrap();
    assert_eq!(result.len(), 3000);
    // Rids encode their key; the sequence must come back sorted
    for (i, rid) in result.iter().enumerate() {
        assert_eq!(rid.page_no, 1 + i as u32);
    }
}

#[test]
fn test_negative_keys() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    for key in [-5, -1, -100, 0, 3] {
        insert_key(&mut index, key, RecordId::new((key + 200) as u32, 0));
    }

    let result = scan_range(&mut index, -101, Operator::Gt, 100, Operator::Lt).unwrap();
    let keys: Vec<i32> = result.iter().map(|r| r.page_no as i32 - 200).collect();
    assert_eq!(keys, vec![-100, -5, -1, 0, 3]);
}

// =============================================================================
// Splits and tree growth
// =============================================================================

#[test]
fn test_root_leaf_holds_exactly_capacity() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    for key in 0..LEAF_CAPACITY as i32 {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }
    assert!(index.is_root_leaf());
}

#[test]
fn test_root_splits_on_overflow() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    let initial_root = index.root_page_no();
    for key in 0..=LEAF_CAPACITY as i32 {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }

    assert!(!index.is_root_leaf());
    assert_ne!(index.root_page_no(), initial_root);

    // Every entry survives the split, in order
    let result = scan_range(
        &mut index,
        -1,
        Operator::Gt,
        LEAF_CAPACITY as i32 + 1,
        Operator::Lt,
    )
    .unwrap();
    assert_eq!(result.len(), LEAF_CAPACITY + 1);
    for (i, rid) in result.iter().enumerate() {
        assert_eq!(rid.page_no, i as u32 + 1);
    }
}

#[test]
fn test_multi_level_tree_with_eviction_pressure() {
    // A pool far smaller than the tree: every insert and scan runs
    // through eviction and reload.
    let (_dir, disk, pool) = setup(8);
    let mut index = empty_index(&disk, &pool, "rel");

    const N: i32 = 20_000;
    for key in 0..N {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }
    assert!(!index.is_root_leaf());

    let result = scan_range(&mut index, -1, Operator::Gt, N, Operator::Lt).unwrap();
    assert_eq!(result.len(), N as usize);
    for (i, rid) in result.iter().enumerate() {
        assert_eq!(rid.page_no, i as u32 + 1);
    }
}

#[test]
fn test_height_grows_past_two_levels() {
    // Enough sequential inserts to fill a root non-leaf with
    // separators and force a second level of non-leaf splits.
    let (_dir, disk, pool) = setup(2048);
    let mut index = empty_index(&disk, &pool, "rel");

    const N: i32 = 100_000;
    let root_after_first_split = {
        for key in 0..=LEAF_CAPACITY as i32 {
            insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
        }
        index.root_page_no()
    };
    for key in LEAF_CAPACITY as i32 + 1..N {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }

    // The root identity moved again when the non-leaf root split
    assert_ne!(index.root_page_no(), root_after_first_split);

    let result = scan_range(&mut index, -1, Operator::Gt, N, Operator::Lt).unwrap();
    assert_eq!(result.len(), N as usize);
    for (i, rid) in result.iter().enumerate() {
        assert_eq!(rid.page_no, i as u32 + 1);
    }
}

#[test]
fn test_descending_inserts() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    for key in (0..2000).rev() {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }

    let result = scan_range(&mut index, -1, Operator::Gt, 2000, Operator::Lt).unwrap();
    assert_eq!(result.len(), 2000);
    for (i, rid) in result.iter().enumerate() {
        assert_eq!(rid.page_no, i as u32 + 1);
    }
}

// =============================================================================
// Bulk load
// =============================================================================

#[test]
fn test_bulk_load_indexes_every_record() {
    let (_dir, disk, pool) = setup(64);

    let mut keys: Vec<i32> = (0..500).collect();
    keys.shuffle(&mut rand::thread_rng());
    let rids = build_relation(&disk, &pool, "emp", &keys);

    let mut index = BTreeIndex::open(
        disk.clone(),
        pool.clone(),
        "emp",
        ATTR_OFFSET,
        AttrType::Integer,
    )
    .unwrap();
    assert_eq!(index.name(), "emp.8");

    // Every key finds exactly the rid its record was stored under
    let heap = HeapFile::open(disk.clone(), pool.clone(), "emp").unwrap();
    for (i, &key) in keys.iter().enumerate() {
        let found = scan_range(&mut index, key, Operator::Gte, key, Operator::Lte).unwrap();
        assert_eq!(found, vec![rids[i]]);

        let record = heap.record(found[0]).unwrap();
        let stored = i32::from_le_bytes(record[ATTR_OFFSET..ATTR_OFFSET + 4].try_into().unwrap());
        assert_eq!(stored, key);
    }
}

#[test]
fn test_open_without_relation_leaves_no_index_file() {
    let (_dir, disk, pool) = setup(64);

    let err = BTreeIndex::open(
        disk.clone(),
        pool.clone(),
        "missing",
        ATTR_OFFSET,
        AttrType::Integer,
    )
    .unwrap_err();
    assert!(matches!(err, KeelError::FileNotFound(_)));
    assert!(!disk.file_exists("missing.8"));
}

#[test]
fn test_unsupported_attribute_types_rejected() {
    let (_dir, disk, pool) = setup(64);
    build_relation(&disk, &pool, "rel", &[1, 2, 3]);

    for attr_type in [AttrType::Double, AttrType::String] {
        let err =
            BTreeIndex::open(disk.clone(), pool.clone(), "rel", ATTR_OFFSET, attr_type)
                .unwrap_err();
        assert!(matches!(err, KeelError::UnsupportedAttrType(_)));
    }
}

// =============================================================================
// Close and reopen
// =============================================================================

#[test]
fn test_cold_reopen_preserves_every_entry() {
    let dir = tempdir().unwrap();
    let config = DiskManagerConfig {
        data_dir: dir.path().to_path_buf(),
        fsync_enabled: false,
    };

    let before = {
        let disk = Arc::new(DiskManager::new(config.clone()).unwrap());
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 64 }));
        build_relation(&disk, &pool, "emp", &[]);
        let mut index =
            BTreeIndex::open(disk.clone(), pool, "emp", ATTR_OFFSET, AttrType::Integer).unwrap();

        for key in 0..=1000 {
            insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
        }
        let before =
            scan_range(&mut index, -1, Operator::Gt, 10001, Operator::Lt).unwrap();
        index.close().unwrap();
        before
    };
    assert_eq!(before.len(), 1001);

    // Fresh disk manager and pool over the same directory: everything
    // must come back from the file alone.
    let disk = Arc::new(DiskManager::new(config).unwrap());
    let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 64 }));
    let mut index =
        BTreeIndex::open(disk, pool, "emp", ATTR_OFFSET, AttrType::Integer).unwrap();
    assert!(!index.is_root_leaf());

    let after = scan_range(&mut index, -1, Operator::Gt, 10001, Operator::Lt).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_reopen_with_mismatched_binding_fails() {
    let (_dir, disk, pool) = setup(64);
    build_relation(&disk, &pool, "emp", &[1]);
    // Creates emp.8
    BTreeIndex::open(disk.clone(), pool.clone(), "emp", ATTR_OFFSET, AttrType::Integer).unwrap();

    // Force a name collision: an index request whose meta cannot match
    build_relation(&disk, &pool, "other", &[1]);
    std::fs::copy(
        _dir.path().join("emp.8"),
        _dir.path().join("other.8"),
    )
    .unwrap();

    let err = BTreeIndex::open(disk, pool, "other", ATTR_OFFSET, AttrType::Integer).unwrap_err();
    assert!(matches!(err, KeelError::BadIndexInfo(_)));
}

// =============================================================================
// Scan validation and cursor state
// =============================================================================

#[test]
fn test_bad_opcodes_rejected() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");
    for key in 0..100 {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }

    // Low bound must be GT/GTE
    let err = index
        .start_scan(
            &0i32.to_le_bytes(),
            Operator::Lt,
            &50i32.to_le_bytes(),
            Operator::Lte,
        )
        .unwrap_err();
    assert!(matches!(err, KeelError::BadOpcode));

    // High bound must be LT/LTE
    let err = index
        .start_scan(
            &0i32.to_le_bytes(),
            Operator::Gte,
            &50i32.to_le_bytes(),
            Operator::Gte,
        )
        .unwrap_err();
    assert!(matches!(err, KeelError::BadOpcode));

    // Neither failure left a scan active
    assert!(matches!(
        index.scan_next(),
        Err(KeelError::ScanNotInitialized)
    ));
}

#[test]
fn test_bad_range_rejected() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");
    for key in 0..100 {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }

    let err = index
        .start_scan(
            &40i32.to_le_bytes(),
            Operator::Gte,
            &30i32.to_le_bytes(),
            Operator::Lte,
        )
        .unwrap_err();
    assert!(matches!(err, KeelError::BadScanRange));
}

#[test]
fn test_low_bound_above_every_key() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");
    for key in 0..100 {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }

    let err = index
        .start_scan(
            &1000i32.to_le_bytes(),
            Operator::Gte,
            &2000i32.to_le_bytes(),
            Operator::Lte,
        )
        .unwrap_err();
    assert!(matches!(err, KeelError::NoSuchKeyFound));
}

#[test]
fn test_scan_on_empty_index() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    let err = index
        .start_scan(
            &0i32.to_le_bytes(),
            Operator::Gte,
            &10i32.to_le_bytes(),
            Operator::Lte,
        )
        .unwrap_err();
    assert!(matches!(err, KeelError::NoSuchKeyFound));
}

#[test]
fn test_scan_calls_without_active_scan() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");
    insert_key(&mut index, 1, RecordId::new(1, 0));

    assert!(matches!(
        index.scan_next(),
        Err(KeelError::ScanNotInitialized)
    ));
    assert!(matches!(
        index.end_scan(),
        Err(KeelError::ScanNotInitialized)
    ));

    // And again after a completed scan was ended
    let _ = scan_range(&mut index, 0, Operator::Gte, 10, Operator::Lte).unwrap();
    assert!(matches!(
        index.end_scan(),
        Err(KeelError::ScanNotInitialized)
    ));
}

#[test]
fn test_completed_scan_keeps_raising_completed() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");
    for key in 0..5 {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }

    index
        .start_scan(
            &0i32.to_le_bytes(),
            Operator::Gte,
            &2i32.to_le_bytes(),
            Operator::Lte,
        )
        .unwrap();
    for _ in 0..3 {
        index.scan_next().unwrap();
    }
    assert!(matches!(
        index.scan_next(),
        Err(KeelError::IndexScanCompleted)
    ));
    assert!(matches!(
        index.scan_next(),
        Err(KeelError::IndexScanCompleted)
    ));
    index.end_scan().unwrap();
}

#[test]
fn test_starting_a_scan_ends_the_previous_one() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");
    for key in 0..1000 {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }

    index
        .start_scan(
            &0i32.to_le_bytes(),
            Operator::Gte,
            &999i32.to_le_bytes(),
            Operator::Lte,
        )
        .unwrap();
    index.scan_next().unwrap();

    // A second start_scan implicitly ends the first
    index
        .start_scan(
            &500i32.to_le_bytes(),
            Operator::Gte,
            &999i32.to_le_bytes(),
            Operator::Lte,
        )
        .unwrap();
    let first = index.scan_next().unwrap();
    assert_eq!(first.page_no, 501);
    index.end_scan().unwrap();
}

#[test]
fn test_scan_crossing_many_leaves_holds_one_pin() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    const N: i32 = 5000;
    for key in 0..N {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }

    index
        .start_scan(
            &0i32.to_le_bytes(),
            Operator::Gte,
            &(N - 1).to_le_bytes(),
            Operator::Lte,
        )
        .unwrap();
    for _ in 0..N {
        index.scan_next().unwrap();
    }
    assert!(matches!(
        index.scan_next(),
        Err(KeelError::IndexScanCompleted)
    ));
    index.end_scan().unwrap();

    // Nothing in the index file is left pinned
    let file_id = disk.open_file("rel.8", false).unwrap();
    let num_pages = disk.num_pages(file_id).unwrap();
    for page_no in 1..=num_pages {
        let pin_count = pool.pin_count(PageId::new(file_id, page_no));
        assert!(matches!(pin_count, None | Some(0)), "page {page_no} pinned");
    }
}

#[test]
fn test_no_pins_leak_after_inserts_and_scans() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    for key in 0..2000 {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }
    let _ = scan_range(&mut index, 100, Operator::Gt, 1500, Operator::Lt).unwrap();
    let _ = scan_range(&mut index, 0, Operator::Gte, 0, Operator::Lte).unwrap();

    let file_id = disk.open_file("rel.8", false).unwrap();
    let num_pages = disk.num_pages(file_id).unwrap();
    for page_no in 1..=num_pages {
        let pin_count = pool.pin_count(PageId::new(file_id, page_no));
        assert!(matches!(pin_count, None | Some(0)), "page {page_no} pinned");
    }
}

#[test]
fn test_scan_with_low_equal_high_on_boundary_duplicates() {
    let (_dir, disk, pool) = setup(64);
    let mut index = empty_index(&disk, &pool, "rel");

    // Fill past a leaf split with a run of duplicates straddling the
    // split point.
    let dup_key = LEAF_CAPACITY as i32 / 2;
    for key in 0..LEAF_CAPACITY as i32 {
        insert_key(&mut index, key, RecordId::new(key as u32 + 1, 0));
    }
    for i in 0..40u16 {
        insert_key(&mut index, dup_key, RecordId::new(500_000, i));
    }
    assert!(!index.is_root_leaf());

    let result = scan_range(&mut index, dup_key, Operator::Gte, dup_key, Operator::Lte).unwrap();
    assert_eq!(result.len(), 41);
}
