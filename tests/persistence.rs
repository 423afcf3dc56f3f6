use crab_hashfile::Engine;

fn temp_db_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

/// Values written before a sync survive a full close-and-reopen cycle
/// (P6): every key inserted before the first close looks up the same after
/// the file is reopened in a fresh `Engine`, recovered through the file's
/// persisted root table rather than recreated.
#[test]
fn round_trip_through_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir, "roundtrip.db");

    {
        let mut engine = Engine::create(&path).unwrap();
        let mut table = engine.root_table(8).unwrap();
        for i in 0u64..50 {
            let key = format!("key-{i}");
            table.insert_str(&mut engine, key.as_bytes(), &i.to_le_bytes()).unwrap();
        }
        engine.close().unwrap();
    }

    let mut engine = Engine::create(&path).unwrap();
    let table = engine.root_table(8).unwrap();
    for i in 0u64..50 {
        let key = format!("key-{i}");
        assert_eq!(table.lookup(&engine, key.as_bytes()), Some(i.to_le_bytes().to_vec()));
    }
}

/// S6: after `close` then reopen, a multi-map built before the close
/// yields the same key/value-set groups, recovered via the persisted root
/// offset rather than rebuilt from scratch.
#[test]
fn multimap_round_trip_through_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir, "roundtrip-multimap.db");

    {
        let mut engine = Engine::create(&path).unwrap();
        let mut mm = engine.root_multimap().unwrap();
        mm.insert(&mut engine, b"key0", b"key0val0").unwrap();
        mm.insert(&mut engine, b"key0", b"key0val1").unwrap();
        mm.insert(&mut engine, b"key0", b"key0val2").unwrap();
        mm.insert(&mut engine, b"key1", b"key1val0").unwrap();
        mm.insert(&mut engine, b"key1", b"key1val1").unwrap();
        mm.insert(&mut engine, b"key2", b"key2val0").unwrap();
        engine.close().unwrap();
    }

    let mut engine = Engine::create(&path).unwrap();
    let mm = engine.root_multimap().unwrap();

    let mut keys = mm.iterate_keys(&engine);
    keys.sort();
    assert_eq!(keys, vec![b"key0".to_vec(), b"key1".to_vec(), b"key2".to_vec()]);

    let mut key0 = mm.values_of(&engine, b"key0");
    key0.sort();
    assert_eq!(key0, vec![b"key0val0".to_vec(), b"key0val1".to_vec(), b"key0val2".to_vec()]);

    let mut key1 = mm.values_of(&engine, b"key1");
    key1.sort();
    assert_eq!(key1, vec![b"key1val0".to_vec(), b"key1val1".to_vec()]);

    assert_eq!(mm.values_of(&engine, b"key2"), vec![b"key2val0".to_vec()]);
}

/// A backing file created far smaller than the eventual working set grows
/// to accommodate it instead of failing allocation.
#[test]
fn small_initial_file_grows_under_load() {
    let mut engine = Engine::create_anon(256).unwrap();
    let mut table = engine.create_table(8).unwrap();
    for i in 0u64..500 {
        let key = format!("padding-key-number-{i}");
        table.insert_str(&mut engine, key.as_bytes(), &i.to_le_bytes()).unwrap();
    }
    for i in 0u64..500 {
        let key = format!("padding-key-number-{i}");
        assert_eq!(table.lookup(&engine, key.as_bytes()), Some(i.to_le_bytes().to_vec()));
    }
}

/// A representative mixed workload: inserts, overwrites, and a multimap
/// built alongside a plain table in the same engine.
#[test]
fn mixed_table_and_multimap_workload() {
    let mut engine = Engine::create_anon(1 << 16).unwrap();
    let mut counts = engine.create_table(8).unwrap();
    let mut tags = engine.create_multimap().unwrap();

    counts.insert_str(&mut engine, b"visits", &1u64.to_le_bytes()).unwrap();
    counts.insert_str(&mut engine, b"visits", &2u64.to_le_bytes()).unwrap();
    assert_eq!(counts.lookup(&engine, b"visits"), Some(2u64.to_le_bytes().to_vec()));

    tags.insert(&mut engine, b"color", b"red").unwrap();
    tags.insert(&mut engine, b"color", b"blue").unwrap();
    let mut colors = tags.values_of(&engine, b"color");
    colors.sort();
    assert_eq!(colors, vec![b"blue".to_vec(), b"red".to_vec()]);
}

/// Re-inserting the same key/value pair into a multimap does not grow its
/// value set.
#[test]
fn multimap_dedups_identical_pairs() {
    let mut engine = Engine::create_anon(1 << 16).unwrap();
    let mut mm = engine.create_multimap().unwrap();
    for _ in 0..10 {
        mm.insert(&mut engine, b"k", b"v").unwrap();
    }
    assert_eq!(mm.values_of(&engine, b"k"), vec![b"v".to_vec()]);
}

/// A key absent from the table looks up as `None`, never an error.
#[test]
fn missing_key_is_none_not_error() {
    let mut engine = Engine::create_anon(4096).unwrap();
    let mut table = engine.create_table(4).unwrap();
    table.insert_str(&mut engine, b"present", &7u32.to_le_bytes()).unwrap();
    assert_eq!(table.lookup(&engine, b"absent"), None);
}

/// Overwriting an existing key does not increase the table's filled count.
#[test]
fn overwrite_does_not_grow_filled_count() {
    let mut engine = Engine::create_anon(4096).unwrap();
    let mut table = engine.create_table(8).unwrap();
    table.insert_str(&mut engine, b"k", &1u64.to_le_bytes()).unwrap();
    let before = table.stats(&engine).filled;
    table.insert_str(&mut engine, b"k", &2u64.to_le_bytes()).unwrap();
    let after = table.stats(&engine).filled;
    assert_eq!(before, after);
}

/// Reduced-scale stand-in for the full key-count scenario; the full-scale
/// version below is `#[ignore]`d since it takes tens of seconds.
#[test]
fn large_key_count_reduced_scale() {
    run_large_key_count(20_000);
}

#[test]
#[ignore = "exercises the full 5,000,000 key scenario; slow, run explicitly"]
fn large_key_count_full_scale() {
    run_large_key_count(5_000_000);
}

fn run_large_key_count(n: u64) {
    let mut engine = Engine::create_anon(1 << 16).unwrap();
    let mut table = engine.create_table(8).unwrap();
    for i in 0..n {
        let key = format!("key-{i}");
        table.insert_str(&mut engine, key.as_bytes(), &i.to_le_bytes()).unwrap();
    }
    for i in (0..n).step_by((n / 100).max(1) as usize) {
        let key = format!("key-{i}");
        assert_eq!(table.lookup(&engine, key.as_bytes()), Some(i.to_le_bytes().to_vec()));
    }
}

/// Reduced-scale stand-in for the full nested-value-count scenario.
#[test]
fn large_nested_value_count_reduced_scale() {
    run_large_nested_value_count(100);
}

#[test]
#[ignore = "exercises the full 3,000 nested value scenario; slow, run explicitly"]
fn large_nested_value_count_full_scale() {
    run_large_nested_value_count(3_000);
}

fn run_large_nested_value_count(n: u64) {
    let mut engine = Engine::create_anon(1 << 16).unwrap();
    let mut mm = engine.create_multimap().unwrap();
    for i in 0..n {
        let value = format!("value-{i}");
        mm.insert(&mut engine, b"bucket", value.as_bytes()).unwrap();
    }
    assert_eq!(mm.values_of(&engine, b"bucket").len(), n as usize);
}
