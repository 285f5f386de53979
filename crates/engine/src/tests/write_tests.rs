use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tempfile::tempdir;

use super::helpers::{open_tree, test_config};
use crate::Config;

// --------------------- Multi-version inserts ---------------------

#[test]
fn same_key_keeps_every_timestamp() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir, test_config());

    tree.insert("k1", "v1", 1000)?;
    tree.insert("k2", "v2", 2000)?;
    tree.insert("k3", "v3", 3000)?;
    tree.insert("k1", "v1'", 4000)?;

    let versions = tree.query_key("k1")?;
    assert_eq!(versions.len(), 2);
    assert_eq!((versions[0].value.as_str(), versions[0].timestamp), ("v1", 1000));
    assert_eq!((versions[1].value.as_str(), versions[1].timestamp), ("v1'", 4000));

    assert_eq!(tree.total_rows(), 4);
    Ok(())
}

// --------------------- Flush threshold ---------------------

#[test]
fn threshold_crossing_creates_parts() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(
        &dir,
        Config {
            memtable_flush_threshold: 10,
            ..test_config()
        },
    );

    for i in 0..25u64 {
        tree.insert(format!("key{i}"), format!("value{i}"), i * 1000)?;
    }
    assert!(tree.part_count() >= 2, "two thresholds were crossed");

    tree.flush_memtable()?;
    let parts_after_flush = tree.part_count();

    // A second flush is a no-op: the memtable is empty.
    tree.flush_memtable()?;
    assert_eq!(tree.part_count(), parts_after_flush);

    let all = tree.query("key0", "key9")?;
    assert_eq!(all.len(), 25);
    assert_eq!(tree.total_rows(), 25);
    Ok(())
}

#[test]
fn below_threshold_stays_in_memory() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir, test_config());

    for i in 0..5u64 {
        tree.insert(format!("key{i}"), "v", i)?;
    }

    assert_eq!(tree.part_count(), 0);
    assert_eq!(tree.total_rows(), 5);
    assert!(tree.memory_usage() > 0);
    assert_eq!(tree.disk_usage(), 0);
    Ok(())
}

#[test]
fn flush_empty_memtable_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir, test_config());

    tree.flush_memtable()?;
    assert_eq!(tree.part_count(), 0);
    Ok(())
}

// --------------------- Concurrency ---------------------

#[test]
fn concurrent_writers_lose_nothing() -> Result<()> {
    let dir = tempdir()?;
    let tree = Arc::new(open_tree(
        &dir,
        Config {
            memtable_flush_threshold: 30,
            ..test_config()
        },
    ));

    let mut handles = Vec::new();
    for t in 0..4u64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..50u64 {
                tree.insert(format!("t{t}_key{i:02}"), format!("v{i}"), i)
                    .expect("insert should succeed");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("writer thread should finish");
    }

    assert_eq!(tree.total_rows(), 200);
    let all = tree.query("t0", "t4")?;
    assert_eq!(all.len(), 200);
    Ok(())
}
