use anyhow::Result;
use granule::{Row, GRANULE_SIZE};
use tempfile::tempdir;

use crate::{Part, METADATA_FILE};

fn rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| Row::new(format!("key{i:06}"), format!("value{i}"), i as u64))
        .collect()
}

// -------------------- Write path --------------------

#[test]
fn write_creates_all_part_files() -> Result<()> {
    let dir = tempdir()?;
    let mut part = Part::create(7, dir.path());
    part.write_from_rows(&rows(3))?;

    let part_dir = dir.path().join("part_7");
    assert!(part_dir.join(METADATA_FILE).exists());
    assert!(part_dir.join("primary.idx").exists());
    assert!(part_dir.join("granule_0_keys.bin").exists());
    assert!(part_dir.join("granule_0_values.bin").exists());
    assert!(part_dir.join("granule_0_timestamps.bin").exists());
    Ok(())
}

#[test]
fn write_computes_metadata() -> Result<()> {
    let dir = tempdir()?;
    let mut part = Part::create(1, dir.path());
    part.write_from_rows(&[
        Row::new("m", "1", 500),
        Row::new("a", "2", 100),
        Row::new("z", "3", 900),
    ])?;

    let meta = part.metadata();
    assert_eq!(meta.part_id, 1);
    assert_eq!(meta.min_key, "a");
    assert_eq!(meta.max_key, "z");
    assert_eq!(meta.min_timestamp, 100);
    assert_eq!(meta.max_timestamp, 900);
    assert_eq!(meta.row_count, 3);
    assert_eq!(meta.granule_count, 1);
    assert!(meta.disk_size > 0);
    assert!(meta.creation_time > 0);
    Ok(())
}

#[test]
fn write_sorts_unordered_input() -> Result<()> {
    let dir = tempdir()?;
    let mut part = Part::create(1, dir.path());
    part.write_from_rows(&[
        Row::new("c", "3", 3),
        Row::new("a", "1", 1),
        Row::new("b", "2", 2),
    ])?;

    let all = part.get_all_rows()?;
    let keys: Vec<&str> = all.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, ["a", "b", "c"]);
    Ok(())
}

#[test]
fn write_zero_rows_is_an_error() {
    let dir = tempdir().unwrap();
    let mut part = Part::create(1, dir.path());
    assert!(part.write_from_rows(&[]).is_err());
}

#[test]
fn large_batch_splits_into_bounded_granules() -> Result<()> {
    let dir = tempdir()?;
    let mut part = Part::create(1, dir.path());
    part.write_from_rows(&rows(GRANULE_SIZE + 1))?;

    assert_eq!(part.metadata().granule_count, 2);
    assert_eq!(part.metadata().row_count, (GRANULE_SIZE + 1) as u64);
    assert_eq!(part.index().len(), 2);
    assert!(part.index().entries().iter().all(|e| e.row_count <= GRANULE_SIZE as u64));
    Ok(())
}

// -------------------- Read path --------------------

#[test]
fn open_reads_metadata_without_loading_granules() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut part = Part::create(3, dir.path());
        part.write_from_rows(&rows(10))?;
    }

    let part = Part::open(3, dir.path())?;
    assert!(!part.is_loaded());
    assert_eq!(part.metadata().row_count, 10);
    assert_eq!(part.metadata().min_key, "key000000");
    assert!(part.disk_usage() > 0);
    Ok(())
}

#[test]
fn query_loads_lazily_and_filters() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut part = Part::create(3, dir.path());
        part.write_from_rows(&rows(10))?;
    }

    let mut part = Part::open(3, dir.path())?;
    let hits = part.query("key000002", "key000004")?;
    assert!(part.is_loaded());
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].key, "key000002");
    assert_eq!(hits[2].value, "value4");
    Ok(())
}

#[test]
fn disjoint_query_is_empty_without_loading() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut part = Part::create(3, dir.path());
        part.write_from_rows(&rows(10))?;
    }

    let mut part = Part::open(3, dir.path())?;
    assert!(part.query("zzz", "zzzz")?.is_empty());
    assert!(!part.is_loaded());
    Ok(())
}

#[test]
fn query_key_returns_all_versions_in_order() -> Result<()> {
    let dir = tempdir()?;
    let mut part = Part::create(1, dir.path());
    part.write_from_rows(&[
        Row::new("k", "new", 200),
        Row::new("k", "old", 100),
        Row::new("other", "x", 1),
    ])?;

    let versions = part.query_key("k")?;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].value, "old");
    assert_eq!(versions[1].value, "new");
    Ok(())
}

#[test]
fn overlaps_range_matches_key_bounds() -> Result<()> {
    let dir = tempdir()?;
    let mut part = Part::create(1, dir.path());
    part.write_from_rows(&[Row::new("d", "1", 1), Row::new("h", "2", 2)])?;

    assert!(part.overlaps_range("a", "z"));
    assert!(part.overlaps_range("a", "d"));
    assert!(part.overlaps_range("h", "i"));
    assert!(!part.overlaps_range("a", "c"));
    assert!(!part.overlaps_range("i", "z"));
    Ok(())
}

// -------------------- Lifecycle --------------------

#[test]
fn open_without_metadata_is_an_error() {
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("part_9")).unwrap();

    assert!(Part::open(9, dir.path()).is_err());
}

#[test]
fn load_missing_part_is_an_error() {
    let dir = tempdir().unwrap();
    let mut part = Part::create(9, dir.path());
    assert!(part.load().is_err());
}

#[test]
fn mismatched_part_id_in_metadata_is_corruption() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut part = Part::create(4, dir.path());
        part.write_from_rows(&rows(2))?;
    }
    // Pretend the directory belongs to a different id.
    std::fs::rename(dir.path().join("part_4"), dir.path().join("part_5"))?;

    assert!(Part::open(5, dir.path()).is_err());
    Ok(())
}

#[test]
fn delete_from_disk_removes_directory() -> Result<()> {
    let dir = tempdir()?;
    let mut part = Part::create(2, dir.path());
    part.write_from_rows(&rows(5))?;
    assert!(part.exists_on_disk());

    part.delete_from_disk()?;
    assert!(!part.exists_on_disk());
    assert!(!dir.path().join("part_2").exists());
    assert!(!part.is_loaded());
    Ok(())
}

#[test]
fn unload_keeps_metadata_and_allows_reload() -> Result<()> {
    let dir = tempdir()?;
    let mut part = Part::create(2, dir.path());
    part.write_from_rows(&rows(5))?;

    part.unload();
    assert!(!part.is_loaded());
    assert_eq!(part.metadata().row_count, 5);

    let all = part.get_all_rows()?;
    assert_eq!(all.len(), 5);
    Ok(())
}

#[test]
fn memory_usage_grows_when_loaded() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut part = Part::create(2, dir.path());
        part.write_from_rows(&rows(100))?;
    }

    let mut part = Part::open(2, dir.path())?;
    let unloaded = part.memory_usage();
    part.load()?;
    assert!(part.memory_usage() > unloaded);
    Ok(())
}
