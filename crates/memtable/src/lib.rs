//! # MemTable — the ordered in-memory row buffer
//!
//! Inserts land here first and stay until the engine flushes them into an
//! on-disk part. The table is an ordered **multiset**: rows are keyed by
//! `(key, timestamp)` and every version is retained, including repeated
//! inserts of the same `(key, timestamp)` pair (those collapse later,
//! during merges and query deduplication, never here).
//!
//! The backing store is a `BTreeMap<(String, u64), Vec<String>>` — an
//! O(log n) single-owner balanced tree whose in-order traversal matches
//! the row total order. The engine serializes all access behind one mutex,
//! so the table itself carries no locking.
//!
//! `memory_usage` is an accounting estimate for observability: monotone
//! under inserts, zero after `clear`.

use std::collections::BTreeMap;

use granule::{Granule, Row, GRANULE_SIZE};

#[derive(Debug, Default)]
pub struct MemTable {
    /// `(key, timestamp)` -> values, in insertion order. Almost always a
    /// single value; repeated inserts of the same pair append.
    rows: BTreeMap<(String, u64), Vec<String>>,
    len: usize,
    memory_usage: usize,
}

impl MemTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row, keeping it alongside any existing versions.
    pub fn insert(&mut self, row: Row) {
        self.len += 1;
        self.memory_usage += row.size_bytes();
        self.rows
            .entry((row.key, row.timestamp))
            .or_default()
            .push(row.value);
    }

    /// Returns every row with `lo <= key <= hi` in `(key, timestamp)` order.
    #[must_use]
    pub fn query(&self, lo: &str, hi: &str) -> Vec<Row> {
        if lo > hi {
            return Vec::new();
        }

        let start = (lo.to_string(), 0u64);
        let end = (hi.to_string(), u64::MAX);

        let mut result = Vec::new();
        for ((key, timestamp), values) in self.rows.range(start..=end) {
            for value in values {
                result.push(Row::new(key.clone(), value.clone(), *timestamp));
            }
        }
        result
    }

    /// All versions of a single key, oldest first.
    #[must_use]
    pub fn query_key(&self, key: &str) -> Vec<Row> {
        self.query(key, key)
    }

    /// Number of rows currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate bytes held by buffered rows.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.len = 0;
        self.memory_usage = 0;
    }

    /// Snapshot of all rows in `(key, timestamp)` order.
    #[must_use]
    pub fn get_all_rows(&self) -> Vec<Row> {
        let mut result = Vec::with_capacity(self.len);
        for ((key, timestamp), values) in &self.rows {
            for value in values {
                result.push(Row::new(key.clone(), value.clone(), *timestamp));
            }
        }
        result
    }

    /// Drains the table, returning all rows in order. Equivalent to
    /// `get_all_rows` followed by `clear`, done in one step so a flush can
    /// take its snapshot atomically under the engine's memtable lock.
    #[must_use]
    pub fn take_rows(&mut self) -> Vec<Row> {
        let mut result = Vec::with_capacity(self.len);
        for ((key, timestamp), values) in std::mem::take(&mut self.rows) {
            for value in values {
                result.push(Row::new(key.clone(), value, timestamp));
            }
        }
        self.len = 0;
        self.memory_usage = 0;
        result
    }

    /// Drains the table into sealed granules of at most [`GRANULE_SIZE`]
    /// rows each, in row order.
    #[must_use]
    pub fn flush_to_granules(&mut self) -> Vec<Granule> {
        let rows = self.take_rows();
        rows.chunks(GRANULE_SIZE)
            .map(|chunk| Granule::from_sorted_rows(chunk.to_vec()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: &str, ts: u64) -> Row {
        Row::new(key, value, ts)
    }

    #[test]
    fn insert_and_query_in_order() {
        let mut mt = MemTable::new();
        mt.insert(row("c", "3", 30));
        mt.insert(row("a", "1", 10));
        mt.insert(row("b", "2", 20));

        let all = mt.query("a", "c");
        let keys: Vec<&str> = all.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(mt.len(), 3);
    }

    #[test]
    fn query_bounds_are_inclusive() {
        let mut mt = MemTable::new();
        for key in ["a", "b", "c", "d"] {
            mt.insert(row(key, "v", 1));
        }

        let hits = mt.query("b", "c");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "b");
        assert_eq!(hits[1].key, "c");

        assert!(mt.query("x", "z").is_empty());
        assert!(mt.query("c", "b").is_empty());
    }

    #[test]
    fn versions_of_a_key_order_by_timestamp() {
        let mut mt = MemTable::new();
        mt.insert(row("k", "new", 400));
        mt.insert(row("k", "old", 100));

        let versions = mt.query_key("k");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].value, "old");
        assert_eq!(versions[1].value, "new");
    }

    #[test]
    fn duplicate_key_timestamp_pairs_are_both_retained() {
        let mut mt = MemTable::new();
        mt.insert(row("x", "a", 5));
        mt.insert(row("x", "a", 5));

        assert_eq!(mt.len(), 2);
        assert_eq!(mt.query_key("x").len(), 2);
    }

    #[test]
    fn memory_usage_is_monotone_and_resets() {
        let mut mt = MemTable::new();
        assert_eq!(mt.memory_usage(), 0);

        mt.insert(row("a", "value", 1));
        let after_one = mt.memory_usage();
        assert!(after_one > 0);

        mt.insert(row("b", "value", 2));
        assert!(mt.memory_usage() > after_one);

        mt.clear();
        assert_eq!(mt.memory_usage(), 0);
        assert!(mt.is_empty());
    }

    #[test]
    fn take_rows_drains_the_table() {
        let mut mt = MemTable::new();
        mt.insert(row("b", "2", 2));
        mt.insert(row("a", "1", 1));

        let rows = mt.take_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "a");
        assert!(mt.is_empty());
        assert_eq!(mt.memory_usage(), 0);
        assert!(mt.get_all_rows().is_empty());
    }

    #[test]
    fn get_all_rows_is_a_non_destructive_snapshot() {
        let mut mt = MemTable::new();
        mt.insert(row("a", "1", 1));

        let snapshot = mt.get_all_rows();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(mt.len(), 1);
    }

    #[test]
    fn flush_to_granules_chunks_and_seals() {
        let mut mt = MemTable::new();
        let total = GRANULE_SIZE + 1;
        for i in 0..total {
            mt.insert(row(&format!("key{i:06}"), "v", i as u64));
        }

        let granules = mt.flush_to_granules();
        assert_eq!(granules.len(), 2);
        assert_eq!(granules[0].len(), GRANULE_SIZE);
        assert_eq!(granules[1].len(), 1);
        assert!(granules.iter().all(|g| g.is_sorted()));
        assert!(mt.is_empty());

        // Granule boundaries follow row order.
        assert!(granules[0].max_key() <= granules[1].min_key());
    }
}
