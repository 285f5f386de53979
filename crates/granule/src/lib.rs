//! # Granule — row and block primitives
//!
//! The two value types every other Granite crate builds on:
//!
//! - [`Row`] — an immutable `(key, value, timestamp)` record. Rows are
//!   ordered by `key` ascending, then `timestamp` ascending, so multiple
//!   versions of the same key sit next to each other in sorted streams.
//! - [`Granule`] — a bounded block of at most [`GRANULE_SIZE`] rows. The
//!   granule is the unit of on-disk I/O: a part stores its rows as a
//!   sequence of granules and its sparse index points at granule positions,
//!   not individual rows.
//!
//! A granule starts unsorted while rows are appended and must be sealed
//! with [`Granule::sort`] before it can serve range queries. Once sealed,
//! `min_key`/`max_key` are the first and last keys of the block.

use std::cmp::Ordering;

use thiserror::Error;

/// Maximum number of rows a single granule may hold.
pub const GRANULE_SIZE: usize = 8192;

/// Errors raised by granule operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GranuleError {
    /// `add_row` was called on a granule that already holds
    /// [`GRANULE_SIZE`] rows.
    #[error("granule is full ({GRANULE_SIZE} rows)")]
    Full,

    /// A range query was attempted before the granule was sealed with
    /// [`Granule::sort`].
    #[error("granule must be sorted before range queries")]
    Unsorted,
}

/// A single immutable record: key, value, and event timestamp.
///
/// The engine keeps history — rows with the same key and different
/// timestamps are distinct records and are both retained. Two rows with
/// identical `(key, timestamp)` describe the same event and collapse to
/// one during merges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub value: String,
    pub timestamp: u64,
}

impl Row {
    pub fn new(key: impl Into<String>, value: impl Into<String>, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
        }
    }

    /// Approximate in-memory footprint, used for memtable accounting.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.len() + std::mem::size_of::<u64>()
    }

    /// `true` when `other` describes the same event: equal key and equal
    /// timestamp, regardless of value.
    #[must_use]
    pub fn same_event(&self, other: &Row) -> bool {
        self.key == other.key && self.timestamp == other.timestamp
    }
}

impl Ord for Row {
    /// Primary order is `(key, timestamp)`. The value participates only as
    /// a final tiebreaker so the order stays total and consistent with
    /// `Eq`; it never reorders distinct `(key, timestamp)` pairs.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl PartialOrd for Row {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A bounded, sortable block of rows.
///
/// Produced by memtable flushes and by the merger; owned by exactly one
/// part. Range queries require the granule to be sealed first.
#[derive(Debug, Clone, Default)]
pub struct Granule {
    rows: Vec<Row>,
    min_key: String,
    max_key: String,
    sorted: bool,
}

impl Granule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a sealed granule from rows that are already in
    /// `(key, timestamp)` order. The caller guarantees ordering and that
    /// `rows.len() <= GRANULE_SIZE`; this is the fast path used when
    /// chunking an already-sorted stream.
    #[must_use]
    pub fn from_sorted_rows(rows: Vec<Row>) -> Self {
        debug_assert!(rows.len() <= GRANULE_SIZE);
        debug_assert!(rows.windows(2).all(|w| w[0] <= w[1]));

        let min_key = rows.first().map(|r| r.key.clone()).unwrap_or_default();
        let max_key = rows.last().map(|r| r.key.clone()).unwrap_or_default();
        Self {
            rows,
            min_key,
            max_key,
            sorted: true,
        }
    }

    /// Appends a row. Fails once the granule holds [`GRANULE_SIZE`] rows.
    pub fn add_row(&mut self, row: Row) -> Result<(), GranuleError> {
        if self.is_full() {
            return Err(GranuleError::Full);
        }

        if self.rows.is_empty() {
            self.min_key = row.key.clone();
            self.max_key = row.key.clone();
        } else {
            if row.key < self.min_key {
                self.min_key = row.key.clone();
            }
            if row.key > self.max_key {
                self.max_key = row.key.clone();
            }
        }

        self.rows.push(row);
        self.sorted = false;
        Ok(())
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.rows.len() >= GRANULE_SIZE
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Seals the granule: sorts rows by `(key, timestamp)` and fixes the
    /// key range to first/last. Idempotent once sorted.
    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        self.rows.sort();
        if let (Some(first), Some(last)) = (self.rows.first(), self.rows.last()) {
            self.min_key = first.key.clone();
            self.max_key = last.key.clone();
        }
        self.sorted = true;
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.min_key.clear();
        self.max_key.clear();
        self.sorted = false;
    }

    /// Returns every row with `lo <= key <= hi`, in order. The scan stops
    /// as soon as a key beyond `hi` is seen, which requires the granule to
    /// be sealed.
    pub fn query_range(&self, lo: &str, hi: &str) -> Result<Vec<Row>, GranuleError> {
        if !self.sorted {
            return Err(GranuleError::Unsorted);
        }

        let mut result = Vec::new();
        for row in &self.rows {
            if row.key.as_str() >= lo && row.key.as_str() <= hi {
                result.push(row.clone());
            } else if row.key.as_str() > hi {
                break;
            }
        }
        Ok(result)
    }

    #[must_use]
    pub fn min_key(&self) -> &str {
        &self.min_key
    }

    #[must_use]
    pub fn max_key(&self) -> &str {
        &self.max_key
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Approximate in-memory footprint of the row payload.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.rows.iter().map(Row::size_bytes).sum()
    }
}
