//! Merge iterator over multiple [`Part`]s.
//!
//! Produces a single row stream in `(key, timestamp)` order. Ties between
//! sources break toward the lower source index, which is what makes
//! "first reached in merge order wins" deterministic when the same
//! `(key, timestamp)` event appears in several parts.
//!
//! The iterator does **not** deduplicate — it yields every row from every
//! source. Collapsing identical events is the merger's job, so the policy
//! stays in one place.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use anyhow::{bail, Result};
use granule::Row;

use crate::Part;

/// One pending row from one source part.
struct HeapEntry {
    row: Row,
    /// Index into the `sources` / `positions` arrays.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.row.key == other.row.key
            && self.row.timestamp == other.row.timestamp
            && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the comparison so the smallest
        // (key, timestamp, source) is popped first.
        other
            .row
            .key
            .cmp(&self.row.key)
            .then_with(|| other.row.timestamp.cmp(&self.row.timestamp))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// K-way merge over the row streams of a set of parts.
///
/// Each part is loaded up front and its rows drained through a min-heap
/// holding one live entry per non-exhausted source.
pub struct MergeIterator {
    sources: Vec<Vec<Row>>,
    /// Per-source: index of the row currently on the heap.
    positions: Vec<usize>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    /// Builds the iterator, loading every part's rows.
    ///
    /// # Errors
    ///
    /// Fails if any part cannot be loaded from disk.
    pub fn new(parts: &mut [Part]) -> Result<Self> {
        let mut sources = Vec::with_capacity(parts.len());
        for part in parts.iter_mut() {
            sources.push(part.get_all_rows()?);
        }

        let mut heap = BinaryHeap::new();
        for (i, rows) in sources.iter().enumerate() {
            if let Some(first) = rows.first() {
                heap.push(HeapEntry {
                    row: first.clone(),
                    source: i,
                });
            }
        }

        Ok(Self {
            positions: vec![0; sources.len()],
            sources,
            heap,
        })
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.heap.is_empty()
    }

    /// Pops the next row in merge order and refills the heap from the
    /// popped row's source.
    ///
    /// # Errors
    ///
    /// Fails only when called on an exhausted iterator.
    pub fn next_row(&mut self) -> Result<Row> {
        let Some(top) = self.heap.pop() else {
            bail!("merge iterator is exhausted");
        };
        self.advance_source(top.source);
        Ok(top.row)
    }

    fn advance_source(&mut self, source: usize) {
        self.positions[source] += 1;
        let pos = self.positions[source];
        if let Some(row) = self.sources[source].get(pos) {
            self.heap.push(HeapEntry {
                row: row.clone(),
                source,
            });
        }
    }
}
