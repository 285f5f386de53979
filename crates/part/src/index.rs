//! Sparse primary index: one key-range entry per granule.
//!
//! The index is "sparse" because it maps key ranges to granule positions
//! rather than keys to rows — a range query intersects its bounds with
//! each entry and only the matching granules are deserialized.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::codec;

/// Key range and row count of a single granule within a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub min_key: String,
    pub max_key: String,
    pub granule_index: u64,
    pub row_count: u64,
}

impl IndexEntry {
    /// Interval intersection test against an inclusive key range.
    #[must_use]
    pub fn overlaps_range(&self, lo: &str, hi: &str) -> bool {
        !(self.max_key.as_str() < lo || self.min_key.as_str() > hi)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SparseIndex {
    entries: Vec<IndexEntry>,
}

impl SparseIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(
        &mut self,
        min_key: impl Into<String>,
        max_key: impl Into<String>,
        granule_index: u64,
        row_count: u64,
    ) {
        self.entries.push(IndexEntry {
            min_key: min_key.into(),
            max_key: max_key.into(),
            granule_index,
            row_count,
        });
    }

    /// Indices of every granule whose key range intersects `[lo, hi]`,
    /// in entry order.
    #[must_use]
    pub fn find_granules(&self, lo: &str, hi: &str) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|entry| entry.overlaps_range(lo, hi))
            .map(|entry| entry.granule_index as usize)
            .collect()
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("cannot create index file {}", path.display()))?;
        let mut w = BufWriter::new(file);

        codec::write_u64(&mut w, self.entries.len() as u64)?;
        for entry in &self.entries {
            codec::write_string(&mut w, &entry.min_key)?;
            codec::write_string(&mut w, &entry.max_key)?;
            codec::write_u64(&mut w, entry.granule_index)?;
            codec::write_u64(&mut w, entry.row_count)?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open index file {}", path.display()))?;
        let mut r = BufReader::new(file);

        let count = codec::read_u64(&mut r)?;
        if count > codec::MAX_VEC_ENTRIES {
            bail!(
                "corrupt index file {}: entry count {count} exceeds {}",
                path.display(),
                codec::MAX_VEC_ENTRIES
            );
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let min_key = codec::read_string(&mut r)?;
            let max_key = codec::read_string(&mut r)?;
            let granule_index = codec::read_u64(&mut r)?;
            let row_count = codec::read_u64(&mut r)?;
            entries.push(IndexEntry {
                min_key,
                max_key,
                granule_index,
                row_count,
            });
        }
        Ok(Self { entries })
    }

    /// Appends `other`'s entries with their granule positions shifted by
    /// `granule_offset`, then restores `(min_key, granule_index)` order.
    pub fn merge_with(&mut self, other: &SparseIndex, granule_offset: u64) {
        for entry in &other.entries {
            let mut shifted = entry.clone();
            shifted.granule_index += granule_offset;
            self.entries.push(shifted);
        }
        self.sort_entries();
    }

    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.min_key.len() + e.max_key.len() + 2 * std::mem::size_of::<u64>())
            .sum()
    }

    fn sort_entries(&mut self) {
        self.entries.sort_by(|a, b| {
            a.min_key
                .cmp(&b.min_key)
                .then_with(|| a.granule_index.cmp(&b.granule_index))
        });
    }
}
