//! Merge policy: candidate selection, scoring, and the merge itself.
//!
//! The merger combines several parts into one, preserving order and
//! collapsing rows that describe the same event. Candidate scoring
//! prefers merging parts of similar size, in small groups, and avoids
//! giving extra weight to very large merges:
//!
//! ```text
//! size_ratio   = min_size / max_size            (0, 1]
//! parts_factor = 1 / part_count                 (0, 0.5]
//! size_factor  = min(1, total_size / 10 MiB)
//! score        = size_ratio * parts_factor * size_factor * 100
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{ensure, Result};
use granule::Row;
use part::{MergeIterator, Part};

use crate::Shared;

/// Total size at which the size factor saturates; merges beyond this gain
/// no further preference from their volume.
const SIZE_FACTOR_SATURATION_BYTES: f64 = 10.0 * 1024.0 * 1024.0;

/// A scored set of parts proposed for one merge.
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    /// Positions into the parts vector the candidate was selected from.
    pub part_indices: Vec<usize>,
    pub total_rows: u64,
    pub total_size: u64,
    pub score: f64,
}

/// Combines parts; owns nothing but the base path new parts are written
/// under.
#[derive(Debug)]
pub struct Merger {
    base_path: PathBuf,
}

impl Merger {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Merges `parts` into a single new part with id `part_id`.
    ///
    /// A single-part input is returned unchanged — no rewrite, no new id
    /// consumed on disk. Otherwise the sources are drained through a k-way
    /// merge, identical `(key, timestamp)` events collapse to the first
    /// reached, and the result is written as a fresh part. On success the
    /// source directories are removed and `parts` is left empty; on
    /// failure `parts` is untouched so the caller can restore them.
    ///
    /// # Errors
    ///
    /// Empty input, an empty merged stream, or I/O failure.
    pub fn merge_parts(&self, parts: &mut Vec<Part>, part_id: u64) -> Result<Part> {
        ensure!(!parts.is_empty(), "cannot merge zero parts");
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }

        let rows = Self::merge_rows(parts)?;
        ensure!(!rows.is_empty(), "merge of non-empty parts produced no rows");

        let mut merged = Part::create(part_id, &self.base_path);
        merged.write_from_rows(&rows)?;

        for part in parts.iter_mut() {
            if let Err(error) = part.delete_from_disk() {
                tracing::warn!(
                    part_id = part.metadata().part_id,
                    error = %error,
                    "failed to remove merged source part"
                );
            }
        }
        parts.clear();
        Ok(merged)
    }

    /// Enumerates every two-part combination and every consecutive triple,
    /// keeps those with positive score, and returns up to `max_candidates`
    /// of them, best first.
    #[must_use]
    pub fn select_candidates(&self, parts: &[Part], max_candidates: usize) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();
        if parts.len() < 2 {
            return candidates;
        }

        for i in 0..parts.len() {
            for j in (i + 1)..parts.len() {
                Self::push_candidate(vec![i, j], parts, &mut candidates);
            }
        }
        for i in 0..parts.len().saturating_sub(2) {
            Self::push_candidate(vec![i, i + 1, i + 2], parts, &mut candidates);
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(CmpOrdering::Equal)
        });
        candidates.truncate(max_candidates);
        candidates
    }

    fn push_candidate(part_indices: Vec<usize>, parts: &[Part], out: &mut Vec<MergeCandidate>) {
        let score = Self::merge_score(&part_indices, parts);
        if score <= 0.0 {
            return;
        }
        let total_rows = part_indices
            .iter()
            .map(|&i| parts[i].metadata().row_count)
            .sum();
        let total_size = part_indices.iter().map(|&i| parts[i].disk_usage()).sum();
        out.push(MergeCandidate {
            part_indices,
            total_rows,
            total_size,
            score,
        });
    }

    /// Scores a candidate in `[0, 100]`. Zero rows or zero bytes scores 0.
    pub(crate) fn merge_score(part_indices: &[usize], parts: &[Part]) -> f64 {
        if part_indices.is_empty() {
            return 0.0;
        }

        let mut total_rows: u64 = 0;
        let mut total_size: u64 = 0;
        let mut min_size = u64::MAX;
        let mut max_size = 0u64;
        for &idx in part_indices {
            let Some(part) = parts.get(idx) else {
                return 0.0;
            };
            let size = part.disk_usage();
            total_rows += part.metadata().row_count;
            total_size += size;
            min_size = min_size.min(size);
            max_size = max_size.max(size);
        }
        if total_rows == 0 || total_size == 0 {
            return 0.0;
        }

        let size_ratio = min_size as f64 / max_size as f64;
        let parts_factor = 1.0 / part_indices.len() as f64;
        let size_factor = (total_size as f64 / SIZE_FACTOR_SATURATION_BYTES).min(1.0);
        size_ratio * parts_factor * size_factor * 100.0
    }

    /// Drains a k-way merge of `parts`, collapsing rows that repeat the
    /// previous `(key, timestamp)`.
    fn merge_rows(parts: &mut [Part]) -> Result<Vec<Row>> {
        let mut iter = MergeIterator::new(parts)?;
        let mut merged: Vec<Row> = Vec::new();
        while iter.has_next() {
            let row = iter.next_row()?;
            match merged.last() {
                Some(last) if last.same_event(&row) => {}
                _ => merged.push(row),
            }
        }
        Ok(merged)
    }
}

impl Shared {
    pub(crate) fn should_trigger_merge(&self) -> Result<bool> {
        Ok(self.lock_parts()?.len() > self.config.max_parts)
    }

    pub(crate) fn merge_parts_sync(&self) -> Result<()> {
        if self.should_trigger_merge()? {
            self.perform_merge()?;
        }
        Ok(())
    }

    /// One merge round: pick the best candidate under the parts lock and
    /// move its parts out, merge with the lock released, then re-acquire
    /// it to publish the result. The swap keeps insert and query latency
    /// bounded while the merge does its disk I/O.
    pub(crate) fn perform_merge(&self) -> Result<()> {
        let mut to_merge = {
            let mut parts = self.lock_parts()?;
            if parts.len() < 2 {
                return Ok(());
            }

            let candidates = self.merger.select_candidates(&parts, 1);
            let Some(best) = candidates.into_iter().next() else {
                return Ok(());
            };

            let mut selected = Vec::with_capacity(best.part_indices.len());
            let mut remaining = Vec::new();
            for (i, part) in std::mem::take(&mut *parts).into_iter().enumerate() {
                if best.part_indices.contains(&i) {
                    selected.push(part);
                } else {
                    remaining.push(part);
                }
            }
            *parts = remaining;
            selected
        };

        let part_id = self.next_part_id.fetch_add(1, Ordering::SeqCst);
        let source_ids: Vec<u64> = to_merge.iter().map(|p| p.metadata().part_id).collect();

        match self.merger.merge_parts(&mut to_merge, part_id) {
            Ok(merged) => {
                tracing::info!(
                    part_id,
                    sources = ?source_ids,
                    rows = merged.metadata().row_count,
                    "merged parts"
                );
                self.lock_parts()?.push(merged);
                Ok(())
            }
            Err(error) => {
                // Restore the sources so the live set loses nothing.
                if let Ok(mut parts) = self.parts.lock() {
                    parts.append(&mut to_merge);
                }
                Err(error)
            }
        }
    }

    /// Flush, then merge until the part count is within bounds. Stops
    /// early if a round cannot make progress.
    pub(crate) fn optimize(&self) -> Result<()> {
        self.flush_memtable()?;
        while self.should_trigger_merge()? {
            let before = self.lock_parts()?.len();
            self.perform_merge()?;
            if self.lock_parts()?.len() >= before {
                break;
            }
        }
        Ok(())
    }
}
