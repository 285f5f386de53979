//! Read path: range queries fused across the memtable and all parts.

use anyhow::Result;
use granule::Row;

use crate::Shared;

impl Shared {
    /// Collects matching rows from the memtable, then from every part
    /// whose key range overlaps `[lo, hi]`, and finally sorts and
    /// deduplicates outside both locks.
    ///
    /// Rows that repeat a `(key, timestamp)` already in the result (the
    /// same event observed in several sources) collapse to the first
    /// occurrence after sorting; distinct timestamps of a key all survive.
    pub(crate) fn query(&self, lo: &str, hi: &str) -> Result<Vec<Row>> {
        let mut result = self.lock_memtable()?.query(lo, hi);

        {
            let mut parts = self.lock_parts()?;
            for part in parts.iter_mut() {
                if part.overlaps_range(lo, hi) {
                    result.extend(part.query(lo, hi)?);
                }
            }
        }

        result.sort();
        result.dedup_by(|a, b| a.same_event(b));
        Ok(result)
    }
}
