//! Write path: insert and memtable flush.
//!
//! An insert touches only the memtable mutex; the flush-threshold check
//! runs after that lock is released, and the flush itself snapshots and
//! clears the memtable in one lock hold before doing any disk I/O. The
//! parts lock is taken only to publish the finished part.

use std::sync::atomic::Ordering;

use anyhow::Result;
use granule::Row;
use part::Part;

use crate::Shared;

impl Shared {
    pub(crate) fn insert_row(&self, row: Row) -> Result<()> {
        self.lock_memtable()?.insert(row);
        self.trigger_flush_if_needed()
    }

    /// Reads the memtable size under its lock and flushes when the row
    /// threshold is reached.
    pub(crate) fn trigger_flush_if_needed(&self) -> Result<()> {
        let should_flush = self.lock_memtable()?.len() >= self.config.memtable_flush_threshold;
        if should_flush {
            self.flush_memtable()?;
        }
        Ok(())
    }

    /// Flushes all buffered rows to a new part. No-op when the memtable is
    /// empty.
    ///
    /// The snapshot-and-clear is atomic under the memtable lock, so every
    /// row present at that moment lands in the part and later inserts go
    /// into the fresh table. A failed write publishes nothing.
    pub(crate) fn flush_memtable(&self) -> Result<()> {
        let rows = {
            let mut memtable = self.lock_memtable()?;
            if memtable.is_empty() {
                return Ok(());
            }
            memtable.take_rows()
        };

        let part_id = self.next_part_id.fetch_add(1, Ordering::SeqCst);
        let mut new_part = Part::create(part_id, &self.base_path);
        new_part.write_from_rows(&rows)?;

        tracing::info!(part_id, rows = rows.len(), "flushed memtable to new part");

        self.lock_parts()?.push(new_part);
        Ok(())
    }
}
