//! # Engine — the MergeTree coordinator
//!
//! Ties the [`memtable`], [`granule`], and [`part`] crates into an ordered
//! key-value engine with background maintenance.
//!
//! ## Architecture
//!
//! ```text
//! Writers                      Readers
//!   |                            |
//!   v                            v
//! ┌───────────────────────────────────────────────┐
//! │                  MERGETREE                    │
//! │                                               │
//! │ write.rs → MemTable insert                    │
//! │              |                                │
//! │              |  (row threshold exceeded?)     │
//! │              v            yes                 │
//! │           flush() → new Part (part_<id>/)     │
//! │                                               │
//! │ merger.rs → score candidates → k-way merge    │
//! │              (parts > max_parts)              │
//! │                                               │
//! │ read.rs  → MemTable ∪ overlapping Parts       │
//! │             sort + dedup on (key, timestamp)  │
//! │                                               │
//! │ background.rs → periodic flush/merge worker   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Three locks, never nested:
//!
//! - `memtable` mutex — every memtable operation, including the
//!   snapshot-and-clear a flush takes.
//! - `parts` mutex — membership and order of the published parts vector.
//! - `background` mutex + condvar — gates only the worker's timed sleep.
//!
//! Flush and merge I/O always run with both data locks released; a flush
//! re-acquires the parts lock only to publish the finished part, and a
//! merge re-acquires it only to swap sources for the merged result.
//! Readers therefore never observe a row twice across a merge.
//!
//! ## Multi-version model
//!
//! The engine keeps history: rows with the same key and different
//! timestamps are all retained. Only rows with identical
//! `(key, timestamp)` collapse — during merges and in query results.

mod background;
mod merger;
mod read;
mod recovery;
mod write;

pub use granule::Row;
pub use merger::{MergeCandidate, Merger};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use memtable::MemTable;
use part::Part;

/// Observer for errors the background worker swallows. The worker logs
/// every failure and keeps running; the hook makes those failures visible
/// to embedders and tests.
pub type BackgroundErrorHook = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Engine tuning knobs.
#[derive(Clone)]
pub struct Config {
    /// Flush the memtable once it holds at least this many rows.
    pub memtable_flush_threshold: usize,
    /// Merge becomes eligible once the part count exceeds this.
    pub max_parts: usize,
    /// Background worker wake-up period.
    pub merge_interval_seconds: u64,
    /// Run the background flush/merge worker.
    pub enable_background_merge: bool,
    /// Invoked with every error the background worker swallows.
    pub background_error_hook: Option<BackgroundErrorHook>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memtable_flush_threshold: 1000,
            max_parts: 10,
            merge_interval_seconds: 30,
            enable_background_merge: true,
            background_error_hook: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("memtable_flush_threshold", &self.memtable_flush_threshold)
            .field("max_parts", &self.max_parts)
            .field("merge_interval_seconds", &self.merge_interval_seconds)
            .field("enable_background_merge", &self.enable_background_merge)
            .field(
                "background_error_hook",
                &self.background_error_hook.is_some(),
            )
            .finish()
    }
}

/// State shared between the public handle and the background worker.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) base_path: PathBuf,
    pub(crate) memtable: Mutex<MemTable>,
    pub(crate) parts: Mutex<Vec<Part>>,
    pub(crate) merger: Merger,
    pub(crate) next_part_id: AtomicU64,
    pub(crate) shutdown: AtomicBool,
    pub(crate) background: Mutex<()>,
    pub(crate) background_cv: Condvar,
}

impl Shared {
    pub(crate) fn lock_memtable(&self) -> Result<MutexGuard<'_, MemTable>> {
        self.memtable
            .lock()
            .map_err(|_| anyhow!("memtable lock poisoned"))
    }

    pub(crate) fn lock_parts(&self) -> Result<MutexGuard<'_, Vec<Part>>> {
        self.parts.lock().map_err(|_| anyhow!("parts lock poisoned"))
    }
}

/// The engine façade. Every operation is thread-safe through `&self`;
/// clone-free sharing across threads goes through `Arc<MergeTree>`.
pub struct MergeTree {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MergeTree {
    /// Opens (or creates) an engine rooted at `base_path`.
    ///
    /// Existing `part_<id>` directories are scanned and every published
    /// part is loaded; `next_part_id` continues past the highest id found.
    /// When background merging is enabled, one worker thread is spawned.
    pub fn open(base_path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)
            .with_context(|| format!("cannot create base directory {}", base_path.display()))?;

        let (parts, next_part_id) = recovery::scan_existing_parts(&base_path)?;
        if !parts.is_empty() {
            tracing::info!(
                parts = parts.len(),
                next_part_id,
                path = %base_path.display(),
                "loaded existing parts"
            );
        }

        let shared = Arc::new(Shared {
            merger: Merger::new(base_path.clone()),
            base_path,
            memtable: Mutex::new(MemTable::new()),
            parts: Mutex::new(parts),
            next_part_id: AtomicU64::new(next_part_id),
            shutdown: AtomicBool::new(false),
            background: Mutex::new(()),
            background_cv: Condvar::new(),
            config,
        });

        let worker = if shared.config.enable_background_merge {
            let handle = background::spawn_worker(Arc::clone(&shared))
                .context("cannot spawn background worker")?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            shared,
            worker: Mutex::new(worker),
        })
    }

    /// Inserts a single row.
    ///
    /// # Errors
    ///
    /// I/O failure during a flush this insert triggered.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        timestamp: u64,
    ) -> Result<()> {
        self.shared.insert_row(Row::new(key, value, timestamp))
    }

    pub fn insert_row(&self, row: Row) -> Result<()> {
        self.shared.insert_row(row)
    }

    /// All rows with `lo <= key <= hi`, fused across the memtable and
    /// every overlapping part, sorted by `(key, timestamp)` with identical
    /// events deduplicated.
    pub fn query(&self, lo: &str, hi: &str) -> Result<Vec<Row>> {
        self.shared.query(lo, hi)
    }

    /// All versions of a single key, oldest first.
    pub fn query_key(&self, key: &str) -> Result<Vec<Row>> {
        self.shared.query(key, key)
    }

    /// Flushes the memtable to a new part. No-op when empty.
    pub fn flush_memtable(&self) -> Result<()> {
        self.shared.flush_memtable()
    }

    /// Runs one merge round now if the part count warrants it.
    pub fn merge_parts_sync(&self) -> Result<()> {
        self.shared.merge_parts_sync()
    }

    /// Flushes, then merges until the part count is within `max_parts`.
    pub fn optimize(&self) -> Result<()> {
        self.shared.optimize()
    }

    /// Stops the background worker and flushes remaining memtable rows.
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        // Taking the guard once pairs the flag store with the worker's
        // condvar wait, so the wake-up cannot be lost.
        drop(self.shared.background.lock());
        self.shared.background_cv.notify_all();

        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }

        if let Err(error) = self.shared.flush_memtable() {
            tracing::error!(error = %error, "final flush during shutdown failed");
        }
    }

    #[must_use]
    pub fn part_count(&self) -> usize {
        self.shared.lock_parts().map(|parts| parts.len()).unwrap_or(0)
    }

    /// Rows across the memtable and all published parts.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        let buffered = self
            .shared
            .lock_memtable()
            .map(|mt| mt.len() as u64)
            .unwrap_or(0);
        let persisted = self
            .shared
            .lock_parts()
            .map(|parts| parts.iter().map(|p| p.metadata().row_count).sum::<u64>())
            .unwrap_or(0);
        buffered + persisted
    }

    /// Approximate bytes held in memory by the memtable and loaded parts.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let buffered = self
            .shared
            .lock_memtable()
            .map(|mt| mt.memory_usage())
            .unwrap_or(0);
        let loaded = self
            .shared
            .lock_parts()
            .map(|parts| parts.iter().map(Part::memory_usage).sum::<usize>())
            .unwrap_or(0);
        buffered + loaded
    }

    /// Bytes occupied on disk by all published parts.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        self.shared
            .lock_parts()
            .map(|parts| parts.iter().map(Part::disk_usage).sum::<u64>())
            .unwrap_or(0)
    }
}

/// Best-effort graceful stop: joins the worker and flushes buffered rows
/// so dropping the engine without an explicit `shutdown` loses nothing.
impl Drop for MergeTree {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
