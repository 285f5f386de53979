//! # Part — immutable on-disk storage units
//!
//! When the in-memory [`memtable`] exceeds its row threshold the engine
//! flushes it to disk as a **part**. Parts are *write-once, read-many* —
//! once published they are never modified, only consumed by a merge and
//! then deleted.
//!
//! ## Directory layout (one directory per part)
//!
//! ```text
//! <base_path>/part_<part_id>/
//! ├── metadata.bin                 part id, key/timestamp ranges, counts
//! ├── primary.idx                  sparse index: key range per granule
//! ├── granule_0_keys.bin           vec<string>, one key per row
//! ├── granule_0_values.bin         vec<string>, aligned 1:1 with keys
//! ├── granule_0_timestamps.bin     vec<u64>, aligned 1:1 with keys
//! ├── granule_1_keys.bin
//! └── ...
//! ```
//!
//! All files use the little-endian codec in [`codec`]. `metadata.bin` is
//! written **last** and doubles as the publication witness: a directory
//! without it is an interrupted write and is ignored by the startup scan.
//!
//! Queries prune twice before touching row data — first on the part's
//! `[min_key, max_key]`, then granule-by-granule through the
//! [`SparseIndex`] — so a range query only deserializes granules whose key
//! range intersects the request.

pub mod codec;

mod index;
mod merge;
mod part;

pub use index::{IndexEntry, SparseIndex};
pub use merge::MergeIterator;
pub use part::{Part, PartMetadata, INDEX_FILE, METADATA_FILE};

#[cfg(test)]
mod tests;
