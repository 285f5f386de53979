//! The part itself: write path, read path, and lifecycle.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, ensure, Context, Result};
use granule::{Granule, Row, GRANULE_SIZE};

use crate::codec;
use crate::index::SparseIndex;

/// Publication witness: a part directory is present iff this file exists.
pub const METADATA_FILE: &str = "metadata.bin";
pub const INDEX_FILE: &str = "primary.idx";

/// Fixed-order metadata header, stored as `metadata.bin`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartMetadata {
    pub part_id: u64,
    pub min_key: String,
    pub max_key: String,
    pub min_timestamp: u64,
    pub max_timestamp: u64,
    pub row_count: u64,
    pub granule_count: u64,
    pub disk_size: u64,
    pub creation_time: u64,
}

/// An immutable on-disk collection of granules with a sparse index.
///
/// A part goes through exactly one of two constructions:
///
/// - [`Part::create`] + [`Part::write_from_rows`] — the flush/merge write
///   path; the part is fully in memory afterwards.
/// - [`Part::open`] — the startup path; metadata is read eagerly so
///   counts and key-range pruning work immediately, while granule column
///   files load lazily on the first query.
#[derive(Debug)]
pub struct Part {
    metadata: PartMetadata,
    dir: PathBuf,
    granules: Vec<Granule>,
    index: SparseIndex,
    loaded: bool,
}

impl Part {
    /// Directory name for a part id, `part_<id>`.
    #[must_use]
    pub fn dir_name(part_id: u64) -> String {
        format!("part_{part_id}")
    }

    /// A fresh, unwritten part rooted under `base_path`.
    #[must_use]
    pub fn create(part_id: u64, base_path: &Path) -> Self {
        Self {
            metadata: PartMetadata {
                part_id,
                ..PartMetadata::default()
            },
            dir: base_path.join(Self::dir_name(part_id)),
            granules: Vec::new(),
            index: SparseIndex::new(),
            loaded: false,
        }
    }

    /// Opens an existing part, reading `metadata.bin` eagerly. Granules
    /// stay on disk until the first query.
    pub fn open(part_id: u64, base_path: &Path) -> Result<Self> {
        let mut part = Self::create(part_id, base_path);
        part.metadata = Self::read_metadata(&part.dir)
            .with_context(|| format!("cannot open part {part_id}"))?;
        ensure!(
            part.metadata.part_id == part_id,
            "corrupt metadata in {}: stored part id {} does not match directory",
            part.dir.display(),
            part.metadata.part_id
        );
        Ok(part)
    }

    /// Writes a part from an arbitrary row batch.
    ///
    /// Rows are sorted by `(key, timestamp)`, chunked into granules of at
    /// most [`GRANULE_SIZE`] rows, and persisted as column files plus the
    /// sparse index. `metadata.bin` is written last so an interrupted
    /// write never looks published.
    pub fn write_from_rows(&mut self, rows: &[Row]) -> Result<()> {
        ensure!(!rows.is_empty(), "cannot write a part from zero rows");

        let mut sorted = rows.to_vec();
        sorted.sort();

        let granules: Vec<Granule> = sorted
            .chunks(GRANULE_SIZE)
            .map(|chunk| Granule::from_sorted_rows(chunk.to_vec()))
            .collect();
        self.write_granules(granules)
    }

    /// Writes a part from already-sealed granules.
    pub fn write_granules(&mut self, granules: Vec<Granule>) -> Result<()> {
        ensure!(!granules.is_empty(), "cannot write a part from zero granules");

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create part directory {}", self.dir.display()))?;

        self.update_metadata(&granules)?;

        let mut index = SparseIndex::new();
        for (i, granule) in granules.iter().enumerate() {
            if !granule.is_empty() {
                index.add_entry(
                    granule.min_key(),
                    granule.max_key(),
                    i as u64,
                    granule.len() as u64,
                );
            }
        }

        for (i, granule) in granules.iter().enumerate() {
            codec::write_granule(&self.dir, granule, i)?;
        }
        index.save_to_file(&self.dir.join(INDEX_FILE))?;

        self.metadata.disk_size = Self::directory_size(&self.dir)?;
        self.save_metadata()?;

        self.granules = granules;
        self.index = index;
        self.loaded = true;
        Ok(())
    }

    /// Returns all rows with `lo <= key <= hi`, loading granule data on
    /// first use. A disjoint key range returns empty without touching the
    /// row files.
    pub fn query(&mut self, lo: &str, hi: &str) -> Result<Vec<Row>> {
        if !self.overlaps_range(lo, hi) {
            return Ok(Vec::new());
        }
        self.load()?;

        let mut result = Vec::new();
        for granule_idx in self.index.find_granules(lo, hi) {
            if granule_idx < self.granules.len() {
                result.extend(self.granules[granule_idx].query_range(lo, hi)?);
            }
        }
        Ok(result)
    }

    pub fn query_key(&mut self, key: &str) -> Result<Vec<Row>> {
        self.query(key, key)
    }

    /// Loads index and granules from disk. No-op once loaded; hard error
    /// when `metadata.bin` is missing.
    pub fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        if !self.exists_on_disk() {
            bail!("part does not exist on disk: {}", self.dir.display());
        }

        self.metadata = Self::read_metadata(&self.dir)?;
        self.index = SparseIndex::load_from_file(&self.dir.join(INDEX_FILE))?;

        let mut granules = Vec::with_capacity(self.metadata.granule_count as usize);
        for i in 0..self.metadata.granule_count {
            granules.push(codec::read_granule(&self.dir, i as usize)?);
        }

        self.granules = granules;
        self.loaded = true;
        Ok(())
    }

    /// Drops the in-memory granules, keeping metadata. The part can be
    /// re-loaded from disk later.
    pub fn unload(&mut self) {
        self.granules.clear();
        self.index.clear();
        self.loaded = false;
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    #[must_use]
    pub fn metadata(&self) -> &PartMetadata {
        &self.metadata
    }

    /// The sparse index. Empty until the part is written or loaded.
    #[must_use]
    pub fn index(&self) -> &SparseIndex {
        &self.index
    }

    #[must_use]
    pub fn part_dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn exists_on_disk(&self) -> bool {
        self.dir.join(METADATA_FILE).exists()
    }

    /// Removes the part directory and unloads. Used after a merge has
    /// consumed this part.
    pub fn delete_from_disk(&mut self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("cannot remove part directory {}", self.dir.display()))?;
        }
        self.unload();
        Ok(())
    }

    /// Bytes occupied on disk, as recorded at write time.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        self.metadata.disk_size
    }

    /// Approximate in-memory footprint. Small for unloaded parts.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let meta = self.metadata.min_key.len() + self.metadata.max_key.len();
        if !self.loaded {
            return meta;
        }
        meta + self.index.memory_usage()
            + self.granules.iter().map(Granule::memory_usage).sum::<usize>()
    }

    /// Interval intersection of the part's key range with `[lo, hi]`.
    #[must_use]
    pub fn overlaps_range(&self, lo: &str, hi: &str) -> bool {
        !(self.metadata.max_key.as_str() < lo || self.metadata.min_key.as_str() > hi)
    }

    /// Every row of the part in `(key, timestamp)` order, loading first if
    /// needed.
    pub fn get_all_rows(&mut self) -> Result<Vec<Row>> {
        self.load()?;

        let mut result = Vec::with_capacity(self.metadata.row_count as usize);
        for granule in &self.granules {
            result.extend_from_slice(granule.rows());
        }
        Ok(result)
    }

    fn update_metadata(&mut self, granules: &[Granule]) -> Result<()> {
        self.metadata.granule_count = granules.len() as u64;
        self.metadata.row_count = granules.iter().map(|g| g.len() as u64).sum();
        self.metadata.creation_time = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        if let (Some(first), Some(last)) = (granules.first(), granules.last()) {
            self.metadata.min_key = first.min_key().to_string();
            self.metadata.max_key = last.max_key().to_string();
        }

        let mut min_ts = u64::MAX;
        let mut max_ts = 0;
        for granule in granules {
            for row in granule.rows() {
                min_ts = min_ts.min(row.timestamp);
                max_ts = max_ts.max(row.timestamp);
            }
        }
        self.metadata.min_timestamp = min_ts;
        self.metadata.max_timestamp = max_ts;
        Ok(())
    }

    fn directory_size(dir: &Path) -> Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn save_metadata(&self) -> Result<()> {
        let path = self.dir.join(METADATA_FILE);
        let file = fs::File::create(&path)
            .with_context(|| format!("cannot create metadata file {}", path.display()))?;
        let mut w = BufWriter::new(file);

        codec::write_u64(&mut w, self.metadata.part_id)?;
        codec::write_string(&mut w, &self.metadata.min_key)?;
        codec::write_string(&mut w, &self.metadata.max_key)?;
        codec::write_u64(&mut w, self.metadata.min_timestamp)?;
        codec::write_u64(&mut w, self.metadata.max_timestamp)?;
        codec::write_u64(&mut w, self.metadata.row_count)?;
        codec::write_u64(&mut w, self.metadata.granule_count)?;
        codec::write_u64(&mut w, self.metadata.disk_size)?;
        codec::write_u64(&mut w, self.metadata.creation_time)?;
        w.flush()?;
        Ok(())
    }

    fn read_metadata(dir: &Path) -> Result<PartMetadata> {
        let path = dir.join(METADATA_FILE);
        let file = fs::File::open(&path)
            .with_context(|| format!("cannot open metadata file {}", path.display()))?;
        let mut r = BufReader::new(file);

        Ok(PartMetadata {
            part_id: codec::read_u64(&mut r)?,
            min_key: codec::read_string(&mut r)?,
            max_key: codec::read_string(&mut r)?,
            min_timestamp: codec::read_u64(&mut r)?,
            max_timestamp: codec::read_u64(&mut r)?,
            row_count: codec::read_u64(&mut r)?,
            granule_count: codec::read_u64(&mut r)?,
            disk_size: codec::read_u64(&mut r)?,
            creation_time: codec::read_u64(&mut r)?,
        })
    }
}
