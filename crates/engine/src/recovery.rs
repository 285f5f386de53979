//! Startup scan: rebuild the parts set from the base directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use part::{Part, METADATA_FILE};

/// Scans `base_path` for `part_<id>` directories and opens every published
/// part, lowest id first.
///
/// Returns the parts plus the next part id to assign. Entries that are
/// not directories or whose suffix is not numeric are skipped silently. A
/// directory without `metadata.bin` is an interrupted write and is skipped
/// too, but its id still advances `next_part_id` so ids are never reused.
pub(crate) fn scan_existing_parts(base_path: &Path) -> Result<(Vec<Part>, u64)> {
    let mut part_ids = Vec::new();

    let entries = fs::read_dir(base_path)
        .with_context(|| format!("cannot scan base directory {}", base_path.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(suffix) = name.strip_prefix("part_") else {
            continue;
        };
        if let Ok(part_id) = suffix.parse::<u64>() {
            part_ids.push(part_id);
        }
    }
    part_ids.sort_unstable();

    let mut parts = Vec::with_capacity(part_ids.len());
    for &part_id in &part_ids {
        let dir = base_path.join(Part::dir_name(part_id));
        if !dir.join(METADATA_FILE).exists() {
            continue;
        }
        parts.push(Part::open(part_id, base_path)?);
    }

    let next_part_id = part_ids.last().map_or(1, |last| last + 1);
    Ok((parts, next_part_id))
}
