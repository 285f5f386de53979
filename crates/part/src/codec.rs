//! Binary codec for part files.
//!
//! Every multi-byte integer is little-endian fixed width, written
//! explicitly so the format is identical on every platform:
//!
//! ```text
//! u64           8 bytes LE
//! string        u64 length | raw bytes
//! vec<string>   u64 count  | count strings
//! vec<u64>      u64 count  | count raw u64s
//! ```
//!
//! A granule is stored as three column files, one entry per row, aligned
//! 1:1 across the files. Mismatched counts on read are reported as
//! corruption, never silently truncated.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use granule::{Granule, Row, GRANULE_SIZE};

/// Largest single string the decoder will allocate. Length fields beyond
/// this are treated as corruption instead of attempted allocations.
pub const MAX_STRING_BYTES: u64 = 64 * 1024 * 1024;

/// Largest vector count the decoder will accept.
pub const MAX_VEC_ENTRIES: u64 = 1 << 24;

pub fn write_u64<W: Write>(w: &mut W, value: u64) -> Result<()> {
    w.write_u64::<LittleEndian>(value)?;
    Ok(())
}

pub fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    Ok(r.read_u64::<LittleEndian>()?)
}

pub fn write_string<W: Write>(w: &mut W, value: &str) -> Result<()> {
    w.write_u64::<LittleEndian>(value.len() as u64)?;
    w.write_all(value.as_bytes())?;
    Ok(())
}

pub fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u64::<LittleEndian>()?;
    if len > MAX_STRING_BYTES {
        bail!("corrupt stream: string length {len} exceeds {MAX_STRING_BYTES}");
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf).context("corrupt stream: string is not valid utf-8")?)
}

/// Writes `count | strings...` as a standalone file.
pub fn write_string_vec(path: &Path, values: &[String]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_u64(&mut w, values.len() as u64)?;
    for value in values {
        write_string(&mut w, value)?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_string_vec(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let mut r = BufReader::new(file);
    let count = read_u64(&mut r)?;
    if count > MAX_VEC_ENTRIES {
        bail!(
            "corrupt file {}: entry count {count} exceeds {MAX_VEC_ENTRIES}",
            path.display()
        );
    }
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(
            read_string(&mut r)
                .with_context(|| format!("corrupt entry in {}", path.display()))?,
        );
    }
    Ok(values)
}

/// Writes `count | u64...` as a standalone file.
pub fn write_u64_vec(path: &Path, values: &[u64]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_u64(&mut w, values.len() as u64)?;
    for value in values {
        write_u64(&mut w, *value)?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_u64_vec(path: &Path) -> Result<Vec<u64>> {
    let file = File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let mut r = BufReader::new(file);
    let count = read_u64(&mut r)?;
    if count > MAX_VEC_ENTRIES {
        bail!(
            "corrupt file {}: entry count {count} exceeds {MAX_VEC_ENTRIES}",
            path.display()
        );
    }
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(
            read_u64(&mut r).with_context(|| format!("corrupt entry in {}", path.display()))?,
        );
    }
    Ok(values)
}

fn granule_file(dir: &Path, index: usize, column: &str) -> PathBuf {
    dir.join(format!("granule_{index}_{column}.bin"))
}

/// Writes one granule as its three column files inside `dir`.
pub fn write_granule(dir: &Path, granule: &Granule, index: usize) -> Result<()> {
    let rows = granule.rows();

    let mut keys = Vec::with_capacity(rows.len());
    let mut values = Vec::with_capacity(rows.len());
    let mut timestamps = Vec::with_capacity(rows.len());
    for row in rows {
        keys.push(row.key.clone());
        values.push(row.value.clone());
        timestamps.push(row.timestamp);
    }

    write_string_vec(&granule_file(dir, index, "keys"), &keys)?;
    write_string_vec(&granule_file(dir, index, "values"), &values)?;
    write_u64_vec(&granule_file(dir, index, "timestamps"), &timestamps)?;
    Ok(())
}

/// Reads one granule back from its three column files and seals it.
///
/// The column files must contain equal counts; a mismatch (or a count
/// beyond [`GRANULE_SIZE`]) is reported as corruption.
pub fn read_granule(dir: &Path, index: usize) -> Result<Granule> {
    let keys = read_string_vec(&granule_file(dir, index, "keys"))?;
    let values = read_string_vec(&granule_file(dir, index, "values"))?;
    let timestamps = read_u64_vec(&granule_file(dir, index, "timestamps"))?;

    if keys.len() != values.len() || keys.len() != timestamps.len() {
        bail!(
            "corrupt granule {index} in {}: column counts differ \
             (keys {}, values {}, timestamps {})",
            dir.display(),
            keys.len(),
            values.len(),
            timestamps.len()
        );
    }

    let mut granule = Granule::new();
    for ((key, value), timestamp) in keys.into_iter().zip(values).zip(timestamps) {
        granule.add_row(Row::new(key, value, timestamp)).with_context(|| {
            format!(
                "corrupt granule {index} in {}: more than {GRANULE_SIZE} rows",
                dir.display()
            )
        })?;
    }
    granule.sort();
    Ok(granule)
}
