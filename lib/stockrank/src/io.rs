use anyhow::{bail, Context, Result};
use memchr::memchr;
use memmap2::Mmap;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Marker written into a committed output directory.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref()).with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

/// Data files under `path` (or `path` itself), in sorted order.
/// Below a directory, hidden files and `_`-prefixed files such as the success marker are not data.
/// A file named directly is always data.
pub fn list_input_files(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    if !path.exists() {
        bail!("input path {} does not exist", path.display());
    }
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if entry.depth() > 0 && (name.starts_with('.') || name.starts_with('_')) {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

/// `path` with `suffix` appended to its last component, so `out/` and `out` both give `out<suffix>`
/// next to `out` rather than inside it.
pub fn sibling_path(path: impl AsRef<Path>, suffix: &str) -> Result<PathBuf> {
    let path = path.as_ref();
    let Some(name) = path.file_name() else {
        bail!("{} has no final component to derive a sibling from", path.display());
    };
    let mut name = name.to_os_string();
    name.push(suffix);
    Ok(path.with_file_name(name))
}

pub fn hash_to_partition<K: Serialize>(key: &K, num_partitions: usize) -> Result<usize> {
    let mut hasher = DefaultHasher::new();
    let bytes = serde_json::to_vec(key).context("serialize partition key")?;
    hasher.write(&bytes);
    Ok((hasher.finish() as usize) % num_partitions.max(1))
}

pub fn open_writer(path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        ensure_dir(parent)?;
    }
    let file = File::create(path.as_ref()).with_context(|| format!("create {}", path.as_ref().display()))?;
    Ok(BufWriter::new(file))
}

/// Read-only map of a whole file. Empty files yield `None`; they carry no records.
pub fn map_file(path: impl AsRef<Path>) -> Result<Option<Mmap>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata().with_context(|| format!("stat {}", path.display()))?.len();
    if len == 0 {
        return Ok(None);
    }
    let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.display()))?;
    Ok(Some(map))
}

// ========== Binary intermediate records: [klen u32][vlen u32][key][value] ==========

pub fn write_bin<K: Serialize, V: Serialize>(buf: &mut Vec<u8>, key: &K, value: &V) -> Result<()> {
    let key_bytes = bincode::serialize(key).context("bincode key")?;
    let val_bytes = bincode::serialize(value).context("bincode value")?;
    buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(val_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&key_bytes);
    buf.extend_from_slice(&val_bytes);
    Ok(())
}

/// Returns (key bytes, value bytes, offset of the next record), or None at the end or on a torn record.
pub fn read_bin_line(bytes: &[u8], off: usize) -> Option<(&[u8], &[u8], usize)> {
    let header = bytes.get(off..off + 8)?;
    let klen = u32::from_le_bytes(header[0..4].try_into().ok()?) as usize;
    let vlen = u32::from_le_bytes(header[4..8].try_into().ok()?) as usize;
    let key_start = off + 8;
    let val_start = key_start + klen;
    let end = val_start + vlen;
    if end > bytes.len() {
        return None;
    }
    Some((&bytes[key_start..val_start], &bytes[val_start..end], end))
}

pub fn decode_bin<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).context("bincode decode")
}

// ========== Text input splits ==========

/// Which input lines are headers rather than data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HeaderPolicy {
    #[default]
    None,
    /// Only the first line of the first non-empty input file (in sorted path order).
    FirstLineOfDataset,
}

impl HeaderPolicy {
    pub fn drops_first_line(self, input: &InputSet, split: &InputSplit) -> bool {
        match self {
            HeaderPolicy::None => false,
            HeaderPolicy::FirstLineOfDataset => input.starts_dataset(split),
        }
    }
}

/// A byte range of one mapped input file. Ranges always start at a line start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSplit {
    pub file_index: usize,
    pub start: usize,
    pub end: usize,
}

pub struct InputSet {
    pub files: Vec<PathBuf>,
    maps: Vec<Option<Mmap>>,
    pub splits: Vec<InputSplit>,
    /// Index of the first file holding any bytes; empty files have no lines.
    first_data_file: Option<usize>,
}

impl InputSet {
    /// Maps every file and cuts it into splits of about `split_bytes`, each boundary moved
    /// just past the next newline so no line straddles two splits.
    pub fn open(files: Vec<PathBuf>, split_bytes: usize) -> Result<Self> {
        let mut maps = Vec::with_capacity(files.len());
        let mut splits = Vec::new();
        let mut first_data_file = None;
        for (file_index, path) in files.iter().enumerate() {
            let map = map_file(path)?;
            if let Some(bytes) = map.as_deref() {
                first_data_file.get_or_insert(file_index);
                splits.extend(plan_splits(bytes, split_bytes).into_iter().map(|(start, end)| InputSplit { file_index, start, end }));
            }
            maps.push(map);
        }
        Ok(Self { files, maps, splits, first_data_file })
    }

    /// True for the split holding the very first line of the whole input.
    pub fn starts_dataset(&self, split: &InputSplit) -> bool {
        split.start == 0 && self.first_data_file == Some(split.file_index)
    }

    pub fn bytes(&self, split: &InputSplit) -> &[u8] {
        match self.maps[split.file_index].as_deref() {
            Some(bytes) => &bytes[split.start..split.end],
            None => &[],
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.maps.iter().flatten().map(|m| m.len() as u64).sum()
    }
}

pub fn plan_splits(bytes: &[u8], split_bytes: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0usize;
    while start < bytes.len() {
        let target = start.saturating_add(split_bytes.max(1));
        let end = if target >= bytes.len() {
            bytes.len()
        } else {
            memchr(b'\n', &bytes[target - 1..]).map(|i| target + i).unwrap_or(bytes.len())
        };
        ranges.push((start, end));
        start = end;
    }
    ranges
}

/// Lines of a byte range, without their `\n` / `\r\n` terminators.
/// A trailing newline does not produce an extra empty line.
pub struct LineIter<'a> {
    bytes: &'a [u8],
    off: usize,
}

impl<'a> LineIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self { Self { bytes, off: 0 } }
}

impl<'a> Iterator for LineIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.off >= self.bytes.len() {
            return None;
        }
        let rest = &self.bytes[self.off..];
        let (mut line, consumed) = match memchr(b'\n', rest) {
            Some(i) => (&rest[..i], i + 1),
            None => (rest, rest.len()),
        };
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        self.off += consumed;
        Some(line)
    }
}
