use crate::api::KeyOrder;
use crate::io::{decode_bin, map_file, read_bin_line};
use anyhow::{Context, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Clone, Debug)]
pub struct SortOutcome {
    pub records_in: u64,
    pub bytes_in: u64,
    pub sort_only_ms: u64,
}

// Given a set of partition files, produce a single file at out_path with records ordered by
// `order` over their decoded keys. The sort is stable: records with equal keys keep
// input order. Intermediate format is binary records: [klen][vlen][k][v]
pub fn sort_partition<K, O>(input_paths: &[PathBuf], out_path: &Path, order: &O) -> Result<SortOutcome>
where
    K: DeserializeOwned + Send,
    O: KeyOrder<K> + Sync,
{
    let mut file_maps: Vec<Mmap> = Vec::new();
    // (key, file_idx, start, end)
    let mut records: Vec<(K, usize, usize, usize)> = Vec::new();
    let mut bytes_in: u64 = 0;

    for p in input_paths {
        let Some(map) = map_file(p)? else { continue };
        let file_idx = file_maps.len();
        bytes_in += map.len() as u64;
        let mut off = 0usize;
        while let Some((k, _v, next)) = read_bin_line(&map, off) {
            let key: K = decode_bin(k).with_context(|| format!("decode key in {} at {}", p.display(), off))?;
            records.push((key, file_idx, off, next));
            off = next;
        }
        anyhow::ensure!(off == map.len(), "torn record in {} at offset {}", p.display(), off);
        file_maps.push(map);
    }

    let sort_only_start = Instant::now();
    records.par_sort_by(|a, b| order.compare(&a.0, &b.0));
    let sort_only_ms = sort_only_start.elapsed().as_millis() as u64;

    let mut w = crate::io::open_writer(out_path)?;
    for &(_, fi, s, e) in &records {
        w.write_all(&file_maps[fi][s..e]).with_context(|| format!("write {}", out_path.display()))?;
    }
    w.flush().with_context(|| format!("flush {}", out_path.display()))?;

    Ok(SortOutcome { records_in: records.len() as u64, bytes_in, sort_only_ms })
}
