use crate::api::{Combiner, ExecutablePipeline, KeyOrder, Mapper, Reducer};
use crate::config::RuntimeConfig;
use crate::io::{decode_bin, ensure_dir, hash_to_partition, list_input_files, map_file, open_writer, read_bin_line, sibling_path, write_bin, HeaderPolicy, InputSet, InputSplit, LineIter, SUCCESS_MARKER};
use crate::sort::sort_partition;
use crate::stats::{JobStats, MapStats, MapTaskStats, ReduceStatsAgg, ReduceTaskStats, SortStatsAgg, SortTaskStats};
use crate::writer::{partition_file, ThreadWriter, WriterPool};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct RuntimePipeline {
    name: String,
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    header: HeaderPolicy,
    config: RuntimeConfig,
}

impl RuntimePipeline {
    pub fn new() -> Self { Self::named("job") }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), inputs: vec![], output: None, header: HeaderPolicy::None, config: RuntimeConfig::from_env() }
    }

    pub fn with_header(mut self, header: HeaderPolicy) -> Self { self.header = header; self }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self { self.config = config.sanitized(); self }
}

impl Default for RuntimePipeline { fn default() -> Self { Self::new() } }

/// Per-run directory layout.
struct RunDirs {
    root: PathBuf,
    map_out: PathBuf,
    sort_out: PathBuf,
    staging: PathBuf,
}

impl RunDirs {
    fn new(work_dir: &Path, job_id: &str, output: &Path) -> Result<Self> {
        let root = work_dir.join(job_id);
        let staging = sibling_path(output, &format!(".__staging_{}", job_id))?;
        Ok(Self { map_out: root.join("map_out"), sort_out: root.join("sort_out"), staging, root })
    }
}

impl ExecutablePipeline for RuntimePipeline {
    fn add_input(&mut self, input_path: impl Into<PathBuf>) { self.inputs.push(input_path.into()); }

    fn add_output(&mut self, output_path: impl Into<PathBuf>) { self.output = Some(output_path.into()); }

    fn map_reduce_sorted<M, C, R, O>(&mut self, mapper: M, combiner: Option<C>, reducer: R, order: O) -> Result<JobStats>
    where
        M: Mapper<Input = String> + Sync,
        C: Combiner<Key = M::Key, Value = M::Value> + Sync,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Clone + Send + Sync,
        O: KeyOrder<M::Key> + Sync,
    {
        let output_dir = self.output.clone().context("output not set")?;
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let job_id = format!("{}-{}-{}-{}", self.name, std::process::id(), ts, JOB_SEQ.fetch_add(1, Ordering::Relaxed));
        let dirs = RunDirs::new(&self.config.work_dir, &job_id, &output_dir)?;

        // Prepare output directory (clean it before starting)
        if output_dir.exists() {
            fs::remove_dir_all(&output_dir).with_context(|| format!("clear output {}", output_dir.display()))?;
        }

        let result = self.execute(&job_id, &dirs, &output_dir, mapper, combiner, reducer, order);
        if result.is_err() {
            let _ = fs::remove_dir_all(&dirs.staging);
        }
        if !self.config.keep_intermediates {
            let _ = fs::remove_dir_all(&dirs.root);
        }
        result
    }
}

impl RuntimePipeline {
    #[allow(clippy::too_many_arguments)]
    fn execute<M, C, R, O>(&self, job_id: &str, dirs: &RunDirs, output_dir: &Path, mapper: M, combiner: Option<C>, reducer: R, order: O) -> Result<JobStats>
    where
        M: Mapper<Input = String> + Sync,
        C: Combiner<Key = M::Key, Value = M::Value> + Sync,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Clone + Send + Sync,
        O: KeyOrder<M::Key> + Sync,
    {
        let job_start = Instant::now();
        let cfg = &self.config;
        ensure_dir(&dirs.map_out)?;
        ensure_dir(&dirs.sort_out)?;
        ensure_dir(&dirs.staging)?;

        // inputs
        let mut all_files = Vec::new();
        for inp in &self.inputs {
            all_files.extend(list_input_files(inp)?);
        }
        let input = InputSet::open(all_files, cfg.split_bytes)?;

        let num_reducers = if reducer.requires_total_order() {
            if cfg.num_reducers != 1 {
                debug!(configured = cfg.num_reducers, "reducer needs a total order; using a single reduce partition");
            }
            1
        } else {
            cfg.num_reducers
        };

        info!(
            job_id, files = input.files.len(), splits = input.splits.len(), num_reducers,
            combiner = combiner.is_some(), header = ?self.header,
            fd_soft_limit = get_fd_soft_limit().unwrap_or(0),
            "starting map phase"
        );

        // Map phase
        let map_phase_start = Instant::now();
        let (pool, mut joiner) = WriterPool::new(&dirs.map_out, num_reducers, cfg.flush_bytes, cfg.flush_interval, cfg.writer_queue_cap)?;
        let map_result: Result<Vec<MapTaskStats>> = input
            .splits
            .par_iter()
            .enumerate()
            .map(|(task_id, split)| self.run_map_for(task_id, &input, split, &mapper, combiner.as_ref(), &pool))
            .collect();
        // Writers are closed before the error check so no IO thread is left behind.
        pool.close_all();
        let join_result = joiner.join_all();
        let map_stats_vec = map_result?;
        let write_stats = join_result?;
        let mut map_stats = MapStats::aggregate(&map_stats_vec, input.total_bytes(), map_phase_start.elapsed().as_millis() as u64);
        map_stats.record_partition_writes(&write_stats);
        info!(phase = "map",
              tasks = map_stats.tasks, total_lines = map_stats.total_lines, total_emits = map_stats.total_emits,
              total_records_out = map_stats.total_records_out, total_bytes_out = map_stats.total_bytes_out,
              bytes_written = map_stats.bytes_written, write_calls = map_stats.write_calls,
              min_task_ms = map_stats.min_task_ms, max_task_ms = map_stats.max_task_ms, wall_ms = map_stats.wall_ms,
              "Map phase complete");

        // Sort/shuffle
        let sort_phase_start = Instant::now();
        let sort_stats_vec: Vec<SortTaskStats> = (0..num_reducers)
            .into_par_iter()
            .map(|r| -> Result<SortTaskStats> {
                let reducer_start = Instant::now();
                let outcome = sort_partition::<M::Key, O>(&[partition_file(&dirs.map_out, r)], &sorted_run(&dirs.sort_out, r), &order)?;
                Ok(SortTaskStats {
                    reducer: r,
                    records_in: outcome.records_in,
                    bytes_in: outcome.bytes_in,
                    sort_ms: outcome.sort_only_ms,
                    wall_ms: reducer_start.elapsed().as_millis() as u64,
                })
            })
            .collect::<Result<_>>()?;
        let sort_stats = SortStatsAgg::aggregate(&sort_stats_vec, sort_phase_start.elapsed().as_millis() as u64);
        info!(phase = "sort",
              reducers = sort_stats.reducers, total_records = sort_stats.total_records, total_bytes = sort_stats.total_bytes,
              max_sort_ms = sort_stats_vec.iter().map(|s| s.sort_ms).max().unwrap_or(0),
              min_reducer_ms = sort_stats.min_reducer_ms, max_reducer_ms = sort_stats.max_reducer_ms, wall_ms = sort_stats.wall_ms,
              "Sort phase complete");

        // Reduce phase
        let reduce_phase_start = Instant::now();
        let reduce_stats_vec: Vec<ReduceTaskStats> = (0..num_reducers)
            .into_par_iter()
            .map(|r| run_reduce_for(r, &sorted_run(&dirs.sort_out, r), &dirs.staging, reducer.clone(), &order))
            .collect::<Result<_>>()?;
        let reduce_stats = ReduceStatsAgg::aggregate(&reduce_stats_vec, reduce_phase_start.elapsed().as_millis() as u64);
        info!(phase = "reduce",
              reducers = reduce_stats.reducers, total_records = reduce_stats.total_records, total_groups = reduce_stats.total_groups,
              total_lines_out = reduce_stats.total_lines_out,
              min_reducer_ms = reduce_stats.min_reducer_ms, max_reducer_ms = reduce_stats.max_reducer_ms, wall_ms = reduce_stats.wall_ms,
              "Reduce phase complete");

        commit_output(&dirs.staging, output_dir)?;
        let stats = JobStats {
            job_id: job_id.to_string(),
            map: map_stats,
            sort: sort_stats,
            reduce: reduce_stats,
            wall_ms: job_start.elapsed().as_millis() as u64,
        };
        info!(job_id, output = %output_dir.display(), wall_ms = stats.wall_ms, "job committed");
        Ok(stats)
    }

    fn run_map_for<M, C>(&self, task_id: usize, input: &InputSet, split: &InputSplit, mapper: &M, combiner: Option<&C>, pool: &WriterPool) -> Result<MapTaskStats>
    where
        M: Mapper<Input = String>,
        C: Combiner<Key = M::Key, Value = M::Value>,
    {
        let task_start = Instant::now();
        let num_partitions = pool.num_partitions();
        let spill_entries = self.config.combine_spill_entries;
        debug!(task_id, file = %input.files[split.file_index].display(), start = split.start, end = split.end, "map task starting");

        let mut lines_in: u64 = 0;
        let lines = LineIter::new(input.bytes(split))
            .skip(usize::from(self.header.drops_first_line(input, split)))
            .inspect(|_| lines_in += 1)
            .map(|l| String::from_utf8_lossy(l).into_owned());

        let mut out = pool.make_thread_writer(self.config.local_batch_bytes);
        let mut total_emits: u64 = 0;
        let mut records_out: u64 = 0;
        // emit cannot fail, so the first encoding/IO error is parked here
        let mut emit_err: Option<anyhow::Error> = None;

        match combiner {
            Some(combiner) => {
                let mut partials: Vec<HashMap<M::Key, M::Value>> = (0..num_partitions).map(|_| HashMap::new()).collect();
                let mut held: usize = 0;
                let mut emit = |k: M::Key, v: M::Value| {
                    total_emits += 1;
                    if emit_err.is_some() { return; }
                    let part = match hash_to_partition(&k, num_partitions) { Ok(p) => p, Err(e) => { emit_err = Some(e); return; } };
                    match partials[part].get_mut(&k) {
                        Some(acc) => combiner.combine(&k, acc, v),
                        None => { partials[part].insert(k, v); held += 1; }
                    }
                    if held >= spill_entries {
                        match spill(&mut partials, &mut out) {
                            Ok(n) => records_out += n,
                            Err(e) => emit_err = Some(e),
                        }
                        held = 0;
                    }
                };
                mapper.do_map(lines, &mut emit).with_context(|| format!("map task {} over {}", task_id, input.files[split.file_index].display()))?;
                if let Some(e) = emit_err.take() { return Err(e); }
                records_out += spill(&mut partials, &mut out)?;
            }
            None => {
                let mut emit = |k: M::Key, v: M::Value| {
                    total_emits += 1;
                    if emit_err.is_some() { return; }
                    let res = hash_to_partition(&k, num_partitions).and_then(|part| {
                        write_bin(out.buffer(part), &k, &v)?;
                        out.maybe_flush(part)
                    });
                    match res {
                        Ok(()) => records_out += 1,
                        Err(e) => emit_err = Some(e),
                    }
                };
                mapper.do_map(lines, &mut emit).with_context(|| format!("map task {} over {}", task_id, input.files[split.file_index].display()))?;
                if let Some(e) = emit_err.take() { return Err(e); }
            }
        }
        out.flush_all()?;
        let (total_flushes, total_bytes_out) = out.stats();

        Ok(MapTaskStats {
            split: task_id,
            lines_in,
            total_emits,
            records_out,
            total_bytes_out,
            total_flushes,
            wall_ms: task_start.elapsed().as_millis() as u64,
        })
    }
}

/// Drains combined partials into the task's partition buffers; returns records written.
fn spill<K: serde::Serialize, V: serde::Serialize>(partials: &mut [HashMap<K, V>], out: &mut ThreadWriter<'_>) -> Result<u64> {
    let mut written = 0u64;
    for (part, map) in partials.iter_mut().enumerate() {
        for (k, v) in map.drain() {
            write_bin(out.buffer(part), &k, &v)?;
            out.maybe_flush(part)?;
            written += 1;
        }
    }
    Ok(written)
}

fn sorted_run(sort_out: &Path, r: usize) -> PathBuf {
    sort_out.join(format!("reduce_in_part{}.bin", r))
}

pub fn output_part(dir: &Path, r: usize) -> PathBuf {
    dir.join(format!("part-{:05}", r))
}

fn run_reduce_for<R, O>(r: usize, in_path: &Path, out_dir: &Path, mut reducer: R, order: &O) -> Result<ReduceTaskStats>
where
    R: Reducer,
    R::Key: serde::de::DeserializeOwned,
    R::ValueIn: serde::de::DeserializeOwned,
    O: KeyOrder<R::Key>,
{
    let reducer_start = Instant::now();
    let out_path = output_part(out_dir, r);
    let mut out_writer = open_writer(&out_path)?;
    let map = map_file(in_path)?;
    let bytes: &[u8] = map.as_deref().unwrap_or(&[]);

    let mut current_key: Option<R::Key> = None;
    let mut buffer: Vec<R::ValueIn> = Vec::new();
    let mut groups: u64 = 0;
    let mut lines_out: u64 = 0;
    let mut write_err: Option<anyhow::Error> = None;

    let mut flush_group = |key: &R::Key, vals: Vec<R::ValueIn>, reducer: &mut R| -> Result<()> {
        let mut emit = |out: R::Out| {
            if write_err.is_some() { return; }
            match writeln!(out_writer, "{}", out) {
                Ok(()) => lines_out += 1,
                Err(e) => write_err = Some(anyhow::Error::from(e).context(format!("write {}", out_path.display()))),
            }
        };
        reducer.do_reduce(key, vals, &mut emit)?;
        groups += 1;
        match write_err.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    };

    let mut records_in: u64 = 0;
    let mut off = 0usize;
    while let Some((k, v, next)) = read_bin_line(bytes, off) {
        let k_typed: R::Key = decode_bin(k).with_context(|| format!("bad key in {} at {}", in_path.display(), off))?;
        let v_typed: R::ValueIn = decode_bin(v).with_context(|| format!("bad value in {} at {}", in_path.display(), off))?;
        records_in += 1;
        match current_key.take() {
            None => { current_key = Some(k_typed); buffer.push(v_typed); }
            Some(cur) if order.compare(&cur, &k_typed).is_eq() => { current_key = Some(cur); buffer.push(v_typed); }
            Some(cur) => {
                flush_group(&cur, std::mem::take(&mut buffer), &mut reducer)?;
                current_key = Some(k_typed);
                buffer.push(v_typed);
            }
        }
        off = next;
    }
    if off != bytes.len() {
        warn!(reducer = r, offset = off, len = bytes.len(), "sorted run ends in a torn record");
        anyhow::bail!("torn record in {} at offset {}", in_path.display(), off);
    }
    if let Some(cur) = current_key.take() { flush_group(&cur, std::mem::take(&mut buffer), &mut reducer)?; }
    drop(flush_group);
    out_writer.flush().with_context(|| format!("flush {}", out_path.display()))?;

    Ok(ReduceTaskStats { reducer: r, records_in, groups, lines_out, wall_ms: reducer_start.elapsed().as_millis() as u64 })
}

/// Moves the staged parts into place and marks the output complete.
fn commit_output(staging: &Path, output_dir: &Path) -> Result<()> {
    if output_dir.exists() {
        fs::remove_dir_all(output_dir).with_context(|| format!("clear output {}", output_dir.display()))?;
    }
    if let Some(parent) = output_dir.parent() {
        if !parent.as_os_str().is_empty() { ensure_dir(parent)?; }
    }
    fs::rename(staging, output_dir).with_context(|| format!("rename {} -> {}", staging.display(), output_dir.display()))?;
    fs::write(output_dir.join(SUCCESS_MARKER), b"").with_context(|| format!("write success marker in {}", output_dir.display()))?;
    Ok(())
}

/// True once a job committed into `dir`.
pub fn is_committed(dir: impl AsRef<Path>) -> bool {
    dir.as_ref().join(SUCCESS_MARKER).is_file()
}

#[cfg(target_os = "linux")]
fn get_fd_soft_limit() -> Option<u64> {
    use libc::{getrlimit, rlimit, RLIMIT_NOFILE};
    let mut lim = rlimit { rlim_cur: 0, rlim_max: 0 };
    let rc = unsafe { getrlimit(RLIMIT_NOFILE, &mut lim as *mut rlimit) };
    if rc == 0 { Some(lim.rlim_cur as u64) } else { None }
}

#[cfg(not(target_os = "linux"))]
fn get_fd_soft_limit() -> Option<u64> { None }
