//! Centralized environment variable names, defaults and the runtime config built from them.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// Environment variable names
pub const ENV_NUM_REDUCERS: &str = "STOCKRANK_NUM_REDUCERS";
pub const ENV_SPLIT_BYTES: &str = "STOCKRANK_SPLIT_BYTES";
pub const ENV_LOCAL_BATCH_BYTES: &str = "STOCKRANK_LOCAL_BATCH_BYTES";
pub const ENV_FLUSH_BYTES: &str = "STOCKRANK_FLUSH_BYTES";
pub const ENV_FLUSH_INTERVAL_MS: &str = "STOCKRANK_FLUSH_INTERVAL_MS";
pub const ENV_WRITER_QUEUE_CAP: &str = "STOCKRANK_WRITER_QUEUE_CAP";
pub const ENV_COMBINE_SPILL_ENTRIES: &str = "STOCKRANK_COMBINE_SPILL_ENTRIES";
pub const ENV_KEEP_INTERMEDIATES: &str = "STOCKRANK_KEEP_INTERMEDIATES";
pub const ENV_WORK_DIR: &str = "STOCKRANK_WORK_DIR";
pub const ENV_RAYON_THREADS: &str = "STOCKRANK_RAYON_THREADS";

// Defaults
pub const DEFAULT_SPLIT_BYTES: usize = 64 * 1024 * 1024; // 64 MiB per map split
pub const DEFAULT_LOCAL_BATCH_BYTES: usize = 256 * 1024; // 256 KiB per partition chunk
pub const DEFAULT_FLUSH_BYTES: usize = 16 * 1024 * 1024; // 16 MiB
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 200;
pub const DEFAULT_WRITER_QUEUE_CAP: usize = 1024;
// Distinct keys a map task holds before spilling its combined partials
pub const DEFAULT_COMBINE_SPILL_ENTRIES: usize = 1_000_000;
pub const DEFAULT_WORK_DIR: &str = ".stockrank_runs";

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Reduce partitions. Jobs whose reducer needs a total order always get one.
    pub num_reducers: usize,
    pub split_bytes: usize,
    pub local_batch_bytes: usize,
    pub flush_bytes: usize,
    pub flush_interval: Duration,
    pub writer_queue_cap: usize,
    pub combine_spill_entries: usize,
    pub keep_intermediates: bool,
    pub work_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_reducers: num_cpus::get().max(1),
            split_bytes: DEFAULT_SPLIT_BYTES,
            local_batch_bytes: DEFAULT_LOCAL_BATCH_BYTES,
            flush_bytes: DEFAULT_FLUSH_BYTES,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            writer_queue_cap: DEFAULT_WRITER_QUEUE_CAP,
            combine_spill_entries: DEFAULT_COMBINE_SPILL_ENTRIES,
            keep_intermediates: false,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by whatever `STOCKRANK_*` variables are set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_parse::<usize>(ENV_NUM_REDUCERS) { cfg.num_reducers = n; }
        if let Some(n) = env_parse::<usize>(ENV_SPLIT_BYTES) { cfg.split_bytes = n; }
        if let Some(n) = env_parse::<usize>(ENV_LOCAL_BATCH_BYTES) { cfg.local_batch_bytes = n; }
        if let Some(n) = env_parse::<usize>(ENV_FLUSH_BYTES) { cfg.flush_bytes = n; }
        if let Some(ms) = env_parse::<u64>(ENV_FLUSH_INTERVAL_MS) { cfg.flush_interval = Duration::from_millis(ms); }
        if let Some(n) = env_parse::<usize>(ENV_WRITER_QUEUE_CAP) { cfg.writer_queue_cap = n; }
        if let Some(n) = env_parse::<usize>(ENV_COMBINE_SPILL_ENTRIES) { cfg.combine_spill_entries = n; }
        cfg.keep_intermediates = env_var_truthy(ENV_KEEP_INTERMEDIATES);
        if let Ok(dir) = std::env::var(ENV_WORK_DIR) { cfg.work_dir = PathBuf::from(dir); }
        cfg.sanitized()
    }

    /// Clamp sizes to usable minimums.
    pub fn sanitized(mut self) -> Self {
        self.num_reducers = self.num_reducers.max(1);
        self.split_bytes = self.split_bytes.max(1);
        self.local_batch_bytes = self.local_batch_bytes.max(1);
        self.flush_bytes = self.flush_bytes.max(1);
        self.writer_queue_cap = self.writer_queue_cap.max(1);
        self.combine_spill_entries = self.combine_spill_entries.max(1);
        self
    }
}

/// Sets `RAYON_NUM_THREADS` from `STOCKRANK_RAYON_THREADS` unless the former is already set.
/// Must run before the global rayon pool is first used.
pub fn apply_rayon_threads() {
    if std::env::var("RAYON_NUM_THREADS").is_err() {
        if let Some(n) = env_parse::<usize>(ENV_RAYON_THREADS) {
            if n > 0 { std::env::set_var("RAYON_NUM_THREADS", n.to_string()); }
        }
    }
}

pub fn env_var_truthy(name: &str) -> bool {
    std::env::var(name).map(|v| is_truthy(&v)).unwrap_or(false)
}

pub fn is_truthy(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    v == "1" || v == "true" || v == "yes" || v == "on"
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}
