use super::count::{CountCombiner, CountReducer};
use super::parser::StockCodeMapper;
use super::rank::{RankAssigner, RankPivotMapper, DESCENDING_COUNT};
use crate::api::{ExecutablePipeline, NoCombiner};
use crate::config::RuntimeConfig;
use crate::io::{sibling_path, HeaderPolicy};
use crate::runtime::{is_committed, RuntimePipeline};
use crate::stats::JobStats;
use anyhow::{ensure, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Stats of both phases of one run.
#[derive(Clone, Debug, Serialize)]
pub struct RankReport {
    pub count: JobStats,
    pub rank: JobStats,
}

/// Two chained jobs: count lines per stock code into an intermediate dataset, then rank
/// the codes by descending count.
pub struct StockCodeRankJob {
    input: PathBuf,
    output: PathBuf,
    tmp: Option<PathBuf>,
    config: RuntimeConfig,
}

impl StockCodeRankJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self { input: input.into(), output: output.into(), tmp: None, config: RuntimeConfig::from_env() }
    }

    /// Where the counts go. Defaults to a sibling of the output.
    pub fn with_tmp(mut self, tmp: impl Into<PathBuf>) -> Self { self.tmp = Some(tmp.into()); self }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self { self.config = config; self }

    pub fn intermediate_dir(&self) -> Result<PathBuf> {
        match &self.tmp {
            Some(tmp) => Ok(tmp.clone()),
            None => sibling_path(&self.output, "__codecnt"),
        }
    }

    pub fn run(&self) -> Result<RankReport> {
        let counts_dir = self.intermediate_dir()?;
        let count = self.count_codes(&counts_dir)?;
        let rank = self.rank_codes(&counts_dir)?;
        info!(distinct_codes = rank.reduce.total_lines_out, output = %self.output.display(), "stock code ranking complete");
        Ok(RankReport { count, rank })
    }

    /// Phase 1: `(code, count)` per distinct code, header line excluded.
    pub fn count_codes(&self, counts_dir: &Path) -> Result<JobStats> {
        let mut p = RuntimePipeline::named("stock-code-count")
            .with_config(self.config.clone())
            .with_header(HeaderPolicy::FirstLineOfDataset);
        p.add_input(&self.input);
        p.add_output(counts_dir);
        p.map_combine_reduce(StockCodeMapper, CountCombiner, CountReducer)
    }

    /// Phase 2: globally ranked `rank:code,count` lines. Refuses to start on counts that
    /// were not fully committed.
    pub fn rank_codes(&self, counts_dir: &Path) -> Result<JobStats> {
        ensure!(is_committed(counts_dir), "count output {} is incomplete; run the count phase first", counts_dir.display());
        let mut p = RuntimePipeline::named("stock-code-rank").with_config(self.config.clone());
        p.add_input(counts_dir);
        p.add_output(&self.output);
        p.map_reduce_sorted(RankPivotMapper, None::<NoCombiner<u64, String>>, RankAssigner::default(), DESCENDING_COUNT)
    }
}
