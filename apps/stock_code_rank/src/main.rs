use anyhow::Result;
use clap::Parser;
use stockrank::config::{apply_rayon_threads, RuntimeConfig};
use stockrank::stock::StockCodeRankJob;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Input file or directory of CSV trade records (first line is a header)
    #[arg(long)]
    input: String,
    /// Output directory for the ranked `rank:code,count` lines
    #[arg(long)]
    output: String,
    /// Directory for the intermediate per-code counts (defaults to sibling under output)
    #[arg(long)]
    tmp: Option<String>,
    /// Reduce partitions for the counting phase
    #[arg(long)]
    reducers: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    apply_rayon_threads();
    let args = Args::parse();

    let mut config = RuntimeConfig::from_env();
    if let Some(n) = args.reducers { config.num_reducers = n; }

    let mut job = StockCodeRankJob::new(&args.input, &args.output).with_config(config.sanitized());
    if let Some(tmp) = &args.tmp { job = job.with_tmp(tmp); }

    let report = job.run()?;
    info!(report = %serde_json::to_string(&report)?, "done");
    Ok(())
}
