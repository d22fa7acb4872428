use anyhow::Result;
use clap::Parser;
use std::fs;
use std::io::Write;
use stockrank::io::{list_input_files, open_writer};
use stockrank::stock::naive;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    input: String,
    #[arg(long)]
    output: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();
    let files = list_input_files(&args.input)?;
    let ranked = naive::rank_files(&files)?;

    // single part, same layout as the runtime writes
    let _ = fs::remove_dir_all(&args.output);
    let mut w = open_writer(format!("{}/part-00000", args.output))?;
    for entry in &ranked {
        writeln!(w, "{}", entry)?;
    }
    w.flush()?;
    info!(files = files.len(), codes = ranked.len(), "naive ranking written");
    Ok(())
}
