use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trimmed, non-empty identifier taken from field 3 of a data line.
pub type StockCode = String;

/// One distinct code and how many data lines carry it. Line form: `code\tcount`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CountEntry {
    pub code: StockCode,
    pub count: u64,
}

impl fmt::Display for CountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.code, self.count)
    }
}

/// A [`CountEntry`] keyed by its count, so the shuffle can sort on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotEntry {
    pub count: u64,
    pub code: StockCode,
}

impl From<CountEntry> for PivotEntry {
    fn from(e: CountEntry) -> Self {
        PivotEntry { count: e.count, code: e.code }
    }
}

/// Final output row. Line form: `rank:code,count`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub rank: u64,
    pub code: StockCode,
    pub count: u64,
}

impl fmt::Display for RankedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}", self.rank, self.code, self.count)
    }
}

impl FromStr for RankedEntry {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let (rank, rest) = line.split_once(':').ok_or_else(|| anyhow!("missing ':' in ranked line {:?}", line))?;
        let (code, count) = rest.rsplit_once(',').ok_or_else(|| anyhow!("missing ',' in ranked line {:?}", line))?;
        Ok(RankedEntry {
            rank: rank.trim().parse().with_context(|| format!("rank in {:?}", line))?,
            code: code.to_string(),
            count: count.trim().parse().with_context(|| format!("count in {:?}", line))?,
        })
    }
}
