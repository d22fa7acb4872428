//! Single-process reference: partial counts per file in parallel, merged, sorted, ranked.

use super::count::merge_counts;
use super::parser::parse_stock_code;
use super::rank::RankAssigner;
use super::types::{CountEntry, PivotEntry, RankedEntry, StockCode};
use crate::api::Reducer;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

pub fn count_lines<I, S>(lines: I) -> HashMap<StockCode, u64>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut local: HashMap<StockCode, u64> = HashMap::new();
    for line in lines {
        if let Some(code) = parse_stock_code(line.as_ref()) {
            *local.entry(code).or_insert(0) += 1;
        }
    }
    local
}

/// Sorts by count descending and numbers the result.
pub fn rank_counts(counts: HashMap<StockCode, u64>) -> Vec<RankedEntry> {
    let mut pivoted: Vec<PivotEntry> = counts.into_iter().map(|(code, count)| PivotEntry::from(CountEntry { code, count })).collect();
    pivoted.sort_by(|a, b| b.count.cmp(&a.count));

    let mut assigner = RankAssigner::default();
    let mut ranked = Vec::with_capacity(pivoted.len());
    for group in pivoted.chunk_by(|a, b| a.count == b.count) {
        let count = group[0].count;
        let codes = group.iter().map(|e| e.code.clone());
        // RankAssigner never fails
        let _ = assigner.do_reduce(&count, codes, &mut |e| ranked.push(e));
    }
    ranked
}

/// Whole pipeline over in-memory lines; the first line is the header.
pub fn rank_lines<I, S>(lines: I) -> Vec<RankedEntry>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    rank_counts(count_lines(lines.into_iter().skip(1)))
}

/// Whole pipeline over files in the given order; only the first non-empty file carries the header.
pub fn rank_files(files: &[PathBuf]) -> Result<Vec<RankedEntry>> {
    let contents: Vec<Vec<u8>> = files
        .iter()
        .map(|path| fs::read(path).with_context(|| format!("read {}", path.display())))
        .collect::<Result<_>>()?;
    let header_file = contents.iter().position(|c| !c.is_empty());

    let partials: Vec<HashMap<StockCode, u64>> = contents
        .par_iter()
        .enumerate()
        .map(|(i, content)| {
            let content = String::from_utf8_lossy(content);
            let skip = usize::from(header_file == Some(i));
            count_lines(content.lines().skip(skip))
        })
        .collect();

    let mut global: HashMap<StockCode, u64> = HashMap::new();
    for m in partials {
        merge_counts(&mut global, m);
    }
    Ok(rank_counts(global))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(ranked: &[RankedEntry]) -> Vec<String> {
        ranked.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn header_is_never_counted() {
        let input = ["a,b,c,FOO", "a,b,c,FOO", "a,b,c,FOO", "a,b,c,BAR"];
        assert_eq!(lines(&rank_lines(input)), vec!["1:FOO,2", "2:BAR,1"]);
    }

    #[test]
    fn single_code() {
        let input = std::iter::once("date,side,qty,code".to_string()).chain((0..7).map(|_| "d,s,1,XYZ".to_string()));
        assert_eq!(lines(&rank_lines(input)), vec!["1:XYZ,7"]);
    }

    #[test]
    fn ties_get_consecutive_ranks() {
        let input = ["h", "1,2,3,A", "1,2,3,A", "1,2,3,A", "1,2,3,B", "1,2,3,B", "1,2,3,D", "1,2,3,C", "1,2,3,C", "1,2,3,E"];
        assert_eq!(lines(&rank_lines(input)), vec!["1:A,3", "2:B,2", "3:C,2", "4:D,1", "5:E,1"]);
    }

    #[test]
    fn empty_input() {
        assert!(rank_lines(Vec::<String>::new()).is_empty());
        assert!(rank_lines(["only a header"]).is_empty());
    }

    #[test]
    fn files_skip_header_of_first_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "h,h,h,CODE\n1,2,3,FOO\n").unwrap();
        fs::write(&b, "1,2,3,FOO\n1,2,3,BAR\n").unwrap();
        assert_eq!(lines(&rank_files(&[a, b]).unwrap()), vec!["1:FOO,2", "2:BAR,1"]);
    }

    #[test]
    fn empty_leading_file_does_not_hide_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "").unwrap();
        fs::write(&b, "date,side,qty,code\n1,2,3,FOO\n").unwrap();
        assert_eq!(lines(&rank_files(&[a, b]).unwrap()), vec!["1:FOO,1"]);
    }
}
