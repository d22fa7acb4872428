use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use stockrank::io::{list_input_files, SUCCESS_MARKER};
use stockrank::runtime::output_part;
use stockrank::stock::{naive, parse_count_line, RankedEntry, StockCodeRankJob};
use stockrank::RuntimeConfig;

fn test_config(root: &Path, reducers: usize, split_bytes: usize) -> RuntimeConfig {
    RuntimeConfig {
        num_reducers: reducers,
        split_bytes,
        local_batch_bytes: 64,
        combine_spill_entries: 4,
        work_dir: root.join("work"),
        ..RuntimeConfig::default()
    }
}

fn write_input(root: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let dir = root.join("input");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    dir
}

fn run_job(root: &Path, input: &Path, cfg: RuntimeConfig) -> Vec<RankedEntry> {
    let output = root.join("out");
    StockCodeRankJob::new(input, &output).with_config(cfg).run().unwrap();
    read_ranked(&output)
}

fn read_ranked(output: &Path) -> Vec<RankedEntry> {
    fs::read_to_string(output_part(output, 0))
        .unwrap()
        .lines()
        .map(|l| l.parse().unwrap())
        .collect()
}

fn render(ranked: &[RankedEntry]) -> Vec<String> {
    ranked.iter().map(ToString::to_string).collect()
}

/// Deterministic pseudo-random trade lines over a small code universe.
fn synthetic_lines(n: usize, seed: u64) -> Vec<String> {
    let mut state = seed;
    let mut out = vec!["date,side,qty,code".to_string()];
    for i in 0..n {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let code = format!("{:06}", 600000 + (state >> 33) % 23);
        let line = match i % 17 {
            0 => format!("2024-01-01,buy,{}", i),                  // 3 fields
            1 => format!("2024-01-01,buy,{},{},extra", i, code),   // 5 fields
            _ => format!("2024-01-{:02},sell,{}, {} ", i % 28 + 1, i, code),
        };
        out.push(line);
    }
    out
}

#[test]
fn header_line_is_excluded_even_with_four_fields() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path(), "trades.csv", &["a,b,c,FOO", "a,b,c,FOO", "a,b,c,FOO", "a,b,c,BAR"]);
    let ranked = run_job(tmp.path(), &input, test_config(tmp.path(), 2, 1024));
    assert_eq!(render(&ranked), vec!["1:FOO,2", "2:BAR,1"]);
}

#[test]
fn malformed_lines_contribute_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path(), "trades.csv", &["h1,h2,h3,h4", "a,b,FOO", "a,b,c,FOO,e", "", "a,b,c,BAR", "a,b,c,  "]);
    let ranked = run_job(tmp.path(), &input, test_config(tmp.path(), 2, 1024));
    assert_eq!(render(&ranked), vec!["1:BAR,1"]);
}

#[test]
fn single_code_input() {
    let tmp = tempfile::tempdir().unwrap();
    let mut lines = vec!["date,side,qty,code"];
    lines.extend(std::iter::repeat("2024-01-02,buy,100,600519").take(25));
    let input = write_input(tmp.path(), "trades.csv", &lines);
    let ranked = run_job(tmp.path(), &input, test_config(tmp.path(), 4, 32));
    assert_eq!(render(&ranked), vec!["1:600519,25"]);
}

#[test]
fn tied_codes_get_consecutive_ranks() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(
        tmp.path(),
        "trades.csv",
        &["h,h,h,h", "x,x,x,A", "x,x,x,A", "x,x,x,A", "x,x,x,B", "x,x,x,B", "x,x,x,Q", "x,x,x,Q", "x,x,x,P", "x,x,x,P", "x,x,x,Z"],
    );
    let ranked = run_job(tmp.path(), &input, test_config(tmp.path(), 3, 16));
    assert_eq!(ranked.len(), 5);
    assert_eq!(render(&ranked[..1]), vec!["1:A,3"]);
    let tied: HashSet<&str> = ranked[1..4].iter().map(|e| e.code.as_str()).collect();
    assert_eq!(tied, HashSet::from(["B", "P", "Q"]));
    assert!(ranked[1..4].iter().all(|e| e.count == 2));
    assert_eq!(ranked.iter().map(|e| e.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert_eq!(render(&ranked[4..]), vec!["5:Z,1"]);
}

#[test]
fn ranking_properties_hold_on_larger_input() {
    let tmp = tempfile::tempdir().unwrap();
    let lines = synthetic_lines(3000, 7);
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let input = write_input(tmp.path(), "trades.csv", &refs);
    let ranked = run_job(tmp.path(), &input, test_config(tmp.path(), 4, 512));

    // contiguous ranks 1..K, K = distinct eligible codes
    let distinct: HashSet<String> = lines.iter().skip(1).filter_map(|l| stockrank::stock::parse_stock_code(l)).collect();
    assert_eq!(ranked.len(), distinct.len());
    for (i, e) in ranked.iter().enumerate() {
        assert_eq!(e.rank, i as u64 + 1);
    }
    // non-increasing counts
    for pair in ranked.windows(2) {
        assert!(pair[0].count >= pair[1].count, "{:?}", pair);
    }
    // counts add up to the eligible data lines
    let eligible = lines.iter().skip(1).filter(|l| stockrank::stock::parse_stock_code(l).is_some()).count() as u64;
    assert_eq!(ranked.iter().map(|e| e.count).sum::<u64>(), eligible);
    // same answer as the single-process reference
    assert_eq!(ranked, naive::rank_lines(&lines));
}

#[test]
fn rerun_is_stable_across_partitioning() {
    let tmp = tempfile::tempdir().unwrap();
    let lines = synthetic_lines(800, 42);
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let input = write_input(tmp.path(), "trades.csv", &refs);

    let first = run_job(tmp.path(), &input, test_config(tmp.path(), 1, 1 << 20));
    let second = run_job(tmp.path(), &input, test_config(tmp.path(), 5, 100));
    assert_eq!(first, second);
}

#[test]
fn only_the_first_file_of_the_dataset_has_a_header() {
    let tmp = tempfile::tempdir().unwrap();
    write_input(tmp.path(), "a.csv", &["h,h,h,CODE", "1,2,3,FOO"]);
    let input = write_input(tmp.path(), "b.csv", &["1,2,3,FOO", "1,2,3,BAR"]);
    let ranked = run_job(tmp.path(), &input, test_config(tmp.path(), 2, 1024));
    assert_eq!(render(&ranked), vec!["1:FOO,2", "2:BAR,1"]);

    let files = list_input_files(&input).unwrap();
    assert_eq!(ranked, naive::rank_files(&files).unwrap());
}

#[test]
fn empty_first_file_does_not_let_the_header_through() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("input");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("a.csv"), "").unwrap();
    fs::write(dir.join("b.csv"), "date,side,qty,code\n1,2,3,FOO\n").unwrap();

    let ranked = run_job(tmp.path(), &dir, test_config(tmp.path(), 2, 1024));
    assert_eq!(render(&ranked), vec!["1:FOO,1"]);
    assert_eq!(ranked, naive::rank_files(&list_input_files(&dir).unwrap()).unwrap());
}

#[test]
fn output_with_trailing_separator_keeps_intermediates_beside_it() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path(), "trades.csv", &["h,h,h,h", "1,2,3,FOO", "1,2,3,BAR", "1,2,3,FOO"]);
    let output = format!("{}/out/", tmp.path().display());

    let job = StockCodeRankJob::new(&input, &output).with_config(test_config(tmp.path(), 2, 1024));
    job.run().unwrap();

    assert_eq!(job.intermediate_dir().unwrap(), tmp.path().join("out__codecnt"));
    assert!(tmp.path().join("out__codecnt").join(SUCCESS_MARKER).is_file());
    let out = tmp.path().join("out");
    assert_eq!(render(&read_ranked(&out)), vec!["1:FOO,2", "2:BAR,1"]);
    let mut entries: Vec<String> = fs::read_dir(&out).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
    entries.sort();
    assert_eq!(entries, vec!["_SUCCESS".to_string(), "part-00000".to_string()]);
}

#[test]
fn intermediate_dataset_holds_code_and_count_lines() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path(), "trades.csv", &["h,h,h,h", "1,2,3,FOO", "1,2,3,BAR", "1,2,3,FOO"]);
    let job = StockCodeRankJob::new(&input, tmp.path().join("out")).with_config(test_config(tmp.path(), 3, 1024));
    job.run().unwrap();

    let counts_dir = job.intermediate_dir().unwrap();
    assert!(counts_dir.join(SUCCESS_MARKER).is_file());
    let mut counts: HashMap<String, u64> = HashMap::new();
    for file in list_input_files(&counts_dir).unwrap() {
        for line in fs::read_to_string(file).unwrap().lines() {
            assert!(line.contains('\t'), "{line:?}");
            let entry = parse_count_line(line).unwrap().unwrap();
            counts.insert(entry.code, entry.count);
        }
    }
    assert_eq!(counts, HashMap::from([("FOO".to_string(), 2), ("BAR".to_string(), 1)]));
}

#[test]
fn rank_phase_refuses_uncommitted_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let counts_dir = tmp.path().join("counts");
    fs::create_dir_all(&counts_dir).unwrap();
    fs::write(counts_dir.join("part-00000"), "FOO\t2\n").unwrap();

    let output = tmp.path().join("out");
    let job = StockCodeRankJob::new(tmp.path().join("unused"), &output).with_config(test_config(tmp.path(), 1, 1024));
    assert!(job.rank_codes(&counts_dir).is_err());
    assert!(!output.exists());

    fs::write(counts_dir.join(SUCCESS_MARKER), "").unwrap();
    job.rank_codes(&counts_dir).unwrap();
    assert_eq!(render(&read_ranked(&output)), vec!["1:FOO,2"]);
}

#[test]
fn corrupt_count_aborts_without_output() {
    let tmp = tempfile::tempdir().unwrap();
    let counts_dir = tmp.path().join("counts");
    fs::create_dir_all(&counts_dir).unwrap();
    fs::write(counts_dir.join("part-00000"), "FOO\t2\nskipped line with tokens\nBAR\tlots\n").unwrap();
    fs::write(counts_dir.join(SUCCESS_MARKER), "").unwrap();

    let output = tmp.path().join("out");
    let job = StockCodeRankJob::new(tmp.path().join("unused"), &output).with_config(test_config(tmp.path(), 1, 1024));
    let err = job.rank_codes(&counts_dir).unwrap_err();
    assert!(format!("{err:#}").contains("lots"), "{err:#}");
    assert!(!output.exists());
}

#[test]
fn empty_dataset_yields_empty_ranking() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path(), "trades.csv", &["date,side,qty,code"]);
    let ranked = run_job(tmp.path(), &input, test_config(tmp.path(), 2, 1024));
    assert!(ranked.is_empty());
}
