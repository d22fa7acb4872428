use super::types::{PivotEntry, RankedEntry, StockCode};
use crate::api::{Mapper, NaturalOrder, Reducer, Reverse};
use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Highest count first. Equal counts compare equal and land in one reduce group.
pub type DescendingCount = Reverse<NaturalOrder>;
pub const DESCENDING_COUNT: DescendingCount = Reverse(NaturalOrder);

fn token_separator() -> &'static Regex {
    static SEP: OnceLock<Regex> = OnceLock::new();
    SEP.get_or_init(|| Regex::new(r"[,\s]+").expect("valid separator pattern"))
}

/// Reads one `code<sep>count` line of the intermediate dataset, where `<sep>` is any run of
/// commas and whitespace.
///
/// Lines that do not hold exactly two tokens are skipped (`Ok(None)`). A second token that is
/// not a count means the intermediate data is corrupt and is an error.
pub fn parse_count_line(line: &str) -> Result<Option<PivotEntry>> {
    let tokens: Vec<&str> = token_separator().split(line.trim()).filter(|t| !t.is_empty()).collect();
    let &[code, count] = tokens.as_slice() else {
        return Ok(None);
    };
    let count: u64 = count.parse().with_context(|| format!("bad count {:?} in line {:?}", count, line))?;
    Ok(Some(PivotEntry { count, code: code.to_string() }))
}

/// Phase 2 mapper: `(code, count)` lines become `(count, code)` pairs.
pub struct RankPivotMapper;

impl Mapper for RankPivotMapper {
    type Input = String;
    type Key = u64;
    type Value = StockCode;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        for line in input {
            if let Some(PivotEntry { count, code }) = parse_count_line(&line)? {
                emit(count, code);
            }
        }
        Ok(())
    }
}

/// Phase 2 reducer. Walks count groups in descending order and hands out ranks 1, 2, 3, ...
/// with no gaps and no shared ranks. Codes tied on a count are ranked in lexicographic order.
#[derive(Clone, Debug)]
pub struct RankAssigner {
    next_rank: u64,
}

impl Default for RankAssigner {
    fn default() -> Self { Self { next_rank: 1 } }
}

impl Reducer for RankAssigner {
    type Key = u64;
    type ValueIn = StockCode;
    type Out = RankedEntry;

    fn do_reduce<I, F>(&mut self, count: &u64, codes: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out),
    {
        let mut codes: Vec<StockCode> = codes.into_iter().collect();
        codes.sort_unstable();
        for code in codes {
            emit(RankedEntry { rank: self.next_rank, code, count: *count });
            self.next_rank += 1;
        }
        Ok(())
    }

    fn requires_total_order(&self) -> bool { true }
}
