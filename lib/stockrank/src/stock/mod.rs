//! Stock code frequency ranking: count lines per stock code, then rank codes by
//! descending count.

pub mod count;
pub mod job;
pub mod naive;
pub mod parser;
pub mod rank;
pub mod types;

pub use count::{merge_counts, CountCombiner, CountReducer};
pub use job::{RankReport, StockCodeRankJob};
pub use parser::{parse_stock_code, StockCodeMapper};
pub use rank::{parse_count_line, DescendingCount, RankAssigner, RankPivotMapper, DESCENDING_COUNT};
pub use types::{CountEntry, PivotEntry, RankedEntry, StockCode};
