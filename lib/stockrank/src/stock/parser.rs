use super::types::StockCode;
use crate::api::Mapper;
use anyhow::Result;

/// Data lines have exactly this many comma-separated fields.
pub const FIELD_COUNT: usize = 4;
/// Zero-based position of the stock code.
pub const CODE_FIELD: usize = 3;

/// The stock code of one data line, or `None` when the line is not eligible:
/// wrong field count or a blank code. Ineligible lines are dropped, never reported.
pub fn parse_stock_code(line: &str) -> Option<StockCode> {
    let mut fields = line.split(',');
    let code = fields.nth(CODE_FIELD)?;
    if fields.next().is_some() {
        return None;
    }
    let code = code.trim();
    (!code.is_empty()).then(|| code.to_string())
}

/// Phase 1 mapper: `(code, 1)` per eligible line. Header handling lives in the input
/// policy of the pipeline, not here.
pub struct StockCodeMapper;

impl Mapper for StockCodeMapper {
    type Input = String;
    type Key = StockCode;
    type Value = u64;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        for line in input {
            if let Some(code) = parse_stock_code(&line) {
                emit(code, 1);
            }
        }
        Ok(())
    }
}
