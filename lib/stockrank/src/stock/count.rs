use super::types::{CountEntry, StockCode};
use crate::api::{Combiner, Reducer};
use anyhow::Result;
use std::collections::HashMap;

/// Sum of per-code increments. Used map-side on partial data and again in the reducer.
#[derive(Clone, Copy, Debug, Default)]
pub struct CountCombiner;

impl Combiner for CountCombiner {
    type Key = StockCode;
    type Value = u64;

    fn combine(&self, _key: &StockCode, acc: &mut u64, next: u64) {
        *acc += next;
    }
}

/// Phase 1 reducer: one [`CountEntry`] per distinct code.
#[derive(Clone, Copy, Debug, Default)]
pub struct CountReducer;

impl Reducer for CountReducer {
    type Key = StockCode;
    type ValueIn = u64;
    type Out = CountEntry;

    fn do_reduce<I, F>(&mut self, key: &Self::Key, values: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out),
    {
        let mut count = 0u64;
        for v in values {
            CountCombiner.combine(key, &mut count, v);
        }
        emit(CountEntry { code: key.clone(), count });
        Ok(())
    }
}

/// Folds `from` into `into` key by key.
pub fn merge_counts(into: &mut HashMap<StockCode, u64>, from: HashMap<StockCode, u64>) {
    for (code, n) in from {
        match into.get_mut(&code) {
            Some(acc) => CountCombiner.combine(&code, acc, n),
            None => { into.insert(code, n); }
        }
    }
}
