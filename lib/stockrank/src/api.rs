use crate::stats::JobStats;
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt::Display;
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::PathBuf;

// ========== Core MapReduce traits ==========

/// A mapper sees the lines of one input split. Returning an error aborts the whole job.
pub trait Mapper {
    type Input: Send + 'static;
    type Key: Send + Sync + Serialize + DeserializeOwned + Hash + Eq + Clone + 'static;
    type Value: Send + Sync + Serialize + DeserializeOwned + Clone + 'static;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value);
}

/// Map-side pre-aggregation. `combine` must be associative and commutative: the runtime
/// folds values for the same key in whatever order they arrive within a map task, and the
/// reducer later merges the partials coming from every task.
pub trait Combiner {
    type Key;
    type Value;

    fn combine(&self, key: &Self::Key, acc: &mut Self::Value, next: Self::Value);
}

/// Reducer produces typed output records per grouped key.
/// Each reduce partition works on its own clone, so a reducer may carry state across groups.
pub trait Reducer {
    type Key;
    type ValueIn;
    type Out: Display;

    fn do_reduce<I, F>(&mut self, key: &Self::Key, values: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out);

    /// When true the runtime runs a single reduce partition, so this reducer observes
    /// every group of the job in one global key order.
    fn requires_total_order(&self) -> bool { false }
}

/// Sort comparator over intermediate keys. Adjacent keys comparing `Equal` form one reduce group.
pub trait KeyOrder<K> {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NaturalOrder;

impl<K: Ord> KeyOrder<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering { a.cmp(b) }
}

/// Inverts another order.
#[derive(Clone, Copy, Debug, Default)]
pub struct Reverse<O>(pub O);

impl<K, O: KeyOrder<K>> KeyOrder<K> for Reverse<O> {
    fn compare(&self, a: &K, b: &K) -> Ordering { self.0.compare(b, a) }
}

/// Placeholder combiner type for jobs that shuffle raw map output. It cannot be constructed.
pub enum NoCombiner<K, V> {
    #[doc(hidden)]
    Never(Infallible, PhantomData<fn() -> (K, V)>),
}

impl<K, V> Combiner for NoCombiner<K, V> {
    type Key = K;
    type Value = V;

    fn combine(&self, _key: &K, _acc: &mut V, _next: V) {
        match self {
            NoCombiner::Never(never, _) => match *never {},
        }
    }
}

// ========== Executable pipeline interface ==========

pub trait ExecutablePipeline {
    fn add_input(&mut self, input_path: impl Into<PathBuf>);
    fn add_output(&mut self, output_path: impl Into<PathBuf>);

    /// Full form: optional combiner and an explicit key order for the shuffle sort.
    fn map_reduce_sorted<M, C, R, O>(&mut self, mapper: M, combiner: Option<C>, reducer: R, order: O) -> Result<JobStats>
    where
        M: Mapper<Input = String> + Sync,
        C: Combiner<Key = M::Key, Value = M::Value> + Sync,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Clone + Send + Sync,
        O: KeyOrder<M::Key> + Sync;

    fn map_reduce<M, R>(&mut self, mapper: M, reducer: R) -> Result<JobStats>
    where
        M: Mapper<Input = String> + Sync,
        M::Key: Ord,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Clone + Send + Sync,
    {
        self.map_reduce_sorted(mapper, None::<NoCombiner<M::Key, M::Value>>, reducer, NaturalOrder)
    }

    fn map_combine_reduce<M, C, R>(&mut self, mapper: M, combiner: C, reducer: R) -> Result<JobStats>
    where
        M: Mapper<Input = String> + Sync,
        M::Key: Ord,
        C: Combiner<Key = M::Key, Value = M::Value> + Sync,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Clone + Send + Sync,
    {
        self.map_reduce_sorted(mapper, Some(combiner), reducer, NaturalOrder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_inverts_natural_order() {
        let desc = Reverse(NaturalOrder);
        assert_eq!(desc.compare(&5u64, &3u64), Ordering::Less);
        assert_eq!(desc.compare(&3u64, &5u64), Ordering::Greater);
        assert_eq!(desc.compare(&4u64, &4u64), Ordering::Equal);

        let mut keys = vec![2u64, 9, 4, 9, 1];
        keys.sort_by(|a, b| desc.compare(a, b));
        assert_eq!(keys, vec![9, 9, 4, 2, 1]);
    }
}
