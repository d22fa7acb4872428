pub mod api;
pub mod config;
pub mod io;
pub mod runtime;
pub mod sort;
pub mod stats;
pub mod stock;
pub mod writer;

pub use api::{Combiner, ExecutablePipeline, KeyOrder, Mapper, NaturalOrder, NoCombiner, Reducer, Reverse};
pub use config::RuntimeConfig;
pub use io::HeaderPolicy;
pub use runtime::RuntimePipeline;
pub use stats::JobStats;
