//! Async compute side: task queue, worker pool, result fan-out and the
//! incremental result cache.

pub mod cache;
pub mod compute;

pub use cache::{CacheStats, IncrementalCache};
pub use compute::{
    ComputeEngine, ComputeResult, ComputeStats, ComputeTask, ResultKind, ResultPayload,
};
