//! Ingestion side of the pipeline: validation, batching, persistence seams
//! and the latest-value cache.

pub mod buffer;
pub mod cache;
pub mod processor;
pub mod store;

pub use buffer::TickBuffer;
pub use cache::{CacheStore, MemoryTtlCache};
pub use processor::{ProcessorStats, RealtimeProcessor};
pub use store::{MemoryTickStore, TickStore};
