//! breakwatch: realtime tick ingestion with limit-up break detection and
//! symbol recommendations.
//!
//! The pipeline runs feed -> connection supervision -> validation and
//! persistence -> analysis -> recommendations, with an event bus carrying
//! validated ticks and break events between the stages.

pub mod analytics;
pub mod bus;
pub mod config;
pub mod connection;
pub mod data;
pub mod engine;
pub mod error;
pub mod events;
pub mod feed;
pub mod service;

pub use analytics::{BreakEvent, LimitUpAnalyzer, Recommendation, RiskLevel};
pub use bus::EventBus;
pub use config::AppConfig;
pub use connection::{ConnectionManager, ConnectionPool, ConnectionState};
pub use data::{MemoryTickStore, MemoryTtlCache, RealtimeProcessor};
pub use engine::{ComputeEngine, ComputeTask};
pub use error::{ComputeError, ConfigError, FeedError, ProcessError, StoreError};
pub use events::{Event, Snapshot, TickEvent, TickKind};
pub use feed::{FeedConnection, FeedSignal, MockFeed};
pub use service::MarketDataService;
