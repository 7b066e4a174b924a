//! Error types for the market-data pipeline
//!
//! One enum per fault family so callers can match on the class of failure
//! instead of string-probing a boxed error.

use thiserror::Error;

use crate::events::TickKind;

/// Connection-level faults, handled by the reconnect state machine.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Feed connect failed: {0}")]
    ConnectFailed(String),

    #[error("Authentication failed (code {code}): {reason}")]
    AuthFailed { code: i32, reason: String },

    #[error("Subscribe failed for {kind:?}: {reason}")]
    SubscribeFailed { kind: TickKind, reason: String },

    #[error("Feed is not connected")]
    NotConnected,

    #[error("Feed error: {0}")]
    Other(String),
}

/// Tick validation / ingestion faults. Dropped locally, never propagated
/// past the processor worker.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Invalid {kind:?} for {symbol}: {reason}")]
    Validation {
        kind: TickKind,
        symbol: String,
        reason: String,
    },

    #[error("Processing queue is full, tick dropped")]
    QueueFull,

    #[error("Processor is not running")]
    NotRunning,
}

/// Persistence faults. The buffer keeps its data and retries on the next
/// flush cycle.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Batch write failed: {0}")]
    WriteFailed(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Compute-engine faults, caught at the task boundary and counted as a
/// failed task.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Task queue is full")]
    QueueFull,

    #[error("Missing previous close for {0}")]
    MissingPrevClose(String),

    #[error("Engine is not running")]
    NotRunning,

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

/// Configuration loading faults.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}
