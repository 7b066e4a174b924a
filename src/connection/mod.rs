//! Connection lifecycle: reconnect state machine, health/quality
//! monitoring and the multi-connection pool.

pub mod manager;
pub mod pool;

pub use manager::{
    ConnectionEvent, ConnectionEventKind, ConnectionManager, ConnectionState, ConnectionStatus,
};
pub use pool::ConnectionPool;

#[cfg(test)]
mod manager_tests;
