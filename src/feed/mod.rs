//! Feed seam: the vendor market-data connection the pipeline consumes.
//!
//! The core never depends on a concrete vendor type; it talks to
//! [`FeedConnection`] and receives ticks over a channel handed to the feed
//! at construction.

pub mod mock;

use async_trait::async_trait;

use crate::error::FeedError;
use crate::events::TickKind;

pub use mock::{FeedSignal, MockFeed};

/// Point-in-time view of the underlying connection, polled by the
/// connection manager's health check.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeedStatus {
    pub is_connected: bool,
    pub is_logged_in: bool,
}

pub type FeedResult<T> = Result<T, FeedError>;

/// One logical vendor connection. `start`/`stop` bound the session;
/// `subscribe` registers interest per tick kind. Ticks and connect/login
/// signals are delivered out-of-band (channel/callbacks), not returned here.
#[async_trait]
pub trait FeedConnection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(&self) -> FeedResult<()>;

    async fn stop(&self);

    async fn subscribe(&self, symbols: &[String], kind: TickKind) -> FeedResult<()>;

    async fn unsubscribe(&self, symbols: &[String], kind: TickKind) -> FeedResult<()>;

    fn status(&self) -> FeedStatus;
}
