//! Durable-store seam for batched tick writes.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::events::{OrderEvent, Snapshot, Transaction};

pub type StoreResult<T> = Result<T, StoreError>;

/// Batch sink for validated ticks. Implementations must treat each call as
/// all-or-nothing: on `Err` the caller keeps the batch and retries later.
#[async_trait]
pub trait TickStore: Send + Sync {
    async fn write_snapshots(&self, batch: &[Snapshot]) -> StoreResult<()>;
    async fn write_transactions(&self, batch: &[Transaction]) -> StoreResult<()>;
    async fn write_orders(&self, batch: &[OrderEvent]) -> StoreResult<()>;
}

/// In-process store backing the binary and the tests.
#[derive(Default)]
pub struct MemoryTickStore {
    snapshots: Mutex<Vec<Snapshot>>,
    transactions: Mutex<Vec<Transaction>>,
    orders: Mutex<Vec<OrderEvent>>,
}

impl MemoryTickStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    pub async fn transaction_count(&self) -> usize {
        self.transactions.lock().await.len()
    }

    pub async fn order_count(&self) -> usize {
        self.orders.lock().await.len()
    }
}

#[async_trait]
impl TickStore for MemoryTickStore {
    async fn write_snapshots(&self, batch: &[Snapshot]) -> StoreResult<()> {
        self.snapshots.lock().await.extend_from_slice(batch);
        debug!("[STORE] Wrote {} snapshots", batch.len());
        Ok(())
    }

    async fn write_transactions(&self, batch: &[Transaction]) -> StoreResult<()> {
        self.transactions.lock().await.extend_from_slice(batch);
        debug!("[STORE] Wrote {} transactions", batch.len());
        Ok(())
    }

    async fn write_orders(&self, batch: &[OrderEvent]) -> StoreResult<()> {
        self.orders.lock().await.extend_from_slice(batch);
        debug!("[STORE] Wrote {} orders", batch.len());
        Ok(())
    }
}
