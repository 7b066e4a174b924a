//! Write-behind batching in front of the tick store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::config::ProcessorConfig;
use crate::events::{OrderEvent, Snapshot, TickEvent, Transaction};

use super::store::TickStore;

/// Accumulates validated ticks and flushes them to the store when either
/// the combined batch size or the flush interval is reached. Buffers are
/// only drained after a successful write, so a failed flush leaves the
/// batch in place for the next attempt.
pub struct TickBuffer {
    store: Arc<dyn TickStore>,
    batch_size: usize,
    flush_interval: Duration,

    snapshots: Mutex<Vec<Snapshot>>,
    transactions: Mutex<Vec<Transaction>>,
    orders: Mutex<Vec<OrderEvent>>,
    last_flush: Mutex<Instant>,
    // Serializes clone-write-drain so two workers (or a worker and a
    // force-flush) never write the same batch twice or drain past what
    // they cloned.
    flush_gate: Mutex<()>,
}

impl TickBuffer {
    pub fn new(store: Arc<dyn TickStore>, config: &ProcessorConfig) -> Self {
        Self {
            store,
            batch_size: config.batch_size,
            flush_interval: Duration::from_secs_f64(config.flush_interval_secs),
            snapshots: Mutex::new(Vec::new()),
            transactions: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
            flush_gate: Mutex::new(()),
        }
    }

    pub async fn push(&self, tick: TickEvent) {
        match tick {
            TickEvent::Snapshot(s) => self.snapshots.lock().await.push(s),
            TickEvent::Transaction(t) => self.transactions.lock().await.push(t),
            TickEvent::Order(o) => self.orders.lock().await.push(o),
        }
        self.maybe_flush().await;
    }

    pub async fn pending(&self) -> usize {
        self.snapshots.lock().await.len()
            + self.transactions.lock().await.len()
            + self.orders.lock().await.len()
    }

    async fn maybe_flush(&self) {
        let due = {
            let last = self.last_flush.lock().await;
            last.elapsed() >= self.flush_interval
        };
        if due || self.pending().await >= self.batch_size {
            self.flush().await;
        }
    }

    /// Flushes all three buffers. Each kind flushes independently so a
    /// failure in one does not hold back the others.
    pub async fn flush(&self) {
        let _gate = self.flush_gate.lock().await;
        *self.last_flush.lock().await = Instant::now();

        let batch: Vec<Snapshot> = self.snapshots.lock().await.clone();
        if !batch.is_empty() {
            match self.store.write_snapshots(&batch).await {
                Ok(()) => {
                    // New ticks may have arrived while writing; only drop
                    // what was actually written.
                    self.snapshots.lock().await.drain(..batch.len());
                    debug!("[BUFFER] Flushed {} snapshots", batch.len());
                }
                Err(e) => error!("[BUFFER] Snapshot flush failed, keeping batch: {}", e),
            }
        }

        let batch: Vec<Transaction> = self.transactions.lock().await.clone();
        if !batch.is_empty() {
            match self.store.write_transactions(&batch).await {
                Ok(()) => {
                    self.transactions.lock().await.drain(..batch.len());
                    debug!("[BUFFER] Flushed {} transactions", batch.len());
                }
                Err(e) => error!("[BUFFER] Transaction flush failed, keeping batch: {}", e),
            }
        }

        let batch: Vec<OrderEvent> = self.orders.lock().await.clone();
        if !batch.is_empty() {
            match self.store.write_orders(&batch).await {
                Ok(()) => {
                    self.orders.lock().await.drain(..batch.len());
                    debug!("[BUFFER] Flushed {} orders", batch.len());
                }
                Err(e) => error!("[BUFFER] Order flush failed, keeping batch: {}", e),
            }
        }
    }
}
