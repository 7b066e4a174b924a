//! Realtime tick processor: bounded queue, worker pool, validation,
//! cache publication and batched persistence.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::ProcessorConfig;
use crate::error::ProcessError;
use crate::events::{Event, Snapshot, TickEvent, TickKind};

use super::buffer::TickBuffer;
use super::cache::CacheStore;
use super::store::TickStore;

#[derive(Clone, Debug, Default)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Clone, Debug, Default)]
pub struct ProcessorStats {
    pub received: u64,
    pub processed: HashMap<TickKind, u64>,
    pub dropped: u64,
    pub validation_failures: u64,
    pub queue_depth: usize,
    pub buffered: usize,
    pub latency: LatencyStats,
}

#[derive(Default)]
struct StatsInner {
    received: u64,
    processed: HashMap<TickKind, u64>,
    dropped: u64,
    validation_failures: u64,
    latencies_ms: VecDeque<f64>,
}

/// Fan-in point for all ticks leaving the feed. `submit` never blocks:
/// when the queue is full the tick is dropped and counted. Ticks are
/// routed to a worker by symbol hash so one symbol's stream is always
/// handled by one worker, in arrival order.
#[derive(Clone)]
pub struct RealtimeProcessor {
    config: ProcessorConfig,
    senders: Vec<mpsc::Sender<TickEvent>>,
    receivers: Arc<Mutex<Vec<mpsc::Receiver<TickEvent>>>>,
    buffer: Arc<TickBuffer>,
    cache: Arc<dyn CacheStore>,
    bus: EventBus,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<StatsInner>>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RealtimeProcessor {
    pub fn new(
        config: ProcessorConfig,
        store: Arc<dyn TickStore>,
        cache: Arc<dyn CacheStore>,
        bus: EventBus,
    ) -> Self {
        let workers = config.workers.max(1);
        let per_queue = (config.queue_size / workers).max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut receivers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel(per_queue);
            senders.push(tx);
            receivers.push(rx);
        }
        let buffer = Arc::new(TickBuffer::new(store, &config));
        Self {
            config,
            senders,
            receivers: Arc::new(Mutex::new(receivers)),
            buffer,
            cache,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(StatsInner::default())),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.handles.lock().await;
        let receivers: Vec<_> = self.receivers.lock().await.drain(..).collect();
        for (worker_id, rx) in receivers.into_iter().enumerate() {
            let me = self.clone();
            handles.push(tokio::spawn(async move {
                me.worker_loop(worker_id, rx).await;
            }));
        }
        let me = self.clone();
        handles.push(tokio::spawn(async move {
            me.monitor_loop().await;
        }));
        info!("[PROCESSOR] Started with {} workers", self.config.workers);
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.await.ok();
        }
        // Drain whatever the workers left behind.
        self.buffer.flush().await;
        info!("[PROCESSOR] Stopped");
    }

    /// Enqueues a tick for processing. Drop-on-full by design of the hot
    /// path: a slow store must never back up into the feed callback.
    pub async fn submit(&self, tick: TickEvent) -> Result<(), ProcessError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ProcessError::NotRunning);
        }
        {
            let mut stats = self.stats.lock().await;
            stats.received += 1;
        }
        let shard = shard_for(tick.symbol(), self.senders.len());
        match self.senders[shard].try_send(tick) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let mut stats = self.stats.lock().await;
                stats.dropped += 1;
                if stats.dropped % 1000 == 1 {
                    warn!("[PROCESSOR] Queue full, {} ticks dropped so far", stats.dropped);
                }
                Err(ProcessError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ProcessError::NotRunning),
        }
    }

    pub async fn force_flush(&self) {
        self.buffer.flush().await;
    }

    pub async fn stats(&self) -> ProcessorStats {
        let inner = self.stats.lock().await;
        let mut sorted: Vec<f64> = inner.latencies_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let latency = if sorted.is_empty() {
            LatencyStats::default()
        } else {
            let pct = |p: f64| {
                let idx = ((sorted.len() as f64 * p).ceil() as usize).min(sorted.len()) - 1;
                sorted[idx]
            };
            LatencyStats {
                avg_ms: sorted.iter().sum::<f64>() / sorted.len() as f64,
                min_ms: sorted[0],
                max_ms: sorted[sorted.len() - 1],
                p95_ms: pct(0.95),
                p99_ms: pct(0.99),
            }
        };
        ProcessorStats {
            received: inner.received,
            processed: inner.processed.clone(),
            dropped: inner.dropped,
            validation_failures: inner.validation_failures,
            queue_depth: self
                .senders
                .iter()
                .map(|tx| tx.max_capacity() - tx.capacity())
                .sum(),
            buffered: self.buffer.pending().await,
            latency,
        }
    }

    async fn worker_loop(&self, worker_id: usize, mut rx: mpsc::Receiver<TickEvent>) {
        debug!("[PROCESSOR] Worker {} started", worker_id);
        while self.running.load(Ordering::SeqCst) {
            let tick = match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Some(tick)) => tick,
                Ok(None) => break,
                Err(_) => continue, // re-check the running flag
            };
            let started = Instant::now();
            self.process_tick(tick).await;
            self.record_latency(started.elapsed()).await;
        }
        debug!("[PROCESSOR] Worker {} stopped", worker_id);
    }

    async fn process_tick(&self, tick: TickEvent) {
        if let Err(reason) = validate(&tick) {
            let mut stats = self.stats.lock().await;
            stats.validation_failures += 1;
            warn!(
                "[PROCESSOR] Dropped invalid {:?} for {}: {}",
                tick.kind(),
                tick.symbol(),
                reason
            );
            return;
        }

        if let TickEvent::Snapshot(snapshot) = &tick {
            self.publish_snapshot(snapshot).await;
        }

        let kind = tick.kind();
        self.buffer.push(tick.clone()).await;
        self.bus.publish(Event::Tick(tick)).ok();

        let mut stats = self.stats.lock().await;
        *stats.processed.entry(kind).or_insert(0) += 1;
    }

    async fn publish_snapshot(&self, snapshot: &Snapshot) {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if let Ok(value) = serde_json::to_value(snapshot) {
            self.cache
                .set(&format!("snapshot:{}", snapshot.symbol), value, ttl)
                .await
                .ok();
        }
        self.cache
            .set(
                &format!("latest_price:{}", snapshot.symbol),
                json!(snapshot.last_price.to_string()),
                ttl,
            )
            .await
            .ok();
    }

    async fn record_latency(&self, elapsed: Duration) {
        let mut stats = self.stats.lock().await;
        if stats.latencies_ms.len() >= self.config.latency_window {
            stats.latencies_ms.pop_front();
        }
        stats.latencies_ms.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    // Sleeps in short slices so `stop` is never held up by a long interval.
    async fn sleep_while_running(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while remaining > Duration::ZERO && self.running.load(Ordering::SeqCst) {
            let step = remaining.min(Duration::from_millis(200));
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        self.running.load(Ordering::SeqCst)
    }

    async fn monitor_loop(&self) {
        let interval = Duration::from_secs_f64(self.config.monitor_interval_secs);
        while self.running.load(Ordering::SeqCst) {
            if !self.sleep_while_running(interval).await {
                break;
            }
            let stats = self.stats().await;
            info!(
                "[MONITOR] received={} processed={:?} dropped={} invalid={} queue={} buffered={} avg={:.2}ms p99={:.2}ms",
                stats.received,
                stats.processed,
                stats.dropped,
                stats.validation_failures,
                stats.queue_depth,
                stats.buffered,
                stats.latency.avg_ms,
                stats.latency.p99_ms,
            );
            let purged = self.cache.purge_expired().await;
            if purged > 0 {
                debug!("[MONITOR] Purged {} expired cache entries", purged);
            }
        }
    }
}

/// Stable symbol-to-worker routing; the same symbol always lands on the
/// same queue so its ticks keep their arrival order.
fn shard_for(symbol: &str, shards: usize) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    symbol.hash(&mut hasher);
    (hasher.finish() as usize) % shards.max(1)
}

pub(crate) fn validate(tick: &TickEvent) -> Result<(), &'static str> {
    if tick.symbol().len() < 6 {
        return Err("symbol too short");
    }
    match tick {
        TickEvent::Snapshot(s) => {
            if s.last_price <= rust_decimal::Decimal::ZERO {
                return Err("non-positive last price");
            }
        }
        TickEvent::Transaction(t) => {
            if t.price <= rust_decimal::Decimal::ZERO {
                return Err("non-positive price");
            }
            if t.volume == 0 {
                return Err("zero volume");
            }
        }
        TickEvent::Order(o) => {
            if o.price <= rust_decimal::Decimal::ZERO {
                return Err("non-positive price");
            }
            if o.volume == 0 {
                return Err("zero volume");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) use validate as validate_tick;
