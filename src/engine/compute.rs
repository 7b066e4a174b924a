//! Async compute engine: bounded task queue, worker pool, result cache
//! and per-kind result callbacks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analytics::{
    BreakEvent, EventFilter, EventSorter, LimitUpAnalyzer, Recommendation, RecommendationEngine,
};
use crate::bus::EventBus;
use crate::config::{EngineConfig, FilterConfig, RecommenderConfig};
use crate::error::ComputeError;
use crate::events::{Event, Snapshot};

use super::cache::IncrementalCache;

#[derive(Clone, Debug)]
pub enum ComputeTask {
    AnalyzeSnapshot {
        snapshot: Snapshot,
    },
    GenerateRecommendations {
        filter_preset: Option<String>,
        sort_preset: Option<String>,
        limit: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Analysis,
    Recommendations,
}

#[derive(Clone, Debug)]
pub enum ResultPayload {
    Analysis(Option<BreakEvent>),
    Recommendations(Vec<Recommendation>),
}

#[derive(Clone, Debug)]
pub struct ComputeResult {
    pub task_id: String,
    pub kind: ResultKind,
    pub symbol: Option<String>,
    pub payload: ResultPayload,
    pub compute_ms: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct ComputeStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub queue_depth: usize,
    pub active_workers: usize,
    pub avg_compute_ms: f64,
}

struct Envelope {
    task_id: String,
    task: ComputeTask,
}

#[derive(Default)]
struct StatsInner {
    submitted: u64,
    completed: u64,
    failed: u64,
    cache_hits: u64,
    compute_ms: VecDeque<f64>,
}

type ResultCallback = Arc<dyn Fn(&ComputeResult) -> Result<(), ComputeError> + Send + Sync>;

/// Runs analysis and recommendation tasks off the hot path. Fresh analysis
/// results are served from cache instead of being recomputed.
#[derive(Clone)]
pub struct ComputeEngine {
    config: EngineConfig,
    analyzer: Arc<LimitUpAnalyzer>,
    filter_config: FilterConfig,
    recommender: Arc<RecommendationEngine>,
    bus: EventBus,

    task_txs: Vec<mpsc::Sender<Envelope>>,
    task_rxs: Arc<Mutex<Vec<mpsc::Receiver<Envelope>>>>,
    next_shard: Arc<AtomicUsize>,
    result_tx: mpsc::Sender<ComputeResult>,
    result_rx: Arc<Mutex<mpsc::Receiver<ComputeResult>>>,

    cache: IncrementalCache<ComputeResult>,
    callbacks: Arc<Mutex<HashMap<ResultKind, Vec<ResultCallback>>>>,

    running: Arc<AtomicBool>,
    active_workers: Arc<AtomicUsize>,
    stats: Arc<Mutex<StatsInner>>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ComputeEngine {
    pub fn new(
        config: EngineConfig,
        analyzer: Arc<LimitUpAnalyzer>,
        filter_config: FilterConfig,
        recommender_config: RecommenderConfig,
        bus: EventBus,
    ) -> Self {
        let workers = config.workers.max(1);
        let per_queue = (config.queue_size / workers).max(1);
        let mut task_txs = Vec::with_capacity(workers);
        let mut task_rxs = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel(per_queue);
            task_txs.push(tx);
            task_rxs.push(rx);
        }
        let (result_tx, result_rx) = mpsc::channel(config.queue_size);
        let cache = IncrementalCache::new(config.cache.clone());
        Self {
            config,
            analyzer,
            filter_config,
            recommender: Arc::new(RecommendationEngine::new(recommender_config)),
            bus,
            task_txs,
            task_rxs: Arc::new(Mutex::new(task_rxs)),
            next_shard: Arc::new(AtomicUsize::new(0)),
            result_tx,
            result_rx: Arc::new(Mutex::new(result_rx)),
            cache,
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            active_workers: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(Mutex::new(StatsInner::default())),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cache.start().await;
        let mut handles = self.handles.lock().await;
        let receivers: Vec<_> = self.task_rxs.lock().await.drain(..).collect();
        for (worker_id, rx) in receivers.into_iter().enumerate() {
            let me = self.clone();
            handles.push(tokio::spawn(async move {
                me.worker_loop(worker_id, rx).await;
            }));
        }
        let me = self.clone();
        handles.push(tokio::spawn(async move {
            me.result_loop().await;
        }));
        let me = self.clone();
        handles.push(tokio::spawn(async move {
            me.stats_loop().await;
        }));
        info!("[ENGINE] Started with {} workers", self.config.workers);
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.await.ok();
        }
        self.cache.stop().await;
        info!("[ENGINE] Stopped");
    }

    /// Registers a callback invoked for every result of the given kind.
    pub async fn on_result<F>(&self, kind: ResultKind, callback: F)
    where
        F: Fn(&ComputeResult) -> Result<(), ComputeError> + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .await
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Enqueues a task. Analysis tasks with a fresh cached result short-
    /// circuit and return the cached task id.
    pub async fn submit(&self, task: ComputeTask) -> Result<String, ComputeError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ComputeError::NotRunning);
        }

        let freshness = Duration::from_secs(self.config.analysis_freshness_secs);
        let (cache_key, shard) = match &task {
            ComputeTask::AnalyzeSnapshot { snapshot } => (
                format!("analysis:{}", snapshot.symbol),
                // Same symbol, same worker: snapshots must reach the
                // analyzer in arrival order.
                shard_for(&snapshot.symbol, self.task_txs.len()),
            ),
            ComputeTask::GenerateRecommendations { .. } => (
                "recommendations:latest".to_string(),
                self.next_shard.fetch_add(1, Ordering::SeqCst) % self.task_txs.len(),
            ),
        };
        if let Some(cached) = self.cache.get_fresh(&cache_key, freshness).await {
            let mut stats = self.stats.lock().await;
            stats.cache_hits += 1;
            debug!("[ENGINE] Fresh result cached under '{}'", cache_key);
            return Ok(cached.task_id);
        }

        let envelope = Envelope {
            task_id: Uuid::new_v4().to_string(),
            task,
        };
        let task_id = envelope.task_id.clone();
        match self.task_txs[shard].try_send(envelope) {
            Ok(()) => {
                self.stats.lock().await.submitted += 1;
                Ok(task_id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(ComputeError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ComputeError::NotRunning),
        }
    }

    /// Synchronous path for callers that want recommendations now instead
    /// of via the result queue.
    pub fn generate_recommendations(
        &self,
        filter_preset: Option<&str>,
        sort_preset: Option<&str>,
        limit: usize,
    ) -> Vec<Recommendation> {
        let events = self.analyzer.all_events();
        let filtered = self.filter_events(&events, filter_preset);
        let sorted = self.sort_events(filtered, sort_preset);
        self.recommender.recommend(&sorted, limit)
    }

    fn filter_events(&self, events: &[BreakEvent], preset: Option<&str>) -> Vec<BreakEvent> {
        let mut filter = EventFilter::new(self.filter_config.clone());
        if let Some(name) = preset {
            match EventFilter::preset(name) {
                Some(conditions) => filter = filter.with_conditions(conditions),
                None => warn!("[ENGINE] Unknown filter preset '{}'", name),
            }
        }
        filter.apply(events)
    }

    fn sort_events(&self, mut events: Vec<BreakEvent>, preset: Option<&str>) -> Vec<BreakEvent> {
        let sorter = preset
            .and_then(EventSorter::preset)
            .or_else(|| EventSorter::preset("by_score"))
            .expect("by_score preset always exists");
        sorter.sort(&mut events);
        events
    }

    async fn worker_loop(&self, worker_id: usize, mut rx: mpsc::Receiver<Envelope>) {
        debug!("[ENGINE] Worker {} started", worker_id);
        while self.running.load(Ordering::SeqCst) {
            let envelope = match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(_) => continue,
            };

            self.active_workers.fetch_add(1, Ordering::SeqCst);
            let started = Instant::now();
            match self.execute(envelope).await {
                Ok(result) => {
                    let elapsed = started.elapsed().as_secs_f64() * 1000.0;
                    let mut stats = self.stats.lock().await;
                    stats.completed += 1;
                    if stats.compute_ms.len() >= 1000 {
                        stats.compute_ms.pop_front();
                    }
                    stats.compute_ms.push_back(elapsed);
                    drop(stats);
                    self.result_tx.send(result).await.ok();
                }
                Err(e) => {
                    self.stats.lock().await.failed += 1;
                    warn!("[ENGINE] Task failed: {}", e);
                }
            }
            self.active_workers.fetch_sub(1, Ordering::SeqCst);
        }
        debug!("[ENGINE] Worker {} stopped", worker_id);
    }

    async fn execute(&self, envelope: Envelope) -> Result<ComputeResult, ComputeError> {
        let started = Instant::now();
        let (kind, symbol, payload, cache_key) = match envelope.task {
            ComputeTask::AnalyzeSnapshot { snapshot } => {
                let event = self.analyzer.analyze_snapshot(&snapshot)?;
                // Only a detected break is worth caching: it deduplicates
                // repeat hits for the freshness window without starving
                // the episode state machine of ordinary snapshots.
                let key = event
                    .as_ref()
                    .map(|_| format!("analysis:{}", snapshot.symbol));
                if let Some(event) = &event {
                    self.bus.publish(Event::Break(event.clone())).ok();
                }
                (
                    ResultKind::Analysis,
                    Some(snapshot.symbol),
                    ResultPayload::Analysis(event),
                    key,
                )
            }
            ComputeTask::GenerateRecommendations {
                filter_preset,
                sort_preset,
                limit,
            } => {
                let recs = self.generate_recommendations(
                    filter_preset.as_deref(),
                    sort_preset.as_deref(),
                    limit,
                );
                (
                    ResultKind::Recommendations,
                    None,
                    ResultPayload::Recommendations(recs),
                    Some("recommendations:latest".to_string()),
                )
            }
        };

        let result = ComputeResult {
            task_id: envelope.task_id,
            kind,
            symbol,
            payload,
            compute_ms: started.elapsed().as_secs_f64() * 1000.0,
            timestamp: Utc::now(),
        };
        if let Some(key) = cache_key {
            self.cache.put(&key, result.clone()).await;
        }
        Ok(result)
    }

    async fn result_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            let result = {
                let mut rx = self.result_rx.lock().await;
                match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                    Ok(Some(result)) => result,
                    Ok(None) => break,
                    Err(_) => continue,
                }
            };
            let callbacks = {
                let map = self.callbacks.lock().await;
                map.get(&result.kind).cloned().unwrap_or_default()
            };
            for callback in callbacks {
                if let Err(e) = callback(&result) {
                    error!("[ENGINE] Result callback failed: {}", e);
                }
            }
        }
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

    async fn stats_loop(&self) {
        let interval = Duration::from_secs_f64(self.config.stats_interval_secs);
        while self.running.load(Ordering::SeqCst) {
            if !self.sleep_while_running(interval).await {
                break;
            }
            let stats = self.stats().await;
            let cache = self.cache.stats().await;
            info!(
                "[ENGINE] submitted={} completed={} failed={} cache_hits={} queue={} workers={} avg={:.2}ms hit_rate={:.2}",
                stats.submitted,
                stats.completed,
                stats.failed,
                stats.cache_hits,
                stats.queue_depth,
                stats.active_workers,
                stats.avg_compute_ms,
                cache.hit_rate,
            );
        }
    }

    pub async fn stats(&self) -> ComputeStats {
        let inner = self.stats.lock().await;
        let avg = if inner.compute_ms.is_empty() {
            0.0
        } else {
            inner.compute_ms.iter().sum::<f64>() / inner.compute_ms.len() as f64
        };
        ComputeStats {
            submitted: inner.submitted,
            completed: inner.completed,
            failed: inner.failed,
            cache_hits: inner.cache_hits,
            queue_depth: self
                .task_txs
                .iter()
                .map(|tx| tx.max_capacity() - tx.capacity())
                .sum(),
            active_workers: self.active_workers.load(Ordering::SeqCst),
            avg_compute_ms: avg,
        }
    }

    pub fn analyzer(&self) -> &Arc<LimitUpAnalyzer> {
        &self.analyzer
    }
}

/// Stable symbol-to-worker routing; the same symbol always lands on the
/// same queue so its analyses keep their arrival order.
fn shard_for(symbol: &str, shards: usize) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    symbol.hash(&mut hasher);
    (hasher.finish() as usize) % shards.max(1)
}
