//! Top-level service wiring the feed, connection supervision, ingestion
//! and compute into one start/stoppable unit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::analytics::{AnalyzerStats, LimitUpAnalyzer, Recommendation};
use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::connection::{ConnectionEventKind, ConnectionManager, ConnectionStatus};
use crate::data::{CacheStore, ProcessorStats, RealtimeProcessor, TickStore};
use crate::engine::{ComputeEngine, ComputeStats, ComputeTask, ResultKind, ResultPayload};
use crate::error::{ComputeError, FeedError, ProcessError};
use crate::feed::{FeedConnection, FeedSignal};
use crate::events::{Event, TickEvent, TickKind};

#[derive(Clone, Debug)]
pub struct ServiceStatus {
    pub connection: ConnectionStatus,
    pub processor: ProcessorStats,
    pub engine: ComputeStats,
    pub analyzer: AnalyzerStats,
}

/// Owns the whole pipeline. Construction wires the pieces together;
/// `start` brings them up in dependency order and `stop` tears them down.
#[derive(Clone)]
pub struct MarketDataService {
    config: AppConfig,
    bus: EventBus,
    manager: ConnectionManager,
    processor: RealtimeProcessor,
    engine: ComputeEngine,
    analyzer: Arc<LimitUpAnalyzer>,

    tick_rx: Arc<Mutex<Option<mpsc::Receiver<TickEvent>>>>,
    signal_rx: Arc<Mutex<Option<mpsc::Receiver<FeedSignal>>>>,
    running: Arc<AtomicBool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MarketDataService {
    pub fn new(
        config: AppConfig,
        feed: Arc<dyn FeedConnection>,
        store: Arc<dyn TickStore>,
        cache: Arc<dyn CacheStore>,
        tick_rx: mpsc::Receiver<TickEvent>,
        signal_rx: mpsc::Receiver<FeedSignal>,
    ) -> Self {
        let bus = EventBus::new(config.bus_capacity());
        let analyzer = Arc::new(LimitUpAnalyzer::new(
            config.detector.clone(),
            config.scorer.clone(),
        ));
        let processor =
            RealtimeProcessor::new(config.processor.clone(), store, cache, bus.clone());
        let engine = ComputeEngine::new(
            config.engine.clone(),
            Arc::clone(&analyzer),
            config.filter.clone(),
            config.recommender.clone(),
            bus.clone(),
        );
        let manager = ConnectionManager::new(config.connection.clone(), feed);

        Self {
            config,
            bus,
            manager,
            processor,
            engine,
            analyzer,
            tick_rx: Arc::new(Mutex::new(Some(tick_rx))),
            signal_rx: Arc::new(Mutex::new(Some(signal_rx))),
            running: Arc::new(AtomicBool::new(false)),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn start(&self) -> Result<(), FeedError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("[SERVICE] Starting");

        self.processor.start().await;
        self.engine.start().await;

        let mut handles = self.handles.lock().await;
        if let Some(rx) = self.signal_rx.lock().await.take() {
            let me = self.clone();
            handles.push(tokio::spawn(async move {
                me.signal_loop(rx).await;
            }));
        }
        if let Some(rx) = self.tick_rx.lock().await.take() {
            let me = self.clone();
            handles.push(tokio::spawn(async move {
                me.tick_loop(rx).await;
            }));
        }
        let me = self.clone();
        handles.push(tokio::spawn(async move {
            me.analysis_bridge().await;
        }));
        let me = self.clone();
        handles.push(tokio::spawn(async move {
            me.cleanup_loop().await;
        }));
        let me = self.clone();
        handles.push(tokio::spawn(async move {
            me.recommend_loop().await;
        }));
        drop(handles);

        self.manager
            .on_event(ConnectionEventKind::Failed, |event| {
                error!(
                    "[SERVICE] Connection permanently failed after {} attempts",
                    event.attempt
                );
            })
            .await;
        self.engine
            .on_result(ResultKind::Recommendations, |result| {
                if let ResultPayload::Recommendations(recs) = &result.payload {
                    info!(
                        "[SERVICE] Recommendation refresh: {} symbols in {:.1}ms",
                        recs.len(),
                        result.compute_ms
                    );
                }
                Ok(())
            })
            .await;

        self.manager.start().await;
        info!("[SERVICE] Started");
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("[SERVICE] Stopping");
        self.manager.stop().await;
        self.processor.stop().await;
        self.engine.stop().await;
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.abort();
            handle.await.ok();
        }
        info!("[SERVICE] Stopped");
    }

    /// Routes feed lifecycle signals into the connection manager and
    /// re-subscribes once a session is authenticated.
    async fn signal_loop(&self, mut rx: mpsc::Receiver<FeedSignal>) {
        while let Some(signal) = rx.recv().await {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            match signal {
                FeedSignal::Connected => self.manager.on_connection_established().await,
                FeedSignal::LoginResult { success: true, .. } => {
                    self.manager.on_authentication_success().await;
                    let symbols = self.config.symbols.clone();
                    if !symbols.is_empty() {
                        if let Err(e) = self.subscribe(&symbols).await {
                            warn!("[SERVICE] Re-subscribe after login failed: {}", e);
                        }
                    }
                }
                FeedSignal::LoginResult { success: false, code } => {
                    self.manager.on_authentication_failure(code).await;
                }
                FeedSignal::Disconnected { reason } if reason != 0 => {
                    self.manager.on_connection_lost(reason).await;
                }
                FeedSignal::Disconnected { .. } => {}
            }
        }
    }

    /// Pumps raw ticks into the processor and keeps the manager's data
    /// counters warm for its failure detection.
    async fn tick_loop(&self, mut rx: mpsc::Receiver<TickEvent>) {
        while let Some(tick) = rx.recv().await {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.manager.on_data_received(tick.kind(), 1).await;
            match self.processor.submit(tick).await {
                Ok(()) | Err(ProcessError::QueueFull) => {}
                Err(e) => {
                    warn!("[SERVICE] Tick rejected: {}", e);
                }
            }
        }
    }

    /// Feeds validated snapshots from the bus into the compute engine.
    async fn analysis_bridge(&self) {
        let mut rx = self.bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(Event::Tick(TickEvent::Snapshot(snapshot))) => {
                    match self
                        .engine
                        .submit(ComputeTask::AnalyzeSnapshot { snapshot })
                        .await
                    {
                        Ok(_) | Err(ComputeError::QueueFull) => {}
                        Err(ComputeError::NotRunning) => break,
                        Err(e) => warn!("[SERVICE] Analysis submit failed: {}", e),
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[SERVICE] Analysis bridge lagged, skipped {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Queues a periodic recommendation refresh through the engine so the
    /// cached ranking stays warm.
    async fn recommend_loop(&self) {
        let interval = Duration::from_secs_f64(self.config.engine.recommend_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let task = ComputeTask::GenerateRecommendations {
                filter_preset: None,
                sort_preset: Some("comprehensive".to_string()),
                limit: 20,
            };
            match self.engine.submit(task).await {
                Ok(_) | Err(ComputeError::QueueFull) => {}
                Err(_) => break,
            }
        }
    }

    async fn cleanup_loop(&self) {
        let max_age = ChronoDuration::seconds(
            (self.config.filter.max_event_age_hours * 3600.0) as i64,
        );
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.analyzer.cleanup_old_data(max_age);
        }
    }

    pub async fn subscribe(&self, symbols: &[String]) -> Result<(), FeedError> {
        let connection = self.manager.connection();
        for kind in [TickKind::Snapshot, TickKind::Transaction, TickKind::Order] {
            connection.subscribe(symbols, kind).await?;
        }
        info!("[SERVICE] Subscribed {} symbols", symbols.len());
        Ok(())
    }

    pub async fn unsubscribe(&self, symbols: &[String]) -> Result<(), FeedError> {
        let connection = self.manager.connection();
        for kind in [TickKind::Snapshot, TickKind::Transaction, TickKind::Order] {
            connection.unsubscribe(symbols, kind).await?;
        }
        Ok(())
    }

    pub fn set_prev_close(&self, symbol: &str, prev_close: Decimal) {
        self.analyzer.set_prev_close(symbol, prev_close);
    }

    pub fn generate_recommendations(
        &self,
        filter_preset: Option<&str>,
        sort_preset: Option<&str>,
        limit: usize,
    ) -> Vec<Recommendation> {
        self.engine
            .generate_recommendations(filter_preset, sort_preset, limit)
    }

    pub async fn force_reconnect(&self) {
        self.manager.force_reconnect().await;
    }

    pub async fn suspend(&self) {
        self.manager.suspend().await;
    }

    pub async fn resume(&self) {
        self.manager.resume().await;
    }

    pub async fn force_flush(&self) {
        self.processor.force_flush().await;
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            connection: self.manager.status().await,
            processor: self.processor.stats().await,
            engine: self.engine.stats().await,
            analyzer: self.analyzer.stats(),
        }
    }
}
