use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use breakwatch::config::{
    AppConfig, DetectorConfig, EngineConfig, FilterConfig, RecommenderConfig, ScorerConfig,
};
use breakwatch::data::{MemoryTickStore, MemoryTtlCache, TickStore};
use breakwatch::error::FeedError;
use breakwatch::events::{Event, PriceLevel, Snapshot, TickEvent, TickKind};
use breakwatch::feed::{FeedConnection, FeedSignal, FeedStatus, MockFeed};
use breakwatch::service::MarketDataService;
use breakwatch::{ComputeEngine, ComputeTask, ConnectionState, EventBus, LimitUpAnalyzer};

/// Feed that does nothing; ticks are injected straight into the service's
/// tick channel by the test.
struct NullFeed;

#[async_trait]
impl FeedConnection for NullFeed {
    fn name(&self) -> &'static str {
        "null"
    }
    async fn start(&self) -> Result<(), FeedError> {
        Ok(())
    }
    async fn stop(&self) {}
    async fn subscribe(&self, _symbols: &[String], _kind: TickKind) -> Result<(), FeedError> {
        Ok(())
    }
    async fn unsubscribe(&self, _symbols: &[String], _kind: TickKind) -> Result<(), FeedError> {
        Ok(())
    }
    fn status(&self) -> FeedStatus {
        FeedStatus {
            is_connected: true,
            is_logged_in: true,
        }
    }
}

fn snap_at(symbol: &str, ts: DateTime<Utc>, price: Decimal, volume: u64) -> Snapshot {
    Snapshot {
        symbol: symbol.to_string(),
        timestamp: ts,
        last_price: price,
        volume,
        amount: price * Decimal::from(volume),
        bids: vec![PriceLevel {
            price,
            volume: 1000,
        }],
        asks: vec![],
    }
}

fn single_worker_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.processor.workers = 1;
    config.processor.monitor_interval_secs = 3600.0;
    config.engine.workers = 1;
    config.engine.stats_interval_secs = 3600.0;
    config.connection.health_check_enabled = false;
    config.connection.quality_monitor_enabled = false;
    config
}

/// End to end: crafted snapshots go in, a break event and a
/// recommendation come out.
#[tokio::test]
async fn pipeline_turns_a_pinned_symbol_into_a_recommendation() {
    let (tick_tx, tick_rx) = mpsc::channel(1024);
    let (_signal_tx, signal_rx) = mpsc::channel::<FeedSignal>(16);

    let store = Arc::new(MemoryTickStore::new());
    let service = MarketDataService::new(
        single_worker_config(),
        Arc::new(NullFeed),
        Arc::clone(&store) as Arc<dyn TickStore>,
        Arc::new(MemoryTtlCache::new()),
        tick_rx,
        signal_rx,
    );
    service.set_prev_close("600519", "10.00".parse().unwrap());

    let mut bus_rx = service.bus().subscribe();
    service.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A minute pinned at the limit, then a 3% drop.
    let limit: Decimal = "10.95".parse().unwrap();
    let mut ts = Utc::now() - ChronoDuration::minutes(10);
    for _ in 0..20 {
        tick_tx
            .send(TickEvent::Snapshot(snap_at("600519", ts, limit, 5_000)))
            .await
            .unwrap();
        ts += ChronoDuration::seconds(3);
    }
    tick_tx
        .send(TickEvent::Snapshot(snap_at(
            "600519",
            ts,
            "10.62".parse().unwrap(),
            8_000,
        )))
        .await
        .unwrap();

    // Wait for the break to come over the bus.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut break_event = None;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), bus_rx.recv()).await {
            Ok(Ok(Event::Break(event))) => {
                break_event = Some(event);
                break;
            }
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => break,
            Err(_) => continue,
        }
    }
    let break_event = break_event.expect("break event should reach the bus");
    assert_eq!(break_event.symbol, "600519");
    assert!(break_event.price_drop_rate >= 0.02);
    assert!((0.0..=100.0).contains(&break_event.score));

    let recs = service.generate_recommendations(None, None, 10);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].symbol, "600519");
    assert!((0.0..=100.0).contains(&recs[0].total_score));
    assert!((0.0..=1.0).contains(&recs[0].confidence));

    let status = service.status().await;
    assert_eq!(status.processor.received, 21);
    assert_eq!(status.analyzer.events_emitted, 1);

    service.stop().await;
    // Stopping flushes the write-behind buffer.
    assert_eq!(store.snapshot_count().await, 21);
}

/// A fresh cached recommendation set answers a repeat task without a
/// recompute.
#[tokio::test]
async fn repeated_recommendation_tasks_are_served_from_cache() {
    let mut engine_config = EngineConfig::default();
    engine_config.workers = 1;
    engine_config.stats_interval_secs = 3600.0;
    let analyzer = Arc::new(LimitUpAnalyzer::new(
        DetectorConfig::default(),
        ScorerConfig::default(),
    ));
    let engine = ComputeEngine::new(
        engine_config,
        analyzer,
        FilterConfig::default(),
        RecommenderConfig::default(),
        EventBus::new(64),
    );
    engine.start().await;

    let task = || ComputeTask::GenerateRecommendations {
        filter_preset: None,
        sort_preset: None,
        limit: 10,
    };
    let first = engine.submit(task()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let second = engine.submit(task()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.stats().await.cache_hits, 1);
    engine.stop().await;
}

/// The synthetic feed drives the whole service: connection comes up,
/// subscriptions happen on login, and ticks flow into the stats.
#[tokio::test]
async fn mock_feed_drives_the_service() {
    let mut config = single_worker_config();
    config.symbols = vec!["600519".to_string(), "000858".to_string()];

    let (tick_tx, tick_rx) = mpsc::channel(1024);
    let (signal_tx, signal_rx) = mpsc::channel(16);
    let feed = MockFeed::new(tick_tx, signal_tx, 20);

    let store = Arc::new(MemoryTickStore::new());
    let service = MarketDataService::new(
        config.clone(),
        Arc::new(feed.clone()),
        Arc::clone(&store) as Arc<dyn TickStore>,
        Arc::new(MemoryTtlCache::new()),
        tick_rx,
        signal_rx,
    );
    for (symbol, prev_close) in feed.seed(&config.symbols) {
        service.set_prev_close(&symbol, prev_close);
    }

    service.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let status = service.status().await;
    assert_eq!(status.connection.state, ConnectionState::LoggedIn);
    assert!(status.connection.connect_count >= 1);
    assert!(status.processor.received > 0);
    assert!(status.analyzer.snapshots_seen > 0);

    service.stop().await;
    assert!(store.snapshot_count().await > 0);
}
