use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use breakwatch::events::Event;
use breakwatch::feed::FeedConnection;
use breakwatch::{AppConfig, MarketDataService, MemoryTickStore, MemoryTtlCache, MockFeed};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match AppConfig::load("config.yaml") {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if config.symbols.is_empty() {
        config.symbols = vec![
            "600519".to_string(),
            "300750".to_string(),
            "000858".to_string(),
            "601127".to_string(),
        ];
    }
    info!("Watching {} symbols", config.symbols.len());

    let (tick_tx, tick_rx) = mpsc::channel(config.processor.queue_size);
    let (signal_tx, signal_rx) = mpsc::channel(64);
    let feed = MockFeed::new(tick_tx, signal_tx, 200);

    let service = MarketDataService::new(
        config.clone(),
        Arc::new(feed.clone()) as Arc<dyn FeedConnection>,
        Arc::new(MemoryTickStore::new()),
        Arc::new(MemoryTtlCache::new()),
        tick_rx,
        signal_rx,
    );

    // Prime the analyzer with the reference closes the mock trades around.
    for (symbol, prev_close) in feed.seed(&config.symbols) {
        service.set_prev_close(&symbol, prev_close);
    }

    if let Err(e) = service.start().await {
        error!("Service failed to start: {}", e);
        std::process::exit(1);
    }

    // Surface break events as they happen.
    let mut bus_rx = service.bus().subscribe();
    tokio::spawn(async move {
        loop {
            match bus_rx.recv().await {
                Ok(Event::Break(event)) => {
                    info!(
                        "[ALERT] {} broke its limit: drop {:.2}%, held {}s, score {:.1}",
                        event.symbol,
                        event.price_drop_rate * 100.0,
                        event.limit_duration_secs,
                        event.score
                    );
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Periodic status line and a fresh top-five.
    let status_service = service.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let status = status_service.status().await;
            info!(
                "[STATUS] conn={:?} received={} emitted={} completed={}",
                status.connection.state,
                status.processor.received,
                status.analyzer.events_emitted,
                status.engine.completed,
            );
            let recs = status_service.generate_recommendations(None, Some("comprehensive"), 5);
            for rec in recs {
                info!(
                    "[RECOMMEND] {} score={:.1} risk={} confidence={:.2} ({})",
                    rec.symbol, rec.total_score, rec.risk_level, rec.confidence, rec.reasons
                );
            }
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down");
    service.stop().await;
}
