use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::FeedError;
use crate::events::TickKind;
use crate::feed::{FeedConnection, FeedResult, FeedStatus};

use super::manager::{ConnectionManager, ConnectionState};
use super::pool::ConnectionPool;
use crate::config::PoolConfig;

/// Scriptable stand-in for a vendor connection.
struct StubFeed {
    connected: AtomicBool,
    fail_starts: AtomicU32,
    start_calls: AtomicU32,
}

impl StubFeed {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(false),
            fail_starts: AtomicU32::new(0),
            start_calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl FeedConnection for StubFeed {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn start(&self) -> FeedResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_starts.load(Ordering::SeqCst) > 0 {
            self.fail_starts.fetch_sub(1, Ordering::SeqCst);
            return Err(FeedError::ConnectFailed("scripted failure".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn subscribe(&self, _symbols: &[String], _kind: TickKind) -> FeedResult<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _symbols: &[String], _kind: TickKind) -> FeedResult<()> {
        Ok(())
    }

    fn status(&self) -> FeedStatus {
        let connected = self.connected.load(Ordering::SeqCst);
        FeedStatus {
            is_connected: connected,
            is_logged_in: connected,
        }
    }
}

fn quiet_config() -> ConnectionConfig {
    ConnectionConfig {
        jitter: false,
        health_check_enabled: false,
        quality_monitor_enabled: false,
        ..ConnectionConfig::default()
    }
}

fn manager_with(config: ConnectionConfig) -> (ConnectionManager, Arc<StubFeed>) {
    let feed = StubFeed::new();
    let manager = ConnectionManager::new(config, Arc::clone(&feed) as Arc<dyn FeedConnection>);
    (manager, feed)
}

#[test]
fn backoff_grows_exponentially_and_caps() {
    let (manager, _) = manager_with(quiet_config());
    let d1 = manager.backoff_delay_for_test(1).as_secs_f64();
    let d2 = manager.backoff_delay_for_test(2).as_secs_f64();
    let d3 = manager.backoff_delay_for_test(3).as_secs_f64();
    assert!((d1 - 1.0).abs() < 1e-9);
    assert!((d2 - 2.0).abs() < 1e-9);
    assert!((d3 - 4.0).abs() < 1e-9);

    // Far past the cap.
    let d20 = manager.backoff_delay_for_test(20).as_secs_f64();
    assert!((d20 - 60.0).abs() < 1e-9);

    // Monotone non-decreasing across the whole range.
    let mut prev = 0.0;
    for attempt in 1..=20 {
        let d = manager.backoff_delay_for_test(attempt).as_secs_f64();
        assert!(d >= prev, "attempt {} shrank the delay", attempt);
        prev = d;
    }
}

#[test]
fn jitter_stays_within_ten_percent() {
    let config = ConnectionConfig {
        jitter: true,
        ..quiet_config()
    };
    let (manager, _) = manager_with(config);
    for _ in 0..100 {
        let d = manager.backoff_delay_for_test(2).as_secs_f64();
        assert!((2.0..=2.2).contains(&d), "jittered delay {} out of bounds", d);
    }
}

#[tokio::test]
async fn established_signal_resets_attempt_counter() {
    let (manager, _) = manager_with(quiet_config());
    manager.start().await;

    manager.on_connection_established().await;
    manager.on_authentication_success().await;

    let status = manager.status().await;
    assert_eq!(status.state, ConnectionState::LoggedIn);
    assert_eq!(status.current_attempt, 0);
    assert_eq!(status.connect_count, 1);
    assert!(manager.is_healthy().await);

    manager.stop().await;
}

#[tokio::test]
async fn lost_connection_schedules_reconnect() {
    let mut config = quiet_config();
    config.initial_delay_secs = 0.01;
    config.max_delay_secs = 0.01;
    let (manager, feed) = manager_with(config);
    manager.start().await;
    manager.on_connection_established().await;

    let before = feed.start_calls.load(Ordering::SeqCst);
    manager.on_connection_lost(99).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(feed.start_calls.load(Ordering::SeqCst) > before);
    let status = manager.status().await;
    assert_eq!(status.disconnect_count, 1);

    manager.stop().await;
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let mut config = quiet_config();
    config.max_attempts = 2;
    config.initial_delay_secs = 0.01;
    config.max_delay_secs = 0.01;
    let (manager, feed) = manager_with(config);
    // Every restart attempt fails.
    feed.fail_starts.store(u32::MAX, Ordering::SeqCst);

    manager.start().await;
    manager.on_connection_lost(1).await;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    assert_eq!(manager.status().await.state, ConnectionState::Failed);
    manager.stop().await;
}

#[tokio::test]
async fn duplicate_loss_signals_share_one_reconnect_loop() {
    let mut config = quiet_config();
    config.max_attempts = 1;
    config.initial_delay_secs = 0.1;
    config.max_delay_secs = 0.1;
    let (manager, feed) = manager_with(config);
    manager.start().await;
    manager.on_connection_established().await;

    feed.fail_starts.store(u32::MAX, Ordering::SeqCst);
    let before = feed.start_calls.load(Ordering::SeqCst);

    // The second loss lands while the first loop is still backing off.
    manager.on_connection_lost(1).await;
    manager.on_connection_lost(2).await;
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;

    assert_eq!(manager.status().await.state, ConnectionState::Failed);
    // A single loop made the single permitted attempt.
    assert_eq!(feed.start_calls.load(Ordering::SeqCst) - before, 1);
    manager.stop().await;
}

#[tokio::test]
async fn health_check_flags_non_live_states() {
    let (manager, _) = manager_with(quiet_config());
    // Never started: not a live session.
    assert!(manager.health_problem_for_test().await.is_some());

    manager.start().await;
    manager.on_connection_established().await;
    assert!(manager.health_problem_for_test().await.is_none());

    // A deliberate pause is not a health problem.
    manager.suspend().await;
    assert!(manager.health_problem_for_test().await.is_none());
    manager.stop().await;
}

#[tokio::test]
async fn suspended_manager_ignores_loss_signals() {
    let (manager, feed) = manager_with(quiet_config());
    manager.start().await;
    manager.on_connection_established().await;
    manager.suspend().await;

    let before = feed.start_calls.load(Ordering::SeqCst);
    manager.on_connection_lost(5).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(feed.start_calls.load(Ordering::SeqCst), before);
    assert_eq!(manager.status().await.state, ConnectionState::Suspended);
    manager.stop().await;
}

#[tokio::test]
async fn data_counters_drive_rate_and_loss_stats() {
    let (manager, _) = manager_with(quiet_config());
    manager.start().await;
    manager.on_connection_established().await;
    manager.on_data_received(TickKind::Snapshot, 10).await;
    manager.on_data_received(TickKind::Transaction, 5).await;

    let status = manager.status().await;
    assert!(status.last_data_age_secs.is_some());
    assert_eq!(status.loss_rate, 0.0);
    manager.stop().await;
}

#[tokio::test]
async fn pool_prefers_healthy_connection() {
    let (healthy, _) = manager_with(quiet_config());
    let (unhealthy, _) = manager_with(quiet_config());
    healthy.start().await;
    healthy.on_connection_established().await;

    let pool = ConnectionPool::new(
        PoolConfig::default(),
        vec![unhealthy.clone(), healthy.clone()],
    );
    let picked = pool.acquire().await.expect("pool is non-empty");
    assert!(picked.is_healthy().await);
    assert_eq!(pool.healthy_count().await, 1);

    healthy.stop().await;
}

#[tokio::test]
async fn pool_falls_back_to_primary_when_nothing_is_healthy() {
    let (a, _) = manager_with(quiet_config());
    let (b, _) = manager_with(quiet_config());
    let pool = ConnectionPool::new(PoolConfig::default(), vec![a, b]);

    let picked = pool.acquire().await.expect("pool is non-empty");
    assert!(!picked.is_healthy().await);
    assert_eq!(pool.healthy_count().await, 0);
}
