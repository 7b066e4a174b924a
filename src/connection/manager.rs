//! Reconnect state machine with exponential backoff, health checking and
//! session quality tracking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::events::TickKind;
use crate::feed::FeedConnection;

/// Synthetic disconnect reason raised by the health check.
pub const REASON_HEALTH_CHECK: i32 = -1;
/// Synthetic disconnect reason raised by a forced reconnect.
pub const REASON_FORCED: i32 = -999;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    LoggedIn,
    Reconnecting,
    Suspended,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Established,
    LoggedIn,
    Lost,
    ReconnectScheduled,
    Failed,
    Suspended,
    Resumed,
}

#[derive(Clone, Debug)]
pub struct ConnectionEvent {
    pub kind: ConnectionEventKind,
    pub reason: i32,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// Point-in-time view over the manager for monitoring and tests.
#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    pub name: &'static str,
    pub state: ConnectionState,
    pub current_attempt: u32,
    pub connect_count: u64,
    pub failed_count: u64,
    pub disconnect_count: u64,
    pub uptime_secs: f64,
    pub data_rate: f64,
    pub last_data_age_secs: Option<f64>,
    /// failed / (connects + failed), approximate session loss.
    pub loss_rate: f64,
}

struct Inner {
    state: ConnectionState,
    current_attempt: u32,
    connect_count: u64,
    failed_count: u64,
    disconnect_count: u64,
    connected_at: Option<Instant>,
    last_data_at: Option<Instant>,
    data_counts: HashMap<TickKind, u64>,
    total_data: u64,
    reconnect_task: Option<JoinHandle<()>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            current_attempt: 0,
            connect_count: 0,
            failed_count: 0,
            disconnect_count: 0,
            connected_at: None,
            last_data_at: None,
            data_counts: HashMap::new(),
            total_data: 0,
            reconnect_task: None,
        }
    }

    fn reconnect_active(&self) -> bool {
        self.reconnect_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn loss_rate(&self) -> f64 {
        let total = self.connect_count + self.failed_count;
        if total == 0 {
            0.0
        } else {
            self.failed_count as f64 / total as f64
        }
    }

    fn uptime_secs(&self) -> f64 {
        self.connected_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn data_rate(&self) -> f64 {
        let uptime = self.uptime_secs();
        if uptime <= 0.0 {
            0.0
        } else {
            self.total_data as f64 / uptime
        }
    }
}

type EventCallback = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Supervises one [`FeedConnection`]: drives reconnects with exponential
/// backoff, detects silent failures via the health check, and tracks
/// session quality.
#[derive(Clone)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    connection: Arc<dyn FeedConnection>,
    inner: Arc<Mutex<Inner>>,
    callbacks: Arc<Mutex<HashMap<ConnectionEventKind, Vec<EventCallback>>>>,
    running: Arc<AtomicBool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connection: Arc<dyn FeedConnection>) -> Self {
        Self {
            config,
            connection,
            inner: Arc::new(Mutex::new(Inner::new())),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn connection(&self) -> &Arc<dyn FeedConnection> {
        &self.connection
    }

    pub async fn on_event<F>(&self, kind: ConnectionEventKind, callback: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .await
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut inner = self.inner.lock().await;
            inner.state = ConnectionState::Connecting;
        }
        if let Err(e) = self.connection.start().await {
            error!("[CONN] Initial connect failed: {}", e);
            self.on_connection_lost(0).await;
        }

        let mut handles = self.handles.lock().await;
        if self.config.health_check_enabled {
            let me = self.clone();
            handles.push(tokio::spawn(async move {
                me.health_loop().await;
            }));
        }
        if self.config.quality_monitor_enabled {
            let me = self.clone();
            handles.push(tokio::spawn(async move {
                me.quality_loop().await;
            }));
        }
        info!("[CONN] Manager started for '{}'", self.connection.name());
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.connection.stop().await;
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.await.ok();
        }
        let task = self.inner.lock().await.reconnect_task.take();
        if let Some(task) = task {
            // May be mid-backoff; cancel and wait for it to wind down.
            task.abort();
            task.await.ok();
        }
        self.inner.lock().await.state = ConnectionState::Disconnected;
        info!("[CONN] Manager stopped for '{}'", self.connection.name());
    }

    // Signals, fed from the feed's out-of-band notifications.

    pub async fn on_connection_established(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = ConnectionState::Connected;
        inner.connect_count += 1;
        inner.connected_at = Some(Instant::now());
        if self.config.reset_on_success {
            inner.current_attempt = 0;
        }
        let attempt = inner.current_attempt;
        drop(inner);
        info!("[CONN] ✅ Connection established");
        self.fire(ConnectionEventKind::Established, 0, attempt).await;
    }

    pub async fn on_authentication_success(&self) {
        self.inner.lock().await.state = ConnectionState::LoggedIn;
        info!("[CONN] Login confirmed");
        self.fire(ConnectionEventKind::LoggedIn, 0, 0).await;
    }

    pub async fn on_authentication_failure(&self, code: i32) {
        warn!("[CONN] Login rejected with code {}", code);
        self.on_connection_lost(code).await;
    }

    pub async fn on_data_received(&self, kind: TickKind, count: u64) {
        let mut inner = self.inner.lock().await;
        inner.last_data_at = Some(Instant::now());
        *inner.data_counts.entry(kind).or_insert(0) += count;
        inner.total_data += count;
    }

    pub async fn on_connection_lost(&self, reason: i32) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == ConnectionState::Suspended {
                debug!("[CONN] Loss signal ignored while suspended");
                return;
            }
            inner.state = ConnectionState::Reconnecting;
            inner.disconnect_count += 1;
            inner.connected_at = None;
            // One reconnect loop at a time; a second loss signal during
            // an active backoff must not race the attempt counter.
            if inner.reconnect_active() {
                drop(inner);
                debug!("[CONN] Reconnect already in progress (reason {})", reason);
                self.fire(ConnectionEventKind::Lost, reason, 0).await;
                return;
            }
            let me = self.clone();
            inner.reconnect_task = Some(tokio::spawn(async move {
                me.reconnect_loop().await;
            }));
        }
        warn!("[CONN] Connection lost (reason {})", reason);
        self.fire(ConnectionEventKind::Lost, reason, 0).await;
    }

    /// Resets the attempt counter and tears the session down so the
    /// reconnect loop rebuilds it from scratch.
    pub async fn force_reconnect(&self) {
        info!("[CONN] Forced reconnect requested");
        self.inner.lock().await.current_attempt = 0;
        self.connection.stop().await;
        self.on_connection_lost(REASON_FORCED).await;
    }

    /// Stops reacting to loss signals until `resume` is called.
    pub async fn suspend(&self) {
        self.inner.lock().await.state = ConnectionState::Suspended;
        info!("[CONN] Suspended");
        self.fire(ConnectionEventKind::Suspended, 0, 0).await;
    }

    pub async fn resume(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != ConnectionState::Suspended {
                return;
            }
            inner.state = ConnectionState::Disconnected;
        }
        info!("[CONN] Resumed");
        self.fire(ConnectionEventKind::Resumed, 0, 0).await;
        self.on_connection_lost(0).await;
    }

    async fn reconnect_loop(&self) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let attempt = {
                let mut inner = self.inner.lock().await;
                if inner.state != ConnectionState::Reconnecting {
                    return;
                }
                inner.current_attempt += 1;
                inner.current_attempt
            };

            if attempt > self.config.max_attempts {
                error!(
                    "[CONN] ❌ Giving up after {} attempts",
                    self.config.max_attempts
                );
                self.inner.lock().await.state = ConnectionState::Failed;
                self.fire(ConnectionEventKind::Failed, 0, attempt).await;
                return;
            }

            let delay = self.backoff_delay(attempt);
            info!(
                "[CONN] Reconnect attempt {}/{} in {:.1}s",
                attempt,
                self.config.max_attempts,
                delay.as_secs_f64()
            );
            self.fire(ConnectionEventKind::ReconnectScheduled, 0, attempt)
                .await;
            tokio::time::sleep(delay).await;

            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            match self.connection.start().await {
                Ok(()) => {
                    // The feed confirms via its Connected signal; the
                    // loop's job ends here.
                    return;
                }
                Err(e) => {
                    self.inner.lock().await.failed_count += 1;
                    warn!("[CONN] Attempt {} failed: {}", attempt, e);
                }
            }
        }
    }

    /// Exponential backoff capped at `max_delay_secs`, with up to 10%
    /// random jitter to avoid thundering herds.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay_secs
            * self.config.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let mut delay = base.min(self.config.max_delay_secs);
        if self.config.jitter {
            delay *= 1.0 + rand::thread_rng().gen_range(0.0..0.1);
        }
        Duration::from_secs_f64(delay)
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

    async fn health_loop(&self) {
        let interval = Duration::from_secs_f64(self.config.health_check_interval_secs);
        while self.running.load(Ordering::SeqCst) {
            if !self.sleep_while_running(interval).await {
                break;
            }
            if let Some(reason) = self.health_problem().await {
                warn!("[HEALTH] {}", reason);
                // Non-live states are already in the reconnect path (or
                // terminal after exhausting attempts); report them without
                // raising another synthetic loss.
                let state = self.inner.lock().await.state;
                if matches!(
                    state,
                    ConnectionState::Connected | ConnectionState::LoggedIn
                ) {
                    self.on_connection_lost(REASON_HEALTH_CHECK).await;
                }
            }
        }
    }

    async fn health_problem(&self) -> Option<String> {
        {
            let inner = self.inner.lock().await;
            match inner.state {
                ConnectionState::Connected | ConnectionState::LoggedIn => {}
                // A deliberate pause is not a health problem.
                ConnectionState::Suspended => return None,
                other => return Some(format!("connection not live (state {:?})", other)),
            }
        }

        let status = self.connection.status();
        if !status.is_connected || !status.is_logged_in {
            return Some("session is no longer live".to_string());
        }
        if !self.config.failure_detection_enabled {
            return None;
        }

        let inner = self.inner.lock().await;
        if let Some(last) = inner.last_data_at {
            let silent = last.elapsed().as_secs_f64();
            if silent > self.config.max_no_data_secs {
                return Some(format!("no data for {:.0}s", silent));
            }
        }
        let uptime = inner.uptime_secs();
        if uptime > 60.0 && inner.data_rate() < self.config.min_data_rate {
            return Some(format!(
                "data rate {:.2}/s below minimum {:.2}/s",
                inner.data_rate(),
                self.config.min_data_rate
            ));
        }
        None
    }

    async fn quality_loop(&self) {
        let interval = Duration::from_secs_f64(self.config.quality_monitor_interval_secs);
        while self.running.load(Ordering::SeqCst) {
            if !self.sleep_while_running(interval).await {
                break;
            }
            let inner = self.inner.lock().await;
            info!(
                "[QUALITY] state={:?} uptime={:.0}s rate={:.2}/s connects={} disconnects={} loss_rate={:.2}",
                inner.state,
                inner.uptime_secs(),
                inner.data_rate(),
                inner.connect_count,
                inner.disconnect_count,
                inner.loss_rate(),
            );
        }
    }

    pub async fn is_healthy(&self) -> bool {
        let state = self.inner.lock().await.state;
        matches!(
            state,
            ConnectionState::Connected | ConnectionState::LoggedIn
        ) && self.connection.status().is_connected
    }

    pub async fn status(&self) -> ConnectionStatus {
        let inner = self.inner.lock().await;
        ConnectionStatus {
            name: self.connection.name(),
            state: inner.state,
            current_attempt: inner.current_attempt,
            connect_count: inner.connect_count,
            failed_count: inner.failed_count,
            disconnect_count: inner.disconnect_count,
            uptime_secs: inner.uptime_secs(),
            data_rate: inner.data_rate(),
            last_data_age_secs: inner.last_data_at.map(|t| t.elapsed().as_secs_f64()),
            loss_rate: inner.loss_rate(),
        }
    }

    async fn fire(&self, kind: ConnectionEventKind, reason: i32, attempt: u32) {
        let event = ConnectionEvent {
            kind,
            reason,
            attempt,
            at: Utc::now(),
        };
        let callbacks = {
            let map = self.callbacks.lock().await;
            map.get(&kind).cloned().unwrap_or_default()
        };
        for callback in callbacks {
            callback(&event);
        }
    }

    #[cfg(test)]
    pub(crate) fn backoff_delay_for_test(&self, attempt: u32) -> Duration {
        self.backoff_delay(attempt)
    }

    #[cfg(test)]
    pub(crate) async fn health_problem_for_test(&self) -> Option<String> {
        self.health_problem().await
    }
}
