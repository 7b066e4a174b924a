//! Synthetic feed used by the binary and integration tests.
//!
//! Generates per-symbol snapshot/trade/order streams with occasional
//! limit-up pins so the whole pipeline can run without a vendor SDK.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::events::{OrderEvent, PriceLevel, Side, Snapshot, TickEvent, TickKind, Transaction};

use super::{FeedConnection, FeedResult, FeedStatus};

/// Connect/login/disconnect signals the connection manager translates into
/// its own state machine inputs.
#[derive(Clone, Debug)]
pub enum FeedSignal {
    Connected,
    Disconnected { reason: i32 },
    LoginResult { success: bool, code: i32 },
}

struct SymbolState {
    prev_close: f64,
    price: f64,
    pinned_ticks: u32,
    order_no: u64,
}

struct Inner {
    tick_tx: mpsc::Sender<TickEvent>,
    signal_tx: mpsc::Sender<FeedSignal>,
    tick_interval: Duration,

    connected: AtomicBool,
    logged_in: AtomicBool,
    subscriptions: DashMap<TickKind, HashSet<String>>,
    symbols: DashMap<String, SymbolState>,
    generator: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct MockFeed {
    inner: Arc<Inner>,
}

impl MockFeed {
    /// Registers symbols up front and reveals the previous closes the
    /// generator will trade around, so callers can prime an analyzer with
    /// matching reference prices.
    pub fn seed(&self, symbols: &[String]) -> Vec<(String, Decimal)> {
        symbols
            .iter()
            .map(|symbol| {
                self.inner.ensure_symbol(symbol);
                let prev_close = self
                    .inner
                    .symbols
                    .get(symbol)
                    .map(|s| s.prev_close)
                    .unwrap_or(0.0);
                (
                    symbol.clone(),
                    Decimal::from_f64(prev_close).unwrap_or_default().round_dp(2),
                )
            })
            .collect()
    }

    pub fn new(
        tick_tx: mpsc::Sender<TickEvent>,
        signal_tx: mpsc::Sender<FeedSignal>,
        tick_interval_ms: u64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tick_tx,
                signal_tx,
                tick_interval: Duration::from_millis(tick_interval_ms),
                connected: AtomicBool::new(false),
                logged_in: AtomicBool::new(false),
                subscriptions: DashMap::new(),
                symbols: DashMap::new(),
                generator: Mutex::new(None),
            }),
        }
    }
}

impl Inner {
    fn ensure_symbol(&self, symbol: &str) {
        self.symbols.entry(symbol.to_string()).or_insert_with(|| {
            let prev_close: f64 =
                (rand::thread_rng().gen_range(5.0..50.0f64) * 100.0).round() / 100.0;
            SymbolState {
                prev_close,
                price: prev_close,
                pinned_ticks: 0,
                order_no: 1,
            }
        });
    }

    fn next_snapshot(&self, symbol: &str) -> Option<Snapshot> {
        let mut state = self.symbols.get_mut(symbol)?;
        let limit_up = state.prev_close * 1.095;

        // Random walk with an occasional pin at the daily bound.
        {
            let mut rng = rand::thread_rng();
            if state.pinned_ticks > 0 {
                state.pinned_ticks -= 1;
                state.price = limit_up;
                if state.pinned_ticks == 0 {
                    // Fall away from the pin: sometimes hard enough to break.
                    let drop: f64 = rng.gen_range(0.005..0.04);
                    state.price = limit_up * (1.0 - drop);
                }
            } else if rng.gen_bool(0.01) {
                state.pinned_ticks = rng.gen_range(20..120);
                state.price = limit_up;
            } else {
                let step: f64 = rng.gen_range(-0.005..0.005);
                state.price = (state.price * (1.0 + step)).min(limit_up).max(0.01);
            }
        }

        let price = Decimal::from_f64(state.price)?.round_dp(3);
        let volume: u64 = rand::thread_rng().gen_range(1_000..50_000);
        let amount = price * Decimal::from(volume);

        let tick = Decimal::new(1, 2); // 0.01
        let bids = (0..10)
            .map(|i| PriceLevel {
                price: price - tick * Decimal::from(i + 1),
                volume: rand::thread_rng().gen_range(500..200_000),
            })
            .collect();
        let asks = (0..10)
            .map(|i| PriceLevel {
                price: price + tick * Decimal::from(i + 1),
                volume: rand::thread_rng().gen_range(500..200_000),
            })
            .collect();

        Some(Snapshot {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            last_price: price,
            volume,
            amount,
            bids,
            asks,
        })
    }

    fn next_transaction(&self, symbol: &str) -> Option<Transaction> {
        let mut state = self.symbols.get_mut(symbol)?;
        state.order_no += 2;
        let price = Decimal::from_f64(state.price)?.round_dp(3);
        let (volume, side) = {
            let mut rng = rand::thread_rng();
            let volume: u64 = rng.gen_range(100..10_000);
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            (volume, side)
        };
        Some(Transaction {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            price,
            volume,
            buy_order_no: state.order_no - 1,
            sell_order_no: state.order_no,
            side_flag: side,
        })
    }

    fn next_order(&self, symbol: &str) -> Option<OrderEvent> {
        let mut state = self.symbols.get_mut(symbol)?;
        state.order_no += 1;
        let price = Decimal::from_f64(state.price)?.round_dp(3);
        let (volume, side) = {
            let mut rng = rand::thread_rng();
            let volume: u64 = rng.gen_range(100..20_000);
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            (volume, side)
        };
        Some(OrderEvent {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            order_no: state.order_no,
            price,
            volume,
            side,
        })
    }

    fn subscribed(&self, kind: TickKind) -> Vec<String> {
        self.subscriptions
            .get(&kind)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FeedConnection for MockFeed {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(&self) -> FeedResult<()> {
        let inner = &self.inner;
        if inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        inner.connected.store(true, Ordering::SeqCst);
        inner.logged_in.store(true, Ordering::SeqCst);
        inner.signal_tx.send(FeedSignal::Connected).await.ok();
        inner
            .signal_tx
            .send(FeedSignal::LoginResult {
                success: true,
                code: 0,
            })
            .await
            .ok();

        let feed = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            info!("[MOCK-FEED] Generator started");
            let mut ticker = tokio::time::interval(feed.tick_interval);
            loop {
                ticker.tick().await;
                if !feed.connected.load(Ordering::SeqCst) {
                    break;
                }

                for symbol in feed.subscribed(TickKind::Snapshot) {
                    if let Some(snapshot) = feed.next_snapshot(&symbol) {
                        if feed.tick_tx.send(TickEvent::Snapshot(snapshot)).await.is_err() {
                            warn!("[MOCK-FEED] Tick channel closed, stopping generator");
                            return;
                        }
                    }
                }
                for symbol in feed.subscribed(TickKind::Transaction) {
                    if let Some(t) = feed.next_transaction(&symbol) {
                        feed.tick_tx.send(TickEvent::Transaction(t)).await.ok();
                    }
                }
                for symbol in feed.subscribed(TickKind::Order) {
                    if let Some(o) = feed.next_order(&symbol) {
                        feed.tick_tx.send(TickEvent::Order(o)).await.ok();
                    }
                }
            }
            debug!("[MOCK-FEED] Generator stopped");
        });

        *inner.generator.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        let inner = &self.inner;
        inner.connected.store(false, Ordering::SeqCst);
        inner.logged_in.store(false, Ordering::SeqCst);
        let handle = inner.generator.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.await.ok();
        }
        inner
            .signal_tx
            .send(FeedSignal::Disconnected { reason: 0 })
            .await
            .ok();
    }

    async fn subscribe(&self, symbols: &[String], kind: TickKind) -> FeedResult<()> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(FeedError::NotConnected);
        }
        for symbol in symbols {
            self.inner.ensure_symbol(symbol);
        }
        self.inner
            .subscriptions
            .entry(kind)
            .or_default()
            .extend(symbols.iter().cloned());
        info!("[MOCK-FEED] Subscribed {:?} for {} symbols", kind, symbols.len());
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String], kind: TickKind) -> FeedResult<()> {
        if let Some(mut set) = self.inner.subscriptions.get_mut(&kind) {
            for symbol in symbols {
                set.remove(symbol);
            }
        }
        Ok(())
    }

    fn status(&self) -> FeedStatus {
        FeedStatus {
            is_connected: self.inner.connected.load(Ordering::SeqCst),
            is_logged_in: self.inner.logged_in.load(Ordering::SeqCst),
        }
    }
}
