//! Limit-up episode tracking and break detection.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{DetectorConfig, ScorerConfig};
use crate::error::ComputeError;
use crate::events::Snapshot;

use super::scorer::BreakScorer;

/// A scored limit-up break: the symbol sat at its daily upper bound and
/// then fell away from it hard or fast enough to matter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakEvent {
    pub id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub prev_close: Decimal,
    pub limit_up_price: Decimal,
    pub break_price: Decimal,
    /// Relative drop from the limit price, e.g. 0.02 for 2%.
    pub price_drop_rate: f64,
    pub limit_duration_secs: i64,
    pub total_volume_at_limit: u64,
    pub total_amount_at_limit: Decimal,
    pub max_bid_volume_1: u64,
    pub break_volume: u64,
    pub break_amount: Decimal,
    pub max_volume_in_window: u64,
    pub avg_volume_in_window: f64,
    /// Stddev of consecutive tick returns over the rolling window.
    pub volatility: f64,
    pub score: f64,
}

#[derive(Clone, Debug, Default)]
pub struct AnalyzerStats {
    pub snapshots_seen: u64,
    pub episodes_opened: u64,
    pub events_emitted: u64,
    pub tracked_symbols: usize,
    pub events_retained: usize,
    pub score_min: f64,
    pub score_avg: f64,
    pub score_max: f64,
}

struct Episode {
    started_at: DateTime<Utc>,
    total_volume: u64,
    total_amount: Decimal,
    max_bid_volume_1: u64,
}

#[derive(Clone, Copy)]
struct WindowPoint {
    timestamp: DateTime<Utc>,
    price: f64,
    volume: u64,
}

struct SymbolState {
    episode: Option<Episode>,
    window: VecDeque<WindowPoint>,
}

/// Per-symbol limit-up state machine. All prices are exact decimals;
/// ratios and volatility are computed in floating point.
pub struct LimitUpAnalyzer {
    config: DetectorConfig,
    scorer: BreakScorer,
    limit_factor: Decimal,

    prev_closes: DashMap<String, Decimal>,
    states: DashMap<String, SymbolState>,
    events: DashMap<String, VecDeque<BreakEvent>>,
    counters: DashMap<&'static str, u64>,
}

impl LimitUpAnalyzer {
    pub fn new(config: DetectorConfig, scorer_config: ScorerConfig) -> Self {
        let limit_factor = Decimal::from_f64(1.0 + config.limit_up_threshold)
            .unwrap_or_else(|| Decimal::new(1095, 3));
        Self {
            config,
            scorer: BreakScorer::new(scorer_config),
            limit_factor,
            prev_closes: DashMap::new(),
            states: DashMap::new(),
            events: DashMap::new(),
            counters: DashMap::new(),
        }
    }

    pub fn set_prev_close(&self, symbol: &str, prev_close: Decimal) {
        self.prev_closes.insert(symbol.to_string(), prev_close);
    }

    pub fn limit_up_price(&self, prev_close: Decimal) -> Decimal {
        (prev_close * self.limit_factor).round_dp(2)
    }

    /// Feeds one snapshot through the state machine. Returns a scored
    /// event when this snapshot closes an episode with a qualifying break.
    pub fn analyze_snapshot(&self, snapshot: &Snapshot) -> Result<Option<BreakEvent>, ComputeError> {
        let prev_close = *self
            .prev_closes
            .get(&snapshot.symbol)
            .ok_or_else(|| ComputeError::MissingPrevClose(snapshot.symbol.clone()))?;

        self.bump("snapshots_seen");

        let limit = self.limit_up_price(prev_close);
        let tolerance = limit * Decimal::from_f64(self.config.price_tolerance).unwrap_or_default();
        let at_limit = (snapshot.last_price - limit).abs() <= tolerance;

        // One entry guard spans the window push and the episode
        // transition, so two analyses of the same symbol cannot
        // interleave between them.
        let mut state = self
            .states
            .entry(snapshot.symbol.clone())
            .or_insert_with(|| SymbolState {
                episode: None,
                window: VecDeque::new(),
            });
        push_window(&mut state.window, snapshot, self.config.window_secs);

        if at_limit {
            match state.episode.as_mut() {
                Some(episode) => {
                    episode.total_volume += snapshot.volume;
                    episode.total_amount += snapshot.amount;
                    episode.max_bid_volume_1 =
                        episode.max_bid_volume_1.max(snapshot.bid_volume_1());
                }
                None => {
                    state.episode = Some(Episode {
                        started_at: snapshot.timestamp,
                        total_volume: snapshot.volume,
                        total_amount: snapshot.amount,
                        max_bid_volume_1: snapshot.bid_volume_1(),
                    });
                    self.bump("episodes_opened");
                    debug!("[ANALYZER] {} pinned at limit {}", snapshot.symbol, limit);
                }
            }
            return Ok(None);
        }

        match state.episode.take() {
            Some(episode) => {
                // Window statistics are read under the same guard so a
                // later tick cannot leak into this episode's window.
                let volatility = window_volatility(&state.window);
                let window_volumes = window_volume(&state.window);
                drop(state);
                Ok(self.close_episode(snapshot, prev_close, limit, episode, volatility, window_volumes))
            }
            None => Ok(None),
        }
    }

    fn close_episode(
        &self,
        snapshot: &Snapshot,
        prev_close: Decimal,
        limit: Decimal,
        episode: Episode,
        volatility: f64,
        window_volumes: (u64, f64),
    ) -> Option<BreakEvent> {
        let duration = (snapshot.timestamp - episode.started_at).num_seconds();
        let drop_rate = ((limit - snapshot.last_price) / limit)
            .to_f64()
            .unwrap_or(0.0);
        // Average per-second volume while pinned; duration clamped so a
        // sub-second episode cannot divide by zero.
        let avg_volume = episode.total_volume as f64 / duration.max(1) as f64;
        let volume_spike =
            snapshot.volume as f64 >= self.config.volume_spike_threshold * avg_volume;

        let is_break = drop_rate >= self.config.break_threshold || volume_spike;
        if !is_break || duration < self.config.min_limit_duration_secs {
            debug!(
                "[ANALYZER] {} left limit without a break (drop={:.4} duration={}s)",
                snapshot.symbol, drop_rate, duration
            );
            return None;
        }

        let (max_volume_in_window, avg_volume_in_window) = window_volumes;
        let mut event = BreakEvent {
            id: Uuid::new_v4().to_string(),
            symbol: snapshot.symbol.clone(),
            timestamp: snapshot.timestamp,
            prev_close,
            limit_up_price: limit,
            break_price: snapshot.last_price,
            price_drop_rate: drop_rate,
            limit_duration_secs: duration,
            total_volume_at_limit: episode.total_volume,
            total_amount_at_limit: episode.total_amount,
            max_bid_volume_1: episode.max_bid_volume_1,
            break_volume: snapshot.volume,
            break_amount: snapshot.amount,
            max_volume_in_window,
            avg_volume_in_window,
            volatility,
            score: 0.0,
        };
        event.score = self.scorer.score(&event).total;

        self.bump("events_emitted");
        info!(
            "[ANALYZER] 🚨 Break on {}: drop={:.2}% duration={}s score={:.1}",
            event.symbol,
            drop_rate * 100.0,
            duration,
            event.score
        );

        let mut per_symbol = self.events.entry(snapshot.symbol.clone()).or_default();
        if per_symbol.len() >= self.config.max_events_per_symbol {
            per_symbol.pop_front();
        }
        per_symbol.push_back(event.clone());

        Some(event)
    }

    pub fn events_for(&self, symbol: &str) -> Vec<BreakEvent> {
        self.events
            .get(symbol)
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_events(&self) -> Vec<BreakEvent> {
        self.events
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Drops events and idle window state older than `max_age`.
    pub fn cleanup_old_data(&self, max_age: ChronoDuration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        for mut entry in self.events.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|e| e.timestamp >= cutoff);
            removed += before - entry.value().len();
        }
        self.events.retain(|_, v| !v.is_empty());
        if removed > 0 {
            info!("[ANALYZER] Cleaned up {} stale events", removed);
        }
        removed
    }

    pub fn stats(&self) -> AnalyzerStats {
        let get = |key| self.counters.get(key).map(|v| *v).unwrap_or(0);
        let scores: Vec<f64> = self
            .events
            .iter()
            .flat_map(|entry| entry.value().iter().map(|e| e.score).collect::<Vec<_>>())
            .collect();
        let (score_min, score_avg, score_max) = if scores.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                scores.iter().copied().fold(f64::MAX, f64::min),
                scores.iter().sum::<f64>() / scores.len() as f64,
                scores.iter().copied().fold(f64::MIN, f64::max),
            )
        };
        AnalyzerStats {
            snapshots_seen: get("snapshots_seen"),
            episodes_opened: get("episodes_opened"),
            events_emitted: get("events_emitted"),
            tracked_symbols: self.states.len(),
            events_retained: scores.len(),
            score_min,
            score_avg,
            score_max,
        }
    }

    fn bump(&self, key: &'static str) {
        *self.counters.entry(key).or_insert(0) += 1;
    }
}

fn push_window(window: &mut VecDeque<WindowPoint>, snapshot: &Snapshot, window_secs: i64) {
    window.push_back(WindowPoint {
        timestamp: snapshot.timestamp,
        price: snapshot.last_price.to_f64().unwrap_or(0.0),
        volume: snapshot.volume,
    });
    let horizon = snapshot.timestamp - ChronoDuration::seconds(window_secs);
    while window.front().map(|p| p.timestamp < horizon).unwrap_or(false) {
        window.pop_front();
    }
}

/// Max and mean per-snapshot volume over the rolling window.
fn window_volume(window: &VecDeque<WindowPoint>) -> (u64, f64) {
    if window.is_empty() {
        return (0, 0.0);
    }
    let max = window.iter().map(|p| p.volume).max().unwrap_or(0);
    let avg = window.iter().map(|p| p.volume).sum::<u64>() as f64 / window.len() as f64;
    (max, avg)
}

/// Stddev of consecutive percentage returns over the rolling window.
fn window_volatility(window: &VecDeque<WindowPoint>) -> f64 {
    let returns: Vec<f64> = window
        .iter()
        .zip(window.iter().skip(1))
        .filter(|(a, _)| a.price > 0.0)
        .map(|(a, b)| (b.price - a.price) / a.price)
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}
