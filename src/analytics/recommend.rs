//! Symbol-level recommendations aggregated from scored break events.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::config::RecommenderConfig;

use super::detector::BreakEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn escalate(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium | RiskLevel::High => RiskLevel::High,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Recommendation {
    pub symbol: String,
    /// 1-based position after global ordering by `total_score`.
    pub rank: usize,
    /// Break price of the most recent supporting event.
    pub current_price: Decimal,
    pub total_score: f64,
    pub max_score: f64,
    pub avg_score: f64,
    pub event_count: usize,
    pub latest_event_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    /// 0..=1, higher means more supporting evidence.
    pub confidence: f64,
    pub reasons: String,
    pub supporting_events: Vec<BreakEvent>,
}

/// Collapses a set of break events into one ranked row per symbol.
pub struct RecommendationEngine {
    config: RecommenderConfig,
}

impl RecommendationEngine {
    pub fn new(config: RecommenderConfig) -> Self {
        Self { config }
    }

    /// Ranks symbols by aggregate score, strongest first. `limit` of zero
    /// means no cap.
    pub fn recommend(&self, events: &[BreakEvent], limit: usize) -> Vec<Recommendation> {
        let mut by_symbol: HashMap<&str, Vec<&BreakEvent>> = HashMap::new();
        for event in events {
            by_symbol.entry(&event.symbol).or_default().push(event);
        }

        let mut out: Vec<Recommendation> = by_symbol
            .into_iter()
            .map(|(symbol, group)| self.build(symbol, &group))
            .collect();
        out.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        for (i, rec) in out.iter_mut().enumerate() {
            rec.rank = i + 1;
        }
        if limit > 0 {
            out.truncate(limit);
        }
        debug!("[RECOMMEND] Produced {} recommendations", out.len());
        out
    }

    fn build(&self, symbol: &str, group: &[&BreakEvent]) -> Recommendation {
        let max_score = group.iter().map(|e| e.score).fold(f64::MIN, f64::max);
        let avg_score = group.iter().map(|e| e.score).sum::<f64>() / group.len() as f64;
        // Repeat offenders get a small additive bonus, capped at 10 points.
        let count_bonus = (2.0 * group.len() as f64).min(10.0);
        let total_score = (0.7 * max_score + 0.3 * avg_score + count_bonus).clamp(0.0, 100.0);

        let latest = group
            .iter()
            .max_by_key(|e| e.timestamp)
            .expect("group is never empty");

        let mut risk = if total_score >= self.config.low_risk_threshold {
            RiskLevel::Low
        } else if total_score >= self.config.medium_risk_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        };
        // Escalation looks at the freshest evidence only; an old noisy
        // event must not taint a symbol whose latest break was calm.
        if latest.volatility > 0.05 || latest.price_drop_rate > 0.08 {
            risk = risk.escalate();
        }

        Recommendation {
            symbol: symbol.to_string(),
            rank: 0,
            current_price: latest.break_price,
            total_score,
            max_score,
            avg_score,
            event_count: group.len(),
            latest_event_at: latest.timestamp,
            risk_level: risk,
            confidence: self.confidence(latest),
            reasons: self.reasons(total_score, group, latest),
            supporting_events: group.iter().map(|e| (*e).clone()).collect(),
        }
    }

    fn confidence(&self, latest: &BreakEvent) -> f64 {
        let age_hours = (Utc::now() - latest.timestamp).num_seconds() as f64 / 3600.0;

        let w = &self.config;
        let c = w.score_weight * (latest.score / 100.0)
            + w.volume_weight * (latest.break_volume as f64 / 1_000_000.0).min(1.0)
            + w.duration_weight * (latest.limit_duration_secs as f64 / 600.0).min(1.0)
            + w.recency_weight * (1.0 - age_hours / 24.0).max(0.0);
        c.clamp(0.0, 1.0)
    }

    /// Thresholded rule templates; only the rules that actually fire show
    /// up in the reason string.
    fn reasons(&self, total_score: f64, group: &[&BreakEvent], latest: &BreakEvent) -> String {
        let mut parts = Vec::new();
        if total_score >= 80.0 {
            parts.push(format!("exceptional aggregate score {:.1}", total_score));
        } else if total_score >= 60.0 {
            parts.push(format!("strong aggregate score {:.1}", total_score));
        }
        if latest.limit_duration_secs >= 300 {
            parts.push(format!("held limit {}s", latest.limit_duration_secs));
        }
        if latest.break_volume >= 500_000 {
            parts.push(format!("heavy exit volume {}", latest.break_volume));
        }
        if group.len() > 1 {
            parts.push(format!("{} breaks today", group.len()));
        }
        let age = Utc::now() - latest.timestamp;
        if age < ChronoDuration::hours(1) {
            parts.push("broke within the last hour".to_string());
        } else if age < ChronoDuration::hours(6) {
            parts.push("broke earlier today".to_string());
        }
        if parts.is_empty() {
            parts.push(format!("aggregate score {:.1}", total_score));
        }
        parts.join("; ")
    }
}
