//! Field-based filtering and multi-key sorting over break events.

use std::cmp::Ordering;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::prelude::*;
use serde::Deserialize;
use tracing::warn;

use crate::config::FilterConfig;

use super::detector::BreakEvent;

/// A comparable value: either a field pulled out of an event or an operand
/// supplied in a condition.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Time(DateTime<Utc>),
    Text(String),
    List(Vec<FilterValue>),
    Range(f64, f64),
}

impl FilterValue {
    fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (FilterValue::Number(a), FilterValue::Number(b)) => Some(a.total_cmp(b)),
            (FilterValue::Text(a), FilterValue::Text(b)) => Some(a.cmp(b)),
            (FilterValue::Time(a), FilterValue::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl FilterCondition {
    pub fn new(field: &str, op: FilterOp, value: FilterValue) -> Self {
        Self {
            field: field.to_string(),
            op,
            value,
        }
    }

    fn matches(&self, event: &BreakEvent) -> bool {
        let field = match extract_field(event, &self.field) {
            Some(v) => v,
            None => {
                warn!("[FILTER] Unknown field '{}', condition skipped", self.field);
                return true;
            }
        };
        match self.op {
            FilterOp::Eq => field == self.value,
            FilterOp::Ne => field != self.value,
            FilterOp::Gt => field.compare(&self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                field.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => field.compare(&self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                field.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::In => match &self.value {
                FilterValue::List(items) => items.contains(&field),
                _ => false,
            },
            FilterOp::NotIn => match &self.value {
                FilterValue::List(items) => !items.contains(&field),
                _ => false,
            },
            FilterOp::Between => match (&field, &self.value) {
                (FilterValue::Number(n), FilterValue::Range(lo, hi)) => n >= lo && n <= hi,
                _ => false,
            },
        }
    }
}

/// Pulls a named field out of an event as a comparable value.
fn extract_field(event: &BreakEvent, field: &str) -> Option<FilterValue> {
    let value = match field {
        "symbol" => FilterValue::Text(event.symbol.clone()),
        "score" => FilterValue::Number(event.score),
        "price_drop_rate" => FilterValue::Number(event.price_drop_rate),
        "limit_duration_secs" => FilterValue::Number(event.limit_duration_secs as f64),
        "total_volume_at_limit" => FilterValue::Number(event.total_volume_at_limit as f64),
        "break_volume" => FilterValue::Number(event.break_volume as f64),
        "break_amount" => FilterValue::Number(event.break_amount.to_f64().unwrap_or(0.0)),
        "max_bid_volume_1" => FilterValue::Number(event.max_bid_volume_1 as f64),
        "max_volume_in_window" => FilterValue::Number(event.max_volume_in_window as f64),
        "avg_volume_in_window" => FilterValue::Number(event.avg_volume_in_window),
        "volatility" => FilterValue::Number(event.volatility),
        "prev_close" => FilterValue::Number(event.prev_close.to_f64().unwrap_or(0.0)),
        "limit_up_price" => FilterValue::Number(event.limit_up_price.to_f64().unwrap_or(0.0)),
        "break_price" => FilterValue::Number(event.break_price.to_f64().unwrap_or(0.0)),
        "timestamp" => FilterValue::Time(event.timestamp),
        _ => return None,
    };
    Some(value)
}

/// Baseline quality gate plus caller-supplied conditions; conditions are
/// ANDed.
pub struct EventFilter {
    config: FilterConfig,
    conditions: Vec<FilterCondition>,
}

impl EventFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            conditions: Vec::new(),
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<FilterCondition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn apply(&self, events: &[BreakEvent]) -> Vec<BreakEvent> {
        let cutoff =
            Utc::now() - ChronoDuration::seconds((self.config.max_event_age_hours * 3600.0) as i64);
        events
            .iter()
            .filter(|e| self.baseline(e, cutoff))
            .filter(|e| self.conditions.iter().all(|c| c.matches(e)))
            .cloned()
            .collect()
    }

    fn baseline(&self, event: &BreakEvent, cutoff: DateTime<Utc>) -> bool {
        let price = event.break_price.to_f64().unwrap_or(0.0);
        event.score >= self.config.min_score
            && price >= self.config.min_price
            && price <= self.config.max_price
            && event.total_volume_at_limit >= self.config.min_volume
            && event.timestamp >= cutoff
    }

    /// Named condition sets for common screens.
    pub fn preset(name: &str) -> Option<Vec<FilterCondition>> {
        let conditions = match name {
            "high_quality" => vec![
                FilterCondition::new("score", FilterOp::Gte, FilterValue::Number(70.0)),
                FilterCondition::new("volatility", FilterOp::Lte, FilterValue::Number(0.03)),
            ],
            "recent" => vec![FilterCondition::new(
                "timestamp",
                FilterOp::Gte,
                FilterValue::Time(Utc::now() - ChronoDuration::hours(1)),
            )],
            "active_trading" => vec![FilterCondition::new(
                "total_volume_at_limit",
                FilterOp::Gte,
                FilterValue::Number(500_000.0),
            )],
            "stable_price" => vec![FilterCondition::new(
                "volatility",
                FilterOp::Lte,
                FilterValue::Number(0.01),
            )],
            _ => return None,
        };
        Some(conditions)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: &str, direction: SortDirection) -> Self {
        Self {
            field: field.to_string(),
            direction,
        }
    }
}

/// Stable multi-key sort: later keys only break ties left by earlier ones.
pub struct EventSorter {
    keys: Vec<SortKey>,
}

impl EventSorter {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    pub fn preset(name: &str) -> Option<Self> {
        let keys = match name {
            "by_score" => vec![SortKey::new("score", SortDirection::Desc)],
            "by_time" => vec![SortKey::new("timestamp", SortDirection::Desc)],
            "by_volume" => vec![SortKey::new(
                "total_volume_at_limit",
                SortDirection::Desc,
            )],
            "comprehensive" => vec![
                SortKey::new("score", SortDirection::Desc),
                SortKey::new("volatility", SortDirection::Asc),
                SortKey::new("timestamp", SortDirection::Desc),
            ],
            _ => return None,
        };
        Some(Self::new(keys))
    }

    pub fn sort(&self, events: &mut [BreakEvent]) {
        events.sort_by(|a, b| {
            for key in &self.keys {
                let va = extract_field(a, &key.field);
                let vb = extract_field(b, &key.field);
                let ord = match (va, vb) {
                    (Some(va), Some(vb)) => va.compare(&vb).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ord = match key.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}
