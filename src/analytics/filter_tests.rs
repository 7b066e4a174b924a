use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;

use crate::config::FilterConfig;

use super::detector::BreakEvent;
use super::filter::{
    EventFilter, EventSorter, FilterCondition, FilterOp, FilterValue, SortDirection, SortKey,
};

fn event(symbol: &str, score: f64, volatility: f64, age_mins: i64, volume: u64) -> BreakEvent {
    BreakEvent {
        id: format!("{}-{}", symbol, age_mins),
        symbol: symbol.to_string(),
        timestamp: Utc::now() - ChronoDuration::minutes(age_mins),
        prev_close: Decimal::new(1000, 2),
        limit_up_price: Decimal::new(1095, 2),
        break_price: Decimal::new(1062, 2),
        price_drop_rate: 0.03,
        limit_duration_secs: 120,
        total_volume_at_limit: volume,
        total_amount_at_limit: Decimal::new(volume as i64, 0) * Decimal::new(1095, 2),
        max_bid_volume_1: 50_000,
        break_volume: 5_000,
        break_amount: Decimal::new(53_100, 0),
        max_volume_in_window: 8_000,
        avg_volume_in_window: 1_000.0,
        volatility,
        score,
    }
}

fn fixture() -> Vec<BreakEvent> {
    vec![
        event("600519", 82.0, 0.010, 5, 900_000),
        event("000858", 82.0, 0.004, 30, 400_000),
        event("300750", 45.0, 0.020, 10, 700_000),
        event("601127", 61.0, 0.050, 200, 150_000),
    ]
}

#[test]
fn baseline_filter_enforces_score_volume_and_age() {
    let config = FilterConfig {
        min_score: 60.0,
        min_volume: 200_000,
        max_event_age_hours: 1.0,
        ..FilterConfig::default()
    };
    let filter = EventFilter::new(config);
    let kept = filter.apply(&fixture());

    // 300750 fails the score gate, 601127 fails volume and age.
    let symbols: Vec<&str> = kept.iter().map(|e| e.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["600519", "000858"]);
}

#[test]
fn comparison_operators_work_on_numbers() {
    let base = FilterConfig {
        min_score: 0.0,
        min_volume: 0,
        ..FilterConfig::default()
    };

    let gt = EventFilter::new(base.clone()).with_conditions(vec![FilterCondition::new(
        "score",
        FilterOp::Gt,
        FilterValue::Number(61.0),
    )]);
    assert_eq!(gt.apply(&fixture()).len(), 2);

    let between = EventFilter::new(base).with_conditions(vec![FilterCondition::new(
        "score",
        FilterOp::Between,
        FilterValue::Range(45.0, 61.0),
    )]);
    assert_eq!(between.apply(&fixture()).len(), 2);
}

#[test]
fn membership_operators_work_on_symbols() {
    let base = FilterConfig {
        min_score: 0.0,
        min_volume: 0,
        ..FilterConfig::default()
    };
    let wanted = FilterValue::List(vec![
        FilterValue::Text("600519".to_string()),
        FilterValue::Text("000858".to_string()),
    ]);

    let included = EventFilter::new(base.clone()).with_conditions(vec![FilterCondition::new(
        "symbol",
        FilterOp::In,
        wanted.clone(),
    )]);
    assert_eq!(included.apply(&fixture()).len(), 2);

    let excluded = EventFilter::new(base).with_conditions(vec![FilterCondition::new(
        "symbol",
        FilterOp::NotIn,
        wanted,
    )]);
    assert_eq!(excluded.apply(&fixture()).len(), 2);
}

#[test]
fn unknown_fields_do_not_filter_anything_out() {
    let filter = EventFilter::new(FilterConfig {
        min_score: 0.0,
        min_volume: 0,
        ..FilterConfig::default()
    })
    .with_conditions(vec![FilterCondition::new(
        "no_such_field",
        FilterOp::Gt,
        FilterValue::Number(1.0),
    )]);
    assert_eq!(filter.apply(&fixture()).len(), 4);
}

#[test]
fn presets_exist_and_unknown_names_do_not() {
    assert!(EventFilter::preset("high_quality").is_some());
    assert!(EventFilter::preset("recent").is_some());
    assert!(EventFilter::preset("active_trading").is_some());
    assert!(EventFilter::preset("stable_price").is_some());
    assert!(EventFilter::preset("nope").is_none());

    assert!(EventSorter::preset("by_score").is_some());
    assert!(EventSorter::preset("comprehensive").is_some());
    assert!(EventSorter::preset("nope").is_none());
}

#[test]
fn sort_by_score_descends() {
    let mut events = fixture();
    EventSorter::preset("by_score").unwrap().sort(&mut events);
    let scores: Vec<f64> = events.iter().map(|e| e.score).collect();
    assert_eq!(scores, vec![82.0, 82.0, 61.0, 45.0]);
}

/// Multi-key sort: the 82-point tie is broken by volatility ascending.
#[test]
fn comprehensive_sort_breaks_ties_in_order() {
    let mut events = fixture();
    EventSorter::preset("comprehensive").unwrap().sort(&mut events);
    let symbols: Vec<&str> = events.iter().map(|e| e.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["000858", "600519", "601127", "300750"]);
}

#[test]
fn ascending_and_descending_directions_invert() {
    let mut asc = fixture();
    EventSorter::new(vec![SortKey::new("score", SortDirection::Asc)]).sort(&mut asc);
    let mut desc = fixture();
    EventSorter::new(vec![SortKey::new("score", SortDirection::Desc)]).sort(&mut desc);

    let up: Vec<f64> = asc.iter().map(|e| e.score).collect();
    let mut down: Vec<f64> = desc.iter().map(|e| e.score).collect();
    down.reverse();
    assert_eq!(up, down);
}
