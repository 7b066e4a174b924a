use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;

use crate::config::RecommenderConfig;

use super::detector::BreakEvent;
use super::recommend::{RecommendationEngine, RiskLevel};

fn event(symbol: &str, score: f64, volatility: f64, drop_rate: f64, age_mins: i64) -> BreakEvent {
    BreakEvent {
        id: format!("{}-{}", symbol, age_mins),
        symbol: symbol.to_string(),
        timestamp: Utc::now() - ChronoDuration::minutes(age_mins),
        prev_close: Decimal::new(1000, 2),
        limit_up_price: Decimal::new(1095, 2),
        break_price: Decimal::new(1062, 2),
        price_drop_rate: drop_rate,
        limit_duration_secs: 300,
        total_volume_at_limit: 500_000,
        total_amount_at_limit: Decimal::new(5_475_000, 0),
        max_bid_volume_1: 50_000,
        break_volume: 5_000,
        break_amount: Decimal::new(53_100, 0),
        max_volume_in_window: 8_000,
        avg_volume_in_window: 1_700.0,
        volatility,
        score,
    }
}

fn engine() -> RecommendationEngine {
    RecommendationEngine::new(RecommenderConfig::default())
}

#[test]
fn empty_input_yields_no_recommendations() {
    assert!(engine().recommend(&[], 10).is_empty());
}

#[test]
fn aggregate_score_combines_max_avg_and_count() {
    let events = vec![
        event("600519", 80.0, 0.01, 0.03, 5),
        event("600519", 60.0, 0.01, 0.03, 15),
    ];
    let recs = engine().recommend(&events, 0);
    assert_eq!(recs.len(), 1);
    let rec = &recs[0];

    // 0.7 * 80 + 0.3 * 70 + 2 * 2 events = 81.0
    assert!((rec.total_score - 81.0).abs() < 1e-9);
    assert_eq!(rec.event_count, 2);
    assert_eq!(rec.max_score, 80.0);
    assert!((rec.avg_score - 70.0).abs() < 1e-9);
    assert_eq!(rec.supporting_events.len(), 2);
    assert_eq!(rec.current_price, Decimal::new(1062, 2));
}

#[test]
fn repeat_bonus_is_capped() {
    let events: Vec<BreakEvent> = (0..20)
        .map(|i| event("600519", 90.0, 0.01, 0.03, i))
        .collect();
    let recs = engine().recommend(&events, 0);
    // 0.7*90 + 0.3*90 + min(40, 10) = 100, clipped at 100.
    assert!((recs[0].total_score - 100.0).abs() < 1e-9);
}

#[test]
fn risk_levels_follow_the_thresholds() {
    let strong = engine().recommend(&[event("600519", 95.0, 0.01, 0.03, 5)], 0);
    assert_eq!(strong[0].risk_level, RiskLevel::Low);

    let middling = engine().recommend(&[event("600519", 55.0, 0.01, 0.03, 5)], 0);
    assert_eq!(middling[0].risk_level, RiskLevel::Medium);

    let weak = engine().recommend(&[event("600519", 20.0, 0.01, 0.03, 5)], 0);
    assert_eq!(weak[0].risk_level, RiskLevel::High);
}

#[test]
fn volatile_or_deep_drops_escalate_risk() {
    let noisy = engine().recommend(&[event("600519", 95.0, 0.06, 0.03, 5)], 0);
    assert_eq!(noisy[0].risk_level, RiskLevel::Medium);

    let crash = engine().recommend(&[event("600519", 95.0, 0.01, 0.09, 5)], 0);
    assert_eq!(crash[0].risk_level, RiskLevel::Medium);

    let both_weak = engine().recommend(&[event("600519", 20.0, 0.06, 0.09, 5)], 0);
    assert_eq!(both_weak[0].risk_level, RiskLevel::High);
}

#[test]
fn escalation_looks_at_the_latest_event_only() {
    // An old noisy break followed by a calm one: the calm event decides.
    let events = vec![
        event("600519", 90.0, 0.06, 0.03, 120),
        event("600519", 90.0, 0.01, 0.03, 5),
    ];
    let recs = engine().recommend(&events, 0);
    assert_eq!(recs[0].risk_level, RiskLevel::Low);

    // The other way around the fresh noise still escalates.
    let events = vec![
        event("600519", 90.0, 0.01, 0.03, 120),
        event("600519", 90.0, 0.06, 0.03, 5),
    ];
    let recs = engine().recommend(&events, 0);
    assert_eq!(recs[0].risk_level, RiskLevel::Medium);
}

#[test]
fn confidence_stays_in_unit_range() {
    let fresh = engine().recommend(&[event("600519", 100.0, 0.0, 0.03, 0)], 0);
    assert!((0.0..=1.0).contains(&fresh[0].confidence));

    let stale = engine().recommend(&[event("600519", 5.0, 0.0, 0.03, 60 * 48)], 0);
    assert!((0.0..=1.0).contains(&stale[0].confidence));
    assert!(fresh[0].confidence > stale[0].confidence);
}

#[test]
fn output_is_ranked_and_limited() {
    let events = vec![
        event("600519", 90.0, 0.01, 0.03, 5),
        event("000858", 50.0, 0.01, 0.03, 5),
        event("300750", 70.0, 0.01, 0.03, 5),
    ];
    let recs = engine().recommend(&events, 2);
    assert_eq!(recs.len(), 2);
    assert_eq!(recs[0].symbol, "600519");
    assert_eq!(recs[1].symbol, "300750");
    assert_eq!(recs[0].rank, 1);
    assert_eq!(recs[1].rank, 2);
    assert!(recs[0].total_score >= recs[1].total_score);
}

#[test]
fn reasons_come_from_rules_that_fired() {
    let events = vec![
        event("600519", 80.0, 0.01, 0.03, 5),
        event("600519", 60.0, 0.01, 0.04, 15),
    ];
    let recs = engine().recommend(&events, 0);
    let reasons = &recs[0].reasons;
    assert!(reasons.contains("; "));
    assert!(reasons.contains("exceptional aggregate score 81.0"));
    assert!(reasons.contains("held limit 300s"));
    assert!(reasons.contains("2 breaks today"));
    assert!(reasons.contains("broke within the last hour"));
    // Thin exit volume stays silent.
    assert!(!reasons.contains("heavy exit volume"));
}

#[test]
fn a_quiet_symbol_still_gets_a_reason() {
    let mut weak = event("600519", 20.0, 0.01, 0.03, 60 * 10);
    weak.limit_duration_secs = 60;
    let recs = engine().recommend(&[weak], 0);
    assert!(recs[0].reasons.contains("aggregate score"));
}
