//! Limit-up episode tracking, break scoring, filtering/sorting and
//! symbol-level recommendations.

pub mod detector;
pub mod filter;
pub mod recommend;
pub mod scorer;

pub use detector::{AnalyzerStats, BreakEvent, LimitUpAnalyzer};
pub use filter::{
    EventFilter, EventSorter, FilterCondition, FilterOp, FilterValue, SortDirection, SortKey,
};
pub use recommend::{Recommendation, RecommendationEngine, RiskLevel};
pub use scorer::{BreakScorer, ScoreBreakdown};

#[cfg(test)]
mod filter_tests;
#[cfg(test)]
mod recommend_tests;
