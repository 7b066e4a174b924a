//! Break quality scoring.
//!
//! Four weighted components on a 0..=100 scale: how long the symbol held
//! the limit, how heavy the breaking volume was, how stable the tape was
//! beforehand, and how decisive the drop itself is.

use tracing::debug;

use crate::config::ScorerConfig;

use super::detector::BreakEvent;

#[derive(Clone, Debug, Default)]
pub struct ScoreBreakdown {
    pub duration: f64,
    pub volume: f64,
    pub stability: f64,
    pub intensity: f64,
    pub total: f64,
}

pub struct BreakScorer {
    config: ScorerConfig,
}

impl BreakScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, event: &BreakEvent) -> ScoreBreakdown {
        let duration = self.duration_component(event.limit_duration_secs as f64);
        let volume = self.volume_component(event);
        let stability = self.stability_component(event.volatility);
        let intensity = self.intensity_component(event.price_drop_rate);

        let w = &self.config;
        let raw = w.duration_weight * duration
            + w.volume_weight * volume
            + w.stability_weight * stability
            + w.intensity_weight * intensity;
        let total = (raw * self.config.max_score).clamp(0.0, self.config.max_score);

        debug!(
            "[SCORER] {} d={:.3} v={:.3} s={:.3} i={:.3} -> {:.1}",
            event.symbol, duration, volume, stability, intensity, total
        );
        ScoreBreakdown {
            duration,
            volume,
            stability,
            intensity,
            total,
        }
    }

    /// Gaussian centered on the optimal hold duration; very short pins and
    /// very long stale pins both score low.
    fn duration_component(&self, duration_secs: f64) -> f64 {
        let optimal = self.config.optimal_duration_secs;
        let sigma = optimal / 3.0;
        (-((duration_secs - optimal).powi(2)) / (2.0 * sigma * sigma)).exp()
    }

    /// Break volume relative to the average window volume; falls back to
    /// the per-second at-limit average when no window data survives.
    /// Ratios above 1 are compressed on a log10 scale.
    fn volume_component(&self, event: &BreakEvent) -> f64 {
        let mut avg = event.avg_volume_in_window;
        if avg <= 0.0 {
            avg = event.total_volume_at_limit as f64
                / event.limit_duration_secs.max(1) as f64;
        }
        if avg <= 0.0 {
            return 0.0;
        }
        let ratio = event.break_volume as f64 / avg;
        if ratio > 1.0 {
            ratio.log10().clamp(0.0, 1.0)
        } else {
            ratio.max(0.0)
        }
    }

    fn stability_component(&self, volatility: f64) -> f64 {
        (1.0 - volatility * 10.0).max(0.0)
    }

    /// Drops between 2% and 5% are the decisive sweet spot; smaller ones
    /// ramp up linearly and larger ones decay to zero at 10%.
    fn intensity_component(&self, drop_rate: f64) -> f64 {
        if drop_rate < 0.02 {
            (drop_rate / 0.02).max(0.0)
        } else if drop_rate <= 0.05 {
            1.0
        } else {
            ((0.10 - drop_rate) / 0.05).clamp(0.0, 1.0)
        }
    }
}
