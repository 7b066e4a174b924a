use serde::Deserialize;
use std::fs;

use crate::error::ConfigError;

/// Reconnect policy and monitoring knobs for one logical connection.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub max_delay_secs: f64,
    pub backoff_factor: f64,
    pub jitter: bool,
    pub reset_on_success: bool,

    pub health_check_enabled: bool,
    pub health_check_interval_secs: f64,
    pub quality_monitor_enabled: bool,
    pub quality_monitor_interval_secs: f64,

    pub failure_detection_enabled: bool,
    pub max_no_data_secs: f64,
    pub min_data_rate: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_secs: 1.0,
            max_delay_secs: 60.0,
            backoff_factor: 2.0,
            jitter: true,
            reset_on_success: true,
            health_check_enabled: true,
            health_check_interval_secs: 30.0,
            quality_monitor_enabled: true,
            quality_monitor_interval_secs: 60.0,
            failure_detection_enabled: true,
            max_no_data_secs: 300.0,
            min_data_rate: 1.0,
        }
    }
}

/// Connection pool sizing and selection mode.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub failover_enabled: bool,
    pub load_balance_enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            failover_enabled: true,
            load_balance_enabled: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub batch_size: usize,
    pub flush_interval_secs: f64,
    pub cache_ttl_secs: u64,
    pub latency_window: usize,
    pub monitor_interval_secs: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 10_000,
            batch_size: 100,
            flush_interval_secs: 5.0,
            cache_ttl_secs: 300,
            latency_window: 1000,
            monitor_interval_secs: 30.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub analysis_freshness_secs: u64,
    pub stats_interval_secs: f64,
    /// How often a recommendation refresh task is queued.
    pub recommend_interval_secs: f64,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 10_000,
            analysis_freshness_secs: 60,
            stats_interval_secs: 30.0,
            recommend_interval_secs: 60.0,
            cache: CacheConfig::default(),
        }
    }
}

/// Incremental cache sizing: TTL expiry, LRU capacity, and the sweep that
/// reclaims expired entries independently of reads.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
    pub sweep_interval_secs: f64,
    pub log_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 3600,
            sweep_interval_secs: 300.0,
            log_capacity: 1000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Daily upper bound as a fraction of the previous close.
    pub limit_up_threshold: f64,
    /// Relative tolerance when matching the last price to the bound.
    pub price_tolerance: f64,
    /// Seconds pinned at the bound before a drop can count as a break.
    pub min_limit_duration_secs: i64,
    /// Price-drop ratio that confirms a break.
    pub break_threshold: f64,
    /// Volume multiple of the episode's per-second average that confirms a break.
    pub volume_spike_threshold: f64,
    pub window_secs: i64,
    pub max_events_per_symbol: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            limit_up_threshold: 0.095,
            price_tolerance: 0.001,
            min_limit_duration_secs: 30,
            break_threshold: 0.02,
            volume_spike_threshold: 2.0,
            window_secs: 300,
            max_events_per_symbol: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub duration_weight: f64,
    pub volume_weight: f64,
    pub stability_weight: f64,
    pub intensity_weight: f64,
    pub optimal_duration_secs: f64,
    pub max_score: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            duration_weight: 0.25,
            volume_weight: 0.30,
            stability_weight: 0.20,
            intensity_weight: 0.25,
            optimal_duration_secs: 300.0,
            max_score: 100.0,
        }
    }
}

/// Built-in filters applied before any caller-supplied conditions.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_score: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub min_volume: u64,
    pub max_event_age_hours: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_score: 30.0,
            min_price: 1.0,
            max_price: 1000.0,
            min_volume: 10_000,
            max_event_age_hours: 24.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RecommenderConfig {
    pub low_risk_threshold: f64,
    pub medium_risk_threshold: f64,
    pub score_weight: f64,
    pub volume_weight: f64,
    pub duration_weight: f64,
    pub recency_weight: f64,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            low_risk_threshold: 70.0,
            medium_risk_threshold: 50.0,
            score_weight: 0.4,
            volume_weight: 0.3,
            duration_weight: 0.2,
            recency_weight: 0.1,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub bus_capacity: Option<usize>,

    pub connection: ConnectionConfig,
    pub pool: PoolConfig,
    pub processor: ProcessorConfig,
    pub engine: EngineConfig,
    pub detector: DetectorConfig,
    pub scorer: ScorerConfig,
    pub filter: FilterConfig,
    pub recommender: RecommenderConfig,
}

impl AppConfig {
    /// Load from a YAML file; a missing file yields the built-in defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_string(),
                    source: e,
                })
            }
        };

        // Strip BOM if present
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            source: e,
        })
    }

    pub fn bus_capacity(&self) -> usize {
        self.bus_capacity.unwrap_or(1024)
    }
}
