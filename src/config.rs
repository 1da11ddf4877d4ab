//! TOML configuration for faultmedic.
//!
//! Every section has compiled-in defaults, so a config file only needs the
//! keys it wants to change. The file location can be overridden with the
//! `FAULTMEDIC_CONFIG` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "FAULTMEDIC_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/faultmedic/faultmedic.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub timeseries: TimeSeriesConfig,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub ml: MlConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub driver: DriverConfig,
}

impl Config {
    /// Parse a faultmedic TOML file. Sections it leaves out keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read faultmedic config {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("invalid faultmedic config {}", path.display()))?;
        debug!(path = %path.display(), "Config parsed");
        Ok(config)
    }

    /// First usable config among `$FAULTMEDIC_CONFIG` and
    /// [`SYSTEM_CONFIG_PATH`], else the built-in defaults.
    ///
    /// A path named by the environment is always tried. The system path is
    /// only tried when it exists. Unusable files are logged and skipped.
    pub fn load_or_default() -> Self {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let system = Some(PathBuf::from(SYSTEM_CONFIG_PATH)).filter(|p| p.exists());

        for path in explicit.into_iter().chain(system) {
            match Self::load(&path) {
                Ok(config) => {
                    info!(path = %path.display(), "Using faultmedic config");
                    return config;
                }
                Err(e) => warn!(path = %path.display(), "Skipping config: {:#}", e),
            }
        }

        debug!("No config file, running on defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Backup nodes used by redundant execution.
    pub backup_nodes: usize,
    /// Append the self-healing adapter to every fault type when an engine is available.
    pub self_healing_fallback: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backup_nodes: 2,
            self_healing_fallback: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Prediction pipeline
// ---------------------------------------------------------------------------

/// Ensemble, filtering and storage settings for predictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Minimum ensemble confidence for a prediction to be kept.
    pub confidence_threshold: f64,
    /// Predictions further out than this are dropped (seconds).
    pub horizon_secs: u64,
    /// How long past `expected_at` a pending prediction survives (seconds).
    pub expiry_grace_secs: u64,
    pub max_history: usize,
    pub enable_time_series: bool,
    pub enable_trend: bool,
    pub enable_correlation: bool,
    pub enable_ml: bool,
    pub weights: ModelWeights,
}

impl PredictionConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_secs)
    }

    pub fn expiry_grace(&self) -> Duration {
        Duration::from_secs(self.expiry_grace_secs)
    }
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            horizon_secs: 600,
            expiry_grace_secs: 300,
            max_history: 10_000,
            enable_time_series: true,
            enable_trend: true,
            enable_correlation: true,
            enable_ml: true,
            weights: ModelWeights::default(),
        }
    }
}

/// Starting ensemble weight of each model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelWeights {
    pub time_series: f64,
    pub machine_learning: f64,
    pub trend: f64,
    pub correlation: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            time_series: 0.3,
            machine_learning: 0.4,
            trend: 0.2,
            correlation: 0.1,
        }
    }
}

// ---------------------------------------------------------------------------
// Analyzers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesConfig {
    pub window_size: usize,
    /// Samples required before a metric gets a model.
    pub min_samples: usize,
    /// Samples required before the anomaly gate is evaluated.
    pub min_anomaly_samples: usize,
    pub enable_arma: bool,
    pub enable_lstm: bool,
    pub enable_seasonal: bool,
    pub ar_coefficient: f64,
    pub ma_coefficient: f64,
    pub z_score_threshold: f64,
    pub min_confidence: f64,
    pub horizon_secs: u64,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            min_samples: 10,
            min_anomaly_samples: 5,
            enable_arma: true,
            enable_lstm: false,
            enable_seasonal: false,
            ar_coefficient: 0.5,
            ma_coefficient: 0.3,
            z_score_threshold: 2.0,
            min_confidence: 0.6,
            horizon_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Samples required before a slope is evaluated.
    pub trend_window: usize,
    /// Minimum |slope| treated as a significant trend.
    pub significance: f64,
    pub change_point_detection: bool,
    pub change_point_window: usize,
    pub change_threshold: f64,
    /// Change points retained per metric.
    pub max_change_points: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            trend_window: 50,
            significance: 0.01,
            change_point_detection: true,
            change_point_window: 5,
            change_threshold: 0.1,
            max_change_points: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Most recent samples used when correlating two series.
    pub correlation_window: usize,
    pub causality_analysis: bool,
    pub cross_correlation_lags: usize,
    /// Minimum |correlation| for a causality edge.
    pub edge_threshold: f64,
    /// Minimum |correlation| for a pair to be watched for drift.
    pub stable_threshold: f64,
    /// Deviation of the recent correlation that signals a broken relationship.
    pub drift_threshold: f64,
    pub recent_window: usize,
    pub horizon_secs: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            correlation_window: 200,
            causality_analysis: true,
            cross_correlation_lags: 10,
            edge_threshold: 0.5,
            stable_threshold: 0.8,
            drift_threshold: 0.3,
            recent_window: 10,
            horizon_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    pub enable_neural_net: bool,
    pub enable_decision_tree: bool,
    pub input_size: usize,
    pub hidden_size: usize,
    /// Seed for weight initialisation when no weights file is given.
    pub seed: u64,
    /// Optional JSON file with trained network weights.
    pub weights_path: Option<PathBuf>,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enable_neural_net: true,
            enable_decision_tree: false,
            input_size: 10,
            hidden_size: 20,
            seed: 42,
            weights_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    /// Fraction of the gap to the accuracy-weighted target covered per pass.
    pub adaptation_rate: f64,
    /// Share of the previous weight step carried into the next one.
    pub momentum: f64,
    /// EMA factor applied to each batch accuracy.
    pub accuracy_alpha: f64,
    pub initial_accuracy: f64,
    /// Performance samples retained per model.
    pub max_history: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            adaptation_rate: 0.01,
            momentum: 0.9,
            accuracy_alpha: 0.1,
            initial_accuracy: 0.5,
            max_history: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Seconds between prediction rounds.
    pub interval_secs: u64,
}

impl DriverConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
