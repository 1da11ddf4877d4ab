//! Periodic prediction driver and the metric sources it pulls from.

use crate::analysis::{SeriesMap, TimeSeriesData};
use crate::manager::FaultToleranceManager;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Supplies a fresh snapshot of metric series each round.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn collect(&self) -> Result<SeriesMap>;
}

/// On-disk series snapshot:
///
/// ```json
/// { "interval_secs": 60, "series": { "cpu_usage": [0.41, 0.44, 0.52] } }
/// ```
///
/// Samples are evenly spaced and the last one is stamped with the load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesFile {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    pub series: BTreeMap<String, Vec<f64>>,
}

fn default_interval_secs() -> u64 {
    60
}

impl SeriesFile {
    pub fn into_series_map(self) -> SeriesMap {
        let end = Utc::now();
        let step = Duration::from_secs(self.interval_secs.max(1));
        self.series
            .into_iter()
            .map(|(name, values)| {
                let data = TimeSeriesData::from_values(name.clone(), values, end, step);
                (name, data)
            })
            .collect()
    }
}

/// Read and parse a series file.
pub fn load_series(path: &Path) -> Result<SeriesMap> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read series file: {}", path.display()))?;
    let file: SeriesFile = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse series file: {}", path.display()))?;
    Ok(file.into_series_map())
}

/// Re-reads a JSON series file on every collection.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MetricSource for JsonFileSource {
    async fn collect(&self) -> Result<SeriesMap> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_series(&path))
            .await
            .context("series loader task failed")?
    }
}

/// Run prediction rounds every `interval` until `cancel` fires.
///
/// Each round pulls a snapshot from `source`, runs the prediction pipeline
/// and expires overdue predictions. A failed collection skips the round.
/// Returns the number of rounds that ran.
pub async fn run_prediction_loop(
    manager: Arc<FaultToleranceManager>,
    source: Arc<dyn MetricSource>,
    interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    info!(interval_secs = interval.as_secs_f64(), "Prediction loop started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rounds = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        rounds += 1;

        match source.collect().await {
            Ok(series) => {
                let stored = manager.predict(&series);
                debug!(round = rounds, metrics = series.len(), stored = stored.len(), "Prediction round complete");
            }
            Err(e) => warn!(round = rounds, "Metric collection failed: {:#}", e),
        }

        manager.detector().expire_stale(Utc::now());
    }

    info!(rounds, "Prediction loop stopped");
    rounds
}
