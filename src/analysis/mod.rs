//! Predictive fault analytics: analyzers, the ML predictor, ensemble and learning.

pub mod correlation;
pub mod ensemble;
pub mod features;
pub mod learning;
pub mod model;
pub mod runner;
pub mod stats;
pub mod timeseries;
pub mod trend;

use crate::fault::{FaultType, Metadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("series '{name}' has {values} values but {timestamps} timestamps")]
    LengthMismatch {
        name: String,
        values: usize,
        timestamps: usize,
    },

    #[error("timestamps of series '{0}' are not in time order")]
    Unordered(String),

    #[error("{what} dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("prediction {id} is already {status}")]
    PredictionClosed { id: Uuid, status: PredictionStatus },

    #[error("unknown prediction {0}")]
    UnknownPrediction(Uuid),
}

/// Named series of (timestamp, value) samples in time order.
#[derive(Debug, Clone, Serialize)]
pub struct TimeSeriesData {
    name: String,
    values: Vec<f64>,
    timestamps: Vec<DateTime<Utc>>,
}

/// Metric name to series. Ordered so every pass visits metrics identically.
pub type SeriesMap = BTreeMap<String, TimeSeriesData>;

impl TimeSeriesData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            timestamps: Vec::new(),
        }
    }

    /// Build from parallel arrays, rejecting mismatched or unordered input.
    pub fn from_parts(
        name: impl Into<String>,
        values: Vec<f64>,
        timestamps: Vec<DateTime<Utc>>,
    ) -> Result<Self, AnalysisError> {
        let name = name.into();
        if values.len() != timestamps.len() {
            return Err(AnalysisError::LengthMismatch {
                name,
                values: values.len(),
                timestamps: timestamps.len(),
            });
        }
        if timestamps.windows(2).any(|w| w[1] < w[0]) {
            return Err(AnalysisError::Unordered(name));
        }
        Ok(Self { name, values, timestamps })
    }

    /// Evenly spaced samples ending at `end`.
    pub fn from_values(
        name: impl Into<String>,
        values: Vec<f64>,
        end: DateTime<Utc>,
        interval: Duration,
    ) -> Self {
        let step = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::minutes(1));
        let n = values.len() as i32;
        let timestamps = (0..n).map(|i| end - step * (n - 1 - i)).collect();
        Self {
            name: name.into(),
            values,
            timestamps,
        }
    }

    /// Append a sample. Samples older than the last one are rejected.
    pub fn push(&mut self, timestamp: DateTime<Utc>, value: f64) -> Result<(), AnalysisError> {
        if self.timestamps.last().is_some_and(|last| timestamp < *last) {
            return Err(AnalysisError::Unordered(self.name.clone()));
        }
        self.timestamps.push(timestamp);
        self.values.push(value);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// The most recent `n` values (all of them if fewer).
    pub fn tail(&self, n: usize) -> &[f64] {
        &self.values[self.values.len().saturating_sub(n)..]
    }

    /// Average spacing between samples; one minute with fewer than two samples.
    pub fn frequency(&self) -> Duration {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) if self.timestamps.len() >= 2 => {
                let total = (*last - *first).to_std().unwrap_or_default();
                total / (self.timestamps.len() as u32 - 1)
            }
            _ => Duration::from_secs(60),
        }
    }
}

/// The model family that produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    TimeSeries,
    MachineLearning,
    Trend,
    Correlation,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::TimeSeries,
        ModelKind::MachineLearning,
        ModelKind::Trend,
        ModelKind::Correlation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::TimeSeries => "time_series",
            ModelKind::MachineLearning => "machine_learning",
            ModelKind::Trend => "trend",
            ModelKind::Correlation => "correlation",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Pending,
    Confirmed,
    Dismissed,
    Expired,
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PredictionStatus::Pending => "pending",
            PredictionStatus::Confirmed => "confirmed",
            PredictionStatus::Dismissed => "dismissed",
            PredictionStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// What actually happened to a prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub occurred: bool,
    pub fault_id: Option<Uuid>,
    pub observed_at: DateTime<Utc>,
    /// Seconds between the expected and the observed time; negative when early.
    pub time_delta_secs: f64,
}

/// A forecast fault.
#[derive(Debug, Clone, Serialize)]
pub struct FaultPrediction {
    pub id: Uuid,
    pub predicted_type: FaultType,
    pub target: String,
    confidence: f64,
    time_to_failure: Duration,
    predicted_at: DateTime<Utc>,
    expected_at: DateTime<Utc>,
    pub model_used: String,
    pub features: BTreeMap<String, f64>,
    pub metadata: Metadata,
    /// Model families whose output went into this prediction.
    pub contributors: Vec<ModelKind>,
    status: PredictionStatus,
    outcome: Option<PredictionOutcome>,
}

impl FaultPrediction {
    pub fn new(
        model_used: &str,
        kind: ModelKind,
        predicted_type: FaultType,
        target: impl Into<String>,
        confidence: f64,
        time_to_failure: Duration,
    ) -> Self {
        let predicted_at = Utc::now();
        let expected_at = predicted_at
            + chrono::Duration::from_std(time_to_failure).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            id: Uuid::new_v4(),
            predicted_type,
            target: target.into(),
            confidence: stats::clamp_unit(confidence),
            time_to_failure,
            predicted_at,
            expected_at,
            model_used: model_used.to_string(),
            features: BTreeMap::new(),
            metadata: Metadata::new(),
            contributors: vec![kind],
            status: PredictionStatus::Pending,
            outcome: None,
        }
    }

    pub fn with_feature(mut self, name: &str, value: f64) -> Self {
        self.features.insert(name.to_string(), value);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn time_to_failure(&self) -> Duration {
        self.time_to_failure
    }

    pub fn predicted_at(&self) -> DateTime<Utc> {
        self.predicted_at
    }

    pub fn expected_at(&self) -> DateTime<Utc> {
        self.expected_at
    }

    pub fn status(&self) -> PredictionStatus {
        self.status
    }

    pub fn outcome(&self) -> Option<&PredictionOutcome> {
        self.outcome.as_ref()
    }

    /// Close a pending prediction. Closed predictions never change again.
    pub(crate) fn close(
        &mut self,
        status: PredictionStatus,
        outcome: PredictionOutcome,
    ) -> Result<(), AnalysisError> {
        if self.status != PredictionStatus::Pending || status == PredictionStatus::Pending {
            return Err(AnalysisError::PredictionClosed {
                id: self.id,
                status: self.status,
            });
        }
        self.status = status;
        self.outcome = Some(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_rejects_mismatched_parts() {
        let now = Utc::now();
        let err = TimeSeriesData::from_parts("cpu_usage", vec![0.1, 0.2], vec![now]).unwrap_err();
        assert!(matches!(err, AnalysisError::LengthMismatch { values: 2, timestamps: 1, .. }));

        let earlier = now - chrono::Duration::seconds(10);
        assert!(TimeSeriesData::from_parts("cpu_usage", vec![0.1, 0.2], vec![now, earlier]).is_err());
    }

    #[test]
    fn test_series_push_and_frequency() {
        let start = Utc::now();
        let mut series = TimeSeriesData::new("memory_usage");
        assert_eq!(series.frequency(), Duration::from_secs(60));

        for i in 0..5 {
            series.push(start + chrono::Duration::seconds(15 * i), i as f64).unwrap();
        }
        assert_eq!(series.len(), series.timestamps().len());
        assert_eq!(series.frequency(), Duration::from_secs(15));
        assert_eq!(series.tail(2), &[3.0, 4.0]);
        assert!(series.push(start, 9.0).is_err());
    }

    #[test]
    fn test_from_values_spacing() {
        let end = Utc::now();
        let series = TimeSeriesData::from_values("rt", vec![1.0, 2.0, 3.0], end, Duration::from_secs(30));
        assert_eq!(series.timestamps()[2], end);
        assert_eq!(series.frequency(), Duration::from_secs(30));
    }

    #[test]
    fn test_prediction_invariants() {
        let p = FaultPrediction::new(
            "arma",
            ModelKind::TimeSeries,
            FaultType::PerformanceAnomaly,
            "cpu_usage",
            f64::NAN,
            Duration::from_secs(300),
        );
        assert_eq!(p.confidence(), 0.0);
        assert_eq!(p.expected_at() - p.predicted_at(), chrono::Duration::seconds(300));

        let p = FaultPrediction::new(
            "arma",
            ModelKind::TimeSeries,
            FaultType::PerformanceAnomaly,
            "cpu_usage",
            3.5,
            Duration::from_secs(60),
        );
        assert_eq!(p.confidence(), 1.0);
    }

    #[test]
    fn test_closed_prediction_stays_closed() {
        let mut p = FaultPrediction::new(
            "trend_analysis",
            ModelKind::Trend,
            FaultType::ResourceExhaustion,
            "memory_usage",
            0.9,
            Duration::from_secs(120),
        );
        let outcome = PredictionOutcome {
            occurred: false,
            fault_id: None,
            observed_at: Utc::now(),
            time_delta_secs: 0.0,
        };
        p.close(PredictionStatus::Expired, outcome.clone()).unwrap();
        assert!(p.close(PredictionStatus::Confirmed, outcome).is_err());
        assert_eq!(p.status(), PredictionStatus::Expired);
    }
}
