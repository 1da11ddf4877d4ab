use crate::analysis::stats;
use crate::analysis::{FaultPrediction, ModelKind, SeriesMap, TimeSeriesData};
use crate::config::TrendConfig;
use crate::fault::FaultType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Slopes inside this band count as flat when labelling direction.
const DIRECTION_BAND: f64 = 0.001;

/// Metrics whose growth means a resource is running out.
const RESOURCE_METRICS: [&str; 2] = ["cpu_usage", "memory_usage"];

/// A shift in the level of a series between two adjacent windows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangePoint {
    pub timestamp: DateTime<Utc>,
    pub index: usize,
    pub magnitude: f64,
    pub direction: ChangeDirection,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

pub fn trend_direction(slope: f64) -> &'static str {
    if slope > DIRECTION_BAND {
        "increasing"
    } else if slope < -DIRECTION_BAND {
        "decreasing"
    } else {
        "stable"
    }
}

/// Slope-based forecaster with change-point tracking.
pub struct TrendAnalyzer {
    config: TrendConfig,
    change_points: Mutex<HashMap<String, VecDeque<ChangePoint>>>,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            change_points: Mutex::new(HashMap::new()),
        }
    }

    /// One full pass over `series`. The change-point history stays locked
    /// for the whole pass and each analyzed metric's entry is replaced.
    pub fn analyze_trends(&self, series: &SeriesMap) -> Vec<FaultPrediction> {
        let mut history = self.change_points.lock().unwrap_or_else(PoisonError::into_inner);
        let mut predictions = Vec::new();

        for (name, data) in series {
            if data.len() < self.config.trend_window {
                continue;
            }
            let slope = stats::ols_slope(data.values());

            if self.config.change_point_detection {
                let mut found: VecDeque<ChangePoint> = self.detect_change_points(data).into();
                if !found.is_empty() {
                    debug!(metric = %name, count = found.len(), "Change points detected");
                }
                while found.len() > self.config.max_change_points {
                    found.pop_front();
                }
                history.insert(name.clone(), found);
            }

            predictions.extend(self.trend_prediction(data, slope));
        }

        predictions
    }

    fn trend_prediction(&self, data: &TimeSeriesData, slope: f64) -> Option<FaultPrediction> {
        let magnitude = slope.abs();
        if !magnitude.is_finite() || magnitude <= self.config.significance {
            return None;
        }
        let current = data.last()?;

        let fault_type = if slope > 0.0 && RESOURCE_METRICS.contains(&data.name()) {
            FaultType::ResourceExhaustion
        } else {
            FaultType::PerformanceAnomaly
        };

        // One minute per unit of 1/|slope|.
        let ttf = Duration::from_secs_f64(60.0 / magnitude);

        Some(
            FaultPrediction::new(
                "trend_analysis",
                ModelKind::Trend,
                fault_type,
                data.name(),
                (magnitude * 100.0).min(1.0),
                ttf,
            )
            .with_feature("trend", slope)
            .with_feature("current_value", current)
            .with_metadata("trend_direction", trend_direction(slope))
            .with_metadata("trend_magnitude", magnitude),
        )
    }

    /// Compare the mean of the window before each index with the window
    /// starting at it.
    fn detect_change_points(&self, data: &TimeSeriesData) -> Vec<ChangePoint> {
        let values = data.values();
        let w = self.config.change_point_window.max(1);
        if values.len() < 2 * w || values.len() < 10 {
            return Vec::new();
        }

        let mut found = Vec::new();
        for i in w..values.len() - w {
            let before = stats::mean(&values[i - w..i]);
            let after = stats::mean(&values[i..i + w]);
            let delta = after - before;
            if !delta.is_finite() || delta.abs() <= self.config.change_threshold {
                continue;
            }
            found.push(ChangePoint {
                timestamp: data.timestamps()[i],
                index: i,
                magnitude: delta.abs(),
                direction: if delta < 0.0 {
                    ChangeDirection::Decrease
                } else {
                    ChangeDirection::Increase
                },
                confidence: (delta.abs() * 10.0).min(1.0),
            });
        }
        found
    }

    /// Change points recorded for `metric`, oldest first.
    pub fn change_points(&self, metric: &str) -> Vec<ChangePoint> {
        let history = self.change_points.lock().unwrap_or_else(PoisonError::into_inner);
        history
            .get(metric)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}
