use crate::analysis::stats::{self, Baseline};
use crate::analysis::{FaultPrediction, ModelKind, SeriesMap, TimeSeriesData};
use crate::config::TimeSeriesConfig;
use crate::fault::FaultType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Forecasting techniques the analyzer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Arma,
    /// Not yet implemented; produces no predictions.
    Lstm,
    /// Not yet implemented; produces no predictions.
    Seasonal,
}

/// Fixed-order ARMA(1,1) model kept per metric.
#[derive(Debug, Clone, Serialize)]
pub struct ArmaModel {
    pub name: String,
    pub ar_order: usize,
    pub ma_order: usize,
    /// `[ar, ma]`
    pub coefficients: [f64; 2],
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
    pub last_updated: DateTime<Utc>,
}

impl ArmaModel {
    fn new(name: &str, ar: f64, ma: f64) -> Self {
        Self {
            name: name.to_string(),
            ar_order: 1,
            ma_order: 1,
            coefficients: [ar, ma],
            fitted: Vec::new(),
            residuals: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Recompute one-step fitted values and residuals over `values`.
    /// Index 0 has no predecessor and stays 0.
    fn update(&mut self, values: &[f64]) {
        let n = values.len();
        self.fitted = vec![0.0; n];
        self.residuals = vec![0.0; n];
        for i in 1..n {
            let fitted = self.coefficients[0] * values[i - 1];
            self.fitted[i] = fitted;
            self.residuals[i] = values[i] - fitted;
        }
        self.last_updated = Utc::now();
    }

    fn forecast(&self, last: f64) -> f64 {
        self.coefficients[0] * last
    }

    /// Residual variance; 1.0 when no residuals exist yet.
    fn residual_variance(&self) -> f64 {
        if self.residuals.is_empty() {
            return 1.0;
        }
        stats::variance(&self.residuals)
    }
}

/// exp(-|forecast - last| / sqrt(variance)), 0.5 for a perfect fit.
pub fn forecast_confidence(forecast: f64, last: f64, variance: f64) -> f64 {
    if variance == 0.0 {
        return 0.5;
    }
    stats::clamp_unit((-(forecast - last).abs() / variance.sqrt()).exp())
}

/// ARMA-style forecaster. One model per metric, created on first sight.
pub struct TimeSeriesAnalyzer {
    config: TimeSeriesConfig,
    models: Mutex<HashMap<String, ArmaModel>>,
}

impl TimeSeriesAnalyzer {
    pub fn new(config: TimeSeriesConfig) -> Self {
        Self {
            config,
            models: Mutex::new(HashMap::new()),
        }
    }

    fn methods(&self) -> Vec<ForecastMethod> {
        let mut methods = Vec::new();
        if self.config.enable_arma {
            methods.push(ForecastMethod::Arma);
        }
        if self.config.enable_lstm {
            methods.push(ForecastMethod::Lstm);
        }
        if self.config.enable_seasonal {
            methods.push(ForecastMethod::Seasonal);
        }
        methods
    }

    /// Run every enabled method over every metric with enough samples.
    pub fn analyze_and_predict(&self, series: &SeriesMap) -> Vec<FaultPrediction> {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let methods = self.methods();
        let mut predictions = Vec::new();

        for (name, data) in series {
            let window = data.tail(self.config.window_size);
            if window.len() < self.config.min_samples {
                continue;
            }
            for method in &methods {
                match method {
                    ForecastMethod::Arma => {
                        let model = models.entry(name.clone()).or_insert_with(|| {
                            ArmaModel::new(name, self.config.ar_coefficient, self.config.ma_coefficient)
                        });
                        model.update(window);
                        predictions.extend(self.arma_prediction(model, data, window));
                    }
                    ForecastMethod::Lstm | ForecastMethod::Seasonal => {
                        debug!(metric = %name, ?method, "Forecast method not implemented, skipping");
                    }
                }
            }
        }

        predictions
    }

    fn arma_prediction(
        &self,
        model: &ArmaModel,
        data: &TimeSeriesData,
        window: &[f64],
    ) -> Option<FaultPrediction> {
        let last = *window.last()?;
        let forecast = model.forecast(last);
        let variance = model.residual_variance();
        let confidence = forecast_confidence(forecast, last, variance);

        if window.len() < self.config.min_anomaly_samples {
            return None;
        }
        let z = Baseline::from_values(window).z_score(forecast);
        if z <= self.config.z_score_threshold || confidence <= self.config.min_confidence {
            return None;
        }

        debug!(metric = %data.name(), forecast, z, confidence, "ARMA forecast is anomalous");
        Some(
            FaultPrediction::new(
                "arma",
                ModelKind::TimeSeries,
                FaultType::PerformanceAnomaly,
                data.name(),
                confidence,
                Duration::from_secs(self.config.horizon_secs),
            )
            .with_feature("predicted_value", forecast)
            .with_feature("current_value", last)
            .with_feature("variance", variance)
            .with_feature("z_score", z)
            .with_metadata("model_type", "ARMA")
            .with_metadata("ar_order", model.ar_order)
            .with_metadata("ma_order", model.ma_order),
        )
    }

    /// Snapshot of the model kept for `metric`.
    pub fn model(&self, metric: &str) -> Option<ArmaModel> {
        let models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        models.get(metric).cloned()
    }
}
