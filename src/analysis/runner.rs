use crate::analysis::correlation::CorrelationEngine;
use crate::analysis::ensemble::{self, Ensemble, PredictionStatistics, PredictionStore};
use crate::analysis::features;
use crate::analysis::learning::{LearningEngine, OutcomeSample};
use crate::analysis::model::MlPredictor;
use crate::analysis::timeseries::TimeSeriesAnalyzer;
use crate::analysis::trend::TrendAnalyzer;
use crate::analysis::{AnalysisError, FaultPrediction, SeriesMap};
use crate::config::Config;
use crate::fault::FaultDetection;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Full prediction pipeline:
/// 1. Run every enabled analyzer over the series
/// 2. Merge the raw output with the learned ensemble weights
/// 3. Gate on confidence, horizon and pending duplicates
/// 4. Store the survivors
///
/// Outcomes of stored predictions feed back into the learning engine.
pub struct PredictiveFaultDetector {
    timeseries: Option<TimeSeriesAnalyzer>,
    trend: Option<TrendAnalyzer>,
    correlation: Option<CorrelationEngine>,
    ml: Option<MlPredictor>,
    ensemble: Ensemble,
    learning: LearningEngine,
    store: Mutex<PredictionStore>,
    expiry_grace: Duration,
}

impl PredictiveFaultDetector {
    pub fn new(config: &Config) -> Self {
        let prediction = &config.prediction;
        Self {
            timeseries: prediction
                .enable_time_series
                .then(|| TimeSeriesAnalyzer::new(config.timeseries.clone())),
            trend: prediction
                .enable_trend
                .then(|| TrendAnalyzer::new(config.trend.clone())),
            correlation: prediction
                .enable_correlation
                .then(|| CorrelationEngine::new(config.correlation.clone())),
            ml: prediction.enable_ml.then(|| MlPredictor::new(&config.ml)),
            ensemble: Ensemble::new(prediction),
            learning: LearningEngine::new(
                config.learning.clone(),
                ensemble::initial_weights(&prediction.weights),
            ),
            store: Mutex::new(PredictionStore::new(prediction.max_history)),
            expiry_grace: prediction.expiry_grace(),
        }
    }

    /// Replace the ML predictor, e.g. with a network carrying trained weights.
    pub fn with_ml(mut self, ml: MlPredictor) -> Self {
        self.ml = Some(ml);
        self
    }

    /// Run one prediction round and return the predictions that were stored.
    pub fn predict(&self, series: &SeriesMap) -> Vec<FaultPrediction> {
        let current: BTreeMap<String, f64> = series
            .iter()
            .filter_map(|(name, data)| data.last().map(|v| (name.clone(), v)))
            .collect();

        let mut raw = Vec::new();
        if let Some(analyzer) = &self.timeseries {
            raw.extend(analyzer.analyze_and_predict(series));
        }
        if let Some(analyzer) = &self.trend {
            raw.extend(analyzer.analyze_trends(series));
        }
        if let Some(engine) = &self.correlation {
            raw.extend(engine.analyze_correlations(series));
        }
        if let Some(ml) = &self.ml {
            raw.extend(ml.predict(&features::extract_features(&current, series)));
        }
        debug!(metrics = series.len(), raw = raw.len(), "Analyzers finished");

        let merged = self.ensemble.combine(raw, &self.learning.weights());
        let candidates: Vec<FaultPrediction> =
            merged.into_iter().filter(|p| self.ensemble.admits(p)).collect();

        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store.admit(candidates)
    }

    /// Confirm predictions that anticipated `fault` and learn from them.
    pub fn on_fault(&self, fault: &FaultDetection) -> Vec<FaultPrediction> {
        let confirmed = {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store.confirm_matching(fault)
        };
        self.learn_from(&confirmed);
        confirmed
    }

    /// Expire overdue predictions as of `now` and learn from them.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<FaultPrediction> {
        let expired = {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store.expire(now, self.expiry_grace)
        };
        self.learn_from(&expired);
        expired
    }

    /// Mark a pending prediction as a false alarm.
    pub fn dismiss(&self, id: Uuid) -> Result<FaultPrediction, AnalysisError> {
        let dismissed = {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store.dismiss(id)?
        };
        info!(prediction_id = %id, "Prediction dismissed");
        self.learn_from(std::slice::from_ref(&dismissed));
        Ok(dismissed)
    }

    fn learn_from(&self, closed: &[FaultPrediction]) {
        let samples: Vec<OutcomeSample> = closed.iter().flat_map(OutcomeSample::from_prediction).collect();
        self.learning.learn(&samples);
    }

    pub fn active_predictions(&self) -> Vec<FaultPrediction> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).active()
    }

    pub fn history(&self) -> Vec<FaultPrediction> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).history()
    }

    pub fn statistics(&self) -> PredictionStatistics {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).statistics()
    }

    pub fn learning(&self) -> &LearningEngine {
        &self.learning
    }

    pub fn trend(&self) -> Option<&TrendAnalyzer> {
        self.trend.as_ref()
    }

    pub fn correlation(&self) -> Option<&CorrelationEngine> {
        self.correlation.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ModelKind, PredictionStatus, TimeSeriesData};
    use crate::fault::{FaultType, Severity};

    fn rising_memory() -> SeriesMap {
        let values: Vec<f64> = (0..60).map(|i| 0.2 + 0.02 * i as f64).collect();
        let mut map = SeriesMap::new();
        map.insert(
            "memory_usage".into(),
            TimeSeriesData::from_values("memory_usage", values, Utc::now(), Duration::from_secs(60)),
        );
        map
    }

    fn trend_only() -> Config {
        let mut config = Config::default();
        config.prediction.enable_time_series = false;
        config.prediction.enable_correlation = false;
        config.prediction.enable_ml = false;
        // a single trend model at full confidence, 50 minutes out
        config.prediction.horizon_secs = 3600;
        config
    }

    #[test]
    fn test_trend_prediction_survives_pipeline() {
        let detector = PredictiveFaultDetector::new(&trend_only());
        let stored = detector.predict(&rising_memory());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].model_used, "ensemble");
        assert_eq!(stored[0].predicted_type, FaultType::ResourceExhaustion);
        assert_eq!(stored[0].contributors, vec![ModelKind::Trend]);

        // same signal again is a pending duplicate
        assert!(detector.predict(&rising_memory()).is_empty());
        assert_eq!(detector.active_predictions().len(), 1);
    }

    #[test]
    fn test_default_horizon_drops_distant_failures() {
        let detector = PredictiveFaultDetector::new(&Config::default());
        let stored = detector.predict(&rising_memory());
        assert!(stored.iter().all(|p| p.time_to_failure() <= Duration::from_secs(600)));
        assert!(stored.iter().all(|p| (0.0..=1.0).contains(&p.confidence())));
    }

    #[test]
    fn test_fault_confirms_and_learns() {
        let detector = PredictiveFaultDetector::new(&trend_only());
        detector.predict(&rising_memory());
        let before = detector.learning().weights();

        let fault = FaultDetection::new(
            FaultType::ResourceExhaustion,
            Severity::High,
            "memory_usage",
            "memory exhausted",
            Default::default(),
        );
        let confirmed = detector.on_fault(&fault);
        assert_eq!(confirmed.len(), 1);
        assert!(detector.active_predictions().is_empty());
        assert_eq!(detector.statistics().accuracy_rate, 1.0);

        let after = detector.learning().weights();
        assert!(after[&ModelKind::Trend] > before[&ModelKind::Trend]);
        assert_eq!(detector.learning().metrics().predictions_correct, 1);
    }

    #[test]
    fn test_stale_predictions_expire() {
        let detector = PredictiveFaultDetector::new(&trend_only());
        detector.predict(&rising_memory());

        assert!(detector.expire_stale(Utc::now()).is_empty());
        let expired = detector.expire_stale(Utc::now() + chrono::Duration::hours(2));
        assert_eq!(expired.len(), 1);
        assert_eq!(detector.history()[0].status(), PredictionStatus::Expired);
        assert_eq!(detector.learning().metrics().predictions_made, 1);
    }

    #[test]
    fn test_dismiss_unknown_prediction() {
        let detector = PredictiveFaultDetector::new(&trend_only());
        assert!(matches!(
            detector.dismiss(Uuid::new_v4()),
            Err(AnalysisError::UnknownPrediction(_))
        ));
    }
}
