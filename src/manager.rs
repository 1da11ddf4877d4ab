//! Top-level fault tolerance facade tying detection, recovery and prediction together.

use crate::analysis::runner::PredictiveFaultDetector;
use crate::analysis::{FaultPrediction, SeriesMap};
use crate::config::Config;
use crate::fault::registry::FaultRegistry;
use crate::fault::{FaultDetection, FaultError, FaultType, Metadata, Severity};
use crate::recovery::{Collaborators, DispatchOutcome, RecoveryEngine, RecoveryStrategy};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the registry, the recovery engine and the predictive detector.
pub struct FaultToleranceManager {
    registry: Arc<FaultRegistry>,
    engine: RecoveryEngine,
    detector: PredictiveFaultDetector,
}

impl FaultToleranceManager {
    /// A manager with the built-in strategies wired against `collaborators`.
    pub fn new(config: &Config, collaborators: &Collaborators) -> Self {
        let registry = Arc::new(FaultRegistry::new());
        let engine = RecoveryEngine::with_defaults(registry.clone(), collaborators, &config.recovery);
        Self {
            registry,
            engine,
            detector: PredictiveFaultDetector::new(config),
        }
    }

    /// A manager around an existing engine and detector.
    pub fn from_parts(engine: RecoveryEngine, detector: PredictiveFaultDetector) -> Self {
        Self {
            registry: engine.registry().clone(),
            engine,
            detector,
        }
    }

    /// Record a new fault, settle any predictions that anticipated it and
    /// run recovery.
    ///
    /// Severity comes from the fault type unless `metadata` carries a
    /// `severity` entry such as `"critical"`.
    pub async fn detect_fault(
        &self,
        fault_type: FaultType,
        target: &str,
        description: &str,
        metadata: Metadata,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, FaultError> {
        let severity = match metadata.get("severity").and_then(|v| v.as_str()) {
            Some(s) => s.parse::<Severity>()?,
            None => fault_type.default_severity(),
        };

        let fault = FaultDetection::new(fault_type, severity, target, description, metadata);
        self.registry.register(fault.clone()).await;
        warn!(
            fault_id = %fault.id(),
            fault_type = %fault_type,
            %severity,
            fault_target = %target,
            "Fault detected"
        );

        let confirmed = self.detector.on_fault(&fault);
        if !confirmed.is_empty() {
            info!(fault_id = %fault.id(), predictions = confirmed.len(), "Fault was predicted");
        }

        self.engine.dispatch(&fault, cancel).await
    }

    /// Run recovery for a fault that is already known to the caller.
    pub async fn dispatch(
        &self,
        fault: &FaultDetection,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, FaultError> {
        self.engine.dispatch(fault, cancel).await
    }

    pub fn register_strategy(&self, fault_type: FaultType, strategy: Arc<dyn RecoveryStrategy>) {
        self.engine.register(fault_type, strategy);
    }

    pub fn predict(&self, series: &SeriesMap) -> Vec<FaultPrediction> {
        self.detector.predict(series)
    }

    pub fn registry(&self) -> &Arc<FaultRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &RecoveryEngine {
        &self.engine
    }

    pub fn detector(&self) -> &PredictiveFaultDetector {
        &self.detector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{PredictionStatus, TimeSeriesData};
    use crate::fault::FaultStatus;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_severity_override_from_metadata() {
        let manager = FaultToleranceManager::new(&Config::default(), &Collaborators::in_memory());
        let metadata = Metadata::from([("severity".to_string(), serde_json::json!("critical"))]);

        let outcome = manager
            .detect_fault(
                FaultType::PerformanceAnomaly,
                "api-gateway",
                "p99 latency spike",
                metadata,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.fault.severity(), Severity::Critical);
        assert_eq!(outcome.status, FaultStatus::Resolved);
        assert_eq!(outcome.resolved_by(), Some("fast_recovery"));
    }

    #[tokio::test]
    async fn test_bad_severity_is_rejected() {
        let manager = FaultToleranceManager::new(&Config::default(), &Collaborators::in_memory());
        let metadata = Metadata::from([("severity".to_string(), serde_json::json!("apocalyptic"))]);
        let err = manager
            .detect_fault(FaultType::NodeFailure, "n1", "", metadata, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FaultError::UnknownSeverity(_)));
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_detected_fault_confirms_prediction() {
        let mut config = Config::default();
        config.prediction.enable_time_series = false;
        config.prediction.enable_correlation = false;
        config.prediction.enable_ml = false;
        config.prediction.horizon_secs = 3600;
        let manager = FaultToleranceManager::new(&config, &Collaborators::in_memory());

        let values: Vec<f64> = (0..60).map(|i| 0.2 + 0.02 * i as f64).collect();
        let mut series = SeriesMap::new();
        series.insert(
            "memory_usage".into(),
            TimeSeriesData::from_values("memory_usage", values, Utc::now(), Duration::from_secs(60)),
        );
        assert_eq!(manager.predict(&series).len(), 1);

        let outcome = manager
            .detect_fault(
                FaultType::ResourceExhaustion,
                "memory_usage",
                "oom killer fired",
                Metadata::from([("severity".to_string(), serde_json::json!("medium"))]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, FaultStatus::Resolved);
        assert_eq!(outcome.resolved_by(), Some("graceful_degradation"));

        let history = manager.detector().history();
        assert_eq!(history[0].status(), PredictionStatus::Confirmed);
        assert_eq!(history[0].outcome().unwrap().fault_id, Some(outcome.fault.id()));
    }
}
