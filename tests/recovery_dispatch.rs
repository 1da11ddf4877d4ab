use anyhow::Result;
use async_trait::async_trait;
use faultmedic::config::{Config, RecoveryConfig};
use faultmedic::fault::registry::FaultRegistry;
use faultmedic::fault::{FaultDetection, FaultStatus, FaultType, Metadata, Severity};
use faultmedic::recovery::collaborators::{
    InMemoryCheckpointStore, LocalBackupExecutor, RecordingServiceControl,
};
use faultmedic::recovery::strategies::GracefulDegradation;
use faultmedic::recovery::{Collaborators, HealingResult, RecoveryEngine, SelfHealingEngine};
use faultmedic::FaultToleranceManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct RestartingHealer;

#[async_trait]
impl SelfHealingEngine for RestartingHealer {
    async fn heal_fault(&self, fault: &FaultDetection, _cancel: &CancellationToken) -> Result<HealingResult> {
        Ok(HealingResult {
            success: true,
            actions: vec![format!("reroute traffic around {}", fault.target())],
            confidence: 0.9,
            duration: Duration::from_millis(5),
        })
    }
}

struct Rig {
    services: Arc<RecordingServiceControl>,
    backups: Arc<LocalBackupExecutor>,
    collaborators: Collaborators,
}

fn rig(healer: bool) -> Rig {
    let services = Arc::new(RecordingServiceControl::default());
    let backups = Arc::new(LocalBackupExecutor::default());
    let collaborators = Collaborators {
        checkpoints: Arc::new(InMemoryCheckpointStore::default()),
        services: services.clone(),
        backups: backups.clone(),
        self_healing: healer.then(|| Arc::new(RestartingHealer) as Arc<dyn SelfHealingEngine>),
    };
    Rig {
        services,
        backups,
        collaborators,
    }
}

fn fault(fault_type: FaultType, severity: Severity, target: &str) -> FaultDetection {
    FaultDetection::new(fault_type, severity, target, "integration", Metadata::new())
}

#[tokio::test]
async fn test_node_failure_without_checkpoint_fails_after_two_attempts() {
    let rig = rig(false);
    let registry = Arc::new(FaultRegistry::new());
    let engine = RecoveryEngine::with_defaults(registry.clone(), &rig.collaborators, &RecoveryConfig::default());

    let f = fault(FaultType::NodeFailure, Severity::High, "worker-7");
    let outcome = engine.dispatch(&f, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.status, FaultStatus::Failed);
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].strategy, "fast_recovery");
    assert_eq!(outcome.results[1].strategy, "checkpoint_based");
    for r in &outcome.results {
        assert!(!r.successful);
        assert_eq!(r.error.as_deref(), Some("no checkpoint available"));
    }

    assert_eq!(registry.attempts(f.id()).await.len(), 2);
    assert_eq!(registry.get(f.id()).await.unwrap().status(), FaultStatus::Failed);
    assert!(outcome.fault.resolved_at().is_none());
}

#[tokio::test]
async fn test_performance_anomaly_restart_resolves() {
    let rig = rig(false);
    let manager = FaultToleranceManager::new(&Config::default(), &rig.collaborators);

    let outcome = manager
        .detect_fault(
            FaultType::PerformanceAnomaly,
            "scheduler-api",
            "p99 over budget",
            Metadata::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, FaultStatus::Resolved);
    assert_eq!(outcome.fault.severity(), Severity::Medium);
    assert_eq!(outcome.resolved_by(), Some("fast_recovery"));
    let resolved_at = outcome.fault.resolved_at().unwrap();
    assert!(resolved_at >= outcome.fault.detected_at());
    assert_eq!(rig.services.restarts().await, vec!["scheduler-api".to_string()]);
}

#[tokio::test]
async fn test_critical_partition_skips_degradation() {
    let rig = rig(true);
    rig.backups.set_fail(true);
    let manager = FaultToleranceManager::new(&Config::default(), &rig.collaborators);
    manager.register_strategy(
        FaultType::NetworkPartition,
        Arc::new(GracefulDegradation::new(rig.services.clone())),
    );

    let outcome = manager
        .detect_fault(
            FaultType::NetworkPartition,
            "rack-b",
            "rack unreachable",
            Metadata::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let tried: Vec<&str> = outcome.results.iter().map(|r| r.strategy.as_str()).collect();
    assert_eq!(tried, vec!["redundant_execution", "self_healing"]);
    assert_eq!(outcome.status, FaultStatus::Resolved);
    assert_eq!(outcome.resolved_by(), Some("self_healing"));
    assert!(rig.services.degradations().await.is_empty());
}

#[tokio::test]
async fn test_service_outage_falls_through_to_backups() {
    let rig = rig(false);
    let manager = FaultToleranceManager::new(&Config::default(), &rig.collaborators);

    let outcome = manager
        .detect_fault(
            FaultType::ServiceUnavailable,
            "model-server",
            "health check failing",
            Metadata::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let tried: Vec<&str> = outcome.results.iter().map(|r| r.strategy.as_str()).collect();
    assert_eq!(tried, vec!["checkpoint_based", "redundant_execution"]);
    assert_eq!(outcome.status, FaultStatus::Resolved);
    assert_eq!(rig.backups.runs().await, vec![(outcome.fault.id(), 2)]);
}

#[tokio::test]
async fn test_concurrent_dispatches_are_independent() {
    let rig = rig(false);
    let manager = Arc::new(FaultToleranceManager::new(&Config::default(), &rig.collaborators));

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .detect_fault(
                    FaultType::PerformanceAnomaly,
                    &format!("svc-{i}"),
                    "slow",
                    Metadata::new(),
                    &CancellationToken::new(),
                )
                .await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.status, FaultStatus::Resolved);
        assert_eq!(outcome.results.len(), 1);
    }

    assert_eq!(manager.registry().len().await, 8);
    assert_eq!(
        manager.registry().list_by_status(FaultStatus::Resolved).await.len(),
        8
    );
    assert_eq!(rig.services.restarts().await.len(), 8);
}
