use crate::config::RecoveryConfig;
use crate::fault::registry::FaultRegistry;
use crate::fault::{FaultDetection, FaultError, FaultStatus, FaultType};
use crate::recovery::collaborators::Collaborators;
use crate::recovery::self_healing::SelfHealingAdapter;
use crate::recovery::strategies::{CheckpointBased, FastRecovery, GracefulDegradation, RedundantExecution};
use crate::recovery::{RecoveryError, RecoveryResult, RecoveryStrategy};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened when a fault was dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub fault: FaultDetection,
    pub results: Vec<RecoveryResult>,
    pub status: FaultStatus,
    /// The sequence was interrupted and the fault is still `Recovering`.
    pub cancelled: bool,
}

impl DispatchOutcome {
    /// Name of the strategy that resolved the fault, if any.
    pub fn resolved_by(&self) -> Option<&str> {
        if self.status != FaultStatus::Resolved {
            return None;
        }
        self.results
            .iter()
            .find(|r| r.successful)
            .map(|r| r.strategy.as_str())
    }
}

type StrategyTable = HashMap<FaultType, Vec<Arc<dyn RecoveryStrategy>>>;

/// Per-fault-type ordered strategy registry plus the dispatch loop.
pub struct RecoveryEngine {
    registry: Arc<FaultRegistry>,
    strategies: RwLock<StrategyTable>,
}

impl RecoveryEngine {
    /// An engine with no strategies registered.
    pub fn new(registry: Arc<FaultRegistry>) -> Self {
        Self {
            registry,
            strategies: RwLock::new(StrategyTable::new()),
        }
    }

    /// An engine wired with the built-in strategies in priority order.
    /// The self-healing adapter is appended only when an engine is supplied.
    pub fn with_defaults(
        registry: Arc<FaultRegistry>,
        collaborators: &Collaborators,
        config: &RecoveryConfig,
    ) -> Self {
        let engine = Self::new(registry);

        let fast: Arc<dyn RecoveryStrategy> = Arc::new(FastRecovery::new(
            collaborators.checkpoints.clone(),
            collaborators.services.clone(),
        ));
        let checkpoint: Arc<dyn RecoveryStrategy> =
            Arc::new(CheckpointBased::new(collaborators.checkpoints.clone()));
        let redundant: Arc<dyn RecoveryStrategy> = Arc::new(RedundantExecution::new(
            collaborators.backups.clone(),
            config.backup_nodes,
        ));
        let degrade: Arc<dyn RecoveryStrategy> =
            Arc::new(GracefulDegradation::new(collaborators.services.clone()));

        engine.register(FaultType::NodeFailure, fast.clone());
        engine.register(FaultType::NodeFailure, checkpoint.clone());
        engine.register(FaultType::NetworkPartition, redundant.clone());
        engine.register(FaultType::ResourceExhaustion, degrade);
        engine.register(FaultType::PerformanceAnomaly, fast);
        engine.register(FaultType::ServiceUnavailable, checkpoint);
        engine.register(FaultType::ServiceUnavailable, redundant);

        if config.self_healing_fallback {
            if let Some(healer) = &collaborators.self_healing {
                let adapter: Arc<dyn RecoveryStrategy> =
                    Arc::new(SelfHealingAdapter::new(Some(healer.clone())));
                for fault_type in FaultType::ALL {
                    engine.register(fault_type, adapter.clone());
                }
            }
        }

        engine
    }

    pub fn registry(&self) -> &Arc<FaultRegistry> {
        &self.registry
    }

    /// Append a strategy to the ordered list for `fault_type`.
    pub fn register(&self, fault_type: FaultType, strategy: Arc<dyn RecoveryStrategy>) {
        debug!(%fault_type, strategy = strategy.name(), "Registering recovery strategy");
        let mut table = self.strategies.write().unwrap_or_else(PoisonError::into_inner);
        table.entry(fault_type).or_default().push(strategy);
    }

    /// Registered strategy names for a fault type, in priority order.
    pub fn strategies_for(&self, fault_type: FaultType) -> Vec<String> {
        let table = self.strategies.read().unwrap_or_else(PoisonError::into_inner);
        table
            .get(&fault_type)
            .map(|list| list.iter().map(|s| s.name().to_string()).collect())
            .unwrap_or_default()
    }

    fn candidates(&self, fault: &FaultDetection) -> Vec<Arc<dyn RecoveryStrategy>> {
        let table = self.strategies.read().unwrap_or_else(PoisonError::into_inner);
        table
            .get(&fault.fault_type())
            .map(|list| list.iter().filter(|s| s.can_handle(fault)).cloned().collect())
            .unwrap_or_default()
    }

    /// Run the eligible strategies for `fault` in order until one succeeds.
    ///
    /// The fault is registered if it is not known yet and must still be
    /// `Detected`. Every attempt is appended to the registry's attempt log
    /// before this returns. Cancelling `cancel` abandons the in-flight
    /// strategy, skips the rest and leaves the fault `Recovering`.
    pub async fn dispatch(
        &self,
        fault: &FaultDetection,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, FaultError> {
        let id = fault.id();
        self.registry.register(fault.clone()).await;
        let current = self.registry.get(id).await.ok_or(FaultError::UnknownFault(id))?;

        if current.status() != FaultStatus::Detected {
            return Err(FaultError::InvalidTransition {
                id,
                from: current.status(),
                to: FaultStatus::Recovering,
            });
        }

        let candidates = self.candidates(&current);
        let fault = self.registry.transition(id, FaultStatus::Recovering).await?;

        if candidates.is_empty() {
            warn!(fault_id = %id, fault_type = %fault.fault_type(), "No eligible recovery strategy");
            let fault = self.registry.transition(id, FaultStatus::Failed).await?;
            return Ok(DispatchOutcome {
                fault,
                results: Vec::new(),
                status: FaultStatus::Failed,
                cancelled: false,
            });
        }

        info!(
            fault_id = %id,
            fault_type = %fault.fault_type(),
            severity = %fault.severity(),
            candidates = candidates.len(),
            "Dispatching fault"
        );

        let mut results = Vec::with_capacity(candidates.len());
        let mut cancelled = false;

        for strategy in candidates {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let started = Instant::now();
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RecoveryError::Cancelled),
                r = strategy.recover(&fault, cancel) => r,
            };

            let result = match attempt {
                Ok(result) => result,
                Err(RecoveryError::Cancelled) => {
                    cancelled = true;
                    RecoveryResult::failed(id, strategy.name(), started, RecoveryError::Cancelled.to_string())
                }
                Err(e) => {
                    warn!(fault_id = %id, strategy = strategy.name(), error = %e, "Recovery strategy failed");
                    RecoveryResult::failed(id, strategy.name(), started, e.to_string())
                }
            };

            let succeeded = result.successful && result.error.is_none();
            self.registry.record_attempt(result.clone()).await?;
            results.push(result);

            if cancelled {
                break;
            }

            if succeeded {
                let fault = self.registry.transition(id, FaultStatus::Resolved).await?;
                info!(fault_id = %id, strategy = strategy.name(), attempts = results.len(), "Fault resolved");
                return Ok(DispatchOutcome {
                    fault,
                    results,
                    status: FaultStatus::Resolved,
                    cancelled: false,
                });
            }

            debug!(fault_id = %id, strategy = strategy.name(), "Strategy did not recover fault, falling through");
        }

        if cancelled {
            warn!(fault_id = %id, attempts = results.len(), "Recovery cancelled, fault left recovering");
            let fault = self.registry.get(id).await.ok_or(FaultError::UnknownFault(id))?;
            return Ok(DispatchOutcome {
                fault,
                results,
                status: FaultStatus::Recovering,
                cancelled: true,
            });
        }

        let fault = self.registry.transition(id, FaultStatus::Failed).await?;
        error!(fault_id = %id, attempts = results.len(), "All recovery strategies exhausted");
        Ok(DispatchOutcome {
            fault,
            results,
            status: FaultStatus::Failed,
            cancelled: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{Metadata, Severity};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted strategy that logs its invocations into a shared journal.
    struct Scripted {
        name: &'static str,
        succeed: bool,
        journal: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl RecoveryStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, _fault: &FaultDetection) -> bool {
            true
        }

        async fn recover(&self, fault: &FaultDetection, _cancel: &CancellationToken) -> Result<RecoveryResult, RecoveryError> {
            self.journal.lock().unwrap().push(self.name);
            let started = Instant::now();
            if self.succeed {
                Ok(RecoveryResult::succeeded(fault.id(), self.name, started))
            } else {
                Err(RecoveryError::BackupExecution("scripted failure".into()))
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl RecoveryStrategy for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }

        fn can_handle(&self, _fault: &FaultDetection) -> bool {
            true
        }

        async fn recover(&self, _fault: &FaultDetection, _cancel: &CancellationToken) -> Result<RecoveryResult, RecoveryError> {
            std::future::pending().await
        }
    }

    fn fault(fault_type: FaultType) -> FaultDetection {
        FaultDetection::new(fault_type, Severity::High, "node-2", "test", Metadata::new())
    }

    fn scripted(name: &'static str, succeed: bool, journal: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn RecoveryStrategy> {
        Arc::new(Scripted { name, succeed, journal: journal.clone() })
    }

    #[tokio::test]
    async fn test_first_success_stops_the_sequence() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let engine = RecoveryEngine::new(Arc::new(FaultRegistry::new()));
        engine.register(FaultType::NodeFailure, scripted("a", false, &journal));
        engine.register(FaultType::NodeFailure, scripted("b", true, &journal));
        engine.register(FaultType::NodeFailure, scripted("c", true, &journal));

        let f = fault(FaultType::NodeFailure);
        let outcome = engine.dispatch(&f, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.status, FaultStatus::Resolved);
        assert_eq!(outcome.resolved_by(), Some("b"));
        assert_eq!(*journal.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(engine.registry().attempts(f.id()).await.len(), 2);
        assert!(outcome.fault.resolved_at().is_some());
    }

    #[tokio::test]
    async fn test_no_eligible_strategy_fails_immediately() {
        let engine = RecoveryEngine::new(Arc::new(FaultRegistry::new()));
        let f = fault(FaultType::NetworkPartition);
        let outcome = engine.dispatch(&f, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, FaultStatus::Failed);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_fault_cannot_be_redispatched() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let engine = RecoveryEngine::new(Arc::new(FaultRegistry::new()));
        engine.register(FaultType::ServiceUnavailable, scripted("only", false, &journal));

        let f = fault(FaultType::ServiceUnavailable);
        let outcome = engine.dispatch(&f, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, FaultStatus::Failed);

        let err = engine.dispatch(&f, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FaultError::InvalidTransition { from: FaultStatus::Failed, .. }));
        assert_eq!(journal.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_fault_recovering() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let engine = RecoveryEngine::new(Arc::new(FaultRegistry::new()));
        engine.register(FaultType::NodeFailure, Arc::new(Hangs));
        engine.register(FaultType::NodeFailure, scripted("never", true, &journal));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let f = fault(FaultType::NodeFailure);
        let outcome = engine.dispatch(&f, &cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.status, FaultStatus::Recovering);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].error.as_deref(), Some("recovery cancelled"));
        assert!(journal.lock().unwrap().is_empty());
        let stored = engine.registry().get(f.id()).await.unwrap();
        assert_eq!(stored.status(), FaultStatus::Recovering);
        assert!(stored.resolved_at().is_none());
    }

    #[tokio::test]
    async fn test_default_registration_order() {
        let engine = RecoveryEngine::with_defaults(
            Arc::new(FaultRegistry::new()),
            &Collaborators::in_memory(),
            &RecoveryConfig::default(),
        );
        assert_eq!(
            engine.strategies_for(FaultType::NodeFailure),
            vec!["fast_recovery", "checkpoint_based"]
        );
        assert_eq!(
            engine.strategies_for(FaultType::ServiceUnavailable),
            vec!["checkpoint_based", "redundant_execution"]
        );
        assert_eq!(engine.strategies_for(FaultType::ResourceExhaustion), vec!["graceful_degradation"]);
    }
}
