//! Built-in recovery strategies.

use crate::fault::{FaultDetection, FaultType, Severity};
use crate::recovery::collaborators::{
    BackupExecutor, Checkpoint, CheckpointStore, DegradationLevel, ServiceControl,
};
use crate::recovery::{ensure_handles, RecoveryError, RecoveryResult, RecoveryStrategy};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const FAST_RECOVERY: &str = "fast_recovery";
pub const CHECKPOINT_BASED: &str = "checkpoint_based";
pub const REDUNDANT_EXECUTION: &str = "redundant_execution";
pub const GRACEFUL_DEGRADATION: &str = "graceful_degradation";

/// Default number of backup nodes used for redundant execution.
pub const DEFAULT_BACKUP_NODES: usize = 2;

async fn restore_latest(store: &dyn CheckpointStore) -> Result<Checkpoint, RecoveryError> {
    let checkpoint = store
        .latest_checkpoint()
        .await
        .map_err(|e| RecoveryError::CheckpointLookup(format!("{e:#}")))?
        .ok_or(RecoveryError::NoCheckpoint)?;

    store
        .restore(&checkpoint)
        .await
        .map_err(|e| RecoveryError::Restore(format!("{e:#}")))?;

    Ok(checkpoint)
}

/// Restores node failures from the latest checkpoint and restarts services
/// showing performance anomalies.
pub struct FastRecovery {
    checkpoints: Arc<dyn CheckpointStore>,
    services: Arc<dyn ServiceControl>,
}

impl FastRecovery {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, services: Arc<dyn ServiceControl>) -> Self {
        Self { checkpoints, services }
    }
}

#[async_trait]
impl RecoveryStrategy for FastRecovery {
    fn name(&self) -> &str {
        FAST_RECOVERY
    }

    fn can_handle(&self, fault: &FaultDetection) -> bool {
        matches!(
            fault.fault_type(),
            FaultType::NodeFailure | FaultType::PerformanceAnomaly
        )
    }

    async fn recover(
        &self,
        fault: &FaultDetection,
        _cancel: &CancellationToken,
    ) -> Result<RecoveryResult, RecoveryError> {
        ensure_handles(self, fault)?;
        let started = Instant::now();

        if fault.fault_type() == FaultType::NodeFailure {
            let checkpoint = restore_latest(self.checkpoints.as_ref()).await?;
            debug!(fault_id = %fault.id(), checkpoint_id = %checkpoint.id, "Fast recovery restored checkpoint");
            return Ok(RecoveryResult::succeeded(fault.id(), self.name(), started)
                .with_metadata("checkpoint_id", checkpoint.id));
        }

        self.services
            .restart_service(fault.target())
            .await
            .map_err(|e| RecoveryError::ServiceRestart(format!("{e:#}")))?;

        Ok(RecoveryResult::succeeded(fault.id(), self.name(), started)
            .with_metadata("action", "service_restart")
            .with_metadata("target", fault.target()))
    }
}

/// Universal fallback: restore the latest checkpoint whatever the fault.
pub struct CheckpointBased {
    checkpoints: Arc<dyn CheckpointStore>,
}

impl CheckpointBased {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self { checkpoints }
    }
}

#[async_trait]
impl RecoveryStrategy for CheckpointBased {
    fn name(&self) -> &str {
        CHECKPOINT_BASED
    }

    fn can_handle(&self, _fault: &FaultDetection) -> bool {
        true
    }

    async fn recover(
        &self,
        fault: &FaultDetection,
        _cancel: &CancellationToken,
    ) -> Result<RecoveryResult, RecoveryError> {
        let started = Instant::now();
        let checkpoint = restore_latest(self.checkpoints.as_ref()).await?;
        let age_secs = (Utc::now() - checkpoint.created_at).num_seconds().max(0);

        Ok(RecoveryResult::succeeded(fault.id(), self.name(), started)
            .with_metadata("checkpoint_id", checkpoint.id)
            .with_metadata("checkpoint_age_secs", age_secs))
    }
}

/// Re-runs the workload on backup nodes. Reserved for high and critical faults.
pub struct RedundantExecution {
    backups: Arc<dyn BackupExecutor>,
    backup_nodes: usize,
}

impl RedundantExecution {
    pub fn new(backups: Arc<dyn BackupExecutor>, backup_nodes: usize) -> Self {
        Self {
            backups,
            backup_nodes: backup_nodes.max(1),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for RedundantExecution {
    fn name(&self) -> &str {
        REDUNDANT_EXECUTION
    }

    fn can_handle(&self, fault: &FaultDetection) -> bool {
        fault.severity() >= Severity::High
    }

    async fn recover(
        &self,
        fault: &FaultDetection,
        _cancel: &CancellationToken,
    ) -> Result<RecoveryResult, RecoveryError> {
        ensure_handles(self, fault)?;
        let started = Instant::now();

        self.backups
            .execute_on_backups(fault, self.backup_nodes)
            .await
            .map_err(|e| RecoveryError::BackupExecution(format!("{e:#}")))?;

        Ok(RecoveryResult::succeeded(fault.id(), self.name(), started)
            .with_metadata("backup_nodes_used", self.backup_nodes))
    }
}

/// Scales back non-critical features instead of restoring anything.
pub struct GracefulDegradation {
    services: Arc<dyn ServiceControl>,
}

impl GracefulDegradation {
    pub fn new(services: Arc<dyn ServiceControl>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl RecoveryStrategy for GracefulDegradation {
    fn name(&self) -> &str {
        GRACEFUL_DEGRADATION
    }

    fn can_handle(&self, fault: &FaultDetection) -> bool {
        DegradationLevel::for_severity(fault.severity()).is_some()
    }

    async fn recover(
        &self,
        fault: &FaultDetection,
        _cancel: &CancellationToken,
    ) -> Result<RecoveryResult, RecoveryError> {
        let Some(level) = DegradationLevel::for_severity(fault.severity()) else {
            return Err(RecoveryError::Unsupported {
                strategy: self.name().to_string(),
                fault_type: fault.fault_type(),
            });
        };
        let started = Instant::now();

        self.services
            .degrade_service(fault.target(), level)
            .await
            .map_err(|e| RecoveryError::Degradation(format!("{e:#}")))?;

        Ok(RecoveryResult::succeeded(fault.id(), self.name(), started)
            .with_metadata("degradation_level", level.as_str()))
    }
}
