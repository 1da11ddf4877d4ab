//! Recovery strategies and the engine that dispatches faults to them.

pub mod collaborators;
pub mod engine;
pub mod self_healing;
pub mod strategies;

use crate::fault::{FaultDetection, FaultType, Metadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use collaborators::{
    BackupExecutor, Checkpoint, CheckpointStore, Collaborators, DegradationLevel, HealingResult,
    SelfHealingEngine, ServiceControl,
};
pub use engine::{DispatchOutcome, RecoveryEngine};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("no checkpoint available")]
    NoCheckpoint,

    #[error("failed to get latest checkpoint: {0}")]
    CheckpointLookup(String),

    #[error("failed to restore from checkpoint: {0}")]
    Restore(String),

    #[error("failed to execute on backup nodes: {0}")]
    BackupExecution(String),

    #[error("failed to restart service: {0}")]
    ServiceRestart(String),

    #[error("failed to degrade service: {0}")]
    Degradation(String),

    #[error("strategy {strategy} cannot handle {fault_type} faults")]
    Unsupported {
        strategy: String,
        fault_type: FaultType,
    },

    #[error("recovery cancelled")]
    Cancelled,
}

/// Outcome of one strategy attempt against one fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub fault_id: Uuid,
    pub strategy: String,
    pub successful: bool,
    pub duration: Duration,
    pub error: Option<String>,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl RecoveryResult {
    pub fn succeeded(fault_id: Uuid, strategy: &str, started: Instant) -> Self {
        Self {
            fault_id,
            strategy: strategy.to_string(),
            successful: true,
            duration: started.elapsed(),
            error: None,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(fault_id: Uuid, strategy: &str, started: Instant, error: impl Into<String>) -> Self {
        Self {
            fault_id,
            strategy: strategy.to_string(),
            successful: false,
            duration: started.elapsed(),
            error: Some(error.into()),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A recovery policy. `can_handle` must be pure; `recover` may touch
/// collaborators and must be safe to retry.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, fault: &FaultDetection) -> bool;

    async fn recover(
        &self,
        fault: &FaultDetection,
        cancel: &CancellationToken,
    ) -> Result<RecoveryResult, RecoveryError>;
}

/// Reject faults the strategy's own `can_handle` would have filtered out.
pub(crate) fn ensure_handles(
    strategy: &dyn RecoveryStrategy,
    fault: &FaultDetection,
) -> Result<(), RecoveryError> {
    if strategy.can_handle(fault) {
        Ok(())
    } else {
        Err(RecoveryError::Unsupported {
            strategy: strategy.name().to_string(),
            fault_type: fault.fault_type(),
        })
    }
}
