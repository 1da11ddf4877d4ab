//! Interfaces to the systems recovery strategies act upon, plus in-memory
//! implementations used by the CLI and tests.

use crate::fault::{FaultDetection, Metadata, Severity};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// A saved snapshot of cluster state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Checkpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn latest_checkpoint(&self) -> Result<Option<Checkpoint>>;
    async fn restore(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Report returned by a self-healing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingResult {
    pub success: bool,
    pub actions: Vec<String>,
    pub confidence: f64,
    pub duration: Duration,
}

#[async_trait]
pub trait SelfHealingEngine: Send + Sync {
    async fn heal_fault(&self, fault: &FaultDetection, cancel: &CancellationToken) -> Result<HealingResult>;
}

#[async_trait]
pub trait BackupExecutor: Send + Sync {
    /// Re-run the fault's workload on `nodes` backup nodes.
    async fn execute_on_backups(&self, fault: &FaultDetection, nodes: usize) -> Result<()>;
}

/// How far a degraded service is scaled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Light,
    Medium,
}

impl DegradationLevel {
    /// Only low and medium severity faults are degraded.
    pub fn for_severity(severity: Severity) -> Option<Self> {
        match severity {
            Severity::Low => Some(DegradationLevel::Light),
            Severity::Medium => Some(DegradationLevel::Medium),
            Severity::High | Severity::Critical => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationLevel::Light => "light",
            DegradationLevel::Medium => "medium",
        }
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn restart_service(&self, target: &str) -> Result<()>;
    async fn degrade_service(&self, target: &str, level: DegradationLevel) -> Result<()>;
}

/// The set of collaborators the default strategies are wired against.
#[derive(Clone)]
pub struct Collaborators {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub services: Arc<dyn ServiceControl>,
    pub backups: Arc<dyn BackupExecutor>,
    pub self_healing: Option<Arc<dyn SelfHealingEngine>>,
}

impl Collaborators {
    /// In-memory collaborators with an empty checkpoint store and no self-healing engine.
    pub fn in_memory() -> Self {
        Self {
            checkpoints: Arc::new(InMemoryCheckpointStore::default()),
            services: Arc::new(RecordingServiceControl::default()),
            backups: Arc::new(LocalBackupExecutor::default()),
            self_healing: None,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("self_healing", &self.self_healing.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<Vec<Checkpoint>>,
    restored: Mutex<Vec<String>>,
    fail_restore: AtomicBool,
}

impl InMemoryCheckpointStore {
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoints: Mutex::new(vec![checkpoint]),
            ..Self::default()
        }
    }

    pub async fn push(&self, checkpoint: Checkpoint) {
        self.checkpoints.lock().await.push(checkpoint);
    }

    /// IDs of every checkpoint restored so far, oldest first.
    pub async fn restored(&self) -> Vec<String> {
        self.restored.lock().await.clone()
    }

    pub fn set_fail_restore(&self, fail: bool) {
        self.fail_restore.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn latest_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.lock().await;
        Ok(checkpoints.iter().max_by_key(|c| c.created_at).cloned())
    }

    async fn restore(&self, checkpoint: &Checkpoint) -> Result<()> {
        if self.fail_restore.load(Ordering::SeqCst) {
            bail!("checkpoint {} is corrupt", checkpoint.id);
        }
        info!(checkpoint_id = %checkpoint.id, "Restored from checkpoint");
        self.restored.lock().await.push(checkpoint.id.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingServiceControl {
    restarts: Mutex<Vec<String>>,
    degradations: Mutex<Vec<(String, DegradationLevel)>>,
    fail: AtomicBool,
}

impl RecordingServiceControl {
    pub async fn restarts(&self) -> Vec<String> {
        self.restarts.lock().await.clone()
    }

    pub async fn degradations(&self) -> Vec<(String, DegradationLevel)> {
        self.degradations.lock().await.clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceControl for RecordingServiceControl {
    async fn restart_service(&self, target: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("service {target} did not come back up");
        }
        info!(%target, "Service restarted");
        self.restarts.lock().await.push(target.to_string());
        Ok(())
    }

    async fn degrade_service(&self, target: &str, level: DegradationLevel) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("service {target} rejected degradation");
        }
        info!(%target, %level, "Service degraded");
        self.degradations.lock().await.push((target.to_string(), level));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LocalBackupExecutor {
    runs: Mutex<Vec<(Uuid, usize)>>,
    fail: AtomicBool,
}

impl LocalBackupExecutor {
    /// `(fault_id, nodes)` for every backup execution so far.
    pub async fn runs(&self) -> Vec<(Uuid, usize)> {
        self.runs.lock().await.clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackupExecutor for LocalBackupExecutor {
    async fn execute_on_backups(&self, fault: &FaultDetection, nodes: usize) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("no backup capacity for {}", fault.target());
        }
        info!(fault_id = %fault.id(), nodes, "Workload re-executed on backup nodes");
        self.runs.lock().await.push((fault.id(), nodes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_checkpoint_is_newest() -> Result<()> {
        let store = InMemoryCheckpointStore::default();
        assert!(store.latest_checkpoint().await?.is_none());

        let mut old = Checkpoint::new("cp-old");
        old.created_at = Utc::now() - chrono::Duration::minutes(5);
        store.push(old).await;
        store.push(Checkpoint::new("cp-new")).await;

        let latest = store.latest_checkpoint().await?.unwrap();
        assert_eq!(latest.id, "cp-new");
        Ok(())
    }

    #[test]
    fn test_failed_restore_is_not_recorded() {
        let store = InMemoryCheckpointStore::with_checkpoint(Checkpoint::new("cp-1"));
        store.set_fail_restore(true);

        tokio_test::block_on(async {
            let latest = store.latest_checkpoint().await.unwrap().unwrap();
            let err = store.restore(&latest).await.unwrap_err();
            assert!(err.to_string().contains("cp-1"));
            assert!(store.restored().await.is_empty());
        });
    }

    #[test]
    fn test_degradation_level_by_severity() {
        assert_eq!(DegradationLevel::for_severity(Severity::Low), Some(DegradationLevel::Light));
        assert_eq!(DegradationLevel::for_severity(Severity::Medium), Some(DegradationLevel::Medium));
        assert_eq!(DegradationLevel::for_severity(Severity::Critical), None);
    }
}
