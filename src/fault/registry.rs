use crate::fault::{FaultDetection, FaultError, FaultStatus};
use crate::recovery::RecoveryResult;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// A fault together with every recovery attempt made for it.
#[derive(Debug, Clone, Serialize)]
pub struct FaultRecord {
    pub fault: FaultDetection,
    pub attempts: Vec<RecoveryResult>,
}

/// Owns all fault records and their attempt logs. Records are never removed.
#[derive(Debug, Default)]
pub struct FaultRegistry {
    records: RwLock<HashMap<Uuid, FaultRecord>>,
}

impl FaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fault. Re-registering a known ID keeps the stored record.
    pub async fn register(&self, fault: FaultDetection) -> Uuid {
        let id = fault.id();
        let mut records = self.records.write().await;
        records.entry(id).or_insert_with(|| {
            debug!(fault_id = %id, fault_type = %fault.fault_type(), "Fault registered");
            FaultRecord {
                fault,
                attempts: Vec::new(),
            }
        });
        id
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.records.read().await.contains_key(&id)
    }

    pub async fn get(&self, id: Uuid) -> Option<FaultDetection> {
        self.records.read().await.get(&id).map(|r| r.fault.clone())
    }

    pub async fn record(&self, id: Uuid) -> Option<FaultRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// Apply a status transition and return the updated fault.
    pub async fn transition(&self, id: Uuid, next: FaultStatus) -> Result<FaultDetection, FaultError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(FaultError::UnknownFault(id))?;
        record.fault.transition(next)?;
        debug!(fault_id = %id, status = %next, "Fault status changed");
        Ok(record.fault.clone())
    }

    /// Append to the attempt log of a registered fault.
    pub async fn record_attempt(&self, result: RecoveryResult) -> Result<(), FaultError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&result.fault_id)
            .ok_or(FaultError::UnknownFault(result.fault_id))?;
        record.attempts.push(result);
        Ok(())
    }

    pub async fn attempts(&self, id: Uuid) -> Vec<RecoveryResult> {
        self.records
            .read()
            .await
            .get(&id)
            .map(|r| r.attempts.clone())
            .unwrap_or_default()
    }

    /// Most recently detected faults first.
    pub async fn list_recent(&self, limit: usize) -> Vec<FaultDetection> {
        let records = self.records.read().await;
        let mut faults: Vec<FaultDetection> = records.values().map(|r| r.fault.clone()).collect();
        faults.sort_by(|a, b| b.detected_at().cmp(&a.detected_at()));
        faults.truncate(limit);
        faults
    }

    pub async fn list_by_status(&self, status: FaultStatus) -> Vec<FaultDetection> {
        let records = self.records.read().await;
        let mut faults: Vec<FaultDetection> = records
            .values()
            .filter(|r| r.fault.status() == status)
            .map(|r| r.fault.clone())
            .collect();
        faults.sort_by_key(|f| f.detected_at());
        faults
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
