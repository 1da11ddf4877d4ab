//! Fault model: classification, severity, and the status state machine.

pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Free-form key/value annotations attached to faults, results and predictions.
pub type Metadata = HashMap<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum FaultError {
    #[error("unknown fault {0}")]
    UnknownFault(Uuid),

    #[error("invalid status transition for fault {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: FaultStatus,
        to: FaultStatus,
    },

    #[error("unknown fault type '{0}'")]
    UnknownFaultType(String),

    #[error("unknown severity '{0}'")]
    UnknownSeverity(String),
}

/// Classification of a detected abnormal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    NodeFailure,
    NetworkPartition,
    ResourceExhaustion,
    PerformanceAnomaly,
    ServiceUnavailable,
}

impl FaultType {
    pub const ALL: [FaultType; 5] = [
        FaultType::NodeFailure,
        FaultType::NetworkPartition,
        FaultType::ResourceExhaustion,
        FaultType::PerformanceAnomaly,
        FaultType::ServiceUnavailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::NodeFailure => "node_failure",
            FaultType::NetworkPartition => "network_partition",
            FaultType::ResourceExhaustion => "resource_exhaustion",
            FaultType::PerformanceAnomaly => "performance_anomaly",
            FaultType::ServiceUnavailable => "service_unavailable",
        }
    }

    /// Severity assigned to a freshly detected fault of this type.
    pub fn default_severity(&self) -> Severity {
        match self {
            FaultType::NodeFailure => Severity::High,
            FaultType::NetworkPartition => Severity::Critical,
            FaultType::ResourceExhaustion => Severity::High,
            FaultType::PerformanceAnomaly => Severity::Medium,
            FaultType::ServiceUnavailable => Severity::High,
        }
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultType {
    type Err = FaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        FaultType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| FaultError::UnknownFaultType(s.to_string()))
    }
}

/// Severity levels, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = FaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(FaultError::UnknownSeverity(s.to_string())),
        }
    }
}

/// Lifecycle of a fault. `Detected -> Recovering -> Resolved | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStatus {
    Detected,
    Recovering,
    Resolved,
    Failed,
}

impl FaultStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FaultStatus::Resolved | FaultStatus::Failed)
    }

    /// Only forward single-step transitions are legal.
    pub fn can_transition_to(&self, next: FaultStatus) -> bool {
        matches!(
            (self, next),
            (FaultStatus::Detected, FaultStatus::Recovering)
                | (FaultStatus::Recovering, FaultStatus::Resolved)
                | (FaultStatus::Recovering, FaultStatus::Failed)
        )
    }
}

impl fmt::Display for FaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultStatus::Detected => "detected",
            FaultStatus::Recovering => "recovering",
            FaultStatus::Resolved => "resolved",
            FaultStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A detected fault. Type, severity and target are fixed at creation;
/// status only moves forward through [`FaultDetection::transition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultDetection {
    id: Uuid,
    fault_type: FaultType,
    severity: Severity,
    target: String,
    pub description: String,
    pub metadata: Metadata,
    status: FaultStatus,
    detected_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl FaultDetection {
    pub fn new(
        fault_type: FaultType,
        severity: Severity,
        target: impl Into<String>,
        description: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            fault_type,
            severity,
            target: target.into(),
            description: description.into(),
            metadata,
            status: FaultStatus::Detected,
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn fault_type(&self) -> FaultType {
        self.fault_type
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn status(&self) -> FaultStatus {
        self.status
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Move to `next`, stamping `resolved_at` when the fault resolves.
    pub(crate) fn transition(&mut self, next: FaultStatus) -> Result<(), FaultError> {
        if !self.status.can_transition_to(next) {
            return Err(FaultError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == FaultStatus::Resolved {
            // resolved_at never precedes detected_at
            self.resolved_at = Some(Utc::now().max(self.detected_at));
        }
        Ok(())
    }
}
