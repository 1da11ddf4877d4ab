//! Weighted merging of analyzer output and the store of live predictions.

use crate::analysis::{
    AnalysisError, FaultPrediction, ModelKind, PredictionOutcome, PredictionStatus,
};
use crate::config::{ModelWeights, PredictionConfig};
use crate::fault::{FaultDetection, FaultType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub type WeightMap = BTreeMap<ModelKind, f64>;

pub fn initial_weights(weights: &ModelWeights) -> WeightMap {
    BTreeMap::from([
        (ModelKind::TimeSeries, weights.time_series),
        (ModelKind::MachineLearning, weights.machine_learning),
        (ModelKind::Trend, weights.trend),
        (ModelKind::Correlation, weights.correlation),
    ])
}

/// Merges predictions that agree on target and fault type.
#[derive(Debug, Clone)]
pub struct Ensemble {
    threshold: f64,
    horizon: Duration,
}

impl Ensemble {
    pub fn new(config: &PredictionConfig) -> Self {
        Self {
            threshold: config.confidence_threshold,
            horizon: config.horizon(),
        }
    }

    /// One prediction per (target, type) group whose weighted confidence
    /// reaches the threshold.
    pub fn combine(&self, predictions: Vec<FaultPrediction>, weights: &WeightMap) -> Vec<FaultPrediction> {
        let mut groups: BTreeMap<(String, FaultType), Vec<FaultPrediction>> = BTreeMap::new();
        for p in predictions {
            groups.entry((p.target.clone(), p.predicted_type)).or_default().push(p);
        }

        groups
            .into_iter()
            .filter_map(|((target, fault_type), mut members)| {
                // fixed fold order so float sums do not depend on analyzer order
                members.sort_by(|a, b| {
                    a.contributors
                        .cmp(&b.contributors)
                        .then_with(|| a.confidence().to_bits().cmp(&b.confidence().to_bits()))
                        .then_with(|| a.model_used.cmp(&b.model_used))
                        .then_with(|| a.id.cmp(&b.id))
                });
                self.merge_group(target, fault_type, &members, weights)
            })
            .collect()
    }

    fn merge_group(
        &self,
        target: String,
        fault_type: FaultType,
        members: &[FaultPrediction],
        weights: &WeightMap,
    ) -> Option<FaultPrediction> {
        let weight_of = |p: &FaultPrediction| -> f64 {
            p.contributors.iter().filter_map(|k| weights.get(k)).sum()
        };

        let weight_sum: f64 = members.iter().map(weight_of).sum();
        if weight_sum <= 0.0 || !weight_sum.is_finite() {
            return None;
        }
        let weighted: f64 = members.iter().map(|p| weight_of(p) * p.confidence()).sum();
        let confidence = weighted / weight_sum;
        if confidence < self.threshold {
            return None;
        }

        let count = members.len();
        let ttf = members.iter().map(FaultPrediction::time_to_failure).sum::<Duration>() / count as u32;

        let contributors: BTreeSet<ModelKind> =
            members.iter().flat_map(|p| p.contributors.iter().copied()).collect();
        let models_used: BTreeSet<&str> = members.iter().map(|p| p.model_used.as_str()).collect();

        let mut feature_sums: BTreeMap<String, f64> = BTreeMap::new();
        for p in members {
            for (name, value) in &p.features {
                *feature_sums.entry(name.clone()).or_default() += value;
            }
        }

        let lead = *contributors.iter().next()?;
        let mut merged = FaultPrediction::new("ensemble", lead, fault_type, target, confidence, ttf)
            .with_metadata("ensemble_count", count)
            .with_metadata("total_weight", weighted)
            .with_metadata("models_used", models_used.into_iter().collect::<Vec<_>>());
        merged.features = feature_sums
            .into_iter()
            .map(|(name, sum)| (name, sum / count as f64))
            .collect();
        merged.contributors = contributors.into_iter().collect();
        Some(merged)
    }

    /// Confidence and horizon gate applied before storage.
    pub fn admits(&self, prediction: &FaultPrediction) -> bool {
        prediction.confidence() >= self.threshold && prediction.time_to_failure() <= self.horizon
    }
}

/// Snapshot of the prediction history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PredictionStatistics {
    pub total_predictions: usize,
    pub active_predictions: usize,
    pub predictions_by_type: BTreeMap<FaultType, usize>,
    pub predictions_by_status: BTreeMap<PredictionStatus, usize>,
    pub average_confidence: f64,
    /// confirmed / (confirmed + expired + dismissed); 0 with no closed predictions.
    pub accuracy_rate: f64,
}

/// Pending predictions by id plus a bounded history of everything stored.
#[derive(Debug)]
pub struct PredictionStore {
    active: HashMap<Uuid, FaultPrediction>,
    history: VecDeque<FaultPrediction>,
    max_history: usize,
}

impl PredictionStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            active: HashMap::new(),
            history: VecDeque::new(),
            max_history,
        }
    }

    pub fn is_duplicate(&self, prediction: &FaultPrediction) -> bool {
        self.active.values().any(|p| {
            p.status() == PredictionStatus::Pending
                && p.target == prediction.target
                && p.predicted_type == prediction.predicted_type
        })
    }

    /// Store every candidate that is not already pending; returns the stored ones.
    pub fn admit(&mut self, candidates: Vec<FaultPrediction>) -> Vec<FaultPrediction> {
        let mut stored = Vec::new();
        for prediction in candidates {
            if self.is_duplicate(&prediction) {
                continue;
            }
            info!(
                prediction_id = %prediction.id,
                target = %prediction.target,
                fault_type = %prediction.predicted_type,
                confidence = prediction.confidence(),
                time_to_failure_secs = prediction.time_to_failure().as_secs_f64(),
                "Fault predicted"
            );
            self.active.insert(prediction.id, prediction.clone());
            self.history.push_back(prediction.clone());
            while self.history.len() > self.max_history {
                self.history.pop_front();
            }
            stored.push(prediction);
        }
        stored
    }

    fn close(
        &mut self,
        id: Uuid,
        status: PredictionStatus,
        outcome: PredictionOutcome,
    ) -> Result<FaultPrediction, AnalysisError> {
        let mut prediction = self.active.remove(&id).ok_or(AnalysisError::UnknownPrediction(id))?;
        if let Err(e) = prediction.close(status, outcome) {
            self.active.insert(id, prediction);
            return Err(e);
        }
        if let Some(entry) = self.history.iter_mut().rev().find(|p| p.id == id) {
            *entry = prediction.clone();
        }
        Ok(prediction)
    }

    /// Confirm pending predictions that match the fault's target and type.
    pub fn confirm_matching(&mut self, fault: &FaultDetection) -> Vec<FaultPrediction> {
        let ids: Vec<Uuid> = self
            .active
            .values()
            .filter(|p| {
                p.status() == PredictionStatus::Pending
                    && p.target == fault.target()
                    && p.predicted_type == fault.fault_type()
            })
            .map(|p| p.id)
            .collect();

        let mut confirmed = Vec::new();
        for id in ids {
            let Some(expected_at) = self.active.get(&id).map(FaultPrediction::expected_at) else {
                continue;
            };
            let outcome = PredictionOutcome {
                occurred: true,
                fault_id: Some(fault.id()),
                observed_at: fault.detected_at(),
                time_delta_secs: seconds_between(expected_at, fault.detected_at()),
            };
            if let Ok(p) = self.close(id, PredictionStatus::Confirmed, outcome) {
                info!(prediction_id = %p.id, fault_id = %fault.id(), "Prediction confirmed");
                confirmed.push(p);
            }
        }
        confirmed
    }

    /// Expire pending predictions whose expected time passed more than `grace` ago.
    pub fn expire(&mut self, now: DateTime<Utc>, grace: Duration) -> Vec<FaultPrediction> {
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let ids: Vec<Uuid> = self
            .active
            .values()
            .filter(|p| p.status() == PredictionStatus::Pending && p.expected_at() + grace < now)
            .map(|p| p.id)
            .collect();

        let mut expired = Vec::new();
        for id in ids {
            let Some(expected_at) = self.active.get(&id).map(FaultPrediction::expected_at) else {
                continue;
            };
            let outcome = PredictionOutcome {
                occurred: false,
                fault_id: None,
                observed_at: now,
                time_delta_secs: seconds_between(expected_at, now),
            };
            if let Ok(p) = self.close(id, PredictionStatus::Expired, outcome) {
                expired.push(p);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Predictions expired");
        }
        expired
    }

    /// Mark a pending prediction as a false alarm.
    pub fn dismiss(&mut self, id: Uuid) -> Result<FaultPrediction, AnalysisError> {
        let outcome = PredictionOutcome {
            occurred: false,
            fault_id: None,
            observed_at: Utc::now(),
            time_delta_secs: 0.0,
        };
        self.close(id, PredictionStatus::Dismissed, outcome)
    }

    /// Pending predictions, oldest first.
    pub fn active(&self) -> Vec<FaultPrediction> {
        let mut active: Vec<FaultPrediction> = self.active.values().cloned().collect();
        active.sort_by_key(FaultPrediction::predicted_at);
        active
    }

    pub fn history(&self) -> Vec<FaultPrediction> {
        self.history.iter().cloned().collect()
    }

    pub fn statistics(&self) -> PredictionStatistics {
        let mut stats = PredictionStatistics {
            total_predictions: self.history.len(),
            active_predictions: self.active.len(),
            ..PredictionStatistics::default()
        };
        if self.history.is_empty() {
            return stats;
        }

        let mut confidence_sum = 0.0;
        for p in &self.history {
            *stats.predictions_by_type.entry(p.predicted_type).or_default() += 1;
            *stats.predictions_by_status.entry(p.status()).or_default() += 1;
            confidence_sum += p.confidence();
        }
        stats.average_confidence = confidence_sum / self.history.len() as f64;

        let count = |s: PredictionStatus| stats.predictions_by_status.get(&s).copied().unwrap_or(0);
        let confirmed = count(PredictionStatus::Confirmed);
        let closed = confirmed + count(PredictionStatus::Expired) + count(PredictionStatus::Dismissed);
        if closed > 0 {
            stats.accuracy_rate = confirmed as f64 / closed as f64;
        }
        stats
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
