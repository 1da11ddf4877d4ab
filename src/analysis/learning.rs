use crate::analysis::ensemble::WeightMap;
use crate::analysis::{FaultPrediction, ModelKind};
use crate::config::LearningConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Whether a model family's prediction came true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeSample {
    pub kind: ModelKind,
    pub correct: bool,
}

impl OutcomeSample {
    /// One sample per contributing family of a closed prediction.
    pub fn from_prediction(prediction: &FaultPrediction) -> Vec<Self> {
        let Some(outcome) = prediction.outcome() else {
            return Vec::new();
        };
        prediction
            .contributors
            .iter()
            .map(|&kind| Self {
                kind,
                correct: outcome.occurred,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelPerformance {
    pub accuracy: f64,
    pub predictions: u64,
    pub correct: u64,
    /// Recent outcomes, oldest first.
    pub history: VecDeque<bool>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LearningMetrics {
    pub predictions_made: u64,
    pub predictions_correct: u64,
    pub accuracy: f64,
    pub adaptation_rate: f64,
    pub momentum: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

struct LearningState {
    weights: WeightMap,
    /// Last applied step per model, decayed by `momentum`.
    velocity: WeightMap,
    performance: BTreeMap<ModelKind, ModelPerformance>,
    metrics: LearningMetrics,
}

/// Tracks per-family accuracy and shifts ensemble weight toward the
/// families that have been right.
pub struct LearningEngine {
    config: LearningConfig,
    state: Mutex<LearningState>,
}

impl LearningEngine {
    pub fn new(config: LearningConfig, weights: WeightMap) -> Self {
        let performance = weights
            .keys()
            .map(|&kind| {
                (
                    kind,
                    ModelPerformance {
                        accuracy: config.initial_accuracy,
                        predictions: 0,
                        correct: 0,
                        history: VecDeque::new(),
                        last_updated: None,
                    },
                )
            })
            .collect();
        let metrics = LearningMetrics {
            adaptation_rate: config.adaptation_rate,
            momentum: config.momentum,
            ..LearningMetrics::default()
        };
        Self {
            config,
            state: Mutex::new(LearningState {
                velocity: weights.keys().map(|&k| (k, 0.0)).collect(),
                weights,
                performance,
                metrics,
            }),
        }
    }

    pub fn weights(&self) -> WeightMap {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.weights.clone()
    }

    pub fn performance(&self, kind: ModelKind) -> Option<ModelPerformance> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.performance.get(&kind).cloned()
    }

    pub fn metrics(&self) -> LearningMetrics {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.metrics.clone()
    }

    /// Fold a batch of outcomes into the accuracy estimates and rebalance.
    pub fn learn(&self, samples: &[OutcomeSample]) {
        if !self.config.enabled || samples.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();

        let mut batches: BTreeMap<ModelKind, (u64, u64)> = BTreeMap::new();
        for sample in samples {
            let (total, correct) = batches.entry(sample.kind).or_default();
            *total += 1;
            *correct += u64::from(sample.correct);
        }

        for (kind, (total, correct)) in batches {
            let perf = state.performance.entry(kind).or_insert_with(|| ModelPerformance {
                accuracy: self.config.initial_accuracy,
                predictions: 0,
                correct: 0,
                history: VecDeque::new(),
                last_updated: None,
            });
            let batch_accuracy = correct as f64 / total as f64;
            let alpha = self.config.accuracy_alpha;
            perf.accuracy = alpha * batch_accuracy + (1.0 - alpha) * perf.accuracy;
            perf.predictions += total;
            perf.correct += correct;
            perf.last_updated = Some(now);
            debug!(model = %kind, batch_accuracy, accuracy = perf.accuracy, "Model accuracy updated");
        }

        for sample in samples {
            if let Some(perf) = state.performance.get_mut(&sample.kind) {
                perf.history.push_back(sample.correct);
                while perf.history.len() > self.config.max_history {
                    perf.history.pop_front();
                }
            }
        }

        let LearningState {
            weights,
            velocity,
            performance,
            metrics,
        } = &mut *state;
        let target = rebalance_target(weights, performance);
        step_toward(weights, velocity, target.as_ref(), self.config.adaptation_rate, self.config.momentum);

        metrics.predictions_made += samples.len() as u64;
        metrics.predictions_correct += samples.iter().filter(|s| s.correct).count() as u64;
        metrics.accuracy = metrics.predictions_correct as f64 / metrics.predictions_made as f64;
        metrics.last_updated = Some(now);

        info!(samples = samples.len(), accuracy = metrics.accuracy, "Learning pass complete");
    }
}

/// Accuracy-weighted allocation: w * (0.5 + 0.5 * acc / sum(acc)),
/// rescaled to the current total. `None` when there is nothing to weigh.
fn rebalance_target(
    weights: &WeightMap,
    performance: &BTreeMap<ModelKind, ModelPerformance>,
) -> Option<WeightMap> {
    let total_before: f64 = weights.values().sum();
    let accuracy_sum: f64 = weights
        .keys()
        .filter_map(|k| performance.get(k))
        .map(|p| p.accuracy)
        .sum();
    if accuracy_sum <= 0.0 || total_before <= 0.0 {
        return None;
    }

    let mut target = weights.clone();
    for (kind, w) in target.iter_mut() {
        let relative = performance.get(kind).map_or(0.0, |p| p.accuracy / accuracy_sum);
        *w *= 0.5 + 0.5 * relative;
    }

    let total_after: f64 = target.values().sum();
    if total_after <= 0.0 || !total_after.is_finite() {
        return None;
    }
    for w in target.values_mut() {
        *w *= total_before / total_after;
    }
    Some(target)
}

/// v <- momentum * v + rate * (target - w); w <- w + v.
///
/// Target and current weights share a total, so the steps sum to zero and
/// the total is preserved. A step that would leave a weight non-positive or
/// non-finite is dropped and the velocity reset.
fn step_toward(
    weights: &mut WeightMap,
    velocity: &mut WeightMap,
    target: Option<&WeightMap>,
    rate: f64,
    momentum: f64,
) {
    let Some(target) = target else {
        return;
    };

    let mut next_velocity = WeightMap::new();
    let mut next_weights = WeightMap::new();
    for (&kind, &w) in weights.iter() {
        let goal = target.get(&kind).copied().unwrap_or(w);
        let v = momentum * velocity.get(&kind).copied().unwrap_or(0.0) + rate * (goal - w);
        next_velocity.insert(kind, v);
        next_weights.insert(kind, w + v);
    }

    if next_weights.values().any(|w| !w.is_finite() || *w <= 0.0) {
        debug!("Weight step rejected, resetting momentum");
        velocity.values_mut().for_each(|v| *v = 0.0);
        return;
    }
    *weights = next_weights;
    *velocity = next_velocity;
}
