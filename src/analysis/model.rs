use crate::analysis::features::{self, FeatureMap};
use crate::analysis::stats;
use crate::analysis::{AnalysisError, FaultPrediction, ModelKind};
use crate::config::MlConfig;
use crate::fault::FaultType;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Output channel order of the network.
pub const OUTPUT_TYPES: [FaultType; 4] = [
    FaultType::ResourceExhaustion,
    FaultType::PerformanceAnomaly,
    FaultType::NetworkPartition,
    FaultType::ServiceUnavailable,
];

/// A channel must exceed this to be reported.
const OUTPUT_THRESHOLD: f64 = 0.5;

/// Two-layer feed-forward network with sigmoid activations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralNetwork {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    pub weights1: Vec<Vec<f64>>, // [input][hidden]
    pub weights2: Vec<Vec<f64>>, // [hidden][output]
    pub bias1: Vec<f64>,
    pub bias2: Vec<f64>,
}

impl NeuralNetwork {
    /// Uniform weights in [-0.5, 0.5) from `seed`, zero biases.
    pub fn seeded(input_size: usize, hidden_size: usize, seed: u64) -> Self {
        let output_size = OUTPUT_TYPES.len();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut layer = |rows: usize, cols: usize| -> Vec<Vec<f64>> {
            (0..rows)
                .map(|_| (0..cols).map(|_| rng.gen_range(-0.5..0.5)).collect())
                .collect()
        };
        let weights1 = layer(input_size, hidden_size);
        let weights2 = layer(hidden_size, output_size);
        Self {
            input_size,
            hidden_size,
            output_size,
            weights1,
            weights2,
            bias1: vec![0.0; hidden_size],
            bias2: vec![0.0; output_size],
        }
    }

    /// Load trained weights from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let network: Self = serde_json::from_str(&content)?;
        network.validate()?;
        info!("Loaded network weights from {}", path.display());
        Ok(network)
    }

    fn validate(&self) -> Result<()> {
        let rows_ok = |m: &[Vec<f64>], rows: usize, cols: usize| {
            m.len() == rows && m.iter().all(|r| r.len() == cols)
        };
        if !rows_ok(&self.weights1, self.input_size, self.hidden_size)
            || !rows_ok(&self.weights2, self.hidden_size, self.output_size)
            || self.bias1.len() != self.hidden_size
            || self.bias2.len() != self.output_size
        {
            anyhow::bail!(
                "Network shape mismatch. Declared {}x{}x{}",
                self.input_size,
                self.hidden_size,
                self.output_size
            );
        }
        if self.output_size != OUTPUT_TYPES.len() {
            anyhow::bail!(
                "Network must have {} outputs, got {}",
                OUTPUT_TYPES.len(),
                self.output_size
            );
        }
        Ok(())
    }

    pub fn forward(&self, input: &[f64]) -> Result<Vec<f64>, AnalysisError> {
        if input.len() != self.input_size {
            return Err(AnalysisError::DimensionMismatch {
                what: "network input",
                expected: self.input_size,
                got: input.len(),
            });
        }

        let hidden: Vec<f64> = (0..self.hidden_size)
            .map(|j| {
                let sum = input
                    .iter()
                    .zip(&self.weights1)
                    .fold(self.bias1[j], |acc, (x, row)| acc + x * row[j]);
                stats::sigmoid(sum)
            })
            .collect();

        Ok((0..self.output_size)
            .map(|k| {
                let sum = hidden
                    .iter()
                    .zip(&self.weights2)
                    .fold(self.bias2[k], |acc, (h, row)| acc + h * row[k]);
                stats::sigmoid(sum)
            })
            .collect())
    }
}

/// Leaf of a single-split tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Normal,
    Fault(FaultType),
}

/// One-split decision tree: `feature > threshold` yields `above`.
#[derive(Debug, Clone)]
pub struct DecisionStump {
    pub feature: String,
    pub threshold: f64,
    pub above: Verdict,
}

impl DecisionStump {
    fn new(feature: &str, threshold: f64, fault: FaultType) -> Self {
        Self {
            feature: feature.to_string(),
            threshold,
            above: Verdict::Fault(fault),
        }
    }

    /// `None` when the feature is absent.
    pub fn decide(&self, features: &FeatureMap) -> Option<Verdict> {
        let value = *features.get(&self.feature)?;
        Some(if value > self.threshold {
            self.above
        } else {
            Verdict::Normal
        })
    }
}

#[derive(Debug, Clone)]
pub struct DecisionForest {
    pub trees: Vec<DecisionStump>,
}

impl Default for DecisionForest {
    fn default() -> Self {
        Self {
            trees: vec![
                DecisionStump::new("cpu_usage", 0.8, FaultType::ResourceExhaustion),
                DecisionStump::new("memory_usage", 0.9, FaultType::ResourceExhaustion),
                DecisionStump::new("response_time", 1000.0, FaultType::PerformanceAnomaly),
            ],
        }
    }
}

impl DecisionForest {
    /// Majority verdict and its vote count. A majority needs more than half
    /// of all trees; a `Normal` majority is returned like any other.
    pub fn vote(&self, features: &FeatureMap) -> Option<(Verdict, usize)> {
        let mut votes: Vec<(Verdict, usize)> = Vec::new();
        for verdict in self.trees.iter().filter_map(|t| t.decide(features)) {
            match votes.iter_mut().find(|(v, _)| *v == verdict) {
                Some((_, n)) => *n += 1,
                None => votes.push((verdict, 1)),
            }
        }
        let (verdict, count) = votes.into_iter().max_by_key(|(_, n)| *n)?;
        (count * 2 > self.trees.len()).then_some((verdict, count))
    }
}

/// Neural network plus optional decision forest over extracted features.
pub struct MlPredictor {
    network: Option<NeuralNetwork>,
    forest: Option<DecisionForest>,
}

impl MlPredictor {
    pub fn new(config: &MlConfig) -> Self {
        let network = config.enable_neural_net.then(|| {
            if let Some(path) = &config.weights_path {
                match NeuralNetwork::load(path) {
                    Ok(network) if network.input_size == config.input_size => return network,
                    Ok(network) => warn!(
                        "Network at {} has {} inputs, expected {}. Using seeded weights.",
                        path.display(),
                        network.input_size,
                        config.input_size
                    ),
                    Err(e) => warn!(
                        "Failed to load network at {}: {:#}. Using seeded weights.",
                        path.display(),
                        e
                    ),
                }
            }
            NeuralNetwork::seeded(config.input_size, config.hidden_size, config.seed)
        });
        let forest = config.enable_decision_tree.then(DecisionForest::default);
        Self { network, forest }
    }

    pub fn with_network(network: NeuralNetwork) -> Self {
        Self {
            network: Some(network),
            forest: None,
        }
    }

    pub fn with_forest(mut self, forest: DecisionForest) -> Self {
        self.forest = Some(forest);
        self
    }

    pub fn predict(&self, features: &FeatureMap) -> Vec<FaultPrediction> {
        if features.is_empty() {
            return Vec::new();
        }
        let mut predictions = Vec::new();

        if let Some(network) = &self.network {
            let input = features::feature_vector(features, network.input_size);
            match network.forward(&input) {
                Ok(output) => predictions.extend(network_prediction(&output, features)),
                Err(e) => warn!("Network prediction skipped: {}", e),
            }
        }

        if let Some(forest) = &self.forest {
            predictions.extend(forest_prediction(forest, features));
        }

        predictions
    }
}

fn network_prediction(output: &[f64], features: &FeatureMap) -> Option<FaultPrediction> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &c) in output.iter().enumerate() {
        if c > OUTPUT_THRESHOLD && best.map_or(true, |(_, b)| c > b) {
            best = Some((i, c));
        }
    }
    let (index, confidence) = best?;
    let fault_type = *OUTPUT_TYPES.get(index)?;
    debug!(?fault_type, confidence, "Network output above threshold");

    let mut prediction = FaultPrediction::new(
        "neural_network",
        ModelKind::MachineLearning,
        fault_type,
        "system",
        confidence,
        Duration::from_secs_f64((1.0 - confidence).max(0.0) * 600.0),
    )
    .with_metadata("output_vector", output.to_vec())
    .with_metadata("max_index", index);
    prediction.features = features.clone();
    Some(prediction)
}

fn forest_prediction(forest: &DecisionForest, features: &FeatureMap) -> Option<FaultPrediction> {
    let (verdict, votes) = forest.vote(features)?;
    let Verdict::Fault(fault_type) = verdict else {
        return None;
    };
    let total = forest.trees.len();

    let mut prediction = FaultPrediction::new(
        "random_forest",
        ModelKind::MachineLearning,
        fault_type,
        "system",
        votes as f64 / total as f64,
        Duration::from_secs(180),
    )
    .with_metadata("majority_votes", votes)
    .with_metadata("total_trees", total);
    prediction.features = features.clone();
    Some(prediction)
}
