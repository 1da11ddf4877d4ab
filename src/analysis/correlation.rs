use crate::analysis::stats;
use crate::analysis::{FaultPrediction, ModelKind, SeriesMap, TimeSeriesData};
use crate::config::CorrelationConfig;
use crate::fault::FaultType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Pairwise Pearson correlations, `matrix[a][b]`. The diagonal is never stored.
pub type CorrelationMatrix = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, Serialize)]
pub struct CausalityNode {
    pub name: String,
    pub node_type: String,
    pub importance: f64,
    pub last_seen: DateTime<Utc>,
}

/// `from` leads `to` by `lag` samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalityEdge {
    pub from: String,
    pub to: String,
    pub strength: f64,
    pub lag: usize,
    pub confidence: f64,
}

/// Directed graph of lagged relationships between metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CausalityGraph {
    pub nodes: BTreeMap<String, CausalityNode>,
    pub edges: BTreeMap<String, Vec<CausalityEdge>>,
}

impl CausalityGraph {
    fn touch(&mut self, name: &str, now: DateTime<Utc>) {
        self.nodes
            .entry(name.to_string())
            .and_modify(|n| n.last_seen = now)
            .or_insert_with(|| CausalityNode {
                name: name.to_string(),
                node_type: "metric".to_string(),
                importance: 0.5,
                last_seen: now,
            });
    }

    /// Insert or replace the edge `from -> to`.
    pub fn upsert_edge(&mut self, from: &str, to: &str, strength: f64, lag: usize) {
        let now = Utc::now();
        self.touch(from, now);
        self.touch(to, now);

        let edge = CausalityEdge {
            from: from.to_string(),
            to: to.to_string(),
            strength,
            lag,
            confidence: strength.abs(),
        };
        let edges = self.edges.entry(from.to_string()).or_default();
        match edges.iter_mut().find(|e| e.to == to) {
            Some(existing) => *existing = edge,
            None => edges.push(edge),
        }
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&CausalityEdge> {
        self.edges.get(from)?.iter().find(|e| e.to == to)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}

#[derive(Default)]
struct CorrelationState {
    matrix: CorrelationMatrix,
    graph: CausalityGraph,
}

/// Watches pairs of metrics that normally move together and flags pairs
/// whose recent behaviour has drifted apart.
pub struct CorrelationEngine {
    config: CorrelationConfig,
    state: Mutex<CorrelationState>,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CorrelationState::default()),
        }
    }

    /// Common tail of two series, bounded by the correlation window.
    fn aligned<'a>(&self, a: &'a TimeSeriesData, b: &'a TimeSeriesData) -> (&'a [f64], &'a [f64]) {
        let n = a.len().min(b.len()).min(self.config.correlation_window);
        (a.tail(n), b.tail(n))
    }

    pub fn analyze_correlations(&self, series: &SeriesMap) -> Vec<FaultPrediction> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        self.update_matrix(&mut state.matrix, series);
        if self.config.causality_analysis {
            self.update_causality(&mut state.graph, series);
        }

        let predictions = self.drift_predictions(&state.matrix, series);
        if !predictions.is_empty() {
            info!(count = predictions.len(), "Correlation drift detected");
        }
        predictions
    }

    fn update_matrix(&self, matrix: &mut CorrelationMatrix, series: &SeriesMap) {
        for (a, data_a) in series {
            for (b, data_b) in series {
                if a == b {
                    continue;
                }
                let (x, y) = self.aligned(data_a, data_b);
                matrix
                    .entry(a.clone())
                    .or_default()
                    .insert(b.clone(), stats::pearson(x, y));
            }
        }
    }

    fn update_causality(&self, graph: &mut CausalityGraph, series: &SeriesMap) {
        for (a, data_a) in series {
            for (b, data_b) in series {
                if a == b {
                    continue;
                }
                let (x, y) = self.aligned(data_a, data_b);

                let mut best = 0.0_f64;
                let mut best_lag = 0;
                for lag in 0..self.config.cross_correlation_lags {
                    let c = stats::lagged_correlation(x, y, lag);
                    if c.abs() > best.abs() {
                        best = c;
                        best_lag = lag;
                    }
                }

                if best.abs() > self.config.edge_threshold {
                    debug!(from = %a, to = %b, strength = best, lag = best_lag, "Causality edge");
                    graph.upsert_edge(a, b, best, best_lag);
                }
            }
        }
    }

    fn drift_predictions(&self, matrix: &CorrelationMatrix, series: &SeriesMap) -> Vec<FaultPrediction> {
        let recent = self.config.recent_window;
        let mut predictions = Vec::new();

        for (a, row) in matrix {
            for (b, &expected) in row {
                if expected.abs() <= self.config.stable_threshold {
                    continue;
                }
                let (Some(data_a), Some(data_b)) = (series.get(a), series.get(b)) else {
                    continue;
                };
                if data_a.len() < recent || data_b.len() < recent {
                    continue;
                }

                let observed = stats::pearson(data_a.tail(recent), data_b.tail(recent));
                if (observed - expected).abs() <= self.config.drift_threshold {
                    continue;
                }

                predictions.push(
                    FaultPrediction::new(
                        "correlation_analysis",
                        ModelKind::Correlation,
                        FaultType::PerformanceAnomaly,
                        format!("{a}-{b}"),
                        expected.abs() * 0.8,
                        Duration::from_secs(self.config.horizon_secs),
                    )
                    .with_feature("correlation", expected)
                    .with_feature("recent_correlation", observed)
                    .with_metadata("metric1", a.as_str())
                    .with_metadata("metric2", b.as_str())
                    .with_metadata("correlation", expected),
                );
            }
        }
        predictions
    }

    pub fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.matrix.get(a)?.get(b).copied()
    }

    pub fn matrix(&self) -> CorrelationMatrix {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.matrix.clone()
    }

    pub fn causality_graph(&self) -> CausalityGraph {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.graph.clone()
    }
}
