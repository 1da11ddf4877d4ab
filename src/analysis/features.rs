//! Feature extraction for the ML predictor.

use crate::analysis::stats;
use crate::analysis::SeriesMap;
use std::collections::BTreeMap;

pub type FeatureMap = BTreeMap<String, f64>;

/// Input order of the network. Names missing from a feature map read as 0.
pub const FEATURE_ORDER: [&str; 10] = [
    "cpu_usage",
    "memory_usage",
    "response_time",
    "error_rate",
    "connectivity",
    "cpu_usage_mean",
    "memory_usage_mean",
    "response_time_mean",
    "error_rate_mean",
    "connectivity_mean",
];

/// Current values plus `_mean`, `_std`, `_trend` and `_volatility` of every
/// non-empty series.
pub fn extract_features(current: &BTreeMap<String, f64>, series: &SeriesMap) -> FeatureMap {
    let mut features: FeatureMap = current
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(k, v)| (k.clone(), *v))
        .collect();

    for (name, data) in series {
        if data.is_empty() {
            continue;
        }
        let values = data.values();
        features.insert(format!("{name}_mean"), stats::mean(values));
        features.insert(format!("{name}_std"), stats::std_dev(values));
        features.insert(format!("{name}_trend"), stats::ols_slope(values));
        features.insert(format!("{name}_volatility"), stats::volatility(values));
    }

    features
}

/// Project `features` onto [`FEATURE_ORDER`], padded or cut to `size`.
pub fn feature_vector(features: &FeatureMap, size: usize) -> Vec<f64> {
    let mut vector = vec![0.0; size];
    for (slot, name) in vector.iter_mut().zip(FEATURE_ORDER) {
        *slot = features.get(name).copied().unwrap_or(0.0);
    }
    vector
}
