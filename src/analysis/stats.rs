//! Numeric helpers shared by the analyzers. All functions are total: empty or
//! degenerate input yields 0 rather than NaN.

use serde::{Deserialize, Serialize};

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Ordinary least squares slope of `values` against their index 0..n-1.
pub fn ols_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x = n * (n - 1.0) / 2.0;
    let sum_x2 = n * (n - 1.0) * (2.0 * n - 1.0) / 6.0;
    let (sum_y, sum_xy) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sy, sxy), (i, &y)| (sy + y, sxy + i as f64 * y));

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Pearson correlation. 0 for unequal lengths, empty input or zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.is_empty() {
        return 0.0;
    }
    let mx = mean(x);
    let my = mean(y);

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }

    let denominator = (vx * vy).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    (cov / denominator).clamp(-1.0, 1.0)
}

/// Correlation of `x[..n-lag]` with `y[lag..]`; 0 when `lag >= n`.
pub fn lagged_correlation(x: &[f64], y: &[f64], lag: usize) -> f64 {
    let n = x.len().min(y.len());
    if lag >= n {
        return 0.0;
    }
    pearson(&x[..n - lag], &y[lag..n])
}

/// Standard deviation of successive percentage changes. A change from 0 counts as 0.
pub fn volatility(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = values
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();
    std_dev(&returns)
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Mean and spread of a series, used to score how unusual a value is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub sample_count: usize,
}

impl Baseline {
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            mean: mean(values),
            std_dev: std_dev(values),
            sample_count: values.len(),
        }
    }

    /// |value - mean| / std_dev, with a flat baseline treated as std_dev 1.
    pub fn z_score(&self, value: f64) -> f64 {
        let std = if self.std_dev == 0.0 { 1.0 } else { self.std_dev };
        (value - self.mean).abs() / std
    }
}
