use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

const DEGENERATE_TOLERANCE: f64 = 1e-12;

/// Coefficient of determination.
///
/// A constant target scores 1.0 when it is reproduced exactly and 0.0 otherwise.
pub fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().mean();
    let ss_tot: f64 = actual.iter().map(|value| (value - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(value, prediction)| (value - prediction).powi(2))
        .sum();

    let scale = ss_tot.max(1.0) * DEGENERATE_TOLERANCE;
    if ss_tot <= scale {
        return if ss_res <= scale { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(value, prediction)| (value - prediction).powi(2))
        .sum();
    (sum / actual.len() as f64).sqrt()
}

pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(value, prediction)| (value - prediction).abs())
        .sum();
    sum / actual.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
    pub rows: usize,
    pub r2: f64,
    pub rmse: f64,
    pub mae: f64,
}

impl EvaluationMetrics {
    pub fn evaluate(actual: &[f64], predicted: &[f64]) -> Self {
        Self {
            rows: actual.len(),
            r2: r_squared(actual, predicted),
            rmse: rmse(actual, predicted),
            mae: mae(actual, predicted),
        }
    }
}
