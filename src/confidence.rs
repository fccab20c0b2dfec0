use crate::models::{FeatureFrame, ModelArtifact, HORIZON_COLUMN};
use anyhow::{anyhow, Context, Result};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;

pub const DEFAULT_QUANTILES: [f64; 7] = [0.05, 0.1, 0.3, 0.5, 0.7, 0.9, 0.95];

/// Residual spread of one (horizon, hour-of-day) bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidualSpread {
    pub horizon: f64,
    pub hour: u32,
    pub stdev: f64,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceTable {
    pub quantiles: Vec<f64>,
    /// Standard normal multiplier per entry of `quantiles`.
    pub z_scores: Vec<f64>,
    pub spreads: Vec<ResidualSpread>,
}

impl ConfidenceTable {
    pub fn stdev_for(&self, horizon: f64, hour: u32) -> Option<f64> {
        self.spreads
            .iter()
            .find(|spread| spread.hour == hour && (spread.horizon - horizon).abs() < 1e-9)
            .map(|spread| spread.stdev)
    }

    /// Prediction shifted to `quantile`, or `None` when the quantile or bucket is unknown.
    pub fn quantile_value(
        &self,
        prediction: f64,
        horizon: f64,
        hour: u32,
        quantile: f64,
    ) -> Option<f64> {
        let position = self
            .quantiles
            .iter()
            .position(|q| (q - quantile).abs() < 1e-9)?;
        let stdev = self.stdev_for(horizon, hour)?;
        Some(prediction + self.z_scores[position] * stdev)
    }
}

/// Attaches uncertainty estimates to a fitted model.
pub trait ConfidenceIntervalGenerator: Send + Sync {
    fn generate(&self, artifact: &ModelArtifact, validation: &FeatureFrame)
        -> Result<ConfidenceTable>;
}

#[derive(Debug, Clone)]
pub struct ResidualConfidenceGenerator {
    pub quantiles: Vec<f64>,
}

impl Default for ResidualConfidenceGenerator {
    fn default() -> Self {
        Self {
            quantiles: DEFAULT_QUANTILES.to_vec(),
        }
    }
}

impl ConfidenceIntervalGenerator for ResidualConfidenceGenerator {
    fn generate(
        &self,
        artifact: &ModelArtifact,
        validation: &FeatureFrame,
    ) -> Result<ConfidenceTable> {
        let normal = Normal::new(0.0, 1.0).context("Failed to build the standard normal")?;
        let mut z_scores = Vec::with_capacity(self.quantiles.len());
        for quantile in &self.quantiles {
            if !(*quantile > 0.0 && *quantile < 1.0) {
                return Err(anyhow!("Quantile {} must be in (0, 1)", quantile));
            }
            z_scores.push(normal.inverse_cdf(*quantile));
        }

        let predictions = artifact.predict(validation);
        let horizons = validation.column(HORIZON_COLUMN);
        let mut buckets: BTreeMap<(u64, u32), Vec<f64>> = BTreeMap::new();
        for (row, (actual, predicted)) in validation.target().iter().zip(&predictions).enumerate() {
            let residual = actual - predicted;
            if !residual.is_finite() {
                continue;
            }
            let horizon = horizons.map_or(0.0, |values| values[row]);
            let hour = validation.timestamps()[row].hour();
            buckets
                .entry((horizon.to_bits(), hour))
                .or_default()
                .push(residual);
        }

        let spreads = buckets
            .into_iter()
            .map(|((horizon_bits, hour), residuals)| ResidualSpread {
                horizon: f64::from_bits(horizon_bits),
                hour,
                stdev: sample_stdev(&residuals),
                rows: residuals.len(),
            })
            .collect();

        Ok(ConfidenceTable {
            quantiles: self.quantiles.clone(),
            z_scores,
            spreads,
        })
    }
}

fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}
