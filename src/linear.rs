use crate::metrics::rmse;
use crate::models::Hyperparameters;
use crate::param_utils::{get_param_f64_clamped, get_param_usize_rounded_clamped};
use crate::regressor::FitSummary;
use anyhow::{anyhow, Result};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeParams {
    pub learning_rate: f64,
    /// L2 penalty on the (standardized) weights.
    pub alpha: f64,
    pub max_epochs: usize,
}

impl Default for RidgeParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            alpha: 1.0,
            max_epochs: 1000,
        }
    }
}

impl RidgeParams {
    pub fn from_hyperparameters(params: &Hyperparameters) -> Self {
        let defaults = Self::default();
        Self {
            learning_rate: get_param_f64_clamped(
                params,
                &["learning_rate", "eta"],
                defaults.learning_rate,
                1e-6,
                1.0,
            ),
            alpha: get_param_f64_clamped(params, &["alpha"], defaults.alpha, 0.0, 1e9),
            max_epochs: get_param_usize_rounded_clamped(
                params,
                &["max_epochs", "num_boost_round", "n_estimators"],
                defaults.max_epochs,
                1,
                1_000_000,
            ),
        }
    }
}

struct BestEpoch {
    error: f64,
    epoch: usize,
    weights: Vec<f64>,
    intercept: f64,
}

/// Linear model on standardized inputs; missing inputs count as the column mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegressor {
    params: RidgeParams,
    means: Vec<f64>,
    scales: Vec<f64>,
    weights: Vec<f64>,
    intercept: f64,
}

impl Default for RidgeRegressor {
    fn default() -> Self {
        Self::new(RidgeParams::default())
    }
}

impl RidgeRegressor {
    pub fn new(params: RidgeParams) -> Self {
        Self {
            params,
            means: Vec::new(),
            scales: Vec::new(),
            weights: Vec::new(),
            intercept: 0.0,
        }
    }

    pub fn params(&self) -> &RidgeParams {
        &self.params
    }

    pub fn set_params(&mut self, params: &Hyperparameters) {
        self.params = RidgeParams::from_hyperparameters(params);
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn standardize(&self, row: &[f64]) -> Vec<f64> {
        self.means
            .iter()
            .zip(&self.scales)
            .enumerate()
            .map(|(idx, (mean, scale))| match row.get(idx) {
                Some(value) if value.is_finite() => (value - mean) / scale,
                _ => 0.0,
            })
            .collect()
    }

    fn predict_standardized(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .weights
                .iter()
                .zip(row)
                .map(|(weight, value)| weight * value)
                .sum::<f64>()
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.predict_standardized(&self.standardize(row))
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Full-batch gradient descent. With a validation set, training stops once
    /// validation error has not improved for `early_stopping_rounds` epochs and
    /// the best weights seen are restored.
    pub fn fit(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        validation: Option<(&[Vec<f64>], &[f64])>,
        early_stopping_rounds: Option<usize>,
    ) -> Result<FitSummary> {
        if x.is_empty() || x.len() != y.len() {
            return Err(anyhow!(
                "Ridge fit needs matching, non-empty rows and targets ({} rows, {} targets)",
                x.len(),
                y.len()
            ));
        }
        if y.iter().any(|value| !value.is_finite()) {
            return Err(anyhow!("Ridge fit targets must be finite"));
        }
        let feature_count = x[0].len();
        if x.iter().any(|row| row.len() != feature_count) {
            return Err(anyhow!("Ridge fit rows must all have {} features", feature_count));
        }

        self.fit_scaler(x, feature_count);
        let train: Vec<Vec<f64>> = x.iter().map(|row| self.standardize(row)).collect();
        let validation: Option<(Vec<Vec<f64>>, &[f64])> = validation
            .filter(|(vx, _)| !vx.is_empty())
            .map(|(vx, vy)| (vx.iter().map(|row| self.standardize(row)).collect(), vy));

        self.weights = vec![0.0; feature_count];
        self.intercept = y.iter().sum::<f64>() / y.len() as f64;

        let n = y.len() as f64;
        let mut best: Option<BestEpoch> = None;
        let mut epochs = 0usize;

        for epoch in 0..self.params.max_epochs {
            epochs = epoch + 1;
            let mut weight_gradient = vec![0.0; feature_count];
            let mut intercept_gradient = 0.0;
            for (row, target) in train.iter().zip(y) {
                let residual = self.predict_standardized(row) - target;
                intercept_gradient += residual;
                for (gradient, value) in weight_gradient.iter_mut().zip(row) {
                    *gradient += residual * value;
                }
            }
            let (learning_rate, alpha) = (self.params.learning_rate, self.params.alpha);
            for (weight, gradient) in self.weights.iter_mut().zip(&weight_gradient) {
                *weight -= learning_rate * (gradient + alpha * *weight) / n;
            }
            self.intercept -= learning_rate * intercept_gradient / n;

            let Some((vx, vy)) = validation.as_ref() else {
                continue;
            };
            let predictions: Vec<f64> = vx
                .iter()
                .map(|row| self.predict_standardized(row))
                .collect();
            let error = rmse(vy, &predictions);
            let improved = best
                .as_ref()
                .map_or(true, |current| error + 1e-12 < current.error);
            if improved {
                best = Some(BestEpoch {
                    error,
                    epoch,
                    weights: self.weights.clone(),
                    intercept: self.intercept,
                });
            } else if let (Some(patience), Some(current)) = (early_stopping_rounds, best.as_ref()) {
                if epoch - current.epoch >= patience {
                    debug!("Ridge early stopping at epoch {}", epoch);
                    break;
                }
            }
        }

        let Some(best) = best else {
            return Ok(FitSummary {
                rounds: epochs,
                best_iteration: None,
                best_validation_rmse: None,
            });
        };
        self.weights = best.weights;
        self.intercept = best.intercept;
        Ok(FitSummary {
            rounds: epochs,
            best_iteration: Some(best.epoch),
            best_validation_rmse: Some(best.error),
        })
    }

    fn fit_scaler(&mut self, x: &[Vec<f64>], feature_count: usize) {
        self.means = Vec::with_capacity(feature_count);
        self.scales = Vec::with_capacity(feature_count);
        for feature in 0..feature_count {
            let values: Vec<f64> = x
                .iter()
                .map(|row| row[feature])
                .filter(|value| value.is_finite())
                .collect();
            if values.is_empty() {
                self.means.push(0.0);
                self.scales.push(1.0);
                continue;
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let variance =
                values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;
            let scale = variance.sqrt();
            self.means.push(mean);
            self.scales.push(if scale > 1e-12 { scale } else { 1.0 });
        }
    }
}
