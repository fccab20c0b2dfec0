use crate::gbdt::GradientBoostingRegressor;
use crate::linear::RidgeRegressor;
use crate::metrics::r_squared;
use crate::models::{Hyperparameters, ModelType};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// What a fit did: rounds actually run and where validation error bottomed out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitSummary {
    pub rounds: usize,
    pub best_iteration: Option<usize>,
    pub best_validation_rmse: Option<f64>,
}

/// The estimators a prediction job can ask for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regressor {
    Gbdt(GradientBoostingRegressor),
    Linear(RidgeRegressor),
}

impl Regressor {
    pub fn for_model_type(model_type: ModelType) -> Self {
        match model_type {
            ModelType::Gbdt => Regressor::Gbdt(GradientBoostingRegressor::default()),
            ModelType::Linear => Regressor::Linear(RidgeRegressor::default()),
        }
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Regressor::Gbdt(_) => ModelType::Gbdt,
            Regressor::Linear(_) => ModelType::Linear,
        }
    }

    /// Applies hyperparameters by name; unknown names are ignored.
    pub fn set_params(&mut self, params: &Hyperparameters) {
        match self {
            Regressor::Gbdt(model) => model.set_params(params),
            Regressor::Linear(model) => model.set_params(params),
        }
    }

    pub fn fit(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        validation: Option<(&[Vec<f64>], &[f64])>,
        early_stopping_rounds: usize,
    ) -> Result<FitSummary> {
        let patience = Some(early_stopping_rounds).filter(|rounds| *rounds > 0);
        match self {
            Regressor::Gbdt(model) => model.fit(x, y, validation, patience),
            Regressor::Linear(model) => model.fit(x, y, validation, patience),
        }
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        match self {
            Regressor::Gbdt(model) => model.predict(rows),
            Regressor::Linear(model) => model.predict(rows),
        }
    }

    /// Normalized split gain per feature; linear models report none.
    pub fn feature_importance(&self) -> Option<Vec<f64>> {
        match self {
            Regressor::Gbdt(model) => Some(model.feature_importance()),
            Regressor::Linear(_) => None,
        }
    }

    /// R² of the predictions for `rows` against `y`.
    pub fn score(&self, rows: &[Vec<f64>], y: &[f64]) -> Result<f64> {
        if rows.len() != y.len() {
            return Err(anyhow!(
                "Cannot score {} rows against {} targets",
                rows.len(),
                y.len()
            ));
        }
        if y.is_empty() {
            return Err(anyhow!("Cannot score a model on an empty dataset"));
        }
        let predictions = self.predict(rows);
        let score = r_squared(y, &predictions);
        if !score.is_finite() {
            return Err(anyhow!("Model score is not finite"));
        }
        Ok(score)
    }
}
