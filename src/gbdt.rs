//! Histogram-based gradient boosted regression trees.
//!
//! Features are quantile-binned once per fit, trees grow depth-wise on squared
//! error gradients, and missing values follow a learned default direction.

use crate::models::Hyperparameters;
use crate::param_utils::{get_param_f64_clamped, get_param_seed, get_param_usize_rounded_clamped};
use crate::regressor::FitSummary;
use anyhow::{anyhow, Result};
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const MISSING_BIN: u16 = u16::MAX;
const MIN_SPLIT_GAIN: f64 = 1e-12;
const MIN_IMPROVEMENT: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtParams {
    pub num_boost_round: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub min_data_in_leaf: usize,
    /// Minimum loss reduction required to split.
    pub gamma: f64,
    /// L2 penalty on leaf weights.
    pub reg_lambda: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub max_bin: usize,
    pub seed: u64,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            num_boost_round: 500,
            learning_rate: 0.1,
            max_depth: 6,
            min_child_weight: 1.0,
            min_data_in_leaf: 20,
            gamma: 0.0,
            reg_lambda: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            max_bin: 64,
            seed: 42,
        }
    }
}

impl GbdtParams {
    pub fn from_hyperparameters(params: &Hyperparameters) -> Self {
        let defaults = Self::default();
        Self {
            num_boost_round: get_param_usize_rounded_clamped(
                params,
                &["num_boost_round", "n_estimators"],
                defaults.num_boost_round,
                1,
                100_000,
            ),
            learning_rate: get_param_f64_clamped(
                params,
                &["learning_rate", "eta"],
                defaults.learning_rate,
                1e-4,
                1.0,
            ),
            max_depth: get_param_usize_rounded_clamped(
                params,
                &["max_depth"],
                defaults.max_depth,
                1,
                16,
            ),
            min_child_weight: get_param_f64_clamped(
                params,
                &["min_child_weight"],
                defaults.min_child_weight,
                0.0,
                1e9,
            ),
            min_data_in_leaf: get_param_usize_rounded_clamped(
                params,
                &["min_data_in_leaf"],
                defaults.min_data_in_leaf,
                1,
                1_000_000,
            ),
            gamma: get_param_f64_clamped(params, &["gamma"], defaults.gamma, 0.0, 1e9),
            reg_lambda: get_param_f64_clamped(
                params,
                &["reg_lambda", "lambda"],
                defaults.reg_lambda,
                0.0,
                1e9,
            ),
            subsample: get_param_f64_clamped(
                params,
                &["subsample"],
                defaults.subsample,
                0.05,
                1.0,
            ),
            colsample_bytree: get_param_f64_clamped(
                params,
                &["colsample_bytree"],
                defaults.colsample_bytree,
                0.05,
                1.0,
            ),
            max_bin: get_param_usize_rounded_clamped(
                params,
                &["max_bin"],
                defaults.max_bin,
                2,
                1024,
            ),
            seed: get_param_seed(params, &["seed", "random_state"], defaults.seed),
        }
    }
}

/// Regression tree stored as parallel node arrays.
///
/// A negative child reference `c` points at leaf `-c - 1`. A tree without
/// internal nodes is a single leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    default_left: Vec<bool>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
    shrinkage: f64,
}

impl RegressionTree {
    fn empty(shrinkage: f64) -> Self {
        Self {
            split_features: Vec::new(),
            thresholds: Vec::new(),
            default_left: Vec::new(),
            left_child: Vec::new(),
            right_child: Vec::new(),
            leaf_values: Vec::new(),
            shrinkage,
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.leaf_values.len()
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values.first().copied().unwrap_or_default() * self.shrinkage;
        }

        let mut node_idx = 0usize;
        loop {
            let feature_idx = self.split_features[node_idx];
            let value = features.get(feature_idx).copied().unwrap_or(f64::NAN);
            let go_left = if value.is_nan() {
                self.default_left[node_idx]
            } else {
                value <= self.thresholds[node_idx]
            };
            let child = if go_left {
                self.left_child[node_idx]
            } else {
                self.right_child[node_idx]
            };

            if child < 0 {
                let leaf_idx = (-child - 1) as usize;
                return self.leaf_values.get(leaf_idx).copied().unwrap_or_default()
                    * self.shrinkage;
            }
            node_idx = child as usize;
        }
    }
}

/// Per-feature cut points; bin `b` holds values `<= cuts[b]`, the last bin the rest.
struct BinnedMatrix {
    cuts: Vec<Vec<f64>>,
    bins: Vec<Vec<u16>>,
}

impl BinnedMatrix {
    fn build(rows: &[Vec<f64>], feature_count: usize, max_bin: usize) -> Self {
        let mut cuts = Vec::with_capacity(feature_count);
        let mut bins = Vec::with_capacity(feature_count);
        for feature in 0..feature_count {
            let column: Vec<f64> = rows.iter().map(|row| row[feature]).collect();
            let feature_cuts = quantile_cuts(&column, max_bin);
            let feature_bins = column
                .iter()
                .map(|value| {
                    if value.is_nan() {
                        MISSING_BIN
                    } else {
                        feature_cuts.partition_point(|cut| cut < value) as u16
                    }
                })
                .collect();
            cuts.push(feature_cuts);
            bins.push(feature_bins);
        }
        Self { cuts, bins }
    }

    fn bin_count(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }
}

fn quantile_cuts(column: &[f64], max_bin: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut distinct = sorted.clone();
    distinct.dedup();

    let max_value = distinct[distinct.len() - 1];
    let mut cuts: Vec<f64> = if distinct.len() <= max_bin {
        distinct
    } else {
        (1..max_bin)
            .map(|k| sorted[(k * sorted.len() / max_bin).saturating_sub(1)])
            .collect()
    };
    cuts.dedup();
    cuts.retain(|cut| *cut < max_value);
    cuts
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    default_left: bool,
    gain: f64,
}

struct TreeGrower<'a> {
    binned: &'a BinnedMatrix,
    gradients: &'a [f64],
    hessians: &'a [f64],
    features: &'a [usize],
    params: &'a GbdtParams,
    tree: RegressionTree,
    importance: &'a mut [f64],
}

impl<'a> TreeGrower<'a> {
    fn leaf_weight(&self, gradient: f64, hessian: f64) -> f64 {
        -gradient / (hessian + self.params.reg_lambda)
    }

    fn score(&self, gradient: f64, hessian: f64) -> f64 {
        gradient * gradient / (hessian + self.params.reg_lambda)
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> i32 {
        let gradient: f64 = rows.iter().map(|row| self.gradients[*row]).sum();
        let hessian: f64 = rows.iter().map(|row| self.hessians[*row]).sum();

        if depth < self.params.max_depth && rows.len() >= 2 * self.params.min_data_in_leaf {
            if let Some(split) = self.best_split(&rows, gradient, hessian) {
                let node = self.tree.split_features.len();
                self.tree.split_features.push(split.feature);
                self.tree.thresholds.push(self.binned.cuts[split.feature][split.bin]);
                self.tree.default_left.push(split.default_left);
                self.tree.left_child.push(0);
                self.tree.right_child.push(0);
                self.importance[split.feature] += split.gain;

                let feature_bins = &self.binned.bins[split.feature];
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                    rows.into_iter().partition(|row| {
                        let bin = feature_bins[*row];
                        if bin == MISSING_BIN {
                            split.default_left
                        } else {
                            usize::from(bin) <= split.bin
                        }
                    });

                let left = self.grow(left_rows, depth + 1);
                let right = self.grow(right_rows, depth + 1);
                self.tree.left_child[node] = left;
                self.tree.right_child[node] = right;
                return node as i32;
            }
        }

        let leaf = self.tree.leaf_values.len();
        self.tree.leaf_values.push(self.leaf_weight(gradient, hessian));
        -(leaf as i32) - 1
    }

    fn best_split(&self, rows: &[usize], gradient: f64, hessian: f64) -> Option<SplitCandidate> {
        let parent_score = self.score(gradient, hessian);
        let min_leaf = self.params.min_data_in_leaf;
        let mut best: Option<SplitCandidate> = None;

        for &feature in self.features {
            let bin_count = self.binned.bin_count(feature);
            if bin_count < 2 {
                continue;
            }
            let mut hist_gradient = vec![0.0; bin_count];
            let mut hist_hessian = vec![0.0; bin_count];
            let mut hist_count = vec![0usize; bin_count];
            let (mut missing_gradient, mut missing_hessian, mut missing_count) = (0.0, 0.0, 0usize);

            let feature_bins = &self.binned.bins[feature];
            for &row in rows {
                let bin = feature_bins[row];
                if bin == MISSING_BIN {
                    missing_gradient += self.gradients[row];
                    missing_hessian += self.hessians[row];
                    missing_count += 1;
                } else {
                    let bin = usize::from(bin);
                    hist_gradient[bin] += self.gradients[row];
                    hist_hessian[bin] += self.hessians[row];
                    hist_count[bin] += 1;
                }
            }

            let (mut left_gradient, mut left_hessian, mut left_count) = (0.0, 0.0, 0usize);
            for bin in 0..bin_count - 1 {
                left_gradient += hist_gradient[bin];
                left_hessian += hist_hessian[bin];
                left_count += hist_count[bin];

                for default_left in [false, true] {
                    let (lg, lh, lc) = if default_left {
                        (
                            left_gradient + missing_gradient,
                            left_hessian + missing_hessian,
                            left_count + missing_count,
                        )
                    } else {
                        (left_gradient, left_hessian, left_count)
                    };
                    let rc = rows.len() - lc;
                    let (rg, rh) = (gradient - lg, hessian - lh);
                    if lc < min_leaf || rc < min_leaf {
                        continue;
                    }
                    if lh < self.params.min_child_weight || rh < self.params.min_child_weight {
                        continue;
                    }

                    let gain =
                        0.5 * (self.score(lg, lh) + self.score(rg, rh) - parent_score)
                            - self.params.gamma;
                    if gain <= MIN_SPLIT_GAIN {
                        continue;
                    }
                    if best.map_or(true, |current| gain > current.gain) {
                        best = Some(SplitCandidate {
                            feature,
                            bin,
                            default_left,
                            gain,
                        });
                    }
                }
            }
        }

        best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    params: GbdtParams,
    base_score: f64,
    trees: Vec<RegressionTree>,
    feature_count: usize,
    best_iteration: Option<usize>,
    feature_importance: Vec<f64>,
}

impl Default for GradientBoostingRegressor {
    fn default() -> Self {
        Self::new(GbdtParams::default())
    }
}

impl GradientBoostingRegressor {
    pub fn new(params: GbdtParams) -> Self {
        Self {
            params,
            base_score: 0.0,
            trees: Vec::new(),
            feature_count: 0,
            best_iteration: None,
            feature_importance: Vec::new(),
        }
    }

    pub fn params(&self) -> &GbdtParams {
        &self.params
    }

    pub fn set_params(&mut self, params: &Hyperparameters) {
        self.params = GbdtParams::from_hyperparameters(params);
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    /// Total split gain per feature, normalized to sum to one.
    pub fn feature_importance(&self) -> Vec<f64> {
        let total: f64 = self.feature_importance.iter().sum();
        if total <= 0.0 {
            return vec![0.0; self.feature_importance.len()];
        }
        self.feature_importance.iter().map(|gain| gain / total).collect()
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>()
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Fits from scratch. With a validation set and `early_stopping_rounds`,
    /// boosting stops once validation RMSE has not improved for that many
    /// rounds and the ensemble is cut back to its best round.
    pub fn fit(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        validation: Option<(&[Vec<f64>], &[f64])>,
        early_stopping_rounds: Option<usize>,
    ) -> Result<FitSummary> {
        let feature_count = check_training_data(x, y)?;
        let validation = validation.filter(|(vx, _)| !vx.is_empty());
        if let Some((vx, vy)) = validation {
            check_validation_data(vx, vy, feature_count)?;
        }

        let params = self.params.clone();
        let binned = BinnedMatrix::build(x, feature_count, params.max_bin);
        let mut rng = StdRng::seed_from_u64(params.seed);

        self.base_score = y.iter().sum::<f64>() / y.len() as f64;
        self.trees.clear();
        self.feature_count = feature_count;
        self.best_iteration = None;
        self.feature_importance = vec![0.0; feature_count];

        let mut predictions = vec![self.base_score; y.len()];
        let mut validation_predictions =
            validation.map(|(vx, _)| vec![self.base_score; vx.len()]);
        let hessians = vec![1.0; y.len()];
        let mut best_rmse = f64::INFINITY;
        let mut best_round = 0usize;
        let mut best_importance = self.feature_importance.clone();

        for round in 0..params.num_boost_round {
            let gradients: Vec<f64> = predictions
                .iter()
                .zip(y)
                .map(|(prediction, target)| prediction - target)
                .collect();
            let rows = sample_rows(y.len(), params.subsample, &mut rng);
            let features = sample_features(feature_count, params.colsample_bytree, &mut rng);

            let mut grower = TreeGrower {
                binned: &binned,
                gradients: &gradients,
                hessians: &hessians,
                features: &features,
                params: &params,
                tree: RegressionTree::empty(params.learning_rate),
                importance: &mut self.feature_importance,
            };
            grower.grow(rows, 0);
            let tree = grower.tree;

            for (prediction, row) in predictions.iter_mut().zip(x) {
                *prediction += tree.predict(row);
            }
            self.trees.push(tree);

            let (Some((vx, vy)), Some(valid_pred)) = (validation, validation_predictions.as_mut())
            else {
                continue;
            };
            let tree = &self.trees[self.trees.len() - 1];
            for (prediction, row) in valid_pred.iter_mut().zip(vx) {
                *prediction += tree.predict(row);
            }
            let rmse = crate::metrics::rmse(vy, valid_pred);
            if rmse + MIN_IMPROVEMENT < best_rmse {
                best_rmse = rmse;
                best_round = round;
                best_importance = self.feature_importance.clone();
            } else if let Some(patience) = early_stopping_rounds {
                if round - best_round >= patience {
                    debug!(
                        "Early stopping at round {} (best round {}, validation RMSE {:.4})",
                        round, best_round, best_rmse
                    );
                    break;
                }
            }
        }

        let rounds = self.trees.len();
        if validation.is_some() && best_rmse.is_finite() {
            self.trees.truncate(best_round + 1);
            self.feature_importance = best_importance;
            self.best_iteration = Some(best_round);
        }

        Ok(FitSummary {
            rounds,
            best_iteration: self.best_iteration,
            best_validation_rmse: best_rmse.is_finite().then_some(best_rmse),
        })
    }
}

fn check_training_data(x: &[Vec<f64>], y: &[f64]) -> Result<usize> {
    if x.is_empty() {
        return Err(anyhow!("Cannot fit on an empty training set"));
    }
    if x.len() != y.len() {
        return Err(anyhow!(
            "Training set has {} feature rows but {} targets",
            x.len(),
            y.len()
        ));
    }
    let feature_count = x[0].len();
    if let Some(row) = x.iter().position(|row| row.len() != feature_count) {
        return Err(anyhow!(
            "Training row {} has {} features, expected {}",
            row,
            x[row].len(),
            feature_count
        ));
    }
    if let Some(row) = y.iter().position(|value| !value.is_finite()) {
        return Err(anyhow!("Training target at row {} is not finite", row));
    }
    Ok(feature_count)
}

fn check_validation_data(x: &[Vec<f64>], y: &[f64], feature_count: usize) -> Result<()> {
    if x.len() != y.len() {
        return Err(anyhow!(
            "Validation set has {} feature rows but {} targets",
            x.len(),
            y.len()
        ));
    }
    if x.iter().any(|row| row.len() != feature_count) {
        return Err(anyhow!(
            "Validation rows must have {} features like the training rows",
            feature_count
        ));
    }
    if y.iter().any(|value| !value.is_finite()) {
        return Err(anyhow!("Validation targets must be finite"));
    }
    Ok(())
}

fn sample_rows(count: usize, ratio: f64, rng: &mut StdRng) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..count).collect();
    }
    let rows: Vec<usize> = (0..count).filter(|_| rng.gen::<f64>() < ratio).collect();
    if rows.is_empty() {
        (0..count).collect()
    } else {
        rows
    }
}

fn sample_features(count: usize, ratio: f64, rng: &mut StdRng) -> Vec<usize> {
    let mut features: Vec<usize> = (0..count).collect();
    if ratio >= 1.0 || count == 0 {
        return features;
    }
    let sample_size = ((count as f64) * ratio).ceil().max(1.0) as usize;
    features.shuffle(rng);
    features.truncate(sample_size);
    features.sort_unstable();
    features
}
