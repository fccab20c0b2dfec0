use crate::config::TrainingConfig;
use crate::confidence::{ConfidenceIntervalGenerator, ResidualConfidenceGenerator};
use crate::errors::TrainingError;
use crate::feature_applicator::TrainFeatureApplicator;
use crate::model_selection::{split_data_train_validation_test, DataSplit, PartitionSizes};
use crate::models::{GatingDecision, Hyperparameters, ModelArtifact, PredictionJob};
use crate::regressor::{FitSummary, Regressor};
use crate::reporter::{HtmlReporter, Reporter};
use crate::storage::ForecastStore;
use crate::validation::{DataValidator, DefaultValidator};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

/// The new model replaces the old one unless the old score beats the new
/// score scaled by `penalty_factor`.
pub fn is_new_model_better(new_score: f64, old_score: f64, penalty_factor: f64) -> bool {
    !(old_score > new_score * penalty_factor)
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_id: Uuid,
    pub score: f64,
    pub sizes: PartitionSizes,
    pub fit: FitSummary,
    pub feature_count: usize,
    pub gating: GatingDecision,
    /// Where the evaluation report landed, if rendering succeeded.
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    /// The previous model is older than the configured maximum; nothing was trained.
    SkippedModelAge { age_days: f64 },
    Persisted(TrainingReport),
    /// The candidate lost the comparison; the stored model is unchanged.
    RetainedPrevious { new_score: f64, old_score: f64 },
}

/// Runs one training cycle for one prediction job.
///
/// A pipeline holds no per-job state, so one instance can train many jobs,
/// including from several threads at once.
pub struct TrainingPipeline<'a> {
    store: &'a dyn ForecastStore,
    config: TrainingConfig,
    validator: Box<dyn DataValidator + 'a>,
    reporter: Box<dyn Reporter + 'a>,
    confidence: Box<dyn ConfidenceIntervalGenerator + 'a>,
}

impl<'a> TrainingPipeline<'a> {
    pub fn new(store: &'a dyn ForecastStore, config: TrainingConfig) -> Result<Self, TrainingError> {
        config
            .validate()
            .map_err(|err| TrainingError::InvalidConfig(format!("{:#}", err)))?;
        Ok(Self {
            store,
            config,
            validator: Box::new(DefaultValidator::default()),
            reporter: Box::new(HtmlReporter),
            confidence: Box::new(ResidualConfidenceGenerator::default()),
        })
    }

    pub fn with_validator<V: DataValidator + 'a>(mut self, validator: V) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn with_reporter<R: Reporter + 'a>(mut self, reporter: R) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn with_confidence<C: ConfidenceIntervalGenerator + 'a>(mut self, confidence: C) -> Self {
        self.confidence = Box::new(confidence);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn run(&self, job: &PredictionJob) -> Result<TrainingOutcome, TrainingError> {
        self.run_at(job, Utc::now())
    }

    /// Same as [`run`](Self::run) with an explicit clock, so age checks and
    /// the lookback window are reproducible.
    pub fn run_at(
        &self,
        job: &PredictionJob,
        now: DateTime<Utc>,
    ) -> Result<TrainingOutcome, TrainingError> {
        let started = Instant::now();
        let job_id = job.id;
        info!("job {} ({}): start training model", job_id, job.name);

        // With both checks off the stored model is never read, so an unreadable
        // artifact gets replaced instead of blocking the job.
        let previous = if self.config.check_old_model_age || self.config.compare_to_old {
            self.store
                .load_previous_artifact(job)
                .map_err(|source| TrainingError::Fetch {
                    job_id,
                    stage: "previous model",
                    source,
                })?
        } else {
            None
        };

        if let Some(previous) = previous.as_ref() {
            let age_days = previous.age_days(now);
            if self.config.check_old_model_age && age_days > self.config.max_model_age_days {
                info!(
                    "job {} ({}): previous model is {:.1} days old (max {}), skipping training",
                    job_id, job.name, age_days, self.config.max_model_age_days
                );
                return Ok(TrainingOutcome::SkippedModelAge { age_days });
            }
        }

        let hyperparameters =
            self.store
                .get_hyperparameters(job)
                .map_err(|source| TrainingError::Fetch {
                    job_id,
                    stage: "hyperparameters",
                    source,
                })?;

        let start = now - Duration::days(self.config.lookback_days);
        let input = self
            .store
            .get_input_window(job, start, now)
            .map_err(|source| TrainingError::Fetch {
                job_id,
                stage: "input data",
                source,
            })?;
        debug!(
            "job {} ({}): fetched {} input rows between {} and {}",
            job_id,
            job.name,
            input.len(),
            start,
            now
        );

        let validated = self.validator.validate(input);
        let completeness = validated.target_completeness();
        let cleaned = self.validator.clean(validated);
        if let Some(cause) = self.validator.insufficiency(&cleaned, completeness) {
            return Err(TrainingError::InsufficientData {
                job_id,
                job_name: job.name.clone(),
                rows: cleaned.len(),
                cause,
            });
        }

        let features = self.resolve_feature_list(job)?;
        let applicator = TrainFeatureApplicator::new(self.config.horizons.clone())
            .with_features(features)
            .with_non_trivial_lags(
                self.config
                    .detect_non_trivial_lags
                    .then_some(self.config.autocorrelation_threshold),
            );
        let frame = applicator
            .add_features(&cleaned)
            .map_err(|source| TrainingError::Features { job_id, source })?
            .sort_columns();

        let split = split_data_train_validation_test(&frame, &self.config.split_config())
            .context("partitioning the feature frame")
            .map_err(|source| TrainingError::Features { job_id, source })?;
        let sizes = split.sizes();
        info!(
            "job {} ({}): {} feature columns, train={} validation={} test={}",
            job_id,
            job.name,
            frame.feature_names().len(),
            sizes.train,
            sizes.validation,
            sizes.test
        );

        let (artifact, fit) = self
            .fit(job, &split, hyperparameters, now)
            .map_err(|source| TrainingError::Fit { job_id, source })?;
        info!(
            "job {} ({}): fitted {} model in {} rounds (best iteration {:?}), score {:.4}",
            job_id,
            job.name,
            artifact.model_type.as_str(),
            fit.rounds,
            fit.best_iteration,
            artifact.score
        );

        let gating = match previous.as_ref() {
            Some(previous) if self.config.compare_to_old => self
                .compare(&split, &artifact, previous)
                .map_err(|source| TrainingError::Gate { job_id, source })?,
            _ => GatingDecision {
                new_score: Some(artifact.score),
                ..GatingDecision::unconditional()
            },
        };

        let report_path = match self.reporter.render_and_save(
            job,
            &split,
            &artifact,
            &gating,
            &self.config.report_dir,
        ) {
            Ok(path) => {
                debug!(
                    "job {} ({}): report written to {}",
                    job_id,
                    job.name,
                    path.display()
                );
                Some(path)
            }
            Err(err) => {
                warn!(
                    "job {} ({}): failed to render training report: {:#}",
                    job_id, job.name, err
                );
                None
            }
        };

        if !gating.accepted {
            let new_score = gating.new_score.unwrap_or(artifact.score);
            let old_score = gating.old_score.unwrap_or(f64::NAN);
            warn!(
                "job {} ({}): old model is better than new model (old {:.4} > new {:.4} * {}), keeping the old model",
                job_id, job.name, old_score, new_score, self.config.penalty_factor
            );
            return Ok(TrainingOutcome::RetainedPrevious {
                new_score,
                old_score,
            });
        }

        let mut artifact = artifact;
        let confidence = self
            .confidence
            .generate(&artifact, &split.validation)
            .map_err(|source| TrainingError::ConfidenceInterval { job_id, source })?;
        artifact.confidence = Some(confidence);

        self.store
            .persist_artifact(job, &artifact)
            .map_err(|source| TrainingError::Persist { job_id, source })?;
        info!(
            "job {} ({}): persisted model {} in {:.2?}",
            job_id,
            job.name,
            artifact.id,
            started.elapsed()
        );

        Ok(TrainingOutcome::Persisted(TrainingReport {
            model_id: artifact.id,
            score: artifact.score,
            sizes,
            fit,
            feature_count: artifact.feature_names.len(),
            gating,
            report_path,
        }))
    }

    fn resolve_feature_list(&self, job: &PredictionJob) -> Result<Option<Vec<String>>, TrainingError> {
        let fetch_error = |source: anyhow::Error| TrainingError::Fetch {
            job_id: job.id,
            stage: "feature set",
            source,
        };
        let Some(name) = self.store.get_feature_set_name(job).map_err(fetch_error)? else {
            return Ok(None);
        };
        match self.store.get_feature_set(&name).map_err(fetch_error)? {
            Some(features) => {
                debug!(
                    "job {} ({}): reusing feature set {} ({} features)",
                    job.id,
                    job.name,
                    name,
                    features.len()
                );
                Ok(Some(features))
            }
            None => Err(fetch_error(anyhow!("feature set {} does not exist", name))),
        }
    }

    fn fit(
        &self,
        job: &PredictionJob,
        split: &DataSplit,
        hyperparameters: Hyperparameters,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(ModelArtifact, FitSummary)> {
        if split.train.is_empty() {
            return Err(anyhow!("the train partition is empty"));
        }

        let mut model = Regressor::for_model_type(job.model_type);
        model.set_params(&hyperparameters);

        let train_x = split.train.feature_matrix();
        let validation_x = split.validation.feature_matrix();
        let validation = (!split.validation.is_empty())
            .then(|| (validation_x.as_slice(), split.validation.target()));
        let fit = model.fit(
            &train_x,
            split.train.target(),
            validation,
            self.config.early_stopping_rounds,
        )?;

        let mut artifact = ModelArtifact {
            id: Uuid::new_v4(),
            job_id: job.id,
            model_type: job.model_type,
            model,
            hyperparameters,
            feature_names: split.train.feature_names().to_vec(),
            score: f64::NAN,
            best_iteration: fit.best_iteration,
            trained_at: now,
            confidence: None,
        };
        let combined = split.train_and_validation()?;
        artifact.score = artifact
            .score_on(&combined)
            .context("scoring the new model on train and validation data")?;
        Ok((artifact, fit))
    }

    fn compare(
        &self,
        split: &DataSplit,
        candidate: &ModelArtifact,
        previous: &ModelArtifact,
    ) -> anyhow::Result<GatingDecision> {
        let combined = split.train_and_validation()?;
        let new_score = candidate
            .score_on(&combined)
            .context("scoring the new model")?;
        let old_score = previous
            .score_on(&combined)
            .context("scoring the previous model")?;
        Ok(GatingDecision {
            accepted: is_new_model_better(new_score, old_score, self.config.penalty_factor),
            new_score: Some(new_score),
            old_score: Some(old_score),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materially_better_old_model_is_kept() {
        assert!(!is_new_model_better(0.70, 0.90, 1.2));
    }

    #[test]
    fn slightly_better_old_model_is_replaced() {
        // 0.90 > 0.80 * 1.2 is false, so the new model wins.
        assert!(is_new_model_better(0.80, 0.90, 1.2));
    }

    #[test]
    fn equal_scores_accept_the_new_model() {
        assert!(is_new_model_better(0.5, 0.5, 1.2));
    }
}
