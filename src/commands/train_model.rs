use crate::config::TrainingConfig;
use crate::context::AppContext;
use crate::model_selection::SamplingPolicy;
use crate::training::{TrainingOutcome, TrainingPipeline};
use anyhow::Result;
use log::info;
use std::path::PathBuf;

/// Command-line switches layered over the stored training settings.
#[derive(Debug, Clone, Default)]
pub struct TrainingOverrides {
    pub skip_age_check: bool,
    pub no_compare: bool,
    pub horizons: Option<Vec<f64>>,
    pub sampling: Option<SamplingPolicy>,
    pub detect_lags: bool,
    pub report_dir: Option<PathBuf>,
}

impl TrainingOverrides {
    pub fn apply(&self, mut config: TrainingConfig) -> TrainingConfig {
        if self.skip_age_check {
            config.check_old_model_age = false;
        }
        if self.no_compare {
            config.compare_to_old = false;
        }
        if let Some(horizons) = self.horizons.as_ref() {
            config.horizons = horizons.clone();
        }
        if let Some(policy) = self.sampling {
            config.sampling_policy = policy;
        }
        if self.detect_lags {
            config.detect_non_trivial_lags = true;
        }
        if let Some(report_dir) = self.report_dir.as_ref() {
            config.report_dir = report_dir.clone();
        }
        config
    }
}

pub fn run(app: &AppContext, job_id: i64, overrides: &TrainingOverrides) -> Result<()> {
    info!("Received train command for job {}", job_id);
    let store = app.store()?;
    let config = overrides.apply(app.training_config(store.as_ref())?);
    let job = store.get_prediction_job(job_id)?;
    let pipeline = TrainingPipeline::new(store.as_ref(), config)?;

    match pipeline.run(&job)? {
        TrainingOutcome::SkippedModelAge { age_days } => {
            info!(
                "Job {} ({}) skipped: previous model is {:.1} days old",
                job.id, job.name, age_days
            );
        }
        TrainingOutcome::RetainedPrevious {
            new_score,
            old_score,
        } => {
            info!(
                "Job {} ({}) kept its previous model (old score {:.4}, new score {:.4})",
                job.id, job.name, old_score, new_score
            );
        }
        TrainingOutcome::Persisted(report) => {
            info!(
                "Job {} ({}) stored model {} with score {:.4} ({} features)",
                job.id, job.name, report.model_id, report.score, report.feature_count
            );
            if let Some(path) = report.report_path {
                info!("Training report available in {}", path.display());
            }
        }
    }
    Ok(())
}
