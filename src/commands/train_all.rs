use crate::commands::train_model::TrainingOverrides;
use crate::context::AppContext;
use crate::storage::ForecastStore;
use crate::training::{TrainingOutcome, TrainingPipeline};
use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use rayon::prelude::*;

/// Trains several jobs in parallel. Each job runs on one thread and owns its
/// data; a failing job, including one that cannot be looked up, does not
/// stop the others.
pub fn run(app: &AppContext, job_ids: &[i64], overrides: &TrainingOverrides) -> Result<()> {
    let store = app.store()?;
    let config = overrides.apply(app.training_config(store.as_ref())?);
    let job_ids: Vec<i64> = if job_ids.is_empty() {
        store
            .list_prediction_jobs()?
            .iter()
            .map(|job| job.id)
            .collect()
    } else {
        job_ids.to_vec()
    };
    if job_ids.is_empty() {
        info!("No prediction jobs to train");
        return Ok(());
    }
    info!("Training {} prediction job(s)", job_ids.len());

    let pipeline = TrainingPipeline::new(store.as_ref(), config)?;
    let pb = ProgressBar::new(job_ids.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let mut failures: Vec<i64> = job_ids
        .par_iter()
        .filter_map(|job_id| {
            let result = train_job(store.as_ref(), &pipeline, *job_id);
            pb.inc(1);
            match result {
                Ok(()) => None,
                Err(err) => {
                    error!("{:#}", err);
                    Some(*job_id)
                }
            }
        })
        .collect();
    failures.sort_unstable();

    if failures.is_empty() {
        pb.finish_with_message("Training completed");
        Ok(())
    } else {
        pb.finish_with_message("Training completed with errors");
        Err(anyhow!(
            "{} of {} job(s) failed: {:?}",
            failures.len(),
            job_ids.len(),
            failures
        ))
    }
}

fn train_job(store: &dyn ForecastStore, pipeline: &TrainingPipeline, job_id: i64) -> Result<()> {
    let job = store.get_prediction_job(job_id)?;
    match pipeline.run(&job)? {
        TrainingOutcome::Persisted(report) => {
            info!(
                "Job {} ({}) stored model {} (score {:.4})",
                job.id, job.name, report.model_id, report.score
            );
        }
        TrainingOutcome::RetainedPrevious { .. } => {
            info!("Job {} ({}) kept its previous model", job.id, job.name);
        }
        TrainingOutcome::SkippedModelAge { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelType, PredictionJob, TimeSeries};
    use crate::storage::FileStore;
    use chrono::{Duration, Utc};
    use std::fs;

    fn seed_job(store: &FileStore, job_id: i64) {
        let job = PredictionJob {
            id: job_id,
            name: format!("feeder {}", job_id),
            model_type: ModelType::Linear,
            lat: None,
            lon: None,
        };
        let rows = 10 * 96 + 1;
        let end = Utc::now() - Duration::minutes(1);
        let timestamps = (0..rows)
            .map(|idx| end - Duration::minutes(15 * (rows - 1 - idx) as i64))
            .collect();
        let load = (0..rows)
            .map(|idx| {
                let phase = 2.0 * std::f64::consts::PI * (idx % 96) as f64 / 96.0;
                40.0 + 8.0 * phase.sin() + ((idx * 13) % 5) as f64 * 0.1
            })
            .collect();
        store.save_prediction_job(&job).unwrap();
        store
            .save_input_window(
                &job,
                &TimeSeries::from_target("load", timestamps, load).unwrap(),
            )
            .unwrap();
    }

    #[test]
    fn unknown_job_fails_without_stopping_the_batch() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = std::env::temp_dir().join(format!("stf-train-all-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(dir.clone());
        seed_job(&store, 3);
        seed_job(&store, 8);

        let app = AppContext::initialize(None, Some(dir.clone()));
        let overrides = TrainingOverrides {
            report_dir: Some(dir.join("reports")),
            ..TrainingOverrides::default()
        };

        let err = run(&app, &[3, 99, 8], &overrides).unwrap_err();
        assert_eq!(err.to_string(), "1 of 3 job(s) failed: [99]");
        assert!(store.model_path(3).exists());
        assert!(store.model_path(8).exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_store_has_nothing_to_train() {
        let dir = std::env::temp_dir().join(format!("stf-train-all-{}", uuid::Uuid::new_v4()));
        let app = AppContext::initialize(None, Some(dir));
        assert!(run(&app, &[], &TrainingOverrides::default()).is_ok());
    }
}
