use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use stf_engine::config::TrainingConfig;
use stf_engine::errors::TrainingError;
use stf_engine::model_selection::DataSplit;
use stf_engine::models::{
    GatingDecision, Hyperparameters, ModelArtifact, ModelType, PredictionJob, TimeSeries,
};
use stf_engine::reporter::Reporter;
use stf_engine::storage::ForecastStore;
use stf_engine::training::{TrainingOutcome, TrainingPipeline};

const DAYS_OF_DATA: i64 = 14;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn series_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap()
}

fn series_end() -> DateTime<Utc> {
    series_start() + Duration::days(DAYS_OF_DATA)
}

/// Daily load profile with a slow trend and a deterministic wobble.
fn synthetic_load(rows: usize) -> TimeSeries {
    let start = series_start();
    let timestamps = (0..rows)
        .map(|idx| start + Duration::minutes(15 * idx as i64))
        .collect();
    let load = (0..rows)
        .map(|idx| {
            let day_phase = 2.0 * PI * (idx % 96) as f64 / 96.0;
            100.0 + 30.0 * day_phase.sin() + 0.01 * idx as f64 + ((idx * 7919) % 13) as f64 * 0.1
        })
        .collect();
    TimeSeries::from_target("load", timestamps, load).unwrap()
}

fn full_series() -> TimeSeries {
    synthetic_load((DAYS_OF_DATA * 96 + 1) as usize)
}

fn good_params() -> Hyperparameters {
    [
        ("num_boost_round".to_string(), 40.0),
        ("max_depth".to_string(), 4.0),
        ("learning_rate".to_string(), 0.3),
    ]
    .into_iter()
    .collect()
}

fn poor_params() -> Hyperparameters {
    [
        ("num_boost_round".to_string(), 1.0),
        ("learning_rate".to_string(), 0.0001),
    ]
    .into_iter()
    .collect()
}

fn job() -> PredictionJob {
    PredictionJob {
        id: 307,
        name: "Substation North".to_string(),
        model_type: ModelType::Gbdt,
        lat: Some(52.0),
        lon: Some(5.1),
    }
}

fn temp_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("stf-{}-{}", label, uuid::Uuid::new_v4()))
}

fn test_config(label: &str) -> TrainingConfig {
    TrainingConfig {
        lookback_days: DAYS_OF_DATA,
        report_dir: temp_dir(label),
        ..TrainingConfig::default()
    }
}

#[derive(Default)]
struct InMemoryStore {
    series: Mutex<HashMap<i64, TimeSeries>>,
    hyperparameters: Mutex<HashMap<i64, Hyperparameters>>,
    feature_set_names: Mutex<HashMap<i64, String>>,
    feature_sets: Mutex<HashMap<String, Vec<String>>>,
    artifacts: Mutex<HashMap<i64, ModelArtifact>>,
}

impl InMemoryStore {
    fn with_job(job: &PredictionJob, series: TimeSeries, params: Hyperparameters) -> Self {
        let store = Self::default();
        store.series.lock().unwrap().insert(job.id, series);
        store.hyperparameters.lock().unwrap().insert(job.id, params);
        store
    }

    fn set_hyperparameters(&self, job: &PredictionJob, params: Hyperparameters) {
        self.hyperparameters.lock().unwrap().insert(job.id, params);
    }

    fn artifact(&self, job: &PredictionJob) -> Option<ModelArtifact> {
        self.artifacts.lock().unwrap().get(&job.id).cloned()
    }
}

impl ForecastStore for InMemoryStore {
    fn get_prediction_job(&self, job_id: i64) -> Result<PredictionJob> {
        if job_id == job().id {
            Ok(job())
        } else {
            Err(anyhow!("unknown job {}", job_id))
        }
    }

    fn list_prediction_jobs(&self) -> Result<Vec<PredictionJob>> {
        Ok(vec![job()])
    }

    fn get_hyperparameters(&self, job: &PredictionJob) -> Result<Hyperparameters> {
        Ok(self
            .hyperparameters
            .lock()
            .unwrap()
            .get(&job.id)
            .cloned()
            .unwrap_or_default())
    }

    fn get_input_window(
        &self,
        job: &PredictionJob,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries> {
        let series = self.series.lock().unwrap();
        let series = series
            .get(&job.id)
            .ok_or_else(|| anyhow!("no measurements for job {}", job.id))?;
        Ok(series.restrict_to_window(start, end))
    }

    fn get_feature_set_name(&self, job: &PredictionJob) -> Result<Option<String>> {
        Ok(self.feature_set_names.lock().unwrap().get(&job.id).cloned())
    }

    fn get_feature_set(&self, name: &str) -> Result<Option<Vec<String>>> {
        Ok(self.feature_sets.lock().unwrap().get(name).cloned())
    }

    fn load_previous_artifact(&self, job: &PredictionJob) -> Result<Option<ModelArtifact>> {
        Ok(self.artifact(job))
    }

    fn persist_artifact(&self, job: &PredictionJob, artifact: &ModelArtifact) -> Result<()> {
        self.artifacts
            .lock()
            .unwrap()
            .insert(job.id, artifact.clone());
        Ok(())
    }

    fn get_settings(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}

struct FailingReporter;

impl Reporter for FailingReporter {
    fn render_and_save(
        &self,
        _job: &PredictionJob,
        _split: &DataSplit,
        _artifact: &ModelArtifact,
        _gating: &GatingDecision,
        _destination: &Path,
    ) -> Result<PathBuf> {
        Err(anyhow!("disk full"))
    }
}

fn expect_persisted(outcome: TrainingOutcome) -> stf_engine::training::TrainingReport {
    match outcome {
        TrainingOutcome::Persisted(report) => report,
        other => panic!("expected a persisted model, got {:?}", other),
    }
}

#[test]
fn first_training_persists_model_with_confidence_and_report() {
    ensure_test_env();
    let job = job();
    let store = InMemoryStore::with_job(&job, full_series(), good_params());
    let config = test_config("first-run");
    let report_dir = config.report_dir.clone();
    let pipeline = TrainingPipeline::new(&store, config).expect("valid config");

    let report = expect_persisted(pipeline.run_at(&job, series_end()).expect("training run"));

    let artifact = store.artifact(&job).expect("artifact persisted");
    assert_eq!(artifact.id, report.model_id);
    assert_eq!(artifact.job_id, job.id);
    assert_eq!(artifact.trained_at, series_end());
    assert!(artifact.score > 0.8, "score {}", artifact.score);
    assert!(artifact.feature_names.contains(&"horizon".to_string()));
    assert!(artifact.feature_names.contains(&"T-1d".to_string()));
    assert!(!artifact.feature_names.contains(&"load".to_string()));
    assert!(artifact.confidence.is_some());
    assert!(report.gating.accepted);
    assert!(report.gating.old_score.is_none());

    let sizes = report.sizes;
    assert_eq!(sizes.train + sizes.validation + sizes.test, 2 * full_series().len());
    assert!(sizes.validation > 0);

    let report_path = report.report_path.expect("report written");
    assert!(report_path.join("report.html").exists());
    assert!(report_path.join("summary.json").exists());
    let _ = std::fs::remove_dir_all(report_dir);
}

#[test]
fn stale_previous_model_skips_training_unless_the_check_is_disabled() {
    ensure_test_env();
    let job = job();
    let store = InMemoryStore::with_job(&job, full_series(), good_params());
    let config = test_config("stale");
    let report_dir = config.report_dir.clone();
    let max_age = config.max_model_age_days;

    let pipeline = TrainingPipeline::new(&store, config.clone()).unwrap();
    expect_persisted(pipeline.run_at(&job, series_end()).unwrap());
    let first_id = store.artifact(&job).unwrap().id;

    let later = series_end() + Duration::days(max_age as i64 + 1);
    match pipeline.run_at(&job, later).unwrap() {
        TrainingOutcome::SkippedModelAge { age_days } => {
            assert!((age_days - (max_age + 1.0)).abs() < 1e-9, "age {}", age_days)
        }
        other => panic!("expected the run to be skipped, got {:?}", other),
    }
    assert_eq!(store.artifact(&job).unwrap().id, first_id);

    let unchecked = TrainingPipeline::new(
        &store,
        TrainingConfig {
            check_old_model_age: false,
            compare_to_old: false,
            ..config
        },
    )
    .unwrap();
    let report = expect_persisted(unchecked.run_at(&job, later).unwrap());
    assert_ne!(report.model_id, first_id);
    let _ = std::fs::remove_dir_all(report_dir);
}

#[test]
fn materially_worse_candidate_keeps_the_previous_model() {
    ensure_test_env();
    let job = job();
    let store = InMemoryStore::with_job(&job, full_series(), good_params());
    let config = test_config("gating");
    let report_dir = config.report_dir.clone();
    let pipeline = TrainingPipeline::new(&store, config.clone()).unwrap();

    expect_persisted(pipeline.run_at(&job, series_end()).unwrap());
    let good_id = store.artifact(&job).unwrap().id;

    store.set_hyperparameters(&job, poor_params());
    match pipeline.run_at(&job, series_end()).unwrap() {
        TrainingOutcome::RetainedPrevious {
            new_score,
            old_score,
        } => {
            assert!(old_score > new_score * config.penalty_factor);
        }
        other => panic!("expected the previous model to be kept, got {:?}", other),
    }
    assert_eq!(store.artifact(&job).unwrap().id, good_id);

    let without_gate = TrainingPipeline::new(
        &store,
        TrainingConfig {
            compare_to_old: false,
            ..config
        },
    )
    .unwrap();
    let report = expect_persisted(without_gate.run_at(&job, series_end()).unwrap());
    assert_eq!(store.artifact(&job).unwrap().id, report.model_id);
    let _ = std::fs::remove_dir_all(report_dir);
}

#[test]
fn insufficient_data_fails_without_touching_the_stored_model() {
    ensure_test_env();
    let job = job();
    let store = InMemoryStore::with_job(&job, synthetic_load(50), good_params());
    let pipeline = TrainingPipeline::new(&store, test_config("insufficient")).unwrap();

    let err = pipeline
        .run_at(&job, series_start() + Duration::days(1))
        .expect_err("50 rows are not enough");
    match &err {
        TrainingError::InsufficientData { job_id, rows, .. } => {
            assert_eq!(*job_id, job.id);
            assert_eq!(*rows, 50);
        }
        other => panic!("unexpected error {:?}", other),
    }
    let message = err.to_string();
    assert!(message.contains("307"), "{}", message);
    assert!(message.contains("Substation North"), "{}", message);
    assert!(store.artifact(&job).is_none());
}

#[test]
fn sparse_measurements_fail_on_completeness() {
    ensure_test_env();
    let job = job();
    // One target in eight survives, which still leaves well over 100 rows.
    let sparse = full_series().map_target(|target| {
        for (idx, value) in target.iter_mut().enumerate() {
            if idx % 8 != 0 {
                *value = f64::NAN;
            }
        }
    });
    let store = InMemoryStore::with_job(&job, sparse, good_params());
    let pipeline = TrainingPipeline::new(&store, test_config("sparse")).unwrap();

    let err = pipeline
        .run_at(&job, series_end())
        .expect_err("sparse input should not be trained on");
    match &err {
        TrainingError::InsufficientData { rows, cause, .. } => {
            assert_eq!(*rows, 169);
            assert!(cause.contains("completeness"), "{}", cause);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(store.artifact(&job).is_none());
}

#[test]
fn report_failure_does_not_block_persistence() {
    ensure_test_env();
    let job = job();
    let store = InMemoryStore::with_job(&job, full_series(), good_params());
    let pipeline = TrainingPipeline::new(&store, test_config("failing-report"))
        .unwrap()
        .with_reporter(FailingReporter);

    let report = expect_persisted(pipeline.run_at(&job, series_end()).unwrap());
    assert!(report.report_path.is_none());
    assert_eq!(store.artifact(&job).unwrap().id, report.model_id);
}

#[test]
fn stored_feature_set_limits_the_lag_columns() {
    ensure_test_env();
    let job = job();
    let store = InMemoryStore::with_job(&job, full_series(), good_params());
    store
        .feature_set_names
        .lock()
        .unwrap()
        .insert(job.id, "compact".to_string());
    store.feature_sets.lock().unwrap().insert(
        "compact".to_string(),
        vec!["T-60min".to_string(), "T-1d".to_string(), "T-7d".to_string()],
    );
    let config = test_config("feature-set");
    let report_dir = config.report_dir.clone();
    let pipeline = TrainingPipeline::new(&store, config).unwrap();

    expect_persisted(pipeline.run_at(&job, series_end()).unwrap());
    let artifact = store.artifact(&job).unwrap();
    assert_eq!(
        artifact.feature_names,
        vec!["T-1d", "T-60min", "T-7d", "horizon"]
    );
    let _ = std::fs::remove_dir_all(report_dir);
}

#[test]
fn unknown_feature_set_is_a_fetch_failure() {
    ensure_test_env();
    let job = job();
    let store = InMemoryStore::with_job(&job, full_series(), good_params());
    store
        .feature_set_names
        .lock()
        .unwrap()
        .insert(job.id, "missing".to_string());
    let pipeline = TrainingPipeline::new(&store, test_config("missing-set")).unwrap();

    match pipeline.run_at(&job, series_end()) {
        Err(TrainingError::Fetch { job_id, stage, .. }) => {
            assert_eq!(job_id, job.id);
            assert_eq!(stage, "feature set");
        }
        other => panic!("expected a fetch failure, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn invalid_penalty_factor_is_rejected_up_front() {
    let store = InMemoryStore::default();
    let config = TrainingConfig {
        penalty_factor: 1.0,
        ..TrainingConfig::default()
    };
    assert!(matches!(
        TrainingPipeline::new(&store, config),
        Err(TrainingError::InvalidConfig(_))
    ));
}
