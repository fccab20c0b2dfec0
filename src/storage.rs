use crate::models::{Hyperparameters, ModelArtifact, PredictionJob, TimeSeries};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MODEL_FILE_NAME: &str = "model.bin";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Everything the training pipeline reads from or writes to persistent storage.
pub trait ForecastStore: Send + Sync {
    fn get_prediction_job(&self, job_id: i64) -> Result<PredictionJob>;

    fn list_prediction_jobs(&self) -> Result<Vec<PredictionJob>>;

    fn get_hyperparameters(&self, job: &PredictionJob) -> Result<Hyperparameters>;

    /// Measurements with `start <= timestamp <= end`, target column first.
    fn get_input_window(
        &self,
        job: &PredictionJob,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries>;

    fn get_feature_set_name(&self, job: &PredictionJob) -> Result<Option<String>>;

    /// Feature names registered under `name`, or `None` when the set is unknown.
    fn get_feature_set(&self, name: &str) -> Result<Option<Vec<String>>>;

    fn load_previous_artifact(&self, job: &PredictionJob) -> Result<Option<ModelArtifact>>;

    /// Replaces the stored artifact for `job`. A failed write leaves the previous one intact.
    fn persist_artifact(&self, job: &PredictionJob, artifact: &ModelArtifact) -> Result<()>;

    fn get_settings(&self) -> Result<HashMap<String, String>>;
}

/// On-disk layout of an input window. `null` marks a missing value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputWindowRecord {
    pub timestamps: Vec<DateTime<Utc>>,
    pub columns: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl InputWindowRecord {
    pub fn from_series(series: &TimeSeries) -> Self {
        let values = series
            .columns()
            .iter()
            .map(|name| {
                series
                    .column(name)
                    .unwrap_or_default()
                    .iter()
                    .map(|value| value.is_finite().then_some(*value))
                    .collect()
            })
            .collect();
        Self {
            timestamps: series.timestamps().to_vec(),
            columns: series.columns().to_vec(),
            values,
        }
    }

    pub fn into_series(self) -> Result<TimeSeries> {
        let values = self
            .values
            .into_iter()
            .map(|column| {
                column
                    .into_iter()
                    .map(|value| value.unwrap_or(f64::NAN))
                    .collect()
            })
            .collect();
        TimeSeries::new(self.timestamps, self.columns, values)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperparameterRecord {
    #[serde(default)]
    pub featureset_name: Option<String>,
    #[serde(default)]
    pub params: Hyperparameters,
}

/// Directory-backed store used for offline runs and tests.
///
/// ```text
/// <root>/jobs/<id>.json
/// <root>/inputs/<id>.json
/// <root>/hyperparameters/<id>.json
/// <root>/feature_sets/<name>.json
/// <root>/models/<id>/model.bin
/// <root>/settings.json
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_path(&self, job_id: i64) -> PathBuf {
        self.root.join("jobs").join(format!("{}.json", job_id))
    }

    fn input_path(&self, job_id: i64) -> PathBuf {
        self.root.join("inputs").join(format!("{}.json", job_id))
    }

    fn hyperparameter_path(&self, job_id: i64) -> PathBuf {
        self.root
            .join("hyperparameters")
            .join(format!("{}.json", job_id))
    }

    fn feature_set_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(anyhow!("Invalid feature set name {:?}", name));
        }
        Ok(self.root.join("feature_sets").join(format!("{}.json", name)))
    }

    pub fn model_path(&self, job_id: i64) -> PathBuf {
        self.root
            .join("models")
            .join(job_id.to_string())
            .join(MODEL_FILE_NAME)
    }

    pub fn save_prediction_job(&self, job: &PredictionJob) -> Result<()> {
        write_json(&self.job_path(job.id), job)
    }

    pub fn save_input_window(&self, job: &PredictionJob, series: &TimeSeries) -> Result<()> {
        write_json(
            &self.input_path(job.id),
            &InputWindowRecord::from_series(series),
        )
    }

    pub fn save_hyperparameters(
        &self,
        job: &PredictionJob,
        record: &HyperparameterRecord,
    ) -> Result<()> {
        write_json(&self.hyperparameter_path(job.id), record)
    }

    pub fn save_feature_set(&self, name: &str, features: &[String]) -> Result<()> {
        write_json(&self.feature_set_path(name)?, &features)
    }

    pub fn save_settings(&self, settings: &HashMap<String, String>) -> Result<()> {
        write_json(&self.root.join(SETTINGS_FILE_NAME), settings)
    }

    fn hyperparameter_record(&self, job: &PredictionJob) -> Result<HyperparameterRecord> {
        let path = self.hyperparameter_path(job.id);
        Ok(read_json_opt(&path)?.unwrap_or_default())
    }
}

impl ForecastStore for FileStore {
    fn get_prediction_job(&self, job_id: i64) -> Result<PredictionJob> {
        let path = self.job_path(job_id);
        read_json_opt(&path)?
            .ok_or_else(|| anyhow!("Prediction job {} not found at {}", job_id, path.display()))
    }

    fn list_prediction_jobs(&self) -> Result<Vec<PredictionJob>> {
        let directory = self.root.join("jobs");
        if !directory.exists() {
            return Ok(Vec::new());
        }
        let mut jobs = Vec::new();
        let entries = fs::read_dir(&directory)
            .with_context(|| format!("Failed to list jobs in {}", directory.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let job: PredictionJob = read_json(&path)?;
            jobs.push(job);
        }
        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    fn get_hyperparameters(&self, job: &PredictionJob) -> Result<Hyperparameters> {
        Ok(self.hyperparameter_record(job)?.params)
    }

    fn get_input_window(
        &self,
        job: &PredictionJob,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries> {
        let path = self.input_path(job.id);
        let record: InputWindowRecord = read_json(&path)?;
        let series = record
            .into_series()
            .with_context(|| format!("Invalid input window in {}", path.display()))?;
        Ok(series.restrict_to_window(start, end))
    }

    fn get_feature_set_name(&self, job: &PredictionJob) -> Result<Option<String>> {
        Ok(self.hyperparameter_record(job)?.featureset_name)
    }

    fn get_feature_set(&self, name: &str) -> Result<Option<Vec<String>>> {
        read_json_opt(&self.feature_set_path(name)?)
    }

    fn load_previous_artifact(&self, job: &PredictionJob) -> Result<Option<ModelArtifact>> {
        let path = self.model_path(job.id);
        if !path.exists() {
            return Ok(None);
        }
        // Decoding from the full buffer bounds every length prefix by the file size.
        let bytes = fs::read(&path)
            .with_context(|| format!("Failed to read model artifact at {}", path.display()))?;
        let artifact: ModelArtifact = bincode::deserialize(&bytes)
            .with_context(|| format!("Model artifact decode failed for {}", path.display()))?;
        Ok(Some(artifact))
    }

    fn persist_artifact(&self, job: &PredictionJob, artifact: &ModelArtifact) -> Result<()> {
        let path = self.model_path(job.id);
        ensure_parent(&path)?;
        let staging = path.with_extension(format!("bin.{}.tmp", artifact.id));

        let write_result = (|| -> Result<()> {
            let file = File::create(&staging).with_context(|| {
                format!("Unable to create model artifact at {}", staging.display())
            })?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, artifact)
                .context("Failed to serialize model artifact")?;
            writer
                .flush()
                .context("Failed to flush model artifact to disk")?;
            Ok(())
        })();
        if let Err(err) = write_result {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }

        fs::rename(&staging, &path).with_context(|| {
            format!(
                "Failed to move model artifact {} into place at {}",
                staging.display(),
                path.display()
            )
        })
    }

    fn get_settings(&self) -> Result<HashMap<String, String>> {
        Ok(read_json_opt(&self.root.join(SETTINGS_FILE_NAME))?.unwrap_or_default())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let file =
        File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to write JSON to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON in {}", path.display()))
}

fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}
