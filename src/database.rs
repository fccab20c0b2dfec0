use crate::models::{Hyperparameters, ModelArtifact, ModelType, PredictionJob, TimeSeries};
use crate::storage::ForecastStore;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use tokio::runtime::Runtime;
use tokio_postgres::{Client, NoTls, Row};

const TARGET_COLUMN: &str = "load";

/// PostgreSQL-backed store.
///
/// The pipeline is synchronous, so the store owns a small tokio runtime that
/// drives the connection task and every query.
pub struct PostgresStore {
    runtime: Runtime,
    client: Client,
}

impl PostgresStore {
    pub fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("stf-postgres")
            .enable_all()
            .build()
            .context("failed to start the database runtime")?;

        let client = runtime.block_on(async {
            let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
                .await
                .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    error!("PostgreSQL connection error: {}", err);
                }
            });
            Ok::<_, anyhow::Error>(client)
        })?;

        Ok(Self { runtime, client })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    async fn fetch_prediction_job(&self, job_id: i64) -> Result<Option<PredictionJob>> {
        let row = self
            .client
            .query_opt(
                "SELECT id, name, model_type, lat, lon
                 FROM prediction_jobs
                 WHERE id = $1",
                &[&job_id],
            )
            .await?;
        row.map(|row| prediction_job_from_row(&row)).transpose()
    }

    async fn fetch_prediction_jobs(&self) -> Result<Vec<PredictionJob>> {
        let rows = self
            .client
            .query(
                "SELECT id, name, model_type, lat, lon
                 FROM prediction_jobs
                 ORDER BY id",
                &[],
            )
            .await?;
        rows.iter().map(prediction_job_from_row).collect()
    }

    async fn fetch_hyperparameters(&self, job_id: i64) -> Result<Hyperparameters> {
        let rows = self
            .client
            .query(
                "SELECT name, value FROM hyperparameters WHERE job_id = $1",
                &[&job_id],
            )
            .await?;
        let mut params = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0);
            let value: f64 = row.get(1);
            params.insert(name, value);
        }
        Ok(params)
    }

    async fn fetch_input_window(
        &self,
        job_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries> {
        let rows = self
            .client
            .query(
                "SELECT ts, load
                 FROM measurements
                 WHERE job_id = $1 AND ts >= $2 AND ts <= $3
                 ORDER BY ts",
                &[&job_id, &start, &end],
            )
            .await?;

        let mut timestamps = Vec::with_capacity(rows.len());
        let mut target = Vec::with_capacity(rows.len());
        for row in rows {
            let ts: DateTime<Utc> = row.get(0);
            let value: Option<f64> = row.get(1);
            timestamps.push(ts);
            target.push(value.unwrap_or(f64::NAN));
        }

        let predictor_rows = self
            .client
            .query(
                "SELECT name, ts, value
                 FROM predictors
                 WHERE job_id = $1 AND ts >= $2 AND ts <= $3",
                &[&job_id, &start, &end],
            )
            .await?;
        let mut predictors: BTreeMap<String, HashMap<DateTime<Utc>, f64>> = BTreeMap::new();
        for row in predictor_rows {
            let name: String = row.get(0);
            let ts: DateTime<Utc> = row.get(1);
            let value: Option<f64> = row.get(2);
            predictors
                .entry(name)
                .or_default()
                .insert(ts, value.unwrap_or(f64::NAN));
        }

        let mut series = TimeSeries::from_target(TARGET_COLUMN, timestamps, target)
            .with_context(|| format!("measurements for job {} are not a valid series", job_id))?;
        for (name, by_timestamp) in predictors {
            let values = series
                .timestamps()
                .iter()
                .map(|ts| by_timestamp.get(ts).copied().unwrap_or(f64::NAN))
                .collect();
            series = series.with_column(name, values)?;
        }
        Ok(series)
    }

    async fn fetch_feature_set_name(&self, job_id: i64) -> Result<Option<String>> {
        let row = self
            .client
            .query_opt(
                "SELECT featureset_name FROM prediction_job_featuresets WHERE job_id = $1",
                &[&job_id],
            )
            .await?;
        Ok(row.map(|row| row.get::<_, String>(0)))
    }

    async fn fetch_feature_set(&self, name: &str) -> Result<Option<Vec<String>>> {
        let rows = self
            .client
            .query(
                "SELECT feature_name
                 FROM featuresets
                 WHERE name = $1
                 ORDER BY position",
                &[&name],
            )
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows.iter().map(|row| row.get::<_, String>(0)).collect()))
    }

    async fn fetch_artifact(&self, job_id: i64) -> Result<Option<ModelArtifact>> {
        let row = self
            .client
            .query_opt(
                "SELECT artifact FROM model_artifacts WHERE job_id = $1",
                &[&job_id],
            )
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let bytes: Vec<u8> = row.get(0);
        let artifact = bincode::deserialize(&bytes)
            .with_context(|| format!("Model artifact decode failed for job {}", job_id))?;
        Ok(Some(artifact))
    }

    async fn store_artifact(&self, job_id: i64, artifact: &ModelArtifact) -> Result<()> {
        let bytes = bincode::serialize(artifact).context("Failed to serialize model artifact")?;
        let model_id = artifact.id.to_string();
        self.client
            .execute(
                "INSERT INTO model_artifacts (job_id, model_id, model_type, score, trained_at, artifact)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (job_id) DO UPDATE SET
                    model_id = EXCLUDED.model_id,
                    model_type = EXCLUDED.model_type,
                    score = EXCLUDED.score,
                    trained_at = EXCLUDED.trained_at,
                    artifact = EXCLUDED.artifact",
                &[
                    &job_id,
                    &model_id,
                    &artifact.model_type.as_str(),
                    &artifact.score,
                    &artifact.trained_at,
                    &bytes,
                ],
            )
            .await?;
        debug!(
            "Stored model artifact {} for job {} ({} bytes)",
            model_id,
            job_id,
            bytes.len()
        );
        Ok(())
    }

    async fn fetch_settings(&self) -> Result<HashMap<String, String>> {
        let rows = self
            .client
            .query("SELECT setting_key, value FROM settings", &[])
            .await?;
        let mut settings = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get(0);
            let value: String = row.get(1);
            settings.insert(key, value);
        }
        Ok(settings)
    }
}

impl ForecastStore for PostgresStore {
    fn get_prediction_job(&self, job_id: i64) -> Result<PredictionJob> {
        self.block_on(self.fetch_prediction_job(job_id))?
            .ok_or_else(|| anyhow!("Prediction job {} not found", job_id))
    }

    fn list_prediction_jobs(&self) -> Result<Vec<PredictionJob>> {
        self.block_on(self.fetch_prediction_jobs())
    }

    fn get_hyperparameters(&self, job: &PredictionJob) -> Result<Hyperparameters> {
        self.block_on(self.fetch_hyperparameters(job.id))
    }

    fn get_input_window(
        &self,
        job: &PredictionJob,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries> {
        self.block_on(self.fetch_input_window(job.id, start, end))
    }

    fn get_feature_set_name(&self, job: &PredictionJob) -> Result<Option<String>> {
        self.block_on(self.fetch_feature_set_name(job.id))
    }

    fn get_feature_set(&self, name: &str) -> Result<Option<Vec<String>>> {
        self.block_on(self.fetch_feature_set(name))
    }

    fn load_previous_artifact(&self, job: &PredictionJob) -> Result<Option<ModelArtifact>> {
        self.block_on(self.fetch_artifact(job.id))
    }

    fn persist_artifact(&self, job: &PredictionJob, artifact: &ModelArtifact) -> Result<()> {
        self.block_on(self.store_artifact(job.id, artifact))
    }

    fn get_settings(&self) -> Result<HashMap<String, String>> {
        self.block_on(self.fetch_settings())
    }
}

fn prediction_job_from_row(row: &Row) -> Result<PredictionJob> {
    let id: i64 = row.get(0);
    let model_type: Option<String> = row.get(2);
    let model_type = match model_type.as_deref() {
        Some(raw) => raw
            .parse::<ModelType>()
            .with_context(|| format!("Invalid model type for prediction job {}", id))?,
        None => ModelType::default(),
    };
    Ok(PredictionJob {
        id,
        name: row.get(1),
        model_type,
        lat: row.get(3),
        lon: row.get(4),
    })
}
