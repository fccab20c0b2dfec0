use thiserror::Error;

/// Fatal outcomes of a single training run.
///
/// Stale-model skips and retained previous models are not errors; they are
/// reported through `TrainingOutcome`.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("job {job_id} ({job_name}): insufficient data after cleaning ({rows} rows): {cause}")]
    InsufficientData {
        job_id: i64,
        job_name: String,
        rows: usize,
        cause: String,
    },

    #[error("job {job_id}: failed to fetch {stage}: {source:#}")]
    Fetch {
        job_id: i64,
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {job_id}: feature application failed: {source:#}")]
    Features {
        job_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {job_id}: model fit failed: {source:#}")]
    Fit {
        job_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {job_id}: scoring against the previous model failed: {source:#}")]
    Gate {
        job_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {job_id}: confidence interval generation failed: {source:#}")]
    ConfidenceInterval {
        job_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {job_id}: persisting the model artifact failed: {source:#}")]
    Persist {
        job_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),
}

impl TrainingError {
    pub fn job_id(&self) -> Option<i64> {
        match self {
            TrainingError::InsufficientData { job_id, .. }
            | TrainingError::Fetch { job_id, .. }
            | TrainingError::Features { job_id, .. }
            | TrainingError::Fit { job_id, .. }
            | TrainingError::Gate { job_id, .. }
            | TrainingError::ConfidenceInterval { job_id, .. }
            | TrainingError::Persist { job_id, .. } => Some(*job_id),
            TrainingError::InvalidConfig(_) => None,
        }
    }
}
