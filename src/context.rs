use crate::config::TrainingConfig;
use crate::database::PostgresStore;
use crate::storage::{FileStore, ForecastStore};
use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR: &str = "data";

/// Resolves where jobs, measurements and models live for one CLI invocation.
#[derive(Clone, Debug)]
pub struct AppContext {
    database_url: Option<String>,
    data_dir: PathBuf,
}

impl AppContext {
    pub fn initialize(database_url: Option<String>, data_dir: Option<PathBuf>) -> Self {
        Self {
            database_url: database_url.filter(|url| !url.trim().is_empty()),
            data_dir: data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// PostgreSQL when `DATABASE_URL` is set, the file store otherwise.
    pub fn store(&self) -> Result<Box<dyn ForecastStore>> {
        match self.database_url.as_deref() {
            Some(url) => {
                info!("Using PostgreSQL store");
                Ok(Box::new(PostgresStore::new(url)?))
            }
            None => {
                info!("Using file store at {}", self.data_dir.display());
                Ok(Box::new(FileStore::new(self.data_dir.clone())))
            }
        }
    }

    /// Training settings from the store, before command-line overrides.
    pub fn training_config(&self, store: &dyn ForecastStore) -> Result<TrainingConfig> {
        let settings = store.get_settings().context("Failed to load settings")?;
        TrainingConfig::from_settings_map(&settings).context("Invalid training settings")
    }
}
