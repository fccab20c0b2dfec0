use crate::autocorrelation::{detect_non_trivial_lags, AutocorrelationOutcome};
use crate::lag_features::generate_lag_feature_functions;
use crate::models::{FeatureFrame, TimeSeries, HORIZON_COLUMN};
use anyhow::{anyhow, Context, Result};
use log::debug;

/// Builds the horizon-stacked training frame.
///
/// Every horizon contributes one copy of the input rows with its own lag
/// columns and a `horizon` column, so a single model learns all horizons.
#[derive(Debug, Clone)]
pub struct TrainFeatureApplicator {
    horizons: Vec<f64>,
    features: Option<Vec<String>>,
    autocorrelation_threshold: Option<f64>,
}

impl TrainFeatureApplicator {
    pub fn new(horizons: Vec<f64>) -> Self {
        Self {
            horizons,
            features: None,
            autocorrelation_threshold: None,
        }
    }

    /// Reuses a known feature list instead of deriving lags from the horizon.
    pub fn with_features(mut self, features: Option<Vec<String>>) -> Self {
        self.features = features;
        self
    }

    /// Adds autocorrelation peaks above `threshold` as extra minute lags.
    pub fn with_non_trivial_lags(mut self, threshold: Option<f64>) -> Self {
        self.autocorrelation_threshold = threshold;
        self
    }

    pub fn add_features(&self, series: &TimeSeries) -> Result<FeatureFrame> {
        if self.horizons.is_empty() {
            return Err(anyhow!("At least one horizon is required to apply features"));
        }

        let detected = match self.autocorrelation_threshold {
            Some(threshold) if self.features.is_none() => {
                match detect_non_trivial_lags(series, threshold) {
                    AutocorrelationOutcome::Peaks(minutes) => minutes,
                    AutocorrelationOutcome::NoSignal(reason) => {
                        debug!("Skipping non-trivial lags: {}", reason);
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        // Stacking is stable, so ascending horizons give (timestamp, horizon) row order.
        let mut horizons = self.horizons.clone();
        horizons.sort_by(|a, b| a.total_cmp(b));

        let mut frames = Vec::with_capacity(horizons.len());
        for horizon in &horizons {
            let feature_set =
                generate_lag_feature_functions(self.features.as_deref(), *horizon, &detected);
            let augmented = feature_set
                .apply(series)
                .and_then(|frame| frame.with_column(HORIZON_COLUMN, vec![*horizon; series.len()]))
                .with_context(|| format!("Failed to apply lag features for horizon {}", horizon))?;
            debug!(
                "Horizon {}h: {} lag features over {} rows",
                horizon,
                feature_set.len(),
                series.len()
            );
            frames.push(FeatureFrame::from(augmented));
        }

        let stacked = FeatureFrame::stack(frames)?.sort_columns();
        match &self.features {
            Some(features) => Ok(keep_listed_columns(stacked, features)),
            None => Ok(stacked),
        }
    }
}

/// Keeps the target, the horizon column, and the listed features.
fn keep_listed_columns(frame: FeatureFrame, features: &[String]) -> FeatureFrame {
    let keep: Vec<String> = frame
        .columns()
        .iter()
        .skip(1)
        .filter(|column| *column == HORIZON_COLUMN || features.contains(column))
        .cloned()
        .collect();
    frame.project(&keep)
}
