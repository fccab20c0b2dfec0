use crate::model_selection::{SamplingPolicy, SplitConfig};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_TRAIN_HORIZONS: [f64; 2] = [0.25, 24.0];
pub const DEFAULT_MAX_MODEL_AGE_DAYS: f64 = 7.0;
pub const DEFAULT_EARLY_STOPPING_ROUNDS: usize = 10;
pub const DEFAULT_PENALTY_FACTOR: f64 = 1.2;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 90;
pub const DEFAULT_VALIDATION_FRACTION: f64 = 0.15;
pub const DEFAULT_AUTOCORRELATION_THRESHOLD: f64 = 0.1;

/// Everything a training run needs to know that is not part of the job itself.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Forecast horizons in hours; one stacked feature block is built per entry.
    pub horizons: Vec<f64>,
    pub max_model_age_days: f64,
    pub early_stopping_rounds: usize,
    /// The previous model is kept only when its score beats the new one scaled by this factor.
    pub penalty_factor: f64,
    pub check_old_model_age: bool,
    pub compare_to_old: bool,
    pub lookback_days: i64,
    pub validation_fraction: f64,
    pub test_fraction: f64,
    pub sampling_policy: SamplingPolicy,
    pub detect_non_trivial_lags: bool,
    pub autocorrelation_threshold: f64,
    pub report_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            horizons: DEFAULT_TRAIN_HORIZONS.to_vec(),
            max_model_age_days: DEFAULT_MAX_MODEL_AGE_DAYS,
            early_stopping_rounds: DEFAULT_EARLY_STOPPING_ROUNDS,
            penalty_factor: DEFAULT_PENALTY_FACTOR,
            check_old_model_age: true,
            compare_to_old: true,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            validation_fraction: DEFAULT_VALIDATION_FRACTION,
            test_fraction: 0.0,
            sampling_policy: SamplingPolicy::Periodic,
            detect_non_trivial_lags: false,
            autocorrelation_threshold: DEFAULT_AUTOCORRELATION_THRESHOLD,
            report_dir: PathBuf::from("reports"),
        }
    }
}

impl TrainingConfig {
    /// Builds a config from the settings table; absent keys keep their defaults.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let horizons = match optional_setting(settings, "TRAIN_HORIZONS") {
            Some(_) => require_setting_f64_list(settings, "TRAIN_HORIZONS")?,
            None => defaults.horizons,
        };
        let sampling_policy = match optional_setting(settings, "SAMPLING_POLICY") {
            Some(raw) => SamplingPolicy::parse(raw).map_err(|_| {
                anyhow!(
                    "Setting SAMPLING_POLICY must be contiguous or periodic (value: {})",
                    raw
                )
            })?,
            None => defaults.sampling_policy,
        };
        let report_dir = optional_setting(settings, "REPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.report_dir);

        let config = Self {
            horizons,
            max_model_age_days: setting_f64_or(
                settings,
                "MAX_MODEL_AGE_DAYS",
                defaults.max_model_age_days,
                Some(0.0),
                None,
            )?,
            early_stopping_rounds: setting_usize_or(
                settings,
                "EARLY_STOPPING_ROUNDS",
                defaults.early_stopping_rounds,
                1,
            )?,
            penalty_factor: setting_f64_or(
                settings,
                "PENALTY_FACTOR_OLD_MODEL",
                defaults.penalty_factor,
                Some(1.0),
                None,
            )?,
            check_old_model_age: setting_bool_or(
                settings,
                "CHECK_OLD_MODEL_AGE",
                defaults.check_old_model_age,
            )?,
            compare_to_old: setting_bool_or(settings, "COMPARE_TO_OLD", defaults.compare_to_old)?,
            lookback_days: setting_usize_or(
                settings,
                "TRAINING_LOOKBACK_DAYS",
                defaults.lookback_days as usize,
                1,
            )? as i64,
            validation_fraction: setting_f64_or(
                settings,
                "VALIDATION_FRACTION",
                defaults.validation_fraction,
                Some(0.0),
                Some(1.0),
            )?,
            test_fraction: setting_f64_or(
                settings,
                "TEST_FRACTION",
                defaults.test_fraction,
                Some(0.0),
                Some(1.0),
            )?,
            sampling_policy,
            detect_non_trivial_lags: setting_bool_or(
                settings,
                "DETECT_NON_TRIVIAL_LAGS",
                defaults.detect_non_trivial_lags,
            )?,
            autocorrelation_threshold: setting_f64_or(
                settings,
                "AUTOCORRELATION_THRESHOLD",
                defaults.autocorrelation_threshold,
                Some(0.0),
                Some(1.0),
            )?,
            report_dir,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizons.is_empty() {
            return Err(anyhow!("At least one training horizon is required"));
        }
        if let Some(bad) = self
            .horizons
            .iter()
            .find(|horizon| !horizon.is_finite() || **horizon <= 0.0)
        {
            return Err(anyhow!(
                "Training horizons must be positive hours (value: {})",
                bad
            ));
        }
        if !self.max_model_age_days.is_finite() || self.max_model_age_days < 0.0 {
            return Err(anyhow!(
                "max_model_age_days must be a non-negative number (value: {})",
                self.max_model_age_days
            ));
        }
        if self.early_stopping_rounds == 0 {
            return Err(anyhow!("early_stopping_rounds must be at least 1"));
        }
        if !self.penalty_factor.is_finite() || self.penalty_factor <= 1.0 {
            return Err(anyhow!(
                "penalty_factor must be greater than 1 (value: {})",
                self.penalty_factor
            ));
        }
        if self.lookback_days <= 0 {
            return Err(anyhow!(
                "lookback_days must be positive (value: {})",
                self.lookback_days
            ));
        }
        for (name, value) in [
            ("validation_fraction", self.validation_fraction),
            ("test_fraction", self.test_fraction),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(anyhow!("{} must be in [0, 1) (value: {})", name, value));
            }
        }
        if self.validation_fraction + self.test_fraction >= 1.0 {
            return Err(anyhow!(
                "validation_fraction + test_fraction must leave rows for training (values: {} + {})",
                self.validation_fraction,
                self.test_fraction
            ));
        }
        if !(self.autocorrelation_threshold > 0.0 && self.autocorrelation_threshold <= 1.0) {
            return Err(anyhow!(
                "autocorrelation_threshold must be in (0, 1] (value: {})",
                self.autocorrelation_threshold
            ));
        }
        Ok(())
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            validation_fraction: self.validation_fraction,
            test_fraction: self.test_fraction,
            policy: self.sampling_policy,
        }
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn setting_f64_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    match optional_setting(settings, key) {
        Some(_) => require_setting_f64(settings, key, min, max),
        None => Ok(default),
    }
}

fn setting_usize_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    match optional_setting(settings, key) {
        Some(_) => require_setting_usize(settings, key, min),
        None => Ok(default),
    }
}

fn setting_bool_or(settings: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match optional_setting(settings, key) {
        Some(_) => require_setting_bool(settings, key),
        None => Ok(default),
    }
}

fn require_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<usize> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn require_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<bool> {
    let raw = require_setting(settings, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "Setting {} must be true or false (value: {})",
            key,
            raw
        )),
    }
}

fn require_setting_f64_list(settings: &HashMap<String, String>, key: &str) -> Result<Vec<f64>> {
    let raw = require_setting(settings, key)?;
    parse_f64_list(raw).map_err(|err| anyhow!("Setting {} {} (value: {})", key, err, raw))
}

/// Parses `"0.25, 24"` or `"[0.25 24]"` into numbers.
pub fn parse_f64_list(raw: &str) -> Result<Vec<f64>> {
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim();
        if entry.is_empty() {
            continue;
        }
        let value = entry
            .parse::<f64>()
            .map_err(|_| anyhow!("must be a list of numbers"))?;
        if !value.is_finite() {
            return Err(anyhow!("must contain only finite numbers"));
        }
        values.push(value);
    }

    if values.is_empty() {
        return Err(anyhow!("must contain at least one number"));
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn empty_settings_yield_defaults() {
        let config = TrainingConfig::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(config, TrainingConfig::default());
        assert_eq!(config.horizons, vec![0.25, 24.0]);
        assert_eq!(config.early_stopping_rounds, 10);
        assert_eq!(config.lookback_days, 90);
    }

    #[test]
    fn settings_override_defaults() {
        let config = TrainingConfig::from_settings_map(&settings(&[
            ("TRAIN_HORIZONS", "[1, 47]"),
            ("PENALTY_FACTOR_OLD_MODEL", "1.5"),
            ("CHECK_OLD_MODEL_AGE", "false"),
            ("SAMPLING_POLICY", "contiguous"),
            ("VALIDATION_FRACTION", "0.2"),
            ("DETECT_NON_TRIVIAL_LAGS", "1"),
            ("REPORT_DIR", " /tmp/reports "),
        ]))
        .unwrap();
        assert_eq!(config.horizons, vec![1.0, 47.0]);
        assert_eq!(config.penalty_factor, 1.5);
        assert!(!config.check_old_model_age);
        assert_eq!(config.sampling_policy, SamplingPolicy::Contiguous);
        assert_eq!(config.validation_fraction, 0.2);
        assert!(config.detect_non_trivial_lags);
        assert_eq!(config.report_dir, PathBuf::from("/tmp/reports"));
    }

    #[test]
    fn malformed_settings_name_key_and_value() {
        let err = TrainingConfig::from_settings_map(&settings(&[("EARLY_STOPPING_ROUNDS", "2.5")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("EARLY_STOPPING_ROUNDS"), "{}", err);
        assert!(err.contains("2.5"), "{}", err);

        let err = TrainingConfig::from_settings_map(&settings(&[("COMPARE_TO_OLD", "maybe")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("COMPARE_TO_OLD"), "{}", err);
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let mut config = TrainingConfig::default();
        config.penalty_factor = 1.0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.horizons = vec![24.0, -1.0];
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.horizons.clear();
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.validation_fraction = 0.6;
        config.test_fraction = 0.4;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.autocorrelation_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_f64_list_accepts_brackets_and_whitespace() {
        assert_eq!(parse_f64_list("[0.25, 24]").unwrap(), vec![0.25, 24.0]);
        assert_eq!(parse_f64_list("1 2,3").unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(parse_f64_list("[]").is_err());
        assert!(parse_f64_list("a,b").is_err());
    }
}
