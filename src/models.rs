use crate::confidence::ConfidenceTable;
use crate::regressor::Regressor;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::str::FromStr;
use uuid::Uuid;

/// Column appended by the feature applicator to tag each stacked row with its horizon.
pub const HORIZON_COLUMN: &str = "horizon";

pub type Hyperparameters = HashMap<String, f64>;

/// Time-indexed frame with strictly increasing timestamps.
///
/// Values are stored column-major; the first column is the forecast target.
/// Gaps are represented by `f64::NAN`, never by removed rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    timestamps: Vec<DateTime<Utc>>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl TimeSeries {
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        columns: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self> {
        validate_layout(&timestamps, &columns, &values)?;
        for pair in timestamps.windows(2) {
            if pair[1] <= pair[0] {
                return Err(anyhow!(
                    "Time series timestamps must be strictly increasing ({} follows {})",
                    pair[1],
                    pair[0]
                ));
            }
        }

        Ok(Self {
            timestamps,
            columns,
            values,
        })
    }

    pub fn from_target<S: Into<String>>(
        name: S,
        timestamps: Vec<DateTime<Utc>>,
        values: Vec<f64>,
    ) -> Result<Self> {
        Self::new(timestamps, vec![name.into()], vec![values])
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn target_name(&self) -> &str {
        &self.columns[0]
    }

    pub fn target(&self) -> &[f64] {
        &self.values[0]
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|column| column == name)
            .map(|idx| self.values[idx].as_slice())
    }

    /// Value of `column` recorded at exactly `timestamp`, if that row exists.
    pub fn value_at(&self, column: &str, timestamp: DateTime<Utc>) -> Option<f64> {
        let values = self.column(column)?;
        self.timestamps
            .binary_search(&timestamp)
            .ok()
            .map(|idx| values[idx])
    }

    /// Adds a column, replacing an existing one with the same name.
    pub fn with_column<S: Into<String>>(mut self, name: S, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if values.len() != self.timestamps.len() {
            return Err(anyhow!(
                "Column {} has {} values but the series has {} rows",
                name,
                values.len(),
                self.timestamps.len()
            ));
        }
        match self.columns.iter().position(|column| *column == name) {
            Some(0) => {
                return Err(anyhow!(
                    "Refusing to overwrite target column {} with a derived column",
                    name
                ))
            }
            Some(idx) => self.values[idx] = values,
            None => {
                self.columns.push(name);
                self.values.push(values);
            }
        }
        Ok(self)
    }

    /// Rewrites target values in place; row count and timestamps are unchanged.
    pub fn map_target<F>(mut self, update: F) -> Self
    where
        F: FnOnce(&mut [f64]),
    {
        update(&mut self.values[0]);
        self
    }

    pub fn filter_rows<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(usize) -> bool,
    {
        let rows: Vec<usize> = (0..self.len()).filter(|idx| keep(*idx)).collect();
        Self {
            timestamps: rows.iter().map(|idx| self.timestamps[*idx]).collect(),
            columns: self.columns.clone(),
            values: self
                .values
                .iter()
                .map(|column| rows.iter().map(|idx| column[*idx]).collect())
                .collect(),
        }
    }

    /// Rows with `start <= timestamp <= end`.
    pub fn restrict_to_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.filter_rows(|idx| {
            let ts = self.timestamps[idx];
            ts >= start && ts <= end
        })
    }

    /// Share of rows whose target is a finite number.
    pub fn target_completeness(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let finite = self.target().iter().filter(|value| value.is_finite()).count();
        finite as f64 / self.len() as f64
    }

    pub(crate) fn into_parts(self) -> (Vec<DateTime<Utc>>, Vec<String>, Vec<Vec<f64>>) {
        (self.timestamps, self.columns, self.values)
    }
}

/// Feature-augmented training frame.
///
/// Same layout as [`TimeSeries`] but timestamps only need to be non-decreasing,
/// since rows stacked for several forecast horizons share a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    timestamps: Vec<DateTime<Utc>>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl FeatureFrame {
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        columns: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self> {
        validate_layout(&timestamps, &columns, &values)?;
        for pair in timestamps.windows(2) {
            if pair[1] < pair[0] {
                return Err(anyhow!(
                    "Feature frame timestamps must be sorted ({} follows {})",
                    pair[1],
                    pair[0]
                ));
            }
        }

        Ok(Self {
            timestamps,
            columns,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn target_name(&self) -> &str {
        &self.columns[0]
    }

    pub fn target(&self) -> &[f64] {
        &self.values[0]
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_index(name).map(|idx| self.values[idx].as_slice())
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Predictor column names (everything after the target).
    pub fn feature_names(&self) -> &[String] {
        &self.columns[1..]
    }

    /// Row-major predictor matrix in `feature_names()` order.
    pub fn feature_matrix(&self) -> Vec<Vec<f64>> {
        (0..self.len())
            .map(|row| self.values[1..].iter().map(|column| column[row]).collect())
            .collect()
    }

    /// Row-major matrix for an explicit column list; absent columns are missing values.
    pub fn feature_matrix_for(&self, names: &[String]) -> Vec<Vec<f64>> {
        let indices: Vec<Option<usize>> = names
            .iter()
            .map(|name| self.column_index(name))
            .collect();
        (0..self.len())
            .map(|row| {
                indices
                    .iter()
                    .map(|idx| idx.map_or(f64::NAN, |col| self.values[col][row]))
                    .collect()
            })
            .collect()
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            timestamps: rows.iter().map(|idx| self.timestamps[*idx]).collect(),
            columns: self.columns.clone(),
            values: self
                .values
                .iter()
                .map(|column| rows.iter().map(|idx| column[*idx]).collect())
                .collect(),
        }
    }

    /// Target plus the named predictor columns, in the given order. Unknown names are skipped.
    pub fn project(&self, names: &[String]) -> Self {
        let mut indices = vec![0usize];
        indices.extend(
            names
                .iter()
                .filter_map(|name| self.column_index(name))
                .filter(|idx| *idx != 0),
        );
        Self {
            timestamps: self.timestamps.clone(),
            columns: indices.iter().map(|idx| self.columns[*idx].clone()).collect(),
            values: indices.iter().map(|idx| self.values[*idx].clone()).collect(),
        }
    }

    /// Union of two frames with identical targets, merged in timestamp order.
    pub fn concat(&self, other: &FeatureFrame) -> Result<Self> {
        Self::stack(vec![self.clone(), other.clone()])
    }

    /// Row-wise union of several frames sharing a target column.
    ///
    /// Columns are the union of all inputs (absent values are missing) and rows
    /// are ordered by timestamp; rows with equal timestamps keep input order.
    pub fn stack(frames: Vec<FeatureFrame>) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(anyhow!("Cannot stack an empty list of feature frames"));
        };
        let target = first.target_name().to_string();
        let mut columns: Vec<String> = Vec::new();
        for frame in &frames {
            if frame.target_name() != target {
                return Err(anyhow!(
                    "Cannot stack frames with different targets ({} vs {})",
                    target,
                    frame.target_name()
                ));
            }
            for column in &frame.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }

        let mut order: Vec<(usize, usize)> = frames
            .iter()
            .enumerate()
            .flat_map(|(frame_idx, frame)| (0..frame.len()).map(move |row| (frame_idx, row)))
            .collect();
        order.sort_by_key(|(frame_idx, row)| frames[*frame_idx].timestamps[*row]);

        let lookups: Vec<Vec<Option<usize>>> = frames
            .iter()
            .map(|frame| {
                columns
                    .iter()
                    .map(|column| frame.column_index(column))
                    .collect()
            })
            .collect();

        let timestamps = order
            .iter()
            .map(|(frame_idx, row)| frames[*frame_idx].timestamps[*row])
            .collect();
        let values = (0..columns.len())
            .map(|col| {
                order
                    .iter()
                    .map(|(frame_idx, row)| {
                        lookups[*frame_idx][col]
                            .map_or(f64::NAN, |src| frames[*frame_idx].values[src][*row])
                    })
                    .collect()
            })
            .collect();

        Self::new(timestamps, columns, values)
    }

    /// Keeps the target first and orders the remaining columns by name.
    pub fn sort_columns(self) -> Self {
        let mut order: Vec<usize> = (1..self.columns.len()).collect();
        order.sort_by(|a, b| self.columns[*a].cmp(&self.columns[*b]));
        order.insert(0, 0);

        let Self {
            timestamps,
            mut columns,
            mut values,
        } = self;
        let sorted_columns = order
            .iter()
            .map(|idx| std::mem::take(&mut columns[*idx]))
            .collect();
        let sorted_values = order
            .iter()
            .map(|idx| std::mem::take(&mut values[*idx]))
            .collect();

        Self {
            timestamps,
            columns: sorted_columns,
            values: sorted_values,
        }
    }

    /// Contiguous row ranges sharing one timestamp, in order.
    pub fn timestamp_groups(&self) -> Vec<Range<usize>> {
        let mut groups = Vec::new();
        let mut start = 0usize;
        for idx in 1..=self.len() {
            if idx == self.len() || self.timestamps[idx] != self.timestamps[start] {
                groups.push(start..idx);
                start = idx;
            }
        }
        groups
    }
}

impl From<TimeSeries> for FeatureFrame {
    fn from(series: TimeSeries) -> Self {
        let (timestamps, columns, values) = series.into_parts();
        Self {
            timestamps,
            columns,
            values,
        }
    }
}

fn validate_layout(
    timestamps: &[DateTime<Utc>],
    columns: &[String],
    values: &[Vec<f64>],
) -> Result<()> {
    if columns.is_empty() {
        return Err(anyhow!("A frame needs at least a target column"));
    }
    if columns.len() != values.len() {
        return Err(anyhow!(
            "Frame declares {} columns but carries {} value columns",
            columns.len(),
            values.len()
        ));
    }
    for (name, column) in columns.iter().zip(values) {
        if column.len() != timestamps.len() {
            return Err(anyhow!(
                "Column {} has {} values but the frame has {} timestamps",
                name,
                column.len(),
                timestamps.len()
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    #[serde(alias = "xgb", alias = "lgb")]
    Gbdt,
    #[serde(alias = "ridge")]
    Linear,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Gbdt => "gbdt",
            ModelType::Linear => "linear",
        }
    }
}

impl FromStr for ModelType {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gbdt" | "xgb" | "lgb" => Ok(ModelType::Gbdt),
            "linear" | "ridge" => Ok(ModelType::Linear),
            other => Err(anyhow!("Unknown model type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionJob {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub model_type: ModelType,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

/// Outcome of comparing a freshly trained model against the deployed one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatingDecision {
    pub accepted: bool,
    pub new_score: Option<f64>,
    pub old_score: Option<f64>,
}

impl GatingDecision {
    pub fn unconditional() -> Self {
        Self {
            accepted: true,
            new_score: None,
            old_score: None,
        }
    }
}

/// Fitted estimator plus everything needed to score it later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub id: Uuid,
    pub job_id: i64,
    pub model_type: ModelType,
    pub model: Regressor,
    pub hyperparameters: Hyperparameters,
    pub feature_names: Vec<String>,
    pub score: f64,
    pub best_iteration: Option<usize>,
    pub trained_at: DateTime<Utc>,
    #[serde(default)]
    pub confidence: Option<ConfidenceTable>,
}

impl ModelArtifact {
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.trained_at).num_seconds() as f64 / 86_400.0
    }

    pub fn predict(&self, frame: &FeatureFrame) -> Vec<f64> {
        let rows = frame.feature_matrix_for(&self.feature_names);
        self.model.predict(&rows)
    }

    /// Coefficient of determination on `frame`, matching columns by name.
    pub fn score_on(&self, frame: &FeatureFrame) -> Result<f64> {
        let rows = frame.feature_matrix_for(&self.feature_names);
        self.model.score(&rows, frame.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn stamps(count: usize) -> Vec<DateTime<Utc>> {
        let base = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|idx| base + Duration::minutes(15 * idx as i64))
            .collect()
    }

    #[test]
    fn time_series_rejects_unsorted_or_duplicate_timestamps() {
        let mut timestamps = stamps(3);
        timestamps[2] = timestamps[1];
        let result = TimeSeries::from_target("load", timestamps, vec![1.0, 2.0, 3.0]);
        assert!(result.is_err());
    }

    #[test]
    fn value_at_uses_timestamps_not_positions() {
        let timestamps = stamps(4);
        let series =
            TimeSeries::from_target("load", timestamps.clone(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(series.value_at("load", timestamps[2]), Some(3.0));
        assert_eq!(
            series.value_at("load", timestamps[0] - Duration::minutes(15)),
            None
        );
        assert_eq!(series.value_at("temperature", timestamps[2]), None);
    }

    #[test]
    fn stack_unions_columns_and_orders_by_timestamp() {
        let timestamps = stamps(2);
        let a = FeatureFrame::new(
            timestamps.clone(),
            vec!["load".into(), "T-15min".into()],
            vec![vec![1.0, 2.0], vec![0.5, 1.0]],
        )
        .unwrap();
        let b = FeatureFrame::new(
            timestamps.clone(),
            vec!["load".into(), "T-1d".into()],
            vec![vec![1.0, 2.0], vec![9.0, 8.0]],
        )
        .unwrap();

        let stacked = FeatureFrame::stack(vec![a, b]).unwrap();
        assert_eq!(stacked.len(), 4);
        assert_eq!(stacked.columns(), &["load", "T-15min", "T-1d"]);
        assert_eq!(stacked.timestamps()[0], timestamps[0]);
        assert_eq!(stacked.timestamps()[1], timestamps[0]);
        let short = stacked.column("T-15min").unwrap();
        assert_eq!(short[0], 0.5);
        assert!(short[1].is_nan());
        assert_eq!(stacked.timestamp_groups(), vec![0..2, 2..4]);
    }

    #[test]
    fn sort_columns_keeps_target_first() {
        let frame = FeatureFrame::new(
            stamps(1),
            vec!["load".into(), "T-2d".into(), "T-1d".into()],
            vec![vec![1.0], vec![2.0], vec![3.0]],
        )
        .unwrap()
        .sort_columns();
        assert_eq!(frame.columns(), &["load", "T-1d", "T-2d"]);
        assert_eq!(frame.column("T-1d"), Some(&[3.0][..]));
    }

    #[test]
    fn feature_matrix_for_fills_unknown_columns_with_missing() {
        let frame = FeatureFrame::new(
            stamps(2),
            vec!["load".into(), "a".into()],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        )
        .unwrap();
        let rows = frame.feature_matrix_for(&["b".to_string(), "a".to_string()]);
        assert!(rows[0][0].is_nan());
        assert_eq!(rows[1][1], 4.0);
    }

    #[test]
    fn model_type_parses_aliases() {
        assert_eq!("xgb".parse::<ModelType>().unwrap(), ModelType::Gbdt);
        assert_eq!("Ridge".parse::<ModelType>().unwrap(), ModelType::Linear);
        assert!("prophet".parse::<ModelType>().is_err());
    }
}
