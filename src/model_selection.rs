use crate::models::FeatureFrame;
use anyhow::{anyhow, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How validation rows are drawn from the non-test part of the series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingPolicy {
    /// The block of timestamps right before the test slice.
    Contiguous,
    /// Evenly spread timestamps across the remaining history.
    Periodic,
}

impl SamplingPolicy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "contiguous" | "tail" => Ok(Self::Contiguous),
            "periodic" | "stratified" => Ok(Self::Periodic),
            other => Err(anyhow!("Unknown sampling policy: {}", other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SamplingPolicy::Contiguous => "contiguous",
            SamplingPolicy::Periodic => "periodic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitConfig {
    pub validation_fraction: f64,
    pub test_fraction: f64,
    pub policy: SamplingPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Train,
    Validation,
    Test,
}

impl Partition {
    pub fn label(self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Validation => "validation",
            Partition::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSizes {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

#[derive(Debug, Clone)]
pub struct DataSplit {
    pub train: FeatureFrame,
    pub validation: FeatureFrame,
    pub test: FeatureFrame,
}

impl DataSplit {
    pub fn partition(&self, partition: Partition) -> &FeatureFrame {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.validation,
            Partition::Test => &self.test,
        }
    }

    pub fn sizes(&self) -> PartitionSizes {
        PartitionSizes {
            train: self.train.len(),
            validation: self.validation.len(),
            test: self.test.len(),
        }
    }

    /// Train and validation rows merged back into timestamp order.
    pub fn train_and_validation(&self) -> Result<FeatureFrame> {
        if self.validation.is_empty() {
            return Ok(self.train.clone());
        }
        if self.train.is_empty() {
            return Ok(self.validation.clone());
        }
        self.train.concat(&self.validation)
    }
}

fn stabilized(count: f64) -> f64 {
    (count * 1e9).round() / 1e9
}

/// Assigns each of `group_count` ordered timestamp groups to a partition.
///
/// The newest `round(g * test_fraction) + 1` groups are the test slice.
/// Contiguous sampling takes `floor(g * validation_fraction)` groups directly
/// before it; periodic sampling takes `ceil(g * validation_fraction)` groups at
/// positions `floor((2i + 1) * m / (2v))` of the `m` remaining groups.
pub fn assign_partitions(group_count: usize, config: &SplitConfig) -> Vec<Partition> {
    let mut assignment = vec![Partition::Train; group_count];
    if group_count == 0 {
        return assignment;
    }

    let total = group_count as f64;
    let test = ((stabilized(total * config.test_fraction).round() as usize) + 1).min(group_count);
    let remaining = group_count - test;
    for slot in &mut assignment[remaining..] {
        *slot = Partition::Test;
    }

    let validation_raw = stabilized(total * config.validation_fraction);
    match config.policy {
        SamplingPolicy::Contiguous => {
            let validation = (validation_raw.floor() as usize).min(remaining);
            for slot in &mut assignment[remaining - validation..remaining] {
                *slot = Partition::Validation;
            }
        }
        SamplingPolicy::Periodic => {
            let validation = (validation_raw.ceil() as usize).min(remaining);
            for i in 0..validation {
                let position = (2 * i + 1) * remaining / (2 * validation);
                assignment[position] = Partition::Validation;
            }
        }
    }

    assignment
}

/// Splits a sorted feature frame into disjoint, order-preserving partitions.
///
/// Rows sharing a timestamp (one per stacked horizon) always land together.
pub fn split_data_train_validation_test(
    frame: &FeatureFrame,
    config: &SplitConfig,
) -> Result<DataSplit> {
    for (name, value) in [
        ("validation_fraction", config.validation_fraction),
        ("test_fraction", config.test_fraction),
    ] {
        if !(0.0..1.0).contains(&value) {
            return Err(anyhow!("{} must be in [0, 1) (value: {})", name, value));
        }
    }

    let groups = frame.timestamp_groups();
    let assignment = assign_partitions(groups.len(), config);

    let mut train_rows = Vec::new();
    let mut validation_rows = Vec::new();
    let mut test_rows = Vec::new();
    for (group, partition) in groups.into_iter().zip(assignment) {
        let rows = match partition {
            Partition::Train => &mut train_rows,
            Partition::Validation => &mut validation_rows,
            Partition::Test => &mut test_rows,
        };
        rows.extend(group);
    }

    Ok(DataSplit {
        train: frame.select_rows(&train_rows),
        validation: frame.select_rows(&validation_rows),
        test: frame.select_rows(&test_rows),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeSeries;
    use chrono::{Duration, TimeZone, Utc};

    fn frame(count: usize) -> FeatureFrame {
        let base = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let timestamps = (0..count)
            .map(|idx| base + Duration::minutes(15 * idx as i64))
            .collect();
        let values = (0..count).map(|idx| idx as f64).collect();
        TimeSeries::from_target("load", timestamps, values)
            .unwrap()
            .into()
    }

    fn config(policy: SamplingPolicy) -> SplitConfig {
        SplitConfig {
            validation_fraction: 0.15,
            test_fraction: 0.0,
            policy,
        }
    }

    #[test]
    fn ninety_days_contiguous() {
        let split = split_data_train_validation_test(&frame(8641), &config(SamplingPolicy::Contiguous))
            .unwrap();
        assert_eq!(
            split.sizes(),
            PartitionSizes {
                train: 7344,
                validation: 1296,
                test: 1
            }
        );
        assert_eq!(split.test.target(), &[8640.0]);
        assert_eq!(split.validation.target()[0], 7344.0);
        assert_eq!(split.train.target()[7343], 7343.0);
    }

    #[test]
    fn ninety_days_periodic() {
        let split =
            split_data_train_validation_test(&frame(8641), &config(SamplingPolicy::Periodic)).unwrap();
        assert_eq!(
            split.sizes(),
            PartitionSizes {
                train: 7343,
                validation: 1297,
                test: 1
            }
        );
        let validation = split.validation.target();
        assert!(validation.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(validation[0] < 10.0);
        assert!(*validation.last().unwrap() > 8600.0);
    }

    #[test]
    fn partitions_are_exhaustive_for_every_size() {
        for policy in [SamplingPolicy::Contiguous, SamplingPolicy::Periodic] {
            for count in [1usize, 2, 3, 7, 10, 99, 100, 101, 977] {
                for (vf, tf) in [(0.0, 0.0), (0.15, 0.0), (0.3, 0.1), (0.5, 0.45)] {
                    let cfg = SplitConfig {
                        validation_fraction: vf,
                        test_fraction: tf,
                        policy,
                    };
                    let split = split_data_train_validation_test(&frame(count), &cfg).unwrap();
                    let sizes = split.sizes();
                    assert_eq!(
                        sizes.train + sizes.validation + sizes.test,
                        count,
                        "{:?} count={} vf={} tf={}",
                        policy,
                        count,
                        vf,
                        tf
                    );
                    let mut seen: Vec<f64> = split
                        .train
                        .target()
                        .iter()
                        .chain(split.validation.target())
                        .chain(split.test.target())
                        .copied()
                        .collect();
                    seen.sort_by(|a, b| a.total_cmp(b));
                    let expected: Vec<f64> = (0..count).map(|idx| idx as f64).collect();
                    assert_eq!(seen, expected);
                }
            }
        }
    }

    #[test]
    fn periodic_sampling_is_deterministic() {
        let cfg = config(SamplingPolicy::Periodic);
        assert_eq!(assign_partitions(500, &cfg), assign_partitions(500, &cfg));
    }

    #[test]
    fn stacked_rows_share_a_partition() {
        let single = frame(40);
        let stacked = FeatureFrame::stack(vec![single.clone(), single]).unwrap();
        let split =
            split_data_train_validation_test(&stacked, &config(SamplingPolicy::Periodic)).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.validation.len(), 2 * 6);
        assert_eq!(split.train.len(), 2 * 33);
    }

    #[test]
    fn rejects_out_of_range_fractions() {
        let cfg = SplitConfig {
            validation_fraction: 1.2,
            test_fraction: 0.0,
            policy: SamplingPolicy::Contiguous,
        };
        assert!(split_data_train_validation_test(&frame(10), &cfg).is_err());
    }

    #[test]
    fn train_and_validation_restores_time_order() {
        let split =
            split_data_train_validation_test(&frame(100), &config(SamplingPolicy::Periodic)).unwrap();
        let merged = split.train_and_validation().unwrap();
        assert_eq!(merged.len(), 99);
        assert!(merged.timestamps().windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
