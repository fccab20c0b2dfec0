//! Lag feature vocabulary and the shifting operations behind it.
//!
//! A lag feature is named `T-<n>min` or `T-<n>d` and holds the target value
//! observed `n` minutes or days before each row's timestamp.

use crate::models::TimeSeries;
use anyhow::Result;
use chrono::Duration;
use std::collections::BTreeSet;
use std::fmt;

const MAX_DAY_LAG: u32 = 14;
const SHORT_MINUTE_LAGS: [u32; 3] = [15, 30, 45];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LagOffset {
    Minutes(u32),
    Days(u32),
}

impl LagOffset {
    pub fn duration(&self) -> Duration {
        match *self {
            LagOffset::Minutes(n) => Duration::minutes(i64::from(n)),
            LagOffset::Days(n) => Duration::days(i64::from(n)),
        }
    }

    pub fn minutes(&self) -> i64 {
        self.duration().num_minutes()
    }
}

impl fmt::Display for LagOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LagOffset::Minutes(n) => write!(f, "T-{}min", n),
            LagOffset::Days(n) => write!(f, "T-{}d", n),
        }
    }
}

/// Parses a canonical lag feature name. Anything else is not a lag feature.
pub fn parse_lag_feature(name: &str) -> Option<LagOffset> {
    let rest = name.strip_prefix("T-")?;
    if let Some(digits) = rest.strip_suffix("min") {
        parse_positive(digits).map(LagOffset::Minutes)
    } else if let Some(digits) = rest.strip_suffix('d') {
        parse_positive(digits).map(LagOffset::Days)
    } else {
        None
    }
}

fn parse_positive(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|n| *n > 0)
}

pub fn format_lag_feature(offset: LagOffset) -> String {
    offset.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedLags {
    pub minutes: Vec<u32>,
    pub days: Vec<u32>,
}

/// Splits a feature list into minute and day lags, keeping input order and skipping non-lag names.
pub fn extract_lag_features<S: AsRef<str>>(features: &[S]) -> ExtractedLags {
    let mut extracted = ExtractedLags::default();
    for feature in features {
        match parse_lag_feature(feature.as_ref()) {
            Some(LagOffset::Minutes(n)) => extracted.minutes.push(n),
            Some(LagOffset::Days(n)) => extracted.days.push(n),
            None => {}
        }
    }
    extracted
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrivialLags {
    pub minutes: BTreeSet<u32>,
    pub days: Vec<u32>,
}

/// Default lags for a forecast horizon in hours.
///
/// Day lags run from `ceil(horizon / 24)` through 14. Minute lags are the hourly
/// offsets up to one day plus 15/30/45 minutes, keeping only those strictly
/// longer than the horizon.
pub fn generate_trivial_lag_features(horizon: f64) -> TrivialLags {
    let min_days = ((horizon / 24.0).ceil().max(1.0)).min(f64::from(MAX_DAY_LAG + 1)) as u32;
    let days = (min_days..=MAX_DAY_LAG).collect();

    let horizon_minutes = horizon * 60.0;
    let minutes = (1..=24u32)
        .map(|hour| hour * 60)
        .chain(SHORT_MINUTE_LAGS)
        .filter(|offset| f64::from(*offset) > horizon_minutes)
        .collect();

    TrivialLags { minutes, days }
}

/// Shift bound to one offset: the output at `t` is the target at `t - offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagShift {
    offset: LagOffset,
}

impl LagShift {
    pub fn new(offset: LagOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> LagOffset {
        self.offset
    }

    /// Rows without a measurement exactly `offset` earlier get a missing value.
    pub fn apply(&self, series: &TimeSeries) -> Vec<f64> {
        let shift = self.offset.duration();
        let timestamps = series.timestamps();
        let target = series.target();
        timestamps
            .iter()
            .map(|ts| {
                timestamps
                    .binary_search(&(*ts - shift))
                    .map_or(f64::NAN, |idx| target[idx])
            })
            .collect()
    }
}

/// Named lag shifts, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    shifts: Vec<(String, LagShift)>,
}

impl FeatureSet {
    pub fn insert(&mut self, offset: LagOffset) {
        let name = format_lag_feature(offset);
        if self.shifts.iter().all(|(existing, _)| *existing != name) {
            self.shifts.push((name, LagShift::new(offset)));
        }
    }

    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.shifts.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&LagShift> {
        self.shifts
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, shift)| shift)
    }

    /// Adds one column per shift, joined on timestamp.
    pub fn apply(&self, series: &TimeSeries) -> Result<TimeSeries> {
        let mut augmented = series.clone();
        for (name, shift) in &self.shifts {
            augmented = augmented.with_column(name.clone(), shift.apply(series))?;
        }
        Ok(augmented)
    }
}

/// Builds the lag feature set for one horizon.
///
/// With `features` the lags listed there are reused verbatim. Otherwise the
/// trivial lags for `horizon` are generated and `detected_minutes` (e.g. from
/// autocorrelation peaks) are merged in, subject to the same horizon bound.
pub fn generate_lag_feature_functions<S: AsRef<str>>(
    features: Option<&[S]>,
    horizon: f64,
    detected_minutes: &[u32],
) -> FeatureSet {
    let (minutes, days): (Vec<u32>, Vec<u32>) = match features {
        Some(features) => {
            let extracted = extract_lag_features(features);
            (extracted.minutes, extracted.days)
        }
        None => {
            let mut trivial = generate_trivial_lag_features(horizon);
            let horizon_minutes = horizon * 60.0;
            trivial.minutes.extend(
                detected_minutes
                    .iter()
                    .copied()
                    .filter(|offset| *offset > 0 && f64::from(*offset) > horizon_minutes),
            );
            (trivial.minutes.into_iter().collect(), trivial.days)
        }
    };

    let mut feature_set = FeatureSet::default();
    for n in minutes {
        feature_set.insert(LagOffset::Minutes(n));
    }
    for n in days {
        feature_set.insert(LagOffset::Days(n));
    }
    feature_set
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn quarter_hour_series(count: usize) -> TimeSeries {
        let base = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let timestamps: Vec<DateTime<Utc>> = (0..count)
            .map(|idx| base + Duration::minutes(15 * idx as i64))
            .collect();
        let values = (0..count).map(|idx| idx as f64).collect();
        TimeSeries::from_target("load", timestamps, values).unwrap()
    }

    #[test]
    fn parse_accepts_only_canonical_shapes() {
        assert_eq!(parse_lag_feature("T-60min"), Some(LagOffset::Minutes(60)));
        assert_eq!(parse_lag_feature("T-3d"), Some(LagOffset::Days(3)));
        for name in [
            "T-0min", "T-min", "T--5d", "T-1.5d", "t-60min", "T-60 min", "T-60minute", "load",
            "T-7dd", "xT-7d",
        ] {
            assert_eq!(parse_lag_feature(name), None, "{}", name);
        }
    }

    #[test]
    fn format_and_parse_round_trip() {
        for offset in [
            LagOffset::Minutes(15),
            LagOffset::Minutes(1440),
            LagOffset::Days(1),
            LagOffset::Days(14),
        ] {
            assert_eq!(parse_lag_feature(&format_lag_feature(offset)), Some(offset));
        }
    }

    #[test]
    fn extract_preserves_order_and_skips_other_names() {
        let extracted = extract_lag_features(&["T-60min", "T-3d", "not-a-lag", "T-45min"]);
        assert_eq!(extracted.minutes, vec![60, 45]);
        assert_eq!(extracted.days, vec![3]);
    }

    #[test]
    fn trivial_minutes_exceed_the_horizon() {
        for horizon in [0.25, 0.5, 1.0, 2.5, 12.0, 23.9, 24.0, 47.0, 400.0] {
            let lags = generate_trivial_lag_features(horizon);
            assert!(
                lags.minutes.iter().all(|m| f64::from(*m) > horizon * 60.0),
                "horizon {}: {:?}",
                horizon,
                lags.minutes
            );
        }
    }

    #[test]
    fn trivial_lags_for_short_horizon() {
        let lags = generate_trivial_lag_features(0.25);
        assert_eq!(lags.minutes.len(), 26);
        assert!(!lags.minutes.contains(&15));
        assert!(lags.minutes.contains(&30));
        assert!(lags.minutes.contains(&1440));
        assert_eq!(lags.days, (1..=14).collect::<Vec<_>>());
    }

    #[test]
    fn trivial_lags_for_long_horizons() {
        let day_ahead = generate_trivial_lag_features(24.0);
        assert!(day_ahead.minutes.is_empty());
        assert_eq!(day_ahead.days, (1..=14).collect::<Vec<_>>());

        let two_days = generate_trivial_lag_features(47.0);
        assert_eq!(two_days.days, (2..=14).collect::<Vec<_>>());

        let beyond = generate_trivial_lag_features(24.0 * 20.0);
        assert!(beyond.days.is_empty());
    }

    #[test]
    fn each_shift_keeps_its_own_offset() {
        let set = generate_lag_feature_functions(Some(&["T-15min", "T-1d", "T-30min"][..]), 24.0, &[]);
        assert_eq!(set.get("T-15min").unwrap().offset(), LagOffset::Minutes(15));
        assert_eq!(set.get("T-30min").unwrap().offset(), LagOffset::Minutes(30));
        assert_eq!(set.get("T-1d").unwrap().offset(), LagOffset::Days(1));
    }

    #[test]
    fn detected_lags_respect_the_horizon() {
        let set = generate_lag_feature_functions::<&str>(None, 24.0, &[75, 1500, 2880]);
        let names: Vec<&str> = set.names().collect();
        assert!(names.contains(&"T-1500min"));
        assert!(names.contains(&"T-2880min"));
        assert!(!names.contains(&"T-75min"));
    }

    #[test]
    fn applied_shifts_are_missing_for_the_first_day() {
        let series = quarter_hour_series(96 * 3);
        let set = generate_lag_feature_functions(Some(&["T-60min", "T-1440min"][..]), 24.0, &[]);
        let augmented = set.apply(&series).unwrap();
        assert_eq!(augmented.len(), series.len());

        let hourly = augmented.column("T-60min").unwrap();
        let daily = augmented.column("T-1440min").unwrap();
        for row in 0..96 {
            assert!(daily[row].is_nan(), "row {}", row);
        }
        for row in 0..4 {
            assert!(hourly[row].is_nan(), "row {}", row);
        }
        for row in 96..series.len() {
            assert_eq!(daily[row], (row - 96) as f64);
            assert_eq!(hourly[row], (row - 4) as f64);
        }
    }

    #[test]
    fn shifts_follow_timestamps_across_gaps() {
        let base = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let timestamps = vec![
            base,
            base + Duration::minutes(15),
            base + Duration::minutes(60),
            base + Duration::minutes(75),
        ];
        let series = TimeSeries::from_target("load", timestamps, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let shifted = LagShift::new(LagOffset::Minutes(60)).apply(&series);
        assert!(shifted[0].is_nan());
        assert!(shifted[1].is_nan());
        assert_eq!(shifted[2], 1.0);
        assert_eq!(shifted[3], 2.0);
    }
}
