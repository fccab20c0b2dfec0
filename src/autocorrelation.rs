//! Autocorrelation-driven discovery of extra minute lags.

use crate::models::TimeSeries;
use log::debug;
use std::fmt;

/// Upper bound on the number of lags evaluated on the autocorrelation curve.
pub const MAX_CURVE_LAGS: usize = 10_000;
/// Peaks at or beyond this curve index (four hours of 15-minute steps) are ignored.
pub const MAX_PEAK_INDEX: usize = 240;
/// Minutes represented by one step of the curve index.
pub const CURVE_STEP_MINUTES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSignalReason {
    EmptySeries,
    TooShort,
    ZeroVariance,
    NonFiniteCurve,
    InvalidThreshold,
}

impl fmt::Display for NoSignalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NoSignalReason::EmptySeries => "no finite target values",
            NoSignalReason::TooShort => "too few values for a peak",
            NoSignalReason::ZeroVariance => "target has zero variance",
            NoSignalReason::NonFiniteCurve => "autocorrelation curve is not finite",
            NoSignalReason::InvalidThreshold => "peak threshold outside (0, 1]",
        };
        f.write_str(label)
    }
}

/// Result of peak detection. `NoSignal` is a normal outcome, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutocorrelationOutcome {
    Peaks(Vec<u32>),
    NoSignal(NoSignalReason),
}

impl AutocorrelationOutcome {
    /// Minute lags to add; empty when nothing could be detected.
    pub fn into_minutes(self) -> Vec<u32> {
        match self {
            AutocorrelationOutcome::Peaks(minutes) => minutes,
            AutocorrelationOutcome::NoSignal(_) => Vec::new(),
        }
    }
}

/// Sample autocorrelation for lags `0..max_lags`, normalized so lag 0 is 1.
///
/// Returns `None` for fewer than two values or a constant series.
pub fn autocorrelation_curve(values: &[f64], max_lags: usize) -> Option<Vec<f64>> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = values.iter().map(|value| value - mean).collect();
    let denominator: f64 = centered.iter().map(|value| value * value).sum();
    if denominator <= f64::EPSILON * n as f64 {
        return None;
    }

    let curve = (0..max_lags.min(n))
        .map(|lag| {
            centered
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / denominator
        })
        .collect();
    Some(curve)
}

/// Local maxima with a height strictly above `threshold`.
///
/// A peak exactly at `threshold` is dropped. scipy's `find_peaks(height=..)`
/// would keep it; here the threshold has to be exceeded.
///
/// Flat tops count once, at their middle sample. The first and last samples
/// are never peaks since they lack a neighbour on one side.
pub fn find_peaks(curve: &[f64], threshold: f64) -> Vec<usize> {
    let mut peaks = Vec::new();
    if curve.len() < 3 {
        return peaks;
    }

    let last = curve.len() - 1;
    let mut idx = 1;
    while idx < last {
        if curve[idx - 1] < curve[idx] {
            let mut ahead = idx + 1;
            while ahead < last && curve[ahead] == curve[idx] {
                ahead += 1;
            }
            if curve[ahead] < curve[idx] {
                let peak = (idx + ahead - 1) / 2;
                if curve[peak] > threshold {
                    peaks.push(peak);
                }
                idx = ahead;
                continue;
            }
        }
        idx += 1;
    }
    peaks
}

/// Extra minute lags suggested by peaks in the absolute autocorrelation of the target.
///
/// Missing target values are dropped before the curve is computed. Peaks are
/// kept below curve index 240 and rescaled by 15 minutes per step.
pub fn detect_non_trivial_lags(series: &TimeSeries, threshold: f64) -> AutocorrelationOutcome {
    if !(threshold > 0.0 && threshold <= 1.0) {
        return AutocorrelationOutcome::NoSignal(NoSignalReason::InvalidThreshold);
    }

    let values: Vec<f64> = series
        .target()
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .collect();
    if values.is_empty() {
        return AutocorrelationOutcome::NoSignal(NoSignalReason::EmptySeries);
    }
    if values.len() < 3 {
        return AutocorrelationOutcome::NoSignal(NoSignalReason::TooShort);
    }

    let Some(curve) = autocorrelation_curve(&values, MAX_CURVE_LAGS) else {
        return AutocorrelationOutcome::NoSignal(NoSignalReason::ZeroVariance);
    };
    if curve.iter().any(|value| !value.is_finite()) {
        return AutocorrelationOutcome::NoSignal(NoSignalReason::NonFiniteCurve);
    }

    let magnitude: Vec<f64> = curve.iter().map(|value| value.abs()).collect();
    let minutes: Vec<u32> = find_peaks(&magnitude, threshold)
        .into_iter()
        .filter(|idx| *idx < MAX_PEAK_INDEX)
        .map(|idx| idx as u32 * CURVE_STEP_MINUTES)
        .collect();

    debug!(
        "Autocorrelation over {} values produced {} candidate lags",
        values.len(),
        minutes.len()
    );
    AutocorrelationOutcome::Peaks(minutes)
}
