use crate::models::TimeSeries;
use log::debug;

pub const DEFAULT_FLATLINER_THRESHOLD: usize = 24;
pub const DEFAULT_MIN_ROWS: usize = 100;
pub const DEFAULT_COMPLETENESS_THRESHOLD: f64 = 0.5;

/// Cleaning and sufficiency checks applied to the raw input window.
pub trait DataValidator: Send + Sync {
    /// Marks implausible measurements as missing without removing rows.
    fn validate(&self, series: TimeSeries) -> TimeSeries;

    /// Drops rows that cannot be used as training targets.
    fn clean(&self, series: TimeSeries) -> TimeSeries;

    /// Why the cleaned series cannot be trained on, or `None` when it can.
    ///
    /// `completeness` is the target completeness measured before cleaning,
    /// since `clean` removes exactly the rows it would count as missing.
    fn insufficiency(&self, cleaned: &TimeSeries, completeness: f64) -> Option<String>;

    fn is_sufficient(&self, cleaned: &TimeSeries, completeness: f64) -> bool {
        self.insufficiency(cleaned, completeness).is_none()
    }
}

#[derive(Debug, Clone)]
pub struct DefaultValidator {
    /// Runs of identical non-zero values at least this long are treated as a stuck meter.
    pub flatliner_threshold: usize,
    pub min_rows: usize,
    pub completeness_threshold: f64,
}

impl Default for DefaultValidator {
    fn default() -> Self {
        Self {
            flatliner_threshold: DEFAULT_FLATLINER_THRESHOLD,
            min_rows: DEFAULT_MIN_ROWS,
            completeness_threshold: DEFAULT_COMPLETENESS_THRESHOLD,
        }
    }
}

impl DefaultValidator {
    fn flatlined_runs(&self, target: &[f64]) -> Vec<std::ops::Range<usize>> {
        let mut runs = Vec::new();
        if self.flatliner_threshold == 0 {
            return runs;
        }
        let mut start = 0usize;
        while start < target.len() {
            let mut end = start + 1;
            while end < target.len() && target[end] == target[start] {
                end += 1;
            }
            if end - start >= self.flatliner_threshold
                && target[start].is_finite()
                && target[start] != 0.0
            {
                runs.push(start..end);
            }
            start = end;
        }
        runs
    }
}

impl DataValidator for DefaultValidator {
    fn validate(&self, series: TimeSeries) -> TimeSeries {
        let runs = self.flatlined_runs(series.target());
        if runs.is_empty() {
            return series;
        }
        debug!(
            "Flagged {} flatlined measurements as missing",
            runs.iter().map(|run| run.len()).sum::<usize>()
        );
        series.map_target(|target| {
            for run in runs {
                for value in &mut target[run] {
                    *value = f64::NAN;
                }
            }
        })
    }

    fn clean(&self, series: TimeSeries) -> TimeSeries {
        let target = series.target();
        series.filter_rows(|idx| target[idx].is_finite())
    }

    fn insufficiency(&self, cleaned: &TimeSeries, completeness: f64) -> Option<String> {
        if cleaned.len() < self.min_rows {
            return Some(format!(
                "{} rows, at least {} required",
                cleaned.len(),
                self.min_rows
            ));
        }
        if completeness < self.completeness_threshold {
            return Some(format!(
                "target completeness {:.2} below {:.2}",
                completeness, self.completeness_threshold
            ));
        }
        None
    }
}
