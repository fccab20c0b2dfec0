use crate::lag_features::{generate_trivial_lag_features, LagOffset};
use anyhow::{anyhow, Result};

/// Default lag feature names for `horizon` hours, minutes first.
pub fn trivial_lag_names(horizon: f64) -> Result<Vec<String>> {
    if !(horizon.is_finite() && horizon > 0.0) {
        return Err(anyhow!("Horizon must be a positive number of hours (value: {})", horizon));
    }
    let lags = generate_trivial_lag_features(horizon);
    let minutes = lags.minutes.iter().map(|n| LagOffset::Minutes(*n));
    let days = lags.days.iter().map(|n| LagOffset::Days(*n));
    Ok(minutes.chain(days).map(|offset| offset.to_string()).collect())
}

pub fn run(horizon: f64) -> Result<()> {
    for name in trivial_lag_names(horizon)? {
        println!("{}", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_ahead_horizon_has_no_minute_lags() {
        let names = trivial_lag_names(24.0).unwrap();
        assert!(names.iter().all(|name| name.ends_with('d')));
        assert_eq!(names.first().map(String::as_str), Some("T-1d"));
        assert_eq!(names.len(), 14);
    }

    #[test]
    fn rejects_non_positive_horizons() {
        assert!(trivial_lag_names(0.0).is_err());
        assert!(trivial_lag_names(f64::NAN).is_err());
    }
}
