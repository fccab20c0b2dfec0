use crate::models::Hyperparameters;

/// First finite value among `keys`, so aliases like `eta`/`learning_rate` resolve the same way.
pub fn finite_param(params: &Hyperparameters, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| params.get(*key).copied())
        .find(|value| value.is_finite())
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &Hyperparameters,
    keys: &[&str],
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    finite_param(params, keys).unwrap_or(default).clamp(min, max)
}

/// Extract a parameter as usize, rounded and clamped to a range with finite checks
pub fn get_param_usize_rounded_clamped(
    params: &Hyperparameters,
    keys: &[&str],
    default: usize,
    min: usize,
    max: usize,
) -> usize {
    let raw = finite_param(params, keys).unwrap_or(default as f64);
    raw.round().clamp(min as f64, max as f64) as usize
}

/// Seeds are stored as floats in the hyperparameter table; negative or missing values fall back.
pub fn get_param_seed(params: &Hyperparameters, keys: &[&str], default: u64) -> u64 {
    finite_param(params, keys)
        .filter(|value| *value >= 0.0)
        .map(|value| value.round() as u64)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, f64)]) -> Hyperparameters {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }

    #[test]
    fn aliases_resolve_in_order() {
        let p = params(&[("eta", 0.3), ("learning_rate", 0.05)]);
        assert_eq!(finite_param(&p, &["learning_rate", "eta"]), Some(0.05));
        assert_eq!(finite_param(&p, &["eta", "learning_rate"]), Some(0.3));
        assert_eq!(finite_param(&p, &["gamma"]), None);
    }

    #[test]
    fn non_finite_values_fall_through_to_default() {
        let p = params(&[("max_depth", f64::NAN), ("subsample", 3.0)]);
        assert_eq!(get_param_usize_rounded_clamped(&p, &["max_depth"], 6, 1, 16), 6);
        assert_eq!(get_param_f64_clamped(&p, &["subsample"], 1.0, 0.1, 1.0), 1.0);
        assert_eq!(get_param_seed(&params(&[("seed", -4.0)]), &["seed"], 42), 42);
        assert_eq!(get_param_seed(&params(&[("seed", 7.4)]), &["seed"], 42), 7);
    }
}
