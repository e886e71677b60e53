//! Small numeric helpers shared by fusion and signal code

use std::cmp::Ordering;

/// Division that returns `default` instead of NaN/inf on a zero denominator
pub fn safe_divide(numerator: f64, denominator: f64, default: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return default;
    }
    numerator / denominator
}

/// Weighted mean of `values`; 0.0 when inputs are empty, mismatched or weightless
pub fn weighted_average(values: &[f64], weights: &[f64]) -> f64 {
    if values.is_empty() || values.len() != weights.len() {
        return 0.0;
    }
    let total_weight: f64 = weights.iter().sum();
    if total_weight == 0.0 {
        return 0.0;
    }
    values
        .iter()
        .zip(weights)
        .map(|(v, w)| v * w)
        .sum::<f64>()
        / total_weight
}

/// Signed distance of `price` from `reference`, in percent
pub fn pct_from(price: f64, reference: f64) -> f64 {
    safe_divide(price - reference, reference, 0.0) * 100.0
}

/// Total order for finite prices; NaN sorts as equal
pub fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}
