// src/utils/stats.rs
//! Small statistics helpers shared by waveform aggregation and the
//! voltage-optimization probes.

/// Arithmetic mean; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0.0 for fewer than two samples.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Relative deviation in percent: 100 * sigma / |mean|; 0.0 when the mean is 0.
pub fn percent_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    100.0 * std_dev(values) / m.abs()
}

/// Robust lower/upper bounds as mean -/+ `sigma` standard deviations.
///
/// The lower bound is floored at `floor` so downstream ratios never divide
/// by zero or flip sign on a noisy probe.
pub fn sigma_bounds(values: &[f64], sigma: f64, floor: f64) -> (f64, f64) {
    let m = mean(values);
    let s = std_dev(values);
    ((m - sigma * s).max(floor), (m + sigma * s).max(floor))
}
