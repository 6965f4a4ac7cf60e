//! Latency outlier analysis over a peer's neighbor set.
//!
//! A neighbor whose link latency sits well above the mean of the others is
//! the cheapest one to lose. The z-score threshold is applied to the
//! high-latency tail only; low-latency links are never trim candidates.

use std::collections::BTreeMap;

/// Default z-score at or above which a neighbor is a trim candidate.
pub const DEFAULT_TRIM_THRESHOLD: f64 = 1.0;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator). `None` below two values.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// peer id → z-score of its latency against the whole set.
///
/// Empty when the set has fewer than two entries or zero spread.
pub fn z_scores(latencies: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let values: Vec<f64> = latencies.values().copied().collect();
    let (Some(avg), Some(sd)) = (mean(&values), sample_std_dev(&values)) else {
        return BTreeMap::new();
    };
    if sd == 0.0 || !sd.is_finite() {
        return BTreeMap::new();
    }
    latencies
        .iter()
        .map(|(id, w)| (id.clone(), (w - avg) / sd))
        .collect()
}

/// Neighbors with `z >= threshold`, slowest outlier first.
pub fn trim_candidates(latencies: &BTreeMap<String, f64>, threshold: f64) -> Vec<(String, f64)> {
    let mut candidates: Vec<(String, f64)> = z_scores(latencies)
        .into_iter()
        .filter(|(_, z)| *z >= threshold)
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    candidates
}
