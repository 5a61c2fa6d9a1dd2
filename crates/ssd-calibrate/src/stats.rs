// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Order statistics used by the noise estimator and the run-length model.

/// Normal-consistency constant turning a MAD into a standard deviation estimate.
pub const NORMAL_CONSISTENCY: f64 = 1.4826;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let var = values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

fn percentile_of_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let q = q.clamp(0.0, 1.0);
    let pos = q * last as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Percentile with linear interpolation between closest ranks; `q` in `[0, 1]`.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    percentile_of_sorted(&sorted_copy(values), q)
}

/// Several percentiles from a single sort.
pub fn percentiles<const K: usize>(values: &[f64], qs: [f64; K]) -> Option<[f64; K]> {
    let sorted = sorted_copy(values);
    let mut out = [0.0; K];
    for (slot, q) in out.iter_mut().zip(qs) {
        *slot = percentile_of_sorted(&sorted, q)?;
    }
    Some(out)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sorted = sorted_copy(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) * 0.5)
    }
}

/// Median absolute deviation around the median (unscaled).
pub fn mad(values: &[f64]) -> Option<f64> {
    let center = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// First differences `y[i+1] - y[i]`.
pub fn diff(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|pair| pair[1] - pair[0]).collect()
}
