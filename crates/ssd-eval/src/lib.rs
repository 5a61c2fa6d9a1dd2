// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ssd_core::{Interval, NUMERIC_EPSILON, SsdError, validate_intervals};

/// Default ratio between the steady-state load and the ideal load.
pub const DEFAULT_ADJUSTMENT_RATIO: f64 = 1.2;

/// Summary statistics of the samples inside one interval.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntervalStats {
    pub interval: Interval,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// `std / |mean|`, or 0 when the mean is numerically zero.
    pub cv: f64,
}

/// Point-level agreement between detected and reference intervals.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlapMetrics {
    pub true_positive_points: usize,
    pub false_positive_points: usize,
    pub false_negative_points: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Intersection over union of the covered points.
    pub jaccard: f64,
}

/// Boundary matching summary under a position tolerance.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Per-interval statistics. Intervals must lie inside the series.
pub fn interval_stats(
    values: &[f64],
    intervals: &[Interval],
) -> Result<Vec<IntervalStats>, SsdError> {
    intervals
        .iter()
        .map(|interval| {
            let window = values.get(interval.start..=interval.end).ok_or_else(|| {
                SsdError::invalid_input(format!(
                    "interval [{}, {}] exceeds series bounds: n={}",
                    interval.start,
                    interval.end,
                    values.len()
                ))
            })?;
            let len = window.len() as f64;
            let mean = window.iter().sum::<f64>() / len;
            let var = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / len;
            let std = var.sqrt();
            let (min, max) = window
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            let cv = if mean.abs() > NUMERIC_EPSILON {
                std / mean.abs()
            } else {
                0.0
            };
            Ok(IntervalStats {
                interval: *interval,
                mean,
                std,
                min,
                max,
                cv,
            })
        })
        .collect()
}

/// Pooled mean of every sample inside `intervals`.
///
/// Intervals outside the series are skipped. Without usable intervals the
/// whole-series mean is returned; `None` only for an empty series.
pub fn interval_average(values: &[f64], intervals: &[Interval]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let (sum, count) = intervals
        .iter()
        .filter_map(|iv| values.get(iv.start..=iv.end))
        .fold((0.0, 0usize), |(sum, count), window| {
            (sum + window.iter().sum::<f64>(), count + window.len())
        });
    if count > 0 {
        Some(sum / count as f64)
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Ideal load estimate: [`interval_average`] scaled by `adjustment_ratio`.
pub fn ideal_value(
    values: &[f64],
    intervals: &[Interval],
    adjustment_ratio: f64,
) -> Result<Option<f64>, SsdError> {
    if !adjustment_ratio.is_finite() || adjustment_ratio <= 0.0 {
        return Err(SsdError::invalid_input(format!(
            "adjustment_ratio must be finite and > 0; got {adjustment_ratio}"
        )));
    }
    Ok(interval_average(values, intervals).map(|avg| avg * adjustment_ratio))
}

fn with_label(err: SsdError, label: &str) -> SsdError {
    match err {
        SsdError::InvalidInput(msg) => SsdError::invalid_input(format!("{label}: {msg}")),
        other => other,
    }
}

fn coverage_mask(intervals: &[Interval], n: usize) -> Vec<bool> {
    let mut mask = vec![false; n];
    for iv in intervals {
        for slot in &mut mask[iv.start..=iv.end] {
            *slot = true;
        }
    }
    mask
}

/// Point-level precision, recall, F1 and Jaccard index of `detected` against
/// `reference` over an `n`-sample series.
///
/// Both lists must be valid (sorted, non-overlapping, in bounds). Two empty
/// lists agree perfectly.
pub fn overlap_metrics(
    detected: &[Interval],
    reference: &[Interval],
    n: usize,
) -> Result<OverlapMetrics, SsdError> {
    validate_intervals(n, detected).map_err(|err| with_label(err, "detected intervals"))?;
    validate_intervals(n, reference).map_err(|err| with_label(err, "reference intervals"))?;

    let detected_mask = coverage_mask(detected, n);
    let reference_mask = coverage_mask(reference, n);
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (&d, &r) in detected_mask.iter().zip(&reference_mask) {
        match (d, r) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }

    if tp + fp + fn_ == 0 {
        return Ok(OverlapMetrics {
            true_positive_points: 0,
            false_positive_points: 0,
            false_negative_points: 0,
            precision: 1.0,
            recall: 1.0,
            f1: 1.0,
            jaccard: 1.0,
        });
    }

    let precision = rate(tp, tp + fp);
    let recall = rate(tp, tp + fn_);
    Ok(OverlapMetrics {
        true_positive_points: tp,
        false_positive_points: fp,
        false_negative_points: fn_,
        precision,
        recall,
        f1: harmonic_mean(precision, recall),
        jaccard: rate(tp, tp + fp + fn_),
    })
}

/// Precision/recall/F1 over interval boundaries (starts and ends) with
/// one-to-one matching within `tolerance` samples.
pub fn boundary_f1(
    detected: &[Interval],
    reference: &[Interval],
    tolerance: usize,
) -> BoundaryMetrics {
    let detected_b = boundaries(detected);
    let reference_b = boundaries(reference);
    let true_positives = count_tolerance_matches(&detected_b, &reference_b, tolerance);
    let false_positives = detected_b.len() - true_positives;
    let false_negatives = reference_b.len() - true_positives;

    if detected_b.is_empty() && reference_b.is_empty() {
        return BoundaryMetrics {
            true_positives,
            false_positives,
            false_negatives,
            precision: 1.0,
            recall: 1.0,
            f1: 1.0,
        };
    }

    let precision = rate(true_positives, detected_b.len());
    let recall = rate(true_positives, reference_b.len());
    BoundaryMetrics {
        true_positives,
        false_positives,
        false_negatives,
        precision,
        recall,
        f1: harmonic_mean(precision, recall),
    }
}

fn boundaries(intervals: &[Interval]) -> Vec<usize> {
    let mut points: Vec<usize> = intervals.iter().flat_map(|iv| [iv.start, iv.end]).collect();
    points.sort_unstable();
    points
}

fn count_tolerance_matches(detected: &[usize], truth: &[usize], tolerance: usize) -> usize {
    let mut i = 0usize;
    let mut j = 0usize;
    let mut matches = 0usize;

    while i < detected.len() && j < truth.len() {
        let d = detected[i];
        let t = truth[j];
        if d.abs_diff(t) <= tolerance {
            matches += 1;
            i += 1;
            j += 1;
        } else if d < t {
            i += 1;
        } else {
            j += 1;
        }
    }

    matches
}

fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Evaluation utilities crate name helper.
pub fn crate_name() -> &'static str {
    "ssd-eval"
}
