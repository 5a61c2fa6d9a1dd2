// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ssd_core::Interval;

/// Mean magnitude below which relative deviation is treated as zero.
const REL_DEV_MEAN_FLOOR: f64 = 1.0e-10;

/// Result of trimming one interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrimOutcome {
    pub interval: Interval,
    /// Number of passes that moved a boundary.
    pub passes: usize,
}

/// Pulls interval edges inward to the outermost samples that sit close to the
/// interval mean.
///
/// A sample qualifies when its relative and absolute deviations from the mean
/// are both within half of `rel_thr` and `abs_thr`. Passes repeat until the
/// bounds stop moving, so a trimmed interval is a fixed point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryTrimmer {
    pub rel_thr: f64,
    pub abs_thr: f64,
}

impl BoundaryTrimmer {
    pub fn new(rel_thr: f64, abs_thr: f64) -> Self {
        Self { rel_thr, abs_thr }
    }

    pub fn trim(&self, values: &[f64], interval: Interval) -> TrimOutcome {
        let mut current = interval;
        let mut passes = 0usize;
        while let Some(next) = self.trim_once(values, current) {
            if next == current {
                break;
            }
            current = next;
            passes += 1;
        }
        TrimOutcome {
            interval: current,
            passes,
        }
    }

    /// One trimming pass; `None` when the interval is out of bounds.
    fn trim_once(&self, values: &[f64], interval: Interval) -> Option<Interval> {
        let window = values.get(interval.start..=interval.end)?;
        if interval.start == interval.end {
            return Some(interval);
        }

        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let rel_limit = 0.5 * self.rel_thr;
        let abs_limit = 0.5 * self.abs_thr;
        let qualifies = |v: f64| {
            let abs_dev = (v - mean).abs();
            let rel_dev = if mean.abs() > REL_DEV_MEAN_FLOOR {
                abs_dev / mean.abs()
            } else {
                0.0
            };
            rel_dev <= rel_limit && abs_dev <= abs_limit
        };

        let first = window.iter().position(|&v| qualifies(v));
        let last = window.iter().rposition(|&v| qualifies(v));
        match (first, last) {
            (Some(first), Some(last)) if first <= last => Some(Interval {
                start: interval.start + first,
                end: interval.start + last,
            }),
            _ => Some(interval),
        }
    }
}
