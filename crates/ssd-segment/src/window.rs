// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ssd_core::{ExecutionContext, Interval, NUMERIC_EPSILON, SsdError, ThresholdSet};
use std::collections::VecDeque;

const CANCEL_CHECK_EVERY: usize = 4096;

/// How the absolute and relative range tests combine.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RangeRule {
    /// Either test passing is enough.
    #[default]
    Either,
    /// Both tests must pass.
    Both,
}

impl RangeRule {
    /// Whether a window with `range` around `mean` passes the range tests.
    pub fn accepts(self, range: f64, mean: f64, abs_thr: f64, rel_thr: f64) -> bool {
        let within_abs = range <= abs_thr;
        let within_rel = range <= rel_thr * mean.abs().max(NUMERIC_EPSILON);
        match self {
            Self::Either => within_abs || within_rel,
            Self::Both => within_abs && within_rel,
        }
    }
}

/// Candidate intervals produced by one scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanOutcome {
    pub intervals: Vec<Interval>,
    /// Number of window starting positions examined.
    pub windows_evaluated: usize,
}

/// Greedy single-pass scanner growing stable windows from each start position.
#[derive(Clone, Copy, Debug)]
pub struct WindowExpander {
    thresholds: ThresholdSet,
    rule: RangeRule,
}

/// Min/max over a growing window plus the least-squares sums of `(x, y)` with
/// `x` the 1-based position inside the window.
#[derive(Default)]
struct WindowState {
    min_idx: VecDeque<usize>,
    max_idx: VecDeque<usize>,
    len: f64,
    sum_y: f64,
    sum_x: f64,
    sum_x2: f64,
    sum_xy: f64,
}

impl WindowState {
    fn reset(&mut self) {
        self.min_idx.clear();
        self.max_idx.clear();
        self.len = 0.0;
        self.sum_y = 0.0;
        self.sum_x = 0.0;
        self.sum_x2 = 0.0;
        self.sum_xy = 0.0;
    }

    fn push(&mut self, values: &[f64], idx: usize) {
        let y = values[idx];
        while self.min_idx.back().is_some_and(|&back| values[back] >= y) {
            self.min_idx.pop_back();
        }
        self.min_idx.push_back(idx);
        while self.max_idx.back().is_some_and(|&back| values[back] <= y) {
            self.max_idx.pop_back();
        }
        self.max_idx.push_back(idx);

        self.len += 1.0;
        let x = self.len;
        self.sum_y += y;
        self.sum_x += x;
        self.sum_x2 += x * x;
        self.sum_xy += x * y;
    }

    fn range(&self, values: &[f64]) -> f64 {
        match (self.max_idx.front(), self.min_idx.front()) {
            (Some(&hi), Some(&lo)) => values[hi] - values[lo],
            _ => 0.0,
        }
    }

    fn mean(&self) -> f64 {
        if self.len == 0.0 {
            0.0
        } else {
            self.sum_y / self.len
        }
    }

    fn slope(&self) -> f64 {
        let denom = self.len * self.sum_x2 - self.sum_x * self.sum_x;
        if denom.abs() <= NUMERIC_EPSILON {
            return 0.0;
        }
        ((self.len * self.sum_xy - self.sum_x * self.sum_y) / denom).abs()
    }
}

impl WindowExpander {
    pub fn new(thresholds: ThresholdSet, rule: RangeRule) -> Result<Self, SsdError> {
        thresholds.validate()?;
        Ok(Self { thresholds, rule })
    }

    pub fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    pub fn rule(&self) -> RangeRule {
        self.rule
    }

    fn is_stable(&self, state: &WindowState, values: &[f64]) -> bool {
        let t = &self.thresholds;
        self.rule
            .accepts(state.range(values), state.mean(), t.abs_thr, t.rel_thr)
            && state.slope() <= t.slope_thr
    }

    /// Scans `values` left to right. Emitted intervals are sorted,
    /// non-overlapping and at least `min_len` samples long.
    pub fn scan(
        &self,
        values: &[f64],
        ctx: &ExecutionContext<'_>,
    ) -> Result<ScanOutcome, SsdError> {
        let n = values.len();
        let min_len = self.thresholds.min_len;
        let mut intervals = Vec::new();
        let mut windows_evaluated = 0usize;
        let mut state = WindowState::default();

        let mut left = 0usize;
        while left < n {
            if windows_evaluated.is_multiple_of(CANCEL_CHECK_EVERY) {
                ctx.check_cancelled()?;
            }
            windows_evaluated += 1;

            state.reset();
            let mut right = left;
            while right < n {
                state.push(values, right);
                if !self.is_stable(&state, values) {
                    break;
                }
                right += 1;
            }

            if right - left >= min_len {
                intervals.push(Interval {
                    start: left,
                    end: right - 1,
                });
            }
            left = right.max(left + 1);
        }

        Ok(ScanOutcome {
            intervals,
            windows_evaluated,
        })
    }
}
