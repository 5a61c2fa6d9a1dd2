// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::merge::merge_close_intervals;
use ssd_core::{Interval, SsdError, coverage};

/// Coverage target and merge aggressiveness for `large_coverage` mode.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoveragePolicy {
    pub target_coverage: f64,
    /// Phase 1 gap cap as a fraction of `n`.
    pub max_merge_gap_ratio: f64,
    /// Phase 2 gap cap as a fraction of `n`.
    pub aggressive_merge_gap_ratio: f64,
    /// Phase 3 per-side expansion relative to the typical interval length.
    pub expand_ratio_for_coverage: f64,
    /// Effective sensitivity at or above which the target is reduced.
    pub high_sensitivity_cutoff: f64,
    pub high_sensitivity_scale: f64,
    pub min_target: f64,
}

impl Default for CoveragePolicy {
    fn default() -> Self {
        Self {
            target_coverage: 0.90,
            max_merge_gap_ratio: 0.02,
            aggressive_merge_gap_ratio: 0.10,
            expand_ratio_for_coverage: 1.0,
            high_sensitivity_cutoff: 1.0,
            high_sensitivity_scale: 0.6,
            min_target: 0.2,
        }
    }
}

impl CoveragePolicy {
    pub fn validate(&self) -> Result<(), SsdError> {
        for (name, value) in [
            ("target_coverage", self.target_coverage),
            ("high_sensitivity_scale", self.high_sensitivity_scale),
            ("min_target", self.min_target),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(SsdError::invalid_input(format!(
                    "CoveragePolicy.{name} must be within [0, 1]; got {value}"
                )));
            }
        }
        for (name, value) in [
            ("max_merge_gap_ratio", self.max_merge_gap_ratio),
            ("aggressive_merge_gap_ratio", self.aggressive_merge_gap_ratio),
            ("expand_ratio_for_coverage", self.expand_ratio_for_coverage),
            ("high_sensitivity_cutoff", self.high_sensitivity_cutoff),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SsdError::invalid_input(format!(
                    "CoveragePolicy.{name} must be finite and >= 0; got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Coverage the merge phases aim for at the given effective sensitivity.
    pub fn merge_target(&self, effective_sensitivity: f64) -> f64 {
        if effective_sensitivity >= self.high_sensitivity_cutoff {
            self.min_target
                .max(self.target_coverage * self.high_sensitivity_scale)
        } else {
            self.target_coverage
        }
    }
}

/// `max(0.2, 1 / effective_sensitivity)`.
pub fn sensitivity_factor(effective_sensitivity: f64) -> f64 {
    (1.0 / effective_sensitivity).max(0.2)
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoveragePhase {
    Conservative,
    Aggressive,
    Expand,
}

impl CoveragePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "coverage_conservative",
            Self::Aggressive => "coverage_aggressive",
            Self::Expand => "coverage_expand",
        }
    }
}

/// Coverage reached after one merge phase.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseCoverage {
    pub phase: CoveragePhase,
    pub coverage: f64,
    pub intervals: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CoverageMergeOutcome {
    pub intervals: Vec<Interval>,
    pub merge_target: f64,
    /// Phases that ran, in order. Coverage never decreases along this list.
    pub phases: Vec<PhaseCoverage>,
}

/// Merges the smallest-gap neighbours while coverage is below `target` and the
/// gap stays within `max_gap`. Ties go to the leftmost pair.
fn merge_smallest_gaps(intervals: &mut Vec<Interval>, n: usize, target: f64, max_gap: usize) {
    while coverage(intervals, n) < target && intervals.len() > 1 {
        let mut best: Option<(usize, usize)> = None;
        for (idx, pair) in intervals.windows(2).enumerate() {
            let gap = pair[0].gap_to(&pair[1]);
            if best.is_none_or(|(best_gap, _)| gap < best_gap) {
                best = Some((gap, idx));
            }
        }
        let Some((gap, idx)) = best else {
            break;
        };
        if gap > max_gap {
            break;
        }
        let end = intervals[idx + 1].end;
        intervals[idx].end = end;
        intervals.remove(idx + 1);
    }
}

/// Coverage-driven merge for sorted, non-overlapping intervals over `n` samples.
///
/// Runs only while coverage is below the policy's merge target: a conservative
/// gap merge, then an aggressive one, then uniform edge expansion with fusing
/// of touching intervals.
pub fn coverage_merge(
    intervals: &[Interval],
    n: usize,
    policy: &CoveragePolicy,
    effective_sensitivity: f64,
) -> CoverageMergeOutcome {
    let merge_target = policy.merge_target(effective_sensitivity);
    let mut current = intervals.to_vec();
    current.sort_by_key(|iv| iv.start);
    let mut phases = Vec::new();

    if current.is_empty() || n == 0 || coverage(&current, n) >= merge_target {
        return CoverageMergeOutcome {
            intervals: current,
            merge_target,
            phases,
        };
    }

    let factor = sensitivity_factor(effective_sensitivity);
    let gap_cap = |ratio: f64| ((ratio * n as f64 * factor).floor() as usize).max(1);

    let mut record = |phase: CoveragePhase, list: &[Interval]| {
        phases.push(PhaseCoverage {
            phase,
            coverage: coverage(list, n),
            intervals: list.len(),
        });
    };

    merge_smallest_gaps(
        &mut current,
        n,
        merge_target,
        gap_cap(policy.max_merge_gap_ratio),
    );
    record(CoveragePhase::Conservative, &current);

    if coverage(&current, n) < merge_target {
        merge_smallest_gaps(
            &mut current,
            n,
            merge_target,
            gap_cap(policy.aggressive_merge_gap_ratio),
        );
        record(CoveragePhase::Aggressive, &current);
    }

    if coverage(&current, n) < merge_target {
        let total: usize = current.iter().map(Interval::len).sum();
        let avg_len = total / current.len();
        let base = avg_len.max((0.01 * n as f64).floor() as usize) as f64;
        let expand = ((policy.expand_ratio_for_coverage * base * factor).floor() as usize).max(1);
        let grown: Vec<Interval> = current
            .iter()
            .map(|iv| Interval {
                start: iv.start.saturating_sub(expand),
                end: (iv.end + expand).min(n - 1),
            })
            .collect();
        current = merge_close_intervals(&grown, 0, 1, None);
        record(CoveragePhase::Expand, &current);
    }

    tracing::debug!(
        merge_target,
        phases = phases.len(),
        intervals = current.len(),
        "coverage merge finished"
    );

    CoverageMergeOutcome {
        intervals: current,
        merge_target,
        phases,
    }
}

#[cfg(test)]
mod tests {
    use super::{CoveragePhase, CoveragePolicy, coverage_merge, sensitivity_factor};
    use ssd_core::{Interval, coverage, validate_intervals};

    fn iv(start: usize, end: usize) -> Interval {
        Interval::new(start, end).expect("test interval should be valid")
    }

    #[test]
    fn policy_defaults_and_targets() {
        let policy = CoveragePolicy::default();
        policy.validate().expect("default policy is valid");
        assert_eq!(policy.merge_target(0.5), 0.90);
        assert!((policy.merge_target(1.0) - 0.54).abs() < 1e-12);
        let tiny = CoveragePolicy {
            target_coverage: 0.1,
            ..CoveragePolicy::default()
        };
        assert_eq!(tiny.merge_target(2.0), 0.2);

        assert_eq!(sensitivity_factor(0.5), 2.0);
        assert_eq!(sensitivity_factor(10.0), 0.2);
    }

    #[test]
    fn policy_rejects_bad_values() {
        let bad = CoveragePolicy {
            target_coverage: 1.5,
            ..CoveragePolicy::default()
        };
        assert!(bad.validate().is_err());
        let bad = CoveragePolicy {
            aggressive_merge_gap_ratio: -0.1,
            ..CoveragePolicy::default()
        };
        let err = bad.validate().expect_err("negative ratio must fail");
        assert!(err.to_string().contains("aggressive_merge_gap_ratio"));
    }

    #[test]
    fn already_covered_input_is_untouched() {
        let intervals = vec![iv(0, 95)];
        let out = coverage_merge(&intervals, 100, &CoveragePolicy::default(), 0.5);
        assert_eq!(out.intervals, intervals);
        assert!(out.phases.is_empty());
    }

    #[test]
    fn conservative_phase_merges_smallest_gap_first() {
        // n = 1000, effective_s = 0.5 -> factor 2, phase 1 cap = 40.
        let intervals = vec![iv(0, 279), iv(330, 599), iv(610, 849), iv(900, 999)];
        let out = coverage_merge(&intervals, 1_000, &CoveragePolicy::default(), 0.5);
        assert_eq!(out.phases.len(), 1);
        assert_eq!(out.phases[0].phase, CoveragePhase::Conservative);
        assert_eq!(out.intervals, vec![iv(0, 279), iv(330, 849), iv(900, 999)]);
        assert!((out.phases[0].coverage - 0.90).abs() < 1e-12);
    }

    #[test]
    fn tie_breaks_to_leftmost_pair() {
        // Both gaps are 5; phase 1 cap is 1, phase 2 cap is 8.
        let intervals = vec![iv(0, 9), iv(15, 24), iv(30, 39)];
        let policy = CoveragePolicy {
            target_coverage: 0.80,
            ..CoveragePolicy::default()
        };
        let out = coverage_merge(&intervals, 40, &policy, 0.5);
        assert_eq!(out.intervals, vec![iv(0, 24), iv(30, 39)]);
        assert_eq!(out.phases.len(), 2);
    }

    #[test]
    fn all_phases_run_on_sparse_input_and_coverage_never_drops() {
        let intervals = vec![iv(100, 149), iv(2_000, 2_049), iv(6_000, 6_049)];
        let n = 10_000;
        let out = coverage_merge(&intervals, n, &CoveragePolicy::default(), 0.5);
        let phases: Vec<CoveragePhase> = out.phases.iter().map(|p| p.phase).collect();
        assert_eq!(
            phases,
            vec![
                CoveragePhase::Conservative,
                CoveragePhase::Aggressive,
                CoveragePhase::Expand
            ]
        );
        let mut last = coverage(&intervals, n);
        for phase in &out.phases {
            assert!(phase.coverage + 1e-12 >= last, "{:?}", out.phases);
            last = phase.coverage;
        }
        validate_intervals(n, &out.intervals).expect("output stays valid");
    }

    #[test]
    fn expansion_is_clipped_to_series_bounds() {
        let intervals = vec![iv(0, 4), iv(95, 99)];
        let policy = CoveragePolicy {
            max_merge_gap_ratio: 0.0,
            aggressive_merge_gap_ratio: 0.0,
            expand_ratio_for_coverage: 1.0,
            ..CoveragePolicy::default()
        };
        let out = coverage_merge(&intervals, 100, &policy, 0.5);
        validate_intervals(100, &out.intervals).expect("output stays valid");
        assert_eq!(out.intervals.first().map(|iv| iv.start), Some(0));
        assert_eq!(out.intervals.last().map(|iv| iv.end), Some(99));
        assert_eq!(out.intervals, vec![iv(0, 14), iv(85, 99)]);
    }

    #[test]
    fn empty_input_runs_no_phase() {
        let out = coverage_merge(&[], 100, &CoveragePolicy::default(), 0.5);
        assert!(out.intervals.is_empty());
        assert!(out.phases.is_empty());
    }
}
