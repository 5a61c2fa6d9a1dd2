// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Interval post-processing stages run after the window scan.

use crate::trim::BoundaryTrimmer;
use crate::window::RangeRule;
use ssd_core::{Interval, SsdError, ThresholdSet};

/// Knobs for the gap-merge, trim and block-expansion stages.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergeConfig {
    /// Refuse gap merges between intervals sitting at different levels.
    pub level_guard: bool,
    /// Gap tolerance as a fraction of `min_len`.
    pub gap_ratio: f64,
    /// Scale applied to `abs_thr`/`rel_thr` for the edge trim.
    pub trim_scale: f64,
    /// Per-side block expansion budget as a fraction of `min_len`.
    pub block_expand_ratio: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            level_guard: true,
            gap_ratio: 0.15,
            trim_scale: 0.7,
            block_expand_ratio: 0.5,
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<(), SsdError> {
        for (name, value) in [
            ("gap_ratio", self.gap_ratio),
            ("trim_scale", self.trim_scale),
            ("block_expand_ratio", self.block_expand_ratio),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SsdError::invalid_input(format!(
                    "MergeConfig.{name} must be finite and >= 0; got {value}"
                )));
            }
        }
        Ok(())
    }

    /// `max(1, floor(gap_ratio * min_len))`.
    pub fn gap_tolerance(&self, min_len: usize) -> usize {
        ((self.gap_ratio * min_len as f64).floor() as usize).max(1)
    }

    pub fn max_block_expand(&self, min_len: usize) -> usize {
        (self.block_expand_ratio * min_len as f64).floor() as usize
    }
}

/// Cumulative sums for O(1) interval means.
#[derive(Clone, Debug)]
pub struct PrefixSums {
    sums: Vec<f64>,
}

impl PrefixSums {
    pub fn new(values: &[f64]) -> Self {
        let mut sums = Vec::with_capacity(values.len() + 1);
        let mut acc = 0.0;
        sums.push(acc);
        for v in values {
            acc += v;
            sums.push(acc);
        }
        Self { sums }
    }

    pub fn mean(&self, interval: &Interval) -> f64 {
        let total = self.sums[interval.end + 1] - self.sums[interval.start];
        total / interval.len() as f64
    }
}

/// Rejects merges between intervals whose means differ by more than the
/// calibrated range tolerance.
#[derive(Clone, Copy, Debug)]
pub struct LevelGuard<'a> {
    pub prefix: &'a PrefixSums,
    pub abs_thr: f64,
    pub rel_thr: f64,
}

impl LevelGuard<'_> {
    pub fn compatible(&self, a: &Interval, b: &Interval) -> bool {
        let mean_a = self.prefix.mean(a);
        let mean_b = self.prefix.mean(b);
        let tolerance = self
            .abs_thr
            .max(self.rel_thr * mean_a.abs().max(mean_b.abs()));
        (mean_a - mean_b).abs() <= tolerance
    }
}

/// Sorts by start, fuses neighbours separated by at most `max_gap` samples and
/// drops results shorter than `min_len`.
///
/// Overlapping and touching neighbours count as gap 0. With a guard, a pair
/// the guard rejects is left unmerged.
pub fn merge_close_intervals(
    intervals: &[Interval],
    max_gap: usize,
    min_len: usize,
    guard: Option<&LevelGuard<'_>>,
) -> Vec<Interval> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|iv| iv.start);

    let mut merged = Vec::with_capacity(sorted.len());
    let mut iter = sorted.into_iter();
    let Some(mut current) = iter.next() else {
        return merged;
    };

    for next in iter {
        let close = next.start <= current.end.saturating_add(max_gap).saturating_add(1);
        if close && guard.is_none_or(|g| g.compatible(&current, &next)) {
            current.end = current.end.max(next.end);
        } else {
            if current.len() >= min_len {
                merged.push(current);
            }
            current = next;
        }
    }
    if current.len() >= min_len {
        merged.push(current);
    }
    merged
}

/// Splits overlapping neighbours at the midpoint of the overlap.
///
/// When only one side of a split is non-empty the pair collapses to it; when
/// neither is, the longer original survives. Output is sorted and strictly
/// non-overlapping.
pub fn resolve_overlaps(intervals: &[Interval]) -> Vec<Interval> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|iv| iv.start);

    let mut adjusted: Vec<Interval> = Vec::with_capacity(sorted.len());
    for current in sorted {
        let Some(prev) = adjusted.last_mut() else {
            adjusted.push(current);
            continue;
        };
        if current.start > prev.end {
            adjusted.push(current);
            continue;
        }

        let midpoint = (prev.end + current.start) / 2;
        let prev_valid = midpoint >= prev.start;
        let current_valid = midpoint < current.end;
        match (prev_valid, current_valid) {
            (true, true) => {
                prev.end = midpoint;
                adjusted.push(Interval {
                    start: midpoint + 1,
                    end: current.end,
                });
            }
            (true, false) => prev.end = midpoint,
            (false, true) => {
                *prev = Interval {
                    start: midpoint + 1,
                    end: current.end,
                };
            }
            (false, false) => {
                if current.len() > prev.len() {
                    *prev = current;
                }
            }
        }
    }
    adjusted
}

/// Trims every interval with `scale`-reduced range thresholds and drops those
/// that end up shorter than `min_len`.
pub fn trim_intervals(
    values: &[f64],
    intervals: &[Interval],
    thresholds: &ThresholdSet,
    scale: f64,
) -> Vec<Interval> {
    let scaled = thresholds.scaled_range(scale);
    let trimmer = BoundaryTrimmer::new(scaled.rel_thr, scaled.abs_thr);
    intervals
        .iter()
        .map(|iv| trimmer.trim(values, *iv).interval)
        .filter(|iv| iv.len() >= thresholds.min_len)
        .collect()
}

/// Whether the list is fragmented enough to warrant block grouping: at least
/// three intervals with a mean length below `2 * min_len`.
pub fn needs_block_grouping(intervals: &[Interval], min_len: usize) -> bool {
    if intervals.len() < 3 {
        return false;
    }
    let total: usize = intervals.iter().map(Interval::len).sum();
    (total as f64 / intervals.len() as f64) < 2.0 * min_len as f64
}

/// `min(max(floor(0.2 * min_len), floor(0.005 * n), 50), floor(0.5 * n))`.
pub fn block_group_gap(min_len: usize, n: usize) -> usize {
    let by_len = (0.2 * min_len as f64).floor() as usize;
    let by_n = (0.005 * n as f64).floor() as usize;
    by_len.max(by_n).max(50).min(n / 2)
}

/// Groups sorted intervals whose gaps are at most `max_gap` into blocks that
/// span their members.
pub fn group_into_blocks(intervals: &[Interval], max_gap: usize) -> Vec<Interval> {
    merge_close_intervals(intervals, max_gap, 1, None)
}

#[derive(Clone, Copy)]
struct BlockStats {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl BlockStats {
    fn of(window: &[f64]) -> Self {
        window.iter().fold(
            Self {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                sum: 0.0,
                count: 0,
            },
            |acc, &v| acc.with(v),
        )
    }

    fn with(self, v: f64) -> Self {
        Self {
            min: self.min.min(v),
            max: self.max.max(v),
            sum: self.sum + v,
            count: self.count + 1,
        }
    }

    fn stable(&self, abs_thr: f64, rel_thr: f64) -> bool {
        let mean = self.sum / self.count as f64;
        RangeRule::Either.accepts(self.max - self.min, mean, abs_thr, rel_thr)
    }
}

/// Grows each block outwards, one sample at a time and at most `max_expand`
/// samples per side, while the enlarged block's range stays within the
/// absolute or relative tolerance.
///
/// Expansion stops at neighbouring blocks, so sorted non-overlapping input
/// stays sorted and non-overlapping. A block that would end up shorter than
/// `min_len` keeps its original bounds.
pub fn expand_block_edges(
    values: &[f64],
    blocks: &[Interval],
    max_expand: usize,
    abs_thr: f64,
    rel_thr: f64,
    min_len: usize,
) -> Vec<Interval> {
    let n = values.len();
    let mut expanded: Vec<Interval> = Vec::with_capacity(blocks.len());

    for (idx, block) in blocks.iter().enumerate() {
        let Some(window) = values.get(block.start..=block.end) else {
            expanded.push(*block);
            continue;
        };
        let lower = expanded.last().map_or(0, |prev| prev.end + 1);
        let upper = blocks
            .get(idx + 1)
            .map_or(n.saturating_sub(1), |next| next.start.saturating_sub(1));

        let mut stats = BlockStats::of(window);
        let mut start = block.start;
        let mut end = block.end;

        for _ in 0..max_expand {
            if start == 0 || start - 1 < lower {
                break;
            }
            let candidate = stats.with(values[start - 1]);
            if !candidate.stable(abs_thr, rel_thr) {
                break;
            }
            stats = candidate;
            start -= 1;
        }

        for _ in 0..max_expand {
            if end + 1 > upper || end + 1 >= n {
                break;
            }
            let candidate = stats.with(values[end + 1]);
            if !candidate.stable(abs_thr, rel_thr) {
                break;
            }
            stats = candidate;
            end += 1;
        }

        let grown = Interval { start, end };
        if grown.len() >= min_len {
            expanded.push(grown);
        } else {
            expanded.push(*block);
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::{
        LevelGuard, MergeConfig, PrefixSums, block_group_gap, expand_block_edges,
        group_into_blocks, merge_close_intervals, needs_block_grouping, resolve_overlaps,
        trim_intervals,
    };
    use ssd_core::{Interval, ThresholdSet, validate_intervals};

    fn iv(start: usize, end: usize) -> Interval {
        Interval::new(start, end).expect("test interval should be valid")
    }

    #[test]
    fn config_defaults_and_validation() {
        let config = MergeConfig::default();
        config.validate().expect("default config is valid");
        assert_eq!(config.gap_tolerance(50), 7);
        assert_eq!(config.gap_tolerance(3), 1);
        assert_eq!(config.max_block_expand(51), 25);

        let bad = MergeConfig {
            trim_scale: f64::NAN,
            ..MergeConfig::default()
        };
        let err = bad.validate().expect_err("NaN scale must fail");
        assert!(err.to_string().contains("trim_scale"));
    }

    #[test]
    fn prefix_sums_give_interval_means() {
        let prefix = PrefixSums::new(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(prefix.mean(&iv(0, 3)), 2.5);
        assert_eq!(prefix.mean(&iv(2, 2)), 3.0);
    }

    #[test]
    fn merges_small_gaps_and_drops_short_results() {
        let intervals = [iv(30, 39), iv(0, 9), iv(12, 20), iv(60, 62)];
        let merged = merge_close_intervals(&intervals, 2, 5, None);
        assert_eq!(merged, vec![iv(0, 20), iv(30, 39)]);
    }

    #[test]
    fn gap_merge_boundary_is_inclusive() {
        // gap of exactly max_gap merges, one more does not.
        assert_eq!(
            merge_close_intervals(&[iv(0, 9), iv(13, 20)], 3, 1, None),
            vec![iv(0, 20)]
        );
        assert_eq!(
            merge_close_intervals(&[iv(0, 9), iv(14, 20)], 3, 1, None),
            vec![iv(0, 9), iv(14, 20)]
        );
        assert!(merge_close_intervals(&[], 3, 1, None).is_empty());
    }

    #[test]
    fn level_guard_keeps_plateaus_apart() {
        let mut values = vec![10.0; 20];
        values.extend(std::iter::repeat_n(20.0, 20));
        values.extend(std::iter::repeat_n(20.05, 20));
        let prefix = PrefixSums::new(&values);
        let guard = LevelGuard {
            prefix: &prefix,
            abs_thr: 0.2,
            rel_thr: 0.01,
        };
        let intervals = [iv(0, 19), iv(20, 39), iv(40, 59)];
        let merged = merge_close_intervals(&intervals, 5, 1, Some(&guard));
        assert_eq!(merged, vec![iv(0, 19), iv(20, 59)]);

        let unguarded = merge_close_intervals(&intervals, 5, 1, None);
        assert_eq!(unguarded, vec![iv(0, 59)]);
    }

    #[test]
    fn overlaps_split_at_midpoint() {
        let resolved = resolve_overlaps(&[iv(0, 20), iv(10, 30)]);
        assert_eq!(resolved, vec![iv(0, 15), iv(16, 30)]);
        validate_intervals(31, &resolved).expect("resolved list is valid");
    }

    #[test]
    fn overlap_collapses_to_surviving_side() {
        // midpoint 10 leaves nothing of [10, 10] on the right.
        assert_eq!(resolve_overlaps(&[iv(0, 10), iv(10, 10)]), vec![iv(0, 10)]);
        // A contained interval vanishes and the container is cut at the midpoint.
        assert_eq!(resolve_overlaps(&[iv(0, 30), iv(5, 8)]), vec![iv(0, 17)]);
    }

    #[test]
    fn non_overlapping_input_is_unchanged() {
        let intervals = vec![iv(0, 4), iv(5, 9), iv(20, 25)];
        assert_eq!(resolve_overlaps(&intervals), intervals);
    }

    #[test]
    fn trim_stage_drops_intervals_below_min_len() {
        let mut values = vec![10.0; 40];
        values[..3].copy_from_slice(&[12.0, 11.5, 11.0]);
        let strict = ThresholdSet::new(1.0, 0.05, 38, 1.0).expect("thresholds");
        assert!(trim_intervals(&values, &[iv(0, 39)], &strict, 0.7).is_empty());

        let loose = ThresholdSet::new(1.0, 0.05, 30, 1.0).expect("thresholds");
        let kept = trim_intervals(&values, &[iv(0, 39)], &loose, 0.7);
        assert_eq!(kept, vec![iv(3, 39)]);
    }

    #[test]
    fn block_grouping_heuristics() {
        assert!(!needs_block_grouping(&[iv(0, 9), iv(20, 29)], 10));
        assert!(needs_block_grouping(&[iv(0, 9), iv(20, 29), iv(40, 49)], 10));
        assert!(!needs_block_grouping(&[iv(0, 29), iv(40, 69), iv(80, 109)], 10));

        assert_eq!(block_group_gap(100, 1_000), 50);
        assert_eq!(block_group_gap(1_000, 100_000), 500);
        assert_eq!(block_group_gap(100, 60), 30);

        let blocks = group_into_blocks(&[iv(0, 9), iv(30, 39), iv(200, 210)], 50);
        assert_eq!(blocks, vec![iv(0, 39), iv(200, 210)]);
    }

    #[test]
    fn block_expansion_stops_at_unstable_samples_and_neighbours() {
        let mut values = vec![50.0; 100];
        for v in values.iter_mut().take(40).skip(20) {
            *v = 10.0;
        }
        for v in values.iter_mut().take(70).skip(45) {
            *v = 10.0;
        }
        let blocks = [iv(25, 34), iv(50, 60)];
        let expanded = expand_block_edges(&values, &blocks, 10, 0.5, 0.01, 5);
        assert_eq!(expanded, vec![iv(20, 39), iv(45, 69)]);
        validate_intervals(values.len(), &expanded).expect("expanded blocks stay valid");

        let budget_limited = expand_block_edges(&values, &blocks, 2, 0.5, 0.01, 5);
        assert_eq!(budget_limited, vec![iv(23, 36), iv(48, 62)]);
    }

    #[test]
    fn block_expansion_never_crosses_neighbours() {
        let values = vec![1.0; 40];
        let blocks = [iv(5, 10), iv(14, 20), iv(30, 32)];
        let expanded = expand_block_edges(&values, &blocks, 100, 1.0, 0.1, 1);
        validate_intervals(values.len(), &expanded).expect("expanded blocks stay valid");
        assert_eq!(expanded[0], iv(0, 13));
        assert_eq!(expanded[1].start, 14);
        assert_eq!(expanded[2].end, 39);
    }
}
