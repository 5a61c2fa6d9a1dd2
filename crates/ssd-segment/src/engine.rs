// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::coverage::{CoveragePolicy, coverage_merge};
use crate::merge::{
    LevelGuard, MergeConfig, PrefixSums, block_group_gap, expand_block_edges, group_into_blocks,
    merge_close_intervals, needs_block_grouping, resolve_overlaps, trim_intervals,
};
use crate::window::{RangeRule, WindowExpander};
use ssd_calibrate::{
    Calibration, CalibrationConfig, MIN_SAMPLES_FOR_NOISE, calibrate, effective_sensitivity,
};
use ssd_core::{
    Diagnostics, ExecutionContext, Interval, SeriesView, SsdError, ThresholdSet, coverage,
    validate_intervals,
};
use std::borrow::Cow;
use std::str::FromStr;
use std::time::Instant;

/// Sensitivity multiplier applied by [`Segmenter::segment_with_retry`].
pub const RETRY_SENSITIVITY_SCALE: f64 = 0.8;

/// Where the operating thresholds come from.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThresholdSource {
    /// Calibrated from the series on every call.
    Auto(CalibrationConfig),
    /// Supplied by the caller.
    Fixed(ThresholdSet),
}

impl Default for ThresholdSource {
    fn default() -> Self {
        Self::Auto(CalibrationConfig::default())
    }
}

/// Post-processing applied to the raw scan candidates.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IntervalMode {
    /// Every stable window the scanner finds.
    AllSmall,
    /// Merged, trimmed and coverage-optimized intervals.
    #[default]
    LargeCoverage,
}

impl IntervalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllSmall => "all_small",
            Self::LargeCoverage => "large_coverage",
        }
    }
}

impl FromStr for IntervalMode {
    type Err = SsdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all_small" | "all-small" => Ok(Self::AllSmall),
            "large_coverage" | "large-coverage" => Ok(Self::LargeCoverage),
            other => Err(SsdError::invalid_input(format!(
                "unsupported interval mode '{other}'; expected one of: all_small, large_coverage"
            ))),
        }
    }
}

/// Full configuration of one [`Segmenter`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SegmentationConfig {
    pub thresholds: ThresholdSource,
    pub mode: IntervalMode,
    pub range_rule: RangeRule,
    pub coverage: CoveragePolicy,
    pub merge: MergeConfig,
}

impl SegmentationConfig {
    /// Auto-calibrated thresholds returning raw scan candidates.
    pub fn all_small(sensitivity: f64) -> Result<Self, SsdError> {
        Ok(Self {
            thresholds: ThresholdSource::Auto(CalibrationConfig::new(sensitivity)?),
            mode: IntervalMode::AllSmall,
            ..Self::default()
        })
    }

    /// Caller thresholds, both range tests required, raw candidates returned.
    pub fn fixed(thresholds: ThresholdSet) -> Self {
        Self {
            thresholds: ThresholdSource::Fixed(thresholds),
            mode: IntervalMode::AllSmall,
            range_rule: RangeRule::Both,
            ..Self::default()
        }
    }

    /// Relative/absolute range thresholds with no trend bound.
    pub fn legacy_fixed(rel_thr: f64, abs_thr: f64, min_len: usize) -> Result<Self, SsdError> {
        Ok(Self::fixed(ThresholdSet::new(
            abs_thr,
            rel_thr,
            min_len,
            f64::INFINITY,
        )?))
    }

    pub fn with_sensitivity(mut self, sensitivity: f64) -> Self {
        self.thresholds = ThresholdSource::Auto(CalibrationConfig { sensitivity });
        self
    }

    pub fn with_mode(mut self, mode: IntervalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<(), SsdError> {
        match &self.thresholds {
            ThresholdSource::Auto(calibration) => calibration.validate()?,
            ThresholdSource::Fixed(thresholds) => thresholds.validate()?,
        }
        self.coverage.validate()?;
        self.merge.validate()
    }

    fn algorithm(&self) -> &'static str {
        match self.thresholds {
            ThresholdSource::Auto(_) => "adaptive_window",
            ThresholdSource::Fixed(_) => "fixed_window",
        }
    }
}

/// Outcome of one segmentation call.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentationResult {
    /// Sorted, non-overlapping, each at least `thresholds.min_len` long.
    pub intervals: Vec<Interval>,
    pub thresholds: ThresholdSet,
    /// Present when thresholds were auto-calibrated.
    pub calibration: Option<Calibration>,
    pub coverage: f64,
    /// Scanner output before any post-processing.
    pub raw_candidates: Vec<Interval>,
    pub diagnostics: Diagnostics,
}

/// Steady-state segmentation engine. Holds only its configuration.
#[derive(Clone, Debug)]
pub struct Segmenter {
    config: SegmentationConfig,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self {
            config: SegmentationConfig::default(),
        }
    }
}

impl Segmenter {
    pub fn new(config: SegmentationConfig) -> Result<Self, SsdError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Calibrates, scans and post-processes `series` per the configured mode.
    pub fn segment(
        &self,
        series: &SeriesView<'_>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<SegmentationResult, SsdError> {
        self.config.validate()?;
        ctx.check_cancelled()?;

        let started_at = Instant::now();
        let values = series.values();
        let n = values.len();

        let (thresholds, calibration, sensitivity) = match &self.config.thresholds {
            ThresholdSource::Auto(config) => {
                let calibration = calibrate(series, config)?;
                (
                    calibration.thresholds,
                    Some(calibration),
                    Some(calibration.effective_sensitivity),
                )
            }
            ThresholdSource::Fixed(thresholds) => (*thresholds, None, None),
        };

        let mut diagnostics = Diagnostics {
            n,
            algorithm: Cow::Borrowed(self.config.algorithm()),
            mode: Cow::Borrowed(self.config.mode.as_str()),
            thresholds: Some(thresholds),
            effective_sensitivity: sensitivity,
            ..Diagnostics::default()
        };
        diagnostics.notes.push(format!(
            "abs_thr={}, rel_thr={}, min_len={}, slope_thr={}",
            thresholds.abs_thr, thresholds.rel_thr, thresholds.min_len, thresholds.slope_thr
        ));
        if let Some(calibration) = &calibration {
            diagnostics
                .notes
                .push(format!("min_len_source={:?}", calibration.min_len_source));
        }

        let empty = |mut diagnostics: Diagnostics| {
            diagnostics.runtime_ms = Some(elapsed_ms(started_at));
            ctx.report_progress(1.0);
            SegmentationResult {
                intervals: vec![],
                thresholds,
                calibration,
                coverage: 0.0,
                raw_candidates: vec![],
                diagnostics,
            }
        };

        if n == 0 {
            diagnostics.notes.push("empty series".to_string());
            return Ok(empty(diagnostics));
        }
        if calibration.is_some() && n < MIN_SAMPLES_FOR_NOISE {
            diagnostics.warnings.push(format!(
                "series too short for auto calibration: n={n} < {MIN_SAMPLES_FOR_NOISE}"
            ));
            tracing::warn!(n, "series too short for auto calibration; returning no intervals");
            return Ok(empty(diagnostics));
        }

        let scanner = WindowExpander::new(thresholds, self.config.range_rule)?;
        let scan = scanner.scan(values, ctx)?;
        let raw_candidates = scan.intervals;
        diagnostics.push_stage("scan", raw_candidates.len(), coverage(&raw_candidates, n));
        diagnostics
            .notes
            .push(format!("windows_evaluated={}", scan.windows_evaluated));
        tracing::debug!(
            n,
            candidates = raw_candidates.len(),
            windows = scan.windows_evaluated,
            "window scan finished"
        );
        ctx.report_progress(0.5);
        ctx.check_cancelled()?;

        let intervals = match self.config.mode {
            IntervalMode::AllSmall => raw_candidates.clone(),
            IntervalMode::LargeCoverage => self.post_process(
                values,
                &raw_candidates,
                &thresholds,
                sensitivity.unwrap_or_else(|| effective_sensitivity(1.0)),
                &mut diagnostics,
            ),
        };

        validate_intervals(n, &intervals).map_err(|err| {
            SsdError::numerical_issue(format!("segmentation produced an invalid interval list: {err}"))
        })?;
        if let Some(short) = intervals.iter().find(|iv| iv.len() < thresholds.min_len) {
            return Err(SsdError::numerical_issue(format!(
                "segmentation produced [{}, {}] shorter than min_len={}",
                short.start, short.end, thresholds.min_len
            )));
        }

        let final_coverage = coverage(&intervals, n);
        let runtime_ms = elapsed_ms(started_at);
        ctx.record_scalar("segment.raw_candidates", raw_candidates.len() as f64);
        ctx.record_scalar("segment.final_intervals", intervals.len() as f64);
        ctx.record_scalar("segment.coverage", final_coverage);
        ctx.record_scalar("segment.runtime_ms", runtime_ms as f64);
        ctx.report_progress(1.0);

        diagnostics.runtime_ms = Some(runtime_ms);
        diagnostics.notes.push(format!(
            "final_intervals={}, coverage={final_coverage:.4}",
            intervals.len()
        ));
        tracing::debug!(
            intervals = intervals.len(),
            coverage = final_coverage,
            runtime_ms,
            "segmentation finished"
        );

        Ok(SegmentationResult {
            intervals,
            thresholds,
            calibration,
            coverage: final_coverage,
            raw_candidates,
            diagnostics,
        })
    }

    /// Runs [`Segmenter::segment`] and, when it finds nothing with
    /// auto-calibrated thresholds, runs once more at a lower sensitivity.
    pub fn segment_with_retry(
        &self,
        series: &SeriesView<'_>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<SegmentationResult, SsdError> {
        let first = self.segment(series, ctx)?;
        if !first.intervals.is_empty() || series.len() < MIN_SAMPLES_FOR_NOISE {
            return Ok(first);
        }
        let ThresholdSource::Auto(calibration) = self.config.thresholds else {
            return Ok(first);
        };

        let retry_sensitivity = calibration.sensitivity * RETRY_SENSITIVITY_SCALE;
        tracing::debug!(
            sensitivity = calibration.sensitivity,
            retry_sensitivity,
            "no intervals found; retrying at lower sensitivity"
        );
        let retry = Segmenter::new(self.config.with_sensitivity(retry_sensitivity))?;
        let mut second = retry.segment(series, ctx)?;
        second.diagnostics.retried = true;
        second.diagnostics.notes.push(format!(
            "retried: sensitivity {} found no intervals; used {retry_sensitivity}",
            calibration.sensitivity
        ));
        Ok(second)
    }

    fn post_process(
        &self,
        values: &[f64],
        raw: &[Interval],
        thresholds: &ThresholdSet,
        effective_s: f64,
        diagnostics: &mut Diagnostics,
    ) -> Vec<Interval> {
        let n = values.len();
        let min_len = thresholds.min_len;
        let merge = &self.config.merge;

        let prefix = PrefixSums::new(values);
        let guard = merge.level_guard.then_some(LevelGuard {
            prefix: &prefix,
            abs_thr: thresholds.abs_thr,
            rel_thr: thresholds.rel_thr,
        });
        let merged =
            merge_close_intervals(raw, merge.gap_tolerance(min_len), min_len, guard.as_ref());
        diagnostics.push_stage("gap_merge", merged.len(), coverage(&merged, n));

        let resolved = resolve_overlaps(&merged);
        diagnostics.push_stage("overlap", resolved.len(), coverage(&resolved, n));

        let trimmed = trim_intervals(values, &resolved, thresholds, merge.trim_scale);
        diagnostics.push_stage("trim", trimmed.len(), coverage(&trimmed, n));
        tracing::debug!(
            merged = merged.len(),
            resolved = resolved.len(),
            trimmed = trimmed.len(),
            "merge and trim stages finished"
        );

        let blocks = if needs_block_grouping(&trimmed, min_len) {
            let grouped = group_into_blocks(&trimmed, block_group_gap(min_len, n));
            let expanded = expand_block_edges(
                values,
                &grouped,
                merge.max_block_expand(min_len),
                thresholds.abs_thr,
                thresholds.rel_thr,
                min_len,
            );
            diagnostics.push_stage("blocks", expanded.len(), coverage(&expanded, n));
            tracing::debug!(blocks = expanded.len(), "grouped fragmented intervals into blocks");
            expanded
        } else {
            trimmed
        };

        let outcome = coverage_merge(&blocks, n, &self.config.coverage, effective_s);
        diagnostics
            .notes
            .push(format!("coverage_merge_target={:.4}", outcome.merge_target));
        for phase in &outcome.phases {
            diagnostics.push_stage(phase.phase.as_str(), phase.intervals, phase.coverage);
        }
        outcome.intervals
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}
