// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Steady-state interval segmentation: window scan, merge pipeline and
//! coverage optimization.

pub mod batch;
pub mod coverage;
pub mod engine;
pub mod merge;
pub mod trim;
pub mod window;

pub use batch::{BatchConfig, segment_batch, segment_batch_with};
pub use coverage::{
    CoverageMergeOutcome, CoveragePhase, CoveragePolicy, PhaseCoverage, coverage_merge,
    sensitivity_factor,
};
pub use engine::{
    IntervalMode, RETRY_SENSITIVITY_SCALE, SegmentationConfig, SegmentationResult, Segmenter,
    ThresholdSource,
};
pub use merge::{LevelGuard, MergeConfig, PrefixSums};
pub use trim::{BoundaryTrimmer, TrimOutcome};
pub use window::{RangeRule, ScanOutcome, WindowExpander};

/// Segmentation namespace marker.
pub fn crate_name() -> &'static str {
    "ssd-segment"
}
