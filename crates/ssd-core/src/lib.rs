// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Core types shared by the steady-state segmentation crates.

pub mod control;
pub mod diagnostics;
pub mod error;
pub mod execution_context;
pub mod interval;
pub mod observability;
pub mod series;
pub mod thresholds;

pub use control::CancelToken;
pub use diagnostics::{DIAGNOSTICS_SCHEMA_VERSION, Diagnostics, StageReport};
pub use error::SsdError;
pub use execution_context::ExecutionContext;
pub use interval::{Interval, coverage, total_len, validate_intervals};
pub use observability::{ProgressSink, TelemetrySink};
pub use series::{SamplePosition, SeriesView};
pub use thresholds::ThresholdSet;

/// Floor applied to denominators and scale estimates.
pub const NUMERIC_EPSILON: f64 = 1.0e-9;

/// Core namespace marker.
pub fn crate_name() -> &'static str {
    "ssd-core"
}
