// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Noise estimation and data-driven threshold calibration.

pub mod calibrate;
pub mod noise;
pub mod stats;

pub use calibrate::{
    Calibration, CalibrationConfig, MinLenSource, calibrate, effective_sensitivity,
    min_len_bounds, stable_run_lengths,
};
pub use noise::{MIN_SAMPLES_FOR_NOISE, NoiseStats, estimate_noise};

/// Calibration namespace marker.
pub fn crate_name() -> &'static str {
    "ssd-calibrate"
}
