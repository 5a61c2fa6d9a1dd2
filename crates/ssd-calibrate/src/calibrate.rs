// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::noise::{NoiseStats, estimate_noise};
use crate::stats::{diff, percentile};
use ssd_core::{SeriesView, SsdError, ThresholdSet};

/// Runs of stable differences needed before the run-length model is trusted.
pub const MIN_RUNS_FOR_STATISTICS: usize = 10;

const FALLBACK_ABS_THR: f64 = 0.05;
const FALLBACK_REL_THR: f64 = 0.05;
const FALLBACK_SLOPE_THR: f64 = 0.01;
const FALLBACK_MAX_MIN_LEN: usize = 100;

/// Calibration knobs supplied by the caller.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationConfig {
    /// Global strictness scale; larger values tighten `abs_thr`, `rel_thr`
    /// and `slope_thr`, so only quieter stretches qualify.
    pub sensitivity: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { sensitivity: 1.0 }
    }
}

impl CalibrationConfig {
    pub fn new(sensitivity: f64) -> Result<Self, SsdError> {
        let config = Self { sensitivity };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SsdError> {
        if !self.sensitivity.is_finite() || self.sensitivity <= 0.0 {
            return Err(SsdError::invalid_input(format!(
                "sensitivity must be finite and > 0; got {}",
                self.sensitivity
            )));
        }
        Ok(())
    }

    pub fn effective_sensitivity(&self) -> f64 {
        effective_sensitivity(self.sensitivity)
    }
}

/// `max(0.1, 0.5 * s)`.
pub fn effective_sensitivity(sensitivity: f64) -> f64 {
    (0.5 * sensitivity).max(0.1)
}

/// Where the calibrated `min_len` came from.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MinLenSource {
    /// 60th percentile of stable-difference run lengths.
    RunLength,
    /// Fixed fraction of the series length.
    LengthFraction,
    /// Too few samples to estimate noise.
    Fallback,
}

/// Thresholds derived from a series together with the statistics behind them.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub thresholds: ThresholdSet,
    pub noise: Option<NoiseStats>,
    pub effective_sensitivity: f64,
    pub min_len_source: MinLenSource,
}

/// Derives a [`ThresholdSet`] from the series' own noise statistics.
///
/// Deterministic in `(series, config.sensitivity)`.
pub fn calibrate(
    series: &SeriesView<'_>,
    config: &CalibrationConfig,
) -> Result<Calibration, SsdError> {
    config.validate()?;
    let values = series.values();
    let n = values.len();
    let effective_s = config.effective_sensitivity();

    let Some(noise) = estimate_noise(values) else {
        let min_len = (n / 2).min(FALLBACK_MAX_MIN_LEN).max(1);
        tracing::debug!(n, min_len, "series too short for noise estimation; using fallback thresholds");
        return Ok(Calibration {
            thresholds: ThresholdSet::new(
                FALLBACK_ABS_THR,
                FALLBACK_REL_THR,
                min_len,
                FALLBACK_SLOPE_THR,
            )?,
            noise: None,
            effective_sensitivity: effective_s,
            min_len_source: MinLenSource::Fallback,
        });
    };

    let NoiseStats { sigma_d, cv, .. } = noise;
    let k_abs = 3.0 + (10.0 * cv).min(2.0);
    let k_rel = 4.0 + (15.0 * cv).min(3.0);

    let abs_thr = (k_abs / effective_s) * sigma_d;
    let rel_thr = ((k_rel / effective_s) * cv).clamp(0.015, 0.35);
    let slope_thr = 1.5 * k_abs / effective_s * sigma_d;

    let runs = stable_run_lengths(values, 1.5 * sigma_d);
    let (raw_min_len, min_len_source) = if runs.len() >= MIN_RUNS_FOR_STATISTICS {
        let runs_f: Vec<f64> = runs.iter().map(|&r| r as f64).collect();
        let p60 = percentile(&runs_f, 0.60).unwrap_or(0.0).trunc();
        let growth = (0.8 + n as f64 / 100_000.0).clamp(0.8, 2.0);
        ((p60 * growth).floor() as usize, MinLenSource::RunLength)
    } else {
        let pct = if n < 10_000 {
            0.010
        } else if n < 50_000 {
            0.012
        } else {
            0.015
        };
        ((n as f64 * pct).floor() as usize, MinLenSource::LengthFraction)
    };
    let (lo, hi) = min_len_bounds(n);
    let min_len = raw_min_len.clamp(lo, hi);

    tracing::debug!(
        n,
        sigma_d,
        cv,
        abs_thr,
        rel_thr,
        slope_thr,
        min_len,
        runs = runs.len(),
        "calibrated thresholds"
    );

    Ok(Calibration {
        thresholds: ThresholdSet::new(abs_thr, rel_thr, min_len, slope_thr)?,
        noise: Some(noise),
        effective_sensitivity: effective_s,
        min_len_source,
    })
}

/// Allowed `min_len` range for a series of length `n`.
pub fn min_len_bounds(n: usize) -> (usize, usize) {
    match n {
        _ if n < 5_000 => (50, 500),
        _ if n < 20_000 => (100, 800),
        _ if n < 100_000 => (200, 1200),
        _ => (300, 2000),
    }
}

/// Sample lengths of maximal stretches whose consecutive differences stay
/// within `bound`. A stretch of `k` differences spans `k + 1` samples; isolated
/// samples are not reported.
pub fn stable_run_lengths(values: &[f64], bound: f64) -> Vec<usize> {
    let mut runs = Vec::new();
    let mut current = 1usize;
    for d in diff(values) {
        if d.abs() <= bound {
            current += 1;
        } else {
            if current > 1 {
                runs.push(current);
            }
            current = 1;
        }
    }
    if current > 1 {
        runs.push(current);
    }
    runs
}
