// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::stats::{NORMAL_CONSISTENCY, diff, mad, mean, median, percentiles};
use ssd_core::NUMERIC_EPSILON;

/// Fewest samples for which noise statistics are estimated.
pub const MIN_SAMPLES_FOR_NOISE: usize = 10;

/// Robust noise summary of a load series.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseStats {
    /// Scale of the first differences.
    pub sigma_d: f64,
    /// Typical signal level; never closer to zero than [`NUMERIC_EPSILON`].
    pub med_y: f64,
    /// Coefficient of variation `sigma_d / |med_y|`.
    pub cv: f64,
}

/// Estimates the difference-noise scale and signal level.
///
/// Returns `None` for fewer than [`MIN_SAMPLES_FOR_NOISE`] samples.
pub fn estimate_noise(values: &[f64]) -> Option<NoiseStats> {
    if values.len() < MIN_SAMPLES_FOR_NOISE {
        return None;
    }

    let dy = diff(values);
    let mad_scale = NORMAL_CONSISTENCY * mad(&dy)?;
    let abs_dy: Vec<f64> = dy.iter().map(|d| d.abs()).collect();
    let [p10, p90] = percentiles(&abs_dy, [0.10, 0.90])?;
    let spread_scale = 0.5 * (p90 - p10);
    let sigma_d = mad_scale.max(spread_scale).max(NUMERIC_EPSILON);

    let mut med_y = median(values)?;
    if med_y.abs() < NUMERIC_EPSILON {
        let abs_y: Vec<f64> = values.iter().map(|v| v.abs()).collect();
        med_y = mean(&abs_y)?.max(NUMERIC_EPSILON);
    }
    let cv = sigma_d / med_y.abs();

    Some(NoiseStats { sigma_d, med_y, cv })
}
