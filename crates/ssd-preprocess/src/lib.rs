// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Denoising applied by callers before segmentation.
//!
//! The segmentation engine treats whatever series it receives as the signal;
//! this crate offers the smoothing step used to prepare noisy recordings.

use ssd_calibrate::stats::{diff, mean, std_dev};
use ssd_core::{NUMERIC_EPSILON, SeriesView, SsdError};

const SHORT_SERIES_CUTOFF: f64 = 0.1;
const SHORT_SERIES_ORDER: usize = 4;
const MIN_SMOOTH_WINDOW: usize = 3;

/// Smoothing strength derived from the series' signal-to-noise ratio.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothingRecommendation {
    /// `|mean(y)| / std(dy)`; `None` for series too short to estimate.
    pub snr: Option<f64>,
    /// Normalized cutoff frequency (cycles per sample).
    pub cutoff: f64,
    /// Low-pass filter order matching the cutoff. Reported only; the
    /// moving-average smoother does not use it.
    pub order: usize,
    /// Centered moving-average window implementing the cutoff.
    pub window: usize,
}

/// Recommends a smoothing cutoff from the series' signal-to-noise ratio.
///
/// Cleaner signals get lighter smoothing (higher cutoff).
pub fn recommend_smoothing(values: &[f64]) -> SmoothingRecommendation {
    if values.len() < 10 {
        return SmoothingRecommendation {
            snr: None,
            cutoff: SHORT_SERIES_CUTOFF,
            order: SHORT_SERIES_ORDER,
            window: window_for_cutoff(SHORT_SERIES_CUTOFF),
        };
    }

    let signal_std = std_dev(values).unwrap_or(0.0);
    let noise_std = std_dev(&diff(values)).unwrap_or(0.0);
    let level = mean(values).unwrap_or(0.0).abs();
    let snr = if signal_std <= NUMERIC_EPSILON {
        1.0
    } else if noise_std <= NUMERIC_EPSILON {
        100.0
    } else {
        level / noise_std
    };

    let (cutoff, order) = match snr {
        s if s > 50.0 => (0.15, 3),
        s if s > 20.0 => (0.10, 4),
        s if s > 10.0 => (0.05, 5),
        _ => (0.03, 6),
    };

    SmoothingRecommendation {
        snr: Some(snr),
        cutoff,
        order,
        window: window_for_cutoff(cutoff),
    }
}

/// `max(3, floor(1 / cutoff))`.
pub fn window_for_cutoff(cutoff: f64) -> usize {
    ((1.0 / cutoff).floor() as usize).max(MIN_SMOOTH_WINDOW)
}

/// Moving-average window selection.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SmoothWindow {
    /// Derived per series via [`recommend_smoothing`].
    #[default]
    Auto,
    Fixed(usize),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmoothConfig {
    pub window: SmoothWindow,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreprocessConfig {
    pub smooth: Option<SmoothConfig>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub step: String,
    pub notes: Vec<String>,
}

/// Owned output of [`PreprocessPipeline::apply`].
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessedSeries {
    values: Vec<f64>,
    reports: Vec<StepReport>,
}

impl PreprocessedSeries {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn reports(&self) -> &[StepReport] {
        &self.reports
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn as_view(&self) -> Result<SeriesView<'_>, SsdError> {
        SeriesView::new(&self.values)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreprocessPipeline {
    config: PreprocessConfig,
}

impl PreprocessPipeline {
    pub fn new(config: PreprocessConfig) -> Result<Self, SsdError> {
        validate_config(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Runs the configured steps in order. Positions are not carried over;
    /// smoothing keeps the series length so the caller's mapping still applies.
    pub fn apply(&self, x: &SeriesView<'_>) -> Result<PreprocessedSeries, SsdError> {
        let mut values = x.values().to_vec();
        let mut reports = vec![];

        if let Some(cfg) = &self.config.smooth {
            let (window, note) = match cfg.window {
                SmoothWindow::Fixed(window) => (window, "window_source=fixed".to_string()),
                SmoothWindow::Auto => {
                    let rec = recommend_smoothing(&values);
                    (
                        rec.window,
                        format!(
                            "window_source=auto, snr={}, cutoff={}, order={}",
                            rec.snr.map_or_else(|| "n/a".to_string(), |s| format!("{s:.3}")),
                            rec.cutoff,
                            rec.order
                        ),
                    )
                }
            };
            values = centered_moving_average(&values, window);
            tracing::debug!(window, n = values.len(), "applied moving-average smoothing");
            reports.push(StepReport {
                step: "smooth".to_string(),
                notes: vec![format!("window={window}"), note],
            });
        }

        Ok(PreprocessedSeries { values, reports })
    }
}

fn validate_config(config: &PreprocessConfig) -> Result<(), SsdError> {
    if let Some(smooth) = &config.smooth
        && let SmoothWindow::Fixed(window) = smooth.window
        && window == 0
    {
        return Err(SsdError::invalid_input(
            "SmoothConfig.window must be >= 1; got 0",
        ));
    }
    Ok(())
}

/// Mean over `[t - window/2, t + window/2]`, truncated at the series edges.
pub fn centered_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 || window <= 1 {
        return values.to_vec();
    }
    let half = window / 2;

    let mut prefix = Vec::with_capacity(n + 1);
    let mut acc = 0.0;
    prefix.push(acc);
    for v in values {
        acc += v;
        prefix.push(acc);
    }

    (0..n)
        .map(|t| {
            let start = t.saturating_sub(half);
            let end = t.saturating_add(half).saturating_add(1).min(n);
            (prefix[end] - prefix[start]) / (end - start) as f64
        })
        .collect()
}

/// Preprocessing namespace marker.
pub fn crate_name() -> &'static str {
    "ssd-preprocess"
}
