// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::SsdError;

/// Operating thresholds for one analysis call.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThresholdSet {
    /// Maximum absolute range (max - min) of a stable window.
    pub abs_thr: f64,
    /// Maximum range relative to the window mean magnitude.
    pub rel_thr: f64,
    /// Minimum number of samples in a reported interval.
    pub min_len: usize,
    /// Maximum magnitude of the window's least-squares slope.
    pub slope_thr: f64,
}

impl ThresholdSet {
    pub fn new(abs_thr: f64, rel_thr: f64, min_len: usize, slope_thr: f64) -> Result<Self, SsdError> {
        let thresholds = Self {
            abs_thr,
            rel_thr,
            min_len,
            slope_thr,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// `slope_thr` may be `+inf` to disable the trend bound.
    pub fn validate(&self) -> Result<(), SsdError> {
        for (name, value) in [("abs_thr", self.abs_thr), ("rel_thr", self.rel_thr)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SsdError::invalid_input(format!(
                    "ThresholdSet.{name} must be finite and >= 0; got {value}"
                )));
            }
        }
        if self.slope_thr.is_nan() || self.slope_thr < 0.0 {
            return Err(SsdError::invalid_input(format!(
                "ThresholdSet.slope_thr must be >= 0; got {}",
                self.slope_thr
            )));
        }
        if self.min_len == 0 {
            return Err(SsdError::invalid_input(
                "ThresholdSet.min_len must be >= 1; got 0",
            ));
        }
        Ok(())
    }

    /// Copy with both range thresholds multiplied by `factor`.
    pub fn scaled_range(&self, factor: f64) -> Self {
        Self {
            abs_thr: self.abs_thr * factor,
            rel_thr: self.rel_thr * factor,
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ThresholdSet;

    #[test]
    fn new_validates_fields() {
        ThresholdSet::new(0.5, 0.05, 50, 0.1).expect("valid thresholds");
        ThresholdSet::new(0.5, 0.05, 50, f64::INFINITY).expect("unbounded slope is allowed");

        let err = ThresholdSet::new(-1.0, 0.05, 50, 0.1).expect_err("negative abs_thr");
        assert!(err.to_string().contains("abs_thr"));
        let err = ThresholdSet::new(0.5, f64::NAN, 50, 0.1).expect_err("NaN rel_thr");
        assert!(err.to_string().contains("rel_thr"));
        let err = ThresholdSet::new(0.5, 0.05, 0, 0.1).expect_err("zero min_len");
        assert!(err.to_string().contains("min_len"));
        let err = ThresholdSet::new(0.5, 0.05, 5, -0.1).expect_err("negative slope");
        assert!(err.to_string().contains("slope_thr"));
    }

    #[test]
    fn scaled_range_only_touches_range_thresholds() {
        let base = ThresholdSet::new(1.0, 0.1, 40, 2.0).expect("valid");
        let scaled = base.scaled_range(0.7);
        assert!((scaled.abs_thr - 0.7).abs() < 1e-12);
        assert!((scaled.rel_thr - 0.07).abs() < 1e-12);
        assert_eq!(scaled.min_len, 40);
        assert_eq!(scaled.slope_thr, 2.0);
    }
}
