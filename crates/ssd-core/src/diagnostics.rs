// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::thresholds::ThresholdSet;
use std::borrow::Cow;

/// Diagnostics schema version for segmentation run metadata.
pub const DIAGNOSTICS_SCHEMA_VERSION: u32 = 1;

/// Interval count and coverage observed after one pipeline stage.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct StageReport {
    pub stage: Cow<'static, str>,
    pub intervals: usize,
    pub coverage: f64,
}

/// Structured diagnostics captured from a segmentation run.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostics {
    pub n: usize,
    pub schema_version: u32,
    pub engine_version: Option<String>,
    pub runtime_ms: Option<u64>,
    pub notes: Vec<String>,
    pub warnings: Vec<String>,
    pub algorithm: Cow<'static, str>,
    pub mode: Cow<'static, str>,
    pub thresholds: Option<ThresholdSet>,
    pub effective_sensitivity: Option<f64>,
    pub stages: Vec<StageReport>,
    pub retried: bool,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            n: 0,
            schema_version: DIAGNOSTICS_SCHEMA_VERSION,
            engine_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            runtime_ms: None,
            notes: vec![],
            warnings: vec![],
            algorithm: Cow::Borrowed(""),
            mode: Cow::Borrowed(""),
            thresholds: None,
            effective_sensitivity: None,
            stages: vec![],
            retried: false,
        }
    }
}

impl Diagnostics {
    /// Appends a stage report.
    pub fn push_stage(&mut self, stage: &'static str, intervals: usize, coverage: f64) {
        self.stages.push(StageReport {
            stage: Cow::Borrowed(stage),
            intervals,
            coverage,
        });
    }

    /// Looks up the most recent report for `stage`.
    pub fn stage(&self, stage: &str) -> Option<&StageReport> {
        self.stages.iter().rev().find(|report| report.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::{DIAGNOSTICS_SCHEMA_VERSION, Diagnostics};
    use std::borrow::Cow;

    #[test]
    fn diagnostics_default_sets_schema_and_engine_version() {
        let diagnostics = Diagnostics::default();
        assert_eq!(diagnostics.schema_version, DIAGNOSTICS_SCHEMA_VERSION);
        assert_eq!(
            diagnostics.engine_version,
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
        assert_eq!(diagnostics.algorithm, Cow::Borrowed(""));
        assert!(diagnostics.stages.is_empty());
        assert!(diagnostics.thresholds.is_none());
        assert!(!diagnostics.retried);
    }

    #[test]
    fn stage_lookup_returns_latest_entry() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.push_stage("scan", 12, 0.4);
        diagnostics.push_stage("gap_merge", 5, 0.6);
        diagnostics.push_stage("scan", 3, 0.2);

        let scan = diagnostics.stage("scan").expect("scan stage recorded");
        assert_eq!(scan.intervals, 3);
        assert!(diagnostics.stage("coverage_merge").is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn diagnostics_serde_roundtrip_preserves_all_fields() {
        let mut diagnostics = Diagnostics {
            n: 4_096,
            runtime_ms: Some(3),
            notes: vec!["min_len source=run_length".to_string()],
            warnings: vec!["coverage target not reached".to_string()],
            algorithm: Cow::Owned("adaptive_window".to_string()),
            mode: Cow::Owned("large_coverage".to_string()),
            thresholds: Some(
                crate::ThresholdSet::new(0.8, 0.05, 120, 1.2).expect("valid thresholds"),
            ),
            effective_sensitivity: Some(0.5),
            retried: true,
            ..Diagnostics::default()
        };
        diagnostics.push_stage("scan", 17, 0.55);

        let encoded = serde_json::to_string(&diagnostics).expect("diagnostics should serialize");
        let decoded: Diagnostics =
            serde_json::from_str(&encoded).expect("diagnostics should deserialize");
        assert_eq!(decoded, diagnostics);
    }
}
