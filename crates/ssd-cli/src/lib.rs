// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use serde::Serialize;
use ssd_calibrate::Calibration;
use ssd_core::{
    Diagnostics, ExecutionContext, SamplePosition, SeriesView, SsdError, ThresholdSet,
};
use ssd_eval::{DEFAULT_ADJUSTMENT_RATIO, ideal_value, interval_average, interval_stats};
use ssd_preprocess::{
    PreprocessConfig, PreprocessPipeline, PreprocessedSeries, SmoothConfig, SmoothWindow,
    StepReport,
};
use ssd_segment::{BatchConfig, SegmentationConfig, SegmentationResult, Segmenter};
use std::collections::HashMap;

/// Options shared by the `segment` and `batch` commands.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentOptions {
    pub config: SegmentationConfig,
    pub smooth: Option<SmoothWindow>,
    pub retry: bool,
    pub adjustment_ratio: f64,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            config: SegmentationConfig::default(),
            smooth: None,
            retry: false,
            adjustment_ratio: DEFAULT_ADJUSTMENT_RATIO,
        }
    }
}

/// One loaded series together with its optional program positions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeriesInput {
    pub values: Vec<f64>,
    pub positions: Option<Vec<SamplePosition>>,
}

impl SeriesInput {
    pub fn view(&self) -> Result<SeriesView<'_>, SsdError> {
        let view = SeriesView::new(&self.values)?;
        match &self.positions {
            Some(positions) => view.with_positions(positions),
            None => Ok(view),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntervalReport {
    pub start: usize,
    pub end: usize,
    pub len: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub cv: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_position: Option<SamplePosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_position: Option<SamplePosition>,
}

/// Everything the CLI reports for one segmented series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SegmentReport {
    pub n: usize,
    pub intervals: Vec<IntervalReport>,
    pub coverage: f64,
    pub interval_average: Option<f64>,
    pub ideal_value: Option<f64>,
    pub adjustment_ratio: f64,
    pub thresholds: ThresholdSet,
    pub calibration: Option<Calibration>,
    pub raw_candidates: usize,
    pub preprocessing: Vec<StepReport>,
    pub diagnostics: Diagnostics,
}

/// Assigns each sample its `(line_number, point_index)` position, where the
/// point index counts earlier samples that share the same line number.
pub fn line_positions(line_numbers: &[u32]) -> Vec<SamplePosition> {
    let mut seen: HashMap<u32, u32> = HashMap::new();
    line_numbers
        .iter()
        .map(|&line_number| {
            let counter = seen.entry(line_number).or_insert(0);
            let point_index = *counter;
            *counter += 1;
            SamplePosition {
                line_number,
                point_index,
            }
        })
        .collect()
}

fn preprocess(
    input: &SeriesInput,
    smooth: Option<SmoothWindow>,
) -> Result<PreprocessedSeries, SsdError> {
    let pipeline = PreprocessPipeline::new(PreprocessConfig {
        smooth: smooth.map(|window| SmoothConfig { window }),
    })?;
    pipeline.apply(&SeriesView::new(&input.values)?)
}

/// Builds the report for `result`. Statistics use the unsmoothed samples.
pub fn build_report(
    input: &SeriesInput,
    result: SegmentationResult,
    preprocessing: Vec<StepReport>,
    adjustment_ratio: f64,
) -> Result<SegmentReport, SsdError> {
    let view = input.view()?;
    let stats = interval_stats(&input.values, &result.intervals)?;
    let intervals = stats
        .into_iter()
        .map(|stat| {
            let span = view.position_span(&stat.interval);
            IntervalReport {
                start: stat.interval.start,
                end: stat.interval.end,
                len: stat.interval.len(),
                mean: stat.mean,
                std: stat.std,
                min: stat.min,
                max: stat.max,
                cv: stat.cv,
                start_position: span.map(|(first, _)| first),
                end_position: span.map(|(_, last)| last),
            }
        })
        .collect();

    Ok(SegmentReport {
        n: input.values.len(),
        intervals,
        coverage: result.coverage,
        interval_average: interval_average(&input.values, &result.intervals),
        ideal_value: ideal_value(&input.values, &result.intervals, adjustment_ratio)?,
        adjustment_ratio,
        thresholds: result.thresholds,
        calibration: result.calibration,
        raw_candidates: result.raw_candidates.len(),
        preprocessing,
        diagnostics: result.diagnostics,
    })
}

/// Preprocesses, segments and summarizes one series.
pub fn analyze(
    input: &SeriesInput,
    options: &SegmentOptions,
    ctx: &ExecutionContext<'_>,
) -> Result<SegmentReport, SsdError> {
    let segmenter = Segmenter::new(options.config)?;
    let prepared = preprocess(input, options.smooth)?;
    let view = prepared.as_view()?;
    let result = if options.retry {
        segmenter.segment_with_retry(&view, ctx)?
    } else {
        segmenter.segment(&view, ctx)?
    };
    build_report(
        input,
        result,
        prepared.reports().to_vec(),
        options.adjustment_ratio,
    )
}

/// Batch counterpart of [`analyze`]; results keep the input order and fail
/// independently. Only an invalid `options` fails the whole call.
pub fn analyze_batch(
    inputs: &[SeriesInput],
    options: &SegmentOptions,
    ctx: &ExecutionContext<'_>,
) -> Result<Vec<Result<SegmentReport, SsdError>>, SsdError> {
    let segmenter = Segmenter::new(options.config)?;
    let prepared = inputs
        .iter()
        .map(|input| preprocess(input, options.smooth))
        .collect::<Vec<_>>();

    let mut views = Vec::with_capacity(prepared.len());
    let mut ready = Vec::with_capacity(prepared.len());
    for item in &prepared {
        match item.as_ref().map_err(Clone::clone).and_then(PreprocessedSeries::as_view) {
            Ok(view) => {
                views.push(view);
                ready.push(Ok(()));
            }
            Err(err) => ready.push(Err(err)),
        }
    }

    // Segmentation results line up with the inputs that produced a view.
    let mut results = ssd_segment::segment_batch_with(
        &segmenter,
        &views,
        ctx,
        &BatchConfig {
            retry_empty: options.retry,
        },
    )
    .into_iter();

    Ok(inputs
        .iter()
        .zip(&prepared)
        .zip(ready)
        .map(|((input, prepared), ready)| {
            ready?;
            let result = results
                .next()
                .ok_or_else(|| SsdError::numerical_issue("batch returned fewer results than series"))??;
            let reports = prepared
                .as_ref()
                .map(|series| series.reports().to_vec())
                .unwrap_or_default();
            build_report(input, result, reports, options.adjustment_ratio)
        })
        .collect())
}

/// CLI namespace marker.
pub fn crate_name() -> &'static str {
    "ssd-cli"
}

#[cfg(test)]
mod tests {
    use super::{SegmentOptions, SeriesInput, analyze, analyze_batch, line_positions};
    use ssd_core::{ExecutionContext, SamplePosition, SsdError};
    use ssd_preprocess::SmoothWindow;

    fn step_input() -> SeriesInput {
        let mut state = 17u64;
        let values = (0..1_000)
            .map(|idx| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
                let level = match idx {
                    0..333 => 10.0,
                    333..666 => 20.0,
                    _ => 30.0,
                };
                level + (unit - 0.5) * 0.1
            })
            .collect();
        SeriesInput {
            values,
            positions: None,
        }
    }

    #[test]
    fn line_positions_count_samples_per_line() {
        let positions = line_positions(&[7, 7, 8, 8, 8, 7]);
        let pairs = positions
            .iter()
            .map(|p| (p.line_number, p.point_index))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![(7, 0), (7, 1), (8, 0), (8, 1), (8, 2), (7, 2)]);
    }

    #[test]
    fn analyze_reports_positions_and_ideal_value() {
        let mut input = step_input();
        let lines = (0..input.values.len() as u32)
            .map(|idx| 100 + idx / 10)
            .collect::<Vec<_>>();
        input.positions = Some(line_positions(&lines));

        let report = analyze(&input, &SegmentOptions::default(), &ExecutionContext::new())
            .expect("analysis should succeed");
        assert!(!report.intervals.is_empty());
        let first = &report.intervals[0];
        assert_eq!(
            first.start_position,
            Some(SamplePosition {
                line_number: 100 + (first.start / 10) as u32,
                point_index: (first.start % 10) as u32,
            })
        );

        let average = report.interval_average.expect("non-empty series");
        let ideal = report.ideal_value.expect("non-empty series");
        assert!((ideal - 1.2 * average).abs() < 1e-9);
    }

    #[test]
    fn analyze_records_smoothing_step() {
        let options = SegmentOptions {
            smooth: Some(SmoothWindow::Fixed(5)),
            ..SegmentOptions::default()
        };
        let report = analyze(&step_input(), &options, &ExecutionContext::new())
            .expect("analysis should succeed");
        assert_eq!(report.preprocessing.len(), 1);
        assert_eq!(report.preprocessing[0].step, "smooth");
    }

    #[test]
    fn analyze_batch_keeps_input_order() {
        let good = step_input();
        let short = SeriesInput {
            values: vec![1.0, 2.0, 3.0],
            positions: None,
        };
        let reports = analyze_batch(
            &[good.clone(), short, good],
            &SegmentOptions::default(),
            &ExecutionContext::new(),
        )
        .expect("batch should run");
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].as_ref().expect("first").n, 1_000);
        let short_report = reports[1].as_ref().expect("short series is not an error");
        assert!(short_report.intervals.is_empty());
        assert_eq!(reports[2].as_ref().expect("third").n, 1_000);
    }

    #[test]
    fn analyze_batch_isolates_non_finite_series() {
        let bad = SeriesInput {
            values: vec![1.0, f64::NAN, 1.0],
            positions: None,
        };
        let reports = analyze_batch(
            &[step_input(), bad, step_input()],
            &SegmentOptions::default(),
            &ExecutionContext::new(),
        )
        .expect("batch should run");
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].as_ref().expect("first").n, 1_000);
        assert!(matches!(reports[1], Err(SsdError::InvalidInput(_))));
        assert_eq!(reports[2].as_ref().expect("third").n, 1_000);
    }
}
