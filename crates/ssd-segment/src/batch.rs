// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::engine::{SegmentationResult, Segmenter};
use ssd_core::{ExecutionContext, SeriesView, SsdError};
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Options for [`segment_batch_with`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchConfig {
    /// Use [`Segmenter::segment_with_retry`] for every series.
    pub retry_empty: bool,
}

/// Segments independent series. Results keep the input order.
///
/// Each series checks for cancellation before it starts; series already
/// running finish normally. With the `rayon` feature series run on the global
/// rayon pool.
pub fn segment_batch(
    segmenter: &Segmenter,
    series: &[SeriesView<'_>],
    ctx: &ExecutionContext<'_>,
) -> Vec<Result<SegmentationResult, SsdError>> {
    segment_batch_with(segmenter, series, ctx, &BatchConfig::default())
}

pub fn segment_batch_with(
    segmenter: &Segmenter,
    series: &[SeriesView<'_>],
    ctx: &ExecutionContext<'_>,
    config: &BatchConfig,
) -> Vec<Result<SegmentationResult, SsdError>> {
    let total = series.len();
    let completed = AtomicUsize::new(0);
    // Progress is reported per series; per-call progress would interleave.
    // Cancellation is only observed before a series starts.
    let inner = ExecutionContext {
        cancel: None,
        progress: None,
        ..*ctx
    };

    let run_one = |view: &SeriesView<'_>| {
        let outcome = ctx.check_cancelled().and_then(|()| {
            if config.retry_empty {
                segmenter.segment_with_retry(view, &inner)
            } else {
                segmenter.segment(view, &inner)
            }
        });
        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        ctx.report_progress(done as f32 / total as f32);
        outcome
    };

    tracing::debug!(series = total, "starting batch segmentation");

    #[cfg(feature = "rayon")]
    let results: Vec<_> = series.par_iter().map(run_one).collect();
    #[cfg(not(feature = "rayon"))]
    let results: Vec<_> = series.iter().map(run_one).collect();

    results
}

#[cfg(test)]
mod tests {
    use super::{BatchConfig, segment_batch, segment_batch_with};
    use crate::engine::Segmenter;
    use ssd_core::{CancelToken, ExecutionContext, ProgressSink, SeriesView, SsdError};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingProgress {
        values: Mutex<Vec<f32>>,
    }

    impl ProgressSink for RecordingProgress {
        fn on_progress(&self, fraction: f32) {
            self.values
                .lock()
                .expect("progress mutex should not be poisoned")
                .push(fraction);
        }
    }

    #[test]
    fn results_follow_input_order() {
        let flat = vec![1.0; 300];
        let short = vec![1.0; 4];
        let empty: Vec<f64> = vec![];
        let views = [
            SeriesView::new(&flat).expect("view"),
            SeriesView::new(&short).expect("view"),
            SeriesView::new(&empty).expect("view"),
        ];
        let results = segment_batch(&Segmenter::default(), &views, &ExecutionContext::new());
        assert_eq!(results.len(), 3);
        let first = results[0].as_ref().expect("first series succeeds");
        assert_eq!(first.intervals.len(), 1);
        assert_eq!(first.diagnostics.n, 300);
        let second = results[1].as_ref().expect("second series succeeds");
        assert!(second.intervals.is_empty());
        assert_eq!(second.diagnostics.n, 4);
        assert!(results[2].as_ref().expect("empty series succeeds").intervals.is_empty());
    }

    #[test]
    fn progress_reaches_completion() {
        let values = vec![5.0; 100];
        let views = vec![SeriesView::new(&values).expect("view"); 4];
        let progress = RecordingProgress::default();
        let ctx = ExecutionContext::new().with_progress_sink(&progress);
        let results = segment_batch(&Segmenter::default(), &views, &ctx);
        assert!(results.iter().all(Result::is_ok));

        let seen = progress
            .values
            .lock()
            .expect("progress mutex should not be poisoned");
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().any(|&p| (p - 1.0).abs() < f32::EPSILON));
    }

    #[test]
    fn cancellation_stops_unstarted_series() {
        let values = vec![5.0; 100];
        let views = vec![SeriesView::new(&values).expect("view"); 3];
        let token = CancelToken::new();
        token.cancel();
        let ctx = ExecutionContext::new().with_cancel(&token);
        let results = segment_batch_with(
            &Segmenter::default(),
            &views,
            &ctx,
            &BatchConfig { retry_empty: true },
        );
        assert!(
            results
                .iter()
                .all(|r| matches!(r, Err(SsdError::Cancelled)))
        );
    }

    #[test]
    fn cancellation_does_not_abort_running_series() {
        let values = (0..2_000_000)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect::<Vec<f64>>();
        let views = [SeriesView::new(&values).expect("view")];
        let token = CancelToken::new();
        let ctx = ExecutionContext::new().with_cancel(&token);

        let results = thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                token.cancel();
            });
            segment_batch(&Segmenter::default(), &views, &ctx)
        });

        assert!(token.is_cancelled());
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok(), "{:?}", results[0].as_ref().err());
    }
}
