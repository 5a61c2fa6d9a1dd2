// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

#[path = "common.rs"]
mod common;

use libfuzzer_sys::fuzz_target;
use ssd_core::{ExecutionContext, SeriesView, ThresholdSet, validate_intervals};
use ssd_segment::{IntervalMode, RangeRule, SegmentationConfig, Segmenter};

fn build_config(cursor: &mut common::ByteCursor<'_>) -> Option<SegmentationConfig> {
    let kind = cursor.next_u8();
    let sensitivity = 0.05 + f64::from(cursor.next_u8()) / 32.0;
    let config = match kind % 4 {
        0 => SegmentationConfig::default().with_sensitivity(sensitivity),
        1 => SegmentationConfig::all_small(sensitivity).ok()?,
        2 => {
            let rel = 0.001 + f64::from(cursor.next_u8()) / 256.0;
            let abs = 0.01 + f64::from(cursor.next_u8()) / 16.0;
            let min_len = common::bounded(cursor.next_u8(), 1, 64);
            SegmentationConfig::legacy_fixed(rel, abs, min_len).ok()?
        }
        _ => {
            let thresholds = ThresholdSet::new(
                0.01 + f64::from(cursor.next_u8()) / 16.0,
                0.001 + f64::from(cursor.next_u8()) / 256.0,
                common::bounded(cursor.next_u8(), 1, 64),
                0.001 + f64::from(cursor.next_u8()) / 64.0,
            )
            .ok()?;
            let mut config = SegmentationConfig::fixed(thresholds);
            config.mode = IntervalMode::LargeCoverage;
            config.range_rule = RangeRule::Either;
            config
        }
    };
    Some(config)
}

fuzz_target!(|data: &[u8]| {
    let mut cursor = common::ByteCursor::new(data);
    let Some(config) = build_config(&mut cursor) else {
        return;
    };
    let Ok(segmenter) = Segmenter::new(config) else {
        return;
    };

    let scale = f64::from(cursor.next_i16()) / 64.0;
    let values = cursor
        .remaining()
        .iter()
        .take(4_096)
        .map(|&byte| 100.0 + scale * f64::from(byte) / 255.0)
        .collect::<Vec<_>>();
    let Ok(view) = SeriesView::new(&values) else {
        return;
    };

    if let Ok(result) = segmenter.segment(&view, &ExecutionContext::new()) {
        assert!(validate_intervals(values.len(), &result.intervals).is_ok());
        assert!(
            result
                .intervals
                .iter()
                .all(|iv| iv.len() >= result.thresholds.min_len)
        );
    }
});
