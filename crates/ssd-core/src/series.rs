// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::SsdError;
use crate::interval::Interval;

/// Caller-maintained position of a sample inside the machining program.
///
/// The engine never interprets positions; it only carries them so callers can
/// translate index intervals back into program coordinates.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SamplePosition {
    pub line_number: u32,
    pub point_index: u32,
}

/// Zero-copy view over a materialized scalar load series.
#[derive(Clone, Copy, Debug)]
pub struct SeriesView<'a> {
    values: &'a [f64],
    positions: Option<&'a [SamplePosition]>,
}

impl<'a> SeriesView<'a> {
    /// Constructs a validated view. Every sample must be finite; an empty
    /// slice is accepted and segments to nothing.
    pub fn new(values: &'a [f64]) -> Result<Self, SsdError> {
        if let Some((idx, value)) = values
            .iter()
            .copied()
            .enumerate()
            .find(|(_, v)| !v.is_finite())
        {
            return Err(SsdError::invalid_input(format!(
                "series samples must be finite: index {idx} has {value}"
            )));
        }

        Ok(Self {
            values,
            positions: None,
        })
    }

    /// Attaches a per-sample position mapping; its length must match the series.
    pub fn with_positions(mut self, positions: &'a [SamplePosition]) -> Result<Self, SsdError> {
        if positions.len() != self.values.len() {
            return Err(SsdError::invalid_input(format!(
                "position mapping length mismatch: got {}, expected n={}",
                positions.len(),
                self.values.len()
            )));
        }
        self.positions = Some(positions);
        Ok(self)
    }

    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn positions(&self) -> Option<&'a [SamplePosition]> {
        self.positions
    }

    pub fn position(&self, idx: usize) -> Option<SamplePosition> {
        self.positions.and_then(|positions| positions.get(idx).copied())
    }

    /// Translates an index interval into its first/last program positions.
    pub fn position_span(&self, interval: &Interval) -> Option<(SamplePosition, SamplePosition)> {
        Some((self.position(interval.start)?, self.position(interval.end)?))
    }

    /// Samples covered by `interval`, or `None` when it falls outside the series.
    pub fn slice(&self, interval: &Interval) -> Option<&'a [f64]> {
        self.values.get(interval.start..=interval.end)
    }
}
