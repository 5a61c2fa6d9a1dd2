// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::SsdError;

/// Inclusive index range `[start, end]` over a series.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

impl Interval {
    pub fn new(start: usize, end: usize) -> Result<Self, SsdError> {
        if start > end {
            return Err(SsdError::invalid_input(format!(
                "interval start must be <= end; got [{start}, {end}]"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of samples covered; always >= 1.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Samples strictly between `self` and a later `next`; 0 when they touch or overlap.
    pub fn gap_to(&self, next: &Interval) -> usize {
        next.start.saturating_sub(self.end.saturating_add(1))
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.start <= idx && idx <= self.end
    }

    /// Smallest interval spanning both inputs.
    pub fn span(&self, other: &Interval) -> Interval {
        Interval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<Interval> for (usize, usize) {
    fn from(value: Interval) -> Self {
        (value.start, value.end)
    }
}

/// Sum of interval lengths. Equals the union size for non-overlapping input.
pub fn total_len(intervals: &[Interval]) -> usize {
    intervals.iter().map(Interval::len).sum()
}

/// Fraction of an `n`-sample series covered by `intervals`; 0 for `n == 0`.
pub fn coverage(intervals: &[Interval], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    total_len(intervals) as f64 / n as f64
}

/// Checks the output contract: in bounds, sorted, strictly non-overlapping.
pub fn validate_intervals(n: usize, intervals: &[Interval]) -> Result<(), SsdError> {
    let mut previous: Option<Interval> = None;
    for (idx, interval) in intervals.iter().enumerate() {
        if interval.start > interval.end {
            return Err(SsdError::invalid_input(format!(
                "interval {idx} is inverted: [{}, {}]",
                interval.start, interval.end
            )));
        }
        if interval.end >= n {
            return Err(SsdError::invalid_input(format!(
                "interval {idx} exceeds series bounds: end={} but n={n}",
                interval.end
            )));
        }
        if let Some(prev) = previous
            && interval.start <= prev.end
        {
            return Err(SsdError::invalid_input(format!(
                "intervals must be sorted and non-overlapping: [{}, {}] then [{}, {}]",
                prev.start, prev.end, interval.start, interval.end
            )));
        }
        previous = Some(*interval);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Interval, coverage, total_len, validate_intervals};

    fn iv(start: usize, end: usize) -> Interval {
        Interval::new(start, end).expect("test interval should be valid")
    }

    #[test]
    fn new_rejects_inverted_bounds() {
        let err = Interval::new(5, 4).expect_err("inverted interval must fail");
        assert!(err.to_string().contains("start must be <= end"));
        assert_eq!(iv(3, 3).len(), 1);
    }

    #[test]
    fn gap_and_overlap_helpers() {
        assert_eq!(iv(0, 9).gap_to(&iv(10, 20)), 0);
        assert_eq!(iv(0, 9).gap_to(&iv(15, 20)), 5);
        assert_eq!(iv(0, 9).gap_to(&iv(5, 20)), 0);
        assert!(iv(0, 9).overlaps(&iv(9, 12)));
        assert!(!iv(0, 9).overlaps(&iv(10, 12)));
        assert_eq!(iv(4, 9).span(&iv(2, 5)), iv(2, 9));
        assert!(iv(4, 9).contains(9));
        assert!(!iv(4, 9).contains(10));
    }

    #[test]
    fn coverage_counts_lengths_over_n() {
        let intervals = [iv(0, 49), iv(60, 99)];
        assert_eq!(total_len(&intervals), 90);
        assert!((coverage(&intervals, 100) - 0.9).abs() < 1e-12);
        assert_eq!(coverage(&[], 0), 0.0);
    }

    #[test]
    fn validate_accepts_sorted_disjoint_lists() {
        validate_intervals(100, &[iv(0, 10), iv(11, 20), iv(50, 99)])
            .expect("valid list should pass");
        validate_intervals(0, &[]).expect("empty list is valid");
    }

    #[test]
    fn validate_rejects_overlap_unsorted_and_out_of_bounds() {
        let overlap = validate_intervals(100, &[iv(0, 10), iv(10, 20)])
            .expect_err("overlap must fail");
        assert!(overlap.to_string().contains("non-overlapping"));

        let unsorted =
            validate_intervals(100, &[iv(30, 40), iv(0, 10)]).expect_err("unsorted must fail");
        assert!(unsorted.to_string().contains("sorted"));

        let bounds = validate_intervals(10, &[iv(0, 10)]).expect_err("end >= n must fail");
        assert!(bounds.to_string().contains("exceeds series bounds"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn interval_serde_roundtrip() {
        let interval = iv(12, 480);
        let encoded = serde_json::to_string(&interval).expect("interval should serialize");
        assert_eq!(encoded, r#"{"start":12,"end":480}"#);
        let decoded: Interval =
            serde_json::from_str(&encoded).expect("interval should deserialize");
        assert_eq!(decoded, interval);
    }
}
