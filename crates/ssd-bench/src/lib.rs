// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Deterministic load profiles shared by the benchmarks.

/// Piecewise-constant load with a small deterministic ripple.
///
/// Levels cycle through `[20, 35, 50, 35]`, each held for `plateau` samples.
pub fn plateau_series(n: usize, plateau: usize) -> Vec<f64> {
    const LEVELS: [f64; 4] = [20.0, 35.0, 50.0, 35.0];
    let plateau = plateau.max(1);
    (0..n)
        .map(|idx| {
            let level = LEVELS[(idx / plateau) % LEVELS.len()];
            level + ripple(idx, 0.08)
        })
        .collect()
}

/// Slowly drifting load with noise; few stable windows survive.
pub fn drifting_series(n: usize) -> Vec<f64> {
    (0..n)
        .map(|idx| {
            let t = idx as f64;
            30.0 + 5.0 * (t / 500.0).sin() + ripple(idx, 0.6)
        })
        .collect()
}

// Deterministic pseudo-noise in [-amplitude, amplitude].
fn ripple(idx: usize, amplitude: f64) -> f64 {
    let mut x = (idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 29;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 32;
    let unit = (x >> 11) as f64 / (1u64 << 53) as f64;
    amplitude * (2.0 * unit - 1.0)
}

/// Bench namespace marker.
pub fn crate_name() -> &'static str {
    let _ = (
        ssd_core::crate_name(),
        ssd_calibrate::crate_name(),
        ssd_segment::crate_name(),
    );
    "ssd-bench"
}

#[cfg(test)]
mod tests {
    use super::{drifting_series, plateau_series};

    #[test]
    fn profiles_are_deterministic_and_sized() {
        assert_eq!(plateau_series(1_000, 200), plateau_series(1_000, 200));
        assert_eq!(drifting_series(777).len(), 777);
        let series = plateau_series(400, 200);
        assert!((series[10] - 20.0).abs() <= 0.08);
        assert!((series[250] - 35.0).abs() <= 0.08);
    }
}
