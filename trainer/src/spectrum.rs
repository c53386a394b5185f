//! Spectral helpers for periodicity inference: DFT magnitudes, the
//! permutation null threshold, and the normalized autocorrelation.
//!
//! The transform is computed directly (O(N²) over the half-spectrum); idle
//! captures are minutes to hours at 1 Hz, well within budget for an offline
//! trainer.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// |DFT(y)| for bins `0 … N/2 − 1`.
///
/// Per-bin phasor rotation instead of per-sample trig; the drift over a few
/// thousand samples is far below the thresholds this feeds.
pub fn dft_magnitudes(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    let half = n / 2;
    let mut magnitudes = Vec::with_capacity(half);
    for k in 0..half {
        let step = -2.0 * std::f64::consts::PI * (k as f64) / (n as f64);
        let (step_sin, step_cos) = step.sin_cos();
        let (mut ph_re, mut ph_im) = (1.0, 0.0);
        let mut re = 0.0;
        let mut im = 0.0;
        for &value in y {
            re += value * ph_re;
            im += value * ph_im;
            let next_re = ph_re * step_cos - ph_im * step_sin;
            ph_im = ph_re * step_sin + ph_im * step_cos;
            ph_re = next_re;
        }
        magnitudes.push((re * re + im * im).sqrt());
    }
    magnitudes
}

/// Null-distribution threshold: permute `y` `permutations` times, record
/// each run's max |DFT| over bins `1 … N/2 − 1`, and return the
/// `keep`-th largest maximum (keep = 6 → 95th percentile at 100 runs).
pub fn permutation_threshold(
    y: &[f64],
    permutations: usize,
    keep: usize,
    rng: &mut StdRng,
) -> f64 {
    let mut maxima = Vec::with_capacity(permutations);
    let mut shuffled = y.to_vec();
    for _ in 0..permutations {
        shuffled.shuffle(rng);
        let magnitudes = dft_magnitudes(&shuffled);
        let max = magnitudes
            .iter()
            .skip(1)
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        maxima.push(max);
    }
    maxima.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = maxima.len().saturating_sub(keep);
    maxima.get(idx).copied().unwrap_or(f64::INFINITY)
}

/// Normalized autocorrelation `ρ_k = c_k / c_0` for lags `0 … N − 1`.
pub fn acf(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    if n == 0 {
        return Vec::new();
    }
    let mean = y.iter().sum::<f64>() / n as f64;
    let c0: f64 = y.iter().map(|v| (v - mean) * (v - mean)).sum();
    if c0 == 0.0 {
        // A constant series correlates perfectly with itself at every lag.
        return vec![1.0; n];
    }
    (0..n)
        .map(|lag| {
            let ck: f64 = (0..n - lag)
                .map(|t| (y[t] - mean) * (y[t + lag] - mean))
                .sum();
            ck / c0
        })
        .collect()
}
