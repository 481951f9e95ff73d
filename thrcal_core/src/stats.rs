//! Statistics primitives over raw ADC batches.
//!
//! All functions are pure. Voltages are in millivolts at the channel input,
//! samples are 12-bit ADC counts.

use std::cmp::Ordering;

use crate::device::DeviceFlavor;
use crate::error::CalibError;

/// Full-scale ADC count.
pub const ADC_FULL_SCALE: f64 = 4095.0;
/// Millivolts at the ADC input per count, before the flavor input scale.
pub const MV_PER_COUNT: f64 = 1000.0 / ADC_FULL_SCALE;

/// Element at index `len / 2` after partial sorting.
///
/// Even-length inputs are not averaged: the upper of the two middle elements
/// is returned. Downstream DAC choices depend on this, keep it.
pub fn median<T: Copy + PartialOrd>(samples: &[T]) -> Option<T> {
    if samples.is_empty() {
        return None;
    }
    let mut buf = samples.to_vec();
    let mid = buf.len() / 2;
    let (_, m, _) =
        buf.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Some(*m)
}

/// Arithmetic mean; NaN for an empty slice.
pub fn mean<T: Copy + Into<f64>>(samples: &[T]) -> f64 {
    let sum: f64 = samples.iter().map(|&s| s.into()).sum();
    sum / samples.len() as f64
}

/// `sqrt(mean(x^2) - mean^2)`; NaN for an empty slice.
pub fn rms<T: Copy + Into<f64>>(samples: &[T], mean: f64) -> f64 {
    let sq: f64 = samples
        .iter()
        .map(|&s| {
            let v: f64 = s.into();
            v * v
        })
        .sum();
    let var = sq / samples.len() as f64 - mean * mean;
    // Cancellation can leave a tiny negative variance.
    var.max(0.0).sqrt()
}

/// Most frequent value; the first of several equally long runs wins.
pub fn mode<T: Copy + Ord>(samples: &[T]) -> Option<T> {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mut best: Option<(T, usize)> = None;
    for run in sorted.chunk_by(|a, b| a == b) {
        if best.is_none_or(|(_, n)| run.len() > n) {
            best = Some((run[0], run.len()));
        }
    }
    best.map(|(v, _)| v)
}

pub fn sample_to_mv(sample: f64, flavor: DeviceFlavor) -> f64 {
    sample * MV_PER_COUNT * flavor.input_scale()
}

/// Inverse of [`sample_to_mv`], rounded to the nearest count.
pub fn mv_to_sample(mv: f64, flavor: DeviceFlavor) -> f64 {
    (mv / (MV_PER_COUNT * flavor.input_scale())).round()
}

/// False when the channel noise exceeds `cutoff_mv`.
pub fn check_channel(rms: f64, flavor: DeviceFlavor, cutoff_mv: f64) -> bool {
    sample_to_mv(rms, flavor) <= cutoff_mv
}

/// False iff the two slopes differ by more than `tolerance`.
pub fn check_slopes(m1: f64, m2: f64, tolerance: f64) -> bool {
    (m1 - m2).abs() <= tolerance
}

/// Straight line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LineFit {
    pub fn eval(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// `x` at which the line reaches `y`. Infinite for a flat line.
    pub fn invert(&self, y: f64) -> f64 {
        (y - self.intercept) / self.slope
    }
}

/// Ordinary least squares through `(xs[i], ys[i])`.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Result<LineFit, CalibError> {
    if xs.len() != ys.len() {
        return Err(CalibError::DegenerateFit("x and y lengths differ"));
    }
    if xs.len() < 2 {
        return Err(CalibError::DegenerateFit("fewer than two points"));
    }
    let mx = mean(xs);
    let my = mean(ys);
    let (sxy, sxx) = xs
        .iter()
        .zip(ys)
        .fold((0.0, 0.0), |(sxy, sxx), (&x, &y)| {
            (sxy + (x - mx) * (y - my), sxx + (x - mx) * (x - mx))
        });
    if !(sxx > f64::EPSILON) {
        return Err(CalibError::DegenerateFit("no variance in x"));
    }
    let slope = sxy / sxx;
    Ok(LineFit {
        slope,
        intercept: my - slope * mx,
    })
}

/// Split `samples` into those strictly closer than `cutoff_mv` to `center` and
/// a count of the rest.
pub fn prune_outliers(
    samples: &[u16],
    center: f64,
    cutoff_mv: f64,
    flavor: DeviceFlavor,
) -> (Vec<u16>, usize) {
    let center_mv = sample_to_mv(center, flavor);
    let kept: Vec<u16> = samples
        .iter()
        .copied()
        .filter(|&s| (sample_to_mv(f64::from(s), flavor) - center_mv).abs() < cutoff_mv)
        .collect();
    let pruned = samples.len() - kept.len();
    (kept, pruned)
}

/// Median, mean and RMS of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSummary {
    pub median: f64,
    pub mean: f64,
    pub rms: f64,
}

impl BatchSummary {
    pub fn of(samples: &[u16]) -> Option<Self> {
        let median = f64::from(median(samples)?);
        let mean = mean(samples);
        Some(Self {
            median,
            mean,
            rms: rms(samples, mean),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_picks_upper_middle_for_even_length() {
        assert_eq!(median(&[4u16, 1, 3, 2]), Some(3));
        assert_eq!(median(&[5u16, 1, 3]), Some(3));
        assert_eq!(median(&[2.5f64, 0.5]), Some(2.5));
        assert_eq!(median::<u16>(&[]), None);
    }

    #[test]
    fn mean_and_rms() {
        let s = [2u16, 4, 4, 4, 5, 5, 7, 9];
        let m = mean(&s);
        assert!((m - 5.0).abs() < 1e-12);
        assert!((rms(&s, m) - 2.0).abs() < 1e-12);
        assert!(mean::<u16>(&[]).is_nan());
    }

    #[test]
    fn rms_of_constant_is_zero() {
        let s = [700u16; 100];
        assert_eq!(rms(&s, mean(&s)), 0.0);
    }

    #[test]
    fn mode_longest_run_first_wins() {
        assert_eq!(mode(&[3u16, 1, 3, 2, 2]), Some(2));
        assert_eq!(mode(&[9u16, 9, 9, 1]), Some(9));
        assert_eq!(mode::<u16>(&[]), None);
    }

    #[test]
    fn flavor_scales_conversion() {
        let a = sample_to_mv(4095.0, DeviceFlavor::Mmfe8);
        let b = sample_to_mv(4095.0, DeviceFlavor::Sfeb);
        assert!((a - 1000.0).abs() < 1e-9);
        assert!((b - 1500.0).abs() < 1e-9);
        assert_eq!(mv_to_sample(1500.0, DeviceFlavor::Sfeb), 4095.0);
    }

    #[test]
    fn noisy_channel_fails_check() {
        // 30 mV is ~123 counts on a direct-input board.
        assert!(check_channel(100.0, DeviceFlavor::Mmfe8, 30.0));
        assert!(!check_channel(130.0, DeviceFlavor::Mmfe8, 30.0));
        assert!(!check_channel(100.0, DeviceFlavor::Sfeb, 30.0));
    }

    #[test]
    fn fit_recovers_line() {
        let xs = [100.0, 150.0, 200.0, 250.0];
        let ys: Vec<f64> = xs.iter().map(|x| 2.5 * x + 50.0).collect();
        let f = fit_line(&xs, &ys).unwrap();
        assert!((f.slope - 2.5).abs() < 1e-9);
        assert!((f.intercept - 50.0).abs() < 1e-9);
        assert!((f.invert(f.eval(321.0)) - 321.0).abs() < 1e-9);
    }

    #[test]
    fn fit_rejects_degenerate_input() {
        assert!(matches!(
            fit_line(&[1.0], &[2.0]),
            Err(CalibError::DegenerateFit(_))
        ));
        assert!(matches!(
            fit_line(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]),
            Err(CalibError::DegenerateFit(_))
        ));
    }

    #[test]
    fn slopes_within_tolerance() {
        assert!(check_slopes(4.0, 4.0, 0.0));
        assert!(check_slopes(4.0, 5.0, 1.5));
        assert!(!check_slopes(4.0, 6.0, 1.5));
    }

    #[test]
    fn pruning_counts_far_samples() {
        // 10 mV is ~41 counts on a direct-input board.
        let s = [500u16, 505, 495, 2000, 0, 530];
        let (kept, pruned) = prune_outliers(&s, 500.0, 10.0, DeviceFlavor::Mmfe8);
        assert_eq!(kept, vec![500, 505, 495, 530]);
        assert_eq!(pruned, 2);
    }

    #[test]
    fn summary_of_empty_is_none() {
        assert!(BatchSummary::of(&[]).is_none());
        let s = BatchSummary::of(&[10, 10, 10]).unwrap();
        assert_eq!(s.median, 10.0);
        assert_eq!(s.rms, 0.0);
    }
}
