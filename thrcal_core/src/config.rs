//! Configuration types for the calibration engine.
//!
//! These are the runtime configuration structs used by the pipeline stages.
//! They are separate from the TOML-deserialized config in `thrcal_config`.
//! Defaults are the hand-tuned values the procedure has been run with.

use std::time::Duration;

/// Batch sizes, pruning and retry policy for every acquisition.
#[derive(Debug, Clone)]
pub struct SamplingCfg {
    /// Samples per nominal batch.
    pub sample_count: usize,
    /// Baseline and guess-point batches are `sample_count * oversampling` long.
    pub oversampling: usize,
    /// Samples deviating from the batch median by this much or more are pruned (mV).
    pub prune_cutoff_mv: f64,
    /// Attempts per acquisition before the channel is reported as failed.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl SamplingCfg {
    pub fn oversampled(&self) -> usize {
        self.sample_count.saturating_mul(self.oversampling).max(1)
    }
}

impl Default for SamplingCfg {
    fn default() -> Self {
        Self {
            sample_count: 10,
            oversampling: 10,
            prune_cutoff_mv: 10.0,
            max_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Hot / dead / noisy channel detection.
#[derive(Debug, Clone)]
pub struct ClassifierCfg {
    /// Baseline above `device median * hot_factor` marks a channel hot (masked).
    pub hot_factor: f64,
    /// Baseline below `device median * dead_factor` marks a channel dead-suspect (kept).
    pub dead_factor: f64,
    /// Baseline RMS above this is noisy (mV).
    pub rms_cutoff_mv: f64,
    /// Fraction of bad channels that raises a warning.
    pub warn_ratio: f64,
    /// Fraction of bad channels that marks the device suspect.
    pub severe_ratio: f64,
}

impl Default for ClassifierCfg {
    fn default() -> Self {
        Self {
            hot_factor: 1.1,
            dead_factor: 0.9,
            rms_cutoff_mv: 30.0,
            warn_ratio: 0.25,
            severe_ratio: 0.5,
        }
    }
}

/// Global threshold DAC solving.
#[derive(Debug, Clone)]
pub struct ThresholdCfg {
    /// Target sits this many baseline RMS above the baseline.
    pub rms_factor: f64,
    /// Extra headroom on top of the RMS target (mV).
    pub trim_offset_mv: f64,
    /// Target above baseline for flavors without trimmers (mV).
    pub fixed_offset_mv: f64,
    /// DAC values probed to fit the threshold response.
    pub guess_points: Vec<u16>,
    /// Pruning margin around each guess point's median (mV).
    pub guess_margin_mv: f64,
    /// Admissible fitted slope band (ADC counts per DAC step).
    pub slope_min: f64,
    pub slope_max: f64,
    /// Allowed relative deviation of the realized threshold from the target.
    pub deviation_tolerance: f64,
    /// Minimum device effective threshold at mid trim (mV).
    pub min_margin_mv: f64,
    /// Largest value of the threshold DAC register.
    pub thdac_max: u16,
}

impl Default for ThresholdCfg {
    fn default() -> Self {
        Self {
            rms_factor: 9.0,
            trim_offset_mv: 5.0,
            fixed_offset_mv: 50.0,
            guess_points: vec![100, 150, 200, 250, 300, 350, 400],
            guess_margin_mv: 10.0,
            slope_min: 0.5,
            slope_max: 8.0,
            deviation_tolerance: 0.2,
            min_margin_mv: 30.0,
            thdac_max: 1023,
        }
    }
}

/// Trim region search and optimization.
#[derive(Debug, Clone)]
pub struct TrimCfg {
    pub low: u8,
    pub mid: u8,
    pub high: u8,
    /// Largest value of the trim register.
    pub trim_max: u8,
    /// Largest allowed difference between the low and high local slopes (counts per trim step).
    pub slope_tolerance: f64,
    /// A channel this far below baseline at its best trim is masked (mV).
    pub bump_cutoff_mv: f64,
    /// Warn when more than this fraction of channels end with unusable trims.
    pub unusable_warn_ratio: f64,
}

impl Default for TrimCfg {
    fn default() -> Self {
        Self {
            low: 0,
            mid: 14,
            high: 31,
            trim_max: 31,
            slope_tolerance: 1.5,
            bump_cutoff_mv: 20.0,
            unusable_warn_ratio: 0.25,
        }
    }
}

/// All stage configurations for one device run.
#[derive(Debug, Clone, Default)]
pub struct CalibrationCfg {
    pub sampling: SamplingCfg,
    pub classifier: ClassifierCfg,
    pub threshold: ThresholdCfg,
    pub trim: TrimCfg,
}

/// Which stages of the pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationMode {
    /// Baseline sampling and channel classification only.
    Baseline,
    /// Baselines plus the global threshold DAC; trims stay at mid.
    Threshold,
    /// Full pipeline including per-channel trims.
    #[default]
    Trim,
}
