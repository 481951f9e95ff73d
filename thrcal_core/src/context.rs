//! Per-device record set threaded through the pipeline stages.
//!
//! A `DeviceContext` is created fresh for every device run and passed by
//! `&mut` from stage to stage. Records are dense vectors indexed by channel.
//! All ADC-valued fields are in counts; conversion to millivolts happens only
//! when rows are assembled.

use thrcal_traits::{ChannelKey, RegisterMap};

use crate::device::DeviceSpec;
use crate::error::CalibError;

/// Baseline of one channel in ADC counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineRecord {
    pub median: f64,
    pub rms: f64,
    /// Samples dropped as far outliers.
    pub pruned: usize,
}

impl BaselineRecord {
    /// Record for channels that were not or could not be sampled.
    pub const UNMEASURED: Self = Self {
        median: 0.0,
        rms: -1.0,
        pruned: 0,
    };

    pub fn is_measured(&self) -> bool {
        self.rms >= 0.0
    }
}

impl Default for BaselineRecord {
    fn default() -> Self {
        Self::UNMEASURED
    }
}

/// Aggregate over the measured channels of a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceBaseline {
    /// Median of channel medians.
    pub median: f64,
    /// Mean of channel medians.
    pub mean: f64,
    /// Median of channel RMS values.
    pub rms: f64,
    /// Channels the aggregate was computed from.
    pub channels: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskReason {
    /// No sensor behind the input.
    Unconnected,
    /// Sampling failed for good.
    NoData,
    /// Baseline far above the device median.
    Hot,
    /// The device as a whole could not be calibrated.
    DeviceFailed,
    /// Effective threshold stayed below baseline at the best trim.
    BelowBaseline,
}

/// Usable/masked flag per channel with the reason it was first masked.
///
/// Masks only ever get set. Masking an already masked channel keeps the
/// original reason.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMask {
    reasons: Vec<Option<MaskReason>>,
}

impl ChannelMask {
    pub fn new(channels: u8) -> Self {
        Self {
            reasons: vec![None; usize::from(channels)],
        }
    }

    pub fn mask(&mut self, channel: u8, reason: MaskReason) {
        match self.reasons.get_mut(usize::from(channel)) {
            Some(slot) if slot.is_none() => *slot = Some(reason),
            _ => {}
        }
    }

    pub fn mask_all(&mut self, reason: MaskReason) {
        for slot in self.reasons.iter_mut().filter(|r| r.is_none()) {
            *slot = Some(reason);
        }
    }

    pub fn is_masked(&self, channel: u8) -> bool {
        self.reason(channel).is_some()
    }

    pub fn reason(&self, channel: u8) -> Option<MaskReason> {
        self.reasons.get(usize::from(channel)).copied().flatten()
    }

    pub fn masked_count(&self) -> usize {
        self.reasons.iter().filter(|r| r.is_some()).count()
    }

    /// Channels that are still usable, ascending.
    pub fn unmasked(&self) -> impl Iterator<Item = u8> + '_ {
        self.reasons
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_none())
            .filter_map(|(ch, _)| u8::try_from(ch).ok())
    }

    pub fn flags(&self) -> Vec<bool> {
        self.reasons.iter().map(Option::is_some).collect()
    }
}

/// Outcome of the channel classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassificationSummary {
    pub measured: usize,
    pub hot: usize,
    pub dead: usize,
    pub noisy: usize,
    /// `hot + dead` reached the warn ratio.
    pub degraded: bool,
    /// `hot + dead` reached the severe ratio.
    pub suspect: bool,
    /// `noisy` reached the severe ratio; baselines may be meaningless.
    pub sampling_suspect: bool,
}

/// Resolved global threshold of one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConstants {
    /// Fitted response, ADC counts per DAC step.
    pub slope: f64,
    /// Fitted response at DAC 0, ADC counts.
    pub intercept: f64,
    pub dac: u16,
    /// Target the DAC was solved for, ADC counts.
    pub target: f64,
    /// Level measured on the probe channel at `dac` and mid trim, ADC counts.
    /// Re-measured whenever `dac` is raised.
    pub realized: f64,
}

/// Effective thresholds at mid trim.
#[derive(Debug, Clone, PartialEq)]
pub struct MidTrimSummary {
    /// Per channel, `None` where the channel was not measured.
    pub channel_eff: Vec<Option<f64>>,
    /// Median over the measured channels.
    pub device_eff: f64,
}

/// Trim decision for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimResult {
    /// Average local slope, counts per trim step, signed; 0 when unusable.
    pub slope: f64,
    /// Highest trim inside the linear region; 0 when unusable.
    pub trim_max: u8,
    pub best_trim: u8,
    /// Realized threshold minus channel baseline at `best_trim`.
    pub eff: f64,
    /// Realized threshold at `best_trim`.
    pub median: f64,
}

impl TrimResult {
    pub fn is_usable(&self) -> bool {
        self.trim_max > 0 && self.slope.abs() > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DeviceStatus {
    #[default]
    Pending,
    Resolved,
    /// Every channel masked; the cause is kept for the report.
    Masked(CalibError),
}

/// Everything learned about one device during a run.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub spec: DeviceSpec,
    pub baselines: Vec<BaselineRecord>,
    pub device_baseline: Option<DeviceBaseline>,
    pub mask: ChannelMask,
    pub classification: Option<ClassificationSummary>,
    pub threshold: Option<ThresholdConstants>,
    pub mid: Option<MidTrimSummary>,
    pub trims: Vec<Option<TrimResult>>,
    /// Whether the trim optimizer re-entered with a raised DAC.
    pub second_pass: bool,
    pub status: DeviceStatus,
    thdac_max: u16,
    trim_mid: u8,
}

impl DeviceContext {
    pub fn new(spec: DeviceSpec, thdac_max: u16, trim_mid: u8) -> Self {
        let n = usize::from(spec.channels);
        Self {
            baselines: vec![BaselineRecord::UNMEASURED; n],
            device_baseline: None,
            mask: ChannelMask::new(spec.channels),
            classification: None,
            threshold: None,
            mid: None,
            trims: vec![None; n],
            second_pass: false,
            status: DeviceStatus::Pending,
            thdac_max,
            trim_mid,
            spec,
        }
    }

    pub fn channels(&self) -> u8 {
        self.spec.channels
    }

    pub fn channel_key(&self, channel: u8) -> ChannelKey {
        self.spec.key.channel(channel)
    }

    pub fn baseline(&self, channel: u8) -> BaselineRecord {
        self.baselines
            .get(usize::from(channel))
            .copied()
            .unwrap_or_default()
    }

    pub fn trim(&self, channel: u8) -> Option<TrimResult> {
        self.trims.get(usize::from(channel)).copied().flatten()
    }

    pub fn thdac_max(&self) -> u16 {
        self.thdac_max
    }

    pub fn trim_mid(&self) -> u8 {
        self.trim_mid
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, DeviceStatus::Masked(_))
    }

    /// Give up on the device: mask everything and drop any partial solution.
    pub fn fail_device(&mut self, cause: CalibError) {
        tracing::warn!(device = %self.spec.key, cause = %cause, "device masked");
        self.mask.mask_all(MaskReason::DeviceFailed);
        self.threshold = None;
        self.trims.iter_mut().for_each(|t| *t = None);
        self.status = DeviceStatus::Masked(cause);
    }

    /// Threshold DAC to program: the resolved value, or the register maximum
    /// when nothing was resolved.
    pub fn threshold_dac(&self) -> u16 {
        self.threshold.map_or(self.thdac_max, |t| t.dac)
    }

    /// Trim to program for `channel`: 0 for masked channels, mid when no trim
    /// was chosen.
    pub fn channel_trim(&self, channel: u8) -> u8 {
        if self.mask.is_masked(channel) {
            return 0;
        }
        self.trim(channel).map_or(self.trim_mid, |t| t.best_trim)
    }

    pub fn register_map(&self) -> RegisterMap {
        RegisterMap {
            threshold_dac: self.threshold_dac(),
            channel_trim: (0..self.channels()).map(|ch| self.channel_trim(ch)).collect(),
            channel_mask: self.mask.flags(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceFlavor, Side};
    use thrcal_traits::DeviceKey;

    fn ctx() -> DeviceContext {
        let spec = DeviceSpec::new(DeviceKey::new("D", 0), Side::A, 1, DeviceFlavor::Mmfe8)
            .with_channels(4);
        DeviceContext::new(spec, 1023, 14)
    }

    #[test]
    fn mask_keeps_first_reason() {
        let mut m = ChannelMask::new(3);
        m.mask(1, MaskReason::Unconnected);
        m.mask(1, MaskReason::Hot);
        m.mask_all(MaskReason::DeviceFailed);
        assert_eq!(m.reason(1), Some(MaskReason::Unconnected));
        assert_eq!(m.reason(0), Some(MaskReason::DeviceFailed));
        assert_eq!(m.masked_count(), 3);
        assert_eq!(m.unmasked().count(), 0);
    }

    #[test]
    fn out_of_range_channel_is_ignored() {
        let mut m = ChannelMask::new(2);
        m.mask(9, MaskReason::Hot);
        assert_eq!(m.masked_count(), 0);
        assert!(!m.is_masked(9));
    }

    #[test]
    fn failed_device_register_map() {
        let mut c = ctx();
        c.threshold = Some(ThresholdConstants {
            slope: 2.5,
            intercept: 50.0,
            dac: 300,
            target: 800.0,
            realized: 801.0,
        });
        c.fail_device(CalibError::NoData);
        let regs = c.register_map();
        assert_eq!(regs.threshold_dac, 1023);
        assert_eq!(regs.channel_trim, vec![0; 4]);
        assert_eq!(regs.channel_mask, vec![true; 4]);
        assert!(c.is_failed());
    }

    #[test]
    fn untrimmed_channels_stay_at_mid() {
        let mut c = ctx();
        c.trims[2] = Some(TrimResult {
            slope: 4.0,
            trim_max: 31,
            best_trim: 9,
            eff: 40.0,
            median: 700.0,
        });
        c.mask.mask(3, MaskReason::Hot);
        assert_eq!(c.register_map().channel_trim, vec![14, 14, 9, 0]);
    }
}
