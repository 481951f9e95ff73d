//! Seeded analog model of a multi-channel front-end device.
//!
//! Every channel gets a baseline, a noise level, a threshold offset and a trim
//! response that is linear up to a per-channel saturation point and flat
//! beyond it. Samples are 12-bit ADC counts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, StandardNormal};
use thrcal_traits::{BoxError, ChannelKey, DacSettings, DeviceKey, Probe, RegisterMap};

use crate::error::{HwError, Result};

/// Largest value the ADC reports.
pub const ADC_MAX: u16 = 4095;

/// Knobs for the simulated device.
#[derive(Debug, Clone)]
pub struct SimParams {
    pub seed: u64,
    pub channels: u8,
    /// Mean channel baseline in ADC counts.
    pub baseline_adc: f64,
    /// Channel-to-channel baseline spread (1 sigma).
    pub baseline_spread_adc: f64,
    /// Per-sample noise (1 sigma).
    pub noise_rms_adc: f64,
    /// Threshold response to the global DAC, counts per DAC step.
    pub thdac_slope: f64,
    pub thdac_intercept: f64,
    /// Channel-to-channel threshold offset spread (1 sigma).
    pub channel_offset_spread_adc: f64,
    /// Mean trim response, counts per trim step.
    pub trim_gain_adc: f64,
    pub trim_gain_spread: f64,
    /// Trim value the threshold response is centred on.
    pub trim_mid: u8,
    /// Saturation points are drawn uniformly from this range.
    pub trim_saturation: (u8, u8),
    /// Probability that a call fails with a timeout.
    pub failure_rate: f64,
    /// Probability that a single sample is replaced by a random count.
    pub outlier_rate: f64,
    pub hot_channels: Vec<u8>,
    pub dead_channels: Vec<u8>,
    pub noisy_channels: Vec<u8>,
    /// Channels that never answer.
    pub silent_channels: Vec<u8>,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            channels: 64,
            baseline_adc: 680.0,
            baseline_spread_adc: 8.0,
            noise_rms_adc: 14.0,
            thdac_slope: 2.5,
            thdac_intercept: 250.0,
            channel_offset_spread_adc: 12.0,
            trim_gain_adc: 4.0,
            trim_gain_spread: 0.4,
            trim_mid: 14,
            trim_saturation: (22, 31),
            failure_rate: 0.0,
            outlier_rate: 0.002,
            hot_channels: Vec::new(),
            dead_channels: Vec::new(),
            noisy_channels: Vec::new(),
            silent_channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct ChannelModel {
    baseline: f64,
    noise: f64,
    offset: f64,
    trim_gain: f64,
    saturation: u8,
    silent: bool,
}

/// Simulated device implementing [`thrcal_traits::Acquirer`].
#[derive(Debug)]
pub struct SimulatedFrontend {
    params: SimParams,
    channels: Vec<ChannelModel>,
    rng: StdRng,
    acquisitions: u64,
    written: Vec<(DeviceKey, RegisterMap)>,
}

impl SimulatedFrontend {
    pub fn new(params: SimParams) -> Result<Self> {
        if !(0.0..=1.0).contains(&params.failure_rate) {
            return Err(HwError::InvalidModel(format!(
                "failure_rate {} outside [0, 1]",
                params.failure_rate
            )));
        }
        if !(0.0..=1.0).contains(&params.outlier_rate) {
            return Err(HwError::InvalidModel(format!(
                "outlier_rate {} outside [0, 1]",
                params.outlier_rate
            )));
        }
        let (sat_lo, sat_hi) = params.trim_saturation;
        if sat_lo > sat_hi {
            return Err(HwError::InvalidModel(
                "trim_saturation range is inverted".into(),
            ));
        }
        let spread = |sd: f64| {
            Normal::new(0.0, sd.max(0.0))
                .map_err(|e| HwError::InvalidModel(format!("spread {sd}: {e}")))
        };
        let baseline_d = spread(params.baseline_spread_adc)?;
        let offset_d = spread(params.channel_offset_spread_adc)?;
        let gain_d = spread(params.trim_gain_spread)?;

        let mut rng = StdRng::seed_from_u64(params.seed);
        let channels = (0..params.channels)
            .map(|ch| {
                let mut baseline = params.baseline_adc + baseline_d.sample(&mut rng);
                let mut noise = params.noise_rms_adc;
                if params.hot_channels.contains(&ch) {
                    baseline *= 1.3;
                }
                if params.dead_channels.contains(&ch) {
                    baseline *= 0.5;
                }
                if params.noisy_channels.contains(&ch) {
                    noise *= 12.0;
                }
                ChannelModel {
                    baseline,
                    noise,
                    offset: offset_d.sample(&mut rng),
                    trim_gain: (params.trim_gain_adc + gain_d.sample(&mut rng)).max(0.5),
                    saturation: rng.gen_range(sat_lo..=sat_hi),
                    silent: params.silent_channels.contains(&ch),
                }
            })
            .collect();

        Ok(Self {
            params,
            channels,
            rng,
            acquisitions: 0,
            written: Vec::new(),
        })
    }

    /// Build a model whose seed is derived from `params.seed` and the device key,
    /// so every device in a run gets its own reproducible channel spread.
    pub fn for_device(mut params: SimParams, key: &DeviceKey) -> Result<Self> {
        params.seed = device_seed(params.seed, key);
        Self::new(params)
    }

    /// Noise-free level the model would report for `channel` under `dac`.
    pub fn expected_level(&self, channel: u8, dac: DacSettings) -> Option<f64> {
        let m = self.channels.get(usize::from(channel))?;
        Some(self.level(m, dac))
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    /// Register maps pushed through `write_device_config`, in order.
    pub fn written(&self) -> &[(DeviceKey, RegisterMap)] {
        &self.written
    }

    fn level(&self, m: &ChannelModel, dac: DacSettings) -> f64 {
        match dac.probe {
            Probe::Baseline => m.baseline,
            Probe::Threshold => {
                let trim = f64::from(dac.trim.min(m.saturation));
                self.params.thdac_intercept
                    + self.params.thdac_slope * f64::from(dac.threshold_dac)
                    + m.offset
                    + m.trim_gain * (trim - f64::from(self.params.trim_mid))
            }
        }
    }

    fn sample_channel(&mut self, channel: u8, dac: DacSettings, count: usize) -> Result<Vec<u16>> {
        let m = self
            .channels
            .get(usize::from(channel))
            .cloned()
            .ok_or(HwError::NoSuchChannel(channel))?;
        if m.silent {
            return Err(HwError::NoResponse(channel));
        }
        if self.params.failure_rate > 0.0 && self.rng.gen_bool(self.params.failure_rate) {
            return Err(HwError::Timeout);
        }
        let level = self.level(&m, dac);
        let outlier_rate = self.params.outlier_rate;
        let samples = (0..count)
            .map(|_| {
                if outlier_rate > 0.0 && self.rng.gen_bool(outlier_rate) {
                    return self.rng.gen_range(0..=ADC_MAX);
                }
                let z: f64 = StandardNormal.sample(&mut self.rng);
                to_counts(level + m.noise * z)
            })
            .collect();
        Ok(samples)
    }
}

impl thrcal_traits::Acquirer for SimulatedFrontend {
    fn acquire(
        &mut self,
        channel: &ChannelKey,
        dac: DacSettings,
        count: usize,
    ) -> std::result::Result<Vec<u16>, BoxError> {
        self.acquisitions = self.acquisitions.saturating_add(1);
        let out = self.sample_channel(channel.channel, dac, count);
        if let Err(e) = &out {
            tracing::trace!(channel = %channel, error = %e, "simulated acquisition failed");
        }
        Ok(out?)
    }

    fn write_device_config(
        &mut self,
        device: &DeviceKey,
        registers: &RegisterMap,
    ) -> std::result::Result<(), BoxError> {
        tracing::debug!(
            device = %device,
            threshold_dac = registers.threshold_dac,
            masked = registers.channel_mask.iter().filter(|m| **m).count(),
            "simulated register write"
        );
        self.written.push((device.clone(), registers.clone()));
        Ok(())
    }
}

fn to_counts(v: f64) -> u16 {
    if !v.is_finite() {
        return 0;
    }
    v.round().clamp(0.0, f64::from(ADC_MAX)) as u16
}

/// FNV-1a over the device name and index, folded into the base seed.
pub fn device_seed(base: u64, key: &DeviceKey) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = FNV_OFFSET;
    for b in key.device.bytes().chain(std::iter::once(key.vmm)) {
        h ^= u64::from(b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h ^ base
}

#[cfg(test)]
mod tests {
    use super::*;
    use thrcal_traits::Acquirer;

    fn quiet() -> SimParams {
        SimParams {
            noise_rms_adc: 0.0,
            outlier_rate: 0.0,
            ..SimParams::default()
        }
    }

    #[test]
    fn same_seed_same_samples() {
        let key = DeviceKey::new("MMFE8_L1P1_HOL", 0);
        let mut a = SimulatedFrontend::for_device(SimParams::default(), &key).unwrap();
        let mut b = SimulatedFrontend::for_device(SimParams::default(), &key).unwrap();
        let ch = key.channel(5);
        let sa = a.acquire(&ch, DacSettings::baseline(), 50).unwrap();
        let sb = b.acquire(&ch, DacSettings::baseline(), 50).unwrap();
        assert_eq!(sa, sb);
    }

    #[test]
    fn different_devices_get_different_seeds() {
        let a = device_seed(1, &DeviceKey::new("X", 0));
        let b = device_seed(1, &DeviceKey::new("X", 1));
        assert_ne!(a, b);
    }

    #[test]
    fn trim_response_saturates() {
        let params = SimParams {
            trim_saturation: (20, 20),
            ..quiet()
        };
        let sim = SimulatedFrontend::new(params).unwrap();
        let at = |t| sim.expected_level(0, DacSettings::threshold(200, t)).unwrap();
        assert!(at(10) < at(14));
        assert!(at(14) < at(20));
        assert_eq!(at(20), at(31));
    }

    #[test]
    fn silent_channel_errors() {
        let params = SimParams {
            silent_channels: vec![3],
            ..quiet()
        };
        let mut sim = SimulatedFrontend::new(params).unwrap();
        let key = DeviceKey::new("D", 0).channel(3);
        let err = sim.acquire(&key, DacSettings::baseline(), 10).unwrap_err();
        assert!(err.to_string().contains("no response"));
    }

    #[test]
    fn rejects_bad_failure_rate() {
        let params = SimParams {
            failure_rate: 1.5,
            ..SimParams::default()
        };
        assert!(matches!(
            SimulatedFrontend::new(params),
            Err(HwError::InvalidModel(_))
        ));
    }
}
