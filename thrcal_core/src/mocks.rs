//! Deterministic acquirers for tests and examples.
//!
//! [`LinearFrontend`] models a device with an exactly linear threshold
//! response and a trim response that saturates per channel. Its noise is a
//! fixed symmetric pattern, so medians and means land on the model level and
//! the baseline RMS equals the configured value.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use thrcal_traits::{
    Acquirer, BoxError, ChannelKey, DacSettings, DeviceKey, Probe, RegisterMap,
};

/// Noise offsets repeated over every batch. Median 0, mean 0, RMS 10.
const NOISE_CYCLE: [f64; 10] = [0.0, 0.0, 20.0, -20.0, 10.0, -10.0, 0.0, 0.0, 0.0, 0.0];

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Acquisition log shared with the test that handed the acquirer away.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    acquisitions: Arc<Mutex<Vec<(ChannelKey, DacSettings)>>>,
    writes: Arc<Mutex<Vec<(DeviceKey, RegisterMap)>>>,
}

impl CallLog {
    pub fn acquisitions(&self) -> Vec<(ChannelKey, DacSettings)> {
        lock(&self.acquisitions).clone()
    }

    pub fn sampled_channels(&self) -> Vec<u8> {
        let mut chans: Vec<u8> = lock(&self.acquisitions)
            .iter()
            .map(|(k, _)| k.channel)
            .collect();
        chans.sort_unstable();
        chans.dedup();
        chans
    }

    pub fn writes(&self) -> Vec<(DeviceKey, RegisterMap)> {
        lock(&self.writes).clone()
    }
}

/// Noiseless-in-expectation linear device model.
#[derive(Debug, Clone)]
pub struct LinearFrontend {
    /// Baseline per channel, ADC counts.
    pub baselines: Vec<f64>,
    /// RMS of the noise pattern, ADC counts.
    pub noise_rms: f64,
    /// Threshold at DAC 0 and mid trim.
    pub intercept: f64,
    /// Threshold counts per DAC step.
    pub slope: f64,
    /// Per-channel multiplier on `slope`; 0 pins a channel's threshold.
    pub dac_gain: Vec<f64>,
    /// Extra threshold offset per channel.
    pub offsets: Vec<f64>,
    /// Threshold counts per trim step.
    pub trim_gain: f64,
    pub trim_mid: u8,
    /// Trim above which the response stays flat, per channel.
    pub saturation: Vec<u8>,
    /// Channels that always fail.
    pub failing: Vec<u8>,
    log: CallLog,
}

impl LinearFrontend {
    /// `channels` identical channels at `baseline` with RMS `noise_rms`.
    pub fn new(channels: u8, baseline: f64, noise_rms: f64) -> Self {
        let n = usize::from(channels);
        Self {
            baselines: vec![baseline; n],
            noise_rms,
            intercept: 50.0,
            slope: 2.5,
            dac_gain: vec![1.0; n],
            offsets: vec![0.0; n],
            trim_gain: 4.0,
            trim_mid: 14,
            saturation: vec![31; n],
            failing: Vec::new(),
            log: CallLog::default(),
        }
    }

    pub fn with_response(mut self, intercept: f64, slope: f64) -> Self {
        self.intercept = intercept;
        self.slope = slope;
        self
    }

    pub fn with_offset(mut self, channel: u8, offset: f64) -> Self {
        if let Some(o) = self.offsets.get_mut(usize::from(channel)) {
            *o = offset;
        }
        self
    }

    pub fn with_dac_gain(mut self, channel: u8, gain: f64) -> Self {
        if let Some(g) = self.dac_gain.get_mut(usize::from(channel)) {
            *g = gain;
        }
        self
    }

    pub fn with_saturation(mut self, channel: u8, trim: u8) -> Self {
        if let Some(s) = self.saturation.get_mut(usize::from(channel)) {
            *s = trim;
        }
        self
    }

    pub fn with_failing(mut self, channel: u8) -> Self {
        self.failing.push(channel);
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Level the model reports for `channel` under `dac`, before noise.
    pub fn level(&self, channel: u8, dac: DacSettings) -> f64 {
        let ch = usize::from(channel);
        let baseline = self.baselines.get(ch).copied().unwrap_or(0.0);
        match dac.probe {
            Probe::Baseline => baseline,
            Probe::Threshold => {
                let sat = self.saturation.get(ch).copied().unwrap_or(u8::MAX);
                let gain = self.dac_gain.get(ch).copied().unwrap_or(1.0);
                self.intercept
                    + self.slope * gain * f64::from(dac.threshold_dac)
                    + self.offsets.get(ch).copied().unwrap_or(0.0)
                    + self.trim_gain * (f64::from(dac.trim.min(sat)) - f64::from(self.trim_mid))
            }
        }
    }
}

impl Acquirer for LinearFrontend {
    fn acquire(
        &mut self,
        channel: &ChannelKey,
        dac: DacSettings,
        count: usize,
    ) -> Result<Vec<u16>, BoxError> {
        lock(&self.log.acquisitions).push((channel.clone(), dac));
        if self.failing.contains(&channel.channel) {
            return Err(format!("channel {} does not answer", channel.channel).into());
        }
        let level = self.level(channel.channel, dac);
        let scale = self.noise_rms / 10.0;
        Ok((0..count)
            .map(|i| {
                let v = level + NOISE_CYCLE[i % NOISE_CYCLE.len()] * scale;
                v.round().clamp(0.0, 4095.0) as u16
            })
            .collect())
    }

    fn write_device_config(
        &mut self,
        device: &DeviceKey,
        registers: &RegisterMap,
    ) -> Result<(), BoxError> {
        lock(&self.log.writes).push((device.clone(), registers.clone()));
        Ok(())
    }
}

/// Acquirer that replays a fixed script of responses, then fails.
#[derive(Debug, Default)]
pub struct ScriptedAcquirer {
    script: VecDeque<Result<Vec<u16>, String>>,
    fail_writes: bool,
}

impl ScriptedAcquirer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_ok(mut self, batch: Vec<u16>) -> Self {
        self.script.push_back(Ok(batch));
        self
    }

    pub fn then_err(mut self, msg: &str) -> Self {
        self.script.push_back(Err(msg.to_string()));
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

impl Acquirer for ScriptedAcquirer {
    fn acquire(
        &mut self,
        _channel: &ChannelKey,
        _dac: DacSettings,
        _count: usize,
    ) -> Result<Vec<u16>, BoxError> {
        match self.script.pop_front() {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(msg)) => Err(msg.into()),
            None => Err("script exhausted".into()),
        }
    }

    fn write_device_config(
        &mut self,
        _device: &DeviceKey,
        _registers: &RegisterMap,
    ) -> Result<(), BoxError> {
        if self.fail_writes {
            return Err("write rejected".into());
        }
        Ok(())
    }
}
