//! Retrying wrapper around an [`Acquirer`].
//!
//! Every batch the pipeline takes goes through [`Sampler::acquire`]: up to
//! `max_attempts` calls spaced by `retry_delay` on the injected clock. A short
//! batch is accepted with a warning, an empty one is retried like an error.
use std::sync::Arc;

use thrcal_traits::clock::Clock;
use thrcal_traits::{Acquirer, ChannelKey, DacSettings, DeviceKey, RegisterMap};

use crate::config::SamplingCfg;
use crate::device::DeviceFlavor;
use crate::error::CalibError;
use crate::hw_error::map_hw_error;
use crate::stats;

pub struct Sampler<A> {
    acquirer: A,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: SamplingCfg,
    calls: u64,
}

impl<A> core::fmt::Debug for Sampler<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sampler")
            .field("cfg", &self.cfg)
            .field("calls", &self.calls)
            .finish()
    }
}

impl<A: Acquirer> Sampler<A> {
    pub fn new(acquirer: A, clock: Arc<dyn Clock + Send + Sync>, cfg: SamplingCfg) -> Self {
        Self {
            acquirer,
            clock,
            cfg,
            calls: 0,
        }
    }

    pub fn cfg(&self) -> &SamplingCfg {
        &self.cfg
    }

    /// Calls made to the underlying acquirer, retries included.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Sleep for one retry delay.
    pub fn pause(&self) {
        self.clock.sleep(self.cfg.retry_delay);
    }

    /// Take up to `count` samples of `channel`, retrying transient failures.
    pub fn acquire(
        &mut self,
        channel: &ChannelKey,
        dac: DacSettings,
        count: usize,
    ) -> Result<Vec<u16>, CalibError> {
        let attempts = self.cfg.max_attempts.max(1);
        let mut reason = CalibError::NoData.to_string();
        for attempt in 1..=attempts {
            self.calls = self.calls.saturating_add(1);
            match self.acquirer.acquire(channel, dac, count) {
                Ok(batch) if !batch.is_empty() => {
                    if batch.len() != count {
                        tracing::warn!(
                            channel = %channel,
                            requested = count,
                            received = batch.len(),
                            "partial batch"
                        );
                    }
                    return Ok(batch);
                }
                Ok(_) => {
                    tracing::debug!(channel = %channel, attempt, "empty batch");
                    reason = "empty batch".to_string();
                }
                Err(e) => {
                    let mapped = map_hw_error(&*e);
                    tracing::debug!(channel = %channel, attempt, error = %mapped, "acquisition failed");
                    reason = mapped.to_string();
                }
            }
            if attempt < attempts {
                self.pause();
            }
        }
        tracing::warn!(channel = %channel, attempts, reason = %reason, "giving up on channel");
        Err(CalibError::Sampling {
            channel: channel.clone(),
            attempts,
            reason,
        })
    }

    /// Median of one nominal batch.
    pub fn median_level(&mut self, channel: &ChannelKey, dac: DacSettings) -> Result<f64, CalibError> {
        let batch = self.acquire(channel, dac, self.cfg.sample_count.max(1))?;
        stats::median(&batch)
            .map(f64::from)
            .ok_or(CalibError::NoData)
    }

    /// Mean of one oversampled batch after dropping samples `margin_mv` or
    /// more away from its median.
    pub fn pruned_mean_level(
        &mut self,
        channel: &ChannelKey,
        dac: DacSettings,
        margin_mv: f64,
        flavor: DeviceFlavor,
    ) -> Result<f64, CalibError> {
        let batch = self.acquire(channel, dac, self.cfg.oversampled())?;
        let center = stats::median(&batch).ok_or(CalibError::NoData)?;
        let (kept, pruned) = stats::prune_outliers(&batch, f64::from(center), margin_mv, flavor);
        if pruned > 0 {
            tracing::trace!(channel = %channel, pruned, "pruned level samples");
        }
        if kept.is_empty() {
            return Err(CalibError::NoData);
        }
        Ok(stats::mean(&kept))
    }

    /// Push a register set. Not retried.
    pub fn write_registers(
        &mut self,
        device: &DeviceKey,
        registers: &RegisterMap,
    ) -> Result<(), CalibError> {
        self.acquirer
            .write_device_config(device, registers)
            .map_err(|e| map_hw_error(&*e))
    }
}
