//! Interfaces shared between the calibration core and front-end transports.
//!
//! The core never talks to silicon directly: every sample and every register
//! write goes through [`Acquirer`]. Keys are plain value types so they can be
//! used as map keys and sent across worker threads.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::fmt;

/// Error type crossing the transport boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One multi-channel device (VMM) on a front-end board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    /// Board identifier, e.g. `MMFE8_L1P1_HOL`.
    pub device: String,
    /// Device index on the board.
    pub vmm: u8,
}

impl DeviceKey {
    pub fn new(device: impl Into<String>, vmm: u8) -> Self {
        Self {
            device: device.into(),
            vmm,
        }
    }

    pub fn channel(&self, channel: u8) -> ChannelKey {
        ChannelKey {
            device: self.clone(),
            channel,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/vmm{}", self.device, self.vmm)
    }
}

/// One analog input of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub device: DeviceKey,
    pub channel: u8,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/ch{}", self.device, self.channel)
    }
}

/// Which analog quantity the monitor output is routed to while sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Probe {
    /// Channel resting voltage.
    Baseline,
    /// Comparator threshold as seen by the channel (global DAC plus trim).
    Threshold,
}

/// Register settings applied before a batch is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DacSettings {
    pub probe: Probe,
    pub threshold_dac: u16,
    pub trim: u8,
}

impl DacSettings {
    pub fn baseline() -> Self {
        Self {
            probe: Probe::Baseline,
            threshold_dac: 0,
            trim: 0,
        }
    }

    pub fn threshold(threshold_dac: u16, trim: u8) -> Self {
        Self {
            probe: Probe::Threshold,
            threshold_dac,
            trim,
        }
    }
}

/// Resolved register set pushed back to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    pub threshold_dac: u16,
    pub channel_trim: Vec<u8>,
    pub channel_mask: Vec<bool>,
}

/// Sampling path to the hardware.
///
/// Concurrent calls against the same device are undefined; callers give each
/// device its own acquirer or serialize access.
pub trait Acquirer {
    /// Take `count` raw ADC samples of `channel` under `dac`.
    ///
    /// A transport may return fewer samples than requested.
    fn acquire(
        &mut self,
        channel: &ChannelKey,
        dac: DacSettings,
        count: usize,
    ) -> Result<Vec<u16>, BoxError>;

    /// Push a register set to the device.
    fn write_device_config(
        &mut self,
        device: &DeviceKey,
        registers: &RegisterMap,
    ) -> Result<(), BoxError>;
}

impl<A: Acquirer + ?Sized> Acquirer for Box<A> {
    fn acquire(
        &mut self,
        channel: &ChannelKey,
        dac: DacSettings,
        count: usize,
    ) -> Result<Vec<u16>, BoxError> {
        (**self).acquire(channel, dac, count)
    }

    fn write_device_config(
        &mut self,
        device: &DeviceKey,
        registers: &RegisterMap,
    ) -> Result<(), BoxError> {
        (**self).write_device_config(device, registers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_display_and_order() {
        let dev = DeviceKey::new("MMFE8_L1P1_HOL", 3);
        assert_eq!(dev.to_string(), "MMFE8_L1P1_HOL/vmm3");
        assert_eq!(dev.channel(17).to_string(), "MMFE8_L1P1_HOL/vmm3/ch17");
        assert!(dev.channel(2) < dev.channel(10));
        assert!(DeviceKey::new("A", 7) < DeviceKey::new("B", 0));
    }
}
