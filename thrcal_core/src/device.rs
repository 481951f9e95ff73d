//! Static description of the device being calibrated.

use std::fmt;

use thrcal_traits::DeviceKey;

/// Board flavor; decides the ADC input scaling and whether trimmers exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFlavor {
    /// Strip board, direct ADC input, per-channel trimmers.
    Mmfe8,
    /// Strip board behind a 1.5x input divider, per-channel trimmers.
    Sfeb,
    /// Pad board behind a 1.5x input divider, threshold set without trimming.
    Pfeb,
}

impl DeviceFlavor {
    /// Factor between the voltage at the ADC and the voltage at the channel.
    pub fn input_scale(self) -> f64 {
        match self {
            Self::Mmfe8 => 1.0,
            Self::Sfeb | Self::Pfeb => 1.5,
        }
    }

    pub fn has_trimmers(self) -> bool {
        !matches!(self, Self::Pfeb)
    }
}

impl fmt::Display for DeviceFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mmfe8 => write!(f, "mmfe8"),
            Self::Sfeb => write!(f, "sfeb"),
            Self::Pfeb => write!(f, "pfeb"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    C,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::C => write!(f, "C"),
        }
    }
}

/// Everything the engine needs to know about one device before sampling it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub key: DeviceKey,
    pub side: Side,
    pub sector: u8,
    pub flavor: DeviceFlavor,
    pub channels: u8,
}

impl DeviceSpec {
    pub fn new(key: DeviceKey, side: Side, sector: u8, flavor: DeviceFlavor) -> Self {
        Self {
            key,
            side,
            sector,
            flavor,
            channels: 64,
        }
    }

    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = channels;
        self
    }
}
