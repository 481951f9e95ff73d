//! Channels with no sensor behind them.
//!
//! Boards at the edge of a wedge only have part of their inputs wired. Those
//! channels are never sampled and always end up masked.

use std::ops::RangeInclusive;

use thrcal_traits::{ChannelKey, DeviceKey};

/// One exclusion: every device whose name contains `pattern`, at index `vmm`,
/// has channels `channels` unconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedRule {
    pattern: String,
    vmm: u8,
    channels: RangeInclusive<u8>,
}

impl UnconnectedRule {
    pub fn new(pattern: impl Into<String>, vmm: u8, channels: RangeInclusive<u8>) -> Self {
        Self {
            pattern: pattern.into(),
            vmm,
            channels,
        }
    }

    fn matches(&self, key: &ChannelKey) -> bool {
        key.device.vmm == self.vmm
            && self.channels.contains(&key.channel)
            && key.device.device.contains(self.pattern.as_str())
    }
}

/// Wedge-edge boards that are known to be partly unconnected.
const BUILTIN: &[(&str, u8, u8, u8)] = &[
    // Innermost strip boards: first strips fall outside the active area.
    ("MMFE8_L1P1_HOL", 0, 0, 7),
    ("MMFE8_L1P1_HOR", 0, 0, 7),
    ("MMFE8_L4P1_HOL", 0, 0, 7),
    ("MMFE8_L4P1_HOR", 0, 0, 7),
    // Outermost strip boards: last device is only partly populated.
    ("MMFE8_L1P8_HOL", 7, 48, 63),
    ("MMFE8_L1P8_HOR", 7, 48, 63),
    ("SFEB8_Q3", 7, 40, 63),
    // Small pad boards leave the top device half empty.
    ("PFEB_Q1", 2, 32, 63),
];

/// Lookup table of unconnected channel ranges.
#[derive(Debug, Clone)]
pub struct ChannelGeometry {
    rules: Vec<UnconnectedRule>,
}

impl Default for ChannelGeometry {
    fn default() -> Self {
        Self {
            rules: BUILTIN
                .iter()
                .map(|&(p, vmm, first, last)| UnconnectedRule::new(p, vmm, first..=last))
                .collect(),
        }
    }
}

impl ChannelGeometry {
    /// A table with no exclusions.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn push(&mut self, rule: UnconnectedRule) {
        self.rules.push(rule);
    }

    pub fn with_rule(mut self, rule: UnconnectedRule) -> Self {
        self.push(rule);
        self
    }

    pub fn is_unconnected(&self, key: &ChannelKey) -> bool {
        self.rules.iter().any(|r| r.matches(key))
    }

    /// Per-channel flags for one device.
    pub fn unconnected_channels(&self, device: &DeviceKey, channels: u8) -> Vec<bool> {
        (0..channels)
            .map(|ch| self.is_unconnected(&device.channel(ch)))
            .collect()
    }
}
