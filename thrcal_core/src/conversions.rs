//! `From` implementations bridging `thrcal_config` types to `thrcal_core` types.

use std::time::Duration;

use thrcal_traits::DeviceKey;

use crate::config::{CalibrationCfg, CalibrationMode, ClassifierCfg, SamplingCfg, ThresholdCfg, TrimCfg};
use crate::device::{DeviceFlavor, DeviceSpec, Side};
use crate::geometry::{ChannelGeometry, UnconnectedRule};

// ── SamplingCfg ──────────────────────────────────────────────────────────────

impl From<&thrcal_config::SamplingCfg> for SamplingCfg {
    fn from(c: &thrcal_config::SamplingCfg) -> Self {
        Self {
            sample_count: c.sample_count,
            oversampling: c.oversampling,
            prune_cutoff_mv: c.prune_cutoff_mv,
            max_attempts: c.max_attempts,
            retry_delay: Duration::from_millis(c.retry_delay_ms),
        }
    }
}

// ── ClassifierCfg ────────────────────────────────────────────────────────────

impl From<&thrcal_config::ClassifierCfg> for ClassifierCfg {
    fn from(c: &thrcal_config::ClassifierCfg) -> Self {
        Self {
            hot_factor: c.hot_factor,
            dead_factor: c.dead_factor,
            rms_cutoff_mv: c.rms_cutoff_mv,
            ..Self::default()
        }
    }
}

// ── ThresholdCfg ─────────────────────────────────────────────────────────────

impl From<&thrcal_config::ThresholdCfg> for ThresholdCfg {
    fn from(c: &thrcal_config::ThresholdCfg) -> Self {
        Self {
            rms_factor: c.rms_factor,
            trim_offset_mv: c.trim_offset_mv,
            fixed_offset_mv: c.fixed_offset_mv,
            guess_points: c.guess_points.clone(),
            guess_margin_mv: c.guess_margin_mv,
            slope_min: c.slope_min,
            slope_max: c.slope_max,
            deviation_tolerance: c.deviation_tolerance,
            min_margin_mv: c.min_margin_mv,
            thdac_max: c.thdac_max,
        }
    }
}

// ── TrimCfg ──────────────────────────────────────────────────────────────────

impl From<&thrcal_config::TrimCfg> for TrimCfg {
    fn from(c: &thrcal_config::TrimCfg) -> Self {
        Self {
            low: c.low,
            mid: c.mid,
            high: c.high,
            trim_max: c.trim_max,
            slope_tolerance: c.slope_tolerance,
            bump_cutoff_mv: c.bump_cutoff_mv,
            unusable_warn_ratio: c.unusable_warn_ratio,
        }
    }
}

// ── Whole run ────────────────────────────────────────────────────────────────

impl From<&thrcal_config::Config> for CalibrationCfg {
    fn from(c: &thrcal_config::Config) -> Self {
        Self {
            sampling: (&c.sampling).into(),
            classifier: (&c.classifier).into(),
            threshold: (&c.threshold).into(),
            trim: (&c.trim).into(),
        }
    }
}

impl From<thrcal_config::RunMode> for CalibrationMode {
    fn from(m: thrcal_config::RunMode) -> Self {
        match m {
            thrcal_config::RunMode::Baseline => Self::Baseline,
            thrcal_config::RunMode::Threshold => Self::Threshold,
            thrcal_config::RunMode::Trim => Self::Trim,
        }
    }
}

// ── Devices ──────────────────────────────────────────────────────────────────

impl From<thrcal_config::Flavor> for DeviceFlavor {
    fn from(f: thrcal_config::Flavor) -> Self {
        match f {
            thrcal_config::Flavor::Mmfe8 => Self::Mmfe8,
            thrcal_config::Flavor::Sfeb => Self::Sfeb,
            thrcal_config::Flavor::Pfeb => Self::Pfeb,
        }
    }
}

impl From<thrcal_config::Side> for Side {
    fn from(s: thrcal_config::Side) -> Self {
        match s {
            thrcal_config::Side::A => Self::A,
            thrcal_config::Side::C => Self::C,
        }
    }
}

/// Expand one configured board into a spec per device index.
pub fn device_specs(entry: &thrcal_config::DeviceEntry) -> Vec<DeviceSpec> {
    entry
        .vmms
        .iter()
        .map(|&vmm| {
            DeviceSpec::new(
                DeviceKey::new(entry.name.clone(), vmm),
                entry.side.into(),
                entry.sector,
                entry.flavor.into(),
            )
            .with_channels(entry.channels)
        })
        .collect()
}

impl From<&thrcal_config::GeometryRule> for UnconnectedRule {
    fn from(r: &thrcal_config::GeometryRule) -> Self {
        UnconnectedRule::new(r.pattern.clone(), r.vmm, r.first..=r.last)
    }
}

/// Built-in geometry table extended with the configured rules.
pub fn geometry_from_config(rules: &[thrcal_config::GeometryRule]) -> ChannelGeometry {
    let mut geometry = ChannelGeometry::default();
    for rule in rules {
        geometry.push(rule.into());
    }
    geometry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_expands_per_vmm() {
        let cfg = thrcal_config::load_toml(
            r#"
[[devices]]
name = "SFEB8_Q3_HO"
side = "C"
sector = 9
flavor = "sfeb"
vmms = "2-4"
"#,
        )
        .unwrap();
        let specs = device_specs(&cfg.devices[0]);
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].key, DeviceKey::new("SFEB8_Q3_HO", 2));
        assert_eq!(specs[2].key.vmm, 4);
        assert_eq!(specs[1].side, Side::C);
        assert_eq!(specs[1].flavor, DeviceFlavor::Sfeb);
        assert_eq!(specs[1].channels, 64);
    }

    #[test]
    fn retry_delay_maps_to_duration() {
        let c = thrcal_config::SamplingCfg {
            retry_delay_ms: 250,
            ..thrcal_config::SamplingCfg::default()
        };
        let s: SamplingCfg = (&c).into();
        assert_eq!(s.retry_delay, Duration::from_millis(250));
    }
}
