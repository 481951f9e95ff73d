//! Per-channel trim region search and trim optimization.
//!
//! The trim response of a channel is only linear up to a channel-dependent
//! ceiling. The region finder locates that ceiling by comparing the local
//! slopes below and above mid trim and pulling the high point down until they
//! agree. The optimizer then inverts the slope to line every channel up with
//! the device median, and may ask for one re-entry at a raised DAC when some
//! channels end below their baseline.

use thrcal_traits::{Acquirer, DacSettings};

use crate::config::TrimCfg;
use crate::context::{DeviceContext, MaskReason, MidTrimSummary, TrimResult};
use crate::error::CalibError;
use crate::sampler::Sampler;
use crate::stats;
use crate::threshold;

/// Which optimization pass is running. The second pass never re-enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    First,
    Second,
}

/// Slopes smaller than this, in counts per trim step, cannot be inverted.
const MIN_SLOPE: f64 = 1e-6;

/// Linear part of one channel's trim response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimRegion {
    /// Average of the two local slopes, counts per trim step; 0 when unusable.
    /// Negative when raising the trim lowers the threshold.
    pub slope: f64,
    /// Final high trim point; 0 when unusable.
    pub trim_max: u8,
    /// Effective threshold at mid trim.
    pub mid_eff: f64,
    /// Number of times the high point was pulled down.
    pub depth: u32,
}

impl TrimRegion {
    pub fn is_usable(&self) -> bool {
        self.trim_max > 0 && self.slope.abs() >= MIN_SLOPE
    }
}

/// Shrink search over the high trim point.
///
/// `level` returns the effective threshold at a trim value. The high point
/// starts at `cfg.high` and moves down by two until the slopes agree or the
/// next step would reach mid; the depth is therefore at most
/// `(high - mid) / 2`.
pub fn find_region<F>(mut level: F, cfg: &TrimCfg) -> Result<TrimRegion, CalibError>
where
    F: FnMut(u8) -> Result<f64, CalibError>,
{
    let (low, mid) = (cfg.low, cfg.mid);
    let mut high = cfg.high.min(cfg.trim_max);
    let low_eff = level(low)?;
    let mid_eff = level(mid)?;
    let unusable = |depth| TrimRegion {
        slope: 0.0,
        trim_max: 0,
        mid_eff,
        depth,
    };
    if mid <= low || high <= mid {
        return Ok(unusable(0));
    }
    let slope1 = (mid_eff - low_eff) / f64::from(mid - low);

    let mut depth = 0;
    loop {
        let high_eff = level(high)?;
        let slope2 = (high_eff - mid_eff) / f64::from(high - mid);
        if stats::check_slopes(slope1, slope2, cfg.slope_tolerance) {
            let slope = (slope1 + slope2) / 2.0;
            if !slope.is_finite() || slope.abs() < MIN_SLOPE {
                return Ok(unusable(depth));
            }
            return Ok(TrimRegion {
                slope,
                trim_max: high,
                mid_eff,
                depth,
            });
        }
        let next = high.saturating_sub(2);
        if next <= mid {
            return Ok(unusable(depth));
        }
        high = next;
        depth += 1;
    }
}

/// Trim that moves `channel_mid_eff` onto `device_mid_eff`.
pub fn choose_trim(
    channel_mid_eff: f64,
    device_mid_eff: f64,
    slope: f64,
    trim_mid: u8,
    trim_max: u8,
) -> u8 {
    let shift = ((channel_mid_eff - device_mid_eff) / slope).round();
    let trim = f64::from(trim_mid) - shift;
    if !trim.is_finite() {
        return trim_mid.min(trim_max);
    }
    trim.clamp(0.0, f64::from(trim_max)) as u8
}

/// Whether the share of channels left at mid trim calls for a warning.
pub fn too_many_unusable(outcome: &PassOutcome, cfg: &TrimCfg) -> bool {
    outcome.regions > 0 && outcome.unusable as f64 / outcome.regions as f64 > cfg.unusable_warn_ratio
}

/// What one optimization pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutcome {
    /// Channels that ended below baseline and stayed unmasked: (channel, bump in counts).
    pub bumps: Vec<(u8, f64)>,
    /// Channels left at mid trim because their response is not linear.
    pub unusable: usize,
    /// Channels that got a region in this pass.
    pub regions: usize,
}

/// Region search and trim choice for all unmasked channels at `dac`.
#[tracing::instrument(skip_all, fields(device = %ctx.spec.key, dac, pass = ?pass))]
pub fn run_pass<A: Acquirer>(
    sampler: &mut Sampler<A>,
    ctx: &mut DeviceContext,
    dac: u16,
    cfg: &TrimCfg,
    pass: Pass,
) -> Result<PassOutcome, CalibError> {
    let flavor = ctx.spec.flavor;
    let cutoff = stats::mv_to_sample(cfg.bump_cutoff_mv, flavor);
    let n = usize::from(ctx.channels());
    ctx.trims = vec![None; n];

    let mut regions: Vec<Option<TrimRegion>> = vec![None; n];
    let unmasked: Vec<u8> = ctx.mask.unmasked().collect();
    for &ch in &unmasked {
        let key = ctx.channel_key(ch);
        let baseline = ctx.baseline(ch).median;
        let found = find_region(
            |trim| Ok(sampler.median_level(&key, DacSettings::threshold(dac, trim))? - baseline),
            cfg,
        );
        match found {
            Ok(r) => {
                if !r.is_usable() {
                    tracing::debug!(channel = ch, depth = r.depth, "trim response not linear");
                }
                regions[usize::from(ch)] = Some(r);
            }
            Err(e) => {
                tracing::warn!(channel = ch, error = %e, "trim region search failed");
                ctx.mask.mask(ch, MaskReason::NoData);
            }
        }
    }

    let channel_eff: Vec<Option<f64>> = regions.iter().map(|r| r.map(|r| r.mid_eff)).collect();
    let effs: Vec<f64> = channel_eff.iter().flatten().copied().collect();
    let device_eff = stats::median(&effs).ok_or(CalibError::NoData)?;
    ctx.mid = Some(MidTrimSummary {
        channel_eff,
        device_eff,
    });

    let mut outcome = PassOutcome::default();
    for (ch, region) in regions.iter().enumerate() {
        let Some(region) = region else { continue };
        let Ok(ch) = u8::try_from(ch) else { continue };
        outcome.regions += 1;
        let baseline = ctx.baseline(ch).median;
        if !region.is_usable() {
            outcome.unusable += 1;
            ctx.trims[usize::from(ch)] = Some(TrimResult {
                slope: 0.0,
                trim_max: 0,
                best_trim: cfg.mid,
                eff: region.mid_eff,
                median: region.mid_eff + baseline,
            });
            continue;
        }

        let trim = choose_trim(region.mid_eff, device_eff, region.slope, cfg.mid, region.trim_max);
        let realized = match sampler.median_level(&ctx.channel_key(ch), DacSettings::threshold(dac, trim)) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(channel = ch, trim, error = %e, "no threshold at chosen trim");
                ctx.mask.mask(ch, MaskReason::NoData);
                continue;
            }
        };
        let eff = realized - baseline;
        if eff < 0.0 {
            let bump = -eff;
            if bump > cutoff || pass == Pass::Second {
                tracing::warn!(
                    channel = ch,
                    trim,
                    eff_mv = stats::sample_to_mv(eff, flavor),
                    cutoff_mv = cfg.bump_cutoff_mv,
                    "threshold below baseline at best trim, channel masked"
                );
                ctx.mask.mask(ch, MaskReason::BelowBaseline);
                continue;
            }
            tracing::debug!(channel = ch, trim, bump, "channel requests a DAC bump");
            outcome.bumps.push((ch, bump));
        }
        ctx.trims[usize::from(ch)] = Some(TrimResult {
            slope: region.slope,
            trim_max: region.trim_max,
            best_trim: trim,
            eff,
            median: realized,
        });
    }
    Ok(outcome)
}

/// Full trim optimization with at most one re-entry at a raised DAC.
#[tracing::instrument(skip_all, fields(device = %ctx.spec.key))]
pub fn optimize_trims<A: Acquirer>(
    sampler: &mut Sampler<A>,
    ctx: &mut DeviceContext,
    cfg: &TrimCfg,
) -> Result<(), CalibError> {
    let mut constants = ctx.threshold.ok_or(CalibError::NoData)?;
    let outcome = run_pass(sampler, ctx, constants.dac, cfg, Pass::First)?;

    let fixable = outcome.bumps.iter().any(|&(ch, bump)| {
        ctx.trim(ch)
            .is_some_and(|t| bump <= t.slope.abs() * f64::from(t.trim_max) / 2.0)
    });
    if fixable {
        let max_bump = outcome.bumps.iter().map(|&(_, b)| b).fold(0.0, f64::max);
        let raised = f64::from(constants.dac) + (max_bump / constants.slope).ceil() + 1.0;
        let raised = raised.min(f64::from(ctx.thdac_max())) as u16;
        tracing::info!(
            from = constants.dac,
            to = raised,
            max_bump,
            channels = outcome.bumps.len(),
            "re-running trims at raised DAC"
        );
        constants.dac = raised;
        constants.realized = threshold::measure_realized(sampler, ctx, raised)?;
        ctx.threshold = Some(constants);
        ctx.second_pass = true;
        run_pass(sampler, ctx, raised, cfg, Pass::Second)?;
    } else if too_many_unusable(&outcome, cfg) {
        tracing::warn!(
            unusable = outcome.unusable,
            channels = outcome.regions,
            "many channels have unusable trims"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Linear at `gain` counts per step up to `sat`, flat above.
    fn response(gain: f64, sat: u8) -> impl FnMut(u8) -> Result<f64, CalibError> {
        move |t| Ok(40.0 + gain * (f64::from(t.min(sat)) - 14.0))
    }

    #[test]
    fn linear_response_keeps_full_range() {
        let r = find_region(response(4.0, 31), &TrimCfg::default()).unwrap();
        assert_eq!(r.trim_max, 31);
        assert_eq!(r.depth, 0);
        assert!((r.slope - 4.0).abs() < 1e-9);
        assert!((r.mid_eff - 40.0).abs() < 1e-9);
    }

    #[test]
    fn saturation_pulls_high_down() {
        let r = find_region(response(4.0, 22), &TrimCfg::default()).unwrap();
        assert!(r.is_usable());
        assert!(r.trim_max < 31 && r.trim_max > 22);
        assert!(r.depth >= 1);
    }

    #[test]
    fn flat_response_is_unusable() {
        let r = find_region(response(4.0, 14), &TrimCfg::default()).unwrap();
        assert!(!r.is_usable());
        assert_eq!(r.trim_max, 0);
        assert_eq!(r.slope, 0.0);
        assert_eq!(r.depth, 8);
    }

    #[test]
    fn falling_response_is_usable() {
        let r = find_region(response(-4.0, 31), &TrimCfg::default()).unwrap();
        assert!(r.is_usable());
        assert_eq!(r.trim_max, 31);
        assert!((r.slope + 4.0).abs() < 1e-9);
    }

    #[test]
    fn unusable_share_warns_above_ratio() {
        let cfg = TrimCfg::default();
        let outcome = |unusable, regions| PassOutcome {
            bumps: Vec::new(),
            unusable,
            regions,
        };
        assert!(!too_many_unusable(&outcome(16, 64), &cfg));
        assert!(too_many_unusable(&outcome(17, 64), &cfg));
        assert!(!too_many_unusable(&outcome(0, 0), &cfg));
    }

    #[test]
    fn sampling_error_propagates() {
        let err = find_region(|_| Err(CalibError::Timeout), &TrimCfg::default()).unwrap_err();
        assert_eq!(err, CalibError::Timeout);
    }

    #[test]
    fn trim_choice_moves_toward_device() {
        // 8 counts above the device at 4 counts/step: two steps down.
        assert_eq!(choose_trim(48.0, 40.0, 4.0, 14, 31), 12);
        assert_eq!(choose_trim(32.0, 40.0, 4.0, 14, 31), 16);
        assert_eq!(choose_trim(40.0, 400.0, 4.0, 14, 25), 25);
        assert_eq!(choose_trim(400.0, 40.0, 4.0, 14, 31), 0);
        // Falling response: a channel above the device needs more trim.
        assert_eq!(choose_trim(48.0, 40.0, -4.0, 14, 31), 16);
    }
}
