//! Global threshold DAC solving.
//!
//! The comparator threshold responds linearly to the device-wide DAC. The
//! solver probes that response at a handful of guess points on one channel,
//! fits a line, inverts it at the target level and checks the result on the
//! hardware before trusting it.
//!
//! ```text
//! Start -> Fitted -> Candidate -> Resolved
//!            |          |
//!            +----------+------> Masked
//! ```

use thrcal_traits::{Acquirer, DacSettings};

use crate::config::ThresholdCfg;
use crate::context::{DeviceBaseline, DeviceContext, MaskReason, MidTrimSummary, ThresholdConstants};
use crate::device::DeviceFlavor;
use crate::error::CalibError;
use crate::sampler::Sampler;
use crate::stats::{self, LineFit};

/// Threshold the solver aims for, in millivolts.
///
/// Boards with trimmers aim `rms_factor` noise widths plus headroom above the
/// baseline; boards without trimmers use a fixed offset.
pub fn target_mv(device: &DeviceBaseline, flavor: DeviceFlavor, cfg: &ThresholdCfg) -> f64 {
    let baseline_mv = stats::sample_to_mv(device.median, flavor);
    if flavor.has_trimmers() {
        cfg.rms_factor * stats::sample_to_mv(device.rms, flavor) + baseline_mv + cfg.trim_offset_mv
    } else {
        baseline_mv + cfg.fixed_offset_mv
    }
}

/// Probe the guess points on `probe` and fit the DAC response.
///
/// Guess points that fail to sample are skipped; at least two are needed.
pub fn fit_response<A: Acquirer>(
    sampler: &mut Sampler<A>,
    ctx: &DeviceContext,
    probe: u8,
    cfg: &ThresholdCfg,
) -> Result<LineFit, CalibError> {
    let key = ctx.channel_key(probe);
    let flavor = ctx.spec.flavor;
    let mut xs = Vec::with_capacity(cfg.guess_points.len());
    let mut ys = Vec::with_capacity(cfg.guess_points.len());
    for &dac in &cfg.guess_points {
        let settings = DacSettings::threshold(dac, ctx.trim_mid());
        match sampler.pruned_mean_level(&key, settings, cfg.guess_margin_mv, flavor) {
            Ok(level) => {
                tracing::trace!(dac, level, "guess point");
                xs.push(f64::from(dac));
                ys.push(level);
            }
            Err(e) => tracing::warn!(dac, error = %e, "guess point skipped"),
        }
    }
    let fit = stats::fit_line(&xs, &ys)?;
    if !(cfg.slope_min..=cfg.slope_max).contains(&fit.slope) {
        return Err(CalibError::SlopeOutOfBand {
            slope: fit.slope,
            min: cfg.slope_min,
            max: cfg.slope_max,
        });
    }
    Ok(fit)
}

/// DAC value at which `fit` reaches `target`, rounded.
pub fn invert_target(fit: &LineFit, target: f64, thdac_max: u16) -> Result<u16, CalibError> {
    let x = fit.invert(target).round();
    if !x.is_finite() {
        return Err(CalibError::DegenerateFit("flat threshold response"));
    }
    if x < 0.0 || x > f64::from(thdac_max) {
        return Err(CalibError::DacOutOfRange(x as i64));
    }
    Ok(x as u16)
}

/// Solve the global threshold DAC for the device.
///
/// The fit is retried once after a pause when its slope is out of band. The
/// candidate is then verified up to `max_attempts` times; the last failure is
/// returned when none passes.
#[tracing::instrument(skip_all, fields(device = %ctx.spec.key))]
pub fn solve_threshold<A: Acquirer>(
    sampler: &mut Sampler<A>,
    ctx: &DeviceContext,
    cfg: &ThresholdCfg,
) -> Result<ThresholdConstants, CalibError> {
    let device = ctx.device_baseline.ok_or(CalibError::NoData)?;
    let probe = ctx.mask.unmasked().next().ok_or(CalibError::NoData)?;
    let flavor = ctx.spec.flavor;
    let target_mv = target_mv(&device, flavor, cfg);
    let target = stats::mv_to_sample(target_mv, flavor);
    let baseline_mv = stats::sample_to_mv(device.median, flavor);
    tracing::debug!(probe, target_mv, target, "solving threshold");

    let fit = match fit_response(sampler, ctx, probe, cfg) {
        Ok(fit) => fit,
        Err(e @ CalibError::SlopeOutOfBand { .. }) => {
            tracing::warn!(error = %e, "refitting threshold response");
            sampler.pause();
            fit_response(sampler, ctx, probe, cfg)?
        }
        Err(e) => return Err(e),
    };
    tracing::debug!(slope = fit.slope, intercept = fit.intercept, "threshold response");

    let key = ctx.channel_key(probe);
    let attempts = sampler.cfg().max_attempts.max(1);
    let mut last = CalibError::NoData;
    for attempt in 1..=attempts {
        let dac = invert_target(&fit, target, cfg.thdac_max)?;
        let settings = DacSettings::threshold(dac, ctx.trim_mid());
        let outcome = sampler
            .pruned_mean_level(&key, settings, cfg.guess_margin_mv, flavor)
            .and_then(|realized| {
                let realized_mv = stats::sample_to_mv(realized, flavor);
                if realized_mv < baseline_mv {
                    return Err(CalibError::BelowBaseline {
                        realized_mv,
                        baseline_mv,
                    });
                }
                if ((realized_mv - target_mv) / target_mv).abs() > cfg.deviation_tolerance {
                    return Err(CalibError::Deviation {
                        realized_mv,
                        target_mv,
                        tolerance: cfg.deviation_tolerance,
                    });
                }
                Ok(realized)
            });
        match outcome {
            Ok(realized) => {
                tracing::info!(
                    dac,
                    slope = fit.slope,
                    intercept = fit.intercept,
                    target_mv,
                    realized_mv = stats::sample_to_mv(realized, flavor),
                    "threshold resolved"
                );
                return Ok(ThresholdConstants {
                    slope: fit.slope,
                    intercept: fit.intercept,
                    dac,
                    target,
                    realized,
                });
            }
            Err(e) => {
                tracing::warn!(attempt, dac, error = %e, "threshold candidate rejected");
                last = e;
                if attempt < attempts {
                    sampler.pause();
                }
            }
        }
    }
    Err(last)
}

/// Level of the first unmasked channel at `dac` and mid trim.
///
/// Refreshes [`ThresholdConstants::realized`] whenever the DAC moves after
/// solving.
pub fn measure_realized<A: Acquirer>(
    sampler: &mut Sampler<A>,
    ctx: &DeviceContext,
    dac: u16,
) -> Result<f64, CalibError> {
    let probe = ctx.mask.unmasked().next().ok_or(CalibError::NoData)?;
    sampler.median_level(&ctx.channel_key(probe), DacSettings::threshold(dac, ctx.trim_mid()))
}

/// Effective threshold of every unmasked channel at `(dac, trim)`.
///
/// Channels that cannot be sampled are masked. Fails when no channel answers.
pub fn measure_mid<A: Acquirer>(
    sampler: &mut Sampler<A>,
    ctx: &mut DeviceContext,
    dac: u16,
) -> Result<MidTrimSummary, CalibError> {
    let settings = DacSettings::threshold(dac, ctx.trim_mid());
    let mut channel_eff = vec![None; usize::from(ctx.channels())];
    let unmasked: Vec<u8> = ctx.mask.unmasked().collect();
    for ch in unmasked {
        match sampler.median_level(&ctx.channel_key(ch), settings) {
            Ok(level) => channel_eff[usize::from(ch)] = Some(level - ctx.baseline(ch).median),
            Err(e) => {
                tracing::warn!(channel = ch, error = %e, "no mid-trim threshold");
                ctx.mask.mask(ch, MaskReason::NoData);
            }
        }
    }
    let effs: Vec<f64> = channel_eff.iter().flatten().copied().collect();
    let device_eff = stats::median(&effs).ok_or(CalibError::NoData)?;
    Ok(MidTrimSummary {
        channel_eff,
        device_eff,
    })
}

/// Check the device effective threshold at mid trim and raise the DAC once
/// if it sits below the minimum margin.
#[tracing::instrument(skip_all, fields(device = %ctx.spec.key))]
pub fn recheck_mid_trim<A: Acquirer>(
    sampler: &mut Sampler<A>,
    ctx: &mut DeviceContext,
    cfg: &ThresholdCfg,
) -> Result<MidTrimSummary, CalibError> {
    let mut constants = ctx.threshold.ok_or(CalibError::NoData)?;
    let device = ctx.device_baseline.ok_or(CalibError::NoData)?;
    let flavor = ctx.spec.flavor;
    let margin = stats::mv_to_sample(cfg.min_margin_mv, flavor);

    let mut summary = measure_mid(sampler, ctx, constants.dac)?;
    if summary.device_eff < margin {
        let bump = (device.rms / constants.slope).round().max(1.0);
        let raised = (f64::from(constants.dac) + bump).min(f64::from(cfg.thdac_max));
        tracing::warn!(
            device_eff_mv = stats::sample_to_mv(summary.device_eff, flavor),
            min_margin_mv = cfg.min_margin_mv,
            from = constants.dac,
            to = raised,
            "mid-trim threshold below margin, raising DAC"
        );
        constants.dac = raised as u16;
        summary = measure_mid(sampler, ctx, constants.dac)?;
        constants.realized = measure_realized(sampler, ctx, constants.dac)?;
        ctx.threshold = Some(constants);
        if summary.device_eff < margin {
            tracing::warn!(
                device_eff_mv = stats::sample_to_mv(summary.device_eff, flavor),
                "mid-trim threshold still below margin"
            );
        }
    }
    ctx.mid = Some(summary.clone());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_depends_on_trimmers() {
        let d = DeviceBaseline {
            median: 500.0,
            mean: 500.0,
            rms: 10.0,
            channels: 64,
        };
        let cfg = ThresholdCfg::default();
        let with = target_mv(&d, DeviceFlavor::Mmfe8, &cfg);
        let expected = 9.0 * stats::sample_to_mv(10.0, DeviceFlavor::Mmfe8)
            + stats::sample_to_mv(500.0, DeviceFlavor::Mmfe8)
            + 5.0;
        assert!((with - expected).abs() < 1e-9);
        let without = target_mv(&d, DeviceFlavor::Pfeb, &cfg);
        assert!((without - (stats::sample_to_mv(500.0, DeviceFlavor::Pfeb) + 50.0)).abs() < 1e-9);
    }

    #[test]
    fn inversion_bounds() {
        let fit = LineFit {
            slope: 2.5,
            intercept: 50.0,
        };
        assert_eq!(invert_target(&fit, 800.0, 1023).unwrap(), 300);
        assert_eq!(
            invert_target(&fit, 10.0, 1023),
            Err(CalibError::DacOutOfRange(-16))
        );
        assert!(matches!(
            invert_target(&fit, 5000.0, 1023),
            Err(CalibError::DacOutOfRange(_))
        ));
        let flat = LineFit {
            slope: 0.0,
            intercept: 1.0,
        };
        assert!(matches!(
            invert_target(&flat, 5.0, 1023),
            Err(CalibError::DegenerateFit(_))
        ));
    }
}
