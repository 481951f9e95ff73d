//! Hot, dead-suspect and noisy channel detection.

use crate::config::ClassifierCfg;
use crate::context::{ClassificationSummary, DeviceContext, MaskReason};
use crate::stats;

/// What the classifier thinks of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelClass {
    pub hot: bool,
    pub dead: bool,
    pub noisy: bool,
}

pub fn classify_channel(
    median: f64,
    rms: f64,
    device_median: f64,
    flavor: crate::device::DeviceFlavor,
    cfg: &ClassifierCfg,
) -> ChannelClass {
    ChannelClass {
        hot: median > device_median * cfg.hot_factor,
        dead: median < device_median * cfg.dead_factor,
        noisy: !stats::check_channel(rms, flavor, cfg.rms_cutoff_mv),
    }
}

/// Classify every measured channel against the device baseline.
///
/// Hot channels are masked. Dead-suspect and noisy channels are only counted
/// and reported. Ratios are taken over the measured channels.
#[tracing::instrument(skip_all, fields(device = %ctx.spec.key))]
pub fn classify(ctx: &mut DeviceContext, cfg: &ClassifierCfg) -> ClassificationSummary {
    let Some(device) = ctx.device_baseline else {
        return ClassificationSummary::default();
    };
    let flavor = ctx.spec.flavor;
    let mut summary = ClassificationSummary::default();

    for ch in 0..ctx.channels() {
        let b = ctx.baseline(ch);
        if !b.is_measured() {
            continue;
        }
        summary.measured += 1;
        let class = classify_channel(b.median, b.rms, device.median, flavor, cfg);
        if class.hot {
            summary.hot += 1;
            tracing::warn!(
                channel = ch,
                baseline_mv = stats::sample_to_mv(b.median, flavor),
                device_mv = stats::sample_to_mv(device.median, flavor),
                "hot channel masked"
            );
            ctx.mask.mask(ch, MaskReason::Hot);
        }
        if class.dead {
            summary.dead += 1;
            tracing::warn!(
                channel = ch,
                baseline_mv = stats::sample_to_mv(b.median, flavor),
                device_mv = stats::sample_to_mv(device.median, flavor),
                "dead-suspect channel"
            );
        }
        if class.noisy {
            summary.noisy += 1;
            tracing::debug!(
                channel = ch,
                rms_mv = stats::sample_to_mv(b.rms, flavor),
                cutoff_mv = cfg.rms_cutoff_mv,
                "noisy channel"
            );
        }
    }

    if summary.measured > 0 {
        let n = summary.measured as f64;
        let bad = (summary.hot + summary.dead) as f64 / n;
        let noisy = summary.noisy as f64 / n;
        summary.degraded = bad >= cfg.warn_ratio;
        if bad >= cfg.severe_ratio {
            summary.suspect = true;
            tracing::warn!(
                hot = summary.hot,
                dead = summary.dead,
                measured = summary.measured,
                "most channels are hot or dead, treat this device as suspect"
            );
        } else if summary.degraded {
            tracing::warn!(
                hot = summary.hot,
                dead = summary.dead,
                measured = summary.measured,
                "many hot or dead channels"
            );
        }
        if noisy >= cfg.severe_ratio {
            summary.sampling_suspect = true;
            tracing::warn!(
                noisy = summary.noisy,
                measured = summary.measured,
                "most channels are noisy, baseline sampling may be invalid"
            );
        }
    }

    ctx.classification = Some(summary);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BaselineRecord, DeviceBaseline};
    use crate::device::{DeviceFlavor, DeviceSpec, Side};
    use thrcal_traits::DeviceKey;

    fn ctx_with(medians: &[f64], rms: f64) -> DeviceContext {
        let spec = DeviceSpec::new(DeviceKey::new("D", 0), Side::A, 1, DeviceFlavor::Mmfe8)
            .with_channels(medians.len() as u8);
        let mut ctx = DeviceContext::new(spec, 1023, 14);
        for (i, &m) in medians.iter().enumerate() {
            ctx.baselines[i] = BaselineRecord {
                median: m,
                rms,
                pruned: 0,
            };
        }
        ctx.device_baseline = crate::baseline::aggregate(&ctx.baselines);
        ctx
    }

    #[test]
    fn hot_is_masked_dead_is_not() {
        let mut ctx = ctx_with(&[500.0, 500.0, 500.0, 600.0, 400.0, 500.0, 500.0, 500.0], 3.0);
        let s = classify(&mut ctx, &ClassifierCfg::default());
        assert_eq!(s.hot, 1);
        assert_eq!(s.dead, 1);
        assert!(ctx.mask.is_masked(3));
        assert!(!ctx.mask.is_masked(4));
        // 2 of 8 is exactly the warn ratio
        assert!(s.degraded);
        assert!(!s.suspect);
    }

    #[test]
    fn single_bad_channel_stays_below_warn_band() {
        let mut ctx = ctx_with(&[500.0, 500.0, 500.0, 600.0, 500.0, 500.0, 500.0, 500.0], 3.0);
        let s = classify(&mut ctx, &ClassifierCfg::default());
        assert_eq!(s.hot, 1);
        assert!(!s.degraded);
        assert!(!s.suspect);
    }

    #[test]
    fn noisy_majority_flags_sampling() {
        let mut ctx = ctx_with(&[500.0; 4], 200.0);
        let s = classify(&mut ctx, &ClassifierCfg::default());
        assert_eq!(s.noisy, 4);
        assert!(s.sampling_suspect);
        assert_eq!(ctx.mask.masked_count(), 0);
    }

    #[test]
    fn half_bad_is_suspect() {
        let mut ctx = ctx_with(&[500.0, 500.0, 500.0, 700.0, 300.0, 500.0], 3.0);
        let s = classify(&mut ctx, &ClassifierCfg::default());
        assert_eq!(s.hot + s.dead, 2);
        assert!(s.degraded);
        assert!(!s.suspect);
        let mut ctx = ctx_with(&[500.0, 500.0, 700.0, 300.0], 3.0);
        let s = classify(&mut ctx, &ClassifierCfg::default());
        assert!(s.degraded && s.suspect);
    }

    #[test]
    fn no_baseline_no_summary() {
        let mut ctx = ctx_with(&[500.0], 3.0);
        ctx.device_baseline = None::<DeviceBaseline>;
        assert_eq!(classify(&mut ctx, &ClassifierCfg::default()), ClassificationSummary::default());
    }
}
