//! Baseline sampling with far-outlier pruning.

use thrcal_traits::{Acquirer, DacSettings};

use crate::context::{BaselineRecord, DeviceBaseline, DeviceContext, MaskReason};
use crate::device::DeviceFlavor;
use crate::error::CalibError;
use crate::geometry::ChannelGeometry;
use crate::sampler::Sampler;
use crate::stats::{self, BatchSummary};

/// Reduce one raw batch to a baseline record.
///
/// Samples at least `cutoff_mv` away from the raw median are dropped before
/// the final median and RMS are taken.
pub fn measure_baseline(
    samples: &[u16],
    cutoff_mv: f64,
    flavor: DeviceFlavor,
) -> Option<BaselineRecord> {
    let raw = f64::from(stats::median(samples)?);
    let (kept, pruned) = stats::prune_outliers(samples, raw, cutoff_mv, flavor);
    let s = BatchSummary::of(&kept)?;
    Some(BaselineRecord {
        median: s.median,
        rms: s.rms,
        pruned,
    })
}

/// Device aggregate over measured records only.
pub fn aggregate(records: &[BaselineRecord]) -> Option<DeviceBaseline> {
    let measured: Vec<&BaselineRecord> = records.iter().filter(|r| r.is_measured()).collect();
    let medians: Vec<f64> = measured.iter().map(|r| r.median).collect();
    let rmses: Vec<f64> = measured.iter().map(|r| r.rms).collect();
    Some(DeviceBaseline {
        median: stats::median(&medians)?,
        mean: stats::mean(&medians),
        rms: stats::median(&rmses)?,
        channels: measured.len(),
    })
}

/// Sample every connected channel and fill in the baseline records.
///
/// Unconnected channels are masked without being sampled. Channels whose
/// acquisition fails are masked with [`MaskReason::NoData`]. Returns
/// [`CalibError::NoData`] when not a single channel produced a baseline.
#[tracing::instrument(skip_all, fields(device = %ctx.spec.key))]
pub fn sample_baselines<A: Acquirer>(
    sampler: &mut Sampler<A>,
    geometry: &ChannelGeometry,
    ctx: &mut DeviceContext,
) -> Result<DeviceBaseline, CalibError> {
    let count = sampler.cfg().oversampled();
    let cutoff = sampler.cfg().prune_cutoff_mv;
    let flavor = ctx.spec.flavor;
    let unconnected = geometry.unconnected_channels(&ctx.spec.key, ctx.channels());

    for (ch, skip) in (0..ctx.channels()).zip(unconnected) {
        if skip {
            tracing::trace!(channel = ch, "unconnected, skipped");
            ctx.mask.mask(ch, MaskReason::Unconnected);
            continue;
        }
        let key = ctx.channel_key(ch);
        let record = match sampler.acquire(&key, DacSettings::baseline(), count) {
            Ok(batch) => measure_baseline(&batch, cutoff, flavor),
            Err(e) => {
                tracing::warn!(channel = ch, error = %e, "no baseline");
                None
            }
        };
        match record {
            Some(r) => {
                if r.pruned > 0 {
                    tracing::debug!(channel = ch, pruned = r.pruned, "pruned far outliers");
                }
                ctx.baselines[usize::from(ch)] = r;
            }
            None => ctx.mask.mask(ch, MaskReason::NoData),
        }
    }

    let device = aggregate(&ctx.baselines).ok_or(CalibError::NoData)?;
    tracing::info!(
        median_mv = stats::sample_to_mv(device.median, flavor),
        rms_mv = stats::sample_to_mv(device.rms, flavor),
        channels = device.channels,
        "device baseline"
    );
    ctx.device_baseline = Some(device);
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_prunes_around_raw_median() {
        let mut s = vec![600u16; 95];
        s.extend([4000, 4000, 0, 0, 650]);
        let r = measure_baseline(&s, 10.0, DeviceFlavor::Mmfe8).unwrap();
        assert_eq!(r.median, 600.0);
        assert_eq!(r.pruned, 5);
        assert_eq!(r.rms, 0.0);
    }

    #[test]
    fn aggregate_skips_unmeasured() {
        let recs = [
            BaselineRecord::UNMEASURED,
            BaselineRecord {
                median: 500.0,
                rms: 4.0,
                pruned: 0,
            },
            BaselineRecord {
                median: 510.0,
                rms: 6.0,
                pruned: 1,
            },
            BaselineRecord {
                median: 520.0,
                rms: 5.0,
                pruned: 0,
            },
        ];
        let d = aggregate(&recs).unwrap();
        assert_eq!(d.median, 510.0);
        assert!((d.mean - 510.0).abs() < 1e-9);
        assert_eq!(d.rms, 5.0);
        assert_eq!(d.channels, 3);
    }

    #[test]
    fn aggregate_of_nothing() {
        assert!(aggregate(&[BaselineRecord::UNMEASURED; 4]).is_none());
    }
}
