//! Per-device pipeline and the parallel device pool.
//!
//! Within a device every stage runs sequentially on the worker that owns the
//! device's acquirer. Devices are spread over `jobs` workers fed from a
//! crossbeam queue; results come back over a second channel and are returned
//! in device order.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel as xch;
use thrcal_traits::Acquirer;

use crate::baseline;
use crate::builder::DeviceCalibrator;
use crate::classify;
use crate::config::{CalibrationCfg, CalibrationMode};
use crate::context::{DeviceContext, DeviceStatus};
use crate::device::{DeviceFlavor, DeviceSpec};
use crate::error::{CalibError, Result};
use crate::geometry::ChannelGeometry;
use crate::sampler::Sampler;
use crate::threshold;
use crate::trim;

/// Result of calibrating one device.
#[derive(Debug, Clone)]
pub struct DeviceReport {
    pub context: DeviceContext,
    /// Mode that actually ran; trim runs on boards without trimmers stop at threshold.
    pub mode: CalibrationMode,
    /// Calls made to the acquirer, retries included.
    pub acquisitions: u64,
}

impl DeviceReport {
    pub fn is_resolved(&self) -> bool {
        self.context.status == DeviceStatus::Resolved
    }
}

/// Mode that can actually run on `flavor`.
pub fn effective_mode(mode: CalibrationMode, flavor: DeviceFlavor) -> CalibrationMode {
    match mode {
        CalibrationMode::Trim if !flavor.has_trimmers() => CalibrationMode::Threshold,
        m => m,
    }
}

/// Run the stages `mode` asks for on one device.
///
/// Never fails: a stage error masks the whole device and ends the pipeline
/// for it, and the returned context says why.
#[tracing::instrument(skip_all, fields(device = %spec.key, mode = ?mode))]
pub fn calibrate_device<A: Acquirer>(
    sampler: &mut Sampler<A>,
    geometry: &ChannelGeometry,
    cfg: &CalibrationCfg,
    mode: CalibrationMode,
    spec: DeviceSpec,
) -> DeviceContext {
    let mode = effective_mode(mode, spec.flavor);
    let mut ctx = DeviceContext::new(spec, cfg.threshold.thdac_max, cfg.trim.mid);

    if let Err(e) = run_stages(sampler, geometry, cfg, mode, &mut ctx) {
        ctx.fail_device(e);
        return ctx;
    }
    ctx.status = DeviceStatus::Resolved;
    tracing::info!(
        threshold_dac = ctx.threshold_dac(),
        masked = ctx.mask.masked_count(),
        second_pass = ctx.second_pass,
        "device calibrated"
    );
    ctx
}

fn run_stages<A: Acquirer>(
    sampler: &mut Sampler<A>,
    geometry: &ChannelGeometry,
    cfg: &CalibrationCfg,
    mode: CalibrationMode,
    ctx: &mut DeviceContext,
) -> std::result::Result<(), CalibError> {
    baseline::sample_baselines(sampler, geometry, ctx)?;
    classify::classify(ctx, &cfg.classifier);
    if mode == CalibrationMode::Baseline {
        return Ok(());
    }

    let constants = threshold::solve_threshold(sampler, ctx, &cfg.threshold)?;
    ctx.threshold = Some(constants);
    threshold::recheck_mid_trim(sampler, ctx, &cfg.threshold)?;
    if mode == CalibrationMode::Threshold {
        return Ok(());
    }

    trim::optimize_trims(sampler, ctx, &cfg.trim)
}

/// Calibrate `specs` on up to `jobs` workers.
///
/// `make` builds the calibrator for one device on the worker that runs it, so
/// every device gets its own acquirer. A device whose calibrator cannot be
/// built is reported as masked with the register defaults of `cfg`. Once
/// `stop` is raised no new device is started; devices already running
/// finish. Reports come back sorted by device key.
pub fn run_devices<A, F>(
    specs: Vec<DeviceSpec>,
    cfg: &CalibrationCfg,
    jobs: usize,
    make: F,
    stop: Option<&AtomicBool>,
) -> Vec<DeviceReport>
where
    A: Acquirer,
    F: Fn(&DeviceSpec) -> Result<DeviceCalibrator<A>> + Sync,
{
    let workers = jobs.clamp(1, specs.len().max(1));
    let (job_tx, job_rx) = xch::unbounded::<DeviceSpec>();
    let (res_tx, res_rx) = xch::unbounded::<DeviceReport>();
    for spec in specs {
        // Receiver is alive until the scope below ends.
        let _ = job_tx.send(spec);
    }
    drop(job_tx);

    std::thread::scope(|s| {
        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            let make = &make;
            s.spawn(move || {
                while let Ok(spec) = job_rx.recv() {
                    if stop.is_some_and(|f| f.load(Ordering::Relaxed)) {
                        tracing::info!(worker, device = %spec.key, "stop requested, device skipped");
                        continue;
                    }
                    let report = match make(&spec) {
                        Ok(calibrator) => calibrator.run(),
                        Err(e) => setup_failure(spec, cfg, &e),
                    };
                    if res_tx.send(report).is_err() {
                        break;
                    }
                }
                tracing::trace!(worker, "worker exiting");
            });
        }
    });
    drop(res_tx);

    let mut reports: Vec<DeviceReport> = res_rx.iter().collect();
    reports.sort_by(|a, b| a.context.spec.key.cmp(&b.context.spec.key));
    reports
}

fn setup_failure(spec: DeviceSpec, cfg: &CalibrationCfg, e: &eyre::Report) -> DeviceReport {
    tracing::error!(device = %spec.key, error = %e, "cannot set up device");
    let mut ctx = DeviceContext::new(spec, cfg.threshold.thdac_max, cfg.trim.mid);
    ctx.fail_device(CalibError::Hardware(e.to_string()));
    DeviceReport {
        context: ctx,
        mode: CalibrationMode::Baseline,
        acquisitions: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_boards_skip_trimming() {
        assert_eq!(
            effective_mode(CalibrationMode::Trim, DeviceFlavor::Pfeb),
            CalibrationMode::Threshold
        );
        assert_eq!(
            effective_mode(CalibrationMode::Trim, DeviceFlavor::Sfeb),
            CalibrationMode::Trim
        );
        assert_eq!(
            effective_mode(CalibrationMode::Baseline, DeviceFlavor::Pfeb),
            CalibrationMode::Baseline
        );
    }
}
