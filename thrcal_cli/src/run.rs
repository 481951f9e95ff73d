//! Calibration and self-check commands: config mapping, front-end assembly,
//! output files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::WrapErr;
use thrcal_config::{Config, SimulationCfg};
use thrcal_core::builder::DynAcquirer;
use thrcal_core::conversions::{device_specs, geometry_from_config};
use thrcal_core::{
    CalibrationCfg, CalibrationMode, DeviceCalibrator, DeviceReport, DeviceSpec, DeviceStatus,
    RunError, Sampler, SetupError, channel_rows, merged_config, run_devices, write_rows,
};
use thrcal_hardware::{SimParams, SimulatedFrontend};
use thrcal_traits::DacSettings;
use thrcal_traits::clock::MonotonicClock;

pub const ROW_LOG: &str = "thresholds.tsv";
pub const CONFIG_DOC: &str = "config.json";

/// Effective run options after CLI overrides.
#[derive(Debug, Clone)]
pub struct RunOpts {
    pub mode: CalibrationMode,
    pub jobs: usize,
    pub out_dir: PathBuf,
    pub write_back: bool,
}

impl RunOpts {
    pub fn resolve(
        cfg: &Config,
        mode: Option<CalibrationMode>,
        jobs: Option<usize>,
        out_dir: Option<PathBuf>,
        write_back: bool,
    ) -> Self {
        Self {
            mode: mode.unwrap_or_else(|| cfg.run.mode.into()),
            jobs: jobs.unwrap_or(cfg.run.jobs).max(1),
            out_dir: out_dir
                .or_else(|| cfg.run.out_dir.as_ref().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(".")),
            write_back: write_back || cfg.run.write_back,
        }
    }
}

/// Model parameters for the simulated front-end of one device.
pub fn sim_params(sim: &SimulationCfg, channels: u8) -> SimParams {
    SimParams {
        seed: sim.seed,
        channels,
        baseline_adc: sim.baseline_adc,
        baseline_spread_adc: sim.baseline_spread_adc,
        noise_rms_adc: sim.noise_rms_adc,
        thdac_slope: sim.thdac_slope,
        thdac_intercept: sim.thdac_intercept,
        channel_offset_spread_adc: sim.channel_offset_spread_adc,
        trim_gain_adc: sim.trim_gain_adc,
        failure_rate: sim.failure_rate,
        outlier_rate: sim.outlier_rate,
        hot_channels: sim.hot_channels.clone(),
        dead_channels: sim.dead_channels.clone(),
        noisy_channels: sim.noisy_channels.clone(),
        silent_channels: sim.silent_channels.clone(),
        ..SimParams::default()
    }
}

fn frontend(sim: &SimulationCfg, spec: &DeviceSpec) -> eyre::Result<DynAcquirer> {
    let fe = SimulatedFrontend::for_device(sim_params(sim, spec.channels), &spec.key)
        .wrap_err_with(|| format!("open front-end for {}", spec.key))?;
    Ok(Box::new(fe))
}

/// Every device the config lists, in config order.
pub fn all_specs(cfg: &Config) -> eyre::Result<Vec<DeviceSpec>> {
    let specs: Vec<DeviceSpec> = cfg.devices.iter().flat_map(device_specs).collect();
    if specs.is_empty() {
        return Err(eyre::Report::new(SetupError::NoDevices));
    }
    Ok(specs)
}

/// Per-device outcome for the console summary.
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub device: String,
    pub vmm: u8,
    pub status: &'static str,
    pub cause: Option<String>,
    pub threshold_dac: u16,
    pub masked: usize,
    pub second_pass: bool,
    pub acquisitions: u64,
}

impl From<&DeviceReport> for DeviceSummary {
    fn from(r: &DeviceReport) -> Self {
        let ctx = &r.context;
        let (status, cause) = match &ctx.status {
            DeviceStatus::Resolved => ("resolved", None),
            DeviceStatus::Pending => ("pending", None),
            DeviceStatus::Masked(e) => ("masked", Some(e.to_string())),
        };
        Self {
            device: ctx.spec.key.device.clone(),
            vmm: ctx.spec.key.vmm,
            status,
            cause,
            threshold_dac: ctx.threshold_dac(),
            masked: ctx.mask.masked_count(),
            second_pass: ctx.second_pass,
            acquisitions: r.acquisitions,
        }
    }
}

impl DeviceSummary {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "device": self.device,
            "vmm": self.vmm,
            "status": self.status,
            "cause": self.cause,
            "threshold_dac": self.threshold_dac,
            "masked": self.masked,
            "second_pass": self.second_pass,
            "acquisitions": self.acquisitions,
        })
    }
}

/// Write the row log and the merged register document into `dir`.
pub fn write_outputs(dir: &Path, reports: &[DeviceReport]) -> eyre::Result<()> {
    fs::create_dir_all(dir).wrap_err_with(|| format!("create output dir {}", dir.display()))?;

    let rows: Vec<_> = reports.iter().flat_map(|r| channel_rows(&r.context)).collect();
    let tsv = dir.join(ROW_LOG);
    let file = fs::File::create(&tsv).wrap_err_with(|| format!("create {}", tsv.display()))?;
    write_rows(file, &rows).wrap_err_with(|| format!("write {}", tsv.display()))?;

    let doc = merged_config(reports.iter().map(|r| &r.context));
    let json = dir.join(CONFIG_DOC);
    let text = serde_json::to_string_pretty(&doc)?;
    fs::write(&json, text).wrap_err_with(|| format!("write {}", json.display()))?;

    tracing::info!(rows = rows.len(), dir = %dir.display(), "outputs written");
    Ok(())
}

/// Calibrate all devices on simulated front-ends and write the outputs.
pub fn run_calibration(
    cfg: &Config,
    specs: Vec<DeviceSpec>,
    opts: &RunOpts,
    shutdown: &AtomicBool,
) -> eyre::Result<Vec<DeviceSummary>> {
    let calib: CalibrationCfg = cfg.into();
    let geometry = geometry_from_config(&cfg.geometry);
    let total = specs.len();
    tracing::info!(
        devices = total,
        jobs = opts.jobs,
        mode = ?opts.mode,
        write_back = opts.write_back,
        "calibration start"
    );

    let reports = run_devices(
        specs,
        &calib,
        opts.jobs,
        |spec| {
            DeviceCalibrator::builder()
                .with_acquirer(frontend(&cfg.simulation, spec)?)
                .with_device(spec.clone())
                .with_geometry(geometry.clone())
                .with_config(calib.clone())
                .with_mode(opts.mode)
                .with_write_back(opts.write_back)
                .build()
        },
        Some(shutdown),
    );

    write_outputs(&opts.out_dir, &reports)?;
    let summaries: Vec<DeviceSummary> = reports.iter().map(DeviceSummary::from).collect();

    if shutdown.load(Ordering::Relaxed) && reports.len() < total {
        return Err(eyre::Report::new(RunError::Interrupted {
            completed: reports.len(),
            total,
        }));
    }
    if !reports.is_empty() && reports.iter().all(|r| !r.is_resolved()) {
        return Err(eyre::Report::new(RunError::AllDevicesFailed {
            devices: reports.len(),
        }));
    }
    Ok(summaries)
}

/// Probe one channel of every device at baseline.
pub fn self_check(cfg: &Config, specs: &[DeviceSpec]) -> eyre::Result<usize> {
    let calib: CalibrationCfg = cfg.into();
    let geometry = geometry_from_config(&cfg.geometry);
    for spec in specs {
        thrcal_core::builder::validate(spec, &calib).map_err(eyre::Report::new)?;
        let Some(channel) = (0..spec.channels).find(|&ch| !geometry.is_unconnected(&spec.key.channel(ch)))
        else {
            tracing::warn!(device = %spec.key, "no connected channel to probe");
            continue;
        };
        let mut sampler = Sampler::new(
            frontend(&cfg.simulation, spec)?,
            Arc::new(MonotonicClock::new()),
            calib.sampling.clone(),
        );
        let key = spec.key.channel(channel);
        let batch = sampler
            .acquire(&key, DacSettings::baseline(), calib.sampling.sample_count)
            .map_err(eyre::Report::new)
            .wrap_err_with(|| format!("probe {key}"))?;
        tracing::debug!(channel = %key, samples = batch.len(), "probe ok");
    }
    Ok(specs.len())
}
