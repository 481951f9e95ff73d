#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and device-list parsing for threshold calibration runs.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - The device list can come from `[[devices]]` tables or from a CSV file with
//!   a strict header.
use serde::Deserialize;
use serde::de::Deserializer;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Baseline,
    Threshold,
    #[default]
    Trim,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunCfg {
    /// Which calibration variant to run: "baseline", "threshold" or "trim"
    pub mode: RunMode,
    /// Worker threads; devices are calibrated in parallel, one device per worker
    pub jobs: usize,
    /// Push the resolved registers back to the front-end after each device
    pub write_back: bool,
    /// Directory for the row log and config document
    pub out_dir: Option<String>,
}

impl Default for RunCfg {
    fn default() -> Self {
        Self {
            mode: RunMode::Trim,
            jobs: 4,
            write_back: false,
            out_dir: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SamplingCfg {
    /// Samples per nominal batch
    pub sample_count: usize,
    /// Baseline and guess-point batches are this many times larger
    pub oversampling: usize,
    /// Samples further than this from the batch median are pruned (mV)
    pub prune_cutoff_mv: f64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for SamplingCfg {
    fn default() -> Self {
        Self {
            sample_count: 10,
            oversampling: 10,
            prune_cutoff_mv: 10.0,
            max_attempts: 3,
            retry_delay_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClassifierCfg {
    pub hot_factor: f64,
    pub dead_factor: f64,
    pub rms_cutoff_mv: f64,
}

impl Default for ClassifierCfg {
    fn default() -> Self {
        Self {
            hot_factor: 1.1,
            dead_factor: 0.9,
            rms_cutoff_mv: 30.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ThresholdCfg {
    pub rms_factor: f64,
    /// Headroom added on top of baseline + rms_factor * rms (mV)
    pub trim_offset_mv: f64,
    /// Target above baseline for devices without trimmers (mV)
    pub fixed_offset_mv: f64,
    pub guess_points: Vec<u16>,
    /// Pruning margin around each guess point's median (mV)
    pub guess_margin_mv: f64,
    /// Admissible fitted slope band, ADC counts per DAC step
    pub slope_min: f64,
    pub slope_max: f64,
    /// Relative deviation allowed between realized and target threshold
    pub deviation_tolerance: f64,
    /// Minimum device effective threshold at mid trim (mV)
    pub min_margin_mv: f64,
    pub thdac_max: u16,
}

impl Default for ThresholdCfg {
    fn default() -> Self {
        Self {
            rms_factor: 9.0,
            trim_offset_mv: 5.0,
            fixed_offset_mv: 50.0,
            guess_points: vec![100, 150, 200, 250, 300, 350, 400],
            guess_margin_mv: 10.0,
            slope_min: 0.5,
            slope_max: 8.0,
            deviation_tolerance: 0.2,
            min_margin_mv: 30.0,
            thdac_max: 1023,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrimCfg {
    pub low: u8,
    pub mid: u8,
    pub high: u8,
    pub trim_max: u8,
    /// Largest allowed difference between the two local slopes (ADC counts per trim step)
    pub slope_tolerance: f64,
    /// Channels ending this far below baseline are masked (mV)
    pub bump_cutoff_mv: f64,
    /// Warn when more than this fraction of channels have unusable trims
    pub unusable_warn_ratio: f64,
}

impl Default for TrimCfg {
    fn default() -> Self {
        Self {
            low: 0,
            mid: 14,
            high: 31,
            trim_max: 31,
            slope_tolerance: 1.5,
            bump_cutoff_mv: 20.0,
            unusable_warn_ratio: 0.25,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Parameters of the simulated front-end used when no hardware transport is linked.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationCfg {
    pub seed: u64,
    pub baseline_adc: f64,
    pub baseline_spread_adc: f64,
    pub noise_rms_adc: f64,
    pub thdac_slope: f64,
    pub thdac_intercept: f64,
    pub channel_offset_spread_adc: f64,
    pub trim_gain_adc: f64,
    pub failure_rate: f64,
    pub outlier_rate: f64,
    pub hot_channels: Vec<u8>,
    pub dead_channels: Vec<u8>,
    pub noisy_channels: Vec<u8>,
    pub silent_channels: Vec<u8>,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            baseline_adc: 680.0,
            baseline_spread_adc: 8.0,
            noise_rms_adc: 14.0,
            thdac_slope: 2.5,
            thdac_intercept: 250.0,
            channel_offset_spread_adc: 12.0,
            trim_gain_adc: 4.0,
            failure_rate: 0.0,
            outlier_rate: 0.002,
            hot_channels: Vec::new(),
            dead_channels: Vec::new(),
            noisy_channels: Vec::new(),
            silent_channels: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    C,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Mmfe8,
    Sfeb,
    Pfeb,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceEntry {
    pub name: String,
    pub side: Side,
    pub sector: u8,
    pub flavor: Flavor,
    /// Device indices on the board. Accepts a list `[0, 1, 2]` or a range string `"0-7"`.
    #[serde(default = "default_vmms", deserialize_with = "de_vmms")]
    pub vmms: Vec<u8>,
    #[serde(default = "default_channels")]
    pub channels: u8,
}

fn default_vmms() -> Vec<u8> {
    (0..8).collect()
}

fn default_channels() -> u8 {
    64
}

/// Extra unconnected-channel rule appended to the built-in geometry table.
#[derive(Debug, Deserialize, Clone)]
pub struct GeometryRule {
    /// Substring matched against the device name
    pub pattern: String,
    pub vmm: u8,
    pub first: u8,
    pub last: u8,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub run: RunCfg,
    #[serde(default)]
    pub sampling: SamplingCfg,
    #[serde(default)]
    pub classifier: ClassifierCfg,
    #[serde(default)]
    pub threshold: ThresholdCfg,
    #[serde(default)]
    pub trim: TrimCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub simulation: SimulationCfg,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub geometry: Vec<GeometryRule>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VmmsToml {
    List(Vec<u8>),
    Spec(String),
}

fn de_vmms<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    match VmmsToml::deserialize(deserializer)? {
        VmmsToml::List(v) => Ok(v),
        VmmsToml::Spec(s) => parse_vmm_spec(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse `"0-7"`, `"0;2;5"` or `"3"` into device indices.
pub fn parse_vmm_spec(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    if let Some((a, b)) = s.split_once('-') {
        let a: u8 = a.trim().parse().map_err(|e| format!("bad vmm range {s:?}: {e}"))?;
        let b: u8 = b.trim().parse().map_err(|e| format!("bad vmm range {s:?}: {e}"))?;
        if a > b {
            return Err(format!("vmm range {s:?} is inverted"));
        }
        return Ok((a..=b).collect());
    }
    s.split(';')
        .filter(|p| !p.trim().is_empty())
        .map(|p| {
            p.trim()
                .parse::<u8>()
                .map_err(|e| format!("bad vmm index {p:?}: {e}"))
        })
        .collect()
}

/// Device list CSV schema.
///
/// Expected headers:
/// name,side,sector,flavor,vmms
///
/// Example:
/// name,side,sector,flavor,vmms
/// MMFE8_L1P1_HOL,A,1,mmfe8,0-7
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceRow {
    pub name: String,
    pub side: Side,
    pub sector: u8,
    pub flavor: Flavor,
    pub vmms: String,
}

impl TryFrom<DeviceRow> for DeviceEntry {
    type Error = eyre::Report;
    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        let vmms = parse_vmm_spec(&row.vmms).map_err(|e| eyre::eyre!("device {}: {e}", row.name))?;
        Ok(DeviceEntry {
            name: row.name,
            side: row.side,
            sector: row.sector,
            flavor: row.flavor,
            vmms,
            channels: default_channels(),
        })
    }
}

pub fn load_devices_csv(path: &std::path::Path) -> eyre::Result<Vec<DeviceEntry>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open device CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["name", "side", "sector", "flavor", "vmms"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "device CSV must have headers 'name,side,sector,flavor,vmms', got: {}",
            actual.join(",")
        );
    }

    let mut devices = Vec::new();
    for (idx, rec) in rdr.deserialize::<DeviceRow>().enumerate() {
        match rec {
            Ok(row) => devices.push(DeviceEntry::try_from(row)?),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if devices.is_empty() {
        eyre::bail!("device CSV {:?} lists no devices", path);
    }
    Ok(devices)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Run
        if self.run.jobs == 0 {
            eyre::bail!("run.jobs must be >= 1");
        }

        // Sampling
        if self.sampling.sample_count == 0 {
            eyre::bail!("sampling.sample_count must be >= 1");
        }
        if self.sampling.oversampling == 0 {
            eyre::bail!("sampling.oversampling must be >= 1");
        }
        if !(self.sampling.prune_cutoff_mv > 0.0) {
            eyre::bail!("sampling.prune_cutoff_mv must be > 0");
        }
        if self.sampling.max_attempts == 0 {
            eyre::bail!("sampling.max_attempts must be >= 1");
        }
        if self.sampling.retry_delay_ms > 60_000 {
            eyre::bail!("sampling.retry_delay_ms is unreasonably large (>60s)");
        }

        // Classifier
        if !(self.classifier.hot_factor > 1.0) {
            eyre::bail!("classifier.hot_factor must be > 1.0");
        }
        if !(self.classifier.dead_factor > 0.0 && self.classifier.dead_factor < 1.0) {
            eyre::bail!("classifier.dead_factor must be in (0.0, 1.0)");
        }
        if !(self.classifier.rms_cutoff_mv > 0.0) {
            eyre::bail!("classifier.rms_cutoff_mv must be > 0");
        }

        // Threshold
        let th = &self.threshold;
        if th.rms_factor.is_sign_negative() {
            eyre::bail!("threshold.rms_factor must be >= 0");
        }
        if th.guess_points.len() < 2 {
            eyre::bail!("threshold.guess_points needs at least two DAC values");
        }
        if th.guess_points.iter().any(|&g| g > th.thdac_max) {
            eyre::bail!("threshold.guess_points must not exceed threshold.thdac_max");
        }
        let mut sorted = th.guess_points.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != th.guess_points.len() {
            eyre::bail!("threshold.guess_points must be distinct");
        }
        if !(th.slope_min > 0.0 && th.slope_min < th.slope_max) {
            eyre::bail!("threshold.slope_min must be > 0 and below threshold.slope_max");
        }
        if !(th.deviation_tolerance > 0.0 && th.deviation_tolerance <= 1.0) {
            eyre::bail!("threshold.deviation_tolerance must be in (0.0, 1.0]");
        }
        if !(th.guess_margin_mv > 0.0) {
            eyre::bail!("threshold.guess_margin_mv must be > 0");
        }
        if th.thdac_max == 0 {
            eyre::bail!("threshold.thdac_max must be >= 1");
        }

        // Trim
        let t = &self.trim;
        if !(t.low < t.mid && t.mid < t.high) {
            eyre::bail!("trim points must satisfy low < mid < high");
        }
        if t.high > t.trim_max {
            eyre::bail!("trim.high must not exceed trim.trim_max");
        }
        if t.slope_tolerance.is_sign_negative() {
            eyre::bail!("trim.slope_tolerance must be >= 0");
        }
        if !(t.bump_cutoff_mv > 0.0) {
            eyre::bail!("trim.bump_cutoff_mv must be > 0");
        }
        if !(0.0..=1.0).contains(&t.unusable_warn_ratio) {
            eyre::bail!("trim.unusable_warn_ratio must be in [0.0, 1.0]");
        }

        // Devices
        for d in &self.devices {
            if d.name.trim().is_empty() {
                eyre::bail!("devices: name must not be empty");
            }
            if d.vmms.is_empty() {
                eyre::bail!("device {}: vmms must not be empty", d.name);
            }
            if d.channels == 0 {
                eyre::bail!("device {}: channels must be >= 1", d.name);
            }
        }

        // Geometry
        for g in &self.geometry {
            if g.first > g.last {
                eyre::bail!("geometry rule {:?}: first must be <= last", g.pattern);
            }
        }

        // Simulation
        if !(0.0..=1.0).contains(&self.simulation.failure_rate) {
            eyre::bail!("simulation.failure_rate must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.simulation.outlier_rate) {
            eyre::bail!("simulation.outlier_rate must be in [0.0, 1.0]");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmm_spec_forms() {
        assert_eq!(parse_vmm_spec("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_vmm_spec("1;4; 6").unwrap(), vec![1, 4, 6]);
        assert_eq!(parse_vmm_spec("5").unwrap(), vec![5]);
        assert!(parse_vmm_spec("4-2").is_err());
        assert!(parse_vmm_spec("x").is_err());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = load_toml("").unwrap();
        assert_eq!(cfg.run.mode, RunMode::Trim);
        assert_eq!(cfg.trim.mid, 14);
        assert_eq!(cfg.threshold.guess_points.len(), 7);
        cfg.validate().unwrap();
    }
}
