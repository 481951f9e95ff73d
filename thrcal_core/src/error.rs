use thiserror::Error;
use thrcal_traits::ChannelKey;

/// Failure of one calibration step. Callers turn these into masks; none of
/// them ends the run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibError {
    #[error("sampling {channel} failed after {attempts} attempts: {reason}")]
    Sampling {
        channel: ChannelKey,
        attempts: u32,
        reason: String,
    },
    #[error("timeout waiting for front-end")]
    Timeout,
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("fitted threshold slope {slope:.3} outside [{min}, {max}] counts/DAC")]
    SlopeOutOfBand { slope: f64, min: f64, max: f64 },
    #[error("degenerate fit: {0}")]
    DegenerateFit(&'static str),
    #[error("threshold DAC {0} outside register range")]
    DacOutOfRange(i64),
    #[error("realized threshold {realized_mv:.1} mV below baseline {baseline_mv:.1} mV")]
    BelowBaseline { realized_mv: f64, baseline_mv: f64 },
    #[error(
        "realized threshold {realized_mv:.1} mV deviates from target {target_mv:.1} mV by more than {tolerance}"
    )]
    Deviation {
        realized_mv: f64,
        target_mv: f64,
        tolerance: f64,
    },
    #[error("no usable samples")]
    NoData,
}

/// Structural misconfiguration detected before any sampling.
#[derive(Debug, Error, Clone)]
pub enum SetupError {
    #[error("missing acquirer")]
    MissingAcquirer,
    #[error("missing device")]
    MissingDevice,
    #[error("no devices to calibrate")]
    NoDevices,
    #[error("device {0} has zero channels")]
    NoChannels(String),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Outcome of a multi-device run that callers should treat as a failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("interrupted: {completed} of {total} devices calibrated")]
    Interrupted { completed: usize, total: usize },
    #[error("no device could be calibrated ({devices} attempted)")]
    AllDevicesFailed { devices: usize },
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
