#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Threshold and trim calibration engine (hardware-agnostic).
//!
//! Every sample comes through `thrcal_traits::Acquirer`; the engine never
//! talks to a transport directly.
//!
//! ## Pipeline
//!
//! - **Baseline** (`baseline`): oversampled batches per channel, far-outlier
//!   pruning, device aggregate
//! - **Classification** (`classify`): hot channels masked, dead-suspect and
//!   noisy channels reported
//! - **Global threshold** (`threshold`): guess-point fit of the DAC response,
//!   inversion at the target, verification and the mid-trim margin check
//! - **Trims** (`trim`): linear-region search per channel, trim choice and at
//!   most one re-entry at a raised DAC
//! - **Output** (`output`): row log and mergeable register document
//!
//! Stages share a `DeviceContext`. `runner` composes them according to a
//! `CalibrationMode` and runs devices in parallel.
//!
//! ## Units
//!
//! Records hold ADC counts. Millivolts appear only in configuration and
//! output; `stats::sample_to_mv` converts using the board flavor's input scale.

pub mod baseline;
pub mod builder;
pub mod classify;
pub mod config;
pub mod context;
pub mod conversions;
pub mod device;
pub mod error;
pub mod geometry;
pub mod hw_error;
pub mod mocks;
pub mod output;
pub mod runner;
pub mod sampler;
pub mod stats;
pub mod threshold;
pub mod trim;

pub use builder::{DeviceCalibrator, DeviceCalibratorBuilder, Missing, Set, build_calibrator};
pub use config::{CalibrationCfg, CalibrationMode, ClassifierCfg, SamplingCfg, ThresholdCfg, TrimCfg};
pub use context::{
    BaselineRecord, ChannelMask, DeviceBaseline, DeviceContext, DeviceStatus, MaskReason,
    ThresholdConstants, TrimResult,
};
pub use device::{DeviceFlavor, DeviceSpec, Side};
pub use error::{CalibError, Result, RunError, SetupError};
pub use geometry::{ChannelGeometry, UnconnectedRule};
pub use output::{
    ChannelRow, channel_rows, config_document, merge_config_documents, merged_config, write_rows,
};
pub use runner::{DeviceReport, calibrate_device, run_devices};
pub use sampler::Sampler;
