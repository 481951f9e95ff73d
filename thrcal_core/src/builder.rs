//! Type-state builder for `DeviceCalibrator` and generic `build_calibrator` constructor.
//!
//! The builder enforces at compile time that an acquirer and a device are
//! provided before `build()` is available. `try_build()` is always available
//! for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use thrcal_traits::Acquirer;
use thrcal_traits::clock::{Clock, MonotonicClock};

use crate::config::{CalibrationCfg, CalibrationMode};
use crate::context::DeviceContext;
use crate::device::DeviceSpec;
use crate::error::{Result, SetupError};
use crate::geometry::ChannelGeometry;
use crate::runner::{self, DeviceReport};
use crate::sampler::Sampler;

/// Acquirer type the builder hands out.
pub type DynAcquirer = Box<dyn Acquirer + Send>;

// ── Calibrator ───────────────────────────────────────────────────────────────

/// Everything needed to calibrate one device, validated.
pub struct DeviceCalibrator<A = DynAcquirer> {
    sampler: Sampler<A>,
    spec: DeviceSpec,
    geometry: ChannelGeometry,
    cfg: CalibrationCfg,
    mode: CalibrationMode,
    write_back: bool,
}

impl<A> core::fmt::Debug for DeviceCalibrator<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceCalibrator")
            .field("device", &self.spec.key)
            .field("mode", &self.mode)
            .field("write_back", &self.write_back)
            .finish()
    }
}

impl DeviceCalibrator {
    /// Start building a calibrator.
    pub fn builder() -> DeviceCalibratorBuilder<Missing, Missing> {
        DeviceCalibratorBuilder::default()
    }
}

impl<A: Acquirer> DeviceCalibrator<A> {
    pub fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    /// Run the pipeline for the device and optionally push the result back.
    pub fn run(mut self) -> DeviceReport {
        let ctx = runner::calibrate_device(
            &mut self.sampler,
            &self.geometry,
            &self.cfg,
            self.mode,
            self.spec.clone(),
        );
        if self.write_back {
            write_back(&mut self.sampler, &ctx);
        }
        DeviceReport {
            mode: runner::effective_mode(self.mode, self.spec.flavor),
            acquisitions: self.sampler.calls(),
            context: ctx,
        }
    }
}

fn write_back<A: Acquirer>(sampler: &mut Sampler<A>, ctx: &DeviceContext) {
    let regs = ctx.register_map();
    match sampler.write_registers(&ctx.spec.key, &regs) {
        Ok(()) => tracing::debug!(device = %ctx.spec.key, threshold_dac = regs.threshold_dac, "registers written"),
        Err(e) => tracing::warn!(device = %ctx.spec.key, error = %e, "register write-back failed"),
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `DeviceCalibrator`. All fields are validated on `build()`.
pub struct DeviceCalibratorBuilder<A, D> {
    acquirer: Option<DynAcquirer>,
    spec: Option<DeviceSpec>,
    geometry: Option<ChannelGeometry>,
    cfg: Option<CalibrationCfg>,
    mode: CalibrationMode,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    write_back: bool,
    _a: PhantomData<A>,
    _d: PhantomData<D>,
}

impl Default for DeviceCalibratorBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            acquirer: None,
            spec: None,
            geometry: None,
            cfg: None,
            mode: CalibrationMode::default(),
            clock: None,
            write_back: false,
            _a: PhantomData,
            _d: PhantomData,
        }
    }
}

/// Reject configurations no device can be calibrated with.
pub fn validate(spec: &DeviceSpec, cfg: &CalibrationCfg) -> std::result::Result<(), SetupError> {
    if spec.channels == 0 {
        return Err(SetupError::NoChannels(spec.key.to_string()));
    }
    let s = &cfg.sampling;
    if s.sample_count == 0 || s.oversampling == 0 {
        return Err(SetupError::InvalidConfig("sample counts must be >= 1"));
    }
    if !(s.prune_cutoff_mv > 0.0) {
        return Err(SetupError::InvalidConfig("prune cutoff must be > 0"));
    }
    if s.max_attempts == 0 {
        return Err(SetupError::InvalidConfig("max_attempts must be >= 1"));
    }
    let th = &cfg.threshold;
    if th.guess_points.len() < 2 {
        return Err(SetupError::InvalidConfig("need at least two guess points"));
    }
    if th.guess_points.iter().any(|&g| g > th.thdac_max) {
        return Err(SetupError::InvalidConfig("guess point above thdac_max"));
    }
    if !(th.slope_min > 0.0 && th.slope_min < th.slope_max) {
        return Err(SetupError::InvalidConfig("slope band must satisfy 0 < min < max"));
    }
    if !(th.deviation_tolerance > 0.0) {
        return Err(SetupError::InvalidConfig("deviation tolerance must be > 0"));
    }
    let t = &cfg.trim;
    if !(t.low < t.mid && t.mid < t.high && t.high <= t.trim_max) {
        return Err(SetupError::InvalidConfig(
            "trim points must satisfy low < mid < high <= trim_max",
        ));
    }
    Ok(())
}

fn validate_and_build<A: Acquirer>(
    acquirer: A,
    spec: DeviceSpec,
    geometry: ChannelGeometry,
    cfg: CalibrationCfg,
    mode: CalibrationMode,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    write_back: bool,
) -> Result<DeviceCalibrator<A>> {
    validate(&spec, &cfg).map_err(eyre::Report::new)?;
    let clock = clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
    Ok(DeviceCalibrator {
        sampler: Sampler::new(acquirer, clock, cfg.sampling.clone()),
        spec,
        geometry,
        cfg,
        mode,
        write_back,
    })
}

impl<A, D> DeviceCalibratorBuilder<A, D> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<DeviceCalibrator> {
        let acquirer = self
            .acquirer
            .ok_or_else(|| eyre::Report::new(SetupError::MissingAcquirer))?;
        let spec = self
            .spec
            .ok_or_else(|| eyre::Report::new(SetupError::MissingDevice))?;
        validate_and_build(
            acquirer,
            spec,
            self.geometry.unwrap_or_default(),
            self.cfg.unwrap_or_default(),
            self.mode,
            self.clock,
            self.write_back,
        )
    }
}

/// Chainable setters that do not affect type-state.
impl<A, D> DeviceCalibratorBuilder<A, D> {
    pub fn with_config(mut self, cfg: CalibrationCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }
    pub fn with_geometry(mut self, geometry: ChannelGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }
    pub fn with_mode(mut self, mode: CalibrationMode) -> Self {
        self.mode = mode;
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
    pub fn with_write_back(mut self, enabled: bool) -> Self {
        self.write_back = enabled;
        self
    }
}

// Setters that advance type-state
impl<D> DeviceCalibratorBuilder<Missing, D> {
    pub fn with_acquirer(
        self,
        acquirer: impl Acquirer + Send + 'static,
    ) -> DeviceCalibratorBuilder<Set, D> {
        DeviceCalibratorBuilder {
            acquirer: Some(Box::new(acquirer)),
            spec: self.spec,
            geometry: self.geometry,
            cfg: self.cfg,
            mode: self.mode,
            clock: self.clock,
            write_back: self.write_back,
            _a: PhantomData,
            _d: PhantomData,
        }
    }
}

impl<A> DeviceCalibratorBuilder<A, Missing> {
    pub fn with_device(self, spec: DeviceSpec) -> DeviceCalibratorBuilder<A, Set> {
        DeviceCalibratorBuilder {
            acquirer: self.acquirer,
            spec: Some(spec),
            geometry: self.geometry,
            cfg: self.cfg,
            mode: self.mode,
            clock: self.clock,
            write_back: self.write_back,
            _a: PhantomData,
            _d: PhantomData,
        }
    }
}

impl DeviceCalibratorBuilder<Set, Set> {
    /// Validate and build. Only available when the acquirer and device are set.
    pub fn build(self) -> Result<DeviceCalibrator> {
        self.try_build()
    }
}

/// Build a statically-dispatched calibrator from a concrete acquirer.
///
/// Shares validation with the builder.
pub fn build_calibrator<A: Acquirer>(
    acquirer: A,
    spec: DeviceSpec,
    geometry: ChannelGeometry,
    cfg: CalibrationCfg,
    mode: CalibrationMode,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    write_back: bool,
) -> Result<DeviceCalibrator<A>> {
    validate_and_build(acquirer, spec, geometry, cfg, mode, clock, write_back)
}
