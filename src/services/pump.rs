//! Pump services: drive control, fluid dosing, syringe configuration, force
//! monitoring and continuous flow configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{check_positive, check_range, Cadence, ServiceContext};
use crate::command::{CommandConfirmation, DosingProbe};
use crate::error::{AppResult, LabError};
use crate::hardware::{PumpUnit, SyringeParameters, SWITCHING_MODE_CROSS_FLOW};
use crate::observable::{DegradedPolicy, Sample, SampledObservable, Tolerance};

const CALIBRATION_SETTLE: Duration = Duration::from_millis(200);

// =============================================================================
// Drive control
// =============================================================================

/// Reported state of a pump drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveState {
    /// Drive enabled and system operational
    Enabled,
    /// Anything else
    Disabled,
}

impl Sample for DriveState {
    fn is_close(&self, other: &Self, _tolerance: Tolerance) -> bool {
        self == other
    }
}

/// Initialize, enable and disable the pump drive; clear faults.
pub struct PumpDriveService {
    device: String,
    pump: Arc<dyn PumpUnit>,
    ctx: ServiceContext,
    drive_state: SampledObservable<DriveState>,
    fault_state: SampledObservable<bool>,
}

impl PumpDriveService {
    /// Drive control for `pump`.
    pub fn new(device: &str, pump: Arc<dyn PumpUnit>, ctx: &ServiceContext) -> Self {
        let p = Arc::clone(&pump);
        let drive_state = ctx
            .property("PumpDriveState", Cadence::Slow, move || {
                Ok(if p.is_enabled()? {
                    DriveState::Enabled
                } else {
                    DriveState::Disabled
                })
            })
            .with_degraded_policy(DegradedPolicy::Substitute(DriveState::Disabled));
        let p = Arc::clone(&pump);
        let fault_state = ctx.property("FaultState", Cadence::Slow, move || p.is_in_fault_state());

        Self {
            device: device.to_string(),
            pump,
            ctx: ctx.clone(),
            drive_state,
            fault_state,
        }
    }

    /// Run the calibration move and wait for it to finish.
    ///
    /// Fails with `DeviceFault` if calibration did not finish within the
    /// configured timeout and the pump latched an error.
    pub async fn initialize(&self) -> AppResult<()> {
        self.ctx.ensure_operational("execute InitializePumpDrive")?;
        self.pump.calibrate()?;
        tokio::time::sleep(CALIBRATION_SETTLE).await;

        let deadline = Instant::now() + self.ctx.tracker_config.initialize_timeout;
        let mut finished = self.pump.is_calibration_finished()?;
        while !finished && Instant::now() < deadline {
            tokio::time::sleep(self.ctx.tracker_config.liveness_interval).await;
            finished = self.pump.is_calibration_finished()?;
        }
        info!(device = %self.device, "Pump calibrated: {}", finished);

        if !finished {
            if let Some(last_error) = self.pump.last_error()? {
                return Err(LabError::DeviceFault {
                    device: self.device.clone(),
                    message: format!("Initialization failed. The last error was {last_error}"),
                });
            }
        }
        Ok(())
    }

    /// Clear a latched fault if there is one, then enable the drive.
    pub fn enable(&self) -> AppResult<()> {
        self.ctx.ensure_operational("execute EnablePumpDrive")?;
        if self.pump.is_in_fault_state()? {
            self.pump.clear_fault()?;
        }
        self.pump.enable(true)?;
        Ok(())
    }

    /// Disable the drive.
    pub fn disable(&self) -> AppResult<()> {
        self.ctx.ensure_operational("execute DisablePumpDrive")?;
        self.pump.enable(false)?;
        Ok(())
    }

    /// Clear a latched fault. Succeeds without effect if there is none.
    pub fn clear_fault(&self) -> AppResult<()> {
        self.ctx.ensure_operational("execute ClearFaultState")?;
        if self.pump.is_in_fault_state()? {
            self.pump.clear_fault()?;
            info!(device = %self.device, "Fault cleared");
        } else {
            debug!(device = %self.device, "No fault to clear");
        }
        Ok(())
    }

    /// Drive state; `Disabled` while degraded.
    pub fn drive_state(&self) -> &SampledObservable<DriveState> {
        &self.drive_state
    }

    /// Whether a fault is latched.
    pub fn fault_state(&self) -> &SampledObservable<bool> {
        &self.fault_state
    }
}

// =============================================================================
// Fluid dosing
// =============================================================================

/// Dose volumes, set fill levels and generate flows.
pub struct PumpDosingService {
    device: String,
    pump: Arc<dyn PumpUnit>,
    ctx: ServiceContext,
    flow_rate: SampledObservable<f64>,
    max_flow_rate: SampledObservable<f64>,
    fill_level: SampledObservable<f64>,
    max_fill_level: SampledObservable<f64>,
}

impl PumpDosingService {
    /// Dosing for `pump`.
    pub fn new(device: &str, pump: Arc<dyn PumpUnit>, ctx: &ServiceContext) -> Self {
        let p = Arc::clone(&pump);
        let flow_rate = ctx
            .float_property("FlowRate", Cadence::Fast, move || p.actual_flow_rate())
            .with_degraded_policy(DegradedPolicy::Substitute(0.0));
        let p = Arc::clone(&pump);
        let max_flow_rate = ctx.float_property("MaxFlowRate", Cadence::Slow, move || p.max_flow_rate());
        let p = Arc::clone(&pump);
        let fill_level = ctx.float_property("SyringeFillLevel", Cadence::Fast, move || p.fill_level());
        let p = Arc::clone(&pump);
        let max_fill_level =
            ctx.float_property("MaxSyringeFillLevel", Cadence::Slow, move || p.max_volume());

        Self {
            device: device.to_string(),
            pump,
            ctx: ctx.clone(),
            flow_rate,
            max_flow_rate,
            fill_level,
            max_fill_level,
        }
    }

    fn start(
        &self,
        command: &str,
        begin: impl FnOnce(&dyn PumpUnit) -> AppResult<()>,
    ) -> AppResult<CommandConfirmation> {
        let probe = Arc::new(DosingProbe::new(Arc::clone(&self.pump)));
        self.ctx
            .tracker
            .start(&self.device, command, probe, || begin(self.pump.as_ref()))
    }

    /// Dispense (positive) or aspirate (negative) `volume` at `flow_rate`.
    pub fn dose_volume(&self, volume: f64, flow_rate: f64) -> AppResult<CommandConfirmation> {
        self.ctx.ensure_operational("execute DoseVolume")?;
        let max_volume = self.pump.max_volume()?;
        check_range("Volume", volume, -max_volume, max_volume)?;
        check_positive("FlowRate", flow_rate, self.pump.max_flow_rate()?)?;
        self.start("DoseVolume", |pump| Ok(pump.pump_volume(volume, flow_rate)?))
    }

    /// Move the piston until the syringe holds `fill_level`.
    pub fn set_fill_level(&self, fill_level: f64, flow_rate: f64) -> AppResult<CommandConfirmation> {
        self.ctx.ensure_operational("execute SetFillLevel")?;
        check_range("FillLevel", fill_level, 0.0, self.pump.max_volume()?)?;
        check_positive("FlowRate", flow_rate, self.pump.max_flow_rate()?)?;
        self.start("SetFillLevel", |pump| {
            Ok(pump.set_fill_level(fill_level, flow_rate)?)
        })
    }

    /// Generate a constant flow until the syringe is empty (or full when
    /// `flow_rate` is negative).
    pub fn generate_flow(&self, flow_rate: f64) -> AppResult<CommandConfirmation> {
        self.ctx.ensure_operational("execute GenerateFlow")?;
        check_positive("FlowRate", flow_rate.abs(), self.pump.max_flow_rate()?)?;
        self.start("GenerateFlow", |pump| Ok(pump.generate_flow(flow_rate)?))
    }

    /// Stop any running dosage. The running command notices and finishes.
    pub fn stop_dosage(&self) -> AppResult<()> {
        self.ctx.ensure_operational("execute StopDosage")?;
        self.pump.stop_pumping()?;
        warn!(device = %self.device, "Dosage stopped");
        Ok(())
    }

    /// Measured flow rate; zero while degraded.
    pub fn flow_rate(&self) -> &SampledObservable<f64> {
        &self.flow_rate
    }

    /// Maximum flow rate.
    pub fn max_flow_rate(&self) -> &SampledObservable<f64> {
        &self.max_flow_rate
    }

    /// Syringe fill level.
    pub fn fill_level(&self) -> &SampledObservable<f64> {
        &self.fill_level
    }

    /// Maximum syringe fill level.
    pub fn max_fill_level(&self) -> &SampledObservable<f64> {
        &self.max_fill_level
    }
}

// =============================================================================
// Syringe configuration
// =============================================================================

/// Syringe geometry.
pub struct SyringeConfigurationService {
    device: String,
    pump: Arc<dyn PumpUnit>,
    ctx: ServiceContext,
    inner_diameter: SampledObservable<f64>,
    max_piston_stroke: SampledObservable<f64>,
}

impl SyringeConfigurationService {
    /// Syringe configuration for `pump`.
    pub fn new(device: &str, pump: Arc<dyn PumpUnit>, ctx: &ServiceContext) -> Self {
        let p = Arc::clone(&pump);
        let inner_diameter = ctx.float_property("InnerDiameter", Cadence::Slow, move || {
            Ok(p.syringe_parameters()?.inner_diameter_mm)
        });
        let p = Arc::clone(&pump);
        let max_piston_stroke = ctx.float_property("MaxPistonStroke", Cadence::Slow, move || {
            Ok(p.syringe_parameters()?.max_piston_stroke_mm)
        });
        Self {
            device: device.to_string(),
            pump,
            ctx: ctx.clone(),
            inner_diameter,
            max_piston_stroke,
        }
    }

    /// Change the syringe geometry. Both values must be non-negative.
    pub fn set_syringe_parameters(&self, inner_diameter_mm: f64, max_piston_stroke_mm: f64) -> AppResult<()> {
        self.ctx.ensure_operational("execute SetSyringeParameters")?;
        check_range("InnerDiameter", inner_diameter_mm, 0.0, f64::MAX)?;
        check_range("MaxPistonStroke", max_piston_stroke_mm, 0.0, f64::MAX)?;
        self.pump.set_syringe_parameters(SyringeParameters {
            inner_diameter_mm,
            max_piston_stroke_mm,
        })?;
        info!(
            device = %self.device,
            inner_diameter_mm, max_piston_stroke_mm, "Syringe parameters changed"
        );
        Ok(())
    }

    /// Inner diameter in mm.
    pub fn inner_diameter(&self) -> &SampledObservable<f64> {
        &self.inner_diameter
    }

    /// Maximum piston stroke in mm.
    pub fn max_piston_stroke(&self) -> &SampledObservable<f64> {
        &self.max_piston_stroke
    }
}

// =============================================================================
// Force monitoring
// =============================================================================

/// Force sensor of a syringe pump.
pub struct ForceMonitoringService {
    device: String,
    pump: Arc<dyn PumpUnit>,
    ctx: ServiceContext,
    force_sensor_value: SampledObservable<f64>,
    force_limit: SampledObservable<f64>,
    max_device_force: SampledObservable<f64>,
    monitoring_enabled: SampledObservable<bool>,
    safety_stop_active: SampledObservable<bool>,
}

impl ForceMonitoringService {
    /// Force monitoring for `pump`.
    pub fn new(device: &str, pump: Arc<dyn PumpUnit>, ctx: &ServiceContext) -> Self {
        let p = Arc::clone(&pump);
        let force_sensor_value = ctx
            .property("ForceSensorValue", Cadence::Fast, move || p.force_sensor_value())
            .with_tolerance(Tolerance::Relative(ctx.publisher.force_tolerance));
        let p = Arc::clone(&pump);
        let force_limit = ctx.float_property("ForceLimit", Cadence::Slow, move || p.force_limit());
        let p = Arc::clone(&pump);
        let max_device_force =
            ctx.float_property("MaxDeviceForce", Cadence::Slow, move || p.max_device_force());
        let p = Arc::clone(&pump);
        let monitoring_enabled = ctx.property("ForceMonitoringEnabled", Cadence::Slow, move || {
            p.is_force_monitoring_enabled()
        });
        let p = Arc::clone(&pump);
        let safety_stop_active = ctx.property("ForceSafetyStopActive", Cadence::Slow, move || {
            p.is_force_safety_stop_active()
        });

        Self {
            device: device.to_string(),
            pump,
            ctx: ctx.clone(),
            force_sensor_value,
            force_limit,
            max_device_force,
            monitoring_enabled,
            safety_stop_active,
        }
    }

    /// Acknowledge a force safety stop.
    pub fn clear_force_safety_stop(&self) -> AppResult<()> {
        self.ctx.ensure_operational("execute ClearForceSafetyStop")?;
        self.pump.clear_force_safety_stop()?;
        info!(device = %self.device, "Force safety stop cleared");
        Ok(())
    }

    /// Turn force monitoring on.
    pub fn enable_force_monitoring(&self) -> AppResult<()> {
        self.ctx.ensure_operational("execute EnableForceMonitoring")?;
        self.pump.enable_force_monitoring(true)?;
        Ok(())
    }

    /// Turn force monitoring off.
    pub fn disable_force_monitoring(&self) -> AppResult<()> {
        self.ctx.ensure_operational("execute DisableForceMonitoring")?;
        self.pump.enable_force_monitoring(false)?;
        Ok(())
    }

    /// Set the force limit; must not exceed the maximum device force.
    pub fn set_force_limit(&self, limit: f64) -> AppResult<()> {
        self.ctx.ensure_operational("execute SetForceLimit")?;
        check_range("ForceLimit", limit, 0.0, self.pump.max_device_force()?)?;
        self.pump.set_force_limit(limit)?;
        info!(device = %self.device, limit, "Force limit changed");
        Ok(())
    }

    /// Force sensor reading in kN.
    pub fn force_sensor_value(&self) -> &SampledObservable<f64> {
        &self.force_sensor_value
    }

    /// Force limit in kN.
    pub fn force_limit(&self) -> &SampledObservable<f64> {
        &self.force_limit
    }

    /// Maximum device force in kN.
    pub fn max_device_force(&self) -> &SampledObservable<f64> {
        &self.max_device_force
    }

    /// Whether monitoring is on.
    pub fn monitoring_enabled(&self) -> &SampledObservable<bool> {
        &self.monitoring_enabled
    }

    /// Whether a safety stop is active.
    pub fn safety_stop_active(&self) -> &SampledObservable<bool> {
        &self.safety_stop_active
    }
}

// =============================================================================
// Continuous flow
// =============================================================================

/// Switchover settings of a continuous flow pump.
///
/// Durations are in seconds.
pub struct ContinuousFlowService {
    device: String,
    pump: Arc<dyn PumpUnit>,
    ctx: ServiceContext,
    switching_mode: SampledObservable<u32>,
    max_refill_flow_rate: SampledObservable<f64>,
    refill_flow_rate: SampledObservable<f64>,
    min_flow_rate: SampledObservable<f64>,
    cross_flow_duration: SampledObservable<f64>,
    overlap_duration: SampledObservable<f64>,
}

impl ContinuousFlowService {
    /// Continuous flow configuration for `pump`.
    pub fn new(device: &str, pump: Arc<dyn PumpUnit>, ctx: &ServiceContext) -> Self {
        let p = Arc::clone(&pump);
        let switching_mode = ctx.property("SwitchingMode", Cadence::Slow, move || {
            p.continuous_flow_switching_mode()
        });
        let p = Arc::clone(&pump);
        let max_refill_flow_rate = ctx.float_property("MaxRefillFlowRate", Cadence::Slow, move || {
            p.max_refill_flow_rate()
        });
        let p = Arc::clone(&pump);
        let refill_flow_rate =
            ctx.float_property("RefillFlowRate", Cadence::Slow, move || p.refill_flow_rate());
        let p = Arc::clone(&pump);
        let min_flow_rate = ctx.float_property("MinFlowRate", Cadence::Slow, move || p.min_flow_rate());
        let p = Arc::clone(&pump);
        let cross_flow_duration = ctx.float_property("CrossFlowDuration", Cadence::Slow, move || {
            p.cross_flow_duration()
        });
        let p = Arc::clone(&pump);
        let overlap_duration =
            ctx.float_property("OverlapDuration", Cadence::Slow, move || p.overlap_duration());
        Self {
            device: device.to_string(),
            pump,
            ctx: ctx.clone(),
            switching_mode,
            max_refill_flow_rate,
            refill_flow_rate,
            min_flow_rate,
            cross_flow_duration,
            overlap_duration,
        }
    }

    /// Set the switchover strategy; cross flow is the only one.
    pub fn set_switching_mode(&self, mode: u32) -> AppResult<()> {
        self.ctx.ensure_operational("execute SetSwitchingMode")?;
        if mode != SWITCHING_MODE_CROSS_FLOW {
            return Err(LabError::validation(
                "SwitchingMode",
                format!("Unknown switching mode {mode}. Only cross flow ({SWITCHING_MODE_CROSS_FLOW}) is supported"),
            ));
        }
        self.pump.set_continuous_flow_switching_mode(mode)?;
        info!(device = %self.device, mode, "Switching mode changed");
        Ok(())
    }

    /// Set the refill flow rate; bounded by the maximum refill flow rate.
    pub fn set_refill_flow_rate(&self, flow_rate: f64) -> AppResult<()> {
        self.ctx.ensure_operational("execute SetRefillFlowRate")?;
        check_positive("RefillFlowRate", flow_rate, self.pump.max_refill_flow_rate()?)?;
        self.pump.set_refill_flow_rate(flow_rate)?;
        info!(device = %self.device, flow_rate, "Refill flow rate changed");
        Ok(())
    }

    /// Set how long both syringes pump together during switchover.
    pub fn set_cross_flow_duration(&self, seconds: f64) -> AppResult<()> {
        self.ctx.ensure_operational("execute SetCrossFlowDuration")?;
        check_positive("CrossFlowDuration", seconds, f64::MAX)?;
        self.pump.set_cross_flow_duration(seconds)?;
        info!(device = %self.device, seconds, "Cross flow duration changed");
        Ok(())
    }

    /// Set how long the refilled syringe pre-pressurizes before switchover.
    pub fn set_overlap_duration(&self, seconds: f64) -> AppResult<()> {
        self.ctx.ensure_operational("execute SetOverlapDuration")?;
        check_range("OverlapDuration", seconds, 0.0, f64::MAX)?;
        self.pump.set_overlap_duration(seconds)?;
        info!(device = %self.device, seconds, "Overlap duration changed");
        Ok(())
    }

    /// Switching mode.
    pub fn switching_mode(&self) -> &SampledObservable<u32> {
        &self.switching_mode
    }

    /// Maximum refill flow rate.
    pub fn max_refill_flow_rate(&self) -> &SampledObservable<f64> {
        &self.max_refill_flow_rate
    }

    /// Refill flow rate.
    pub fn refill_flow_rate(&self) -> &SampledObservable<f64> {
        &self.refill_flow_rate
    }

    /// Smallest flow rate the pump can generate.
    pub fn min_flow_rate(&self) -> &SampledObservable<f64> {
        &self.min_flow_rate
    }

    /// Cross flow duration in seconds.
    pub fn cross_flow_duration(&self) -> &SampledObservable<f64> {
        &self.cross_flow_duration
    }

    /// Overlap duration in seconds.
    pub fn overlap_duration(&self) -> &SampledObservable<f64> {
        &self.overlap_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::hardware::mock::SimPump;
    use crate::health::{StateWriter, SystemState};
    use tracing_test::traced_test;

    fn context() -> (ServiceContext, StateWriter) {
        let (state, writer) = SystemState::new();
        (ServiceContext::new(state, &Settings::default()), writer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_fault_is_idempotent() {
        let (ctx, _writer) = context();
        let pump = Arc::new(SimPump::new("pump_1"));
        let drive = PumpDriveService::new("pump_1", pump.clone(), &ctx);

        drive.clear_fault().unwrap();
        assert_eq!(pump.fault_clear_count(), 0);
        assert!(!pump.is_in_fault_state().unwrap());

        pump.inject_fault("following error");
        drive.clear_fault().unwrap();
        drive.clear_fault().unwrap();
        assert_eq!(pump.fault_clear_count(), 1);
        assert!(!pump.is_in_fault_state().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_clears_fault_first() {
        let (ctx, _writer) = context();
        let pump = Arc::new(SimPump::new("pump_1"));
        let drive = PumpDriveService::new("pump_1", pump.clone(), &ctx);
        pump.inject_fault("overcurrent");
        drive.enable().unwrap();
        assert!(pump.is_enabled().unwrap());
        assert!(!pump.is_in_fault_state().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_waits_for_calibration() {
        let (ctx, _writer) = context();
        let pump = Arc::new(SimPump::new("pump_1"));
        let drive = PumpDriveService::new("pump_1", pump.clone(), &ctx);
        drive.initialize().await.unwrap();
        assert!(pump.is_calibration_finished().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dose_volume_validates_flow_rate() {
        let (ctx, _writer) = context();
        let pump = Arc::new(SimPump::new("pump_1"));
        let dosing = PumpDosingService::new("pump_1", pump.clone(), &ctx);
        let err = dosing.dose_volume(1.0, 100.0).unwrap_err();
        assert!(matches!(err, LabError::Validation { .. }));
        assert!(!pump.is_pumping().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_rejected_when_degraded() {
        let (ctx, writer) = context();
        let pump = Arc::new(SimPump::new("pump_1"));
        let dosing = PumpDosingService::new("pump_1", pump.clone(), &ctx);
        writer.set_operational(false);
        let err = dosing.dose_volume(1.0, 1.0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot execute DoseVolume because the system is not in an operational state"
        );
        assert!(dosing.stop_dosage().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_limit_bounded_by_device_force() {
        let (ctx, _writer) = context();
        let pump = Arc::new(SimPump::new("pump_1"));
        let force = ForceMonitoringService::new("pump_1", pump.clone(), &ctx);
        assert!(force.set_force_limit(5.0).is_err());
        force.set_force_limit(1.5).unwrap();
        assert_eq!(pump.force_limit().unwrap(), 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_flow_rate() {
        let (ctx, _writer) = context();
        let pump = Arc::new(SimPump::new("contiflow").continuous_flow());
        let service = ContinuousFlowService::new("contiflow", pump.clone(), &ctx);
        assert_eq!(service.max_refill_flow_rate().read().unwrap(), 20.0);
        service.set_refill_flow_rate(15.0).unwrap();
        assert_eq!(service.refill_flow_rate().read().unwrap(), 15.0);
        assert!(service.set_refill_flow_rate(0.0).is_err());
        assert!(service.set_refill_flow_rate(25.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switchover_settings() {
        let (ctx, _writer) = context();
        let pump = Arc::new(SimPump::new("contiflow").continuous_flow());
        let service = ContinuousFlowService::new("contiflow", pump.clone(), &ctx);
        assert_eq!(service.switching_mode().read().unwrap(), SWITCHING_MODE_CROSS_FLOW);
        assert_eq!(service.min_flow_rate().read().unwrap(), 0.01);

        service.set_switching_mode(SWITCHING_MODE_CROSS_FLOW).unwrap();
        assert!(matches!(
            service.set_switching_mode(7),
            Err(LabError::Validation { .. })
        ));

        service.set_cross_flow_duration(4.5).unwrap();
        assert_eq!(service.cross_flow_duration().read().unwrap(), 4.5);
        assert!(service.set_cross_flow_duration(0.0).is_err());

        service.set_overlap_duration(0.0).unwrap();
        assert_eq!(service.overlap_duration().read().unwrap(), 0.0);
        assert!(service.set_overlap_duration(-1.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switchover_settings_unsupported_on_syringe_pump() {
        let (ctx, _writer) = context();
        let pump = Arc::new(SimPump::new("pump_1"));
        let service = ContinuousFlowService::new("pump_1", pump, &ctx);
        assert!(matches!(
            service.set_cross_flow_duration(1.0),
            Err(LabError::Unsupported(_))
        ));
        assert!(service.overlap_duration().read().is_err());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_configuration_changes_are_logged_with_device_name() {
        let (ctx, _writer) = context();
        let pump = Arc::new(SimPump::new("pump_1"));
        let syringe = SyringeConfigurationService::new("syringe_a", pump.clone(), &ctx);
        let force = ForceMonitoringService::new("syringe_a", pump, &ctx);

        syringe.set_syringe_parameters(14.5, 60.0).unwrap();
        force.set_force_limit(1.5).unwrap();

        assert!(logs_contain("Syringe parameters changed"));
        assert!(logs_contain("Force limit changed"));
        assert!(logs_contain("device=syringe_a"));
    }
}
