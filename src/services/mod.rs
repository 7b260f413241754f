//! Device services
//!
//! In-process implementations of the features each device endpoint offers.
//! Every service validates its parameters and refuses commands while the
//! system is degraded; long-running commands go through the
//! [`CommandTracker`], streamed properties through [`SampledObservable`].
//!
//! # Services per capability
//!
//! | Capability | Services |
//! |------------|----------|
//! | Pump       | drive control, fluid dosing, syringe configuration, force monitoring¹, continuous flow² |
//! | Axis       | axis position |
//! | Valve      | valve position (also for valves owned by a pump) |
//! | Controller | controller channels |
//! | Io         | analog/digital in/out channels |
//!
//! ¹ only for pumps with a force sensor, ² only for continuous flow pumps.
//!
//! The wire binding of these services lives outside this crate; the
//! [`EndpointPlan`] tells it which device goes to which port.

mod axis;
mod controller;
mod endpoint;
mod io;
mod pump;
mod valve;

pub use axis::AxisPositionService;
pub use controller::ControllerService;
pub use endpoint::{Endpoint, EndpointPlan};
pub use io::IoService;
pub use pump::{
    ContinuousFlowService, DriveState, ForceMonitoringService, PumpDosingService,
    PumpDriveService, SyringeConfigurationService,
};
pub use valve::ValvePositionService;

use std::sync::Arc;

use tracing::debug;

use crate::catalog::{DeviceRecord, PumpKind};
use crate::command::CommandTracker;
use crate::config::{PublisherConfig, Settings, TrackerConfig};
use crate::error::{AppResult, LabError};
use crate::hardware::HwResult;
use crate::health::SystemState;
use crate::observable::{Sample, SampledObservable, Tolerance};

// =============================================================================
// Shared context
// =============================================================================

/// Cadence class of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Fast signals such as flow rate or position
    Fast,
    /// Configuration-like attributes
    Slow,
}

/// Everything a service needs besides its hardware handles.
#[derive(Clone)]
pub struct ServiceContext {
    /// Shared system state
    pub state: Arc<SystemState>,
    /// Shared command tracker
    pub tracker: CommandTracker,
    /// Publisher cadences and tolerances
    pub publisher: PublisherConfig,
    /// Tracker cadences
    pub tracker_config: TrackerConfig,
}

impl ServiceContext {
    /// Context built from settings.
    pub fn new(state: Arc<SystemState>, settings: &Settings) -> Self {
        Self {
            tracker: CommandTracker::new(settings.tracker.clone(), Arc::clone(&state)),
            state,
            publisher: settings.publisher.clone(),
            tracker_config: settings.tracker.clone(),
        }
    }

    /// Fail with `SystemNotOperational` for `action` while degraded.
    pub fn ensure_operational(&self, action: &str) -> AppResult<()> {
        self.state.ensure_operational(action)
    }

    /// Property with the configured cadence and channel capacity.
    pub fn property<T, F>(&self, name: &str, cadence: Cadence, read: F) -> SampledObservable<T>
    where
        T: Sample,
        F: Fn() -> HwResult<T> + Send + Sync + 'static,
    {
        let interval = match cadence {
            Cadence::Fast => self.publisher.fast_interval,
            Cadence::Slow => self.publisher.slow_interval,
        };
        SampledObservable::new(name, Arc::clone(&self.state), read)
            .with_cadence(interval)
            .with_capacity(self.publisher.channel_capacity)
    }

    /// Float property compared with the default relative tolerance.
    pub fn float_property<F>(&self, name: &str, cadence: Cadence, read: F) -> SampledObservable<f64>
    where
        F: Fn() -> HwResult<f64> + Send + Sync + 'static,
    {
        self.property(name, cadence, read)
            .with_tolerance(Tolerance::Relative(self.publisher.relative_tolerance))
    }
}

/// `Validation` error unless `min <= value <= max`.
pub(crate) fn check_range(parameter: &str, value: f64, min: f64, max: f64) -> AppResult<()> {
    if value.is_nan() || value < min || value > max {
        return Err(LabError::validation(
            parameter,
            format!("{value} is out of range. It must be between {min} and {max}"),
        ));
    }
    Ok(())
}

/// `Validation` error unless `0 < value <= max`.
pub(crate) fn check_positive(parameter: &str, value: f64, max: f64) -> AppResult<()> {
    if value.is_nan() || value <= 0.0 || value > max {
        return Err(LabError::validation(
            parameter,
            format!("{value} is out of range. It must be greater than 0 and at most {max}"),
        ));
    }
    Ok(())
}

/// `InvalidChannelIndex` unless `index < len`.
pub(crate) fn check_index(index: usize, len: usize) -> AppResult<()> {
    if index >= len {
        return Err(LabError::InvalidChannelIndex {
            index,
            max: len.saturating_sub(1),
        });
    }
    Ok(())
}

// =============================================================================
// DeviceServices
// =============================================================================

/// All services of one device endpoint.
pub struct DeviceServices {
    /// Endpoint the services are bound to
    pub endpoint: Endpoint,
    /// Pump drive control
    pub pump_drive: Option<PumpDriveService>,
    /// Pump fluid dosing
    pub dosing: Option<PumpDosingService>,
    /// Syringe configuration
    pub syringe: Option<SyringeConfigurationService>,
    /// Force monitoring
    pub force: Option<ForceMonitoringService>,
    /// Continuous flow configuration
    pub continuous_flow: Option<ContinuousFlowService>,
    /// Axis position
    pub axis: Option<AxisPositionService>,
    /// Valve position
    pub valves: Option<ValvePositionService>,
    /// Controller channels
    pub controller: Option<ControllerService>,
    /// I/O channels
    pub io: Option<IoService>,
}

impl DeviceServices {
    /// Compose the services for `record`.
    pub fn for_record(record: &DeviceRecord, endpoint: Endpoint, ctx: &ServiceContext) -> AppResult<Self> {
        let name = record.name();
        let mut services = Self {
            endpoint,
            pump_drive: None,
            dosing: None,
            syringe: None,
            force: None,
            continuous_flow: None,
            axis: None,
            valves: None,
            controller: None,
            io: None,
        };

        if let Some(pump) = record.pump() {
            services.pump_drive = Some(PumpDriveService::new(name, Arc::clone(&pump.unit), ctx));
            services.dosing = Some(PumpDosingService::new(name, Arc::clone(&pump.unit), ctx));
            services.syringe = Some(SyringeConfigurationService::new(
                name,
                Arc::clone(&pump.unit),
                ctx,
            ));
            if pump.unit.is_force_monitoring_enabled().is_ok() {
                services.force = Some(ForceMonitoringService::new(
                    name,
                    Arc::clone(&pump.unit),
                    ctx,
                ));
            }
            if pump.kind == PumpKind::ContinuousFlow {
                services.continuous_flow = Some(ContinuousFlowService::new(
                    name,
                    Arc::clone(&pump.unit),
                    ctx,
                ));
            }
        }
        if let Some(system) = record.axis_system() {
            services.axis = Some(AxisPositionService::new(name, Arc::clone(system), ctx)?);
        }
        if !record.valves().is_empty() {
            services.valves = Some(ValvePositionService::new(name, record.valves().to_vec(), ctx));
        }
        if !record.controller_channels().is_empty() {
            services.controller = Some(ControllerService::new(
                name,
                record.controller_channels().to_vec(),
                ctx,
            ));
        }
        if !record.io_channels().is_empty() {
            services.io = Some(IoService::new(name, record.io_channels(), ctx));
        }

        debug!(
            device = name,
            port = services.endpoint.port,
            "Services composed: {}",
            services.feature_names().join(", ")
        );
        Ok(services)
    }

    /// Names of the features offered by this endpoint.
    pub fn feature_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.pump_drive.is_some() {
            names.push("PumpDriveControlService");
        }
        if self.dosing.is_some() {
            names.push("PumpFluidDosingService");
        }
        if self.syringe.is_some() {
            names.push("SyringeConfigurationController");
        }
        if self.force.is_some() {
            names.push("ForceMonitoringService");
        }
        if self.continuous_flow.is_some() {
            names.push("ContinuousFlowConfigurationService");
        }
        if self.axis.is_some() {
            names.push("AxisPositionController");
        }
        if self.valves.is_some() {
            names.push("ValvePositionController");
        }
        if self.controller.is_some() {
            names.push("ControlLoopService");
        }
        if self.io.is_some() {
            names.push("IoChannelService");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range() {
        assert!(check_range("Volume", 5.0, 0.0, 10.0).is_ok());
        assert!(check_range("Volume", 10.5, 0.0, 10.0).is_err());
        assert!(check_range("Volume", f64::NAN, 0.0, 10.0).is_err());
    }

    #[test]
    fn test_check_positive_excludes_zero() {
        assert!(check_positive("FlowRate", 0.0, 1.0).is_err());
        assert!(check_positive("FlowRate", 1.0, 1.0).is_ok());
    }

    #[test]
    fn test_check_index_message() {
        let err = check_index(3, 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The channel index 3 is invalid. The index must be between 0 and 1"
        );
    }
}
