//! Controller channel service.

use std::sync::Arc;

use tracing::info;

use super::{check_index, Cadence, ServiceContext};
use crate::error::AppResult;
use crate::hardware::ControllerChannelUnit;
use crate::observable::{SampledObservable, Tolerance};

struct ChannelEntry {
    unit: Arc<dyn ControllerChannelUnit>,
    actual_value: SampledObservable<f64>,
    setpoint: SampledObservable<f64>,
}

/// Setpoints and control loops of a controller's channels.
pub struct ControllerService {
    device: String,
    ctx: ServiceContext,
    channels: Vec<ChannelEntry>,
}

impl ControllerService {
    /// Service for `channels` in discovery order.
    pub fn new(device: &str, channels: Vec<Arc<dyn ControllerChannelUnit>>, ctx: &ServiceContext) -> Self {
        let channels = channels
            .into_iter()
            .map(|unit| {
                let u = Arc::clone(&unit);
                let actual_value = ctx
                    .float_property("ControllerValue", Cadence::Fast, move || u.actual_value())
                    .with_tolerance(Tolerance::Relative(ctx.publisher.signal_tolerance));
                let u = Arc::clone(&unit);
                let setpoint = ctx.float_property("Setpoint", Cadence::Slow, move || u.setpoint());
                ChannelEntry {
                    unit,
                    actual_value,
                    setpoint,
                }
            })
            .collect();
        Self {
            device: device.to_string(),
            ctx: ctx.clone(),
            channels,
        }
    }

    /// Number of channels.
    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, index: usize) -> AppResult<&ChannelEntry> {
        check_index(index, self.channels.len())?;
        Ok(&self.channels[index])
    }

    /// Write the setpoint of channel `index`.
    pub fn write_setpoint(&self, index: usize, setpoint: f64) -> AppResult<()> {
        self.ctx.ensure_operational("execute WriteSetPoint")?;
        self.channel(index)?.unit.write_setpoint(setpoint)?;
        Ok(())
    }

    /// Start the control loop of channel `index`.
    pub fn start_control_loop(&self, index: usize) -> AppResult<()> {
        self.ctx.ensure_operational("execute StartControlLoop")?;
        self.channel(index)?.unit.enable_control_loop(true)?;
        info!(device = %self.device, index, "Control loop started");
        Ok(())
    }

    /// Stop the control loop of channel `index`.
    pub fn stop_control_loop(&self, index: usize) -> AppResult<()> {
        self.ctx.ensure_operational("execute StopControlLoop")?;
        self.channel(index)?.unit.enable_control_loop(false)?;
        info!(device = %self.device, index, "Control loop stopped");
        Ok(())
    }

    /// Whether the control loop of channel `index` runs.
    pub fn is_control_loop_running(&self, index: usize) -> AppResult<bool> {
        Ok(self.channel(index)?.unit.is_control_loop_enabled()?)
    }

    /// Actual value of channel `index`.
    pub fn actual_value(&self, index: usize) -> AppResult<&SampledObservable<f64>> {
        Ok(&self.channel(index)?.actual_value)
    }

    /// Setpoint of channel `index`.
    pub fn setpoint(&self, index: usize) -> AppResult<&SampledObservable<f64>> {
        Ok(&self.channel(index)?.setpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::hardware::mock::SimController;
    use crate::health::SystemState;

    #[test]
    fn test_control_loop_follows_setpoint() {
        let (state, _writer) = SystemState::new();
        let ctx = ServiceContext::new(state, &Settings::default());
        let service =
            ControllerService::new("Qmix_Ctrl", vec![Arc::new(SimController::new("Ctrl_Ch1"))], &ctx);

        service.write_setpoint(0, 37.5).unwrap();
        assert_eq!(service.actual_value(0).unwrap().read().unwrap(), 0.0);
        service.start_control_loop(0).unwrap();
        assert!(service.is_control_loop_running(0).unwrap());
        assert_eq!(service.actual_value(0).unwrap().read().unwrap(), 37.5);
        assert!(service.write_setpoint(1, 1.0).is_err());
    }
}
