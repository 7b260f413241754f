//! Axis position service.

use std::sync::Arc;

use tracing::info;

use super::{check_positive, check_range, Cadence, ServiceContext};
use crate::command::{AxisMoveProbe, CommandConfirmation};
use crate::error::{AppResult, LabError};
use crate::hardware::{AxisSystemUnit, AxisUnit};
use crate::observable::{SampledObservable, Tolerance};

struct AxisEntry {
    name: String,
    unit: Arc<dyn AxisUnit>,
    position: SampledObservable<f64>,
}

/// Move single axes of an axis system; one position property per axis.
pub struct AxisPositionService {
    device: String,
    system: Arc<dyn AxisSystemUnit>,
    ctx: ServiceContext,
    axes: Vec<AxisEntry>,
}

impl AxisPositionService {
    /// Service for every axis of `system`.
    pub fn new(device: &str, system: Arc<dyn AxisSystemUnit>, ctx: &ServiceContext) -> AppResult<Self> {
        let mut axes = Vec::new();
        for index in 0..system.axis_count()? {
            let unit = system.axis(index)?;
            let name = unit.name()?;
            let u = Arc::clone(&unit);
            let position = ctx
                .float_property("Position", Cadence::Fast, move || u.position())
                .with_tolerance(Tolerance::Relative(ctx.publisher.position_tolerance));
            axes.push(AxisEntry {
                name,
                unit,
                position,
            });
        }
        Ok(Self {
            device: device.to_string(),
            system,
            ctx: ctx.clone(),
            axes,
        })
    }

    /// Axis identifiers in axis order.
    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.name.as_str()).collect()
    }

    fn entry(&self, axis: &str) -> AppResult<&AxisEntry> {
        self.axes.iter().find(|a| a.name == axis).ok_or_else(|| {
            LabError::validation(
                "AxisIdentifier",
                format!("Unknown axis '{axis}'. Valid axes are: {}", self.axis_names().join(", ")),
            )
        })
    }

    /// Move `axis` to `position` at `velocity`.
    pub fn move_to_position(&self, axis: &str, position: f64, velocity: f64) -> AppResult<CommandConfirmation> {
        self.ctx.ensure_operational("execute MoveToPosition")?;
        let entry = self.entry(axis)?;
        let (min, max) = entry.unit.position_limits()?;
        check_range("Position", position, min, max)?;
        check_positive("Velocity", velocity, entry.unit.max_velocity()?)?;
        check_range("Velocity", velocity, entry.unit.min_velocity()?, f64::MAX)?;

        let probe = Arc::new(AxisMoveProbe::new(Arc::clone(&entry.unit), position)?);
        let unit = Arc::clone(&entry.unit);
        self.ctx.tracker.start(
            &format!("{}/{}", self.device, axis),
            "MoveToPosition",
            probe,
            move || Ok(unit.move_to(position, velocity)?),
        )
    }

    /// Start the homing sequence of `axis`.
    pub fn move_to_home(&self, axis: &str) -> AppResult<()> {
        self.ctx.ensure_operational("execute MoveToHomePosition")?;
        self.entry(axis)?.unit.find_home()?;
        info!(device = %self.device, axis, "Homing started");
        Ok(())
    }

    /// Stop `axis` immediately.
    pub fn stop_moving(&self, axis: &str) -> AppResult<()> {
        self.ctx.ensure_operational("execute StopMoving")?;
        self.entry(axis)?.unit.stop()?;
        Ok(())
    }

    /// Position of `axis`.
    pub fn position(&self, axis: &str) -> AppResult<&SampledObservable<f64>> {
        Ok(&self.entry(axis)?.position)
    }

    /// Soft limits `(min, max)` of `axis`.
    pub fn position_limits(&self, axis: &str) -> AppResult<(f64, f64)> {
        self.ctx.ensure_operational("read MinimumPosition")?;
        Ok(self.entry(axis)?.unit.position_limits()?)
    }

    /// Minimum velocity of `axis`.
    pub fn min_velocity(&self, axis: &str) -> AppResult<f64> {
        self.ctx.ensure_operational("read MinimumVelocity")?;
        Ok(self.entry(axis)?.unit.min_velocity()?)
    }

    /// Maximum velocity of `axis`.
    pub fn max_velocity(&self, axis: &str) -> AppResult<f64> {
        self.ctx.ensure_operational("read MaximumVelocity")?;
        Ok(self.entry(axis)?.unit.max_velocity()?)
    }

    /// Unit of the positions of `axis`.
    pub fn position_unit(&self, axis: &str) -> AppResult<String> {
        self.ctx.ensure_operational("read PositionUnit")?;
        Ok(self.entry(axis)?.unit.position_unit()?)
    }

    /// Whether all axes are enabled.
    pub fn is_enabled(&self) -> AppResult<bool> {
        Ok(self.system.is_enabled()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::hardware::mock::SimAxisSystem;
    use crate::health::SystemState;

    #[tokio::test(start_paused = true)]
    async fn test_move_to_position_completes() {
        let (state, _writer) = SystemState::new();
        let ctx = ServiceContext::new(state, &Settings::default());
        let system = Arc::new(SimAxisSystem::new("Rotaxys", 2));
        let service = AxisPositionService::new("Rotaxys", system, &ctx).unwrap();
        assert_eq!(service.axis_names(), vec!["Rotaxys_Axis1", "Rotaxys_Axis2"]);

        let confirmation = service
            .move_to_position("Rotaxys_Axis1", 20.0, 10.0)
            .unwrap();
        ctx.tracker.wait(confirmation.id).await.unwrap();
        let position = service.position("Rotaxys_Axis1").unwrap().read().unwrap();
        assert!((position - 20.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_outside_limits_rejected() {
        let (state, _writer) = SystemState::new();
        let ctx = ServiceContext::new(state, &Settings::default());
        let service =
            AxisPositionService::new("Rotaxys", Arc::new(SimAxisSystem::new("Rotaxys", 1)), &ctx)
                .unwrap();
        assert!(matches!(
            service.move_to_position("Rotaxys_Axis1", 150.0, 1.0),
            Err(LabError::Validation { .. })
        ));
        assert!(service.move_to_position("nope", 1.0, 1.0).is_err());
        assert!(matches!(
            service.move_to_position("Rotaxys_Axis1", 10.0, 0.001),
            Err(LabError::Validation { .. })
        ));
    }

    #[test]
    fn test_velocity_limits_and_position_unit() {
        let (state, _writer) = SystemState::new();
        let ctx = ServiceContext::new(state, &Settings::default());
        let service =
            AxisPositionService::new("Rotaxys", Arc::new(SimAxisSystem::new("Rotaxys", 1)), &ctx)
                .unwrap();
        assert_eq!(service.min_velocity("Rotaxys_Axis1").unwrap(), 0.01);
        assert_eq!(service.max_velocity("Rotaxys_Axis1").unwrap(), 10.0);
        assert_eq!(service.position_unit("Rotaxys_Axis1").unwrap(), "mm");
        assert!(service.position_unit("Rotaxys_Axis2").is_err());
    }
}
