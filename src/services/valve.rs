//! Valve position service.

use std::sync::Arc;

use tracing::debug;

use super::{check_index, Cadence, ServiceContext};
use crate::error::{AppResult, LabError};
use crate::hardware::ValveUnit;
use crate::observable::SampledObservable;

/// Switch the valves of a device; one position property per valve.
pub struct ValvePositionService {
    device: String,
    ctx: ServiceContext,
    valves: Vec<(Arc<dyn ValveUnit>, SampledObservable<u32>)>,
}

impl ValvePositionService {
    /// Service for `valves` in discovery order.
    pub fn new(device: &str, valves: Vec<Arc<dyn ValveUnit>>, ctx: &ServiceContext) -> Self {
        let valves = valves
            .into_iter()
            .map(|valve| {
                let v = Arc::clone(&valve);
                let position = ctx.property("Position", Cadence::Fast, move || v.actual_position());
                (valve, position)
            })
            .collect();
        Self {
            device: device.to_string(),
            ctx: ctx.clone(),
            valves,
        }
    }

    /// Number of valves.
    pub fn number_of_valves(&self) -> usize {
        self.valves.len()
    }

    fn valve(&self, index: usize) -> AppResult<&(Arc<dyn ValveUnit>, SampledObservable<u32>)> {
        check_index(index, self.valves.len())?;
        Ok(&self.valves[index])
    }

    /// Number of positions of valve `index`.
    pub fn number_of_positions(&self, index: usize) -> AppResult<u32> {
        Ok(self.valve(index)?.0.position_count()?)
    }

    /// Switch valve `index` to `position` (zero based).
    pub fn switch_to_position(&self, index: usize, position: u32) -> AppResult<()> {
        self.ctx.ensure_operational("execute SwitchToPosition")?;
        let (valve, _) = self.valve(index)?;
        let count = valve.position_count()?;
        if position >= count {
            return Err(LabError::validation(
                "Position",
                format!("The position {position} is invalid. It must be between 0 and {}", count.saturating_sub(1)),
            ));
        }
        valve.switch_to(position)?;
        debug!(device = %self.device, index, position, "Valve switched");
        Ok(())
    }

    /// Switch a two-position valve to its other position.
    pub fn toggle(&self, index: usize) -> AppResult<()> {
        self.ctx.ensure_operational("execute TogglePosition")?;
        let (valve, _) = self.valve(index)?;
        let count = valve.position_count()?;
        if count != 2 {
            return Err(LabError::validation(
                "TogglePosition",
                format!("Only valves with two positions can be toggled, this one has {count}"),
            ));
        }
        let next = (valve.actual_position()? + 1) % 2;
        valve.switch_to(next)?;
        Ok(())
    }

    /// Position of valve `index`.
    pub fn position(&self, index: usize) -> AppResult<&SampledObservable<u32>> {
        Ok(&self.valve(index)?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::hardware::mock::SimValve;
    use crate::health::SystemState;

    fn service(positions: u32) -> ValvePositionService {
        let (state, _writer) = SystemState::new();
        let ctx = ServiceContext::new(state, &Settings::default());
        ValvePositionService::new("valve", vec![Arc::new(SimValve::new("V1", positions))], &ctx)
    }

    #[test]
    fn test_switch_validates_position() {
        let service = service(4);
        service.switch_to_position(0, 3).unwrap();
        assert_eq!(service.position(0).unwrap().read().unwrap(), 3);
        assert!(service.switch_to_position(0, 4).is_err());
        assert!(matches!(
            service.switch_to_position(1, 0),
            Err(LabError::InvalidChannelIndex { index: 1, max: 0 })
        ));
    }

    #[test]
    fn test_toggle_two_position_valve() {
        let service = service(2);
        service.toggle(0).unwrap();
        assert_eq!(service.position(0).unwrap().read().unwrap(), 1);
        service.toggle(0).unwrap();
        assert_eq!(service.position(0).unwrap().read().unwrap(), 0);
        assert!(self::service(3).toggle(0).is_err());
    }
}
