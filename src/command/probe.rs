//! Hardware views of long-running operations.

use std::sync::Arc;

use crate::hardware::{AxisUnit, HwResult, PumpUnit};

/// Read-only view of a physical operation in progress.
///
/// Quantities are in the operation's own unit (volume, distance); `rate` is
/// in quantity per second.
pub trait OperationProbe: Send + Sync {
    /// Total quantity the operation will move.
    fn target(&self) -> HwResult<f64>;
    /// Current rate in quantity per second; zero if not moving yet.
    fn rate(&self) -> HwResult<f64>;
    /// Quantity moved so far.
    fn done(&self) -> HwResult<f64>;
    /// Whether the device is still busy with the operation.
    fn is_active(&self) -> HwResult<bool>;
    /// Whether the device latched a fault.
    fn is_faulted(&self) -> HwResult<bool>;
    /// Whether the drive is still enabled.
    fn is_enabled(&self) -> HwResult<bool>;
    /// Last error text reported by the device.
    fn last_error(&self) -> HwResult<Option<String>>;
}

/// Dosage of a pump (dose volume, set fill level, generate flow).
pub struct DosingProbe {
    pump: Arc<dyn PumpUnit>,
}

impl DosingProbe {
    /// Probe the running dosage of `pump`.
    pub fn new(pump: Arc<dyn PumpUnit>) -> Self {
        Self { pump }
    }
}

impl OperationProbe for DosingProbe {
    fn target(&self) -> HwResult<f64> {
        Ok(self.pump.target_volume()?.abs())
    }

    fn rate(&self) -> HwResult<f64> {
        let flow = self.pump.actual_flow_rate()?;
        Ok(flow.abs() / self.pump.flow_time_base().as_secs_f64())
    }

    fn done(&self) -> HwResult<f64> {
        Ok(self.pump.dosed_volume()?.abs())
    }

    fn is_active(&self) -> HwResult<bool> {
        self.pump.is_pumping()
    }

    fn is_faulted(&self) -> HwResult<bool> {
        self.pump.is_in_fault_state()
    }

    fn is_enabled(&self) -> HwResult<bool> {
        self.pump.is_enabled()
    }

    fn last_error(&self) -> HwResult<Option<String>> {
        self.pump.last_error()
    }
}

/// Move of a single axis.
pub struct AxisMoveProbe {
    axis: Arc<dyn AxisUnit>,
    start: f64,
    target: f64,
}

impl AxisMoveProbe {
    /// Probe a move of `axis` from its current position to `target`.
    ///
    /// Must be created before the move is commanded.
    pub fn new(axis: Arc<dyn AxisUnit>, target: f64) -> HwResult<Self> {
        let start = axis.position()?;
        Ok(Self {
            axis,
            start,
            target,
        })
    }
}

impl OperationProbe for AxisMoveProbe {
    fn target(&self) -> HwResult<f64> {
        Ok((self.target - self.start).abs())
    }

    fn rate(&self) -> HwResult<f64> {
        Ok(self.axis.actual_velocity()?.abs())
    }

    fn done(&self) -> HwResult<f64> {
        Ok((self.axis.position()? - self.start).abs())
    }

    fn is_active(&self) -> HwResult<bool> {
        // drives report the target as reached after a halt as well
        Ok(!self.axis.is_target_reached()?)
    }

    fn is_faulted(&self) -> HwResult<bool> {
        self.axis.is_in_fault_state()
    }

    fn is_enabled(&self) -> HwResult<bool> {
        self.axis.is_enabled()
    }

    fn last_error(&self) -> HwResult<Option<String>> {
        self.axis.last_error()
    }
}
