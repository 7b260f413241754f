//! Hardware abstraction layer.
//!
//! The bus SDK is an external collaborator. This module only states what the
//! rest of the crate needs from it: a [`Bus`] that can be opened and polled for
//! events, a [`UnitDirectory`] that enumerates units per category, and one
//! trait per unit category.
//!
//! # Calling Convention
//!
//! All calls are synchronous and return [`HwResult`]. They are treated as fast
//! reads/writes over an already open bus, so async code calls them directly
//! without `spawn_blocking`.
//!
//! ```text
//! Bus ──events──> Supervisor
//! UnitDirectory ──units──> CatalogBuilder ──records──> services
//! ```

pub mod mock;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type of every hardware call.
pub type HwResult<T> = Result<T, HardwareError>;

/// Errors reported by the hardware layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// Link or bus failure during a call.
    #[error("Bus communication failed: {0}")]
    Communication(String),

    /// The unit reports a latched fault.
    #[error("Unit '{unit}' is in fault state: {message}")]
    Fault {
        /// Unit name
        unit: String,
        /// Fault text
        message: String,
    },

    /// Name lookup failed, typically for virtual units.
    #[error("Unit has no resolvable device name")]
    NameUnavailable,

    /// No unit at this index.
    #[error("No {category} unit at index {index}")]
    NotFound {
        /// Category searched
        category: UnitCategory,
        /// Requested index
        index: usize,
    },

    /// The unit does not expose this device property.
    #[error("Device property '{0}' not available")]
    PropertyUnavailable(String),

    /// The unit does not implement this functionality.
    #[error("{0}")]
    Unsupported(String),
}

// =============================================================================
// Unit categories
// =============================================================================

/// Kind of I/O channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoKind {
    /// Analog input
    AnalogIn,
    /// Analog output
    AnalogOut,
    /// Digital input
    DigitalIn,
    /// Digital output
    DigitalOut,
}

impl IoKind {
    /// Discovery sub-order for I/O channels.
    pub const DISCOVERY_ORDER: [IoKind; 4] = [
        IoKind::AnalogIn,
        IoKind::AnalogOut,
        IoKind::DigitalIn,
        IoKind::DigitalOut,
    ];

    /// Category this channel kind is enumerated under.
    pub fn category(self) -> UnitCategory {
        match self {
            IoKind::AnalogIn => UnitCategory::AnalogIn,
            IoKind::AnalogOut => UnitCategory::AnalogOut,
            IoKind::DigitalIn => UnitCategory::DigitalIn,
            IoKind::DigitalOut => UnitCategory::DigitalOut,
        }
    }
}

/// Category of raw hardware unit, as enumerated by the bus SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitCategory {
    /// Syringe or continuous flow pump
    Pump,
    /// Multi-axis motion system
    AxisSystem,
    /// Valve
    Valve,
    /// Closed loop controller channel
    Controller,
    /// Analog input channel
    AnalogIn,
    /// Analog output channel
    AnalogOut,
    /// Digital input channel
    DigitalIn,
    /// Digital output channel
    DigitalOut,
}

impl fmt::Display for UnitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitCategory::Pump => "pump",
            UnitCategory::AxisSystem => "axis system",
            UnitCategory::Valve => "valve",
            UnitCategory::Controller => "controller",
            UnitCategory::AnalogIn => "analog in",
            UnitCategory::AnalogOut => "analog out",
            UnitCategory::DigitalIn => "digital in",
            UnitCategory::DigitalOut => "digital out",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Bus
// =============================================================================

/// Event class as reported by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEventId {
    /// Emergency message sent by a device (e.g. under-voltage)
    DeviceEmergency,
    /// Node guarding / heartbeat event
    DeviceGuard,
    /// Anything else the bus may report
    Other(u32),
}

/// Guard event payload codes (first data word of a `DeviceGuard` event).
pub mod guard {
    /// Heartbeat of a device was lost.
    pub const HEARTBEAT_LOST: u32 = 1;
    /// Heartbeat of a device is back.
    pub const HEARTBEAT_RESTORED: u32 = 2;
}

/// Continuous flow switching mode "cross flow", the only mode pumps offer.
pub const SWITCHING_MODE_CROSS_FLOW: u32 = 0;

/// Emergency code for "DC-link under-voltage" (controller powered off).
pub const DC_LINK_UNDER_VOLTAGE: u32 = 0x3220;

/// A single event read from the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    /// Event class
    pub id: BusEventId,
    /// Node id of the reporting device
    pub device: u32,
    /// Raw payload words
    pub data: Vec<u32>,
    /// Human readable message
    pub message: String,
}

impl BusEvent {
    /// Emergency event carrying `code` as first payload word.
    pub fn emergency(device: u32, code: u32) -> Self {
        Self {
            id: BusEventId::DeviceEmergency,
            device,
            data: vec![code],
            message: format!("emergency 0x{code:04x}"),
        }
    }

    /// Guard event carrying `code` as first payload word.
    pub fn guard(device: u32, code: u32) -> Self {
        Self {
            id: BusEventId::DeviceGuard,
            device,
            data: vec![code],
            message: format!("guard event {code}"),
        }
    }

    /// First payload word, if any.
    pub fn code(&self) -> Option<u32> {
        self.data.first().copied()
    }
}

/// The shared communication bus.
pub trait Bus: Send + Sync {
    /// Open the bus with the given device configuration.
    fn open(&self, config_path: &Path) -> HwResult<()>;
    /// Start bus communication.
    fn start(&self) -> HwResult<()>;
    /// Stop bus communication.
    fn stop(&self) -> HwResult<()>;
    /// Close the bus.
    fn close(&self) -> HwResult<()>;
    /// Non-blocking read of the next event. `Ok(None)` is an empty/invalid read.
    fn read_event(&self) -> HwResult<Option<BusEvent>>;
}

// =============================================================================
// Unit directory
// =============================================================================

/// Enumeration of raw units per category (count + lookup by index).
pub trait UnitDirectory: Send + Sync {
    /// Number of units in `category`.
    fn unit_count(&self, category: UnitCategory) -> HwResult<usize>;
    /// Pump at `index`.
    fn pump(&self, index: usize) -> HwResult<Arc<dyn PumpUnit>>;
    /// Axis system at `index`.
    fn axis_system(&self, index: usize) -> HwResult<Arc<dyn AxisSystemUnit>>;
    /// Valve at `index`.
    fn valve(&self, index: usize) -> HwResult<Arc<dyn ValveUnit>>;
    /// Controller channel at `index`.
    fn controller_channel(&self, index: usize) -> HwResult<Arc<dyn ControllerChannelUnit>>;
    /// I/O channel of `kind` at `index`.
    fn io_channel(&self, kind: IoKind, index: usize) -> HwResult<IoChannel>;
}

// =============================================================================
// Pumps
// =============================================================================

/// Syringe geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyringeParameters {
    /// Inner diameter of the syringe tube in millimetres
    pub inner_diameter_mm: f64,
    /// Maximum piston stroke in millimetres
    pub max_piston_stroke_mm: f64,
}

fn unsupported<T>(what: &str) -> HwResult<T> {
    Err(HardwareError::Unsupported(format!("{what} is not supported by this unit")))
}

/// A syringe pump (or a continuous flow pump made of two syringe pumps).
///
/// Volumes and flow rates are in the unit's configured SI units; the flow
/// time base is reported by [`PumpUnit::flow_time_base`].
pub trait PumpUnit: Send + Sync {
    /// Device name as configured on the bus.
    fn name(&self) -> HwResult<String>;

    /// Read the continuous flow switching mode.
    ///
    /// Plain syringe pumps do not have this device property and return an
    /// error, which is the common case.
    fn continuous_flow_switching_mode(&self) -> HwResult<u32>;

    /// Whether the drive is enabled.
    fn is_enabled(&self) -> HwResult<bool>;
    /// Enable or disable the drive.
    fn enable(&self, enable: bool) -> HwResult<()>;
    /// Whether a fault is latched.
    fn is_in_fault_state(&self) -> HwResult<bool>;
    /// Clear a latched fault.
    fn clear_fault(&self) -> HwResult<()>;
    /// Last error reported by the unit, if any.
    fn last_error(&self) -> HwResult<Option<String>>;

    /// Start a calibration (reference) move.
    fn calibrate(&self) -> HwResult<()>;
    /// Whether the calibration move finished.
    fn is_calibration_finished(&self) -> HwResult<bool>;

    /// Whether a dosage is active.
    fn is_pumping(&self) -> HwResult<bool>;
    /// Stop any running dosage.
    fn stop_pumping(&self) -> HwResult<()>;
    /// Dispense (positive) or aspirate (negative) `volume` at `flow`.
    fn pump_volume(&self, volume: f64, flow: f64) -> HwResult<()>;
    /// Move the piston until the syringe holds `fill_level`.
    fn set_fill_level(&self, fill_level: f64, flow: f64) -> HwResult<()>;
    /// Generate a constant flow; negative values aspirate.
    fn generate_flow(&self, flow: f64) -> HwResult<()>;

    /// Currently measured flow rate.
    fn actual_flow_rate(&self) -> HwResult<f64>;
    /// Time base of flow values (e.g. 60 s for "per minute").
    fn flow_time_base(&self) -> Duration {
        Duration::from_secs(1)
    }
    /// Maximum flow rate.
    fn max_flow_rate(&self) -> HwResult<f64>;
    /// Current syringe fill level.
    fn fill_level(&self) -> HwResult<f64>;
    /// Maximum syringe fill level.
    fn max_volume(&self) -> HwResult<f64>;
    /// Target volume of the running (or last) dosage.
    fn target_volume(&self) -> HwResult<f64>;
    /// Volume dosed so far by the running (or last) dosage.
    fn dosed_volume(&self) -> HwResult<f64>;

    /// Current syringe geometry.
    fn syringe_parameters(&self) -> HwResult<SyringeParameters>;
    /// Change syringe geometry.
    fn set_syringe_parameters(&self, params: SyringeParameters) -> HwResult<()>;

    /// Force sensor reading in kN.
    fn force_sensor_value(&self) -> HwResult<f64> {
        unsupported("Force monitoring")
    }
    /// Current force limit in kN.
    fn force_limit(&self) -> HwResult<f64> {
        unsupported("Force monitoring")
    }
    /// Maximum continuous device force in kN.
    fn max_device_force(&self) -> HwResult<f64> {
        unsupported("Force monitoring")
    }
    /// Write a new force limit.
    fn set_force_limit(&self, _limit: f64) -> HwResult<()> {
        unsupported("Force monitoring")
    }
    /// Whether force monitoring is enabled.
    fn is_force_monitoring_enabled(&self) -> HwResult<bool> {
        unsupported("Force monitoring")
    }
    /// Enable or disable force monitoring.
    fn enable_force_monitoring(&self, _enable: bool) -> HwResult<()> {
        unsupported("Force monitoring")
    }
    /// Whether a force safety stop is active.
    fn is_force_safety_stop_active(&self) -> HwResult<bool> {
        unsupported("Force monitoring")
    }
    /// Acknowledge a force safety stop.
    fn clear_force_safety_stop(&self) -> HwResult<()> {
        unsupported("Force monitoring")
    }

    /// Refill flow rate of a continuous flow pump.
    fn refill_flow_rate(&self) -> HwResult<f64> {
        unsupported("Continuous flow configuration")
    }
    /// Set the refill flow rate of a continuous flow pump.
    fn set_refill_flow_rate(&self, _flow: f64) -> HwResult<()> {
        unsupported("Continuous flow configuration")
    }
    /// Maximum refill flow rate of a continuous flow pump.
    fn max_refill_flow_rate(&self) -> HwResult<f64> {
        unsupported("Continuous flow configuration")
    }
    /// Smallest flow rate a continuous flow pump can generate.
    fn min_flow_rate(&self) -> HwResult<f64> {
        unsupported("Continuous flow configuration")
    }
    /// Change the switchover strategy of a continuous flow pump.
    fn set_continuous_flow_switching_mode(&self, _mode: u32) -> HwResult<()> {
        unsupported("Continuous flow configuration")
    }
    /// Time in seconds both syringes pump during a cross flow switchover.
    fn cross_flow_duration(&self) -> HwResult<f64> {
        unsupported("Continuous flow configuration")
    }
    /// Set the cross flow duration in seconds.
    fn set_cross_flow_duration(&self, _seconds: f64) -> HwResult<()> {
        unsupported("Continuous flow configuration")
    }
    /// Time in seconds the refilled syringe pre-pressurizes before switchover.
    fn overlap_duration(&self) -> HwResult<f64> {
        unsupported("Continuous flow configuration")
    }
    /// Set the overlap duration in seconds.
    fn set_overlap_duration(&self, _seconds: f64) -> HwResult<()> {
        unsupported("Continuous flow configuration")
    }
}

// =============================================================================
// Motion
// =============================================================================

/// One axis of an axis system.
pub trait AxisUnit: Send + Sync {
    /// Axis name.
    fn name(&self) -> HwResult<String>;
    /// Actual position.
    fn position(&self) -> HwResult<f64>;
    /// Soft limits `(min, max)`.
    fn position_limits(&self) -> HwResult<(f64, f64)>;
    /// Minimum velocity.
    fn min_velocity(&self) -> HwResult<f64>;
    /// Maximum velocity.
    fn max_velocity(&self) -> HwResult<f64>;
    /// Unit of positions, e.g. "mm" or "rad" for rotational axes.
    fn position_unit(&self) -> HwResult<String>;
    /// Actual velocity.
    fn actual_velocity(&self) -> HwResult<f64>;
    /// Start a move to `position` at `velocity`.
    fn move_to(&self, position: f64, velocity: f64) -> HwResult<()>;
    /// Whether the last move reached its target.
    fn is_target_reached(&self) -> HwResult<bool>;
    /// Target position of the running (or last) move.
    fn target_position(&self) -> HwResult<f64>;
    /// Stop any motion.
    fn stop(&self) -> HwResult<()>;
    /// Start the homing sequence.
    fn find_home(&self) -> HwResult<()>;
    /// Whether a fault is latched.
    fn is_in_fault_state(&self) -> HwResult<bool>;
    /// Clear a latched fault.
    fn clear_fault(&self) -> HwResult<()>;
    /// Whether the drive is enabled.
    fn is_enabled(&self) -> HwResult<bool>;
    /// Last error reported by the axis, if any.
    fn last_error(&self) -> HwResult<Option<String>>;
}

/// A multi-axis motion system.
pub trait AxisSystemUnit: Send + Sync {
    /// Device name.
    fn name(&self) -> HwResult<String>;
    /// Number of axes.
    fn axis_count(&self) -> HwResult<usize>;
    /// Axis at `index`.
    fn axis(&self, index: usize) -> HwResult<Arc<dyn AxisUnit>>;
    /// Enable or disable all axes.
    fn enable(&self, enable: bool) -> HwResult<()>;
    /// Whether all axes are enabled.
    fn is_enabled(&self) -> HwResult<bool>;
}

// =============================================================================
// Valves, controllers, I/O
// =============================================================================

/// A switching valve.
pub trait ValveUnit: Send + Sync {
    /// Device name; fails for virtual valves.
    fn name(&self) -> HwResult<String>;
    /// Number of valve positions.
    fn position_count(&self) -> HwResult<u32>;
    /// Actual logical position.
    fn actual_position(&self) -> HwResult<u32>;
    /// Switch to a logical position.
    fn switch_to(&self, position: u32) -> HwResult<()>;
}

/// A closed loop controller channel.
pub trait ControllerChannelUnit: Send + Sync {
    /// Channel name.
    fn name(&self) -> HwResult<String>;
    /// Actual (process) value.
    fn actual_value(&self) -> HwResult<f64>;
    /// Current setpoint.
    fn setpoint(&self) -> HwResult<f64>;
    /// Write a new setpoint.
    fn write_setpoint(&self, setpoint: f64) -> HwResult<()>;
    /// Enable or disable the control loop.
    fn enable_control_loop(&self, enable: bool) -> HwResult<()>;
    /// Whether the control loop runs.
    fn is_control_loop_enabled(&self) -> HwResult<bool>;
}

/// Analog input channel.
pub trait AnalogInChannel: Send + Sync {
    /// Channel name.
    fn name(&self) -> HwResult<String>;
    /// Read the input value.
    fn read_input(&self) -> HwResult<f64>;
}

/// Analog output channel.
pub trait AnalogOutChannel: Send + Sync {
    /// Channel name.
    fn name(&self) -> HwResult<String>;
    /// Last written output value.
    fn output_value(&self) -> HwResult<f64>;
    /// Write the output value.
    fn write_output(&self, value: f64) -> HwResult<()>;
}

/// Digital input channel.
pub trait DigitalInChannel: Send + Sync {
    /// Channel name.
    fn name(&self) -> HwResult<String>;
    /// Whether the input is on.
    fn is_on(&self) -> HwResult<bool>;
}

/// Digital output channel.
pub trait DigitalOutChannel: Send + Sync {
    /// Channel name.
    fn name(&self) -> HwResult<String>;
    /// Whether the output is on.
    fn is_output_on(&self) -> HwResult<bool>;
    /// Switch the output.
    fn write_on(&self, on: bool) -> HwResult<()>;
}

/// Any I/O channel.
#[derive(Clone)]
pub enum IoChannel {
    /// Analog input
    AnalogIn(Arc<dyn AnalogInChannel>),
    /// Analog output
    AnalogOut(Arc<dyn AnalogOutChannel>),
    /// Digital input
    DigitalIn(Arc<dyn DigitalInChannel>),
    /// Digital output
    DigitalOut(Arc<dyn DigitalOutChannel>),
}

impl IoChannel {
    /// Channel kind.
    pub fn kind(&self) -> IoKind {
        match self {
            IoChannel::AnalogIn(_) => IoKind::AnalogIn,
            IoChannel::AnalogOut(_) => IoKind::AnalogOut,
            IoChannel::DigitalIn(_) => IoKind::DigitalIn,
            IoChannel::DigitalOut(_) => IoKind::DigitalOut,
        }
    }

    /// Channel name.
    pub fn name(&self) -> HwResult<String> {
        match self {
            IoChannel::AnalogIn(c) => c.name(),
            IoChannel::AnalogOut(c) => c.name(),
            IoChannel::DigitalIn(c) => c.name(),
            IoChannel::DigitalOut(c) => c.name(),
        }
    }
}

impl fmt::Debug for IoChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoChannel")
            .field("kind", &self.kind())
            .field("name", &self.name().ok())
            .finish()
    }
}
