//! Mock Hardware Implementations
//!
//! Provides simulated bus units for testing without physical hardware.
//! Motion and dosing progress is derived from `tokio::time::Instant`, so tests
//! running with `start_paused = true` see deterministic timing.
//!
//! # Available Mocks
//!
//! - `SimBus` - Event queue with scripted emergency/guard events
//! - `SimPump` - Syringe pump with linear dosing, faults and force sensor
//! - `SimAxisSystem` / `SimAxis` - Linear axes moving at the commanded velocity
//! - `SimValve`, `SimController`, and the four I/O channel kinds
//! - `SimDirectory` - `UnitDirectory` over any combination of the above

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{
    AnalogInChannel, AnalogOutChannel, AxisSystemUnit, AxisUnit, Bus, BusEvent,
    ControllerChannelUnit, DigitalInChannel, DigitalOutChannel, HardwareError, HwResult,
    IoChannel, IoKind, PumpUnit, SyringeParameters, UnitCategory, UnitDirectory, ValveUnit,
    SWITCHING_MODE_CROSS_FLOW,
};
use crate::config::{DeviceDefinition, DeviceKind};

// =============================================================================
// SimBus
// =============================================================================

/// Simulated bus with a scripted event queue.
#[derive(Default)]
pub struct SimBus {
    events: Mutex<VecDeque<BusEvent>>,
    fail_open: bool,
    state: Mutex<BusFlags>,
}

#[derive(Default, Debug, Clone, Copy)]
struct BusFlags {
    opened: bool,
    started: bool,
}

impl SimBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus whose `open` always fails.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Queue an event for the next `read_event`.
    pub fn push_event(&self, event: BusEvent) {
        self.events.lock().push_back(event);
    }

    /// Number of events not yet read.
    pub fn pending_events(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether the bus is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().opened
    }

    /// Whether bus communication is running.
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }
}

impl Bus for SimBus {
    fn open(&self, config_path: &Path) -> HwResult<()> {
        if self.fail_open {
            return Err(HardwareError::Communication(format!(
                "cannot open device configuration {}",
                config_path.display()
            )));
        }
        self.state.lock().opened = true;
        Ok(())
    }

    fn start(&self) -> HwResult<()> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(HardwareError::Communication("bus is not open".into()));
        }
        state.started = true;
        Ok(())
    }

    fn stop(&self) -> HwResult<()> {
        self.state.lock().started = false;
        Ok(())
    }

    fn close(&self) -> HwResult<()> {
        let mut state = self.state.lock();
        state.started = false;
        state.opened = false;
        Ok(())
    }

    fn read_event(&self) -> HwResult<Option<BusEvent>> {
        Ok(self.events.lock().pop_front())
    }
}

// =============================================================================
// SimPump
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Dosage {
    from: f64,
    to: f64,
    /// Flow magnitude in volume per time base
    flow: f64,
    started_at: Instant,
}

#[derive(Debug)]
struct PumpState {
    enabled: bool,
    fault: Option<String>,
    last_error: Option<String>,
    link_up: bool,
    fill_level: f64,
    max_volume: f64,
    max_flow: f64,
    start_delay: Duration,
    dosage: Option<Dosage>,
    target_volume: f64,
    dosed_volume: f64,
    calibration_done_at: Option<Instant>,
    syringe: SyringeParameters,
    force_value: f64,
    force_limit: f64,
    max_device_force: f64,
    force_monitoring: bool,
    safety_stop: bool,
    refill_flow: f64,
    switching_mode: u32,
    cross_flow_duration: f64,
    overlap_duration: f64,
    fault_clears: u32,
    reads: u64,
}

/// Simulated syringe pump.
///
/// Dispensing lowers the fill level at the commanded flow rate. A configurable
/// start delay keeps the measured flow at zero for the first moments of a
/// dosage.
///
/// # Example
///
/// ```rust,ignore
/// let pump = SimPump::new("neMESYS_1_Pump").with_flow_time_base(Duration::from_secs(60));
/// pump.pump_volume(10.0, 5.0)?; // 10 units at 5 units/min
/// ```
pub struct SimPump {
    name: String,
    continuous_flow: bool,
    time_base: Duration,
    state: Mutex<PumpState>,
}

impl SimPump {
    /// Enabled syringe pump with a 25 unit syringe filled to the brim.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            continuous_flow: false,
            time_base: Duration::from_secs(1),
            state: Mutex::new(PumpState {
                enabled: true,
                fault: None,
                last_error: None,
                link_up: true,
                fill_level: 25.0,
                max_volume: 25.0,
                max_flow: 10.0,
                start_delay: Duration::ZERO,
                dosage: None,
                target_volume: 0.0,
                dosed_volume: 0.0,
                calibration_done_at: None,
                syringe: SyringeParameters {
                    inner_diameter_mm: 4.61,
                    max_piston_stroke_mm: 60.0,
                },
                force_value: 0.0,
                force_limit: 1.0,
                max_device_force: 2.0,
                force_monitoring: true,
                safety_stop: false,
                refill_flow: 1.0,
                switching_mode: SWITCHING_MODE_CROSS_FLOW,
                cross_flow_duration: 2.0,
                overlap_duration: 1.0,
                fault_clears: 0,
                reads: 0,
            }),
        }
    }

    /// Mark the pump as a continuous flow pump.
    pub fn continuous_flow(mut self) -> Self {
        self.continuous_flow = true;
        self
    }

    /// Use a different flow time base (e.g. 60 s for "per minute").
    pub fn with_flow_time_base(mut self, time_base: Duration) -> Self {
        self.time_base = time_base;
        self
    }

    /// Override syringe volume, current fill level and maximum flow rate.
    pub fn with_syringe(self, max_volume: f64, fill_level: f64, max_flow: f64) -> Self {
        {
            let mut s = self.state.lock();
            s.max_volume = max_volume;
            s.fill_level = fill_level;
            s.max_flow = max_flow;
        }
        self
    }

    /// Keep the measured flow at zero for `delay` after each start.
    pub fn with_start_delay(self, delay: Duration) -> Self {
        self.state.lock().start_delay = delay;
        self
    }

    /// Latch a fault; any running dosage stops.
    pub fn inject_fault(&self, message: &str) {
        let mut s = self.state.lock();
        Self::advance(&mut s, self.time_base);
        s.dosage = None;
        s.fault = Some(message.to_string());
        s.last_error = Some(message.to_string());
    }

    /// Simulate a lost (or restored) link; reads fail while down.
    pub fn set_link_up(&self, up: bool) {
        self.state.lock().link_up = up;
    }

    /// Set the raw force sensor reading.
    pub fn set_force_value(&self, value: f64) {
        self.state.lock().force_value = value;
    }

    /// How often `clear_fault` reached the hardware.
    pub fn fault_clear_count(&self) -> u32 {
        self.state.lock().fault_clears
    }

    /// Number of bus calls the pump answered so far.
    pub fn read_count(&self) -> u64 {
        self.state.lock().reads
    }

    fn advance(s: &mut PumpState, time_base: Duration) {
        let Some(d) = s.dosage else { return };
        let elapsed = Instant::now()
            .saturating_duration_since(d.started_at)
            .saturating_sub(s.start_delay);
        let rate = d.flow / time_base.as_secs_f64();
        let total = (d.to - d.from).abs();
        let moved = rate * elapsed.as_secs_f64();
        if moved >= total {
            s.fill_level = d.to;
            s.dosed_volume = total;
            s.dosage = None;
        } else {
            s.fill_level = d.from + (d.to - d.from).signum() * moved;
            s.dosed_volume = moved;
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PumpState) -> HwResult<T>) -> HwResult<T> {
        let mut s = self.state.lock();
        if !s.link_up {
            return Err(HardwareError::Communication(format!(
                "no response from {}",
                self.name
            )));
        }
        s.reads += 1;
        Self::advance(&mut s, self.time_base);
        f(&mut s)
    }

    fn with_contiflow<T>(&self, f: impl FnOnce(&mut PumpState) -> HwResult<T>) -> HwResult<T> {
        if !self.continuous_flow {
            return Err(HardwareError::Unsupported(
                "Continuous flow configuration is not supported by this unit".into(),
            ));
        }
        self.with_state(f)
    }

    fn start_dosage(&self, to: f64, flow: f64) -> HwResult<()> {
        let name = self.name.clone();
        self.with_state(|s| {
            if let Some(fault) = &s.fault {
                return Err(HardwareError::Fault {
                    unit: name,
                    message: fault.clone(),
                });
            }
            if !s.enabled {
                s.last_error = Some("drive disabled".into());
                return Err(HardwareError::Fault {
                    unit: name,
                    message: "drive disabled".into(),
                });
            }
            let to = to.clamp(0.0, s.max_volume);
            s.target_volume = (to - s.fill_level).abs();
            s.dosed_volume = 0.0;
            s.dosage = Some(Dosage {
                from: s.fill_level,
                to,
                flow: flow.abs(),
                started_at: Instant::now(),
            });
            Ok(())
        })
    }
}

impl PumpUnit for SimPump {
    fn name(&self) -> HwResult<String> {
        Ok(self.name.clone())
    }

    fn continuous_flow_switching_mode(&self) -> HwResult<u32> {
        if self.continuous_flow {
            Ok(self.state.lock().switching_mode)
        } else {
            Err(HardwareError::PropertyUnavailable("SWITCHING_MODE".into()))
        }
    }

    fn is_enabled(&self) -> HwResult<bool> {
        self.with_state(|s| Ok(s.enabled))
    }

    fn enable(&self, enable: bool) -> HwResult<()> {
        let name = self.name.clone();
        self.with_state(|s| {
            if enable && s.fault.is_some() {
                return Err(HardwareError::Fault {
                    unit: name,
                    message: "cannot enable drive while in fault state".into(),
                });
            }
            if !enable {
                s.dosage = None;
            }
            s.enabled = enable;
            Ok(())
        })
    }

    fn is_in_fault_state(&self) -> HwResult<bool> {
        self.with_state(|s| Ok(s.fault.is_some()))
    }

    fn clear_fault(&self) -> HwResult<()> {
        self.with_state(|s| {
            s.fault = None;
            s.fault_clears += 1;
            Ok(())
        })
    }

    fn last_error(&self) -> HwResult<Option<String>> {
        self.with_state(|s| Ok(s.last_error.clone()))
    }

    fn calibrate(&self) -> HwResult<()> {
        self.with_state(|s| {
            s.calibration_done_at = Some(Instant::now() + Duration::from_millis(300));
            Ok(())
        })
    }

    fn is_calibration_finished(&self) -> HwResult<bool> {
        self.with_state(|s| {
            Ok(s.calibration_done_at
                .is_some_and(|done| Instant::now() >= done))
        })
    }

    fn is_pumping(&self) -> HwResult<bool> {
        self.with_state(|s| Ok(s.dosage.is_some()))
    }

    fn stop_pumping(&self) -> HwResult<()> {
        self.with_state(|s| {
            s.dosage = None;
            Ok(())
        })
    }

    fn pump_volume(&self, volume: f64, flow: f64) -> HwResult<()> {
        let current = self.fill_level()?;
        self.start_dosage(current - volume, flow)
    }

    fn set_fill_level(&self, fill_level: f64, flow: f64) -> HwResult<()> {
        self.start_dosage(fill_level, flow)
    }

    fn generate_flow(&self, flow: f64) -> HwResult<()> {
        let to = if flow >= 0.0 { 0.0 } else { self.max_volume()? };
        self.start_dosage(to, flow)
    }

    fn actual_flow_rate(&self) -> HwResult<f64> {
        self.with_state(|s| match s.dosage {
            Some(d) if Instant::now().saturating_duration_since(d.started_at) >= s.start_delay => {
                // dispensing reports positive flow
                Ok(d.flow * (d.from - d.to).signum())
            }
            _ => Ok(0.0),
        })
    }

    fn flow_time_base(&self) -> Duration {
        self.time_base
    }

    fn max_flow_rate(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.max_flow))
    }

    fn fill_level(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.fill_level))
    }

    fn max_volume(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.max_volume))
    }

    fn target_volume(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.target_volume))
    }

    fn dosed_volume(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.dosed_volume))
    }

    fn syringe_parameters(&self) -> HwResult<SyringeParameters> {
        self.with_state(|s| Ok(s.syringe))
    }

    fn set_syringe_parameters(&self, params: SyringeParameters) -> HwResult<()> {
        self.with_state(|s| {
            s.syringe = params;
            Ok(())
        })
    }

    fn force_sensor_value(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.force_value))
    }

    fn force_limit(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.force_limit))
    }

    fn max_device_force(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.max_device_force))
    }

    fn set_force_limit(&self, limit: f64) -> HwResult<()> {
        self.with_state(|s| {
            s.force_limit = limit.min(s.max_device_force);
            Ok(())
        })
    }

    fn is_force_monitoring_enabled(&self) -> HwResult<bool> {
        self.with_state(|s| Ok(s.force_monitoring))
    }

    fn enable_force_monitoring(&self, enable: bool) -> HwResult<()> {
        self.with_state(|s| {
            s.force_monitoring = enable;
            Ok(())
        })
    }

    fn is_force_safety_stop_active(&self) -> HwResult<bool> {
        self.with_state(|s| Ok(s.safety_stop))
    }

    fn clear_force_safety_stop(&self) -> HwResult<()> {
        self.with_state(|s| {
            s.safety_stop = false;
            Ok(())
        })
    }

    fn refill_flow_rate(&self) -> HwResult<f64> {
        self.with_contiflow(|s| Ok(s.refill_flow))
    }

    fn set_refill_flow_rate(&self, flow: f64) -> HwResult<()> {
        self.with_contiflow(|s| {
            s.refill_flow = flow;
            Ok(())
        })
    }

    fn max_refill_flow_rate(&self) -> HwResult<f64> {
        self.with_contiflow(|s| Ok(s.max_flow * 2.0))
    }

    fn min_flow_rate(&self) -> HwResult<f64> {
        self.with_contiflow(|s| Ok(s.max_flow / 1000.0))
    }

    fn set_continuous_flow_switching_mode(&self, mode: u32) -> HwResult<()> {
        self.with_contiflow(|s| {
            s.switching_mode = mode;
            Ok(())
        })
    }

    fn cross_flow_duration(&self) -> HwResult<f64> {
        self.with_contiflow(|s| Ok(s.cross_flow_duration))
    }

    fn set_cross_flow_duration(&self, seconds: f64) -> HwResult<()> {
        self.with_contiflow(|s| {
            s.cross_flow_duration = seconds;
            Ok(())
        })
    }

    fn overlap_duration(&self) -> HwResult<f64> {
        self.with_contiflow(|s| Ok(s.overlap_duration))
    }

    fn set_overlap_duration(&self, seconds: f64) -> HwResult<()> {
        self.with_contiflow(|s| {
            s.overlap_duration = seconds;
            Ok(())
        })
    }
}

// =============================================================================
// SimAxis / SimAxisSystem
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: f64,
    to: f64,
    velocity: f64,
    started_at: Instant,
}

#[derive(Debug)]
struct AxisState {
    position: f64,
    target: f64,
    limits: (f64, f64),
    max_velocity: f64,
    motion: Option<Motion>,
    fault: Option<String>,
    enabled: bool,
    start_delay: Duration,
}

/// Simulated linear axis moving at the commanded velocity (units/s).
///
/// With a start delay set, the axis stays put at zero velocity for that long
/// after each move command. A stop halts the axis and reports its target as
/// reached.
pub struct SimAxis {
    name: String,
    state: Mutex<AxisState>,
}

impl SimAxis {
    /// Axis at position 0 with limits `[0, 100]` and max velocity 10.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(AxisState {
                position: 0.0,
                target: 0.0,
                limits: (0.0, 100.0),
                max_velocity: 10.0,
                motion: None,
                fault: None,
                enabled: true,
                start_delay: Duration::ZERO,
            }),
        }
    }

    /// Stand still with zero velocity for `delay` after each move command.
    pub fn set_start_delay(&self, delay: Duration) {
        self.state.lock().start_delay = delay;
    }

    /// Latch a fault and stop motion.
    pub fn inject_fault(&self, message: &str) {
        let mut s = self.state.lock();
        Self::advance(&mut s);
        s.motion = None;
        s.fault = Some(message.to_string());
    }

    fn set_enabled(&self, enabled: bool) {
        let mut s = self.state.lock();
        Self::advance(&mut s);
        if !enabled {
            s.motion = None;
        }
        s.enabled = enabled;
    }

    fn advance(s: &mut AxisState) {
        let Some(m) = s.motion else { return };
        let elapsed = Instant::now()
            .saturating_duration_since(m.started_at)
            .saturating_sub(s.start_delay);
        let travelled = m.velocity * elapsed.as_secs_f64();
        let total = (m.to - m.from).abs();
        if travelled >= total {
            s.position = m.to;
            s.motion = None;
        } else {
            s.position = m.from + (m.to - m.from).signum() * travelled;
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut AxisState) -> HwResult<T>) -> HwResult<T> {
        let mut s = self.state.lock();
        Self::advance(&mut s);
        f(&mut s)
    }
}

impl AxisUnit for SimAxis {
    fn name(&self) -> HwResult<String> {
        Ok(self.name.clone())
    }

    fn position(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.position))
    }

    fn position_limits(&self) -> HwResult<(f64, f64)> {
        self.with_state(|s| Ok(s.limits))
    }

    fn min_velocity(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.max_velocity / 1000.0))
    }

    fn max_velocity(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.max_velocity))
    }

    fn position_unit(&self) -> HwResult<String> {
        Ok("mm".to_string())
    }

    fn actual_velocity(&self) -> HwResult<f64> {
        self.with_state(|s| {
            Ok(match s.motion {
                Some(m) if Instant::now().saturating_duration_since(m.started_at) >= s.start_delay => {
                    m.velocity
                }
                _ => 0.0,
            })
        })
    }

    fn move_to(&self, position: f64, velocity: f64) -> HwResult<()> {
        let name = self.name.clone();
        self.with_state(|s| {
            if let Some(fault) = &s.fault {
                return Err(HardwareError::Fault {
                    unit: name,
                    message: fault.clone(),
                });
            }
            s.target = position;
            s.motion = Some(Motion {
                from: s.position,
                to: position,
                velocity: velocity.abs(),
                started_at: Instant::now(),
            });
            Ok(())
        })
    }

    fn is_target_reached(&self) -> HwResult<bool> {
        self.with_state(|s| Ok(s.motion.is_none() && (s.position - s.target).abs() < 1e-9))
    }

    fn target_position(&self) -> HwResult<f64> {
        self.with_state(|s| Ok(s.target))
    }

    fn stop(&self) -> HwResult<()> {
        self.with_state(|s| {
            s.motion = None;
            s.target = s.position;
            Ok(())
        })
    }

    fn find_home(&self) -> HwResult<()> {
        let velocity = self.max_velocity()?;
        let home = self.position_limits()?.0;
        self.move_to(home, velocity)
    }

    fn is_in_fault_state(&self) -> HwResult<bool> {
        self.with_state(|s| Ok(s.fault.is_some()))
    }

    fn clear_fault(&self) -> HwResult<()> {
        self.with_state(|s| {
            s.fault = None;
            Ok(())
        })
    }

    fn is_enabled(&self) -> HwResult<bool> {
        self.with_state(|s| Ok(s.enabled))
    }

    fn last_error(&self) -> HwResult<Option<String>> {
        self.with_state(|s| Ok(s.fault.clone()))
    }
}

/// Simulated axis system.
pub struct SimAxisSystem {
    name: String,
    axes: Vec<Arc<SimAxis>>,
}

impl SimAxisSystem {
    /// Axis system with `axis_count` axes named `<name>_Axis<n>`.
    pub fn new(name: impl Into<String>, axis_count: usize) -> Self {
        let name = name.into();
        let axes = (1..=axis_count)
            .map(|i| Arc::new(SimAxis::new(format!("{name}_Axis{i}"))))
            .collect();
        Self { name, axes }
    }

    /// Concrete axis handle for test manipulation.
    pub fn sim_axis(&self, index: usize) -> Option<Arc<SimAxis>> {
        self.axes.get(index).cloned()
    }
}

impl AxisSystemUnit for SimAxisSystem {
    fn name(&self) -> HwResult<String> {
        Ok(self.name.clone())
    }

    fn axis_count(&self) -> HwResult<usize> {
        Ok(self.axes.len())
    }

    fn axis(&self, index: usize) -> HwResult<Arc<dyn AxisUnit>> {
        self.axes
            .get(index)
            .map(|a| a.clone() as Arc<dyn AxisUnit>)
            .ok_or(HardwareError::NotFound {
                category: UnitCategory::AxisSystem,
                index,
            })
    }

    fn enable(&self, enable: bool) -> HwResult<()> {
        for axis in &self.axes {
            axis.set_enabled(enable);
        }
        Ok(())
    }

    fn is_enabled(&self) -> HwResult<bool> {
        for axis in &self.axes {
            if !axis.is_enabled()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// =============================================================================
// SimValve / SimController / I/O channels
// =============================================================================

/// Simulated valve; a valve without a name behaves like a virtual duplicate.
pub struct SimValve {
    name: Option<String>,
    position_count: u32,
    position: Mutex<u32>,
}

impl SimValve {
    /// Named valve with `position_count` positions.
    pub fn new(name: impl Into<String>, position_count: u32) -> Self {
        Self {
            name: Some(name.into()),
            position_count,
            position: Mutex::new(0),
        }
    }

    /// Valve whose name cannot be resolved.
    pub fn virtual_valve() -> Self {
        Self {
            name: None,
            position_count: 2,
            position: Mutex::new(0),
        }
    }
}

impl ValveUnit for SimValve {
    fn name(&self) -> HwResult<String> {
        self.name.clone().ok_or(HardwareError::NameUnavailable)
    }

    fn position_count(&self) -> HwResult<u32> {
        Ok(self.position_count)
    }

    fn actual_position(&self) -> HwResult<u32> {
        Ok(*self.position.lock())
    }

    fn switch_to(&self, position: u32) -> HwResult<()> {
        if position >= self.position_count {
            return Err(HardwareError::Communication(format!(
                "invalid valve position {position}"
            )));
        }
        *self.position.lock() = position;
        Ok(())
    }
}

/// Simulated controller channel; the actual value follows the setpoint while
/// the control loop runs.
pub struct SimController {
    name: String,
    state: Mutex<(f64, f64, bool)>,
}

impl SimController {
    /// Channel with actual value and setpoint at zero, loop off.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new((0.0, 0.0, false)),
        }
    }
}

impl ControllerChannelUnit for SimController {
    fn name(&self) -> HwResult<String> {
        Ok(self.name.clone())
    }

    fn actual_value(&self) -> HwResult<f64> {
        let (actual, setpoint, running) = *self.state.lock();
        Ok(if running { setpoint } else { actual })
    }

    fn setpoint(&self) -> HwResult<f64> {
        Ok(self.state.lock().1)
    }

    fn write_setpoint(&self, setpoint: f64) -> HwResult<()> {
        self.state.lock().1 = setpoint;
        Ok(())
    }

    fn enable_control_loop(&self, enable: bool) -> HwResult<()> {
        let mut s = self.state.lock();
        if !enable && s.2 {
            s.0 = s.1;
        }
        s.2 = enable;
        Ok(())
    }

    fn is_control_loop_enabled(&self) -> HwResult<bool> {
        Ok(self.state.lock().2)
    }
}

/// Simulated analog/digital channel holding a single value.
pub struct SimChannel<T> {
    name: String,
    value: Mutex<T>,
}

impl<T: Copy> SimChannel<T> {
    /// Channel with an initial value.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(initial),
        }
    }

    /// Change the value seen by reads.
    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }

    fn get(&self) -> T {
        *self.value.lock()
    }
}

impl AnalogInChannel for SimChannel<f64> {
    fn name(&self) -> HwResult<String> {
        Ok(self.name.clone())
    }

    fn read_input(&self) -> HwResult<f64> {
        Ok(self.get())
    }
}

impl AnalogOutChannel for SimChannel<f64> {
    fn name(&self) -> HwResult<String> {
        Ok(self.name.clone())
    }

    fn output_value(&self) -> HwResult<f64> {
        Ok(self.get())
    }

    fn write_output(&self, value: f64) -> HwResult<()> {
        self.set(value);
        Ok(())
    }
}

impl DigitalInChannel for SimChannel<bool> {
    fn name(&self) -> HwResult<String> {
        Ok(self.name.clone())
    }

    fn is_on(&self) -> HwResult<bool> {
        Ok(self.get())
    }
}

impl DigitalOutChannel for SimChannel<bool> {
    fn name(&self) -> HwResult<String> {
        Ok(self.name.clone())
    }

    fn is_output_on(&self) -> HwResult<bool> {
        Ok(self.get())
    }

    fn write_on(&self, on: bool) -> HwResult<()> {
        self.set(on);
        Ok(())
    }
}

// =============================================================================
// SimDirectory
// =============================================================================

/// `UnitDirectory` over simulated units, enumerated in insertion order.
#[derive(Default)]
pub struct SimDirectory {
    pumps: Vec<Arc<dyn PumpUnit>>,
    axis_systems: Vec<Arc<dyn AxisSystemUnit>>,
    valves: Vec<Arc<dyn ValveUnit>>,
    controllers: Vec<Arc<dyn ControllerChannelUnit>>,
    io: Vec<IoChannel>,
}

impl SimDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pump.
    pub fn with_pump(mut self, pump: Arc<dyn PumpUnit>) -> Self {
        self.pumps.push(pump);
        self
    }

    /// Add an axis system.
    pub fn with_axis_system(mut self, system: Arc<dyn AxisSystemUnit>) -> Self {
        self.axis_systems.push(system);
        self
    }

    /// Add a valve.
    pub fn with_valve(mut self, valve: Arc<dyn ValveUnit>) -> Self {
        self.valves.push(valve);
        self
    }

    /// Add a controller channel.
    pub fn with_controller(mut self, channel: Arc<dyn ControllerChannelUnit>) -> Self {
        self.controllers.push(channel);
        self
    }

    /// Add an I/O channel.
    pub fn with_io(mut self, channel: IoChannel) -> Self {
        self.io.push(channel);
        self
    }

    /// Simulated units for a list of declared devices.
    ///
    /// Pumps get a valve and a digital input, axis systems three axes, valve
    /// devices one valve, controllers one channel and I/O devices one channel
    /// of each kind.
    pub fn for_devices(devices: &[DeviceDefinition]) -> Self {
        let mut dir = Self::new();
        for device in devices {
            let name = device.name.as_str();
            let base = crate::catalog::base_name(name);
            match device.kind {
                DeviceKind::Pump => {
                    dir = dir
                        .with_pump(Arc::new(SimPump::new(name)))
                        .with_valve(Arc::new(SimValve::new(format!("{base}_Valve"), 4)))
                        .with_io(IoChannel::DigitalIn(Arc::new(SimChannel::new(
                            format!("{base}_DI1"),
                            false,
                        ))));
                }
                DeviceKind::AxisSystem => {
                    dir = dir.with_axis_system(Arc::new(SimAxisSystem::new(name, 3)));
                }
                DeviceKind::Valve => {
                    dir = dir.with_valve(Arc::new(SimValve::new(name, 6)));
                }
                DeviceKind::Controller => {
                    dir = dir.with_controller(Arc::new(SimController::new(format!("{name}_Ch1"))));
                }
                DeviceKind::Io | DeviceKind::Generic => {
                    dir = dir
                        .with_io(IoChannel::AnalogIn(Arc::new(SimChannel::new(
                            format!("{name}_AI1"),
                            0.0,
                        ))))
                        .with_io(IoChannel::AnalogOut(Arc::new(SimChannel::new(
                            format!("{name}_AO1"),
                            0.0,
                        ))))
                        .with_io(IoChannel::DigitalIn(Arc::new(SimChannel::new(
                            format!("{name}_DI1"),
                            false,
                        ))))
                        .with_io(IoChannel::DigitalOut(Arc::new(SimChannel::new(
                            format!("{name}_DO1"),
                            false,
                        ))));
                }
            }
        }
        dir
    }

    fn io_of_kind(&self, kind: IoKind) -> impl Iterator<Item = &IoChannel> {
        self.io.iter().filter(move |c| c.kind() == kind)
    }
}

fn lookup<T: Clone>(items: &[T], category: UnitCategory, index: usize) -> HwResult<T> {
    items
        .get(index)
        .cloned()
        .ok_or(HardwareError::NotFound { category, index })
}

impl UnitDirectory for SimDirectory {
    fn unit_count(&self, category: UnitCategory) -> HwResult<usize> {
        Ok(match category {
            UnitCategory::Pump => self.pumps.len(),
            UnitCategory::AxisSystem => self.axis_systems.len(),
            UnitCategory::Valve => self.valves.len(),
            UnitCategory::Controller => self.controllers.len(),
            UnitCategory::AnalogIn => self.io_of_kind(IoKind::AnalogIn).count(),
            UnitCategory::AnalogOut => self.io_of_kind(IoKind::AnalogOut).count(),
            UnitCategory::DigitalIn => self.io_of_kind(IoKind::DigitalIn).count(),
            UnitCategory::DigitalOut => self.io_of_kind(IoKind::DigitalOut).count(),
        })
    }

    fn pump(&self, index: usize) -> HwResult<Arc<dyn PumpUnit>> {
        lookup(&self.pumps, UnitCategory::Pump, index)
    }

    fn axis_system(&self, index: usize) -> HwResult<Arc<dyn AxisSystemUnit>> {
        lookup(&self.axis_systems, UnitCategory::AxisSystem, index)
    }

    fn valve(&self, index: usize) -> HwResult<Arc<dyn ValveUnit>> {
        lookup(&self.valves, UnitCategory::Valve, index)
    }

    fn controller_channel(&self, index: usize) -> HwResult<Arc<dyn ControllerChannelUnit>> {
        lookup(&self.controllers, UnitCategory::Controller, index)
    }

    fn io_channel(&self, kind: IoKind, index: usize) -> HwResult<IoChannel> {
        self.io_of_kind(kind)
            .nth(index)
            .cloned()
            .ok_or(HardwareError::NotFound {
                category: kind.category(),
                index,
            })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sim_pump_doses_linearly() {
        let pump = SimPump::new("pump").with_flow_time_base(Duration::from_secs(60));
        pump.pump_volume(10.0, 5.0).unwrap();
        assert!(pump.is_pumping().unwrap());
        assert_eq!(pump.target_volume().unwrap(), 10.0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let dosed = pump.dosed_volume().unwrap();
        assert!((dosed - 5.0).abs() < 1e-6, "dosed {dosed}");

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!pump.is_pumping().unwrap());
        assert_eq!(pump.fill_level().unwrap(), 15.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_pump_fault_stops_dosage() {
        let pump = SimPump::new("pump");
        pump.generate_flow(1.0).unwrap();
        pump.inject_fault("overload");
        assert!(!pump.is_pumping().unwrap());
        assert!(pump.is_in_fault_state().unwrap());
        assert!(pump.enable(true).is_err());
        pump.clear_fault().unwrap();
        assert!(pump.enable(true).is_ok());
    }

    #[test]
    fn test_sim_pump_marker() {
        assert!(SimPump::new("a").continuous_flow_switching_mode().is_err());
        assert!(SimPump::new("b")
            .continuous_flow()
            .continuous_flow_switching_mode()
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_axis_moves_at_velocity() {
        let axis = SimAxis::new("x");
        axis.move_to(20.0, 10.0).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!((axis.position().unwrap() - 10.0).abs() < 1e-6);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(axis.is_target_reached().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_axis_start_delay_and_halt() {
        let axis = SimAxis::new("x");
        axis.set_start_delay(Duration::from_millis(200));
        axis.move_to(20.0, 10.0).unwrap();
        assert_eq!(axis.actual_velocity().unwrap(), 0.0);
        assert!(!axis.is_target_reached().unwrap());

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(axis.actual_velocity().unwrap(), 10.0);
        axis.stop().unwrap();
        assert!(axis.is_target_reached().unwrap());
        assert!((axis.position().unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_virtual_valve_has_no_name() {
        assert_eq!(
            SimValve::virtual_valve().name(),
            Err(HardwareError::NameUnavailable)
        );
    }

    #[test]
    fn test_sim_bus_event_queue() {
        let bus = SimBus::new();
        bus.push_event(BusEvent::guard(1, super::super::guard::HEARTBEAT_LOST));
        assert_eq!(bus.pending_events(), 1);
        assert!(bus.read_event().unwrap().is_some());
        assert!(bus.read_event().unwrap().is_none());
    }

    #[test]
    fn test_directory_counts_io_by_kind() {
        let dir = SimDirectory::new()
            .with_io(IoChannel::DigitalIn(Arc::new(SimChannel::new("di", false))))
            .with_io(IoChannel::AnalogIn(Arc::new(SimChannel::new("ai", 0.0))))
            .with_io(IoChannel::DigitalIn(Arc::new(SimChannel::new("di2", true))));
        assert_eq!(dir.unit_count(UnitCategory::DigitalIn).unwrap(), 2);
        assert_eq!(dir.unit_count(UnitCategory::AnalogIn).unwrap(), 1);
        assert_eq!(
            dir.io_channel(IoKind::DigitalIn, 1).unwrap().name().unwrap(),
            "di2"
        );
    }
}
