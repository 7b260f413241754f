//! Device discovery and classification
//!
//! Partitions the raw units found on the bus into logical [`DeviceRecord`]s.
//!
//! # Discovery Order
//!
//! Units are enumerated and attached strictly in this order:
//!
//! 1. Pumps (classified as syringe or continuous flow)
//! 2. Axis systems
//! 3. Valves (attached to the pump or device they belong to)
//! 4. Controller channels
//! 5. I/O channels: analog in, analog out, digital in, digital out
//!
//! The order matters: a valve that belongs to a pump must find the pump
//! record already present so that it is not exposed as a device of its own.
//!
//! # Ownership
//!
//! Valves, controller channels and I/O channels carry names such as
//! `neMESYS_1_Valve` or `Nemesys_DI3`. Their owner is the declared device
//! whose base name (see [`base_name`]) occurs in the unit name; see
//! [`resolve_owner`].

mod record;

pub use record::{Capability, DeviceCatalog, DeviceRecord, PumpHandle, PumpKind};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{DeviceConfiguration, DeviceKind};
use crate::hardware::{
    AxisSystemUnit, ControllerChannelUnit, IoChannel, IoKind, PumpUnit, UnitCategory,
    UnitDirectory, ValveUnit,
};

/// Suffix stripped from pump names to obtain the base name.
pub const PUMP_SUFFIX: &str = "_Pump";

/// Device name with everything from the last `"_Pump"` on removed.
///
/// `"neMESYS_1_Pump"` becomes `"neMESYS_1"`; names without the suffix are
/// returned unchanged.
pub fn base_name(name: &str) -> &str {
    match name.rfind(PUMP_SUFFIX) {
        Some(pos) => &name[..pos],
        None => name,
    }
}

/// Find the owner of a unit named `candidate` among `declared` device names.
///
/// A device owns the unit when its base name is a non-empty substring of
/// `candidate`. When several devices match, the longest base name wins; ties
/// go to the device declared first.
pub fn resolve_owner<'a, I>(candidate: &str, declared: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'a str, usize)> = None;
    for name in declared {
        let base = base_name(name);
        if base.is_empty() || !candidate.contains(base) {
            continue;
        }
        match best {
            Some((_, len)) if len >= base.len() => {}
            _ => best = Some((name, base.len())),
        }
    }
    best.map(|(name, _)| name)
}

// =============================================================================
// Inventory
// =============================================================================

/// A unit together with its index in its category.
#[derive(Clone)]
pub struct Discovered<T> {
    /// Index within the category
    pub index: usize,
    /// Hardware handle
    pub unit: T,
}

/// All raw units found on the bus, grouped by category.
#[derive(Clone, Default)]
pub struct UnitInventory {
    /// Pumps
    pub pumps: Vec<Discovered<Arc<dyn PumpUnit>>>,
    /// Axis systems
    pub axis_systems: Vec<Discovered<Arc<dyn AxisSystemUnit>>>,
    /// Valves
    pub valves: Vec<Discovered<Arc<dyn ValveUnit>>>,
    /// Controller channels
    pub controller_channels: Vec<Discovered<Arc<dyn ControllerChannelUnit>>>,
    /// I/O channels, already in analog in, analog out, digital in, digital out order
    pub io_channels: Vec<Discovered<IoChannel>>,
}

impl UnitInventory {
    /// Total number of units.
    pub fn len(&self) -> usize {
        self.pumps.len()
            + self.axis_systems.len()
            + self.valves.len()
            + self.controller_channels.len()
            + self.io_channels.len()
    }

    /// True if no unit was found.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn enumerate<T>(
    dir: &dyn UnitDirectory,
    category: UnitCategory,
    lookup: impl Fn(usize) -> crate::hardware::HwResult<T>,
) -> Vec<Discovered<T>> {
    let count = match dir.unit_count(category) {
        Ok(count) => count,
        Err(e) => {
            warn!("Cannot count {} units: {}", category, e);
            return Vec::new();
        }
    };
    let mut units = Vec::with_capacity(count);
    for index in 0..count {
        match lookup(index) {
            Ok(unit) => units.push(Discovered { index, unit }),
            Err(e) => warn!("Skipping {} unit {}: {}", category, index, e),
        }
    }
    debug!("Found {} {} unit(s)", units.len(), category);
    units
}

/// Enumerate every unit category. Failed lookups are logged and skipped.
pub fn discover(dir: &dyn UnitDirectory) -> UnitInventory {
    let mut io_channels = Vec::new();
    for kind in IoKind::DISCOVERY_ORDER {
        io_channels.extend(enumerate(dir, kind.category(), |i| dir.io_channel(kind, i)));
    }
    UnitInventory {
        pumps: enumerate(dir, UnitCategory::Pump, |i| dir.pump(i)),
        axis_systems: enumerate(dir, UnitCategory::AxisSystem, |i| dir.axis_system(i)),
        valves: enumerate(dir, UnitCategory::Valve, |i| dir.valve(i)),
        controller_channels: enumerate(dir, UnitCategory::Controller, |i| {
            dir.controller_channel(i)
        }),
        io_channels,
    }
}

// =============================================================================
// CatalogBuilder
// =============================================================================

/// Assembles [`DeviceRecord`]s from a [`UnitInventory`].
pub struct CatalogBuilder<'a> {
    config: &'a DeviceConfiguration,
    records: Vec<DeviceRecord>,
    attached: HashSet<(UnitCategory, String)>,
}

impl<'a> CatalogBuilder<'a> {
    /// Builder resolving owners against `config`.
    pub fn new(config: &'a DeviceConfiguration) -> Self {
        Self {
            config,
            records: Vec::new(),
            attached: HashSet::new(),
        }
    }

    /// Run one discovery pass.
    pub fn build(mut self, inventory: UnitInventory) -> DeviceCatalog {
        for pump in inventory.pumps {
            self.add_pump(pump);
        }
        for system in inventory.axis_systems {
            self.add_axis_system(system);
        }
        for valve in inventory.valves {
            self.add_valve(valve);
        }
        for channel in inventory.controller_channels {
            self.add_controller_channel(channel);
        }
        for channel in inventory.io_channels {
            self.add_io_channel(channel);
        }

        let records: Vec<DeviceRecord> = self
            .records
            .into_iter()
            .filter(|r| !r.capabilities().is_empty())
            .collect();
        info!("Device catalog built with {} device(s)", records.len());
        DeviceCatalog::new(records)
    }

    fn record_mut(&mut self, name: &str) -> &mut DeviceRecord {
        let pos = match self.records.iter().position(|r| r.name() == name) {
            Some(pos) => pos,
            None => {
                debug!("Creating device record '{}'", name);
                self.records.push(DeviceRecord::new(name));
                self.records.len() - 1
            }
        };
        &mut self.records[pos]
    }

    /// Marks `(category, name)` as attached; false if it already was.
    fn claim(&mut self, category: UnitCategory, name: &str) -> bool {
        let fresh = self.attached.insert((category, name.to_string()));
        if !fresh {
            warn!("{} unit '{}' already attached, skipping duplicate", category, name);
        }
        fresh
    }

    fn owner_of(&self, candidate: &str, category: UnitCategory) -> Option<String> {
        let declared = self
            .config
            .devices()
            .iter()
            .filter(|d| category != UnitCategory::Valve || d.kind != DeviceKind::Io)
            .map(|d| d.name.as_str());
        let owner = resolve_owner(candidate, declared).map(str::to_string);
        if owner.is_none() {
            warn!(
                "No declared device owns {} unit '{}', skipping",
                category, candidate
            );
        }
        owner
    }

    fn add_pump(&mut self, pump: Discovered<Arc<dyn PumpUnit>>) {
        let name = match pump.unit.name() {
            Ok(name) => name,
            Err(e) => {
                warn!("Skipping pump {}: {}", pump.index, e);
                return;
            }
        };
        if !self.claim(UnitCategory::Pump, &name) {
            return;
        }
        let kind = match pump.unit.continuous_flow_switching_mode() {
            Ok(_) => PumpKind::ContinuousFlow,
            Err(_) => PumpKind::Syringe,
        };
        debug!("Pump '{}' classified as {:?}", name, kind);
        let record = self.record_mut(&name);
        record.pump = Some(PumpHandle {
            unit: pump.unit,
            kind,
        });
        record.add_capability(Capability::Pump);
    }

    fn add_axis_system(&mut self, system: Discovered<Arc<dyn AxisSystemUnit>>) {
        let name = match system.unit.name() {
            Ok(name) => name,
            Err(e) => {
                warn!("Skipping axis system {}: {}", system.index, e);
                return;
            }
        };
        if !self.claim(UnitCategory::AxisSystem, &name) {
            return;
        }
        let record = self.record_mut(&name);
        record.axis_system = Some(system.unit);
        record.add_capability(Capability::Axis);
    }

    fn add_valve(&mut self, valve: Discovered<Arc<dyn ValveUnit>>) {
        let name = match valve.unit.name() {
            Ok(name) => name,
            Err(e) => {
                debug!("Skipping virtual valve {}: {}", valve.index, e);
                return;
            }
        };
        let Some(owner) = self.owner_of(&name, UnitCategory::Valve) else {
            return;
        };
        if !self.claim(UnitCategory::Valve, &name) {
            return;
        }
        debug!("Valve '{}' belongs to '{}'", name, owner);
        let record = self.record_mut(&owner);
        record.valves.push(valve.unit);
        if record.capabilities().is_empty() {
            record.add_capability(Capability::Valve);
        }
    }

    fn add_controller_channel(&mut self, channel: Discovered<Arc<dyn ControllerChannelUnit>>) {
        let name = match channel.unit.name() {
            Ok(name) => name,
            Err(e) => {
                warn!("Skipping controller channel {}: {}", channel.index, e);
                return;
            }
        };
        let Some(owner) = self.owner_of(&name, UnitCategory::Controller) else {
            return;
        };
        if !self.claim(UnitCategory::Controller, &name) {
            return;
        }
        debug!("Controller channel '{}' belongs to '{}'", name, owner);
        let record = self.record_mut(&owner);
        record.controller_channels.push(channel.unit);
        record.add_capability(Capability::Controller);
    }

    fn add_io_channel(&mut self, channel: Discovered<IoChannel>) {
        let category = channel.unit.kind().category();
        let name = match channel.unit.name() {
            Ok(name) => name,
            Err(e) => {
                warn!("Skipping {} channel {}: {}", category, channel.index, e);
                return;
            }
        };
        let Some(owner) = self.owner_of(&name, category) else {
            return;
        };
        if !self.claim(category, &name) {
            return;
        }
        debug!("{} channel '{}' belongs to '{}'", category, name, owner);
        let record = self.record_mut(&owner);
        record.io_channels.push(channel.unit);
        record.add_capability(Capability::Io);
    }
}
