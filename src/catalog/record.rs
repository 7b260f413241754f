//! Logical device records produced by discovery.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hardware::{
    AxisSystemUnit, ControllerChannelUnit, IoChannel, IoKind, PumpUnit, ValveUnit,
};

/// Capability facet of a device record.
///
/// The declaration order is the endpoint category order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Owns a pump
    Pump,
    /// Owns an axis system
    Axis,
    /// Owns valves and nothing else
    Valve,
    /// Owns controller channels
    Controller,
    /// Owns I/O channels
    Io,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Pump => "pump",
            Capability::Axis => "axis",
            Capability::Valve => "valve",
            Capability::Controller => "controller",
            Capability::Io => "I/O",
        };
        f.write_str(s)
    }
}

/// Pump classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpKind {
    /// Single syringe pump
    Syringe,
    /// Composite of two syringe pumps delivering continuous flow
    ContinuousFlow,
}

/// Pump handle with its classification.
#[derive(Clone)]
pub struct PumpHandle {
    /// Hardware unit
    pub unit: Arc<dyn PumpUnit>,
    /// Classification made at discovery
    pub kind: PumpKind,
}

/// Named logical device with the hardware attached to it.
#[derive(Clone)]
pub struct DeviceRecord {
    name: String,
    capabilities: BTreeSet<Capability>,
    primary: Option<Capability>,
    pub(super) pump: Option<PumpHandle>,
    pub(super) axis_system: Option<Arc<dyn AxisSystemUnit>>,
    pub(super) valves: Vec<Arc<dyn ValveUnit>>,
    pub(super) controller_channels: Vec<Arc<dyn ControllerChannelUnit>>,
    pub(super) io_channels: Vec<IoChannel>,
}

impl DeviceRecord {
    pub(super) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: BTreeSet::new(),
            primary: None,
            pump: None,
            axis_system: None,
            valves: Vec::new(),
            controller_channels: Vec::new(),
            io_channels: Vec::new(),
        }
    }

    pub(super) fn add_capability(&mut self, capability: Capability) {
        if self.capabilities.insert(capability) && self.primary.is_none() {
            self.primary = Some(capability);
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability facets.
    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    /// Whether the record has `capability`.
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// The facet added first; decides the endpoint category.
    pub fn primary_capability(&self) -> Option<Capability> {
        self.primary
    }

    /// Attached pump.
    pub fn pump(&self) -> Option<&PumpHandle> {
        self.pump.as_ref()
    }

    /// Attached axis system.
    pub fn axis_system(&self) -> Option<&Arc<dyn AxisSystemUnit>> {
        self.axis_system.as_ref()
    }

    /// Attached valves in discovery order.
    pub fn valves(&self) -> &[Arc<dyn ValveUnit>] {
        &self.valves
    }

    /// Attached controller channels in discovery order.
    pub fn controller_channels(&self) -> &[Arc<dyn ControllerChannelUnit>] {
        &self.controller_channels
    }

    /// Attached I/O channels in discovery order.
    pub fn io_channels(&self) -> &[IoChannel] {
        &self.io_channels
    }

    /// Attached I/O channels of one kind.
    pub fn io_channels_of(&self, kind: IoKind) -> Vec<IoChannel> {
        self.io_channels
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("pump_kind", &self.pump.as_ref().map(|p| p.kind))
            .field("axis_system", &self.axis_system.is_some())
            .field("valves", &self.valves.len())
            .field("controller_channels", &self.controller_channels.len())
            .field("io_channels", &self.io_channels)
            .finish()
    }
}

/// Result of one discovery pass: records in first-creation order.
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    records: Vec<DeviceRecord>,
}

impl DeviceCatalog {
    pub(super) fn new(records: Vec<DeviceRecord>) -> Self {
        Self { records }
    }

    /// All records in creation order.
    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    /// Record by device name.
    pub fn get(&self, name: &str) -> Option<&DeviceRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Records having `capability`.
    pub fn with_capability(&self, capability: Capability) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter().filter(move |r| r.has(capability))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if discovery found nothing.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
