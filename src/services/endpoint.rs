//! Endpoint plan: which device is served on which port.

use serde::{Deserialize, Serialize};

use crate::catalog::{Capability, DeviceCatalog, DeviceRecord, PumpKind};
use crate::config::{EncryptionConfig, ServerConfig};
use crate::error::{AppResult, LabError};

/// One device endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Device name as discovered
    pub device: String,
    /// Display name (underscores replaced by spaces)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Category the endpoint is ordered by
    pub category: Capability,
    /// Listening port
    pub port: u16,
    /// Encryption material, if configured
    pub encryption: Option<EncryptionConfig>,
}

/// Endpoints for a catalog, ordered pumps, axes, valves, controllers, I/O.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointPlan {
    endpoints: Vec<Endpoint>,
}

fn description(record: &DeviceRecord, category: Capability) -> String {
    let kind = match category {
        Capability::Pump => match record.pump().map(|p| p.kind) {
            Some(PumpKind::ContinuousFlow) => "continuous flow pump",
            _ => "syringe pump",
        },
        Capability::Axis => "axis system",
        Capability::Valve => "valve",
        Capability::Controller => "controller",
        Capability::Io => "I/O",
    };
    format!("Allows to control the {kind} '{}'", record.name())
}

impl EndpointPlan {
    /// Assign ports sequentially from `server.base_port`.
    ///
    /// Records are ordered by their primary capability; within a category the
    /// discovery order is kept.
    pub fn from_catalog(catalog: &DeviceCatalog, server: &ServerConfig) -> AppResult<Self> {
        let mut records: Vec<(&DeviceRecord, Capability)> = catalog
            .records()
            .iter()
            .filter_map(|r| r.primary_capability().map(|c| (r, c)))
            .collect();
        records.sort_by_key(|(_, category)| *category);

        let mut endpoints = Vec::with_capacity(records.len());
        for (offset, (record, category)) in records.into_iter().enumerate() {
            let port = u16::try_from(offset)
                .ok()
                .and_then(|o| server.base_port.checked_add(o))
                .ok_or_else(|| {
                    LabError::Configuration(format!(
                        "No port left for device '{}' above base port {}",
                        record.name(),
                        server.base_port
                    ))
                })?;
            endpoints.push(Endpoint {
                device: record.name().to_string(),
                name: record.name().replace('_', " "),
                description: description(record, category),
                category,
                port,
                encryption: server.encryption.clone(),
            });
        }
        Ok(Self { endpoints })
    }

    /// Endpoints in port order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Endpoint of `device`.
    pub fn endpoint_for(&self, device: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.device == device)
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// True if there is nothing to serve.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
