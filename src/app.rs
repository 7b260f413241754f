//! Application lifecycle
//!
//! Startup, strictly in this order:
//!
//! 1. Open and start the bus (any failure is fatal)
//! 2. Discover units and build the device catalog
//! 3. Enable pump drives and axis systems
//! 4. Plan endpoints and compose the device services
//! 5. Start the bus supervisor
//!
//! Shutdown runs in reverse: background loops are told to stop, the
//! supervisor, command executions and subscriptions are joined, then the bus
//! is stopped and closed. Each task gets at most one cadence to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::catalog::{discover, CatalogBuilder, DeviceCatalog};
use crate::config::Settings;
use crate::error::{AppResult, LabError};
use crate::hardware::{Bus, UnitDirectory};
use crate::health::{StateWriter, Supervisor, SupervisorHandle, SystemState};
use crate::services::{DeviceServices, EndpointPlan, ServiceContext};

/// The running system.
pub struct Application {
    settings: Settings,
    bus: Arc<dyn Bus>,
    state: Arc<SystemState>,
    writer: Option<StateWriter>,
    supervisor: Option<SupervisorHandle>,
    catalog: DeviceCatalog,
    plan: EndpointPlan,
    context: ServiceContext,
    devices: Vec<DeviceServices>,
}

impl Application {
    /// Open the bus, discover devices and compose their services.
    ///
    /// # Errors
    ///
    /// `LabError::Configuration` if the bus cannot be opened or started, or
    /// the endpoints do not fit into the port range.
    pub fn new(settings: Settings, bus: Arc<dyn Bus>, directory: &dyn UnitDirectory) -> AppResult<Self> {
        bus.open(&settings.bus.config_path).map_err(|e| {
            LabError::Configuration(format!(
                "Could not open the bus with device configuration {}: {}",
                settings.bus.config_path.display(),
                e
            ))
        })?;
        bus.start()
            .map_err(|e| LabError::Configuration(format!("Could not start the bus: {e}")))?;
        info!("Bus opened with {}", settings.bus.config_path.display());

        let inventory = discover(directory);
        info!("Discovered {} unit(s)", inventory.len());
        let configuration = settings.device_configuration();
        let catalog = CatalogBuilder::new(&configuration).build(inventory);
        enable_drives(&catalog);

        let (state, writer) = SystemState::new();
        let context = ServiceContext::new(Arc::clone(&state), &settings);
        let plan = EndpointPlan::from_catalog(&catalog, &settings.server)?;
        let mut devices = Vec::with_capacity(plan.len());
        for endpoint in plan.endpoints() {
            let Some(record) = catalog.get(&endpoint.device) else {
                continue;
            };
            match DeviceServices::for_record(record, endpoint.clone(), &context) {
                Ok(services) => devices.push(services),
                Err(e) => error!(device = %endpoint.device, "Cannot compose services: {}", e),
            }
        }

        Ok(Self {
            settings,
            bus,
            state,
            writer: Some(writer),
            supervisor: None,
            catalog,
            plan,
            context,
            devices,
        })
    }

    /// Start the bus supervisor. Calling it again has no effect.
    pub fn start(&mut self) {
        if let Some(writer) = self.writer.take() {
            let supervisor = Supervisor::new(Arc::clone(&self.bus), writer, &self.settings.bus);
            self.supervisor = Some(supervisor.spawn());
        }
        for endpoint in self.plan.endpoints() {
            info!(
                port = endpoint.port,
                "Serving '{}': {}", endpoint.name, endpoint.description
            );
        }
    }

    /// Run until `signal` completes, then shut down.
    pub async fn run_until<F>(mut self, signal: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start();
        signal.await;
        info!("Shutdown requested");
        self.shutdown().await
    }

    /// Stop every background loop and release the bus.
    pub async fn shutdown(mut self) -> AppResult<()> {
        self.state.begin_shutdown();
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.shutdown().await;
        }
        let aborted = self.state.join_tasks(self.shutdown_grace()).await;
        if aborted > 0 {
            warn!("Aborted {} background task(s) that did not stop in time", aborted);
        }

        let mut errors = Vec::new();
        if let Err(e) = self.bus.stop() {
            errors.push(LabError::DeviceCommunication(format!("bus stop: {e}")));
        }
        if let Err(e) = self.bus.close() {
            errors.push(LabError::DeviceCommunication(format!("bus close: {e}")));
        }

        if errors.is_empty() {
            info!("Shutdown complete");
            Ok(())
        } else {
            for e in &errors {
                error!("{}", e);
            }
            Err(LabError::ShutdownFailed(errors))
        }
    }

    fn shutdown_grace(&self) -> Duration {
        [
            self.settings.publisher.fast_interval,
            self.settings.publisher.slow_interval,
            self.settings.tracker.liveness_interval,
            self.settings.tracker.start_retry_delay,
        ]
        .into_iter()
        .max()
        .unwrap_or_default()
    }

    /// Shared system state.
    pub fn state(&self) -> &Arc<SystemState> {
        &self.state
    }

    /// Discovered devices.
    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Endpoint plan.
    pub fn plan(&self) -> &EndpointPlan {
        &self.plan
    }

    /// Services of every device, in endpoint order.
    pub fn devices(&self) -> &[DeviceServices] {
        &self.devices
    }

    /// Services of `device`.
    pub fn device(&self, device: &str) -> Option<&DeviceServices> {
        self.devices.iter().find(|d| d.endpoint.device == device)
    }

    /// Context shared by all services.
    pub fn context(&self) -> &ServiceContext {
        &self.context
    }
}

fn enable_drives(catalog: &DeviceCatalog) {
    for record in catalog.records() {
        if let Some(pump) = record.pump() {
            let result = pump.unit.is_in_fault_state().and_then(|faulted| {
                if faulted {
                    pump.unit.clear_fault()?;
                }
                pump.unit.enable(true)
            });
            if let Err(e) = result {
                warn!(device = record.name(), "Cannot enable pump drive: {}", e);
            }
        }
        if let Some(system) = record.axis_system() {
            if let Err(e) = system.enable(true) {
                warn!(device = record.name(), "Cannot enable axis system: {}", e);
            }
        }
    }
}
