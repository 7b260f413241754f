//! Long-running command execution tracking
//!
//! Physical operations such as dosing a volume or moving an axis take seconds
//! to minutes. Each one becomes a command execution: the hardware command is
//! issued synchronously, then a background task watches the device through an
//! [`OperationProbe`] and publishes [`ExecutionInfo`] updates until the
//! operation finishes.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──rate > 0──> Running ──(not active, no fault, enabled)──> Succeeded
//!    │                     │
//!    └──rate stays 0──┐    └──fault / link error / estimate elapsed──┐
//!                     v                                               v
//!                   Failed <──────────────────────────────────────────┘
//! ```
//!
//! Progress is `done / target`, clamped to `[0, 1]` and never decreasing. The
//! remaining time counts down from `target / rate` plus a completion margin.
//!
//! Stop requests are sent to the hardware directly; the running execution
//! notices on its next liveness check.
//!
//! Finished executions stay queryable for `execution_retention` and are
//! evicted lazily afterwards.

mod probe;

pub use probe::{AxisMoveProbe, DosingProbe, OperationProbe};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::error::{AppResult, LabError};
use crate::health::SystemState;

/// Status of a command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Accepted, not yet moving
    Pending,
    /// Operation in progress
    Running,
    /// Finished without error
    Succeeded,
    /// Finished with an error
    Failed,
}

impl CommandStatus {
    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Succeeded | CommandStatus::Failed)
    }
}

/// Snapshot of a command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Current status
    pub status: CommandStatus,
    /// Fraction done, in `[0, 1]`
    pub progress: f64,
    /// Estimated time until completion
    #[serde(with = "humantime_serde")]
    pub estimated_remaining: Duration,
    /// When the execution was accepted
    pub started_at: DateTime<Utc>,
}

impl ExecutionInfo {
    fn pending() -> Self {
        Self {
            status: CommandStatus::Pending,
            progress: 0.0,
            estimated_remaining: Duration::ZERO,
            started_at: Utc::now(),
        }
    }
}

/// Returned when a long-running command is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfirmation {
    /// Execution id used for status and result queries
    pub id: Uuid,
    /// Device the command runs on
    pub device: String,
    /// Command name
    pub command: String,
}

struct Execution {
    device: String,
    info: watch::Receiver<ExecutionInfo>,
    outcome: Option<Result<(), Arc<LabError>>>,
    finished_at: Option<Instant>,
}

#[derive(Default)]
struct Registry {
    executions: HashMap<Uuid, Execution>,
    busy: HashMap<String, Uuid>,
}

impl Registry {
    fn evict_expired(&mut self, retention: Duration) {
        let now = Instant::now();
        self.executions.retain(|_, e| {
            e.finished_at
                .map_or(true, |at| now.saturating_duration_since(at) < retention)
        });
    }
}

// =============================================================================
// CommandTracker
// =============================================================================

/// Starts and tracks long-running command executions.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct CommandTracker {
    config: TrackerConfig,
    state: Arc<SystemState>,
    registry: Arc<Mutex<Registry>>,
}

impl CommandTracker {
    /// Tracker using the given cadences.
    pub fn new(config: TrackerConfig, state: Arc<SystemState>) -> Self {
        Self {
            config,
            state,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        let mut registry = self.registry.lock();
        registry.evict_expired(self.config.execution_retention);
        registry
    }

    /// Start a command execution on `device`.
    ///
    /// `begin` issues the hardware command. It runs only if the system is
    /// operational and the device has no other active execution; its error is
    /// returned synchronously. Afterwards `probe` is watched in the background.
    pub fn start<F>(
        &self,
        device: &str,
        command: &str,
        probe: Arc<dyn OperationProbe>,
        begin: F,
    ) -> AppResult<CommandConfirmation>
    where
        F: FnOnce() -> AppResult<()>,
    {
        self.state
            .ensure_operational(&format!("execute {command}"))?;

        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(ExecutionInfo::pending());
        {
            let mut registry = self.registry();
            if registry.busy.contains_key(device) {
                return Err(LabError::OperationInProgress(device.to_string()));
            }
            begin()?;
            registry.busy.insert(device.to_string(), id);
            registry.executions.insert(
                id,
                Execution {
                    device: device.to_string(),
                    info: rx,
                    outcome: None,
                    finished_at: None,
                },
            );
        }
        info!(%id, device, "{} started", command);

        let config = self.config.clone();
        let state = Arc::clone(&self.state);
        let registry = Arc::clone(&self.registry);
        let command_name = command.to_string();
        let device_name = device.to_string();
        self.state.spawn(async move {
            let outcome = track(probe.as_ref(), &config, &state, &tx, &device_name).await;
            let final_info = {
                let current = tx.borrow();
                ExecutionInfo {
                    status: if outcome.is_ok() {
                        CommandStatus::Succeeded
                    } else {
                        CommandStatus::Failed
                    },
                    progress: 1.0,
                    estimated_remaining: Duration::ZERO,
                    started_at: current.started_at,
                }
            };
            match &outcome {
                Ok(()) => info!(%id, device = %device_name, "{} finished", command_name),
                Err(e) => error!(%id, device = %device_name, "{} failed: {}", command_name, e),
            }

            let mut registry = registry.lock();
            if let Some(execution) = registry.executions.get_mut(&id) {
                execution.outcome = Some(outcome.map_err(Arc::new));
                execution.finished_at = Some(Instant::now());
            }
            if registry.busy.get(&device_name) == Some(&id) {
                registry.busy.remove(&device_name);
            }
            tx.send_replace(final_info);
        });

        Ok(CommandConfirmation {
            id,
            device: device.to_string(),
            command: command.to_string(),
        })
    }

    /// Status updates of an execution.
    pub fn info(&self, id: Uuid) -> AppResult<watch::Receiver<ExecutionInfo>> {
        self.registry()
            .executions
            .get(&id)
            .map(|e| e.info.clone())
            .ok_or(LabError::CommandNotFound(id))
    }

    /// Terminal result of an execution.
    pub fn result(&self, id: Uuid) -> AppResult<()> {
        let registry = self.registry();
        let execution = registry
            .executions
            .get(&id)
            .ok_or(LabError::CommandNotFound(id))?;
        match &execution.outcome {
            None => Err(LabError::CommandNotFinished(id)),
            Some(Ok(())) => Ok(()),
            Some(Err(source)) => Err(LabError::CommandFailed {
                id,
                source: Arc::clone(source),
            }),
        }
    }

    /// Wait until the execution is terminal and return its result.
    pub async fn wait(&self, id: Uuid) -> AppResult<()> {
        let mut rx = self.info(id)?;
        // sender dropped means the task ended, which always publishes first
        let _ = rx.wait_for(|info| info.status.is_terminal()).await;
        self.result(id)
    }

    /// Discard a finished execution before its retention ends.
    pub fn forget(&self, id: Uuid) -> AppResult<()> {
        let mut registry = self.registry();
        match registry.executions.get(&id) {
            None => Err(LabError::CommandNotFound(id)),
            Some(e) if e.outcome.is_none() => Err(LabError::CommandNotFinished(id)),
            Some(_) => {
                registry.executions.remove(&id);
                Ok(())
            }
        }
    }

    /// Id of the active execution on `device`, if any.
    pub fn active_on(&self, device: &str) -> Option<Uuid> {
        self.registry.lock().busy.get(device).copied()
    }

    /// Device an execution runs on.
    pub fn device_of(&self, id: Uuid) -> Option<String> {
        self.registry()
            .executions
            .get(&id)
            .map(|e| e.device.clone())
    }
}

// =============================================================================
// Tracking loop
// =============================================================================

fn finish_check(probe: &dyn OperationProbe, device: &str) -> AppResult<()> {
    let faulted = probe.is_faulted()?;
    let enabled = probe.is_enabled()?;
    if !faulted && enabled {
        return Ok(());
    }
    let message = probe
        .last_error()?
        .unwrap_or_else(|| "device stopped unexpectedly".to_string());
    Err(LabError::DeviceFault {
        device: device.to_string(),
        message,
    })
}

fn settled(probe: &dyn OperationProbe) -> AppResult<bool> {
    Ok(!probe.is_active()? || probe.is_faulted()? || !probe.is_enabled()?)
}

async fn track(
    probe: &dyn OperationProbe,
    config: &TrackerConfig,
    state: &SystemState,
    tx: &watch::Sender<ExecutionInfo>,
    device: &str,
) -> AppResult<()> {
    // a zero rate right after the command may only mean the drive is ramping up
    let mut rate = probe.rate()?;
    if rate <= 0.0 {
        debug!(device, "Rate is zero, retrying in {:?}", config.start_retry_delay);
        tokio::select! {
            _ = state.shutdown_requested() => {
                return Err(LabError::not_operational("finish the operation during shutdown"));
            }
            _ = tokio::time::sleep(config.start_retry_delay) => {}
        }
        rate = probe.rate()?;
    }
    if rate <= 0.0 {
        if settled(probe)? {
            return finish_check(probe, device);
        }
        let last_error = probe.last_error()?.unwrap_or_default();
        return Err(LabError::OperationTimeout(format!(
            "'{device}' did not start moving. Last error: {last_error}"
        )));
    }

    let target = probe.target()?;
    let estimate = Duration::from_secs_f64(target / rate) + config.completion_margin;
    let started = Instant::now();
    let deadline = started + estimate;
    debug!(device, target, rate, "Estimated duration {:?}", estimate);

    tx.send_modify(|info| {
        info.status = CommandStatus::Running;
        info.progress = 0.0;
        info.estimated_remaining = estimate;
    });

    let mut progress = 0.0_f64;
    let mut last_update = started;
    let mut ticker = tokio::time::interval_at(
        started + config.liveness_interval,
        config.liveness_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = state.shutdown_requested() => {
                return Err(LabError::not_operational("finish the operation during shutdown"));
            }
            _ = ticker.tick() => {}
        }
        if settled(probe)? {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(LabError::OperationTimeout(format!(
                "'{device}' still busy after the estimated {estimate:?}"
            )));
        }
        if now.duration_since(last_update) >= config.progress_interval {
            if target > 0.0 {
                progress = progress.max((probe.done()? / target).clamp(0.0, 1.0));
            }
            let remaining = deadline.saturating_duration_since(now);
            tx.send_modify(|info| {
                info.status = CommandStatus::Running;
                info.progress = progress;
                info.estimated_remaining = remaining;
            });
            last_update = now;
        }
    }

    finish_check(probe, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimPump;
    use crate::hardware::PumpUnit;

    fn tracker() -> (CommandTracker, crate::health::StateWriter) {
        let (state, writer) = SystemState::new();
        (CommandTracker::new(TrackerConfig::default(), state), writer)
    }

    #[test]
    fn test_execution_info_json() {
        let info = ExecutionInfo {
            status: CommandStatus::Running,
            progress: 0.5,
            estimated_remaining: Duration::from_secs(62),
            started_at: Utc::now(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["estimated_remaining"], "1m 2s");

        let back: ExecutionInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back.estimated_remaining, Duration::from_secs(62));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CommandStatus::Succeeded.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(!CommandStatus::Running.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_when_degraded() {
        let (tracker, writer) = tracker();
        writer.set_operational(false);
        let pump: Arc<SimPump> = Arc::new(SimPump::new("pump"));
        let probe = Arc::new(DosingProbe::new(pump.clone()));
        let err = tracker
            .start("pump", "DoseVolume", probe, || Ok(pump.pump_volume(1.0, 1.0)?))
            .unwrap_err();
        assert!(matches!(err, LabError::SystemNotOperational { .. }));
        assert!(!pump.is_pumping().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_operation_rejected() {
        let (tracker, _writer) = tracker();
        let pump: Arc<SimPump> = Arc::new(SimPump::new("pump"));
        let probe = Arc::new(DosingProbe::new(pump.clone()));
        let first = tracker
            .start("pump", "DoseVolume", probe.clone(), || {
                Ok(pump.pump_volume(5.0, 1.0)?)
            })
            .unwrap();
        let err = tracker
            .start("pump", "DoseVolume", probe, || Ok(pump.pump_volume(1.0, 1.0)?))
            .unwrap_err();
        assert!(matches!(err, LabError::OperationInProgress(_)));
        assert!(matches!(
            tracker.result(first.id),
            Err(LabError::CommandNotFinished(_))
        ));

        tracker.wait(first.id).await.unwrap();
        assert_eq!(tracker.active_on("pump"), None);
        tracker.forget(first.id).unwrap();
        assert!(matches!(
            tracker.info(first.id),
            Err(LabError::CommandNotFound(_))
        ));
    }
}
