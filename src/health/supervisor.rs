//! Background task polling the bus for fault and recovery events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{next_state, BusState, StateWriter, SystemState};
use crate::config::BusConfig;
use crate::hardware::{Bus, BusEvent};

/// Owns the [`StateWriter`] and drives [`next_state`] from bus events.
pub struct Supervisor {
    bus: Arc<dyn Bus>,
    writer: StateWriter,
    poll_interval: Duration,
    under_voltage_code: u32,
    current: BusState,
}

impl Supervisor {
    /// Create a supervisor; the initial state is taken from the writer.
    pub fn new(bus: Arc<dyn Bus>, writer: StateWriter, config: &BusConfig) -> Self {
        let current = if writer.state().is_operational() {
            BusState::Operational
        } else {
            BusState::Degraded
        };
        Self {
            bus,
            writer,
            poll_interval: config.poll_interval,
            under_voltage_code: config.under_voltage_code,
            current,
        }
    }

    /// Current supervisor state.
    pub fn current(&self) -> BusState {
        self.current
    }

    /// Read at most one event from the bus and apply it.
    ///
    /// Empty or failed reads are no-ops.
    pub fn poll_once(&mut self) {
        match self.bus.read_event() {
            Ok(Some(event)) => self.apply(&event),
            Ok(None) => {}
            Err(e) => debug!("Bus event read failed: {}", e),
        }
    }

    fn apply(&mut self, event: &BusEvent) {
        debug!(
            device = event.device,
            "Bus event {:?}: {}", event.id, event.message
        );
        let next = next_state(self.current, event, self.under_voltage_code);
        if next == self.current {
            return;
        }
        match next {
            BusState::Degraded => warn!(
                device = event.device,
                "System degraded: {}", event.message
            ),
            BusState::Operational => info!(
                device = event.device,
                "System operational again: {}", event.message
            ),
        }
        self.current = next;
        self.writer.set_operational(next == BusState::Operational);
    }

    /// Spawn the poll loop.
    ///
    /// The loop ends when [`SupervisorHandle::shutdown`] is called or the
    /// shared state reports that shutdown has begun.
    pub fn spawn(mut self) -> SupervisorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let state: Arc<SystemState> = Arc::clone(self.writer.state());

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Bus supervisor started (poll interval {:?})",
                self.poll_interval
            );

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }
                if state.is_shutting_down() {
                    break;
                }
                self.poll_once();
            }

            info!("Bus supervisor stopped");
        });

        SupervisorHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle to a running supervisor task.
pub struct SupervisorHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Bus supervisor task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimBus;
    use crate::hardware::{guard, DC_LINK_UNDER_VOLTAGE};
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_transitions_are_logged() {
        let bus = Arc::new(SimBus::new());
        let (_state, writer) = SystemState::new();
        let mut supervisor = Supervisor::new(bus.clone(), writer, &BusConfig::default());

        bus.push_event(BusEvent::emergency(7, DC_LINK_UNDER_VOLTAGE));
        supervisor.poll_once();
        assert!(logs_contain("System degraded"));

        bus.push_event(BusEvent::guard(7, guard::HEARTBEAT_RESTORED));
        supervisor.poll_once();
        assert!(logs_contain("System operational again"));
    }

    #[test]
    fn test_initial_state_follows_writer() {
        let (_state, writer) = SystemState::new();
        writer.set_operational(false);
        let supervisor = Supervisor::new(Arc::new(SimBus::new()), writer, &BusConfig::default());
        assert_eq!(supervisor.current(), BusState::Degraded);
    }
}
