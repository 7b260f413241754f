//! Bus health supervision
//!
//! The process-wide [`SystemState`] tells every command and property
//! publisher whether the bus is safe to use. It is created once, shared by
//! `Arc`, and its `operational` flag can only be flipped through the single
//! [`StateWriter`] owned by the [`Supervisor`].
//!
//! # State Machine
//!
//! ```text
//!              under-voltage emergency / heartbeat lost
//! Operational ──────────────────────────────────────────> Degraded
//!      ^                                                     │
//!      └──────────────── heartbeat restored ─────────────────┘
//! ```
//!
//! The transition function [`next_state`] is pure; the supervisor loop only
//! feeds it events read from the bus.
//!
//! `SystemState` also owns the background tasks of command executions and
//! property subscriptions, so shutdown can wait for them before the bus is
//! released.

mod supervisor;

pub use supervisor::{Supervisor, SupervisorHandle};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::{AppResult, LabError};
use crate::hardware::{guard, BusEvent, BusEventId};

/// Bus state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Devices may be commanded
    Operational,
    /// A controller lost power or stopped answering
    Degraded,
}

/// Compute the state following `event`.
///
/// Only an emergency carrying `under_voltage_code` or a lost heartbeat degrade
/// the system, and only a restored heartbeat recovers it. Everything else
/// leaves the state unchanged.
pub fn next_state(state: BusState, event: &BusEvent, under_voltage_code: u32) -> BusState {
    match (event.id, event.code()) {
        (BusEventId::DeviceEmergency, Some(code)) if code == under_voltage_code => {
            BusState::Degraded
        }
        (BusEventId::DeviceGuard, Some(guard::HEARTBEAT_LOST)) => BusState::Degraded,
        (BusEventId::DeviceGuard, Some(guard::HEARTBEAT_RESTORED)) => BusState::Operational,
        _ => state,
    }
}

// =============================================================================
// SystemState
// =============================================================================

/// Process-wide operational status.
#[derive(Debug)]
pub struct SystemState {
    operational: AtomicBool,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<JoinSet<()>>,
}

impl SystemState {
    /// Create the shared state (operational) and its only writer.
    pub fn new() -> (Arc<Self>, StateWriter) {
        let (shutdown, _) = watch::channel(false);
        let state = Arc::new(Self {
            operational: AtomicBool::new(true),
            shutdown,
            tasks: Mutex::new(JoinSet::new()),
        });
        let writer = StateWriter {
            state: Arc::clone(&state),
        };
        (state, writer)
    }

    /// Whether devices may be commanded.
    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    /// Whether process shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Signal every background loop to finish.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Completes once shutdown has begun.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.subscribe();
        // the sender lives as long as `self`
        let _ = rx.wait_for(|down| *down).await;
    }

    /// Run `task` in the background until [`SystemState::join_tasks`].
    ///
    /// Tasks that already finished are reaped first.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Number of background tasks still running.
    pub fn task_count(&self) -> usize {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Wait up to `grace` for every background task; abort the rest.
    ///
    /// Returns how many tasks had to be aborted.
    pub async fn join_tasks(&self, grace: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let joined = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if joined.is_ok() {
            return 0;
        }
        let aborted = tasks.len();
        tasks.shutdown().await;
        aborted
    }

    /// `Ok` when operational, otherwise `SystemNotOperational` for `action`.
    pub fn ensure_operational(&self, action: &str) -> AppResult<()> {
        if self.is_operational() {
            Ok(())
        } else {
            Err(LabError::not_operational(action))
        }
    }
}

/// Exclusive write access to [`SystemState::is_operational`].
#[derive(Debug)]
pub struct StateWriter {
    state: Arc<SystemState>,
}

impl StateWriter {
    /// Set the operational flag.
    pub fn set_operational(&self, operational: bool) {
        self.state.operational.store(operational, Ordering::Release);
    }

    /// The state this writer controls.
    pub fn state(&self) -> &Arc<SystemState> {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::DC_LINK_UNDER_VOLTAGE;

    #[test]
    fn test_under_voltage_degrades() {
        let event = BusEvent::emergency(3, DC_LINK_UNDER_VOLTAGE);
        assert_eq!(
            next_state(BusState::Operational, &event, DC_LINK_UNDER_VOLTAGE),
            BusState::Degraded
        );
    }

    #[test]
    fn test_other_emergency_is_ignored() {
        let event = BusEvent::emergency(3, 0x8130);
        assert_eq!(
            next_state(BusState::Operational, &event, DC_LINK_UNDER_VOLTAGE),
            BusState::Operational
        );
    }

    #[test]
    fn test_heartbeat_lost_then_restored() {
        let lost = BusEvent::guard(2, guard::HEARTBEAT_LOST);
        let restored = BusEvent::guard(2, guard::HEARTBEAT_RESTORED);
        let s = next_state(BusState::Operational, &lost, DC_LINK_UNDER_VOLTAGE);
        assert_eq!(s, BusState::Degraded);
        assert_eq!(
            next_state(s, &restored, DC_LINK_UNDER_VOLTAGE),
            BusState::Operational
        );
    }

    #[test]
    fn test_emergency_does_not_recover() {
        let event = BusEvent::emergency(1, 0x0000);
        assert_eq!(
            next_state(BusState::Degraded, &event, DC_LINK_UNDER_VOLTAGE),
            BusState::Degraded
        );
    }

    #[test]
    fn test_event_without_payload_is_ignored() {
        let event = BusEvent {
            id: BusEventId::DeviceGuard,
            device: 1,
            data: Vec::new(),
            message: String::new(),
        };
        assert_eq!(
            next_state(BusState::Degraded, &event, DC_LINK_UNDER_VOLTAGE),
            BusState::Degraded
        );
    }

    #[test]
    fn test_state_writer_and_shutdown() {
        let (state, writer) = SystemState::new();
        assert!(state.is_operational());
        writer.set_operational(false);
        assert!(!state.is_operational());
        assert!(matches!(
            state.ensure_operational("execute Stop"),
            Err(LabError::SystemNotOperational { .. })
        ));
        state.begin_shutdown();
        assert!(state.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_tasks_waits_for_loops_to_notice_shutdown() {
        let (state, _writer) = SystemState::new();
        for _ in 0..3 {
            let s = Arc::clone(&state);
            state.spawn(async move { s.shutdown_requested().await });
        }
        state.spawn(async {});
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(state.task_count(), 3);

        state.begin_shutdown();
        assert_eq!(state.join_tasks(Duration::from_millis(100)).await, 0);
        assert_eq!(state.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_tasks_aborts_stragglers() {
        let (state, _writer) = SystemState::new();
        state.spawn(std::future::pending());
        state.begin_shutdown();
        assert_eq!(state.join_tasks(Duration::from_millis(100)).await, 1);
    }
}
