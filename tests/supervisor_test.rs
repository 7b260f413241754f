//! Bus supervisor reacting to emergency and guard events.

use std::sync::Arc;
use std::time::Duration;

use rust_labdaq::config::BusConfig;
use rust_labdaq::hardware::mock::SimBus;
use rust_labdaq::hardware::{guard, BusEvent, DC_LINK_UNDER_VOLTAGE};
use rust_labdaq::health::{BusState, Supervisor, SystemState};

fn config() -> BusConfig {
    BusConfig {
        poll_interval: Duration::from_millis(100),
        ..BusConfig::default()
    }
}

#[test]
fn test_poll_once_applies_one_event_at_a_time() {
    let bus = Arc::new(SimBus::new());
    let (state, writer) = SystemState::new();
    let mut supervisor = Supervisor::new(bus.clone(), writer, &config());

    bus.push_event(BusEvent::guard(3, guard::HEARTBEAT_LOST));
    bus.push_event(BusEvent::guard(3, guard::HEARTBEAT_RESTORED));

    supervisor.poll_once();
    assert_eq!(supervisor.current(), BusState::Degraded);
    assert!(!state.is_operational());
    assert_eq!(bus.pending_events(), 1);

    supervisor.poll_once();
    assert_eq!(supervisor.current(), BusState::Operational);
    assert!(state.is_operational());

    // empty queue is a no-op
    supervisor.poll_once();
    assert_eq!(supervisor.current(), BusState::Operational);
}

#[tokio::test(start_paused = true)]
async fn test_under_voltage_degrades_until_heartbeat_restored() {
    let bus = Arc::new(SimBus::new());
    let (state, writer) = SystemState::new();
    let handle = Supervisor::new(bus.clone(), writer, &config()).spawn();

    bus.push_event(BusEvent::emergency(2, DC_LINK_UNDER_VOLTAGE));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!state.is_operational());
    let err = state.ensure_operational("execute DoseVolume").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot execute DoseVolume because the system is not in an operational state"
    );

    // a second under-voltage while degraded changes nothing
    bus.push_event(BusEvent::emergency(2, DC_LINK_UNDER_VOLTAGE));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!state.is_operational());

    bus.push_event(BusEvent::guard(2, guard::HEARTBEAT_RESTORED));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(state.is_operational());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_events_are_ignored() {
    let bus = Arc::new(SimBus::new());
    let (state, writer) = SystemState::new();
    let handle = Supervisor::new(bus.clone(), writer, &config()).spawn();

    bus.push_event(BusEvent::emergency(4, 0x8110));
    bus.push_event(BusEvent::guard(4, 7));
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(bus.pending_events(), 0);
    assert!(state.is_operational());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_loop_stops_when_shutdown_begins() {
    let bus = Arc::new(SimBus::new());
    let (state, writer) = SystemState::new();
    let handle = Supervisor::new(bus.clone(), writer, &config()).spawn();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!handle.is_finished());

    state.begin_shutdown();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(handle.is_finished());

    // events after shutdown are left on the bus
    bus.push_event(BusEvent::guard(1, guard::HEARTBEAT_LOST));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(bus.pending_events(), 1);
    assert!(state.is_operational());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_handle_shutdown_joins_the_loop() {
    let bus = Arc::new(SimBus::new());
    let (_state, writer) = SystemState::new();
    let handle = Supervisor::new(bus, writer, &config()).spawn();

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("supervisor did not stop");
}
