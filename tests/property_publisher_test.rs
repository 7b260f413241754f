//! Sampled property subscriptions: de-duplication, degraded behaviour and
//! subscriber lifetime.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;

use common::{collect_for, service_context};
use rust_labdaq::hardware::mock::SimPump;
use rust_labdaq::hardware::HardwareError;
use rust_labdaq::health::SystemState;
use rust_labdaq::observable::{DegradedPolicy, SampledObservable, Tolerance};
use rust_labdaq::services::{DriveState, PumpDosingService, PumpDriveService};

const WINDOW: Duration = Duration::from_millis(350);

/// Property whose hardware value is set by the test.
fn scripted(
    state: Arc<SystemState>,
    initial: f64,
) -> (SampledObservable<f64>, Arc<Mutex<f64>>, Arc<AtomicBool>) {
    let value = Arc::new(Mutex::new(initial));
    let failing = Arc::new(AtomicBool::new(false));
    let (v, f) = (Arc::clone(&value), Arc::clone(&failing));
    let property = SampledObservable::new("Scripted", state, move || {
        if f.load(Ordering::SeqCst) {
            return Err(HardwareError::Communication("no response".into()));
        }
        Ok(*v.lock())
    })
    .with_cadence(Duration::from_millis(100));
    (property, value, failing)
}

#[tokio::test(start_paused = true)]
async fn test_changes_within_tolerance_are_suppressed() {
    let (state, _writer) = SystemState::new();
    let (property, value, _) = scripted(state, 1.0005);
    let property = property.with_tolerance(Tolerance::Relative(1e-3));
    let mut stream = property.subscribe();
    assert_eq!(stream.name(), "Scripted");

    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![1.0005]);
    *value.lock() = 1.0012;
    assert!(collect_for(&mut stream, WINDOW).await.is_empty());
    *value.lock() = 1.01;
    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![1.01]);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_values_are_all_delivered() {
    let (state, _writer) = SystemState::new();
    let (property, value, _) = scripted(state, 1.0);
    let property = property.with_tolerance(Tolerance::Relative(1e-3));
    let mut stream = property.subscribe();

    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![1.0]);
    *value.lock() = 1.01;
    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![1.01]);
}

#[tokio::test(start_paused = true)]
async fn test_static_property_emits_once() {
    let (state, _writer) = SystemState::new();
    let (property, _, _) = scripted(state, 25.0);
    let mut stream = property.subscribe();

    assert_eq!(
        collect_for(&mut stream, Duration::from_secs(5)).await,
        vec![25.0]
    );
}

#[tokio::test(start_paused = true)]
async fn test_every_subscriber_gets_the_current_value() {
    let (state, _writer) = SystemState::new();
    let (property, _, _) = scripted(state, 4.2);
    let mut first = property.subscribe();
    let mut second = property.subscribe();

    assert_eq!(collect_for(&mut first, WINDOW).await, vec![4.2]);
    assert_eq!(collect_for(&mut second, WINDOW).await, vec![4.2]);
}

#[tokio::test(start_paused = true)]
async fn test_substitute_value_while_degraded() {
    let (state, writer) = SystemState::new();
    let (property, _, _) = scripted(state, 2.5);
    let property = property.with_degraded_policy(DegradedPolicy::Substitute(0.0));
    let mut stream = property.subscribe();

    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![2.5]);
    writer.set_operational(false);
    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![0.0]);
    writer.set_operational(true);
    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![2.5]);
}

#[tokio::test(start_paused = true)]
async fn test_hold_last_while_degraded_does_not_touch_hardware() {
    let (state, writer) = SystemState::new();
    let (property, value, _) = scripted(state, 7.0);
    let mut stream = property.subscribe();

    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![7.0]);
    writer.set_operational(false);
    *value.lock() = 8.0;
    assert!(collect_for(&mut stream, WINDOW).await.is_empty());
    writer.set_operational(true);
    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![8.0]);
}

#[tokio::test(start_paused = true)]
async fn test_late_subscriber_while_degraded_gets_the_last_reading() {
    let (state, writer) = SystemState::new();
    let (property, _, _) = scripted(Arc::clone(&state), 7.0);
    let mut first = property.subscribe();
    assert_eq!(collect_for(&mut first, WINDOW).await, vec![7.0]);

    writer.set_operational(false);
    let mut second = property.subscribe();
    assert_eq!(collect_for(&mut second, WINDOW).await, vec![7.0]);

    // a unary read seeds the value as well
    writer.set_operational(true);
    let (other, _, _) = scripted(state, 3.5);
    assert_eq!(other.read().unwrap(), 3.5);
    writer.set_operational(false);
    let mut third = other.subscribe();
    assert_eq!(collect_for(&mut third, WINDOW).await, vec![3.5]);
}

#[tokio::test(start_paused = true)]
async fn test_read_error_reuses_last_value() {
    let (state, _writer) = SystemState::new();
    let (property, value, failing) = scripted(state, 1.5);
    let mut stream = property.subscribe();

    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![1.5]);
    failing.store(true, Ordering::SeqCst);
    *value.lock() = 3.0;
    assert!(collect_for(&mut stream, WINDOW).await.is_empty());
    failing.store(false, Ordering::SeqCst);
    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![3.0]);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_is_emitted_before_the_first_good_read() {
    let (state, _writer) = SystemState::new();
    let (property, _, failing) = scripted(state, 1.0);
    failing.store(true, Ordering::SeqCst);
    let mut stream = property.subscribe();

    assert!(collect_for(&mut stream, WINDOW).await.is_empty());
    failing.store(false, Ordering::SeqCst);
    assert_eq!(collect_for(&mut stream, WINDOW).await, vec![1.0]);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_stream_stops_sampling() {
    let (state, _writer) = SystemState::new();
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reads);
    let property = SampledObservable::new("Counted", state, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    })
    .with_cadence(Duration::from_millis(100));

    let mut stream = property.subscribe();
    assert_eq!(stream.next().await, Some(true));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(reads.load(Ordering::SeqCst) >= 5);

    drop(stream);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let after_drop = reads.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(reads.load(Ordering::SeqCst), after_drop);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_every_stream() {
    let (state, _writer) = SystemState::new();
    let (property, _, _) = scripted(Arc::clone(&state), 1.0);
    let mut stream = property.subscribe();
    assert_eq!(stream.next().await, Some(1.0));

    state.begin_shutdown();
    let end = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;
    assert_eq!(end, Ok(None));
}

#[tokio::test(start_paused = true)]
async fn test_pump_flow_rate_reads_zero_while_degraded() {
    let (ctx, writer) = service_context();
    let pump = Arc::new(SimPump::new("pump"));
    let dosing = PumpDosingService::new("pump", pump, &ctx);
    let confirmation = dosing.generate_flow(2.0).unwrap();

    let mut flow = dosing.flow_rate().subscribe();
    assert_eq!(collect_for(&mut flow, WINDOW).await, vec![2.0]);
    writer.set_operational(false);
    assert_eq!(collect_for(&mut flow, WINDOW).await, vec![0.0]);

    writer.set_operational(true);
    assert_eq!(collect_for(&mut flow, WINDOW).await, vec![2.0]);
    dosing.stop_dosage().unwrap();
    ctx.tracker.wait(confirmation.id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_drive_state_reports_disabled_while_degraded() {
    let (ctx, writer) = service_context();
    let pump = Arc::new(SimPump::new("pump"));
    let drive = PumpDriveService::new("pump", pump, &ctx);

    // slow cadence: 500 ms
    let window = Duration::from_millis(1200);
    let mut states = drive.drive_state().subscribe();
    assert_eq!(collect_for(&mut states, window).await, vec![DriveState::Enabled]);
    writer.set_operational(false);
    assert_eq!(collect_for(&mut states, window).await, vec![DriveState::Disabled]);
    writer.set_operational(true);
    assert_eq!(collect_for(&mut states, window).await, vec![DriveState::Enabled]);
}
