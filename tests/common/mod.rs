//! Common test utilities for rust_labdaq integration tests
//!
//! This module provides reusable test helpers for:
//! - Duration and value assertions with explicit slack
//! - A service context wired to a fresh system state
//! - Collecting property updates over simulated time

#![allow(dead_code)] // Not every test binary uses every helper

use std::time::Duration;

use futures::StreamExt;
use rust_labdaq::config::Settings;
use rust_labdaq::health::{StateWriter, SystemState};
use rust_labdaq::observable::{PropertyStream, Sample};
use rust_labdaq::services::ServiceContext;

/// Assert that `actual` lies within `expected ± slack`.
///
/// # Panics
/// Panics with `context` if the duration is outside the range.
pub fn assert_duration_within(actual: Duration, expected: Duration, slack: Duration, context: &str) {
    let min = expected.saturating_sub(slack);
    let max = expected + slack;
    assert!(
        actual >= min && actual <= max,
        "{}: expected {:?} ±{:?}, got {:?}",
        context,
        expected,
        slack,
        actual
    );
}

/// Assert that `actual` lies within `expected ± slack`.
pub fn assert_value_within(actual: f64, expected: f64, slack: f64, context: &str) {
    assert!(
        (actual - expected).abs() <= slack,
        "{}: expected {} ±{}, got {}",
        context,
        expected,
        slack,
        actual
    );
}

/// Service context with default settings and an operational system.
pub fn service_context() -> (ServiceContext, StateWriter) {
    let (state, writer) = SystemState::new();
    (ServiceContext::new(state, &Settings::default()), writer)
}

/// Drain everything a subscription delivers within `window`.
///
/// Meant for `start_paused = true` tests, where the window elapses in
/// simulated time.
pub async fn collect_for<T: Sample>(stream: &mut PropertyStream<T>, window: Duration) -> Vec<T> {
    let mut values = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(value)) = tokio::time::timeout_at(deadline, stream.next()).await {
        values.push(value);
    }
    values
}
