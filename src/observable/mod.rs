//! Sampled Observable Properties
//!
//! Turns polled hardware reads into de-duplicated push subscriptions.
//!
//! # Features
//!
//! - One background task per subscriber, sampling at the property's cadence
//! - The first sample is always delivered; later ones only when they differ
//!   from the last delivered value by more than the [`Tolerance`]
//! - While the system is degraded the property follows its [`DegradedPolicy`]
//!   instead of touching the bus; `HoldLast` reports the last raw reading of
//!   the property, whichever subscriber or unary read took it
//! - Unary reads fail with `SystemNotOperational` while degraded
//!
//! # Example
//!
//! ```rust,ignore
//! let fill_level = SampledObservable::new("FillLevel", state, move || pump.fill_level())
//!     .with_units("ml")
//!     .with_tolerance(Tolerance::Relative(1e-3))
//!     .with_cadence(Duration::from_millis(100));
//!
//! let mut updates = fill_level.subscribe();
//! while let Some(level) = updates.next().await {
//!     println!("fill level: {level}");
//! }
//! ```

mod sample;
mod stream;

pub use sample::{Sample, Tolerance};
pub use stream::PropertyStream;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::AppResult;
use crate::hardware::HwResult;
use crate::health::SystemState;

/// What a property reports while the system is degraded.
#[derive(Debug, Clone, PartialEq)]
pub enum DegradedPolicy<T> {
    /// Keep reporting the last value read from the hardware
    HoldLast,
    /// Report a fixed value (e.g. zero flow)
    Substitute(T),
}

/// Hardware read backing a property.
pub type ReadFn<T> = Arc<dyn Fn() -> HwResult<T> + Send + Sync>;

/// Metadata for a sampled property
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyMetadata {
    /// Property name (unique within its service)
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Physical units (e.g. "ml", "ml/s", "kN")
    pub units: Option<String>,
}

// =============================================================================
// Subscription
// =============================================================================

/// Per-subscriber emission state.
#[derive(Debug, Clone)]
pub struct Subscription<T> {
    last_emitted: Option<T>,
    force_next: bool,
}

impl<T: Sample> Subscription<T> {
    /// Fresh subscription; its first sample is always emitted.
    pub fn new() -> Self {
        Self {
            last_emitted: None,
            force_next: true,
        }
    }

    /// Whether `sample` must be delivered.
    pub fn should_emit(&self, sample: &T, tolerance: Tolerance) -> bool {
        if self.force_next {
            return true;
        }
        match &self.last_emitted {
            Some(last) => !sample.is_close(last, tolerance),
            None => true,
        }
    }

    /// Record a delivered sample.
    pub fn emitted(&mut self, sample: T) {
        self.last_emitted = Some(sample);
        self.force_next = false;
    }

    /// Last delivered sample.
    pub fn last_emitted(&self) -> Option<&T> {
        self.last_emitted.as_ref()
    }
}

impl<T: Sample> Default for Subscription<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SampledObservable<T>
// =============================================================================

/// A hardware attribute exposed as unary read and streamed subscription.
pub struct SampledObservable<T: Sample> {
    metadata: PropertyMetadata,
    read: ReadFn<T>,
    state: Arc<SystemState>,
    tolerance: Tolerance,
    cadence: Duration,
    degraded: DegradedPolicy<T>,
    capacity: usize,
    last_raw: Arc<Mutex<Option<T>>>,
}

impl<T: Sample> Clone for SampledObservable<T> {
    fn clone(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            read: Arc::clone(&self.read),
            state: Arc::clone(&self.state),
            tolerance: self.tolerance,
            cadence: self.cadence,
            degraded: self.degraded.clone(),
            capacity: self.capacity,
            last_raw: Arc::clone(&self.last_raw),
        }
    }
}

impl<T: Sample> Debug for SampledObservable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampledObservable")
            .field("metadata", &self.metadata)
            .field("tolerance", &self.tolerance)
            .field("cadence", &self.cadence)
            .field("degraded", &self.degraded)
            .finish()
    }
}

impl<T: Sample> SampledObservable<T> {
    /// Property backed by `read`. Defaults: 100 ms cadence, exact comparison,
    /// hold last value while degraded.
    pub fn new<F>(name: impl Into<String>, state: Arc<SystemState>, read: F) -> Self
    where
        F: Fn() -> HwResult<T> + Send + Sync + 'static,
    {
        Self {
            metadata: PropertyMetadata {
                name: name.into(),
                description: None,
                units: None,
            },
            read: Arc::new(read),
            state,
            tolerance: Tolerance::Exact,
            cadence: Duration::from_millis(100),
            degraded: DegradedPolicy::HoldLast,
            capacity: 16,
            last_raw: Arc::new(Mutex::new(None)),
        }
    }

    /// Add a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Add units.
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.metadata.units = Some(units.into());
        self
    }

    /// Change the comparison used to suppress unchanged samples.
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Change the sampling cadence.
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    /// Change what is reported while degraded.
    pub fn with_degraded_policy(mut self, policy: DegradedPolicy<T>) -> Self {
        self.degraded = policy;
        self
    }

    /// Change the per-subscriber buffer size.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Metadata.
    pub fn metadata(&self) -> &PropertyMetadata {
        &self.metadata
    }

    /// Sampling cadence.
    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Current value read from the hardware.
    pub fn read(&self) -> AppResult<T> {
        self.state
            .ensure_operational(&format!("read {}", self.metadata.name))?;
        Ok(self.read_raw()?)
    }

    fn read_raw(&self) -> HwResult<T> {
        let value = (self.read)()?;
        *self.last_raw.lock() = Some(value.clone());
        Ok(value)
    }

    fn last_raw(&self) -> Option<T> {
        self.last_raw.lock().clone()
    }

    /// Subscribe to value changes.
    ///
    /// A background task samples the property until the returned stream is
    /// dropped or process shutdown begins.
    pub fn subscribe(&self) -> PropertyStream<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let this = self.clone();

        self.state.spawn(async move {
            let name = this.metadata.name.clone();
            let mut subscription = Subscription::<T>::new();
            let mut ticker = tokio::time::interval(this.cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = this.state.shutdown_requested() => break,
                    _ = ticker.tick() => {}
                }
                if this.state.is_shutting_down() {
                    break;
                }

                let sample = if this.state.is_operational() {
                    match this.read_raw() {
                        Ok(value) => Some(value),
                        Err(e) => {
                            debug!("Reading {} failed, reusing last value: {}", name, e);
                            this.last_raw()
                        }
                    }
                } else {
                    match &this.degraded {
                        DegradedPolicy::HoldLast => this.last_raw(),
                        DegradedPolicy::Substitute(value) => Some(value.clone()),
                    }
                };

                let Some(sample) = sample else { continue };
                if subscription.should_emit(&sample, this.tolerance) {
                    if tx.send(sample.clone()).await.is_err() {
                        break;
                    }
                    subscription.emitted(sample);
                }
            }

            debug!("Subscription to {} ended", name);
        });

        PropertyStream::new(self.metadata.name.clone(), rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_subscription_forces_first_emission() {
        let sub = Subscription::<f64>::new();
        assert!(sub.should_emit(&1.0, Tolerance::Relative(1.0)));
    }

    #[test]
    fn test_subscription_suppresses_close_values() {
        let mut sub = Subscription::new();
        sub.emitted(1.0005_f64);
        assert!(!sub.should_emit(&1.0012, Tolerance::Relative(1e-3)));
        assert!(sub.should_emit(&1.01, Tolerance::Relative(1e-3)));
        assert_eq!(sub.last_emitted(), Some(&1.0005));
    }

    #[test]
    fn test_exact_tolerance_for_discrete_values() {
        let mut sub = Subscription::new();
        sub.emitted(true);
        assert!(!sub.should_emit(&true, Tolerance::Exact));
        assert!(sub.should_emit(&false, Tolerance::Exact));
    }

    #[test]
    fn test_unary_read_rejected_when_degraded() {
        let (state, writer) = SystemState::new();
        let prop = SampledObservable::new("FlowRate", state, || Ok(1.5_f64));
        assert_eq!(prop.read().unwrap(), 1.5);
        writer.set_operational(false);
        let err = prop.read().unwrap_err();
        assert!(err.to_string().contains("read FlowRate"));
    }
}
