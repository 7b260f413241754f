//! Core library for the rust_labdaq application.
//!
//! Laboratory devices attached to a shared bus (syringe pumps, axis systems,
//! valves, controllers and I/O channels) are discovered, grouped into logical
//! devices and exposed as independently addressable services.
//!
//! # Modules
//!
//! - [`catalog`] - discovery and classification of bus units
//! - [`health`] - bus supervisor and the shared operational state
//! - [`command`] - tracking of long-running commands such as dosing
//! - [`observable`] - polled properties as de-duplicated subscriptions
//! - [`services`] - per-device features and the endpoint plan
//! - [`app`] - startup and shutdown of the whole system

pub mod app;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod hardware;
pub mod health;
pub mod logging;
pub mod observable;
pub mod services;

pub use app::Application;
pub use error::{AppResult, LabError};
