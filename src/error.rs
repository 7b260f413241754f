//! Custom error types for the application.
//!
//! This module defines the primary error type, `LabError`, for the entire application.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from configuration issues to
//! device faults reported over the bus.
//!
//! ## Error Hierarchy
//!
//! `LabError` is an enum that consolidates various error sources:
//!
//! - **`Settings`**: Wraps errors from `figment`, typically related to file parsing
//!   or format issues in the configuration files.
//! - **`Configuration`**: Semantic configuration problems (duplicate device names,
//!   zero cadences) and a bus that cannot be opened. Fatal at startup.
//! - **`DeviceCommunication`**: The bus or link failed during a call.
//! - **`DeviceFault`**: The device reports a latched fault. Cleared explicitly.
//! - **`Validation`**: A caller parameter lies outside the allowed range.
//! - **`OperationTimeout`**: A long-running operation never started moving.
//! - **`SystemNotOperational`**: Access attempted while the bus supervisor reports
//!   a degraded system.
//!
//! Hardware layer errors (`HardwareError`) convert into `LabError` with `?`.

use std::sync::Arc;

use thiserror::Error;

use crate::hardware::HardwareError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, LabError>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum LabError {
    /// Settings file could not be loaded or deserialized.
    #[error("Configuration load error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Missing/invalid device configuration or bus open failure.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Bus/link failure during a device call.
    #[error("Device communication error: {0}")]
    DeviceCommunication(String),

    /// Device reports a latched fault.
    #[error("Device fault on '{device}': {message}")]
    DeviceFault {
        /// Device or unit name
        device: String,
        /// Fault description from the hardware layer
        message: String,
    },

    /// Caller parameter outside the allowed range.
    #[error("Invalid parameter '{parameter}': {message}")]
    Validation {
        /// Parameter identifier
        parameter: String,
        /// Why the value was rejected
        message: String,
    },

    /// Long-running operation never reached Running within the retry window.
    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    /// Supervisor reports the system as degraded.
    #[error("Cannot {action} because the system is not in an operational state")]
    SystemNotOperational {
        /// The rejected action, e.g. "execute DoseVolume"
        action: String,
    },

    /// Another long-running operation is still active on the device.
    #[error("Device '{0}' is busy with another operation")]
    OperationInProgress(String),

    /// No command execution with this id is known.
    #[error("Unknown command execution id: {0}")]
    CommandNotFound(uuid::Uuid),

    /// The command execution has not reached a terminal status yet.
    #[error("Command execution {0} has not finished yet")]
    CommandNotFinished(uuid::Uuid),

    /// The command execution finished with an error.
    #[error("Command execution {id} failed: {source}")]
    CommandFailed {
        /// Execution id
        id: uuid::Uuid,
        /// Error that ended the execution
        #[source]
        source: Arc<LabError>,
    },

    /// Channel index outside `0..count`.
    #[error("The channel index {index} is invalid. The index must be between 0 and {max}")]
    InvalidChannelIndex {
        /// Requested index
        index: usize,
        /// Largest valid index
        max: usize,
    },

    /// Unit does not implement the requested functionality.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown reported errors from several components.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<LabError>),
}

impl LabError {
    /// Build a `Validation` error.
    pub fn validation(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        LabError::Validation {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Build a `SystemNotOperational` error for the given action.
    pub fn not_operational(action: impl Into<String>) -> Self {
        LabError::SystemNotOperational {
            action: action.into(),
        }
    }
}

impl From<figment::Error> for LabError {
    fn from(err: figment::Error) -> Self {
        LabError::Settings(Box::new(err))
    }
}

impl From<HardwareError> for LabError {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::Fault { unit, message } => LabError::DeviceFault {
                device: unit,
                message,
            },
            HardwareError::Unsupported(what) => LabError::Unsupported(what),
            other => LabError::DeviceCommunication(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LabError::not_operational("execute DoseVolume");
        assert_eq!(
            err.to_string(),
            "Cannot execute DoseVolume because the system is not in an operational state"
        );
    }

    #[test]
    fn test_hardware_fault_maps_to_device_fault() {
        let err: LabError = HardwareError::Fault {
            unit: "pump_1".into(),
            message: "following error".into(),
        }
        .into();
        assert!(matches!(err, LabError::DeviceFault { .. }));
    }

    #[test]
    fn test_hardware_link_failure_maps_to_communication() {
        let err: LabError = HardwareError::Communication("CAN timeout".into()).into();
        assert!(matches!(err, LabError::DeviceCommunication(_)));
        assert!(err.to_string().contains("CAN timeout"));
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = LabError::ShutdownFailed(vec![
            LabError::DeviceCommunication("bus stop".into()),
            LabError::Unsupported("close".into()),
        ]);
        assert!(err.to_string().contains("Shutdown failed"));
    }
}
