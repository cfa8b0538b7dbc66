//! Error types for navassist-core.
//!
//! Two kinds of failure live here. [`Error`] is what backend calls and
//! configuration validation return. [`ConnectionFailureReason`] is the
//! structured reason carried by a `ConnectionFailed` broadcast; it never
//! propagates as a Rust error because every session fault ends on the bus.
//!
//! # Where errors end up
//!
//! | Source | Handling |
//! |--------|----------|
//! | Backend call fails to start | Driver feeds `OperationFailed` back to the controller |
//! | GATT status != success | Controller tears the session down, broadcasts `ConnectionFailed` |
//! | Notification does not decode | Logged and dropped in the dispatch task |
//! | Invalid configuration | Returned from `validate()` before the service starts |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use navassist_types::ParseError;

use crate::gatt::GattStatus;

/// Errors that can occur when driving the BLE backend.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Peripheral not found when opening a link.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted on a handle with no live link.
    #[error("Not connected to device")]
    NotConnected,

    /// Required characteristic not found after discovery.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Invalid address or payload.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The BLE service loop has stopped and no longer accepts commands.
    #[error("BLE service is not running")]
    ServiceStopped,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The identity store could not be read or written.
    #[error("Identity storage error: {0}")]
    Storage(String),
}

/// Structured reasons carried by `ConnectionFailed` broadcasts.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// The connect capability is not granted.
    PermissionDenied,
    /// The Bluetooth radio is off.
    RadioOff,
    /// The address is not a valid peripheral address.
    InvalidAddress,
    /// The link reported a non-success GATT status.
    Gatt { status: GattStatus },
    /// Service discovery completed with a non-success status.
    ServiceDiscoveryFailed { status: GattStatus },
    /// Service discovery could not be started.
    DiscoveryNotStarted,
    /// The vendor service is missing.
    ServiceNotFound,
    /// The action characteristic is missing.
    CharacteristicNotFound,
    /// The CCCD is missing on the action characteristic.
    DescriptorNotFound,
    /// Local notification delivery or the CCCD write could not be issued.
    NotificationSetupFailed,
    /// The CCCD write completed with a non-success status.
    DescriptorWriteFailed { status: GattStatus },
    /// Platform-level failure opening or driving the link.
    Transport { message: String },
}

impl ConnectionFailureReason {
    /// Create a transport failure from any displayable error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission required"),
            Self::RadioOff => write!(f, "Bluetooth is off"),
            Self::InvalidAddress => write!(f, "invalid Bluetooth address"),
            Self::Gatt { status } => write!(f, "GATT error: {}", status),
            Self::ServiceDiscoveryFailed { status } => {
                write!(f, "service discovery failed ({})", status)
            }
            Self::DiscoveryNotStarted => write!(f, "could not start service discovery"),
            Self::ServiceNotFound => write!(f, "navassist service not found"),
            Self::CharacteristicNotFound => write!(f, "action characteristic not found"),
            Self::DescriptorNotFound => write!(f, "notification descriptor not found"),
            Self::NotificationSetupFailed => write!(f, "failed to enable notifications"),
            Self::DescriptorWriteFailed { status } => {
                write!(f, "failed to configure notifications ({})", status)
            }
            Self::Transport { message } => write!(f, "{}", message),
        }
    }
}

/// Reason why a peripheral was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Lookup scan ended before the peripheral appeared.
    ScanTimeout { duration: Duration },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a storage error from any displayable cause.
    pub fn storage(cause: impl std::fmt::Display) -> Self {
        Self::Storage(cause.to_string())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using navassist-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
