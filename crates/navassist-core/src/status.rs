//! Connection and scan status broadcast on the bus.

use std::fmt;

use serde::{Deserialize, Serialize};

use navassist_types::PeripheralAddress;

use crate::error::ConnectionFailureReason;
use crate::gatt::HandleId;

/// Why a scan failed.
///
/// The first six variants carry the platform scan error codes. The last two
/// are raised by the controller itself and report the platform's internal
/// error code.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new codes
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ScanFailure {
    AlreadyStarted,
    ApplicationRegistrationFailed,
    InternalError,
    FeatureUnsupported,
    OutOfHardwareResources,
    ScanningTooFrequently,
    /// The scan capability is not granted.
    PermissionDenied,
    /// The radio is off or turned off mid-scan.
    RadioOff,
}

impl ScanFailure {
    /// Platform scan error code.
    pub fn code(self) -> i32 {
        match self {
            ScanFailure::AlreadyStarted => 1,
            ScanFailure::ApplicationRegistrationFailed => 2,
            ScanFailure::InternalError => 3,
            ScanFailure::FeatureUnsupported => 4,
            ScanFailure::OutOfHardwareResources => 5,
            ScanFailure::ScanningTooFrequently => 6,
            ScanFailure::PermissionDenied | ScanFailure::RadioOff => 3,
        }
    }

    /// Map a platform scan error code.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ScanFailure::AlreadyStarted,
            2 => ScanFailure::ApplicationRegistrationFailed,
            4 => ScanFailure::FeatureUnsupported,
            5 => ScanFailure::OutOfHardwareResources,
            6 => ScanFailure::ScanningTooFrequently,
            _ => ScanFailure::InternalError,
        }
    }
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanFailure::AlreadyStarted => write!(f, "scan already started"),
            ScanFailure::ApplicationRegistrationFailed => {
                write!(f, "scanner registration failed")
            }
            ScanFailure::InternalError => write!(f, "internal scan error"),
            ScanFailure::FeatureUnsupported => write!(f, "scanning not supported"),
            ScanFailure::OutOfHardwareResources => write!(f, "out of hardware resources"),
            ScanFailure::ScanningTooFrequently => write!(f, "scanning too frequently"),
            ScanFailure::PermissionDenied => write!(f, "scan permission denied"),
            ScanFailure::RadioOff => write!(f, "Bluetooth is off"),
        }
    }
}

/// Reference to the connected peripheral handed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralRef {
    pub address: PeripheralAddress,
    pub handle: HandleId,
}

/// Everything the core reports to its consumers.
///
/// Broadcast only. Never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    ScanStarted,
    ScanStopped,
    ScanFailed {
        code: ScanFailure,
    },
    AttemptingConnection {
        name: String,
    },
    Connected {
        name: String,
        peripheral: PeripheralRef,
    },
    ConnectionFailed {
        name: String,
        reason: ConnectionFailureReason,
    },
    Disconnected {
        name: String,
    },
}

impl ConnectionStatus {
    /// Display name carried by connection-related statuses.
    pub fn name(&self) -> Option<&str> {
        match self {
            ConnectionStatus::AttemptingConnection { name }
            | ConnectionStatus::Connected { name, .. }
            | ConnectionStatus::ConnectionFailed { name, .. }
            | ConnectionStatus::Disconnected { name } => Some(name),
            _ => None,
        }
    }

    pub fn is_scan_status(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::ScanStarted
                | ConnectionStatus::ScanStopped
                | ConnectionStatus::ScanFailed { .. }
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "idle"),
            ConnectionStatus::ScanStarted => write!(f, "scanning"),
            ConnectionStatus::ScanStopped => write!(f, "scan stopped"),
            ConnectionStatus::ScanFailed { code } => {
                write!(f, "scan failed: {} (code {})", code, code.code())
            }
            ConnectionStatus::AttemptingConnection { name } => write!(f, "connecting to {}", name),
            ConnectionStatus::Connected { name, .. } => write!(f, "connected to {}", name),
            ConnectionStatus::ConnectionFailed { name, reason } => {
                write!(f, "connection to {} failed: {}", name, reason)
            }
            ConnectionStatus::Disconnected { name } => write!(f, "disconnected from {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_failure_codes() {
        assert_eq!(ScanFailure::AlreadyStarted.code(), 1);
        assert_eq!(ScanFailure::ScanningTooFrequently.code(), 6);
        assert_eq!(ScanFailure::PermissionDenied.code(), 3);
        assert_eq!(ScanFailure::from_code(2), ScanFailure::ApplicationRegistrationFailed);
        assert_eq!(ScanFailure::from_code(99), ScanFailure::InternalError);
    }

    #[test]
    fn test_status_name() {
        let status = ConnectionStatus::Disconnected {
            name: "NavCane".into(),
        };
        assert_eq!(status.name(), Some("NavCane"));
        assert_eq!(ConnectionStatus::ScanStarted.name(), None);
        assert!(ConnectionStatus::ScanStopped.is_scan_status());
        assert!(!status.is_scan_status());
    }

    #[test]
    fn test_status_display() {
        let status = ConnectionStatus::ConnectionFailed {
            name: "NavCane".into(),
            reason: ConnectionFailureReason::RadioOff,
        };
        assert_eq!(status.to_string(), "connection to NavCane failed: Bluetooth is off");
        assert_eq!(
            ConnectionStatus::ScanFailed {
                code: ScanFailure::InternalError
            }
            .to_string(),
            "scan failed: internal scan error (code 3)"
        );
    }

    #[test]
    fn test_status_serialization() {
        let status = ConnectionStatus::Connected {
            name: "NavCane".into(),
            peripheral: PeripheralRef {
                address: "24:0A:C4:12:34:56".parse().unwrap(),
                handle: HandleId(3),
            },
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("24:0A:C4:12:34:56"));
        let back: ConnectionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
