//! GATT-level vocabulary shared by the controller and the backends.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one link attempt.
///
/// Every connect allocates a fresh handle. Backend events carry the handle
/// they belong to, so events from a torn-down link can be recognised and
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// ATT/GATT status code as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0x0000);
    pub const INSUFFICIENT_AUTHENTICATION: GattStatus = GattStatus(0x0005);
    pub const REQUEST_NOT_SUPPORTED: GattStatus = GattStatus(0x0006);
    pub const CONNECTION_TIMEOUT: GattStatus = GattStatus(0x0008);
    pub const REMOTE_TERMINATED: GattStatus = GattStatus(0x0013);
    pub const LOCAL_HOST_TERMINATED: GattStatus = GattStatus(0x0016);
    pub const ERROR: GattStatus = GattStatus(0x0085);
    pub const FAILURE: GattStatus = GattStatus(0x0101);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    fn label(self) -> Option<&'static str> {
        match self {
            Self::SUCCESS => Some("GATT_SUCCESS"),
            Self::INSUFFICIENT_AUTHENTICATION => Some("GATT_INSUFFICIENT_AUTHENTICATION"),
            Self::REQUEST_NOT_SUPPORTED => Some("GATT_REQUEST_NOT_SUPPORTED"),
            Self::CONNECTION_TIMEOUT => Some("GATT_CONN_TIMEOUT"),
            Self::REMOTE_TERMINATED => Some("GATT_CONN_TERMINATE_PEER_USER"),
            Self::LOCAL_HOST_TERMINATED => Some("GATT_CONN_TERMINATE_LOCAL_HOST"),
            Self::ERROR => Some("GATT_ERROR"),
            Self::FAILURE => Some("GATT_FAILURE"),
            _ => None,
        }
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "0x{:04X} ({})", self.0, label),
            None => write!(f, "0x{:04X}", self.0),
        }
    }
}

/// Link state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Physical transport requested when opening a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Transport {
    /// Let the platform decide.
    Auto,
    /// Bluetooth Low Energy.
    #[default]
    LowEnergy,
    /// Classic BR/EDR.
    BrEdr,
}

/// Options passed to the platform when opening a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Ask the platform to keep retrying the link when it drops or is out of range.
    pub auto_reconnect: bool,
    /// Transport to use.
    pub transport: Transport,
}

impl ConnectOptions {
    /// Options used for every session: auto-reconnect over LE.
    pub fn session() -> Self {
        Self {
            auto_reconnect: true,
            transport: Transport::LowEnergy,
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::session()
    }
}

/// How a descriptor value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorWriteMode {
    /// The value is passed with the write request (API level 33+).
    Direct,
    /// The value is set on the descriptor object, then the descriptor is written.
    Legacy,
}

/// Backend operations that can fail before producing a result event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GattOp {
    StartScan,
    StopScan,
    Connect,
    RequestMtu,
    DiscoverServices,
    EnableNotifications,
    WriteDescriptor,
    Disconnect,
}

impl fmt::Display for GattOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GattOp::StartScan => "start scan",
            GattOp::StopScan => "stop scan",
            GattOp::Connect => "connect",
            GattOp::RequestMtu => "request MTU",
            GattOp::DiscoverServices => "discover services",
            GattOp::EnableNotifications => "enable notifications",
            GattOp::WriteDescriptor => "write descriptor",
            GattOp::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

/// A discovered characteristic and the descriptors under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, descriptors: Vec<Uuid>) -> Self {
        Self { uuid, descriptors }
    }

    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

/// A discovered primary service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Find a service by UUID in a discovery result.
pub fn find_service(services: &[GattService], uuid: Uuid) -> Option<&GattService> {
    services.iter().find(|s| s.uuid == uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use navassist_types::uuid::{ACTION_CHARACTERISTIC, CCCD, NAVASSIST_SERVICE};

    #[test]
    fn test_status_display() {
        assert_eq!(GattStatus::SUCCESS.to_string(), "0x0000 (GATT_SUCCESS)");
        assert_eq!(GattStatus(0x85).to_string(), "0x0085 (GATT_ERROR)");
        assert_eq!(GattStatus(0x42).to_string(), "0x0042");
        assert!(GattStatus::SUCCESS.is_success());
        assert!(!GattStatus::FAILURE.is_success());
    }

    #[test]
    fn test_session_options() {
        let options = ConnectOptions::session();
        assert!(options.auto_reconnect);
        assert_eq!(options.transport, Transport::LowEnergy);
        assert_eq!(ConnectOptions::default(), options);
    }

    #[test]
    fn test_find_service_tree() {
        let services = vec![
            GattService::new(Uuid::nil(), vec![]),
            GattService::new(
                NAVASSIST_SERVICE,
                vec![GattCharacteristic::new(ACTION_CHARACTERISTIC, vec![CCCD])],
            ),
        ];
        let service = find_service(&services, NAVASSIST_SERVICE).unwrap();
        let characteristic = service.characteristic(ACTION_CHARACTERISTIC).unwrap();
        assert!(characteristic.has_descriptor(CCCD));
        assert!(service.characteristic(CCCD).is_none());
        assert!(find_service(&services, CCCD).is_none());
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(HandleId(7).to_string(), "#7");
        assert!(HandleId(1) < HandleId(2));
    }
}
