//! Bluetooth UUIDs and protocol constants for the navassist peripheral.
//!
//! The peripheral exposes one vendor-specific service with a single
//! notify characteristic carrying the action messages.

use uuid::{Uuid, uuid};

// --- Vendor Service / Characteristic UUIDs ---

/// Vendor service advertised by the peripheral and used as the scan filter.
pub const NAVASSIST_SERVICE: Uuid = uuid!("4fafc201-1fb5-459e-8fcc-c5c9c331914b");

/// Notify characteristic carrying `<action>,<lat>,<lon>,<description>` messages.
pub const ACTION_CHARACTERISTIC: Uuid = uuid!("beb5483e-36e1-4688-b7f5-ea07361b26a8");

// --- Standard Descriptor UUIDs ---

/// Client Characteristic Configuration Descriptor.
pub const CCCD: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// CCCD value that enables notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value that disables notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

// --- Link parameters ---

/// MTU requested right after the link comes up.
pub const REQUESTED_MTU: u16 = 185;

/// ATT MTU every link starts with before negotiation.
pub const DEFAULT_MTU: u16 = 23;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuid() {
        assert_eq!(
            NAVASSIST_SERVICE.to_string(),
            "4fafc201-1fb5-459e-8fcc-c5c9c331914b"
        );
    }

    #[test]
    fn test_characteristic_uuid() {
        assert_eq!(
            ACTION_CHARACTERISTIC.to_string(),
            "beb5483e-36e1-4688-b7f5-ea07361b26a8"
        );
    }

    #[test]
    fn test_cccd_is_bluetooth_base_uuid() {
        // 16-bit 0x2902 expanded with the Bluetooth base UUID
        let cccd = CCCD.to_string();
        assert!(cccd.starts_with("00002902"));
        assert!(cccd.ends_with("-0000-1000-8000-00805f9b34fb"));
    }

    #[test]
    fn test_uuids_are_distinct() {
        assert_ne!(NAVASSIST_SERVICE, ACTION_CHARACTERISTIC);
        assert_ne!(ACTION_CHARACTERISTIC, CCCD);
    }

    #[test]
    fn test_notification_values() {
        assert_eq!(ENABLE_NOTIFICATION_VALUE, [0x01, 0x00]);
        assert_eq!(DISABLE_NOTIFICATION_VALUE, [0x00, 0x00]);
    }

    #[test]
    fn test_mtu_values() {
        assert!(REQUESTED_MTU > DEFAULT_MTU);
        assert_eq!(REQUESTED_MTU, 185);
    }
}
