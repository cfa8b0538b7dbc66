//! Permission gating for scan and connect operations.
//!
//! Which permissions a radio operation needs depends on the platform API
//! level. [`PermissionGate`] is the single place that knows the rules; it
//! holds no state and never fails, it only answers whether an operation may
//! touch the radio and, if not, which permissions are missing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// First API level with dedicated scan/connect permissions.
pub const MODERN_PERMISSIONS_API_LEVEL: u32 = 31;

/// First API level that writes descriptor values directly.
pub const DIRECT_DESCRIPTOR_WRITE_API_LEVEL: u32 = 33;

/// Runtime permissions relevant to BLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Scan for peripherals (modern platforms).
    BluetoothScan,
    /// Connect to peripherals and read their names (modern platforms).
    BluetoothConnect,
    /// Basic Bluetooth access (legacy platforms).
    Bluetooth,
    /// Adapter administration (legacy platforms).
    BluetoothAdmin,
    /// Precise location (legacy scanning).
    FineLocation,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::BluetoothScan,
        Permission::BluetoothConnect,
        Permission::Bluetooth,
        Permission::BluetoothAdmin,
        Permission::FineLocation,
    ];

    fn bit(self) -> u8 {
        match self {
            Permission::BluetoothScan => 1 << 0,
            Permission::BluetoothConnect => 1 << 1,
            Permission::Bluetooth => 1 << 2,
            Permission::BluetoothAdmin => 1 << 3,
            Permission::FineLocation => 1 << 4,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::BluetoothScan => "BLUETOOTH_SCAN",
            Permission::BluetoothConnect => "BLUETOOTH_CONNECT",
            Permission::Bluetooth => "BLUETOOTH",
            Permission::BluetoothAdmin => "BLUETOOTH_ADMIN",
            Permission::FineLocation => "ACCESS_FINE_LOCATION",
        };
        f.write_str(name)
    }
}

/// A set of granted permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionSet {
    bits: u8,
}

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Permission::ALL.into_iter().collect()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.bits & permission.bit() != 0
    }

    pub fn insert(&mut self, permission: Permission) {
        self.bits |= permission.bit();
    }

    pub fn remove(&mut self, permission: Permission) {
        self.bits &= !permission.bit();
    }

    #[must_use]
    pub fn with(mut self, permission: Permission) -> Self {
        self.insert(permission);
        self
    }

    #[must_use]
    pub fn without(mut self, permission: Permission) -> Self {
        self.remove(permission);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL.into_iter().filter(|p| self.contains(*p))
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = PermissionSet::empty();
        for permission in iter {
            set.insert(permission);
        }
        set
    }
}

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Granted,
    Denied { missing: Vec<Permission> },
}

impl Capability {
    pub fn is_granted(&self) -> bool {
        matches!(self, Capability::Granted)
    }

    fn check(granted: PermissionSet, required: &[Permission]) -> Self {
        let missing: Vec<Permission> = required
            .iter()
            .copied()
            .filter(|p| !granted.contains(*p))
            .collect();
        if missing.is_empty() {
            Capability::Granted
        } else {
            Capability::Denied { missing }
        }
    }
}

/// Platform facts the controller makes decisions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Environment {
    /// Platform API level.
    pub api_level: u32,
    /// Currently granted permissions.
    pub granted: PermissionSet,
    /// Whether the Bluetooth radio is powered on.
    pub radio_enabled: bool,
}

impl Environment {
    /// Every permission granted, radio on. Desktop stacks have no runtime
    /// permission model, so this is what the btleplug backend runs with.
    pub fn unrestricted() -> Self {
        Self {
            api_level: 34,
            granted: PermissionSet::all(),
            radio_enabled: true,
        }
    }

    pub fn can_scan(&self) -> bool {
        PermissionGate::can_scan(self.api_level, self.granted)
    }

    pub fn can_connect(&self) -> bool {
        PermissionGate::can_connect(self.api_level, self.granted)
    }

    pub fn can_read_name(&self) -> bool {
        PermissionGate::can_read_name(self.api_level, self.granted)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::unrestricted()
    }
}

/// Pure permission rules for BLE operations.
pub struct PermissionGate;

impl PermissionGate {
    /// Permissions required to scan at `api_level`.
    pub fn scan_requirements(api_level: u32) -> &'static [Permission] {
        if api_level >= MODERN_PERMISSIONS_API_LEVEL {
            &[Permission::BluetoothScan]
        } else {
            &[Permission::FineLocation, Permission::BluetoothAdmin]
        }
    }

    /// Permissions required to connect or disconnect at `api_level`.
    pub fn connect_requirements(api_level: u32) -> &'static [Permission] {
        if api_level >= MODERN_PERMISSIONS_API_LEVEL {
            &[Permission::BluetoothConnect]
        } else {
            &[Permission::BluetoothAdmin]
        }
    }

    /// Permissions required to read a peripheral's hardware name.
    pub fn read_name_requirements(api_level: u32) -> &'static [Permission] {
        if api_level >= MODERN_PERMISSIONS_API_LEVEL {
            &[Permission::BluetoothConnect]
        } else {
            &[Permission::Bluetooth]
        }
    }

    pub fn scan(api_level: u32, granted: PermissionSet) -> Capability {
        Capability::check(granted, Self::scan_requirements(api_level))
    }

    pub fn connect(api_level: u32, granted: PermissionSet) -> Capability {
        Capability::check(granted, Self::connect_requirements(api_level))
    }

    pub fn read_name(api_level: u32, granted: PermissionSet) -> Capability {
        Capability::check(granted, Self::read_name_requirements(api_level))
    }

    pub fn can_scan(api_level: u32, granted: PermissionSet) -> bool {
        Self::scan(api_level, granted).is_granted()
    }

    pub fn can_connect(api_level: u32, granted: PermissionSet) -> bool {
        Self::connect(api_level, granted).is_granted()
    }

    pub fn can_read_name(api_level: u32, granted: PermissionSet) -> bool {
        Self::read_name(api_level, granted).is_granted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modern_scan_needs_scan_permission() {
        let granted = PermissionSet::empty().with(Permission::BluetoothScan);
        assert!(PermissionGate::can_scan(31, granted));
        assert!(!PermissionGate::can_connect(31, granted));
        assert_eq!(
            PermissionGate::connect(33, granted),
            Capability::Denied {
                missing: vec![Permission::BluetoothConnect]
            }
        );
    }

    #[test]
    fn test_legacy_scan_needs_location_and_admin() {
        let admin_only = PermissionSet::empty().with(Permission::BluetoothAdmin);
        assert_eq!(
            PermissionGate::scan(30, admin_only),
            Capability::Denied {
                missing: vec![Permission::FineLocation]
            }
        );
        let both = admin_only.with(Permission::FineLocation);
        assert!(PermissionGate::can_scan(30, both));
        assert!(PermissionGate::can_connect(30, both));
        // Modern scan permission does nothing on legacy platforms
        assert!(!PermissionGate::can_scan(
            30,
            PermissionSet::empty().with(Permission::BluetoothScan)
        ));
    }

    #[test]
    fn test_read_name_rules() {
        let connect = PermissionSet::empty().with(Permission::BluetoothConnect);
        assert!(PermissionGate::can_read_name(31, connect));
        assert!(!PermissionGate::can_read_name(29, connect));
        let legacy = PermissionSet::empty().with(Permission::Bluetooth);
        assert!(PermissionGate::can_read_name(29, legacy));
    }

    #[test]
    fn test_permission_set_ops() {
        let mut set = PermissionSet::all();
        assert_eq!(set.iter().count(), 5);
        set.remove(Permission::FineLocation);
        assert!(!set.contains(Permission::FineLocation));
        assert!(set.contains(Permission::Bluetooth));
        assert_eq!(PermissionSet::empty().iter().count(), 0);
        let collected: PermissionSet = [Permission::Bluetooth, Permission::Bluetooth]
            .into_iter()
            .collect();
        assert_eq!(collected.iter().collect::<Vec<_>>(), vec![Permission::Bluetooth]);
    }

    #[test]
    fn test_unrestricted_environment() {
        let env = Environment::unrestricted();
        assert!(env.can_scan());
        assert!(env.can_connect());
        assert!(env.can_read_name());
        assert!(env.radio_enabled);
    }

    #[test]
    fn test_permission_display() {
        assert_eq!(Permission::FineLocation.to_string(), "ACCESS_FINE_LOCATION");
    }
}
