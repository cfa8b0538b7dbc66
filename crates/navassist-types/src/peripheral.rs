//! Peripheral descriptors and persisted identity.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::address::PeripheralAddress;

/// A peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeripheralDescriptor {
    /// Hardware or platform address.
    pub address: PeripheralAddress,
    /// Resolved display name, if any.
    pub name: Option<String>,
    /// Last observed signal strength in dBm.
    pub rssi: Option<i16>,
}

impl PeripheralDescriptor {
    /// Create a descriptor with no name or signal strength.
    #[must_use]
    pub fn new(address: PeripheralAddress) -> Self {
        Self {
            address,
            name: None,
            rssi: None,
        }
    }

    /// Name for display, falling back to the address.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.address.to_string(),
        }
    }
}

/// The last successfully connected peripheral, kept across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PersistedPeripheralIdentity {
    /// Address string as stored. May be malformed if storage was edited.
    pub address: Option<String>,
    /// Name stored alongside the address.
    pub name: Option<String>,
}

impl PersistedPeripheralIdentity {
    /// Identity for a freshly connected peripheral.
    #[must_use]
    pub fn new(address: PeripheralAddress, name: Option<String>) -> Self {
        Self {
            address: Some(address.to_string()),
            name,
        }
    }

    /// Whether no address is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.address.as_deref().is_none_or(|a| a.trim().is_empty())
    }

    /// Stored name, only when the stored address refers to `address`.
    #[must_use]
    pub fn name_for(&self, address: &PeripheralAddress) -> Option<&str> {
        let stored = self.address.as_deref()?;
        let parsed: PeripheralAddress = stored.parse().ok()?;
        if parsed == *address {
            self.name.as_deref().filter(|n| !n.trim().is_empty())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> PeripheralAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_display_name_falls_back_to_address() {
        let mut d = PeripheralDescriptor::new(addr("24:0A:C4:12:34:56"));
        assert_eq!(d.display_name(), "24:0A:C4:12:34:56");
        d.name = Some("NavCane".to_string());
        assert_eq!(d.display_name(), "NavCane");
    }

    #[test]
    fn test_identity_name_requires_matching_address() {
        let id = PersistedPeripheralIdentity::new(addr("24:0A:C4:12:34:56"), Some("NavCane".into()));
        assert_eq!(id.name_for(&addr("24:0a:c4:12:34:56")), Some("NavCane"));
        assert_eq!(id.name_for(&addr("24:0A:C4:12:34:57")), None);
    }

    #[test]
    fn test_identity_empty() {
        assert!(PersistedPeripheralIdentity::default().is_empty());
        let blank = PersistedPeripheralIdentity {
            address: Some("  ".into()),
            name: None,
        };
        assert!(blank.is_empty());
        assert!(!PersistedPeripheralIdentity::new(addr("24:0A:C4:12:34:56"), None).is_empty());
    }

    #[test]
    fn test_identity_with_malformed_address_has_no_name() {
        let id = PersistedPeripheralIdentity {
            address: Some("garbage".into()),
            name: Some("NavCane".into()),
        };
        assert_eq!(id.name_for(&addr("24:0A:C4:12:34:56")), None);
    }
}
