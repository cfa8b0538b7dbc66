//! Display-name resolution and persisted-name reconciliation.
//!
//! Hardware names are passed in as `Option<&str>`; callers pass `None` when
//! the name is unknown or the read-name permission is missing. A blank name
//! counts as no name.

use navassist_types::{PeripheralAddress, PersistedPeripheralIdentity};

/// Resolves display names for a peripheral.
pub struct DeviceNameResolver;

impl DeviceNameResolver {
    /// Name to show for a peripheral.
    ///
    /// A persisted name for the same address is used unless the hardware
    /// reports a different non-empty name; with no persisted name the hardware
    /// name is used, and the address is the last resort.
    pub fn resolve(
        address: &PeripheralAddress,
        hardware_name: Option<&str>,
        persisted: &PersistedPeripheralIdentity,
    ) -> String {
        let hardware = clean(hardware_name);
        match (persisted.name_for(address), hardware) {
            (Some(saved), Some(live)) if live != saved => live.to_string(),
            (Some(saved), _) => saved.to_string(),
            (None, Some(live)) => live.to_string(),
            (None, None) => address.to_string(),
        }
    }

    /// Name used when reporting a failed negotiation: persisted, then
    /// hardware, then address.
    pub fn failure_name(
        address: &PeripheralAddress,
        hardware_name: Option<&str>,
        persisted: &PersistedPeripheralIdentity,
    ) -> String {
        persisted
            .name_for(address)
            .or(clean(hardware_name))
            .map_or_else(|| address.to_string(), str::to_string)
    }

    /// Record to write after a name resolution, if any.
    ///
    /// A hardware name that differs from the stored one (or belongs to a
    /// different address) replaces the stored record. With no hardware name,
    /// the stored record is only replaced when `remember_address` is set and
    /// the stored address is a different one; the name is then left empty.
    /// A stored name is never overwritten with nothing.
    pub fn reconcile(
        stored: &PersistedPeripheralIdentity,
        address: &PeripheralAddress,
        hardware_name: Option<&str>,
        remember_address: bool,
    ) -> Option<PersistedPeripheralIdentity> {
        let same_address = stored
            .address
            .as_deref()
            .and_then(|a| a.parse::<PeripheralAddress>().ok())
            .is_some_and(|a| a == *address);

        match clean(hardware_name) {
            Some(live) => {
                if same_address && stored.name.as_deref() == Some(live) {
                    None
                } else {
                    Some(PersistedPeripheralIdentity::new(
                        *address,
                        Some(live.to_string()),
                    ))
                }
            }
            None if remember_address && !same_address => {
                Some(PersistedPeripheralIdentity::new(*address, None))
            }
            None => None,
        }
    }
}

fn clean(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> PeripheralAddress {
        "24:0A:C4:12:34:56".parse().unwrap()
    }

    fn stored(name: Option<&str>) -> PersistedPeripheralIdentity {
        PersistedPeripheralIdentity::new(addr(), name.map(str::to_string))
    }

    #[test]
    fn test_resolve_prefers_persisted_name() {
        assert_eq!(
            DeviceNameResolver::resolve(&addr(), None, &stored(Some("Cane"))),
            "Cane"
        );
        assert_eq!(
            DeviceNameResolver::resolve(&addr(), Some("Cane"), &stored(Some("Cane"))),
            "Cane"
        );
    }

    #[test]
    fn test_resolve_prefers_different_hardware_name() {
        assert_eq!(
            DeviceNameResolver::resolve(&addr(), Some("Cane v2"), &stored(Some("Cane"))),
            "Cane v2"
        );
    }

    #[test]
    fn test_resolve_falls_back_to_address() {
        let empty = PersistedPeripheralIdentity::default();
        assert_eq!(
            DeviceNameResolver::resolve(&addr(), Some("  "), &empty),
            "24:0A:C4:12:34:56"
        );
        assert_eq!(DeviceNameResolver::resolve(&addr(), Some("Cane"), &empty), "Cane");
    }

    #[test]
    fn test_resolve_ignores_name_stored_for_other_address() {
        let other: PeripheralAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let record = PersistedPeripheralIdentity::new(other, Some("Other".into()));
        assert_eq!(
            DeviceNameResolver::resolve(&addr(), None, &record),
            "24:0A:C4:12:34:56"
        );
    }

    #[test]
    fn test_failure_name_precedence() {
        assert_eq!(
            DeviceNameResolver::failure_name(&addr(), Some("Live"), &stored(Some("Saved"))),
            "Saved"
        );
        assert_eq!(
            DeviceNameResolver::failure_name(&addr(), Some("Live"), &stored(None)),
            "Live"
        );
        assert_eq!(
            DeviceNameResolver::failure_name(&addr(), None, &stored(None)),
            "24:0A:C4:12:34:56"
        );
    }

    #[test]
    fn test_reconcile_writes_new_hardware_name() {
        let update = DeviceNameResolver::reconcile(&stored(Some("Old")), &addr(), Some("New"), false)
            .unwrap();
        assert_eq!(update.name.as_deref(), Some("New"));
        assert_eq!(update.address.as_deref(), Some("24:0A:C4:12:34:56"));
    }

    #[test]
    fn test_reconcile_skips_unchanged_name() {
        assert!(
            DeviceNameResolver::reconcile(&stored(Some("Cane")), &addr(), Some("Cane"), true)
                .is_none()
        );
    }

    #[test]
    fn test_reconcile_never_erases_stored_name() {
        // Permission denied: no hardware name
        assert!(
            DeviceNameResolver::reconcile(&stored(Some("Cane")), &addr(), None, true).is_none()
        );
        assert!(
            DeviceNameResolver::reconcile(&stored(Some("Cane")), &addr(), None, false).is_none()
        );
    }

    #[test]
    fn test_reconcile_remembers_new_address_without_name() {
        let empty = PersistedPeripheralIdentity::default();
        let update = DeviceNameResolver::reconcile(&empty, &addr(), None, true).unwrap();
        assert_eq!(update.address.as_deref(), Some("24:0A:C4:12:34:56"));
        assert_eq!(update.name, None);
        assert!(DeviceNameResolver::reconcile(&empty, &addr(), None, false).is_none());
    }
}
