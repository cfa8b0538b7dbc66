//! [`IdentityStore`] backed by the preference database.

use std::sync::{Arc, Mutex, MutexGuard};

use navassist_core::{IdentityStore, PersistedPeripheralIdentity};
use navassist_store::Store;

use crate::error::{CollaboratorError, Result};

/// Preference store shared by the BLE service and the action handler.
///
/// `rusqlite::Connection` is not `Sync`, so access is serialised.
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Store>>,
}

impl SharedStore {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Lock the store. Never hold the guard across an `.await`.
    pub fn lock(&self) -> Result<MutexGuard<'_, Store>> {
        self.inner.lock().map_err(|_| CollaboratorError::LockPoisoned)
    }

    /// Stored emergency number, else `fallback`.
    pub fn phone_number_or(&self, fallback: &str) -> Result<String> {
        let stored = self.lock()?.get(navassist_store::PHONE_NUMBER)?;
        Ok(stored.unwrap_or_else(|| fallback.to_string()))
    }
}

/// Persists the last connected peripheral in the preference database.
#[derive(Debug, Clone)]
pub struct SqliteIdentityStore {
    store: SharedStore,
}

impl SqliteIdentityStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn load(&self) -> navassist_core::Result<PersistedPeripheralIdentity> {
        let store = self.store.lock().map_err(navassist_core::Error::storage)?;
        store
            .peripheral_identity()
            .map_err(navassist_core::Error::storage)
    }

    fn save(&self, identity: &PersistedPeripheralIdentity) -> navassist_core::Result<()> {
        let store = self.store.lock().map_err(navassist_core::Error::storage)?;
        store
            .save_peripheral_identity(identity)
            .map_err(navassist_core::Error::storage)
    }

    fn clear(&self) -> navassist_core::Result<()> {
        let store = self.store.lock().map_err(navassist_core::Error::storage)?;
        store
            .clear_peripheral_identity()
            .map_err(navassist_core::Error::storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> SharedStore {
        SharedStore::new(Store::open_in_memory().unwrap())
    }

    #[test]
    fn test_round_trip_through_trait() {
        let store = shared();
        let identities: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(store.clone()));

        assert!(identities.load().unwrap().is_empty());

        let identity = PersistedPeripheralIdentity {
            address: Some("AA:BB:CC:DD:EE:FF".to_string()),
            name: Some("NavCane".to_string()),
        };
        identities.save(&identity).unwrap();
        assert_eq!(identities.load().unwrap(), identity);

        identities.clear().unwrap();
        assert!(identities.load().unwrap().is_empty());
    }

    #[test]
    fn test_phone_number_fallback() {
        let store = shared();
        assert_eq!(store.phone_number_or("111").unwrap(), "111");
        store.lock().unwrap().set_phone_number("222").unwrap();
        assert_eq!(store.phone_number_or("111").unwrap(), "222");
    }
}
