//! Durable storage seam for the last connected peripheral.

use std::sync::Mutex;

use navassist_types::PersistedPeripheralIdentity;

use crate::error::{Error, Result};

/// Where the controller's identity writes end up.
///
/// Writes are last-writer-wins. Implementations are called from the service
/// loop and should not block for long.
pub trait IdentityStore: Send + Sync {
    /// Load the stored identity. An empty identity means nothing is stored.
    fn load(&self) -> Result<PersistedPeripheralIdentity>;

    /// Replace the stored identity.
    fn save(&self, identity: &PersistedPeripheralIdentity) -> Result<()>;

    /// Remove the stored identity.
    fn clear(&self) -> Result<()>;
}

/// In-memory identity store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identity: Mutex<PersistedPeripheralIdentity>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: PersistedPeripheralIdentity) -> Self {
        Self {
            identity: Mutex::new(identity),
        }
    }

    /// Current contents, readable even after a panic while locked.
    pub fn snapshot(&self) -> PersistedPeripheralIdentity {
        self.identity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<PersistedPeripheralIdentity> {
        Ok(self.snapshot())
    }

    fn save(&self, identity: &PersistedPeripheralIdentity) -> Result<()> {
        *self.identity.lock().map_err(Error::storage)? = identity.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.identity.lock().map_err(Error::storage)? = PersistedPeripheralIdentity::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navassist_types::PeripheralAddress;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryIdentityStore::new();
        assert!(store.load().unwrap().is_empty());

        let address: PeripheralAddress = "24:0A:C4:12:34:56".parse().unwrap();
        let identity = PersistedPeripheralIdentity::new(address, Some("NavCane".into()));
        store.save(&identity).unwrap();
        assert_eq!(store.load().unwrap(), identity);

        store.clear().unwrap();
        assert!(store.snapshot().is_empty());
    }
}
