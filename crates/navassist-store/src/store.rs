//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};

use navassist_types::PersistedPeripheralIdentity;

use crate::error::{Error, Result};
use crate::models::{LAST_DEVICE_ADDRESS, LAST_DEVICE_NAME, PHONE_NUMBER, Preference};
use crate::schema;

/// Phone number used when no emergency contact has been configured.
pub const DEFAULT_PHONE_NUMBER: &str = "6121692423";

/// SQLite-backed preference store.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening preference database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Raw preferences ===

    /// Read a preference value.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a preference value, replacing any previous one.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        upsert(&self.conn, key, value)?;
        debug!("Stored preference {key}");
        Ok(())
    }

    /// Remove a preference. Returns whether a row existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM preferences WHERE key = ?1", [key])?;
        Ok(rows > 0)
    }

    /// List all preferences ordered by key.
    pub fn preferences(&self) -> Result<Vec<Preference>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, updated_at FROM preferences ORDER BY key")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut preferences = Vec::new();
        for row in rows {
            let (key, value, updated_at) = row?;
            let updated_at = OffsetDateTime::from_unix_timestamp(updated_at)
                .map_err(|e| Error::InvalidTimestamp(e.to_string()))?;
            preferences.push(Preference {
                key,
                value,
                updated_at,
            });
        }
        Ok(preferences)
    }

    // === Peripheral identity ===

    /// Load the last connected peripheral. Missing keys load as `None`.
    pub fn peripheral_identity(&self) -> Result<PersistedPeripheralIdentity> {
        Ok(PersistedPeripheralIdentity {
            address: self.get(LAST_DEVICE_ADDRESS)?,
            name: self.get(LAST_DEVICE_NAME)?,
        })
    }

    /// Persist the peripheral identity atomically. A `None` field removes
    /// the stored key so a stale name never outlives its address.
    pub fn save_peripheral_identity(&self, identity: &PersistedPeripheralIdentity) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in [
            (LAST_DEVICE_ADDRESS, identity.address.as_deref()),
            (LAST_DEVICE_NAME, identity.name.as_deref()),
        ] {
            match value {
                Some(value) => upsert(&tx, key, value)?,
                None => {
                    tx.execute("DELETE FROM preferences WHERE key = ?1", [key])?;
                }
            }
        }
        tx.commit()?;

        debug!(
            address = identity.address.as_deref().unwrap_or("<none>"),
            "Saved peripheral identity"
        );
        Ok(())
    }

    /// Forget the last connected peripheral.
    pub fn clear_peripheral_identity(&self) -> Result<()> {
        self.save_peripheral_identity(&PersistedPeripheralIdentity::default())
    }

    // === Emergency contact ===

    /// Configured emergency phone number, or [`DEFAULT_PHONE_NUMBER`].
    pub fn phone_number(&self) -> Result<String> {
        Ok(self
            .get(PHONE_NUMBER)?
            .unwrap_or_else(|| DEFAULT_PHONE_NUMBER.to_string()))
    }

    /// Set the emergency phone number.
    pub fn set_phone_number(&self, number: &str) -> Result<()> {
        let number = number.trim();
        if !is_valid_phone_number(number) {
            return Err(Error::InvalidPhoneNumber(number.to_string()));
        }
        self.set(PHONE_NUMBER, number)
    }
}

fn upsert(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
        rusqlite::params![key, value, now],
    )?;
    Ok(())
}

fn is_valid_phone_number(number: &str) -> bool {
    let digits = number.strip_prefix('+').unwrap_or(number);
    digits.chars().any(|c| c.is_ascii_digit())
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_number_validation() {
        assert!(is_valid_phone_number("6121692423"));
        assert!(is_valid_phone_number("+52 612-169-2423"));
        assert!(!is_valid_phone_number(""));
        assert!(!is_valid_phone_number("+"));
        assert!(!is_valid_phone_number("612abc"));
        assert!(!is_valid_phone_number("61+2"));
    }

    #[test]
    fn test_get_missing_key() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get("nope").unwrap(), None);
        assert!(!store.remove("nope").unwrap());
    }

    #[test]
    fn test_set_overwrites() {
        let store = Store::open_in_memory().unwrap();
        store.set("k", "one").unwrap();
        store.set("k", "two").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("two"));
        assert_eq!(store.preferences().unwrap().len(), 1);
    }
}
