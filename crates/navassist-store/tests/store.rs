//! Store behavior against on-disk databases.

use navassist_store::{
    DEFAULT_PHONE_NUMBER, Error, LAST_DEVICE_ADDRESS, LAST_DEVICE_NAME, PHONE_NUMBER, Store,
};
use navassist_types::PersistedPeripheralIdentity;
use tempfile::TempDir;

const ADDR: &str = "AA:BB:CC:DD:EE:FF";

#[test]
fn identity_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("data.db");

    {
        let store = Store::open(&path).unwrap();
        store
            .save_peripheral_identity(&PersistedPeripheralIdentity {
                address: Some(ADDR.to_string()),
                name: Some("NavCane".to_string()),
            })
            .unwrap();
    }

    let store = Store::open(&path).unwrap();
    let identity = store.peripheral_identity().unwrap();
    assert_eq!(identity.address.as_deref(), Some(ADDR));
    assert_eq!(identity.name.as_deref(), Some("NavCane"));
}

#[test]
fn fresh_database_has_empty_identity() {
    let store = Store::open_in_memory().unwrap();
    let identity = store.peripheral_identity().unwrap();
    assert!(identity.is_empty());
    assert!(store.preferences().unwrap().is_empty());
}

#[test]
fn saving_none_name_removes_stale_name() {
    let store = Store::open_in_memory().unwrap();
    store
        .save_peripheral_identity(&PersistedPeripheralIdentity {
            address: Some(ADDR.to_string()),
            name: Some("Old".to_string()),
        })
        .unwrap();
    store
        .save_peripheral_identity(&PersistedPeripheralIdentity {
            address: Some("11:22:33:44:55:66".to_string()),
            name: None,
        })
        .unwrap();

    assert_eq!(store.get(LAST_DEVICE_NAME).unwrap(), None);
    assert_eq!(
        store.get(LAST_DEVICE_ADDRESS).unwrap().as_deref(),
        Some("11:22:33:44:55:66")
    );
}

#[test]
fn clear_identity_keeps_phone_number() {
    let store = Store::open_in_memory().unwrap();
    store.set_phone_number("+52 612 000 0000").unwrap();
    store
        .save_peripheral_identity(&PersistedPeripheralIdentity {
            address: Some(ADDR.to_string()),
            name: None,
        })
        .unwrap();

    store.clear_peripheral_identity().unwrap();

    assert!(store.peripheral_identity().unwrap().is_empty());
    assert_eq!(store.phone_number().unwrap(), "+52 612 000 0000");
    let keys: Vec<_> = store
        .preferences()
        .unwrap()
        .into_iter()
        .map(|p| p.key)
        .collect();
    assert_eq!(keys, vec![PHONE_NUMBER.to_string()]);
}

#[test]
fn phone_number_defaults_and_validates() {
    let store = Store::open_in_memory().unwrap();
    assert_eq!(store.phone_number().unwrap(), DEFAULT_PHONE_NUMBER);

    let err = store.set_phone_number("call me").unwrap_err();
    assert!(matches!(err, Error::InvalidPhoneNumber(_)));
    assert_eq!(store.phone_number().unwrap(), DEFAULT_PHONE_NUMBER);

    store.set_phone_number("  5550001111 ").unwrap();
    assert_eq!(store.phone_number().unwrap(), "5550001111");
}

#[test]
fn preferences_record_write_time() {
    let store = Store::open_in_memory().unwrap();
    let before = time::OffsetDateTime::now_utc().unix_timestamp();
    store.set("greeting", "hola").unwrap();

    let prefs = store.preferences().unwrap();
    assert_eq!(prefs.len(), 1);
    assert_eq!(prefs[0].value, "hola");
    assert!(prefs[0].updated_at.unix_timestamp() >= before);
}
