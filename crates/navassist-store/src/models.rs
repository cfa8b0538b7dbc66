//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Preference key holding the last connected peripheral's address.
pub const LAST_DEVICE_ADDRESS: &str = "last_device_address";

/// Preference key holding the last connected peripheral's name.
pub const LAST_DEVICE_NAME: &str = "last_device_name";

/// Preference key holding the emergency contact's phone number.
pub const PHONE_NUMBER: &str = "phone_number";

/// A stored preference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub key: String,
    pub value: String,
    /// Last time the value was written.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
