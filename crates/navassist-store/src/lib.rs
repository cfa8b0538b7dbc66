//! Local preference storage for navassist.
//!
//! A small SQLite database that remembers the last connected peripheral
//! and the emergency contact's phone number across restarts.
//!
//! # Example
//!
//! ```no_run
//! use navassist_store::Store;
//!
//! let store = Store::open_default()?;
//! let identity = store.peripheral_identity()?;
//! println!("last device: {:?}", identity.address);
//! println!("emergency contact: {}", store.phone_number()?);
//! # Ok::<(), navassist_store::Error>(())
//! ```

mod error;
mod models;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{LAST_DEVICE_ADDRESS, LAST_DEVICE_NAME, PHONE_NUMBER, Preference};
pub use schema::SCHEMA_VERSION;
pub use store::{DEFAULT_PHONE_NUMBER, Store};

/// Default database path.
///
/// - Linux: `~/.local/share/navassist/data.db`
/// - macOS: `~/Library/Application Support/navassist/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\navassist\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("navassist")
        .join("data.db")
}
