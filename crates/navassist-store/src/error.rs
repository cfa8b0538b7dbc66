//! Error types for navassist-store.

use std::path::PathBuf;

/// Result type for navassist-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in navassist-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Stored timestamp could not be converted.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Phone number is empty or contains characters other than digits,
    /// spaces, dashes and a leading `+`.
    #[error("Invalid phone number: {0:?}")]
    InvalidPhoneNumber(String),

    /// Database was written by a newer version.
    #[error("Unsupported schema version {found} (newest known is {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },
}
