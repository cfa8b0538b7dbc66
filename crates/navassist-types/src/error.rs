//! Error types for data parsing in navassist-types.

use thiserror::Error;

/// Errors that can occur when parsing peripheral data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in navassist-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Notification payload is not valid UTF-8.
    #[error("Notification payload is not valid UTF-8")]
    InvalidUtf8,

    /// Notification payload has the wrong number of comma-separated fields.
    #[error("Invalid field count: expected {expected}, got {actual}")]
    FieldCount {
        /// Number of fields the wire format requires.
        expected: usize,
        /// Number of fields found in the payload.
        actual: usize,
    },

    /// A numeric field could not be parsed.
    #[error("Invalid {field} field: '{value}'")]
    InvalidNumber {
        /// Name of the offending field.
        field: &'static str,
        /// The raw text of the field.
        value: String,
    },

    /// A peripheral address is neither a MAC address nor a platform UUID.
    #[error("Invalid peripheral address: '{0}'")]
    InvalidAddress(String),
}

/// Decode failures are parse errors; the alias names the notification path.
pub type DecodeError = ParseError;

/// Result type alias using navassist-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
