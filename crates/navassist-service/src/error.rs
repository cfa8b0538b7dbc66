//! Errors raised by the service's collaborators.

/// Result type for collaborator calls.
pub type Result<T> = std::result::Result<T, CollaboratorError>;

/// Failure of a geocoder, translator, speaker or SMS gateway.
///
/// None of these are fatal: the action handler logs them and falls back.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CollaboratorError {
    /// HTTP transport or status error.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote answered with something we can't use.
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    /// The speech program could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The speech program ran but reported failure.
    #[error("{program} exited with {status}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
    },

    /// Preference storage failed.
    #[error("Storage error: {0}")]
    Store(#[from] navassist_store::Error),

    /// Shared store mutex was poisoned by a panicking holder.
    #[error("Store lock poisoned")]
    LockPoisoned,
}
