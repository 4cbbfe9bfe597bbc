//! Storage error types.

use thiserror::Error;

/// Content store, lock and publish errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// An upload lock is active for the bundle; readers must back off.
    #[error("update in progress for {0}")]
    UpdateInProgress(String),

    /// Another publisher holds the staging area for the bundle.
    #[error("another publish is already running for {0}")]
    PublishInProgress(String),

    /// The uploaded bundle is unusable (missing or malformed descriptor,
    /// reserved file names, fields after files).
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// A required publish field is missing or empty.
    #[error("missing field: {0}")]
    MissingField(String),

    /// The upload body could not be read to the end.
    #[error("upload failed: {0}")]
    Upload(String),

    /// A bundle on disk disagrees with its own descriptor.
    #[error("metadata corrupt: {0}")]
    MetadataCorrupt(String),

    #[error("readers of {key} did not drain within {waited_secs}s")]
    DrainTimeout { key: String, waited_secs: u64 },

    /// The swap completed but the upload lock could not be removed from the
    /// new live bundle. Reads stay refused until an operator clears it.
    #[error("upload lock stranded on {key}: {reason}")]
    LockStranded { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] hatch_core::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Map a missing file to [`StorageError::NotFound`], keeping other I/O errors.
pub(crate) fn not_found_or_io(err: std::io::Error, what: impl Into<String>) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(what.into())
    } else {
        StorageError::Io(err)
    }
}
