//! Error types for bluehub-store.

use std::path::PathBuf;

/// Result type for bluehub-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bluehub-store.
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

    /// A stored entity could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database was written by a newer version of bluehub.
    #[error("Unsupported schema version {found} (newest known is {supported})")]
    SchemaVersion { found: i32, supported: i32 },
}

impl From<Error> for bluehub_core::Error {
    fn from(err: Error) -> Self {
        bluehub_core::Error::store(err)
    }
}
