//! Error types for the asset store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by [`AssetStore`](super::AssetStore) implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Insert collided with the `(owner_id, checksum)` uniqueness constraint.
    ///
    /// This is the race signal: another request created the same asset first.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// Failed to open or create the database file.
    #[error("Failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a database migration.
    #[error("Database migration failed: {0}")]
    Migration(#[source] rusqlite::Error),

    /// A query failed.
    #[error("Database query failed: {0}")]
    Query(String),

    /// The transaction was already committed or rolled back.
    #[error("Transaction is no longer active")]
    TransactionClosed,

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("Database schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StoreError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}
