//! Storage error types for rflow-storage.
//!
//! [`StorageError`] covers the failure modes of every backend: file and
//! database I/O, serialization, schema migration, and missing or duplicate
//! projects.

use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing a project file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A SQLite call failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// No project with the given id exists.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// A project with the given id already exists.
    #[error("project already exists: {0}")]
    ProjectExists(String),

    /// The backend refused the write.
    #[error("save rejected: {reason}")]
    SaveRejected { reason: String },
}
