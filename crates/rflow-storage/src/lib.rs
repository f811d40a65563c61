//! Persistence for ResearchFlow projects.
//!
//! Provides the [`ProjectStore`] trait that every backend implements, plus
//! three backends:
//!
//! - [`DirStore`]: one directory per project with `project_data.json`,
//!   `undo_history.json` and an `assets/` tree. The default.
//! - [`SqliteStore`]: all projects in one SQLite database.
//! - [`InMemoryStore`]: tests and ephemeral sessions.
//!
//! Snapshots are stored as JSON. Undo history is stored as an opaque JSON
//! document owned by the engine; the store never interprets it.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: ProjectId, ProjectSummary and project name sanitizing
//! - [`traits`]: ProjectStore trait definition
//! - [`hash`]: blake3 snapshot fingerprints
//! - [`dir`], [`memory`], [`sqlite`]: the backends
//! - [`schema`]: SQL migrations for the SQLite backend

pub mod dir;
pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use dir::DirStore;
pub use error::StorageError;
pub use hash::snapshot_fingerprint;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::ProjectStore;
pub use types::{sanitize_project_name, ProjectId, ProjectSummary};
