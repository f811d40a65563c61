//! The [`ProjectStore`] trait defining the storage contract for projects.
//!
//! A project is persisted as two documents: the scene snapshot and the undo
//! history. Both are written after a command has settled, never during one.
//! All backends implement this trait so they are swappable without changing
//! the engine.

use std::collections::BTreeSet;

use rflow_core::SceneGraph;

use crate::error::StorageError;
use crate::types::{ProjectId, ProjectSummary};

/// The storage contract for ResearchFlow projects.
///
/// The trait is synchronous; a session owns its store exclusively.
pub trait ProjectStore {
    /// Creates a new project with an empty scene.
    ///
    /// The name is sanitized into a [`ProjectId`]. Fails with
    /// [`StorageError::ProjectExists`] if the id is taken.
    fn create_project(&mut self, name: &str) -> Result<ProjectId, StorageError>;

    /// Returns `true` if a project with this id exists.
    fn exists(&self, id: &ProjectId) -> Result<bool, StorageError>;

    /// Lists all stored projects, sorted by id.
    fn list_projects(&self) -> Result<Vec<ProjectSummary>, StorageError>;

    /// Deletes a project, its history and (for directory stores) its assets.
    fn delete_project(&mut self, id: &ProjectId) -> Result<(), StorageError>;

    /// Loads the scene snapshot as written. Callers run
    /// [`SceneGraph::repair`] themselves.
    fn load_snapshot(&self, id: &ProjectId) -> Result<SceneGraph, StorageError>;

    /// Overwrites the scene snapshot.
    fn save_snapshot(&mut self, id: &ProjectId, scene: &SceneGraph) -> Result<(), StorageError>;

    /// Loads the raw history document, if one was ever saved.
    fn load_history(&self, id: &ProjectId) -> Result<Option<String>, StorageError>;

    /// Overwrites the raw history document.
    fn save_history(&mut self, id: &ProjectId, history: &str) -> Result<(), StorageError>;

    /// Project-relative asset files kept for the project that no path in
    /// `referenced` names, sorted. Stores without asset folders have none.
    fn orphaned_assets(
        &self,
        _id: &ProjectId,
        _referenced: &BTreeSet<String>,
    ) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }

    /// Deletes project-relative asset files, returning how many were removed.
    fn remove_assets(&mut self, _id: &ProjectId, _paths: &[String]) -> Result<usize, StorageError> {
        Ok(0)
    }
}
