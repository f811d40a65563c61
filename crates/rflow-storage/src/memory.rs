//! In-memory implementation of [`ProjectStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and ephemeral
//! sessions. Snapshots are kept as serialized JSON so a load goes through
//! the same deserialization path as the on-disk backends.
//!
//! The store can be told to reject saves ([`InMemoryStore::set_fail_saves`])
//! to exercise persistence-failure handling.

use std::collections::BTreeMap;

use rflow_core::SceneGraph;

use crate::error::StorageError;
use crate::traits::ProjectStore;
use crate::types::{ProjectId, ProjectSummary};

#[derive(Debug, Clone, Default)]
struct StoredProject {
    snapshot: String,
    history: Option<String>,
}

/// Project documents held in memory, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    projects: BTreeMap<ProjectId, StoredProject>,
    fail_saves: bool,
    saves: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every snapshot and history write fails with
    /// [`StorageError::SaveRejected`].
    pub fn set_fail_saves(&mut self, fail: bool) {
        self.fail_saves = fail;
    }

    /// Number of successful snapshot or history writes so far.
    pub fn save_count(&self) -> usize {
        self.saves
    }

    fn stored(&self, id: &ProjectId) -> Result<&StoredProject, StorageError> {
        self.projects
            .get(id)
            .ok_or_else(|| StorageError::ProjectNotFound(id.to_string()))
    }

    fn writable(&mut self, id: &ProjectId) -> Result<&mut StoredProject, StorageError> {
        if self.fail_saves {
            return Err(StorageError::SaveRejected {
                reason: "store is read-only".to_string(),
            });
        }
        self.projects
            .get_mut(id)
            .ok_or_else(|| StorageError::ProjectNotFound(id.to_string()))
    }
}

impl ProjectStore for InMemoryStore {
    fn create_project(&mut self, name: &str) -> Result<ProjectId, StorageError> {
        let id = ProjectId::from_name(name);
        if self.projects.contains_key(&id) {
            return Err(StorageError::ProjectExists(id.to_string()));
        }
        let snapshot = serde_json::to_string(&SceneGraph::new())?;
        self.projects.insert(
            id.clone(),
            StoredProject {
                snapshot,
                history: None,
            },
        );
        Ok(id)
    }

    fn exists(&self, id: &ProjectId) -> Result<bool, StorageError> {
        Ok(self.projects.contains_key(id))
    }

    fn list_projects(&self) -> Result<Vec<ProjectSummary>, StorageError> {
        Ok(self
            .projects
            .keys()
            .cloned()
            .map(ProjectSummary::new)
            .collect())
    }

    fn delete_project(&mut self, id: &ProjectId) -> Result<(), StorageError> {
        self.projects
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::ProjectNotFound(id.to_string()))
    }

    fn load_snapshot(&self, id: &ProjectId) -> Result<SceneGraph, StorageError> {
        let stored = self.stored(id)?;
        Ok(serde_json::from_str(&stored.snapshot)?)
    }

    fn save_snapshot(&mut self, id: &ProjectId, scene: &SceneGraph) -> Result<(), StorageError> {
        let json = serde_json::to_string(scene)?;
        self.writable(id)?.snapshot = json;
        self.saves += 1;
        Ok(())
    }

    fn load_history(&self, id: &ProjectId) -> Result<Option<String>, StorageError> {
        Ok(self.stored(id)?.history.clone())
    }

    fn save_history(&mut self, id: &ProjectId, history: &str) -> Result<(), StorageError> {
        self.writable(id)?.history = Some(history.to_string());
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rflow_core::{ModuleType, Node, Point};

    #[test]
    fn failing_saves_keep_previous_state() {
        let mut store = InMemoryStore::new();
        let id = store.create_project("p").unwrap();
        let mut scene = SceneGraph::new();
        scene
            .insert_node(Node::step(ModuleType::Input, Point::default(), "a"))
            .unwrap();

        store.set_fail_saves(true);
        assert!(matches!(
            store.save_snapshot(&id, &scene),
            Err(StorageError::SaveRejected { .. })
        ));
        assert_eq!(store.load_snapshot(&id).unwrap().node_count(), 0);
        assert_eq!(store.save_count(), 0);

        store.set_fail_saves(false);
        store.save_snapshot(&id, &scene).unwrap();
        assert_eq!(store.load_snapshot(&id).unwrap(), scene);
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn history_absent_until_saved() {
        let mut store = InMemoryStore::new();
        let id = store.create_project("p").unwrap();
        assert_eq!(store.load_history(&id).unwrap(), None);
        store.save_history(&id, "{}").unwrap();
        assert_eq!(store.load_history(&id).unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn delete_and_list() {
        let mut store = InMemoryStore::new();
        let a = store.create_project("alpha").unwrap();
        store.create_project("beta").unwrap();
        store.delete_project(&a).unwrap();
        let listed = store.list_projects().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.as_str(), "beta");
        assert!(store.delete_project(&a).is_err());
    }
}
