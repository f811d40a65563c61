//! Directory-backed implementation of [`ProjectStore`].
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<project-id>/project_data.json
//! <root>/<project-id>/undo_history.json
//! <root>/<project-id>/assets/papers/
//! <root>/<project-id>/assets/images/
//! ```
//!
//! Files are written to a sibling temp file and renamed into place, so a
//! crash mid-save leaves the previous document intact.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rflow_core::SceneGraph;

use crate::error::StorageError;
use crate::traits::ProjectStore;
use crate::types::{ProjectId, ProjectSummary};

pub const SNAPSHOT_FILE: &str = "project_data.json";
pub const HISTORY_FILE: &str = "undo_history.json";
pub const PAPERS_DIR: &str = "assets/papers";
pub const IMAGES_DIR: &str = "assets/images";

const ASSET_DIRS: [&str; 2] = [PAPERS_DIR, IMAGES_DIR];

/// Stores each project as a directory of JSON files.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(DirStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, id: &ProjectId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Where dropped markdown papers are copied.
    pub fn papers_dir(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(PAPERS_DIR)
    }

    /// Where embedded images are copied.
    pub fn images_dir(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(IMAGES_DIR)
    }

    fn snapshot_path(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(SNAPSHOT_FILE)
    }

    fn history_path(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(HISTORY_FILE)
    }

    /// Resolves `assets/papers/<file>` or `assets/images/<file>`. Anything
    /// else, including nested or parent paths, does not resolve.
    fn asset_path(&self, id: &ProjectId, relative: &str) -> Option<PathBuf> {
        let (dir, name) = relative.rsplit_once('/')?;
        if !ASSET_DIRS.contains(&dir) || name.is_empty() || name == "." || name == ".." {
            return None;
        }
        Some(self.project_dir(id).join(dir).join(name))
    }

    fn require(&self, id: &ProjectId) -> Result<(), StorageError> {
        if !self.snapshot_path(id).is_file() {
            return Err(StorageError::ProjectNotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Writes `contents` to `path` via a temp file and rename.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ProjectStore for DirStore {
    fn create_project(&mut self, name: &str) -> Result<ProjectId, StorageError> {
        let id = ProjectId::from_name(name);
        if self.snapshot_path(&id).exists() {
            return Err(StorageError::ProjectExists(id.to_string()));
        }
        fs::create_dir_all(self.papers_dir(&id))?;
        fs::create_dir_all(self.images_dir(&id))?;
        let bytes = serde_json::to_vec_pretty(&SceneGraph::new())?;
        write_atomic(&self.snapshot_path(&id), &bytes)?;
        tracing::info!(project = %id, root = %self.root.display(), "created project directory");
        Ok(id)
    }

    fn exists(&self, id: &ProjectId) -> Result<bool, StorageError> {
        Ok(self.snapshot_path(id).is_file())
    }

    fn list_projects(&self) -> Result<Vec<ProjectSummary>, StorageError> {
        let mut result = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(SNAPSHOT_FILE).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                result.push(ProjectSummary::new(ProjectId(name.to_string())));
            }
        }
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    fn delete_project(&mut self, id: &ProjectId) -> Result<(), StorageError> {
        self.require(id)?;
        fs::remove_dir_all(self.project_dir(id))?;
        Ok(())
    }

    fn load_snapshot(&self, id: &ProjectId) -> Result<SceneGraph, StorageError> {
        self.require(id)?;
        let bytes = fs::read(self.snapshot_path(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save_snapshot(&mut self, id: &ProjectId, scene: &SceneGraph) -> Result<(), StorageError> {
        self.require(id)?;
        let bytes = serde_json::to_vec_pretty(scene)?;
        write_atomic(&self.snapshot_path(id), &bytes)?;
        tracing::debug!(project = %id, bytes = bytes.len(), "saved snapshot");
        Ok(())
    }

    fn load_history(&self, id: &ProjectId) -> Result<Option<String>, StorageError> {
        self.require(id)?;
        let path = self.history_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn save_history(&mut self, id: &ProjectId, history: &str) -> Result<(), StorageError> {
        self.require(id)?;
        write_atomic(&self.history_path(id), history.as_bytes())?;
        Ok(())
    }

    fn orphaned_assets(
        &self,
        id: &ProjectId,
        referenced: &BTreeSet<String>,
    ) -> Result<Vec<String>, StorageError> {
        self.require(id)?;
        let mut orphans = Vec::new();
        for dir in ASSET_DIRS {
            let path = self.project_dir(id).join(dir);
            if !path.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&path)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let relative = format!("{}/{}", dir, name);
                if !referenced.contains(&relative) {
                    orphans.push(relative);
                }
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    fn remove_assets(&mut self, id: &ProjectId, paths: &[String]) -> Result<usize, StorageError> {
        self.require(id)?;
        let mut removed = 0;
        for relative in paths {
            let Some(path) = self.asset_path(id, relative) else {
                tracing::warn!(project = %id, path = %relative, "not an asset path, skipped");
                continue;
            };
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
                tracing::info!(project = %id, path = %relative, "removed orphaned asset");
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rflow_core::{ModuleType, Node, Point};

    #[test]
    fn create_lays_out_project_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(tmp.path()).unwrap();
        let id = store.create_project("Vision Survey").unwrap();
        assert_eq!(id.as_str(), "Vision_Survey");
        let dir = tmp.path().join("Vision_Survey");
        assert!(dir.join(SNAPSHOT_FILE).is_file());
        assert!(dir.join(PAPERS_DIR).is_dir());
        assert!(dir.join(IMAGES_DIR).is_dir());
        assert!(!dir.join(HISTORY_FILE).exists());
    }

    #[test]
    fn duplicate_create_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(tmp.path()).unwrap();
        store.create_project("p").unwrap();
        assert!(matches!(
            store.create_project("p"),
            Err(StorageError::ProjectExists(_))
        ));
    }

    #[test]
    fn snapshot_and_history_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(tmp.path()).unwrap();
        let id = store.create_project("p").unwrap();

        let mut scene = SceneGraph::new();
        scene
            .insert_node(Node::step(ModuleType::Decision, Point::new(3.0, 4.0), "split"))
            .unwrap();
        store.save_snapshot(&id, &scene).unwrap();
        store.save_history(&id, r#"{"format":1}"#).unwrap();

        let reopened = DirStore::new(tmp.path()).unwrap();
        assert_eq!(reopened.load_snapshot(&id).unwrap(), scene);
        assert_eq!(
            reopened.load_history(&id).unwrap().as_deref(),
            Some(r#"{"format":1}"#)
        );
    }

    #[test]
    fn missing_project_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::new(tmp.path()).unwrap();
        let id = ProjectId::from_name("ghost");
        assert!(!store.exists(&id).unwrap());
        assert!(matches!(
            store.load_snapshot(&id),
            Err(StorageError::ProjectNotFound(_))
        ));
    }

    #[test]
    fn list_skips_foreign_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(tmp.path()).unwrap();
        store.create_project("b").unwrap();
        store.create_project("a").unwrap();
        fs::create_dir(tmp.path().join("not-a-project")).unwrap();
        let ids: Vec<_> = store
            .list_projects()
            .unwrap()
            .into_iter()
            .map(|s| s.id.0)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn orphaned_assets_are_found_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(tmp.path()).unwrap();
        let id = store.create_project("p").unwrap();
        fs::write(store.papers_dir(&id).join("kept.md"), "# Kept").unwrap();
        fs::write(store.papers_dir(&id).join("stale.md"), "# Stale").unwrap();
        fs::write(store.images_dir(&id).join("fig.png"), [0u8; 4]).unwrap();

        let referenced: BTreeSet<String> = ["assets/papers/kept.md".to_string()].into();
        let orphans = store.orphaned_assets(&id, &referenced).unwrap();
        assert_eq!(orphans, vec!["assets/images/fig.png", "assets/papers/stale.md"]);

        assert_eq!(store.remove_assets(&id, &orphans).unwrap(), 2);
        assert!(store.papers_dir(&id).join("kept.md").is_file());
        assert!(!store.papers_dir(&id).join("stale.md").exists());
        assert!(store.orphaned_assets(&id, &referenced).unwrap().is_empty());
    }

    #[test]
    fn remove_assets_stays_inside_asset_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DirStore::new(tmp.path()).unwrap();
        let id = store.create_project("p").unwrap();
        let outside = vec![
            "assets/papers/../../project_data.json".to_string(),
            "project_data.json".to_string(),
            "assets/papers/..".to_string(),
        ];
        assert_eq!(store.remove_assets(&id, &outside).unwrap(), 0);
        assert!(store.exists(&id).unwrap());
    }
}
