//! SQLite implementation of [`ProjectStore`].
//!
//! [`SqliteStore`] keeps every project in one database file with WAL mode,
//! a transaction on every write, and automatic schema migrations. Snapshots
//! and histories are stored as JSON TEXT columns.

use rusqlite::{params, Connection, OptionalExtension};

use rflow_core::SceneGraph;

use crate::error::StorageError;
use crate::traits::ProjectStore;
use crate::types::{ProjectId, ProjectSummary};

/// SQLite-backed implementation of [`ProjectStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    /// Verifies a project exists, returning an error if not.
    fn assert_project_exists(&self, id: &ProjectId) -> Result<(), StorageError> {
        if !self.exists(id)? {
            return Err(StorageError::ProjectNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl ProjectStore for SqliteStore {
    fn create_project(&mut self, name: &str) -> Result<ProjectId, StorageError> {
        let id = ProjectId::from_name(name);
        if self.exists(&id)? {
            return Err(StorageError::ProjectExists(id.to_string()));
        }
        let json = serde_json::to_string(&SceneGraph::new())?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO projects (id, snapshot_json) VALUES (?1, ?2)",
            params![id.as_str(), json],
        )?;
        tx.commit()?;
        tracing::info!(project = %id, "created project row");
        Ok(id)
    }

    fn exists(&self, id: &ProjectId) -> Result<bool, StorageError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn list_projects(&self) -> Result<Vec<ProjectSummary>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM projects ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(ProjectSummary::new(ProjectId(row?)));
        }
        Ok(result)
    }

    fn delete_project(&mut self, id: &ProjectId) -> Result<(), StorageError> {
        self.assert_project_exists(id)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM histories WHERE project_id = ?1",
            params![id.as_str()],
        )?;
        tx.execute("DELETE FROM projects WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;
        Ok(())
    }

    fn load_snapshot(&self, id: &ProjectId) -> Result<SceneGraph, StorageError> {
        let json: String = self
            .conn
            .query_row(
                "SELECT snapshot_json FROM projects WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::ProjectNotFound(id.to_string()))?;
        Ok(serde_json::from_str(&json)?)
    }

    fn save_snapshot(&mut self, id: &ProjectId, scene: &SceneGraph) -> Result<(), StorageError> {
        self.assert_project_exists(id)?;
        let json = serde_json::to_string(scene)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE projects SET snapshot_json = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id.as_str(), json],
        )?;
        tx.commit()?;
        tracing::debug!(project = %id, "saved snapshot row");
        Ok(())
    }

    fn load_history(&self, id: &ProjectId) -> Result<Option<String>, StorageError> {
        self.assert_project_exists(id)?;
        let history = self
            .conn
            .query_row(
                "SELECT history_json FROM histories WHERE project_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(history)
    }

    fn save_history(&mut self, id: &ProjectId, history: &str) -> Result<(), StorageError> {
        self.assert_project_exists(id)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO histories (project_id, history_json) VALUES (?1, ?2)
             ON CONFLICT(project_id) DO UPDATE SET history_json = excluded.history_json, updated_at = datetime('now')",
            params![id.as_str(), history],
        )?;
        tx.commit()?;
        Ok(())
    }
}
