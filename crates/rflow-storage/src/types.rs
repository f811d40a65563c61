//! Storage-layer types for project identity and listing.
//!
//! [`ProjectId`] lives here rather than in rflow-core because project
//! identity is a storage concern: a scene only gains an id when persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fallback used when a requested name sanitizes to nothing.
pub const UNTITLED_PROJECT: &str = "Untitled_Project";

/// Unique identifier for a stored project.
///
/// Always a sanitized name (see [`sanitize_project_name`]), so it doubles as
/// a directory name for [`DirStore`](crate::dir::DirStore).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl ProjectId {
    /// Builds an id from a user-supplied project name.
    pub fn from_name(name: &str) -> Self {
        ProjectId(sanitize_project_name(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Summary of a stored project (for listing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    /// Display name: the id with underscores shown as spaces.
    pub name: String,
}

impl ProjectSummary {
    pub fn new(id: ProjectId) -> Self {
        let name = id.0.replace('_', " ");
        ProjectSummary { id, name }
    }
}

/// Makes a project name safe for use as a directory name.
///
/// Spaces become underscores and anything outside `[A-Za-z0-9_-]` is
/// dropped. Empty results fall back to [`UNTITLED_PROJECT`].
pub fn sanitize_project_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        UNTITLED_PROJECT.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_spaces_and_drops_symbols() {
        assert_eq!(sanitize_project_name("My Study: v2!"), "My_Study_v2");
        assert_eq!(sanitize_project_name("  deep-learning  "), "deep-learning");
    }

    #[test]
    fn sanitize_falls_back_when_empty() {
        assert_eq!(sanitize_project_name("???"), UNTITLED_PROJECT);
        assert_eq!(sanitize_project_name(""), UNTITLED_PROJECT);
    }

    #[test]
    fn summary_name_from_id() {
        let summary = ProjectSummary::new(ProjectId::from_name("Graph Survey"));
        assert_eq!(summary.id.as_str(), "Graph_Survey");
        assert_eq!(summary.name, "Graph Survey");
    }
}
