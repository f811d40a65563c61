//! Process configuration.
//!
//! Read from environment variables, then overridden by command-line flags:
//! - `RFLOW_PROJECTS_DIR`: directory holding projects (default: ".")
//! - `RFLOW_BACKEND`: `dir` or `sqlite` (default: "dir")
//! - `RFLOW_AUTOSAVE`: save after every command (default: "true")
//! - `RFLOW_HISTORY_LIMIT`: undo depth, capped at 100 (default: "100")

use std::path::PathBuf;

use clap::ValueEnum;
use rflow_engine::{SessionConfig, DEFAULT_LIMIT};

/// File name of the SQLite database inside the projects directory.
pub const SQLITE_FILE: &str = "researchflow.db";

/// Which store backs the projects directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// One directory per project.
    Dir,
    /// Every project in a single SQLite database.
    Sqlite,
}

impl Backend {
    fn parse(value: &str) -> Option<Backend> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dir" | "directory" => Some(Backend::Dir),
            "sqlite" | "db" => Some(Backend::Sqlite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend: Backend,
    pub projects_dir: PathBuf,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Config {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unparseable values fall back to
    /// the defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Config {
        let projects_dir = lookup("RFLOW_PROJECTS_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let backend = match lookup("RFLOW_BACKEND") {
            Some(value) => Backend::parse(&value).unwrap_or_else(|| {
                tracing::warn!(%value, "unknown RFLOW_BACKEND, using dir");
                Backend::Dir
            }),
            None => Backend::Dir,
        };

        let autosave = match lookup("RFLOW_AUTOSAVE") {
            Some(value) => parse_bool(&value).unwrap_or_else(|| {
                tracing::warn!(%value, "unknown RFLOW_AUTOSAVE, using true");
                true
            }),
            None => true,
        };

        let limit = match lookup("RFLOW_HISTORY_LIMIT") {
            Some(value) => value.trim().parse::<usize>().unwrap_or_else(|_| {
                tracing::warn!(%value, "invalid RFLOW_HISTORY_LIMIT, using default");
                DEFAULT_LIMIT
            }),
            None => DEFAULT_LIMIT,
        };

        Config {
            backend,
            projects_dir,
            session: SessionConfig::default()
                .with_history_limit(limit)
                .with_autosave(autosave),
        }
    }

    /// Applies command-line overrides.
    pub fn with_overrides(mut self, backend: Option<Backend>, dir: Option<PathBuf>) -> Config {
        if let Some(backend) = backend {
            self.backend = backend;
        }
        if let Some(dir) = dir {
            self.projects_dir = dir;
        }
        self
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.projects_dir.join(SQLITE_FILE)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rflow_engine::MAX_LIMIT;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]);
        assert_eq!(config.backend, Backend::Dir);
        assert_eq!(config.projects_dir, PathBuf::from("."));
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = config(&[
            ("RFLOW_PROJECTS_DIR", "/tmp/projects"),
            ("RFLOW_BACKEND", "SQLite"),
            ("RFLOW_AUTOSAVE", "off"),
            ("RFLOW_HISTORY_LIMIT", "25"),
        ]);
        assert_eq!(config.backend, Backend::Sqlite);
        assert_eq!(config.projects_dir, PathBuf::from("/tmp/projects"));
        assert!(!config.session.autosave);
        assert_eq!(config.session.history_limit, 25);
        assert_eq!(
            config.sqlite_path(),
            PathBuf::from("/tmp/projects").join(SQLITE_FILE)
        );
    }

    #[test]
    fn history_limit_is_capped() {
        assert_eq!(
            config(&[("RFLOW_HISTORY_LIMIT", "5000")]).session.history_limit,
            MAX_LIMIT
        );
        assert_eq!(config(&[("RFLOW_HISTORY_LIMIT", "0")]).session.history_limit, 1);
    }

    #[test]
    fn bad_values_fall_back() {
        let config = config(&[
            ("RFLOW_BACKEND", "postgres"),
            ("RFLOW_AUTOSAVE", "maybe"),
            ("RFLOW_HISTORY_LIMIT", "lots"),
        ]);
        assert_eq!(config.backend, Backend::Dir);
        assert!(config.session.autosave);
        assert_eq!(config.session.history_limit, DEFAULT_LIMIT);
    }

    #[test]
    fn flags_override_environment() {
        let config = config(&[("RFLOW_BACKEND", "sqlite"), ("RFLOW_PROJECTS_DIR", "a")])
            .with_overrides(Some(Backend::Dir), Some(PathBuf::from("b")));
        assert_eq!(config.backend, Backend::Dir);
        assert_eq!(config.projects_dir, PathBuf::from("b"));

        let kept = config.clone().with_overrides(None, None);
        assert_eq!(kept, config);
    }
}
