//! ResearchFlow command-line tools.
//!
//! Provides the `rflow` binary for working with stored projects without the
//! canvas: creating and inspecting projects, stepping through their undo
//! history, importing outlines and papers, and checking snapshots for
//! dangling references.
//!
//! Every subcommand goes through the same [`Session`] the editor uses, so
//! undo, redo and import behave exactly as they do on the canvas.
//! Configuration is read from the environment (see [`config`]) and
//! overridden by the global `--backend` and `--dir` flags.

mod config;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use rflow_core::{NodeId, RepairReport, SceneGraph};
use rflow_engine::import::reference_position;
use rflow_engine::{EntrySummary, History, Outcome, Session, SessionError};
use rflow_storage::dir::PAPERS_DIR;
use rflow_storage::{
    snapshot_fingerprint, DirStore, ProjectId, ProjectStore, SqliteStore, StorageError,
};

use crate::config::{Backend, Config};

/// ResearchFlow project tools.
#[derive(Parser, Debug)]
#[command(name = "rflow", version, about = "ResearchFlow project tools")]
struct Cli {
    /// Storage backend (default: $RFLOW_BACKEND, then dir).
    #[arg(long, value_enum, global = true)]
    backend: Option<Backend>,

    /// Projects directory (default: $RFLOW_PROJECTS_DIR, then ".").
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Open a project and print its contents.
    Open {
        /// Project name.
        name: String,

        /// Create the project if it does not exist.
        #[arg(long)]
        create: bool,
    },

    /// Create an empty project.
    New { name: String },

    /// Print a project's counts and load status.
    Info { name: String },

    /// Print the undo and redo stacks, newest first.
    History { name: String },

    /// Undo the most recent steps.
    Undo {
        name: String,

        /// Number of steps.
        #[arg(short = 'n', long, default_value_t = 1)]
        steps: usize,
    },

    /// Redo the most recently undone steps.
    Redo {
        name: String,

        #[arg(short = 'n', long, default_value_t = 1)]
        steps: usize,
    },

    /// Import an outline, or a markdown paper as a reference node.
    Import {
        name: String,

        /// `.md` files become a reference node; anything else is an outline.
        file: PathBuf,
    },

    /// List stored projects.
    List,

    /// Check a snapshot for dangling references and orphaned asset files.
    Check {
        name: String,

        /// Write the repaired snapshot back and delete orphaned assets.
        /// Resets the undo history.
        #[arg(long)]
        fix: bool,
    },

    /// Delete a project and its assets.
    Delete { name: String },
}

/// Where a backend keeps copies of imported papers, if it keeps files.
trait PaperStore: ProjectStore {
    fn paper_dir(&self, _id: &ProjectId) -> Option<PathBuf> {
        None
    }
}

impl PaperStore for DirStore {
    fn paper_dir(&self, id: &ProjectId) -> Option<PathBuf> {
        Some(self.papers_dir(id))
    }
}

impl PaperStore for SqliteStore {}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not errors.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    let config = Config::from_env().with_overrides(cli.backend, cli.dir);
    process::exit(dispatch(&config, cli.command));
}

/// Opens the configured store and runs `command` against it.
///
/// Returns exit code: 0 = success, 1 = command error, 2 = project load
/// failure, 3 = I/O or save error.
fn dispatch(config: &Config, command: Commands) -> i32 {
    match config.backend {
        Backend::Dir => match DirStore::new(&config.projects_dir) {
            Ok(store) => run(store, config, command),
            Err(e) => {
                eprintln!(
                    "Error: failed to open projects directory '{}': {}",
                    config.projects_dir.display(),
                    e
                );
                3
            }
        },
        Backend::Sqlite => {
            if let Err(e) = fs::create_dir_all(&config.projects_dir) {
                eprintln!(
                    "Error: failed to create '{}': {}",
                    config.projects_dir.display(),
                    e
                );
                return 3;
            }
            let path = config.sqlite_path();
            match SqliteStore::new(&path.to_string_lossy()) {
                Ok(store) => run(store, config, command),
                Err(e) => {
                    eprintln!("Error: failed to open database '{}': {}", path.display(), e);
                    3
                }
            }
        }
    }
}

fn run<S: PaperStore>(mut store: S, config: &Config, command: Commands) -> i32 {
    match command {
        Commands::Open { name, create } => run_open(store, config, &name, create),
        Commands::New { name } => match Session::create(store, &name, config.session.clone()) {
            Ok(session) => print_json(&Summary::of(&session)),
            Err(e) => {
                eprintln!("Error: failed to create project '{}': {}", name, e);
                exit_code(&e)
            }
        },
        Commands::Info { name } => match open(store, config, &name) {
            Ok(session) => print_json(&Summary::of(&session)),
            Err(code) => code,
        },
        Commands::History { name } => match open(store, config, &name) {
            Ok(session) => print_json(&HistoryView::of(&session)),
            Err(code) => code,
        },
        Commands::Undo { name, steps } => run_steps(store, config, &name, steps, Step::Undo),
        Commands::Redo { name, steps } => run_steps(store, config, &name, steps, Step::Redo),
        Commands::Import { name, file } => run_import(store, config, &name, &file),
        Commands::List => match store.list_projects() {
            Ok(projects) => print_json(&projects),
            Err(e) => {
                eprintln!("Error: failed to list projects: {}", e);
                3
            }
        },
        Commands::Check { name, fix } => run_check(store, config, &name, fix),
        Commands::Delete { name } => {
            let id = ProjectId::from_name(&name);
            match store.delete_project(&id) {
                Ok(()) => {
                    tracing::info!(project = %id, "deleted project");
                    0
                }
                Err(StorageError::ProjectNotFound(_)) => {
                    eprintln!("Error: project '{}' not found", id);
                    1
                }
                Err(e) => {
                    eprintln!("Error: failed to delete project '{}': {}", id, e);
                    3
                }
            }
        }
    }
}

/// Opens `name`, reporting failures. The error is the exit code.
fn open<S: PaperStore>(store: S, config: &Config, name: &str) -> Result<Session<S>, i32> {
    let id = ProjectId::from_name(name);
    Session::open(store, id.clone(), config.session.clone()).map_err(|e| {
        eprintln!("Error: failed to load project '{}': {}", id, e);
        2
    })
}

fn run_open<S: PaperStore>(store: S, config: &Config, name: &str, create: bool) -> i32 {
    let id = ProjectId::from_name(name);
    let exists = match store.exists(&id) {
        Ok(exists) => exists,
        Err(e) => {
            eprintln!("Error: failed to look up project '{}': {}", id, e);
            return 3;
        }
    };
    let session = if exists {
        open(store, config, name)
    } else if create {
        Session::create(store, name, config.session.clone()).map_err(|e| {
            eprintln!("Error: failed to create project '{}': {}", id, e);
            exit_code(&e)
        })
    } else {
        eprintln!("Error: project '{}' not found (use --create)", id);
        Err(2)
    };
    match session {
        Ok(session) => {
            if let Some(warning) = &session.load_report().history_warning {
                eprintln!("Warning: undo history discarded: {}", warning);
            }
            print_json(&OpenView {
                summary: Summary::of(&session),
                nodes: NodeView::all(&session),
            })
        }
        Err(code) => code,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Undo,
    Redo,
}

fn run_steps<S: PaperStore>(store: S, config: &Config, name: &str, steps: usize, step: Step) -> i32 {
    let mut session = match open(store, config, name) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let mut done = Vec::new();
    let mut code = 0;
    for _ in 0..steps {
        let result = match step {
            Step::Undo => session.undo(),
            Step::Redo => session.redo(),
        };
        match result {
            Ok(Some(outcome)) => {
                let failed = outcome.save_error.clone();
                done.push(StepView::from(&outcome));
                if let Some(e) = failed {
                    eprintln!("Error: failed to save: {}", e);
                    code = 3;
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                code = exit_code(&e);
                break;
            }
        }
    }
    if done.is_empty() && code == 0 {
        eprintln!(
            "Nothing to {}",
            if step == Step::Undo { "undo" } else { "redo" }
        );
    }

    let report = StepsView {
        steps: done,
        undo: session.history().undo_len(),
        redo: session.history().redo_len(),
        saved: session.config().autosave,
    };
    let printed = print_json(&report);
    if code != 0 {
        code
    } else {
        printed
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
}

/// Copies `source` into `dir` under a free file name, returning that name.
fn copy_paper(source: &Path, dir: &Path, file_name: &str) -> io::Result<String> {
    fs::create_dir_all(dir)?;
    let original = Path::new(file_name);
    let stem = original
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("paper");
    let ext = original
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("md");

    let mut stored = file_name.to_string();
    let mut n = 1;
    while dir.join(&stored).exists() {
        stored = format!("{}_{}.{}", stem, n, ext);
        n += 1;
    }
    fs::copy(source, dir.join(&stored))?;
    Ok(stored)
}

fn run_import<S: PaperStore>(store: S, config: &Config, name: &str, file: &Path) -> i32 {
    let content = match fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: failed to read '{}': {}", file.display(), e);
            return 3;
        }
    };
    let mut session = match open(store, config, name) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let result = if is_markdown(file) {
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("paper.md")
            .to_string();
        let source_path = match session.store().paper_dir(session.id()) {
            Some(dir) => match copy_paper(file, &dir, &file_name) {
                Ok(stored) => format!("{}/{}", PAPERS_DIR, stored),
                Err(e) => {
                    eprintln!("Error: failed to copy paper into '{}': {}", dir.display(), e);
                    return 3;
                }
            },
            None => file.display().to_string(),
        };
        let position = reference_position(session.graph());
        session.import_markdown(&file_name, &content, position, &source_path)
    } else {
        session.import_outline(&content)
    };

    match result {
        Ok(outcome) => {
            let printed = print_json(&StepView::from(&outcome));
            match outcome.save_error {
                Some(e) => {
                    eprintln!("Error: failed to save: {}", e);
                    3
                }
                None => printed,
            }
        }
        Err(e) => {
            eprintln!("Error: import of '{}' failed: {}", file.display(), e);
            exit_code(&e)
        }
    }
}

fn run_check<S: PaperStore>(mut store: S, config: &Config, name: &str, fix: bool) -> i32 {
    let id = ProjectId::from_name(name);
    let mut graph = match store.load_snapshot(&id) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Error: failed to load project '{}': {}", id, e);
            return 2;
        }
    };
    let repair = graph.repair();
    let orphaned_assets = match store.orphaned_assets(&id, &graph.referenced_assets()) {
        Ok(orphans) => orphans,
        Err(e) => {
            eprintln!("Error: failed to scan assets of project '{}': {}", id, e);
            return 3;
        }
    };
    let clean = repair.is_clean() && orphaned_assets.is_empty();
    let fixed = fix && !clean;
    let mut assets_removed = 0;
    if fixed {
        // Undone steps may still point at removed files, so history restarts.
        let result = match store.remove_assets(&id, &orphaned_assets) {
            Ok(removed) => {
                assets_removed = removed;
                write_repaired(&mut store, &id, &graph, config)
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            eprintln!("Error: failed to write repaired project '{}': {}", id, e);
            return 3;
        }
        tracing::info!(project = %id, ?repair, assets_removed, "wrote repaired snapshot");
    }
    print_json(&CheckView {
        project: &id,
        clean,
        fixed,
        repair: &repair,
        orphaned_assets: &orphaned_assets,
        assets_removed,
    })
}

/// Saves a repaired snapshot with a fresh history matching it.
fn write_repaired<S: ProjectStore>(
    store: &mut S,
    id: &ProjectId,
    graph: &SceneGraph,
    config: &Config,
) -> Result<(), SessionError> {
    store.save_snapshot(id, graph)?;
    let fingerprint = snapshot_fingerprint(graph)?;
    let history = History::with_limit(config.session.history_limit).serialize(Some(&fingerprint))?;
    store.save_history(id, &history)?;
    Ok(())
}

/// Maps a session error from a settled operation to an exit code.
fn exit_code(e: &SessionError) -> i32 {
    match e {
        SessionError::Storage(StorageError::ProjectExists(_)) => 1,
        SessionError::Storage(_) => 3,
        _ => 1,
    }
}

/// Prints `value` as pretty JSON to stdout.
fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: failed to serialize output: {}", e);
            3
        }
    }
}

// ---------------------------------------------------------------------------
// Output shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Summary<'a> {
    project: &'a ProjectId,
    nodes: usize,
    groups: usize,
    edges: usize,
    tags: usize,
    undo: usize,
    redo: usize,
    history_limit: usize,
    history_restored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    history_warning: Option<&'a str>,
    repair: &'a RepairReport,
}

impl<'a> Summary<'a> {
    fn of<S: ProjectStore>(session: &'a Session<S>) -> Self {
        let graph = session.graph();
        let history = session.history();
        let report = session.load_report();
        Summary {
            project: session.id(),
            nodes: graph.node_count(),
            groups: graph.group_count(),
            edges: graph.edge_count(),
            tags: graph.tags().len(),
            undo: history.undo_len(),
            redo: history.redo_len(),
            history_limit: history.limit(),
            history_restored: report.history_restored,
            history_warning: report.history_warning.as_deref(),
            repair: &report.repair,
        }
    }
}

#[derive(Serialize)]
struct NodeView<'a> {
    id: NodeId,
    kind: &'static str,
    label: &'a str,
    color: String,
    locked: bool,
    flagged: bool,
    tags: Vec<&'a str>,
}

impl<'a> NodeView<'a> {
    /// Every node as the canvas would draw it.
    fn all<S: ProjectStore>(session: &'a Session<S>) -> Vec<Self> {
        let graph = session.graph();
        session
            .display()
            .nodes
            .iter()
            .filter_map(|(id, display)| {
                let node = graph.node(*id)?;
                Some(NodeView {
                    id: *id,
                    kind: node.kind.name(),
                    label: &node.label,
                    color: display.color.to_string(),
                    locked: display.locked,
                    flagged: display.flagged,
                    tags: display.tags.iter().map(|t| t.name.as_str()).collect(),
                })
            })
            .collect()
    }
}

#[derive(Serialize)]
struct OpenView<'a> {
    #[serde(flatten)]
    summary: Summary<'a>,
    #[serde(rename = "node_list")]
    nodes: Vec<NodeView<'a>>,
}

#[derive(Serialize)]
struct HistoryView<'a> {
    project: &'a ProjectId,
    limit: usize,
    entries: Vec<EntrySummary>,
}

impl<'a> HistoryView<'a> {
    fn of<S: ProjectStore>(session: &'a Session<S>) -> Self {
        HistoryView {
            project: session.id(),
            limit: session.history().limit(),
            entries: session.entries(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StepView {
    seq: u64,
    kind: &'static str,
    label: String,
    updates: usize,
}

impl From<&Outcome> for StepView {
    fn from(outcome: &Outcome) -> Self {
        StepView {
            seq: outcome.seq,
            kind: outcome.kind,
            label: outcome.label.clone(),
            updates: outcome.updates.len(),
        }
    }
}

#[derive(Serialize)]
struct StepsView {
    steps: Vec<StepView>,
    undo: usize,
    redo: usize,
    /// False when autosave is off and nothing was written.
    saved: bool,
}

#[derive(Serialize)]
struct CheckView<'a> {
    project: &'a ProjectId,
    clean: bool,
    fixed: bool,
    repair: &'a RepairReport,
    orphaned_assets: &'a [String],
    assets_removed: usize,
}
