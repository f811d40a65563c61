//! Session: the single coordinator for one open project.
//!
//! A [`Session`] owns the project's [`SceneGraph`], its [`History`], the
//! display [`Broadcaster`] and a [`ProjectStore`]. Every edit goes through
//! [`Session::execute`] (or a helper that builds the command), so the graph
//! is never mutated behind the history's back.
//!
//! Saving happens after a command has settled. A failed save is logged and
//! remembered but never undoes or blocks the edit.

use tracing::{debug, info, warn};

use rflow_core::{
    Color, EdgeKind, GroupId, Node, NodeId, PaletteSlot, Point, RepairReport, SceneGraph, Snippet,
    SnippetId, TagId,
};
use rflow_storage::{snapshot_fingerprint, ProjectId, ProjectStore};

use crate::command::{Command, Selection};
use crate::error::SessionError;
use crate::history::{EntrySummary, History, DEFAULT_LIMIT, MAX_LIMIT};
use crate::import;
use crate::sync::{Broadcaster, DisplayState, DisplayUpdate};

/// Engine settings for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Undo depth, capped at [`MAX_LIMIT`].
    pub history_limit: usize,
    /// Save snapshot and history after every settled command.
    pub autosave: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            history_limit: DEFAULT_LIMIT,
            autosave: true,
        }
    }
}

impl SessionConfig {
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.clamp(1, MAX_LIMIT);
        self
    }

    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }
}

/// What happened while opening a project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub repair: RepairReport,
    /// The persisted undo history was restored.
    pub history_restored: bool,
    /// Why the persisted history was discarded, if it was.
    pub history_warning: Option<String>,
}

/// Result of a settled command, undo or redo.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub seq: u64,
    pub kind: &'static str,
    pub label: String,
    /// Display entries that changed.
    pub updates: Vec<DisplayUpdate>,
    /// The autosave ran and succeeded.
    pub saved: bool,
    pub save_error: Option<String>,
}

#[derive(Debug, Clone)]
struct DragState {
    selection: Selection,
    dx: f64,
    dy: f64,
}

/// One open project.
pub struct Session<S: ProjectStore> {
    store: S,
    id: ProjectId,
    graph: SceneGraph,
    history: History,
    sync: Broadcaster,
    config: SessionConfig,
    drag: Option<DragState>,
    last_save_error: Option<String>,
    load_report: LoadReport,
}

impl<S: ProjectStore> Session<S> {
    /// Opens a stored project.
    ///
    /// The snapshot is repaired before use. The history is restored only if
    /// it was saved with exactly this snapshot and the snapshot needed no
    /// repair; otherwise editing starts with an empty history.
    pub fn open(store: S, id: ProjectId, config: SessionConfig) -> Result<Self, SessionError> {
        let mut graph = store.load_snapshot(&id)?;
        let fingerprint = snapshot_fingerprint(&graph)?;
        let repair = graph.repair();
        graph.drain_changes();
        if !repair.is_clean() {
            warn!(project = %id, ?repair, "repaired inconsistent snapshot");
        }

        let limit = config.history_limit;
        let mut report = LoadReport {
            repair,
            ..Default::default()
        };
        let history = match store.load_history(&id) {
            Ok(Some(_)) if !report.repair.is_clean() => {
                report.history_warning =
                    Some("snapshot was repaired; undo history no longer applies".to_string());
                History::with_limit(limit)
            }
            Ok(Some(json)) => match History::deserialize(&json, Some(&fingerprint)) {
                Ok(mut history) => {
                    history.set_limit(limit);
                    report.history_restored = true;
                    history
                }
                Err(e) => {
                    report.history_warning = Some(e.to_string());
                    History::with_limit(limit)
                }
            },
            Ok(None) => History::with_limit(limit),
            Err(e) => {
                report.history_warning = Some(e.to_string());
                History::with_limit(limit)
            }
        };
        if let Some(warning) = &report.history_warning {
            warn!(project = %id, %warning, "starting with empty undo history");
        }

        info!(
            project = %id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            undo = history.undo_len(),
            "opened project"
        );

        let sync = Broadcaster::new(&graph);
        Ok(Session {
            store,
            id,
            graph,
            history,
            sync,
            config,
            drag: None,
            last_save_error: None,
            load_report: report,
        })
    }

    /// Creates a project and opens it.
    pub fn create(mut store: S, name: &str, config: SessionConfig) -> Result<Self, SessionError> {
        let id = store.create_project(name)?;
        info!(project = %id, "created project");
        Session::open(store, id, config)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    pub fn display(&self) -> &DisplayState {
        self.sync.display()
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.sync
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    /// Message of the most recent failed save, cleared by the next
    /// successful one.
    pub fn last_save_error(&self) -> Option<&str> {
        self.last_save_error.as_deref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn entries(&self) -> Vec<EntrySummary> {
        self.history.entries()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Applies and records a command. Rejected commands leave the graph,
    /// the history and the display untouched.
    pub fn execute(&mut self, command: Command) -> Result<Outcome, SessionError> {
        if self.drag.is_some() {
            return Err(SessionError::DragInProgress);
        }
        let summary = self.history.execute(&mut self.graph, command)?;
        Ok(self.settle(summary))
    }

    /// Reverts the most recent step. `Ok(None)` when nothing is undoable.
    pub fn undo(&mut self) -> Result<Option<Outcome>, SessionError> {
        if self.drag.is_some() {
            return Err(SessionError::DragInProgress);
        }
        match self.history.undo(&mut self.graph)? {
            Some(summary) => Ok(Some(self.settle(summary))),
            None => Ok(None),
        }
    }

    pub fn redo(&mut self) -> Result<Option<Outcome>, SessionError> {
        if self.drag.is_some() {
            return Err(SessionError::DragInProgress);
        }
        match self.history.redo(&mut self.graph)? {
            Some(summary) => Ok(Some(self.settle(summary))),
            None => Ok(None),
        }
    }

    fn settle(&mut self, summary: EntrySummary) -> Outcome {
        let updates = self.sync.sync(&mut self.graph);
        debug!(seq = summary.seq, updates = updates.len(), "settled");

        let mut outcome = Outcome {
            seq: summary.seq,
            kind: summary.kind,
            label: summary.label,
            updates,
            saved: false,
            save_error: None,
        };
        if self.config.autosave {
            match self.save() {
                Ok(()) => outcome.saved = true,
                Err(e) => outcome.save_error = Some(e.to_string()),
            }
        }
        outcome
    }

    /// Writes the snapshot, then the history tagged with the snapshot's
    /// fingerprint.
    pub fn save(&mut self) -> Result<(), SessionError> {
        match self.write() {
            Ok(()) => {
                self.last_save_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(project = %self.id, error = %e, "save failed");
                self.last_save_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn write(&mut self) -> Result<(), SessionError> {
        self.store.save_snapshot(&self.id, &self.graph)?;
        let fingerprint = snapshot_fingerprint(&self.graph)?;
        let history = self.history.serialize(Some(&fingerprint))?;
        self.store.save_history(&self.id, &history)?;
        debug!(project = %self.id, "saved");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Drag gestures
    // -----------------------------------------------------------------------

    /// Starts dragging `selection`. Locked or missing items are rejected
    /// up front.
    pub fn begin_drag(&mut self, selection: Selection) -> Result<(), SessionError> {
        if self.drag.is_some() {
            return Err(SessionError::DragInProgress);
        }
        Command::move_items(&self.graph, &selection, 0.0, 0.0)?;
        self.drag = Some(DragState {
            selection,
            dx: 0.0,
            dy: 0.0,
        });
        Ok(())
    }

    /// Accumulates drag motion. The graph is not touched until commit.
    pub fn drag_by(&mut self, dx: f64, dy: f64) -> Result<(), SessionError> {
        let drag = self.drag.as_mut().ok_or(SessionError::NoDrag)?;
        drag.dx += dx;
        drag.dy += dy;
        Ok(())
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// The move the drag would commit right now, for previews.
    pub fn drag_preview(&self) -> Result<Command, SessionError> {
        let drag = self.drag.as_ref().ok_or(SessionError::NoDrag)?;
        Ok(Command::move_items(
            &self.graph,
            &drag.selection,
            drag.dx,
            drag.dy,
        )?)
    }

    /// Ends the drag with one `Move` command. A drag that ended where it
    /// started records nothing.
    pub fn commit_drag(&mut self) -> Result<Option<Outcome>, SessionError> {
        let drag = self.drag.take().ok_or(SessionError::NoDrag)?;
        if drag.dx == 0.0 && drag.dy == 0.0 {
            return Ok(None);
        }
        let command = Command::move_items(&self.graph, &drag.selection, drag.dx, drag.dy)?;
        self.execute(command).map(Some)
    }

    /// Abandons the drag. Returns `false` if none was active.
    pub fn cancel_drag(&mut self) -> bool {
        self.drag.take().is_some()
    }

    // -----------------------------------------------------------------------
    // Gesture helpers
    // -----------------------------------------------------------------------

    pub fn add_node(&mut self, node: Node, group: Option<GroupId>) -> Result<Outcome, SessionError> {
        let command = Command::create_node(&self.graph, node, group)?;
        self.execute(command)
    }

    pub fn connect(
        &mut self,
        kind: EdgeKind,
        source: NodeId,
        target: NodeId,
    ) -> Result<Outcome, SessionError> {
        let command = Command::create_edge(&self.graph, kind, source, target)?;
        self.execute(command)
    }

    pub fn delete_selection(
        &mut self,
        nodes: &[NodeId],
        groups: &[GroupId],
    ) -> Result<Outcome, SessionError> {
        let command = Command::delete_selection(&self.graph, nodes, groups)?;
        self.execute(command)
    }

    /// Moves a selection in one step (keyboard nudge).
    pub fn move_selection(
        &mut self,
        selection: &Selection,
        dx: f64,
        dy: f64,
    ) -> Result<Outcome, SessionError> {
        let command = Command::move_items(&self.graph, selection, dx, dy)?;
        self.execute(command)
    }

    pub fn group_nodes(
        &mut self,
        name: &str,
        position: Point,
        members: &[NodeId],
    ) -> Result<Outcome, SessionError> {
        let size = rflow_core::Size::GROUP;
        let command = Command::create_group(&self.graph, name, position, size, members)?;
        self.execute(command)
    }

    pub fn rename_tag(&mut self, tag: TagId, name: &str) -> Result<Outcome, SessionError> {
        let command = Command::rename_tag(&self.graph, tag, name.to_string())?;
        self.execute(command)
    }

    pub fn set_palette_color(
        &mut self,
        slot: PaletteSlot,
        color: Color,
    ) -> Result<Outcome, SessionError> {
        let command = Command::palette_color(&self.graph, slot, color);
        self.execute(command)
    }

    pub fn add_snippet(
        &mut self,
        node: NodeId,
        snippet: Snippet,
    ) -> Result<Outcome, SessionError> {
        let command = Command::add_snippet(&self.graph, node, snippet)?;
        self.execute(command)
    }

    pub fn remove_snippet(
        &mut self,
        node: NodeId,
        id: SnippetId,
    ) -> Result<Outcome, SessionError> {
        let command = Command::remove_snippet(&self.graph, node, id)?;
        self.execute(command)
    }

    /// Copies a snippet from one node to another, attributed to its source.
    pub fn copy_snippet(
        &mut self,
        from: NodeId,
        id: SnippetId,
        to: NodeId,
    ) -> Result<Outcome, SessionError> {
        let command = Command::copy_snippet(&self.graph, from, id, to)?;
        self.execute(command)
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    /// Imports an outline as a single undo step.
    pub fn import_outline(&mut self, text: &str) -> Result<Outcome, SessionError> {
        let commands = import::import_outline(&self.graph, text)?;
        let nodes = commands
            .iter()
            .filter(|c| matches!(c, Command::CreateNode { .. }))
            .count();
        info!(project = %self.id, nodes, commands = commands.len(), "importing outline");
        self.execute(Command::batch(format!("Import {} nodes", nodes), commands))
    }

    /// Adds a reference node for a markdown paper.
    pub fn import_markdown(
        &mut self,
        file_name: &str,
        content: &str,
        position: Point,
        source_path: &str,
    ) -> Result<Outcome, SessionError> {
        let command =
            import::markdown_reference(&self.graph, file_name, content, position, source_path)?;
        self.execute(command)
    }
}
