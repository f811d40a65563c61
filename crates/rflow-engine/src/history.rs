//! Bounded undo/redo history.
//!
//! [`History`] keeps two stacks of executed [`Command`]s. Every entry carries
//! a monotonically increasing sequence number and a UTC timestamp. Entries
//! are self-contained deltas, so evicting the oldest one never invalidates
//! the others, and a persisted history can be restored without replaying
//! anything.
//!
//! The persisted document records the fingerprint of the snapshot it was
//! saved next to. A history whose fingerprint does not match the loaded
//! snapshot describes some other state and is rejected.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use rflow_core::{CoreError, SceneGraph};

use crate::command::Command;
use crate::error::HistoryError;

/// Number of undoable steps kept by default.
pub const DEFAULT_LIMIT: usize = 100;

/// Hard cap on the configurable limit.
pub const MAX_LIMIT: usize = 100;

/// Version of the persisted history document.
pub const HISTORY_FORMAT: u32 = 1;

/// One executed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub command: Command,
}

impl HistoryEntry {
    fn summary(&self, undone: bool) -> EntrySummary {
        EntrySummary {
            seq: self.seq,
            timestamp: self.timestamp,
            kind: self.command.kind(),
            label: self.command.label(),
            undone,
        }
    }
}

/// Listing view of a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: &'static str,
    pub label: String,
    /// `true` for entries on the redo stack.
    pub undone: bool,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    format: u32,
    limit: usize,
    next_seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<&'a str>,
    undo: &'a VecDeque<HistoryEntry>,
    redo: &'a [HistoryEntry],
}

#[derive(Deserialize)]
struct Document {
    limit: usize,
    next_seq: u64,
    #[serde(default)]
    snapshot: Option<String>,
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
}

#[derive(Deserialize)]
struct FormatHeader {
    format: u32,
}

/// Linear undo/redo over a [`SceneGraph`].
///
/// The undo stack's back is the most recent step. The redo stack's last
/// element is the next step to redo, so its sequence numbers decrease from
/// bottom to top.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    limit: usize,
    next_seq: u64,
}

impl Default for History {
    fn default() -> Self {
        History::new()
    }
}

impl History {
    pub fn new() -> Self {
        History::with_limit(DEFAULT_LIMIT)
    }

    /// An empty history keeping at most `limit` steps (clamped to
    /// `1..=MAX_LIMIT`).
    pub fn with_limit(limit: usize) -> Self {
        History {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit: limit.clamp(1, MAX_LIMIT),
            next_seq: 1,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Changes the limit, evicting the oldest steps if necessary.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.clamp(1, MAX_LIMIT);
        self.evict();
        while self.redo.len() > self.limit {
            self.redo.remove(0);
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// The step the next `undo` would revert.
    pub fn peek_undo(&self) -> Option<&HistoryEntry> {
        self.undo.back()
    }

    /// The step the next `redo` would reapply.
    pub fn peek_redo(&self) -> Option<&HistoryEntry> {
        self.redo.last()
    }

    /// Applies `command` and records it.
    ///
    /// A command that fails to apply is not recorded, and the redo stack is
    /// kept. On success the redo stack is cleared.
    pub fn execute(
        &mut self,
        graph: &mut SceneGraph,
        command: Command,
    ) -> Result<EntrySummary, CoreError> {
        command.apply(graph)?;

        let entry = HistoryEntry {
            seq: self.next_seq,
            timestamp: Utc::now(),
            command,
        };
        self.next_seq += 1;
        debug!(seq = entry.seq, kind = entry.command.kind(), "command executed");

        let summary = entry.summary(false);
        self.redo.clear();
        self.undo.push_back(entry);
        self.evict();
        Ok(summary)
    }

    fn evict(&mut self) {
        while self.undo.len() > self.limit {
            if let Some(evicted) = self.undo.pop_front() {
                debug!(seq = evicted.seq, "evicted oldest history entry");
            }
        }
    }

    /// Reverts the most recent step. `Ok(None)` when there is nothing to
    /// undo. On failure the graph and both stacks are unchanged.
    pub fn undo(&mut self, graph: &mut SceneGraph) -> Result<Option<EntrySummary>, HistoryError> {
        let Some(entry) = self.undo.pop_back() else {
            return Ok(None);
        };
        match entry.command.invert(graph) {
            Ok(()) => {
                debug!(seq = entry.seq, kind = entry.command.kind(), "undo");
                let summary = entry.summary(true);
                self.redo.push(entry);
                Ok(Some(summary))
            }
            Err(source) => {
                error!(
                    seq = entry.seq,
                    kind = entry.command.kind(),
                    error = %source,
                    "undo failed"
                );
                let err = HistoryError::InversionFailed {
                    seq: entry.seq,
                    kind: entry.command.kind(),
                    source,
                };
                self.undo.push_back(entry);
                Err(err)
            }
        }
    }

    /// Reapplies the most recently undone step.
    pub fn redo(&mut self, graph: &mut SceneGraph) -> Result<Option<EntrySummary>, HistoryError> {
        let Some(entry) = self.redo.pop() else {
            return Ok(None);
        };
        match entry.command.apply(graph) {
            Ok(()) => {
                debug!(seq = entry.seq, kind = entry.command.kind(), "redo");
                let summary = entry.summary(false);
                self.undo.push_back(entry);
                Ok(Some(summary))
            }
            Err(source) => {
                error!(
                    seq = entry.seq,
                    kind = entry.command.kind(),
                    error = %source,
                    "redo failed"
                );
                let err = HistoryError::ReapplyFailed {
                    seq: entry.seq,
                    kind: entry.command.kind(),
                    source,
                };
                self.redo.push(entry);
                Err(err)
            }
        }
    }

    /// Drops the step `seq` from whichever stack holds it, keeping the
    /// rest. Returns `false` if no such step exists.
    pub fn discard(&mut self, seq: u64) -> bool {
        if let Some(pos) = self.undo.iter().position(|e| e.seq == seq) {
            self.undo.remove(pos);
            warn!(seq, "discarded history step");
            return true;
        }
        if let Some(pos) = self.redo.iter().position(|e| e.seq == seq) {
            self.redo.remove(pos);
            warn!(seq, "discarded history step");
            return true;
        }
        false
    }

    /// All entries, newest first.
    pub fn entries(&self) -> Vec<EntrySummary> {
        self.redo
            .iter()
            .map(|e| e.summary(true))
            .chain(self.undo.iter().rev().map(|e| e.summary(false)))
            .collect()
    }

    /// Forgets every step. Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Serializes both stacks, recording the fingerprint of the snapshot
    /// this history belongs to.
    pub fn serialize(&self, fingerprint: Option<&str>) -> Result<String, HistoryError> {
        let doc = DocumentRef {
            format: HISTORY_FORMAT,
            limit: self.limit,
            next_seq: self.next_seq,
            snapshot: fingerprint,
            undo: &self.undo,
            redo: &self.redo,
        };
        Ok(serde_json::to_string(&doc)?)
    }

    /// Restores a serialized history.
    ///
    /// When `fingerprint` is given and the document recorded one, they must
    /// match. Stack depth and sequence ordering are validated.
    pub fn deserialize(json: &str, fingerprint: Option<&str>) -> Result<History, HistoryError> {
        let header: FormatHeader = serde_json::from_str(json)?;
        if header.format != HISTORY_FORMAT {
            return Err(HistoryError::UnsupportedFormat(header.format));
        }
        let doc: Document = serde_json::from_str(json)?;

        if let (Some(actual), Some(recorded)) = (fingerprint, doc.snapshot.as_deref()) {
            if actual != recorded {
                return Err(HistoryError::SnapshotMismatch {
                    recorded: recorded.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        if doc.limit == 0 || doc.limit > MAX_LIMIT {
            return corrupt(format!("limit {} outside 1..={}", doc.limit, MAX_LIMIT));
        }
        if doc.undo.len() > doc.limit || doc.redo.len() > doc.limit {
            return corrupt(format!(
                "stack depth {}/{} exceeds limit {}",
                doc.undo.len(),
                doc.redo.len(),
                doc.limit
            ));
        }
        if !doc.undo.iter().zip(doc.undo.iter().skip(1)).all(|(a, b)| a.seq < b.seq) {
            return corrupt("undo sequence numbers are not increasing".to_string());
        }
        if !doc.redo.iter().zip(doc.redo.iter().skip(1)).all(|(a, b)| a.seq > b.seq) {
            return corrupt("redo sequence numbers are not decreasing".to_string());
        }
        if let (Some(top), Some(next)) = (doc.undo.back(), doc.redo.last()) {
            if top.seq >= next.seq {
                return corrupt(format!(
                    "undo step {} is not older than redo step {}",
                    top.seq, next.seq
                ));
            }
        }
        let highest = doc
            .undo
            .iter()
            .chain(doc.redo.iter())
            .map(|e| e.seq)
            .max()
            .unwrap_or(0);
        if highest >= doc.next_seq {
            return corrupt(format!(
                "step {} is not below next sequence {}",
                highest, doc.next_seq
            ));
        }

        Ok(History {
            undo: doc.undo,
            redo: doc.redo,
            limit: doc.limit,
            next_seq: doc.next_seq,
        })
    }

    /// Like [`History::deserialize`], but any failure degrades to an empty
    /// history with the given limit.
    pub fn load_or_empty(json: &str, fingerprint: Option<&str>, limit: usize) -> History {
        match History::deserialize(json, fingerprint) {
            Ok(mut history) => {
                history.set_limit(limit);
                history
            }
            Err(e) => {
                warn!(error = %e, "discarding unreadable undo history");
                History::with_limit(limit)
            }
        }
    }
}

fn corrupt<T>(reason: String) -> Result<T, HistoryError> {
    Err(HistoryError::Corrupt { reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rflow_core::{ModuleType, Node, NodeId, Point};

    fn graph_with_node() -> (SceneGraph, NodeId) {
        let mut graph = SceneGraph::new();
        let node = Node::step(ModuleType::Process, Point::default(), "train");
        let id = node.id;
        graph.insert_node(node).unwrap();
        (graph, id)
    }

    fn nudge(graph: &SceneGraph, id: NodeId) -> Command {
        Command::move_items(graph, &crate::command::Selection::nodes([id]), 10.0, 0.0).unwrap()
    }

    #[test]
    fn undo_redo_walks_both_stacks() {
        let (mut graph, id) = graph_with_node();
        let mut history = History::new();
        let original = graph.clone();

        let cmd = nudge(&graph, id);
        history.execute(&mut graph, cmd).unwrap();
        let moved = graph.clone();

        let undone = history.undo(&mut graph).unwrap().unwrap();
        assert!(undone.undone);
        assert_eq!(graph, original);
        assert!(history.can_redo());

        history.redo(&mut graph).unwrap();
        assert_eq!(graph, moved);
        assert!(history.undo(&mut SceneGraph::new()).is_err());
        assert_eq!(history.undo_len(), 1);
    }

    #[test]
    fn empty_stacks_are_noops() {
        let (mut graph, _) = graph_with_node();
        let mut history = History::new();
        assert!(history.undo(&mut graph).unwrap().is_none());
        assert!(history.redo(&mut graph).unwrap().is_none());
    }

    #[test]
    fn new_command_clears_redo() {
        let (mut graph, id) = graph_with_node();
        let mut history = History::new();
        for _ in 0..3 {
            let cmd = nudge(&graph, id);
            history.execute(&mut graph, cmd).unwrap();
        }
        history.undo(&mut graph).unwrap();
        history.undo(&mut graph).unwrap();
        assert_eq!(history.redo_len(), 2);

        let cmd = Command::set_flag(&graph, id, true).unwrap();
        history.execute(&mut graph, cmd).unwrap();
        assert!(!history.can_redo());
        assert_eq!(history.undo_len(), 2);
    }

    #[test]
    fn rejected_command_is_not_recorded() {
        let (mut graph, id) = graph_with_node();
        let mut history = History::new();
        let cmd = Command::set_flag(&graph, id, true).unwrap();
        history.execute(&mut graph, cmd).unwrap();
        history.undo(&mut graph).unwrap();

        let bogus = Command::SetFlag {
            node: NodeId::new(),
            from: false,
            to: true,
        };
        assert!(history.execute(&mut graph, bogus).is_err());
        assert_eq!(history.undo_len(), 0);
        assert_eq!(history.redo_len(), 1);
    }

    #[test]
    fn eviction_keeps_newest_steps() {
        let (mut graph, id) = graph_with_node();
        let mut history = History::with_limit(3);
        for _ in 0..5 {
            let cmd = nudge(&graph, id);
            history.execute(&mut graph, cmd).unwrap();
        }
        assert_eq!(history.undo_len(), 3);
        let seqs: Vec<u64> = history.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![5, 4, 3]);

        while history.undo(&mut graph).unwrap().is_some() {}
        assert_eq!(graph.node(id).unwrap().position, Point::new(20.0, 0.0));
    }

    #[test]
    fn limit_is_capped() {
        assert_eq!(History::with_limit(500).limit(), MAX_LIMIT);
        assert_eq!(History::with_limit(0).limit(), 1);
    }

    #[test]
    fn inversion_failure_keeps_stacks_and_discard_recovers() {
        let (mut graph, id) = graph_with_node();
        let mut history = History::new();
        let cmd = Command::set_flag(&graph, id, true).unwrap();
        history.execute(&mut graph, cmd).unwrap();
        let cmd = Command::delete_node(&graph, id).unwrap();
        let deleted = history.execute(&mut graph, cmd).unwrap();

        // Something outside the history recreated the node.
        let mut blocker = Node::step(ModuleType::Process, Point::default(), "x");
        blocker.id = id;
        graph.insert_node(blocker).unwrap();
        let before = graph.clone();

        match history.undo(&mut graph) {
            Err(HistoryError::InversionFailed { seq, kind, .. }) => {
                assert_eq!(seq, deleted.seq);
                assert_eq!(kind, "DeleteNode");
            }
            other => panic!("expected inversion failure, got {:?}", other),
        }
        assert_eq!(graph, before);
        assert_eq!(history.undo_len(), 2);

        assert!(history.discard(deleted.seq));
        assert!(!history.discard(deleted.seq));
        history.undo(&mut graph).unwrap();
        assert!(!graph.node(id).unwrap().flags.flagged);
    }

    #[test]
    fn serialized_history_continues() {
        let (mut graph, id) = graph_with_node();
        let mut history = History::new();
        for _ in 0..3 {
            let cmd = nudge(&graph, id);
            history.execute(&mut graph, cmd).unwrap();
        }
        history.undo(&mut graph).unwrap();

        let json = history.serialize(Some("abc")).unwrap();
        let mut restored = History::deserialize(&json, Some("abc")).unwrap();
        assert_eq!(restored, history);

        let mut g2 = graph.clone();
        history.undo(&mut graph).unwrap();
        restored.undo(&mut g2).unwrap();
        assert_eq!(graph, g2);

        let cmd = nudge(&g2, id);
        let summary = restored.execute(&mut g2, cmd).unwrap();
        assert_eq!(summary.seq, 4);
    }

    #[test]
    fn fingerprint_mismatch_is_rejected() {
        let history = History::new();
        let json = history.serialize(Some("aaaa")).unwrap();
        assert!(matches!(
            History::deserialize(&json, Some("bbbb")),
            Err(HistoryError::SnapshotMismatch { .. })
        ));
        assert!(History::deserialize(&json, None).is_ok());
    }

    #[test]
    fn invalid_documents_degrade_to_empty() {
        assert!(matches!(
            History::deserialize("{not json", None),
            Err(HistoryError::Serialization(_))
        ));
        assert!(matches!(
            History::deserialize(r#"{"format":9,"limit":1,"next_seq":1,"undo":[],"redo":[]}"#, None),
            Err(HistoryError::UnsupportedFormat(9))
        ));
        assert!(matches!(
            History::deserialize(r#"{"format":1,"limit":400,"next_seq":1,"undo":[],"redo":[]}"#, None),
            Err(HistoryError::Corrupt { .. })
        ));

        let history = History::load_or_empty("garbage", None, 50);
        assert_eq!(history.limit(), 50);
        assert!(!history.can_undo());
    }

    #[test]
    fn out_of_order_sequences_are_corrupt() {
        let (mut graph, id) = graph_with_node();
        let mut history = History::new();
        for _ in 0..2 {
            let cmd = nudge(&graph, id);
            history.execute(&mut graph, cmd).unwrap();
        }
        let mut doc: serde_json::Value =
            serde_json::from_str(&history.serialize(None).unwrap()).unwrap();
        let undo = doc["undo"].as_array_mut().unwrap();
        undo.swap(0, 1);
        let json = doc.to_string();
        assert!(matches!(
            History::deserialize(&json, None),
            Err(HistoryError::Corrupt { .. })
        ));
    }
}
