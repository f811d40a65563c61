//! Engine error types.
//!
//! [`HistoryError`] covers undo/redo and history persistence,
//! [`ImportError`] covers outline and markdown import, and [`SessionError`]
//! is the unified type returned by [`Session`](crate::session::Session).

use rflow_core::CoreError;
use rflow_storage::StorageError;
use thiserror::Error;

/// Errors produced by the undo/redo engine.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Undoing step `seq` failed; the model and both stacks are unchanged.
    #[error("cannot undo step {seq} ({kind}): {source}")]
    InversionFailed {
        seq: u64,
        kind: &'static str,
        #[source]
        source: CoreError,
    },

    /// Redoing step `seq` failed; the model and both stacks are unchanged.
    #[error("cannot redo step {seq} ({kind}): {source}")]
    ReapplyFailed {
        seq: u64,
        kind: &'static str,
        #[source]
        source: CoreError,
    },

    /// The history document is unreadable or violates a stack invariant.
    #[error("corrupt history: {reason}")]
    Corrupt { reason: String },

    #[error("unsupported history format {0}")]
    UnsupportedFormat(u32),

    /// The history was saved alongside a different snapshot.
    #[error("history belongs to snapshot {recorded}, not {actual}")]
    SnapshotMismatch { recorded: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors produced while importing outlines or markdown papers.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: unknown alias '{alias}'")]
    UnknownAlias { line: usize, alias: String },

    #[error("line {line}: alias '{alias}' is already defined")]
    DuplicateAlias { line: usize, alias: String },

    /// The directive parsed but the resulting edit is structurally invalid.
    #[error("line {line}: {source}")]
    Invalid {
        line: usize,
        #[source]
        source: CoreError,
    },

    #[error("nothing to import")]
    Empty,
}

impl ImportError {
    /// Source line the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            ImportError::Syntax { line, .. }
            | ImportError::UnknownAlias { line, .. }
            | ImportError::DuplicateAlias { line, .. }
            | ImportError::Invalid { line, .. } => Some(*line),
            ImportError::Empty => None,
        }
    }
}

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The command violates a structural rule and was not recorded.
    #[error("rejected: {0}")]
    Rejected(#[from] CoreError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("a drag gesture is already in progress")]
    DragInProgress,

    #[error("no drag gesture in progress")]
    NoDrag,
}
