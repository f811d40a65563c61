//! Editing engine for ResearchFlow projects.
//!
//! Everything that changes a [`SceneGraph`](rflow_core::SceneGraph) after it
//! is loaded lives here:
//!
//! - [`command`]: reversible, serializable edit commands and their builders
//! - [`history`]: bounded undo/redo with persistence
//! - [`sync`]: derived display state and global change fan-out
//! - [`import`]: outline and markdown import
//! - [`session`]: one open project tying the above to a store
//! - [`error`]: HistoryError, ImportError and SessionError

pub mod command;
pub mod error;
pub mod history;
pub mod import;
pub mod session;
pub mod sync;

pub use command::{Command, GroupSlot, ItemRef, Selection, TagHolder};
pub use error::{HistoryError, ImportError, SessionError};
pub use history::{EntrySummary, History, HistoryEntry, DEFAULT_LIMIT, HISTORY_FORMAT, MAX_LIMIT};
pub use session::{LoadReport, Outcome, Session, SessionConfig};
pub use sync::{Broadcaster, DisplayState, DisplayUpdate, NodeDisplay};
