//! Core data model of the ResearchFlow canvas: nodes, groups, edges, tags,
//! the palette, and the [`SceneGraph`] that owns them.

pub mod change;
pub mod edge;
pub mod error;
pub mod graph;
pub mod group;
pub mod id;
pub mod node;
pub mod palette;
pub mod tag;
pub mod types;

// Re-export commonly used types
pub use change::{ChangeEvent, ChangeScope, Subject};
pub use edge::{Edge, EdgeKind, Endpoints, Waypoint};
pub use error::CoreError;
pub use graph::{MetaTarget, RepairReport, SceneGraph, SNAPSHOT_FORMAT};
pub use group::Group;
pub use id::{EdgeId, GroupId, NodeId, SnippetId, TagId, WaypointId};
pub use node::{
    Metadata, ModuleType, Node, NodeFlags, NodeKind, ReferenceMeta, Snippet, SnippetKind, TodoItem,
};
pub use palette::{Palette, PaletteSlot};
pub use tag::{Tag, TagRegistry};
pub use types::{Color, Point, Size};
