//! Core error types for rflow-core.
//!
//! Every structural violation the scene graph can detect is a distinct,
//! matchable variant. A `CoreError` returned from a mutation guarantees the
//! graph was left untouched.

use thiserror::Error;

use crate::id::{EdgeId, GroupId, NodeId, SnippetId, TagId, WaypointId};

/// Errors produced by scene-graph operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A node id was not found.
    #[error("node not found: {id}")]
    NodeNotFound { id: NodeId },

    /// A group id was not found.
    #[error("group not found: {id}")]
    GroupNotFound { id: GroupId },

    /// An edge id was not found.
    #[error("edge not found: {id}")]
    EdgeNotFound { id: EdgeId },

    /// A waypoint id was not found on the given edge.
    #[error("waypoint {id} not found on edge {edge}")]
    WaypointNotFound { edge: EdgeId, id: WaypointId },

    /// A snippet id was not found on the given node.
    #[error("snippet {id} not found on node {node}")]
    SnippetNotFound { node: NodeId, id: SnippetId },

    /// A tag id was not found in the tag registry.
    #[error("tag not found: {id}")]
    TagNotFound { id: TagId },

    /// An entity with this identity already exists.
    #[error("duplicate id: {id}")]
    DuplicateId { id: String },

    /// The node is already bound to a group; nodes belong to at most one.
    #[error("node {node} is already bound to group {group}")]
    AlreadyGrouped { node: NodeId, group: GroupId },

    /// The node is not bound to the expected group.
    #[error("node {node} is not a member of group {group}")]
    NotInGroup { node: NodeId, group: GroupId },

    /// An edge failed validation.
    #[error("invalid edge: {reason}")]
    InvalidEdge { reason: String },

    /// The entity is (effectively) locked against this mutation.
    #[error("{entity} is locked")]
    Locked { entity: String },

    /// A node cannot be removed while edges still attach to it.
    #[error("node {id} still has {count} attached edge(s)")]
    NodeHasEdges { id: NodeId, count: usize },

    /// A node cannot be removed while it is still bound to a group.
    #[error("node {id} is still bound to group {group}")]
    NodeStillGrouped { id: NodeId, group: GroupId },

    /// A tag cannot be removed while nodes still reference it.
    #[error("tag {id} is still assigned to {count} node(s)")]
    TagInUse { id: TagId, count: usize },

    /// Tag names are unique within a project.
    #[error("duplicate tag name: '{name}'")]
    DuplicateTagName { name: String },

    /// The node already carries this tag.
    #[error("node {node} already has tag {tag}")]
    TagAlreadyAssigned { node: NodeId, tag: TagId },

    /// The node does not carry this tag.
    #[error("node {node} does not have tag {tag}")]
    TagNotAssigned { node: NodeId, tag: TagId },

    /// A value was not a `#RRGGBB` color.
    #[error("invalid color: '{value}'")]
    InvalidColor { value: String },

    /// A size was non-positive or not finite.
    #[error("invalid size: {width}x{height}")]
    InvalidSize { width: f64, height: f64 },

    /// A position had a NaN or infinite coordinate.
    #[error("invalid position: ({x}, {y})")]
    InvalidPosition { x: f64, y: f64 },

    /// A name or label was empty where one is required.
    #[error("empty name")]
    EmptyName,

    /// A positional index was past the end of its sequence.
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Pipeline edges form a cycle, so no step order exists.
    #[error("pipeline contains a cycle through node {node}")]
    PipelineCycle { node: NodeId },

    /// Captured state no longer matches the graph.
    #[error("graph inconsistency: {reason}")]
    Inconsistent { reason: String },
}
