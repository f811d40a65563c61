//! Edges and their embedded waypoints.
//!
//! An [`Edge`] connects two nodes and owns an ordered sequence of
//! [`Waypoint`] control points. Waypoints have no lifecycle of their own:
//! they are created and removed only as part of their edge.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{EdgeId, NodeId, WaypointId};
use crate::types::Point;

/// The two kinds of connection on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Data flow between pipeline steps. May never target a reference node.
    Pipeline,
    /// A citation linking a reference (or note) to the step it supports.
    Reference,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Pipeline => "pipeline",
            EdgeKind::Reference => "reference",
        }
    }
}

/// A control point embedded in an edge's path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: WaypointId,
    pub position: Point,
    /// Set while the waypoint sits between two real segments of an edge.
    #[serde(default)]
    pub connected: bool,
}

impl Waypoint {
    /// A detached waypoint with a fresh id.
    pub fn new(position: Point) -> Self {
        Waypoint {
            id: WaypointId::new(),
            position,
            connected: false,
        }
    }
}

/// Source/target pair of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoints {
    pub source: NodeId,
    pub target: NodeId,
}

/// A typed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub kind: EdgeKind,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub waypoints: SmallVec<[Waypoint; 2]>,
}

impl Edge {
    /// A straight edge (no waypoints) with a fresh id.
    pub fn new(kind: EdgeKind, source: NodeId, target: NodeId) -> Self {
        Edge {
            id: EdgeId::new(),
            kind,
            source,
            target,
            waypoints: SmallVec::new(),
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            source: self.source,
            target: self.target,
        }
    }

    /// Returns `true` if either endpoint is `node`.
    pub fn touches(&self, node: NodeId) -> bool {
        self.source == node || self.target == node
    }

    /// Returns the index of a waypoint within this edge.
    pub fn waypoint_index(&self, id: WaypointId) -> Option<usize> {
        self.waypoints.iter().position(|w| w.id == id)
    }
}
