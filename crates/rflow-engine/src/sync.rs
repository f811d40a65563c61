//! Derived display state and change fan-out.
//!
//! The [`Broadcaster`] keeps what every entity currently looks like: its
//! effective color, effective lock, flag and resolved tag chips. The
//! graph's change events say what moved; global events (a palette slot or
//! a tag) are expanded here into every dependent entity. Overrides are never
//! touched, only the derived values are recomputed.

use std::collections::{BTreeMap, BTreeSet};

use rflow_core::{
    ChangeEvent, Color, EdgeId, GroupId, NodeId, PaletteSlot, SceneGraph, Subject, Tag, TagId,
    WaypointId,
};

/// Tag as shown on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagChip {
    pub id: TagId,
    pub name: String,
    pub color: Color,
}

impl From<&Tag> for TagChip {
    fn from(tag: &Tag) -> Self {
        TagChip {
            id: tag.id,
            name: tag.name.clone(),
            color: tag.color.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDisplay {
    pub color: Color,
    /// Own lock or the owning group's lock.
    pub locked: bool,
    pub flagged: bool,
    pub tags: Vec<TagChip>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDisplay {
    pub color: Color,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDisplay {
    pub color: Color,
    /// Waypoints are drawn in their edge's color.
    pub waypoints: BTreeMap<WaypointId, Color>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayState {
    pub nodes: BTreeMap<NodeId, NodeDisplay>,
    pub groups: BTreeMap<GroupId, GroupDisplay>,
    pub edges: BTreeMap<EdgeId, EdgeDisplay>,
}

/// One entity whose display must be redrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DisplayUpdate {
    Node(NodeId),
    NodeRemoved(NodeId),
    Group(GroupId),
    GroupRemoved(GroupId),
    Edge(EdgeId),
    EdgeRemoved(EdgeId),
    Project,
}

/// Fans change events out to dependent display entries.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    display: DisplayState,
}

impl Broadcaster {
    /// Builds the display state for every entity in `graph`.
    pub fn new(graph: &SceneGraph) -> Self {
        let mut broadcaster = Broadcaster::default();
        broadcaster.rebuild(graph);
        broadcaster
    }

    /// Recomputes everything from scratch.
    pub fn rebuild(&mut self, graph: &SceneGraph) {
        self.display = DisplayState::default();
        for node in graph.nodes() {
            self.refresh_node(graph, node.id);
        }
        for group in graph.groups() {
            self.refresh_group(graph, group.id);
        }
        for edge in graph.edges() {
            self.refresh_edge(graph, edge.id);
        }
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeDisplay> {
        self.display.nodes.get(&id)
    }

    pub fn group(&self, id: GroupId) -> Option<&GroupDisplay> {
        self.display.groups.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&EdgeDisplay> {
        self.display.edges.get(&id)
    }

    /// Drains the graph's pending changes and dispatches them.
    pub fn sync(&mut self, graph: &mut SceneGraph) -> Vec<DisplayUpdate> {
        let events = graph.drain_changes();
        self.dispatch(graph, &events)
    }

    /// Refreshes every display entry affected by `events`, returning the
    /// deduplicated set of entries that were redrawn.
    pub fn dispatch(&mut self, graph: &SceneGraph, events: &[ChangeEvent]) -> Vec<DisplayUpdate> {
        let mut targets = BTreeSet::new();
        for event in events {
            self.collect(graph, event, &mut targets);
        }

        let mut updates = BTreeSet::new();
        for target in targets {
            updates.insert(self.refresh(graph, target));
        }
        updates.into_iter().collect()
    }

    fn collect(&self, graph: &SceneGraph, event: &ChangeEvent, out: &mut BTreeSet<DisplayUpdate>) {
        match event.subject {
            Subject::Node(id) | Subject::NodeRemoved(id) => {
                out.insert(DisplayUpdate::Node(id));
            }
            Subject::Group(id) => {
                out.insert(DisplayUpdate::Group(id));
                if let Some(group) = graph.group(id) {
                    out.extend(group.members.iter().map(|m| DisplayUpdate::Node(*m)));
                }
            }
            Subject::GroupRemoved(id) => {
                out.insert(DisplayUpdate::Group(id));
            }
            Subject::Edge(id) | Subject::EdgeRemoved(id) => {
                out.insert(DisplayUpdate::Edge(id));
            }
            Subject::Tag(tag) => {
                out.extend(graph.tag_holders(tag).into_iter().map(DisplayUpdate::Node));
                // Nodes still showing the chip (the tag was removed from them).
                for (id, display) in &self.display.nodes {
                    if display.tags.iter().any(|chip| chip.id == tag) {
                        out.insert(DisplayUpdate::Node(*id));
                    }
                }
            }
            Subject::Palette(slot) => self.collect_palette(graph, slot, out),
            Subject::Project => {
                out.insert(DisplayUpdate::Project);
            }
        }
    }

    fn collect_palette(&self, graph: &SceneGraph, slot: PaletteSlot, out: &mut BTreeSet<DisplayUpdate>) {
        for node in graph.nodes() {
            if node.color.is_none() && node.kind.palette_slot() == slot {
                out.insert(DisplayUpdate::Node(node.id));
            }
        }
        if slot == PaletteSlot::Group {
            for group in graph.groups() {
                if group.color.is_none() {
                    out.insert(DisplayUpdate::Group(group.id));
                }
            }
        }
        for edge in graph.edges() {
            if PaletteSlot::for_edge(edge.kind) == slot {
                out.insert(DisplayUpdate::Edge(edge.id));
            }
        }
    }

    /// Recomputes one entry and reports whether it was redrawn or removed.
    fn refresh(&mut self, graph: &SceneGraph, target: DisplayUpdate) -> DisplayUpdate {
        match target {
            DisplayUpdate::Node(id) | DisplayUpdate::NodeRemoved(id) => {
                if self.refresh_node(graph, id) {
                    DisplayUpdate::Node(id)
                } else {
                    DisplayUpdate::NodeRemoved(id)
                }
            }
            DisplayUpdate::Group(id) | DisplayUpdate::GroupRemoved(id) => {
                if self.refresh_group(graph, id) {
                    DisplayUpdate::Group(id)
                } else {
                    DisplayUpdate::GroupRemoved(id)
                }
            }
            DisplayUpdate::Edge(id) | DisplayUpdate::EdgeRemoved(id) => {
                if self.refresh_edge(graph, id) {
                    DisplayUpdate::Edge(id)
                } else {
                    DisplayUpdate::EdgeRemoved(id)
                }
            }
            DisplayUpdate::Project => DisplayUpdate::Project,
        }
    }

    fn refresh_node(&mut self, graph: &SceneGraph, id: NodeId) -> bool {
        let Some(node) = graph.node(id) else {
            self.display.nodes.remove(&id);
            return false;
        };
        let display = NodeDisplay {
            color: graph.effective_node_color(node),
            locked: graph.is_effectively_locked(id),
            flagged: node.flags.flagged,
            tags: node
                .tags
                .iter()
                .filter_map(|t| graph.tag(*t))
                .map(TagChip::from)
                .collect(),
        };
        self.display.nodes.insert(id, display);
        true
    }

    fn refresh_group(&mut self, graph: &SceneGraph, id: GroupId) -> bool {
        let Some(group) = graph.group(id) else {
            self.display.groups.remove(&id);
            return false;
        };
        let display = GroupDisplay {
            color: graph.effective_group_color(group),
            locked: group.locked,
        };
        self.display.groups.insert(id, display);
        true
    }

    fn refresh_edge(&mut self, graph: &SceneGraph, id: EdgeId) -> bool {
        let Some(edge) = graph.edge(id) else {
            self.display.edges.remove(&id);
            return false;
        };
        let color = graph.edge_color(edge.kind);
        let display = EdgeDisplay {
            waypoints: edge.waypoints.iter().map(|w| (w.id, color.clone())).collect(),
            color,
        };
        self.display.edges.insert(id, display);
        true
    }
}
