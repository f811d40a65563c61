//! SceneGraph: the authoritative container for one project's canvas.
//!
//! [`SceneGraph`] owns every node, group, edge, tag and palette entry of a
//! project. Registries are private; all mutations go through methods that
//! check every precondition before the first write, so a returned
//! [`CoreError`] always means the graph is unchanged.
//!
//! # Weak references
//!
//! Nodes point at their group and their tags by id only. Groups own the
//! member order, the tag registry owns tag names and colors. Membership is
//! an explicit registry update ([`bind_node`](SceneGraph::bind_node),
//! [`unbind_node`](SceneGraph::unbind_node)), never a pointer rewrite.
//!
//! # Change notifications
//!
//! Every successful mutation queues a [`ChangeEvent`]. The queue is drained
//! by the synchronization layer via [`drain_changes`](SceneGraph::drain_changes);
//! it is not persisted and does not take part in equality.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::change::{ChangeEvent, Subject};
use crate::edge::{Edge, EdgeKind, Endpoints, Waypoint};
use crate::error::CoreError;
use crate::group::Group;
use crate::id::{EdgeId, GroupId, NodeId, TagId, WaypointId};
use crate::node::{Metadata, Node, Snippet, TodoItem};
use crate::palette::{Palette, PaletteSlot};
use crate::tag::{Tag, TagRegistry};
use crate::types::{Color, Point, Size};

/// Current on-disk layout version of a scene snapshot.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Whose description and TODO list an edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "target", content = "id", rename_all = "snake_case")]
pub enum MetaTarget {
    /// The project-wide sidebar.
    Project,
    Node(NodeId),
}

/// What [`SceneGraph::repair`] had to fix in a loaded snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub edges_removed: usize,
    pub members_removed: usize,
    pub tag_refs_removed: usize,
    pub backrefs_fixed: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == RepairReport::default()
    }
}

/// Serialized layout of a [`SceneGraph`]: flat, ordered lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SceneDocument {
    #[serde(default = "default_format")]
    format: u32,
    #[serde(default = "Palette::defaults")]
    palette: Palette,
    #[serde(default)]
    tags: TagRegistry,
    #[serde(default)]
    project: Metadata,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    edges: Vec<Edge>,
}

fn default_format() -> u32 {
    SNAPSHOT_FORMAT
}

/// The scene graph of one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SceneDocument", into = "SceneDocument")]
pub struct SceneGraph {
    nodes: BTreeMap<NodeId, Node>,
    groups: BTreeMap<GroupId, Group>,
    edges: BTreeMap<EdgeId, Edge>,
    tags: TagRegistry,
    palette: Palette,
    project: Metadata,
    /// Pending change notifications, oldest first.
    changes: Vec<ChangeEvent>,
}

impl From<SceneDocument> for SceneGraph {
    fn from(doc: SceneDocument) -> Self {
        SceneGraph {
            nodes: doc.nodes.into_iter().map(|n| (n.id, n)).collect(),
            groups: doc.groups.into_iter().map(|g| (g.id, g)).collect(),
            edges: doc.edges.into_iter().map(|e| (e.id, e)).collect(),
            tags: doc.tags,
            palette: doc.palette,
            project: doc.project,
            changes: Vec::new(),
        }
    }
}

impl From<SceneGraph> for SceneDocument {
    fn from(graph: SceneGraph) -> Self {
        SceneDocument {
            format: SNAPSHOT_FORMAT,
            palette: graph.palette,
            tags: graph.tags,
            project: graph.project,
            nodes: graph.nodes.into_values().collect(),
            groups: graph.groups.into_values().collect(),
            edges: graph.edges.into_values().collect(),
        }
    }
}

impl PartialEq for SceneGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
            && self.groups == other.groups
            && self.edges == other.edges
            && self.tags == other.tags
            && self.tags.ids() == other.tags.ids()
            && self.palette == other.palette
            && self.project == other.project
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    /// Creates an empty scene with the default palette.
    pub fn new() -> Self {
        SceneGraph {
            nodes: BTreeMap::new(),
            groups: BTreeMap::new(),
            edges: BTreeMap::new(),
            tags: TagRegistry::default(),
            palette: Palette::defaults(),
            project: Metadata::default(),
            changes: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn tag(&self, id: TagId) -> Option<&Tag> {
        self.tags.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn project_meta(&self) -> &Metadata {
        &self.project
    }

    /// Description and TODOs of a project or node.
    pub fn metadata(&self, target: MetaTarget) -> Option<&Metadata> {
        match target {
            MetaTarget::Project => Some(&self.project),
            MetaTarget::Node(id) => self.nodes.get(&id).map(|n| &n.meta),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Takes all pending change notifications.
    pub fn drain_changes(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.changes)
    }

    /// Returns `true` if change notifications are waiting to be drained.
    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    fn emit(&mut self, event: ChangeEvent) {
        self.changes.push(event);
    }

    // -----------------------------------------------------------------------
    // Lookup helpers
    // -----------------------------------------------------------------------

    fn node_ref(&self, id: NodeId) -> Result<&Node, CoreError> {
        self.nodes.get(&id).ok_or(CoreError::NodeNotFound { id })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, CoreError> {
        self.nodes.get_mut(&id).ok_or(CoreError::NodeNotFound { id })
    }

    fn group_ref(&self, id: GroupId) -> Result<&Group, CoreError> {
        self.groups.get(&id).ok_or(CoreError::GroupNotFound { id })
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut Group, CoreError> {
        self.groups.get_mut(&id).ok_or(CoreError::GroupNotFound { id })
    }

    fn edge_mut(&mut self, id: EdgeId) -> Result<&mut Edge, CoreError> {
        self.edges.get_mut(&id).ok_or(CoreError::EdgeNotFound { id })
    }

    fn metadata_mut(&mut self, target: MetaTarget) -> Result<&mut Metadata, CoreError> {
        match target {
            MetaTarget::Project => Ok(&mut self.project),
            MetaTarget::Node(id) => Ok(&mut self.node_mut(id)?.meta),
        }
    }

    // -----------------------------------------------------------------------
    // Node methods
    // -----------------------------------------------------------------------

    /// Inserts a node. If `node.group` is set, the node is appended to that
    /// group's members.
    pub fn insert_node(&mut self, node: Node) -> Result<(), CoreError> {
        if self.nodes.contains_key(&node.id) {
            return Err(CoreError::DuplicateId {
                id: node.id.to_string(),
            });
        }
        if !node.size.is_valid() {
            return Err(CoreError::InvalidSize {
                width: node.size.width,
                height: node.size.height,
            });
        }
        node.position.checked()?;
        check_snippet_ids(&node.snippets)?;
        for (i, tag) in node.tags.iter().enumerate() {
            if !self.tags.contains(*tag) {
                return Err(CoreError::TagNotFound { id: *tag });
            }
            if node.tags[..i].contains(tag) {
                return Err(CoreError::TagAlreadyAssigned {
                    node: node.id,
                    tag: *tag,
                });
            }
        }
        if let Some(group) = node.group {
            self.group_ref(group)?;
        }

        let id = node.id;
        if let Some(group) = node.group {
            if let Some(g) = self.groups.get_mut(&group) {
                g.members.push(id);
            }
            self.emit(ChangeEvent::local(Subject::Group(group)));
        }
        self.nodes.insert(id, node);
        self.emit(ChangeEvent::local(Subject::Node(id)));

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    /// Removes a node. The node must already be detached: no attached
    /// edges and no group.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, CoreError> {
        let node = self.node_ref(id)?;
        if let Some(group) = node.group {
            return Err(CoreError::NodeStillGrouped { id, group });
        }
        let count = self.edges.values().filter(|e| e.touches(id)).count();
        if count > 0 {
            return Err(CoreError::NodeHasEdges { id, count });
        }

        let node = self.nodes.remove(&id).ok_or(CoreError::NodeNotFound { id })?;
        self.emit(ChangeEvent::local(Subject::NodeRemoved(id)));
        Ok(node)
    }

    /// Moves a node, returning its previous position.
    pub fn set_node_position(&mut self, id: NodeId, position: Point) -> Result<Point, CoreError> {
        let position = position.checked()?;
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.position, position);
        self.emit(ChangeEvent::local(Subject::Node(id)));
        Ok(old)
    }

    /// Resizes a node, returning its previous size.
    pub fn set_node_size(&mut self, id: NodeId, size: Size) -> Result<Size, CoreError> {
        if !size.is_valid() {
            return Err(CoreError::InvalidSize {
                width: size.width,
                height: size.height,
            });
        }
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.size, size);
        self.emit(ChangeEvent::local(Subject::Node(id)));
        Ok(old)
    }

    /// Sets the node's own `flagged` flag, returning the previous value.
    pub fn set_node_flagged(&mut self, id: NodeId, flagged: bool) -> Result<bool, CoreError> {
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.flags.flagged, flagged);
        self.emit(ChangeEvent::local(Subject::Node(id)));
        Ok(old)
    }

    /// Sets the node's own `locked` flag, returning the previous value.
    pub fn set_node_locked(&mut self, id: NodeId, locked: bool) -> Result<bool, CoreError> {
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.flags.locked, locked);
        self.emit(ChangeEvent::local(Subject::Node(id)));
        Ok(old)
    }

    /// Sets or clears the node's color override.
    pub fn set_node_color(
        &mut self,
        id: NodeId,
        color: Option<Color>,
    ) -> Result<Option<Color>, CoreError> {
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.color, color);
        self.emit(ChangeEvent::local(Subject::Node(id)));
        Ok(old)
    }

    pub fn set_node_label(&mut self, id: NodeId, label: String) -> Result<String, CoreError> {
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.label, label);
        self.emit(ChangeEvent::local(Subject::Node(id)));
        Ok(old)
    }

    /// Replaces a description, returning the previous text.
    pub fn set_description(
        &mut self,
        target: MetaTarget,
        description: String,
    ) -> Result<String, CoreError> {
        let meta = self.metadata_mut(target)?;
        let old = std::mem::replace(&mut meta.description, description);
        self.emit_meta(target);
        Ok(old)
    }

    /// Replaces a TODO list, returning the previous list.
    pub fn set_todos(
        &mut self,
        target: MetaTarget,
        todos: Vec<TodoItem>,
    ) -> Result<Vec<TodoItem>, CoreError> {
        let meta = self.metadata_mut(target)?;
        let old = std::mem::replace(&mut meta.todos, todos);
        self.emit_meta(target);
        Ok(old)
    }

    /// Replaces a node's snippet list, returning the previous list.
    pub fn set_snippets(
        &mut self,
        id: NodeId,
        snippets: Vec<Snippet>,
    ) -> Result<Vec<Snippet>, CoreError> {
        check_snippet_ids(&snippets)?;
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.snippets, snippets);
        self.emit(ChangeEvent::local(Subject::Node(id)));
        Ok(old)
    }

    /// Project-relative paths of every asset file some node still uses.
    pub fn referenced_assets(&self) -> BTreeSet<String> {
        self.nodes
            .values()
            .flat_map(Node::asset_paths)
            .map(str::to_string)
            .collect()
    }

    fn emit_meta(&mut self, target: MetaTarget) {
        let subject = match target {
            MetaTarget::Project => Subject::Project,
            MetaTarget::Node(id) => Subject::Node(id),
        };
        self.emit(ChangeEvent::local(subject));
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Binds an ungrouped node to `group` at `index` (`None` appends).
    pub fn bind_node(
        &mut self,
        node: NodeId,
        group: GroupId,
        index: Option<usize>,
    ) -> Result<(), CoreError> {
        let current = self.node_ref(node)?.group;
        if let Some(existing) = current {
            return Err(CoreError::AlreadyGrouped {
                node,
                group: existing,
            });
        }
        let len = self.group_ref(group)?.members.len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }

        self.group_mut(group)?.members.insert(index, node);
        self.node_mut(node)?.group = Some(group);
        self.emit(ChangeEvent::local(Subject::Group(group)));
        self.emit(ChangeEvent::local(Subject::Node(node)));

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    /// Unbinds a node from its group, returning the group and the position
    /// the node held. An ungrouped node yields `Ok(None)`.
    pub fn unbind_node(&mut self, node: NodeId) -> Result<Option<(GroupId, usize)>, CoreError> {
        let Some(group) = self.node_ref(node)?.group else {
            return Ok(None);
        };
        let index = self
            .group_ref(group)?
            .member_index(node)
            .ok_or(CoreError::NotInGroup { node, group })?;

        self.group_mut(group)?.members.remove(index);
        self.node_mut(node)?.group = None;
        self.emit(ChangeEvent::local(Subject::Group(group)));
        self.emit(ChangeEvent::local(Subject::Node(node)));

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(Some((group, index)))
    }

    // -----------------------------------------------------------------------
    // Group methods
    // -----------------------------------------------------------------------

    /// Inserts a group and binds its listed members, in order.
    pub fn insert_group(&mut self, group: Group) -> Result<(), CoreError> {
        if self.groups.contains_key(&group.id) {
            return Err(CoreError::DuplicateId {
                id: group.id.to_string(),
            });
        }
        if !group.size.is_valid() {
            return Err(CoreError::InvalidSize {
                width: group.size.width,
                height: group.size.height,
            });
        }
        group.position.checked()?;
        for (i, member) in group.members.iter().enumerate() {
            let node = self.node_ref(*member)?;
            if let Some(existing) = node.group {
                return Err(CoreError::AlreadyGrouped {
                    node: *member,
                    group: existing,
                });
            }
            if group.members[..i].contains(member) {
                return Err(CoreError::DuplicateId {
                    id: member.to_string(),
                });
            }
        }

        let id = group.id;
        let members = group.members.clone();
        self.groups.insert(id, group);
        for member in members {
            if let Some(node) = self.nodes.get_mut(&member) {
                node.group = Some(id);
            }
            self.emit(ChangeEvent::local(Subject::Node(member)));
        }
        self.emit(ChangeEvent::local(Subject::Group(id)));

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    /// Removes a group. Members are unbound, not deleted; the returned group
    /// keeps the member order it had.
    pub fn remove_group(&mut self, id: GroupId) -> Result<Group, CoreError> {
        let group = self.groups.remove(&id).ok_or(CoreError::GroupNotFound { id })?;
        for member in &group.members {
            if let Some(node) = self.nodes.get_mut(member) {
                node.group = None;
            }
            self.emit(ChangeEvent::local(Subject::Node(*member)));
        }
        self.emit(ChangeEvent::local(Subject::GroupRemoved(id)));

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(group)
    }

    pub fn set_group_position(&mut self, id: GroupId, position: Point) -> Result<Point, CoreError> {
        let position = position.checked()?;
        let group = self.group_mut(id)?;
        let old = std::mem::replace(&mut group.position, position);
        self.emit(ChangeEvent::local(Subject::Group(id)));
        Ok(old)
    }

    pub fn set_group_size(&mut self, id: GroupId, size: Size) -> Result<Size, CoreError> {
        if !size.is_valid() {
            return Err(CoreError::InvalidSize {
                width: size.width,
                height: size.height,
            });
        }
        let group = self.group_mut(id)?;
        let old = std::mem::replace(&mut group.size, size);
        self.emit(ChangeEvent::local(Subject::Group(id)));
        Ok(old)
    }

    /// Sets the group's lock. Members are not touched; their effective lock
    /// is derived at query time.
    pub fn set_group_locked(&mut self, id: GroupId, locked: bool) -> Result<bool, CoreError> {
        let group = self.group_mut(id)?;
        let old = std::mem::replace(&mut group.locked, locked);
        self.emit(ChangeEvent::local(Subject::Group(id)));
        Ok(old)
    }

    pub fn set_group_color(
        &mut self,
        id: GroupId,
        color: Option<Color>,
    ) -> Result<Option<Color>, CoreError> {
        let group = self.group_mut(id)?;
        let old = std::mem::replace(&mut group.color, color);
        self.emit(ChangeEvent::local(Subject::Group(id)));
        Ok(old)
    }

    pub fn set_group_name(&mut self, id: GroupId, name: String) -> Result<String, CoreError> {
        let group = self.group_mut(id)?;
        let old = std::mem::replace(&mut group.name, name);
        self.emit(ChangeEvent::local(Subject::Group(id)));
        Ok(old)
    }

    // -----------------------------------------------------------------------
    // Edge methods
    // -----------------------------------------------------------------------

    /// Checks the referential rules for an edge of `kind` between `source`
    /// and `target`. `except` names an edge to ignore in the duplicate check
    /// (the edge being retargeted).
    pub fn validate_edge(
        &self,
        kind: EdgeKind,
        source: NodeId,
        target: NodeId,
        except: Option<EdgeId>,
    ) -> Result<(), CoreError> {
        self.node_ref(source)?;
        let target_node = self.node_ref(target)?;
        if source == target {
            return Err(CoreError::InvalidEdge {
                reason: format!("edge from node {} to itself", source),
            });
        }
        if kind == EdgeKind::Pipeline && target_node.kind.is_reference() {
            return Err(CoreError::InvalidEdge {
                reason: format!("pipeline edge may not target reference node {}", target),
            });
        }
        let duplicate = self.edges.values().any(|e| {
            Some(e.id) != except && e.kind == kind && e.source == source && e.target == target
        });
        if duplicate {
            return Err(CoreError::InvalidEdge {
                reason: format!(
                    "a {} edge from {} to {} already exists",
                    kind.as_str(),
                    source,
                    target
                ),
            });
        }
        Ok(())
    }

    /// Inserts an edge. Embedded waypoints are marked connected.
    pub fn insert_edge(&mut self, mut edge: Edge) -> Result<(), CoreError> {
        if self.edges.contains_key(&edge.id) {
            return Err(CoreError::DuplicateId {
                id: edge.id.to_string(),
            });
        }
        self.validate_edge(edge.kind, edge.source, edge.target, None)?;
        for (i, w) in edge.waypoints.iter().enumerate() {
            if edge.waypoints[..i].iter().any(|p| p.id == w.id) {
                return Err(CoreError::DuplicateId {
                    id: w.id.to_string(),
                });
            }
            w.position.checked()?;
        }

        for w in edge.waypoints.iter_mut() {
            w.connected = true;
        }
        let id = edge.id;
        self.edges.insert(id, edge);
        self.emit(ChangeEvent::local(Subject::Edge(id)));
        Ok(())
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Result<Edge, CoreError> {
        let edge = self.edges.remove(&id).ok_or(CoreError::EdgeNotFound { id })?;
        self.emit(ChangeEvent::local(Subject::EdgeRemoved(id)));
        Ok(edge)
    }

    /// Reconnects an edge, returning its previous endpoints. The new
    /// endpoints pass the same checks as a fresh edge.
    pub fn retarget_edge(&mut self, id: EdgeId, to: Endpoints) -> Result<Endpoints, CoreError> {
        let kind = self.edges.get(&id).ok_or(CoreError::EdgeNotFound { id })?.kind;
        self.validate_edge(kind, to.source, to.target, Some(id))?;
        let edge = self.edge_mut(id)?;
        let old = edge.endpoints();
        edge.source = to.source;
        edge.target = to.target;
        self.emit(ChangeEvent::local(Subject::Edge(id)));
        Ok(old)
    }

    /// Embeds a waypoint at `index` in an edge's control points.
    pub fn insert_waypoint(
        &mut self,
        edge: EdgeId,
        index: usize,
        mut waypoint: Waypoint,
    ) -> Result<(), CoreError> {
        let e = self.edges.get(&edge).ok_or(CoreError::EdgeNotFound { id: edge })?;
        if e.waypoint_index(waypoint.id).is_some() {
            return Err(CoreError::DuplicateId {
                id: waypoint.id.to_string(),
            });
        }
        let len = e.waypoints.len();
        if index > len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }
        waypoint.position.checked()?;

        waypoint.connected = true;
        self.edge_mut(edge)?.waypoints.insert(index, waypoint);
        self.emit(ChangeEvent::local(Subject::Edge(edge)));
        Ok(())
    }

    /// Removes a waypoint, returning its index and the detached waypoint.
    pub fn remove_waypoint(
        &mut self,
        edge: EdgeId,
        id: WaypointId,
    ) -> Result<(usize, Waypoint), CoreError> {
        let e = self.edge_mut(edge)?;
        let index = e
            .waypoint_index(id)
            .ok_or(CoreError::WaypointNotFound { edge, id })?;
        let mut waypoint = e.waypoints.remove(index);
        waypoint.connected = false;
        self.emit(ChangeEvent::local(Subject::Edge(edge)));
        Ok((index, waypoint))
    }

    pub fn set_waypoint_position(
        &mut self,
        edge: EdgeId,
        id: WaypointId,
        position: Point,
    ) -> Result<Point, CoreError> {
        let position = position.checked()?;
        let e = self.edge_mut(edge)?;
        let waypoint = e
            .waypoints
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or(CoreError::WaypointNotFound { edge, id })?;
        let old = std::mem::replace(&mut waypoint.position, position);
        self.emit(ChangeEvent::local(Subject::Edge(edge)));
        Ok(old)
    }

    /// All edges attached to `node`, in id order.
    pub fn incident_edges(&self, node: NodeId) -> Vec<&Edge> {
        self.edges.values().filter(|e| e.touches(node)).collect()
    }

    // -----------------------------------------------------------------------
    // Tag methods
    // -----------------------------------------------------------------------

    /// Registers a tag at `index` in the tag order.
    pub fn insert_tag(&mut self, tag: Tag, index: usize) -> Result<(), CoreError> {
        let id = tag.id;
        self.tags.insert(tag, index)?;
        self.emit(ChangeEvent::global(Subject::Tag(id)));
        Ok(())
    }

    /// Unregisters a tag. No node may still reference it.
    pub fn remove_tag(&mut self, id: TagId) -> Result<(usize, Tag), CoreError> {
        let count = self.nodes.values().filter(|n| n.has_tag(id)).count();
        if count > 0 {
            return Err(CoreError::TagInUse { id, count });
        }
        let removed = self.tags.remove(id)?;
        self.emit(ChangeEvent::global(Subject::Tag(id)));
        Ok(removed)
    }

    pub fn rename_tag(&mut self, id: TagId, name: String) -> Result<String, CoreError> {
        let old = self.tags.rename(id, name)?;
        self.emit(ChangeEvent::global(Subject::Tag(id)));
        Ok(old)
    }

    pub fn recolor_tag(&mut self, id: TagId, color: Color) -> Result<Color, CoreError> {
        let old = self.tags.recolor(id, color)?;
        self.emit(ChangeEvent::global(Subject::Tag(id)));
        Ok(old)
    }

    /// Moves a tag within the tag order, returning its previous index.
    pub fn move_tag(&mut self, id: TagId, to: usize) -> Result<usize, CoreError> {
        let old = self.tags.move_to(id, to)?;
        self.emit(ChangeEvent::global(Subject::Tag(id)));
        Ok(old)
    }

    /// Adds `tag` to a node's tag list at `index` (`None` appends).
    pub fn assign_tag(
        &mut self,
        node: NodeId,
        tag: TagId,
        index: Option<usize>,
    ) -> Result<(), CoreError> {
        if !self.tags.contains(tag) {
            return Err(CoreError::TagNotFound { id: tag });
        }
        let n = self.node_ref(node)?;
        if n.has_tag(tag) {
            return Err(CoreError::TagAlreadyAssigned { node, tag });
        }
        let len = n.tags.len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }
        self.node_mut(node)?.tags.insert(index, tag);
        self.emit(ChangeEvent::local(Subject::Node(node)));
        Ok(())
    }

    /// Removes `tag` from a node, returning the position it held.
    pub fn unassign_tag(&mut self, node: NodeId, tag: TagId) -> Result<usize, CoreError> {
        let n = self.node_mut(node)?;
        let index = n
            .tags
            .iter()
            .position(|t| *t == tag)
            .ok_or(CoreError::TagNotAssigned { node, tag })?;
        n.tags.remove(index);
        self.emit(ChangeEvent::local(Subject::Node(node)));
        Ok(index)
    }

    /// Nodes carrying `tag`, in id order.
    pub fn tag_holders(&self, tag: TagId) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.has_tag(tag))
            .map(|n| n.id)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Palette
    // -----------------------------------------------------------------------

    /// Sets a palette slot, returning the previous color.
    pub fn set_palette_color(&mut self, slot: PaletteSlot, color: Color) -> Color {
        let old = self.palette.set(slot, color);
        self.emit(ChangeEvent::global(Subject::Palette(slot)));
        old
    }

    // -----------------------------------------------------------------------
    // Derived state
    // -----------------------------------------------------------------------

    /// A node is effectively locked when its own flag or its group's lock
    /// is set. Nothing is stored for the derived case.
    pub fn is_effectively_locked(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        node.flags.locked
            || node
                .group
                .and_then(|g| self.groups.get(&g))
                .is_some_and(|g| g.locked)
    }

    /// The color a node is drawn with: its override, else its palette slot.
    pub fn effective_node_color(&self, node: &Node) -> Color {
        node.color
            .clone()
            .unwrap_or_else(|| self.palette.color(node.kind.palette_slot()))
    }

    pub fn effective_group_color(&self, group: &Group) -> Color {
        group
            .color
            .clone()
            .unwrap_or_else(|| self.palette.color(PaletteSlot::Group))
    }

    /// Edges (and their waypoints) are always drawn in their kind's color.
    pub fn edge_color(&self, kind: EdgeKind) -> Color {
        self.palette.color(PaletteSlot::for_edge(kind))
    }

    /// Pipeline steps in data-flow order.
    ///
    /// Builds a directed view over pipeline edges and sorts it
    /// topologically. Steps without pipeline edges appear in id order.
    pub fn pipeline_order(&self) -> Result<Vec<NodeId>, CoreError> {
        let mut view: DiGraphMap<NodeId, EdgeId> = DiGraphMap::new();
        for node in self.nodes.values().filter(|n| n.kind.is_pipeline_step()) {
            view.add_node(node.id);
        }
        for edge in self.edges.values().filter(|e| e.kind == EdgeKind::Pipeline) {
            view.add_edge(edge.source, edge.target, edge.id);
        }
        toposort(&view, None).map_err(|cycle| CoreError::PipelineCycle {
            node: cycle.node_id(),
        })
    }

    // -----------------------------------------------------------------------
    // Snapshot repair
    // -----------------------------------------------------------------------

    /// Brings a freshly deserialized snapshot back to a consistent state.
    ///
    /// Drops edges with missing endpoints or an invalid pipeline target,
    /// group members that no longer exist or appear in more than one group,
    /// and tag references to unknown tags; then rewrites every node's group
    /// back-reference from the groups' member lists.
    pub fn repair(&mut self) -> RepairReport {
        let mut report = RepairReport::default();

        let nodes = &self.nodes;
        let before = self.edges.len();
        self.edges.retain(|_, e| {
            let (Some(_), Some(target)) = (nodes.get(&e.source), nodes.get(&e.target)) else {
                return false;
            };
            e.source != e.target && !(e.kind == EdgeKind::Pipeline && target.kind.is_reference())
        });
        report.edges_removed = before - self.edges.len();

        let mut owner: BTreeMap<NodeId, GroupId> = BTreeMap::new();
        for group in self.groups.values_mut() {
            let before = group.members.len();
            let gid = group.id;
            group.members.retain(|m| {
                if !nodes.contains_key(m) || owner.contains_key(m) {
                    return false;
                }
                owner.insert(*m, gid);
                true
            });
            report.members_removed += before - group.members.len();
        }

        for node in self.nodes.values_mut() {
            let expected = owner.get(&node.id).copied();
            if node.group != expected {
                node.group = expected;
                report.backrefs_fixed += 1;
            }
            let before = node.tags.len();
            let mut seen = Vec::with_capacity(before);
            let tags = &self.tags;
            node.tags.retain(|t| {
                if !tags.contains(*t) || seen.contains(t) {
                    return false;
                }
                seen.push(*t);
                true
            });
            report.tag_refs_removed += before - node.tags.len();
        }

        for edge in self.edges.values_mut() {
            for w in edge.waypoints.iter_mut() {
                w.connected = true;
            }
        }

        report
    }

    /// Verifies node↔group back-references and tag references.
    ///
    /// Only called in debug builds (via `cfg(debug_assertions)`).
    #[cfg(debug_assertions)]
    fn assert_consistency(&self) {
        for group in self.groups.values() {
            for member in &group.members {
                let node = self
                    .nodes
                    .get(member)
                    .unwrap_or_else(|| panic!("group {} lists missing node {}", group.id, member));
                assert_eq!(
                    node.group,
                    Some(group.id),
                    "node {} back-reference does not match group {}",
                    member,
                    group.id
                );
            }
        }
        for node in self.nodes.values() {
            if let Some(gid) = node.group {
                let group = self
                    .groups
                    .get(&gid)
                    .unwrap_or_else(|| panic!("node {} points at missing group {}", node.id, gid));
                assert!(
                    group.contains(node.id),
                    "group {} does not list member {}",
                    gid,
                    node.id
                );
            }
        }
    }
}

fn check_snippet_ids(snippets: &[Snippet]) -> Result<(), CoreError> {
    for (i, snippet) in snippets.iter().enumerate() {
        if snippets[..i].iter().any(|s| s.id == snippet.id) {
            return Err(CoreError::DuplicateId {
                id: snippet.id.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ModuleType, ReferenceMeta};

    fn step(graph: &mut SceneGraph, module: ModuleType, label: &str) -> NodeId {
        let node = Node::step(module, Point::new(0.0, 0.0), label);
        let id = node.id;
        graph.insert_node(node).unwrap();
        id
    }

    fn reference(graph: &mut SceneGraph, title: &str) -> NodeId {
        let node = Node::reference(
            Point::new(0.0, 200.0),
            ReferenceMeta {
                title: title.into(),
                ..Default::default()
            },
        );
        let id = node.id;
        graph.insert_node(node).unwrap();
        id
    }

    #[test]
    fn pipeline_edge_into_reference_is_rejected() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "load");
        let r = reference(&mut graph, "paper");
        let err = graph
            .insert_edge(Edge::new(EdgeKind::Pipeline, a, r))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidEdge { .. }));
        assert_eq!(graph.edge_count(), 0);

        // A reference edge between the same nodes is fine.
        graph.insert_edge(Edge::new(EdgeKind::Reference, r, a)).unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn retarget_applies_same_rules() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let b = step(&mut graph, ModuleType::Output, "b");
        let r = reference(&mut graph, "paper");
        let edge = Edge::new(EdgeKind::Pipeline, a, b);
        let eid = edge.id;
        graph.insert_edge(edge).unwrap();

        let err = graph
            .retarget_edge(eid, Endpoints { source: a, target: r })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidEdge { .. }));
        assert_eq!(graph.edge(eid).unwrap().target, b);

        let old = graph
            .retarget_edge(eid, Endpoints { source: b, target: a })
            .unwrap();
        assert_eq!(old, Endpoints { source: a, target: b });
    }

    #[test]
    fn self_loops_and_duplicates_rejected() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let b = step(&mut graph, ModuleType::Process, "b");
        assert!(graph.insert_edge(Edge::new(EdgeKind::Pipeline, a, a)).is_err());
        graph.insert_edge(Edge::new(EdgeKind::Pipeline, a, b)).unwrap();
        assert!(graph.insert_edge(Edge::new(EdgeKind::Pipeline, a, b)).is_err());
    }

    #[test]
    fn double_binding_is_rejected() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let g1 = Group::new("g1", Point::default(), Size::GROUP).with_members([a]);
        let g1_id = g1.id;
        graph.insert_group(g1).unwrap();

        let g2 = Group::new("g2", Point::default(), Size::GROUP);
        let g2_id = g2.id;
        graph.insert_group(g2).unwrap();

        let err = graph.bind_node(a, g2_id, None).unwrap_err();
        assert_eq!(err, CoreError::AlreadyGrouped { node: a, group: g1_id });
        assert!(graph.group(g2_id).unwrap().members.is_empty());

        let g3 = Group::new("g3", Point::default(), Size::GROUP).with_members([a]);
        assert!(matches!(graph.insert_group(g3), Err(CoreError::AlreadyGrouped { .. })));
    }

    #[test]
    fn removing_group_unbinds_members() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let b = step(&mut graph, ModuleType::Output, "b");
        let group = Group::new("g", Point::default(), Size::GROUP).with_members([b, a]);
        let gid = group.id;
        graph.insert_group(group).unwrap();
        assert_eq!(graph.node(a).unwrap().group, Some(gid));

        let removed = graph.remove_group(gid).unwrap();
        assert_eq!(removed.members, vec![b, a]);
        assert_eq!(graph.node_count(), 2);
        assert!(graph.node(a).unwrap().group.is_none());
        assert!(graph.node(b).unwrap().group.is_none());
    }

    #[test]
    fn group_lock_is_derived() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let group = Group::new("g", Point::default(), Size::GROUP).with_members([a]);
        let gid = group.id;
        graph.insert_group(group).unwrap();

        assert!(!graph.is_effectively_locked(a));
        graph.set_group_locked(gid, true).unwrap();
        assert!(graph.is_effectively_locked(a));
        assert!(!graph.node(a).unwrap().flags.locked);

        graph.unbind_node(a).unwrap();
        assert!(!graph.is_effectively_locked(a));
    }

    #[test]
    fn remove_node_requires_detached_node() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let b = step(&mut graph, ModuleType::Output, "b");
        let edge = Edge::new(EdgeKind::Pipeline, a, b);
        let eid = edge.id;
        graph.insert_edge(edge).unwrap();
        assert!(matches!(graph.remove_node(a), Err(CoreError::NodeHasEdges { count: 1, .. })));
        graph.remove_edge(eid).unwrap();
        assert!(graph.remove_node(a).is_ok());
    }

    #[test]
    fn tag_in_use_cannot_be_removed() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let tag = Tag::new("ml");
        let tid = tag.id;
        graph.insert_tag(tag, 0).unwrap();
        graph.assign_tag(a, tid, None).unwrap();
        assert!(matches!(graph.remove_tag(tid), Err(CoreError::TagInUse { count: 1, .. })));
        assert_eq!(graph.unassign_tag(a, tid).unwrap(), 0);
        assert_eq!(graph.remove_tag(tid).unwrap().0, 0);
    }

    #[test]
    fn palette_change_is_global_and_respects_overrides() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let b = step(&mut graph, ModuleType::Input, "b");
        graph
            .set_node_color(b, Some(Color::hex("#000000").unwrap()))
            .unwrap();
        graph.drain_changes();

        graph.set_palette_color(PaletteSlot::Input, Color::hex("#111111").unwrap());
        let changes = graph.drain_changes();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_global());

        let color_a = graph.effective_node_color(graph.node(a).unwrap());
        let color_b = graph.effective_node_color(graph.node(b).unwrap());
        assert_eq!(color_a.as_str(), "#111111");
        assert_eq!(color_b.as_str(), "#000000");
    }

    #[test]
    fn pipeline_order_is_topological() {
        let mut graph = SceneGraph::new();
        let out = step(&mut graph, ModuleType::Output, "out");
        let inp = step(&mut graph, ModuleType::Input, "in");
        let mid = step(&mut graph, ModuleType::Process, "mid");
        graph.insert_edge(Edge::new(EdgeKind::Pipeline, inp, mid)).unwrap();
        graph.insert_edge(Edge::new(EdgeKind::Pipeline, mid, out)).unwrap();

        let order = graph.pipeline_order().unwrap();
        let pos = |id| order.iter().position(|n| *n == id).unwrap();
        assert!(pos(inp) < pos(mid));
        assert!(pos(mid) < pos(out));

        graph.insert_edge(Edge::new(EdgeKind::Pipeline, out, inp)).unwrap();
        assert!(matches!(graph.pipeline_order(), Err(CoreError::PipelineCycle { .. })));
    }

    #[test]
    fn waypoints_are_marked_connected() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let b = step(&mut graph, ModuleType::Output, "b");
        let edge = Edge::new(EdgeKind::Pipeline, a, b);
        let eid = edge.id;
        graph.insert_edge(edge).unwrap();

        let wp = Waypoint::new(Point::new(50.0, 50.0));
        let wid = wp.id;
        graph.insert_waypoint(eid, 0, wp).unwrap();
        assert!(graph.edge(eid).unwrap().waypoints[0].connected);

        let (index, detached) = graph.remove_waypoint(eid, wid).unwrap();
        assert_eq!(index, 0);
        assert!(!detached.connected);
        assert!(graph.insert_waypoint(eid, 1, detached).is_err());
    }

    #[test]
    fn snapshot_roundtrip_is_lossless() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let r = reference(&mut graph, "paper");
        let tag = Tag::new("core");
        let tid = tag.id;
        graph.insert_tag(tag, 0).unwrap();
        graph.assign_tag(a, tid, None).unwrap();
        graph.insert_edge(Edge::new(EdgeKind::Reference, r, a)).unwrap();
        graph
            .insert_group(Group::new("g", Point::default(), Size::GROUP).with_members([a]))
            .unwrap();
        graph
            .set_description(MetaTarget::Project, "survey of methods".into())
            .unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let back: SceneGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
        assert!(!back.has_pending_changes());
    }

    #[test]
    fn repair_drops_dangling_references() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let r = reference(&mut graph, "paper");
        let ghost = NodeId::new();
        let ghost_tag = TagId::new();

        let mut doc: SceneDocument = graph.clone().into();
        doc.edges.push(Edge::new(EdgeKind::Pipeline, a, ghost));
        doc.edges.push(Edge::new(EdgeKind::Pipeline, a, r));
        doc.groups
            .push(Group::new("g", Point::default(), Size::GROUP).with_members([a, ghost]));
        doc.nodes
            .iter_mut()
            .find(|n| n.id == a)
            .unwrap()
            .tags
            .push(ghost_tag);

        let mut loaded = SceneGraph::from(doc);
        let report = loaded.repair();
        assert_eq!(report.edges_removed, 2);
        assert_eq!(report.members_removed, 1);
        assert_eq!(report.tag_refs_removed, 1);
        assert_eq!(report.backrefs_fixed, 1);
        assert!(loaded.node(a).unwrap().group.is_some());

        assert!(loaded.repair().is_clean());
    }

    #[test]
    fn metadata_targets() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Process, "a");
        graph
            .set_todos(MetaTarget::Node(a), vec![TodoItem::new("read paper")])
            .unwrap();
        assert_eq!(graph.metadata(MetaTarget::Node(a)).unwrap().todos.len(), 1);
        assert!(graph.metadata(MetaTarget::Project).unwrap().todos.is_empty());
        assert!(graph
            .set_description(MetaTarget::Node(NodeId::new()), "x".into())
            .is_err());
    }

    #[test]
    fn non_finite_positions_are_rejected() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Input, "a");
        let b = step(&mut graph, ModuleType::Output, "b");

        let err = graph
            .set_node_position(a, Point::new(f64::NAN, 0.0))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPosition { .. }));
        assert_eq!(graph.node(a).unwrap().position, Point::new(0.0, 0.0));

        let stray = Node::step(ModuleType::Process, Point::new(0.0, f64::INFINITY), "c");
        assert!(graph.insert_node(stray).is_err());
        assert_eq!(graph.node_count(), 2);

        let group = Group::new("g", Point::default(), Size::GROUP);
        let gid = group.id;
        graph.insert_group(group).unwrap();
        assert!(graph
            .set_group_position(gid, Point::new(f64::NEG_INFINITY, 1.0))
            .is_err());

        let edge = Edge::new(EdgeKind::Pipeline, a, b);
        let eid = edge.id;
        graph.insert_edge(edge).unwrap();
        let err = graph
            .insert_waypoint(eid, 0, Waypoint::new(Point::new(f64::NAN, f64::NAN)))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPosition { .. }));
        assert!(graph.edge(eid).unwrap().waypoints.is_empty());
    }

    #[test]
    fn snippet_ids_must_be_unique() {
        let mut graph = SceneGraph::new();
        let a = step(&mut graph, ModuleType::Process, "a");
        let snippet = Snippet::text("quote");
        let err = graph
            .set_snippets(a, vec![snippet.clone(), snippet.clone()])
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateId { .. }));
        assert!(graph.node(a).unwrap().snippets.is_empty());

        let old = graph.set_snippets(a, vec![snippet]).unwrap();
        assert!(old.is_empty());
        assert_eq!(graph.node(a).unwrap().snippets.len(), 1);
    }

    #[test]
    fn referenced_assets_collects_every_node() {
        let mut graph = SceneGraph::new();
        let paper = Node::reference(
            Point::default(),
            ReferenceMeta {
                title: "paper".into(),
                source_path: "assets/papers/paper.md".into(),
                ..Default::default()
            },
        );
        let pid = paper.id;
        graph.insert_node(paper).unwrap();
        graph
            .set_snippets(pid, vec![Snippet::image("assets/images/fig1.png")])
            .unwrap();
        step(&mut graph, ModuleType::Process, "no assets");

        let assets: Vec<String> = graph.referenced_assets().into_iter().collect();
        assert_eq!(
            assets,
            vec!["assets/images/fig1.png", "assets/papers/paper.md"]
        );
    }
}
