//! Reversible, serializable edit commands.
//!
//! A [`Command`] captures everything needed to apply one user edit and to
//! undo it: values, never references into the model. Builders
//! (`Command::delete_node`, `Command::move_items`, ...) read the live
//! [`SceneGraph`] to capture the before-state, so a command is always built
//! immediately before it is executed.
//!
//! Every command is atomic: [`Command::apply`] and [`Command::invert`]
//! either complete fully or leave the graph untouched. Single-step variants
//! inherit this from the model; multi-step variants run on a scratch copy
//! that is swapped in only on success.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use rflow_core::{
    Color, CoreError, Edge, EdgeId, EdgeKind, Endpoints, Group, GroupId, MetaTarget, Metadata,
    Node, NodeId, PaletteSlot, Point, SceneGraph, Size, Snippet, SnippetId, Tag, TagId, TodoItem,
    Waypoint, WaypointId,
};

/// A node or a group, for edits that apply to both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "item", content = "id", rename_all = "snake_case")]
pub enum ItemRef {
    Node(NodeId),
    Group(GroupId),
}

/// A node's position within a group's member list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSlot {
    pub group: GroupId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeShift {
    pub id: NodeId,
    pub from: Point,
    pub to: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupShift {
    pub id: GroupId,
    pub from: Point,
    pub to: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaypointShift {
    pub edge: EdgeId,
    pub id: WaypointId,
    pub from: Point,
    pub to: Point,
}

/// A node that held a tag, and where in its tag list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagHolder {
    pub node: NodeId,
    pub index: usize,
}

/// What a drag or keyboard nudge moves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub nodes: Vec<NodeId>,
    pub groups: Vec<GroupId>,
    pub waypoints: Vec<(EdgeId, WaypointId)>,
    /// Move the members of selected groups along with the group frame.
    pub carry_members: bool,
}

impl Selection {
    pub fn nodes(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Selection {
            nodes: nodes.into_iter().collect(),
            ..Default::default()
        }
    }

    /// A group together with all of its members.
    pub fn group_with_members(group: GroupId) -> Self {
        Selection {
            groups: vec![group],
            carry_members: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.groups.is_empty() && self.waypoints.is_empty()
    }
}

/// A reversible graph edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// A node was placed, optionally straight into a group.
    CreateNode {
        node: Node,
        slot: Option<GroupSlot>,
    },
    /// A node was deleted together with its attached edges.
    DeleteNode {
        node: Node,
        slot: Option<GroupSlot>,
        edges: Vec<Edge>,
    },
    /// Nodes, group frames and waypoints moved together in one gesture.
    Move {
        nodes: Vec<NodeShift>,
        groups: Vec<GroupShift>,
        waypoints: Vec<WaypointShift>,
    },
    ResizeNode {
        id: NodeId,
        from: Size,
        to: Size,
    },
    ResizeGroup {
        id: GroupId,
        from: Size,
        to: Size,
    },
    /// A node left a group, joined one, or both.
    ReparentNode {
        node: NodeId,
        from: Option<GroupSlot>,
        to: Option<GroupSlot>,
    },
    CreateGroup {
        group: Group,
    },
    /// A group was deleted; its members stay on the canvas, unbound.
    DeleteGroup {
        group: Group,
    },
    CreateEdge {
        edge: Edge,
    },
    DeleteEdge {
        edge: Edge,
    },
    RetargetEdge {
        id: EdgeId,
        from: Endpoints,
        to: Endpoints,
    },
    AddWaypoint {
        edge: EdgeId,
        index: usize,
        waypoint: Waypoint,
    },
    RemoveWaypoint {
        edge: EdgeId,
        index: usize,
        waypoint: Waypoint,
    },
    SetFlag {
        node: NodeId,
        from: bool,
        to: bool,
    },
    SetLock {
        target: ItemRef,
        from: bool,
        to: bool,
    },
    SetColor {
        target: ItemRef,
        from: Option<Color>,
        to: Option<Color>,
    },
    Rename {
        target: ItemRef,
        from: String,
        to: String,
    },
    EditDescription {
        target: MetaTarget,
        from: String,
        to: String,
    },
    /// Any TODO edit (add, remove, edit, toggle, reorder) as whole lists.
    EditTodoList {
        target: MetaTarget,
        from: Vec<TodoItem>,
        to: Vec<TodoItem>,
    },
    /// Any snippet edit (add, remove, copy in) as whole lists.
    EditSnippets {
        node: NodeId,
        from: Vec<Snippet>,
        to: Vec<Snippet>,
    },
    TagCreate {
        tag: Tag,
        index: usize,
    },
    TagAssign {
        node: NodeId,
        tag: TagId,
        index: usize,
    },
    TagUnassign {
        node: NodeId,
        tag: TagId,
        index: usize,
    },
    TagRename {
        tag: TagId,
        from: String,
        to: String,
    },
    TagRecolor {
        tag: TagId,
        from: Color,
        to: Color,
    },
    /// A tag was deleted after being removed from every holder.
    TagDelete {
        tag: Tag,
        index: usize,
        holders: Vec<TagHolder>,
    },
    TagMove {
        tag: TagId,
        from: usize,
        to: usize,
    },
    PaletteColorChange {
        slot: PaletteSlot,
        from: Color,
        to: Color,
    },
    /// Sub-commands applied all-or-nothing, undone in reverse order.
    Batch {
        commands: Vec<Command>,
        description: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn pick<T>(self, from: T, to: T) -> T {
        match self {
            Direction::Forward => to,
            Direction::Backward => from,
        }
    }
}

/// Runs `f` on a scratch copy and swaps it in only if every step succeeded.
fn atomically<F>(graph: &mut SceneGraph, f: F) -> Result<(), CoreError>
where
    F: FnOnce(&mut SceneGraph) -> Result<(), CoreError>,
{
    let mut scratch = graph.clone();
    f(&mut scratch)?;
    *graph = scratch;
    Ok(())
}

fn restore_node(
    graph: &mut SceneGraph,
    node: &Node,
    slot: Option<GroupSlot>,
    edges: &[Edge],
) -> Result<(), CoreError> {
    let mut node = node.clone();
    node.group = None;
    let id = node.id;
    graph.insert_node(node)?;
    if let Some(slot) = slot {
        graph.bind_node(id, slot.group, Some(slot.index))?;
    }
    for edge in edges {
        graph.insert_edge(edge.clone())?;
    }
    Ok(())
}

fn detach_node(graph: &mut SceneGraph, id: NodeId) -> Result<(), CoreError> {
    let incident: Vec<EdgeId> = graph.incident_edges(id).iter().map(|e| e.id).collect();
    for edge in incident {
        graph.remove_edge(edge)?;
    }
    graph.unbind_node(id)?;
    graph.remove_node(id)?;
    Ok(())
}

fn ensure_unlocked(graph: &SceneGraph, item: ItemRef) -> Result<(), CoreError> {
    let locked = match item {
        ItemRef::Node(id) => graph.is_effectively_locked(id),
        ItemRef::Group(id) => graph.group(id).is_some_and(|g| g.locked),
    };
    if locked {
        return Err(CoreError::Locked {
            entity: describe_item(item),
        });
    }
    Ok(())
}

fn describe_item(item: ItemRef) -> String {
    match item {
        ItemRef::Node(id) => format!("node {}", id),
        ItemRef::Group(id) => format!("group {}", id),
    }
}

fn slot_of(graph: &SceneGraph, node: &Node) -> Option<GroupSlot> {
    let group = node.group?;
    let index = graph.group(group)?.member_index(node.id)?;
    Some(GroupSlot { group, index })
}

fn node_of(graph: &SceneGraph, id: NodeId) -> Result<&Node, CoreError> {
    graph.node(id).ok_or(CoreError::NodeNotFound { id })
}

fn group_of(graph: &SceneGraph, id: GroupId) -> Result<&Group, CoreError> {
    graph.group(id).ok_or(CoreError::GroupNotFound { id })
}

fn edge_of(graph: &SceneGraph, id: EdgeId) -> Result<&Edge, CoreError> {
    graph.edge(id).ok_or(CoreError::EdgeNotFound { id })
}

fn tag_of(graph: &SceneGraph, id: TagId) -> Result<&Tag, CoreError> {
    graph.tag(id).ok_or(CoreError::TagNotFound { id })
}

fn meta_of(graph: &SceneGraph, target: MetaTarget) -> Result<&Metadata, CoreError> {
    graph.metadata(target).ok_or(match target {
        MetaTarget::Node(id) => CoreError::NodeNotFound { id },
        MetaTarget::Project => CoreError::Inconsistent {
            reason: "project metadata missing".to_string(),
        },
    })
}

fn todos_of(graph: &SceneGraph, target: MetaTarget) -> Result<Vec<TodoItem>, CoreError> {
    Ok(meta_of(graph, target)?.todos.clone())
}

fn check_index(index: usize, len: usize) -> Result<(), CoreError> {
    if index >= len {
        return Err(CoreError::IndexOutOfRange { index, len });
    }
    Ok(())
}

impl Command {
    /// Applies the edit. An error means the graph is unchanged.
    pub fn apply(&self, graph: &mut SceneGraph) -> Result<(), CoreError> {
        self.run(graph, Direction::Forward)
    }

    /// Applies the edit to a graph the caller throws away on failure, so
    /// no scratch copy is taken. An error may leave `graph` half-edited.
    pub(crate) fn apply_in_place(&self, graph: &mut SceneGraph) -> Result<(), CoreError> {
        self.step(graph, Direction::Forward)
    }

    /// Reverts the edit. An error means the graph is unchanged.
    pub fn invert(&self, graph: &mut SceneGraph) -> Result<(), CoreError> {
        self.run(graph, Direction::Backward)
    }

    fn run(&self, graph: &mut SceneGraph, dir: Direction) -> Result<(), CoreError> {
        if self.is_multi_step() {
            atomically(graph, |g| self.step(g, dir))
        } else {
            self.step(graph, dir)
        }
    }

    /// Variants that touch the model more than once and so need a scratch
    /// copy to stay atomic. Everything else is a single model call.
    fn is_multi_step(&self) -> bool {
        matches!(
            self,
            Command::CreateNode { .. }
                | Command::DeleteNode { .. }
                | Command::Move { .. }
                | Command::ReparentNode { .. }
                | Command::TagDelete { .. }
                | Command::Batch { .. }
        )
    }

    /// Performs the edit in place. A multi-step failure may leave `graph`
    /// half-edited; [`Command::run`] discards it in that case. Sub-commands
    /// of a batch share the batch's scratch copy.
    fn step(&self, graph: &mut SceneGraph, dir: Direction) -> Result<(), CoreError> {
        use Direction::{Backward, Forward};

        match self {
            Command::CreateNode { node, slot } => match dir {
                Forward => restore_node(graph, node, *slot, &[]),
                Backward => detach_node(graph, node.id),
            },
            Command::DeleteNode { node, slot, edges } => match dir {
                Forward => detach_node(graph, node.id),
                Backward => restore_node(graph, node, *slot, edges),
            },
            Command::Move {
                nodes,
                groups,
                waypoints,
            } => {
                if dir == Forward {
                    for shift in nodes {
                        ensure_unlocked(graph, ItemRef::Node(shift.id))?;
                    }
                    for shift in groups {
                        ensure_unlocked(graph, ItemRef::Group(shift.id))?;
                    }
                }
                for s in nodes {
                    graph.set_node_position(s.id, dir.pick(s.from, s.to))?;
                }
                for s in groups {
                    graph.set_group_position(s.id, dir.pick(s.from, s.to))?;
                }
                for s in waypoints {
                    graph.set_waypoint_position(s.edge, s.id, dir.pick(s.from, s.to))?;
                }
                Ok(())
            }
            Command::ResizeNode { id, from, to } => {
                if dir == Forward {
                    ensure_unlocked(graph, ItemRef::Node(*id))?;
                }
                graph.set_node_size(*id, dir.pick(*from, *to)).map(drop)
            }
            Command::ResizeGroup { id, from, to } => {
                if dir == Forward {
                    ensure_unlocked(graph, ItemRef::Group(*id))?;
                }
                graph.set_group_size(*id, dir.pick(*from, *to)).map(drop)
            }
            Command::ReparentNode { node, from, to } => {
                graph.unbind_node(*node)?;
                if let Some(slot) = dir.pick(*from, *to) {
                    graph.bind_node(*node, slot.group, Some(slot.index))?;
                }
                Ok(())
            }
            Command::CreateGroup { group } => match dir {
                Forward => graph.insert_group(group.clone()),
                Backward => graph.remove_group(group.id).map(drop),
            },
            Command::DeleteGroup { group } => match dir {
                Forward => graph.remove_group(group.id).map(drop),
                Backward => graph.insert_group(group.clone()),
            },
            Command::CreateEdge { edge } => match dir {
                Forward => graph.insert_edge(edge.clone()),
                Backward => graph.remove_edge(edge.id).map(drop),
            },
            Command::DeleteEdge { edge } => match dir {
                Forward => graph.remove_edge(edge.id).map(drop),
                Backward => graph.insert_edge(edge.clone()),
            },
            Command::RetargetEdge { id, from, to } => {
                graph.retarget_edge(*id, dir.pick(*from, *to)).map(drop)
            }
            Command::AddWaypoint {
                edge,
                index,
                waypoint,
            } => match dir {
                Forward => graph.insert_waypoint(*edge, *index, waypoint.clone()),
                Backward => graph.remove_waypoint(*edge, waypoint.id).map(drop),
            },
            Command::RemoveWaypoint {
                edge,
                index,
                waypoint,
            } => match dir {
                Forward => graph.remove_waypoint(*edge, waypoint.id).map(drop),
                Backward => graph.insert_waypoint(*edge, *index, waypoint.clone()),
            },
            Command::SetFlag { node, from, to } => {
                graph.set_node_flagged(*node, dir.pick(*from, *to)).map(drop)
            }
            Command::SetLock { target, from, to } => {
                let locked = dir.pick(*from, *to);
                match target {
                    ItemRef::Node(id) => graph.set_node_locked(*id, locked).map(drop),
                    ItemRef::Group(id) => graph.set_group_locked(*id, locked).map(drop),
                }
            }
            Command::SetColor { target, from, to } => {
                let color = dir.pick(from, to).clone();
                match target {
                    ItemRef::Node(id) => graph.set_node_color(*id, color).map(drop),
                    ItemRef::Group(id) => graph.set_group_color(*id, color).map(drop),
                }
            }
            Command::Rename { target, from, to } => {
                let name = dir.pick(from, to).clone();
                match target {
                    ItemRef::Node(id) => graph.set_node_label(*id, name).map(drop),
                    ItemRef::Group(id) => graph.set_group_name(*id, name).map(drop),
                }
            }
            Command::EditDescription { target, from, to } => graph
                .set_description(*target, dir.pick(from, to).clone())
                .map(drop),
            Command::EditTodoList { target, from, to } => graph
                .set_todos(*target, dir.pick(from, to).clone())
                .map(drop),
            Command::EditSnippets { node, from, to } => graph
                .set_snippets(*node, dir.pick(from, to).clone())
                .map(drop),
            Command::TagCreate { tag, index } => match dir {
                Forward => graph.insert_tag(tag.clone(), *index),
                Backward => graph.remove_tag(tag.id).map(drop),
            },
            Command::TagAssign { node, tag, index } => match dir {
                Forward => graph.assign_tag(*node, *tag, Some(*index)),
                Backward => graph.unassign_tag(*node, *tag).map(drop),
            },
            Command::TagUnassign { node, tag, index } => match dir {
                Forward => graph.unassign_tag(*node, *tag).map(drop),
                Backward => graph.assign_tag(*node, *tag, Some(*index)),
            },
            Command::TagRename { tag, from, to } => {
                graph.rename_tag(*tag, dir.pick(from, to).clone()).map(drop)
            }
            Command::TagRecolor { tag, from, to } => {
                graph.recolor_tag(*tag, dir.pick(from, to).clone()).map(drop)
            }
            Command::TagDelete {
                tag,
                index,
                holders,
            } => match dir {
                Forward => {
                    for holder in holders {
                        graph.unassign_tag(holder.node, tag.id)?;
                    }
                    graph.remove_tag(tag.id).map(drop)
                }
                Backward => {
                    graph.insert_tag(tag.clone(), *index)?;
                    for holder in holders {
                        graph.assign_tag(holder.node, tag.id, Some(holder.index))?;
                    }
                    Ok(())
                }
            },
            Command::TagMove { tag, from, to } => {
                graph.move_tag(*tag, dir.pick(*from, *to)).map(drop)
            }
            Command::PaletteColorChange { slot, from, to } => {
                graph.set_palette_color(*slot, dir.pick(from, to).clone());
                Ok(())
            }
            Command::Batch { commands, .. } => {
                match dir {
                    Forward => {
                        for command in commands {
                            command.step(graph, dir)?;
                        }
                    }
                    Backward => {
                        for command in commands.iter().rev() {
                            command.step(graph, dir)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Stable kind name, used in history listings and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::CreateNode { .. } => "CreateNode",
            Command::DeleteNode { .. } => "DeleteNode",
            Command::Move { .. } => "Move",
            Command::ResizeNode { .. } => "ResizeNode",
            Command::ResizeGroup { .. } => "ResizeGroup",
            Command::ReparentNode { .. } => "ReparentNode",
            Command::CreateGroup { .. } => "CreateGroup",
            Command::DeleteGroup { .. } => "DeleteGroup",
            Command::CreateEdge { .. } => "CreateEdge",
            Command::DeleteEdge { .. } => "DeleteEdge",
            Command::RetargetEdge { .. } => "RetargetEdge",
            Command::AddWaypoint { .. } => "AddWaypoint",
            Command::RemoveWaypoint { .. } => "RemoveWaypoint",
            Command::SetFlag { .. } => "SetFlag",
            Command::SetLock { .. } => "SetLock",
            Command::SetColor { .. } => "SetColor",
            Command::Rename { .. } => "Rename",
            Command::EditDescription { .. } => "EditDescription",
            Command::EditTodoList { .. } => "EditTodoList",
            Command::EditSnippets { .. } => "EditSnippets",
            Command::TagCreate { .. } => "TagCreate",
            Command::TagAssign { .. } => "TagAssign",
            Command::TagUnassign { .. } => "TagUnassign",
            Command::TagRename { .. } => "TagRename",
            Command::TagRecolor { .. } => "TagRecolor",
            Command::TagDelete { .. } => "TagDelete",
            Command::TagMove { .. } => "TagMove",
            Command::PaletteColorChange { .. } => "PaletteColorChange",
            Command::Batch { .. } => "Batch",
        }
    }

    /// Human-readable label for menus ("Undo Move 3 items").
    pub fn label(&self) -> String {
        match self {
            Command::CreateNode { node, .. } => format!("Add {} '{}'", node.kind.name(), node.label),
            Command::DeleteNode { node, .. } => {
                format!("Delete {} '{}'", node.kind.name(), node.label)
            }
            Command::Move {
                nodes,
                groups,
                waypoints,
            } => {
                let count = nodes.len() + groups.len() + waypoints.len();
                if count == 1 {
                    "Move item".to_string()
                } else {
                    format!("Move {} items", count)
                }
            }
            Command::ResizeNode { .. } => "Resize node".to_string(),
            Command::ResizeGroup { .. } => "Resize group".to_string(),
            Command::ReparentNode { to: Some(_), .. } => "Move node into group".to_string(),
            Command::ReparentNode { to: None, .. } => "Remove node from group".to_string(),
            Command::CreateGroup { group } => format!("Create group '{}'", group.name),
            Command::DeleteGroup { group } => format!("Delete group '{}'", group.name),
            Command::CreateEdge { edge } => format!("Connect ({})", edge.kind.as_str()),
            Command::DeleteEdge { edge } => format!("Delete {} edge", edge.kind.as_str()),
            Command::RetargetEdge { .. } => "Reconnect edge".to_string(),
            Command::AddWaypoint { .. } => "Add waypoint".to_string(),
            Command::RemoveWaypoint { .. } => "Remove waypoint".to_string(),
            Command::SetFlag { to: true, .. } => "Flag node".to_string(),
            Command::SetFlag { to: false, .. } => "Unflag node".to_string(),
            Command::SetLock { to: true, .. } => "Lock".to_string(),
            Command::SetLock { to: false, .. } => "Unlock".to_string(),
            Command::SetColor { to: Some(color), .. } => format!("Set color {}", color),
            Command::SetColor { to: None, .. } => "Reset color".to_string(),
            Command::Rename { to, .. } => format!("Rename to '{}'", to),
            Command::EditDescription { .. } => "Edit description".to_string(),
            Command::EditTodoList { from, to, .. } => {
                if to.len() > from.len() {
                    "Add TODO".to_string()
                } else if to.len() < from.len() {
                    "Remove TODO".to_string()
                } else {
                    "Edit TODO".to_string()
                }
            }
            Command::EditSnippets { from, to, .. } => {
                if to.len() > from.len() {
                    "Add snippet".to_string()
                } else if to.len() < from.len() {
                    "Remove snippet".to_string()
                } else {
                    "Edit snippets".to_string()
                }
            }
            Command::TagCreate { tag, .. } => format!("Create tag '{}'", tag.name),
            Command::TagAssign { .. } => "Add tag".to_string(),
            Command::TagUnassign { .. } => "Remove tag".to_string(),
            Command::TagRename { from, to, .. } => format!("Rename tag '{}' to '{}'", from, to),
            Command::TagRecolor { .. } => "Change tag color".to_string(),
            Command::TagDelete { tag, .. } => format!("Delete tag '{}'", tag.name),
            Command::TagMove { .. } => "Reorder tags".to_string(),
            Command::PaletteColorChange { slot, to, .. } => {
                format!("Set {:?} color {}", slot, to)
            }
            Command::Batch { description, .. } => description.clone(),
        }
    }

    /// Returns `true` if the edit changes a shared value (palette slot or
    /// tag) that many entities display.
    pub fn is_global(&self) -> bool {
        match self {
            Command::TagRename { .. }
            | Command::TagRecolor { .. }
            | Command::TagDelete { .. }
            | Command::TagMove { .. }
            | Command::PaletteColorChange { .. } => true,
            Command::Batch { commands, .. } => commands.iter().any(Command::is_global),
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Builders: nodes
    // -----------------------------------------------------------------------

    /// Places `node`, appending it to `group` when given.
    pub fn create_node(
        graph: &SceneGraph,
        mut node: Node,
        group: Option<GroupId>,
    ) -> Result<Command, CoreError> {
        if graph.node(node.id).is_some() {
            return Err(CoreError::DuplicateId {
                id: node.id.to_string(),
            });
        }
        let slot = match group {
            Some(id) => Some(GroupSlot {
                group: id,
                index: group_of(graph, id)?.members.len(),
            }),
            None => None,
        };
        node.group = None;
        Ok(Command::CreateNode { node, slot })
    }

    /// Deletes a node and every edge attached to it.
    pub fn delete_node(graph: &SceneGraph, id: NodeId) -> Result<Command, CoreError> {
        let node = node_of(graph, id)?;
        let slot = slot_of(graph, node);
        let edges = graph.incident_edges(id).into_iter().cloned().collect();
        let mut node = node.clone();
        node.group = None;
        Ok(Command::DeleteNode { node, slot, edges })
    }

    /// Deletes a mixed selection as one undo step.
    ///
    /// Edges touching any selected node are deleted once, groups are deleted
    /// before their (selected) members so those come back unbound first.
    pub fn delete_selection(
        graph: &SceneGraph,
        nodes: &[NodeId],
        groups: &[GroupId],
    ) -> Result<Command, CoreError> {
        let mut commands = Vec::new();

        let mut edges = BTreeSet::new();
        for id in nodes {
            node_of(graph, *id)?;
            edges.extend(graph.incident_edges(*id).iter().map(|e| e.id));
        }
        for id in edges {
            commands.push(Command::DeleteEdge {
                edge: edge_of(graph, id)?.clone(),
            });
        }

        let deleted_groups: BTreeSet<GroupId> = groups.iter().copied().collect();
        for id in &deleted_groups {
            commands.push(Command::DeleteGroup {
                group: group_of(graph, *id)?.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        let mut deletions = Vec::new();
        for id in nodes {
            if !seen.insert(*id) {
                continue;
            }
            let node = node_of(graph, *id)?;
            let slot = slot_of(graph, node).filter(|s| !deleted_groups.contains(&s.group));
            let mut node = node.clone();
            node.group = None;
            deletions.push((slot, node));
        }
        // Highest member index first, so undo rebinds lower slots before higher.
        deletions.sort_by_key(|(slot, _)| Reverse(slot.map(|s| s.index)));
        for (slot, node) in deletions {
            commands.push(Command::DeleteNode {
                node,
                slot,
                edges: Vec::new(),
            });
        }

        let count = seen.len() + deleted_groups.len();
        Ok(Command::Batch {
            commands,
            description: format!("Delete {} items", count),
        })
    }

    /// Moves a selection by `(dx, dy)` as one command.
    ///
    /// Members of selected groups move along when `carry_members` is set.
    /// Waypoints move with an edge when both of its endpoints move.
    pub fn move_items(
        graph: &SceneGraph,
        selection: &Selection,
        dx: f64,
        dy: f64,
    ) -> Result<Command, CoreError> {
        let mut node_ids = Vec::new();
        let mut seen = BTreeSet::new();
        for id in &selection.nodes {
            if seen.insert(*id) {
                node_ids.push(*id);
            }
        }

        let mut groups = Vec::new();
        for id in &selection.groups {
            let group = group_of(graph, *id)?;
            ensure_unlocked(graph, ItemRef::Group(*id))?;
            groups.push(GroupShift {
                id: *id,
                from: group.position,
                to: group.position.offset(dx, dy).checked()?,
            });
            if selection.carry_members {
                for member in &group.members {
                    if seen.insert(*member) {
                        node_ids.push(*member);
                    }
                }
            }
        }

        let mut nodes = Vec::with_capacity(node_ids.len());
        for id in &node_ids {
            let node = node_of(graph, *id)?;
            ensure_unlocked(graph, ItemRef::Node(*id))?;
            nodes.push(NodeShift {
                id: *id,
                from: node.position,
                to: node.position.offset(dx, dy).checked()?,
            });
        }

        let mut waypoint_keys: Vec<(EdgeId, WaypointId)> = Vec::new();
        for key in &selection.waypoints {
            if !waypoint_keys.contains(key) {
                waypoint_keys.push(*key);
            }
        }
        for edge in graph.edges() {
            if seen.contains(&edge.source) && seen.contains(&edge.target) {
                for w in &edge.waypoints {
                    if !waypoint_keys.contains(&(edge.id, w.id)) {
                        waypoint_keys.push((edge.id, w.id));
                    }
                }
            }
        }
        let mut waypoints = Vec::with_capacity(waypoint_keys.len());
        for (edge_id, id) in waypoint_keys {
            let edge = edge_of(graph, edge_id)?;
            let index = edge
                .waypoint_index(id)
                .ok_or(CoreError::WaypointNotFound { edge: edge_id, id })?;
            let position = edge.waypoints[index].position;
            waypoints.push(WaypointShift {
                edge: edge_id,
                id,
                from: position,
                to: position.offset(dx, dy).checked()?,
            });
        }

        Ok(Command::Move {
            nodes,
            groups,
            waypoints,
        })
    }

    pub fn resize_node(graph: &SceneGraph, id: NodeId, to: Size) -> Result<Command, CoreError> {
        let from = node_of(graph, id)?.size;
        Ok(Command::ResizeNode { id, from, to })
    }

    pub fn resize_group(graph: &SceneGraph, id: GroupId, to: Size) -> Result<Command, CoreError> {
        let from = group_of(graph, id)?.size;
        Ok(Command::ResizeGroup { id, from, to })
    }

    /// Moves a node into `to` (appended) or out of any group (`None`).
    pub fn reparent(
        graph: &SceneGraph,
        node: NodeId,
        to: Option<GroupId>,
    ) -> Result<Command, CoreError> {
        let from = slot_of(graph, node_of(graph, node)?);
        let to = match to {
            Some(group) => {
                let members = &group_of(graph, group)?.members;
                // Rebinding to the same group appends after the others.
                let len = if from.is_some_and(|s| s.group == group) {
                    members.len() - 1
                } else {
                    members.len()
                };
                Some(GroupSlot { group, index: len })
            }
            None => None,
        };
        Ok(Command::ReparentNode { node, from, to })
    }

    pub fn set_flag(graph: &SceneGraph, node: NodeId, flagged: bool) -> Result<Command, CoreError> {
        let from = node_of(graph, node)?.flags.flagged;
        Ok(Command::SetFlag {
            node,
            from,
            to: flagged,
        })
    }

    pub fn set_lock(graph: &SceneGraph, target: ItemRef, locked: bool) -> Result<Command, CoreError> {
        let from = match target {
            ItemRef::Node(id) => node_of(graph, id)?.flags.locked,
            ItemRef::Group(id) => group_of(graph, id)?.locked,
        };
        Ok(Command::SetLock {
            target,
            from,
            to: locked,
        })
    }

    pub fn set_color(
        graph: &SceneGraph,
        target: ItemRef,
        color: Option<Color>,
    ) -> Result<Command, CoreError> {
        let from = match target {
            ItemRef::Node(id) => node_of(graph, id)?.color.clone(),
            ItemRef::Group(id) => group_of(graph, id)?.color.clone(),
        };
        Ok(Command::SetColor {
            target,
            from,
            to: color,
        })
    }

    pub fn rename(graph: &SceneGraph, target: ItemRef, name: String) -> Result<Command, CoreError> {
        let from = match target {
            ItemRef::Node(id) => node_of(graph, id)?.label.clone(),
            ItemRef::Group(id) => group_of(graph, id)?.name.clone(),
        };
        Ok(Command::Rename {
            target,
            from,
            to: name,
        })
    }

    // -----------------------------------------------------------------------
    // Builders: sidebar metadata
    // -----------------------------------------------------------------------

    pub fn edit_description(
        graph: &SceneGraph,
        target: MetaTarget,
        text: String,
    ) -> Result<Command, CoreError> {
        let from = meta_of(graph, target)?.description.clone();
        Ok(Command::EditDescription {
            target,
            from,
            to: text,
        })
    }

    /// Replaces a TODO list wholesale.
    pub fn edit_todos(
        graph: &SceneGraph,
        target: MetaTarget,
        todos: Vec<TodoItem>,
    ) -> Result<Command, CoreError> {
        let from = todos_of(graph, target)?;
        Ok(Command::EditTodoList {
            target,
            from,
            to: todos,
        })
    }

    pub fn add_todo(graph: &SceneGraph, target: MetaTarget, text: &str) -> Result<Command, CoreError> {
        let mut todos = todos_of(graph, target)?;
        todos.push(TodoItem::new(text));
        Command::edit_todos(graph, target, todos)
    }

    pub fn remove_todo(
        graph: &SceneGraph,
        target: MetaTarget,
        index: usize,
    ) -> Result<Command, CoreError> {
        let mut todos = todos_of(graph, target)?;
        check_index(index, todos.len())?;
        todos.remove(index);
        Command::edit_todos(graph, target, todos)
    }

    pub fn edit_todo(
        graph: &SceneGraph,
        target: MetaTarget,
        index: usize,
        text: &str,
    ) -> Result<Command, CoreError> {
        let mut todos = todos_of(graph, target)?;
        check_index(index, todos.len())?;
        todos[index].text = text.to_string();
        Command::edit_todos(graph, target, todos)
    }

    pub fn toggle_todo(
        graph: &SceneGraph,
        target: MetaTarget,
        index: usize,
    ) -> Result<Command, CoreError> {
        let mut todos = todos_of(graph, target)?;
        check_index(index, todos.len())?;
        todos[index].done = !todos[index].done;
        Command::edit_todos(graph, target, todos)
    }

    pub fn move_todo(
        graph: &SceneGraph,
        target: MetaTarget,
        from: usize,
        to: usize,
    ) -> Result<Command, CoreError> {
        let mut todos = todos_of(graph, target)?;
        check_index(from, todos.len())?;
        check_index(to, todos.len())?;
        let item = todos.remove(from);
        todos.insert(to, item);
        Command::edit_todos(graph, target, todos)
    }

    /// Replaces a node's snippet list wholesale.
    pub fn edit_snippets(
        graph: &SceneGraph,
        node: NodeId,
        snippets: Vec<Snippet>,
    ) -> Result<Command, CoreError> {
        let from = node_of(graph, node)?.snippets.clone();
        Ok(Command::EditSnippets {
            node,
            from,
            to: snippets,
        })
    }

    pub fn add_snippet(
        graph: &SceneGraph,
        node: NodeId,
        snippet: Snippet,
    ) -> Result<Command, CoreError> {
        let mut snippets = node_of(graph, node)?.snippets.clone();
        snippets.push(snippet);
        Command::edit_snippets(graph, node, snippets)
    }

    pub fn remove_snippet(
        graph: &SceneGraph,
        node: NodeId,
        id: SnippetId,
    ) -> Result<Command, CoreError> {
        let mut snippets = node_of(graph, node)?.snippets.clone();
        let index = snippets
            .iter()
            .position(|s| s.id == id)
            .ok_or(CoreError::SnippetNotFound { node, id })?;
        snippets.remove(index);
        Command::edit_snippets(graph, node, snippets)
    }

    /// Copies a snippet onto another node under a fresh id, attributed to
    /// the source node's title.
    pub fn copy_snippet(
        graph: &SceneGraph,
        from: NodeId,
        id: SnippetId,
        to: NodeId,
    ) -> Result<Command, CoreError> {
        let source = node_of(graph, from)?;
        let snippet = source
            .snippets
            .iter()
            .find(|s| s.id == id)
            .ok_or(CoreError::SnippetNotFound { node: from, id })?;
        let copy = snippet.copied_from(source.display_title());
        Command::add_snippet(graph, to, copy)
    }

    // -----------------------------------------------------------------------
    // Builders: groups and edges
    // -----------------------------------------------------------------------

    /// Creates a group around `members`.
    ///
    /// Members currently bound elsewhere are unbound first; the whole thing
    /// is then one batch.
    pub fn create_group(
        graph: &SceneGraph,
        name: &str,
        position: Point,
        size: Size,
        members: &[NodeId],
    ) -> Result<Command, CoreError> {
        let group = Group::new(name, position, size).with_members(members.iter().copied());
        let mut unbind = Vec::new();
        for id in members {
            let node = node_of(graph, *id)?;
            if let Some(slot) = slot_of(graph, node) {
                unbind.push((slot, *id));
            }
        }
        if unbind.is_empty() {
            return Ok(Command::CreateGroup { group });
        }
        // Unbind from the end so earlier member indices stay valid on undo.
        unbind.sort_by_key(|(slot, _)| Reverse(slot.index));
        let mut commands: Vec<Command> = unbind
            .into_iter()
            .map(|(slot, node)| Command::ReparentNode {
                node,
                from: Some(slot),
                to: None,
            })
            .collect();
        let description = format!("Create group '{}'", group.name);
        commands.push(Command::CreateGroup { group });
        Ok(Command::Batch {
            commands,
            description,
        })
    }

    pub fn delete_group(graph: &SceneGraph, id: GroupId) -> Result<Command, CoreError> {
        Ok(Command::DeleteGroup {
            group: group_of(graph, id)?.clone(),
        })
    }

    /// Connects two nodes. The connection rules are checked up front so an
    /// invalid drop is rejected before it reaches the history.
    pub fn create_edge(
        graph: &SceneGraph,
        kind: EdgeKind,
        source: NodeId,
        target: NodeId,
    ) -> Result<Command, CoreError> {
        graph.validate_edge(kind, source, target, None)?;
        Ok(Command::CreateEdge {
            edge: Edge::new(kind, source, target),
        })
    }

    pub fn delete_edge(graph: &SceneGraph, id: EdgeId) -> Result<Command, CoreError> {
        Ok(Command::DeleteEdge {
            edge: edge_of(graph, id)?.clone(),
        })
    }

    pub fn retarget_edge(
        graph: &SceneGraph,
        id: EdgeId,
        to: Endpoints,
    ) -> Result<Command, CoreError> {
        let from = edge_of(graph, id)?.endpoints();
        Ok(Command::RetargetEdge { id, from, to })
    }

    pub fn add_waypoint(
        graph: &SceneGraph,
        edge: EdgeId,
        index: usize,
        position: Point,
    ) -> Result<Command, CoreError> {
        let len = edge_of(graph, edge)?.waypoints.len();
        if index > len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }
        Ok(Command::AddWaypoint {
            edge,
            index,
            waypoint: Waypoint::new(position),
        })
    }

    pub fn remove_waypoint(
        graph: &SceneGraph,
        edge: EdgeId,
        id: WaypointId,
    ) -> Result<Command, CoreError> {
        let e = edge_of(graph, edge)?;
        let index = e
            .waypoint_index(id)
            .ok_or(CoreError::WaypointNotFound { edge, id })?;
        let mut waypoint = e.waypoints[index].clone();
        waypoint.connected = false;
        Ok(Command::RemoveWaypoint {
            edge,
            index,
            waypoint,
        })
    }

    // -----------------------------------------------------------------------
    // Builders: tags and palette
    // -----------------------------------------------------------------------

    /// Registers a new tag at the end of the tag list.
    pub fn create_tag(
        graph: &SceneGraph,
        name: &str,
        color: Option<Color>,
    ) -> Result<Command, CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::EmptyName);
        }
        if graph.tags().find_by_name(name).is_some() {
            return Err(CoreError::DuplicateTagName {
                name: name.to_string(),
            });
        }
        let mut tag = Tag::new(name);
        if let Some(color) = color {
            tag.color = color;
        }
        Ok(Command::TagCreate {
            tag,
            index: graph.tags().len(),
        })
    }

    pub fn assign_tag(graph: &SceneGraph, node: NodeId, tag: TagId) -> Result<Command, CoreError> {
        tag_of(graph, tag)?;
        let n = node_of(graph, node)?;
        if n.has_tag(tag) {
            return Err(CoreError::TagAlreadyAssigned { node, tag });
        }
        Ok(Command::TagAssign {
            node,
            tag,
            index: n.tags.len(),
        })
    }

    pub fn unassign_tag(graph: &SceneGraph, node: NodeId, tag: TagId) -> Result<Command, CoreError> {
        let index = node_of(graph, node)?
            .tags
            .iter()
            .position(|t| *t == tag)
            .ok_or(CoreError::TagNotAssigned { node, tag })?;
        Ok(Command::TagUnassign { node, tag, index })
    }

    pub fn rename_tag(graph: &SceneGraph, tag: TagId, name: String) -> Result<Command, CoreError> {
        let from = tag_of(graph, tag)?.name.clone();
        Ok(Command::TagRename {
            tag,
            from,
            to: name,
        })
    }

    pub fn recolor_tag(graph: &SceneGraph, tag: TagId, color: Color) -> Result<Command, CoreError> {
        let from = tag_of(graph, tag)?.color.clone();
        Ok(Command::TagRecolor {
            tag,
            from,
            to: color,
        })
    }

    /// Deletes a tag and removes it from every holder in one step.
    pub fn delete_tag(graph: &SceneGraph, tag: TagId) -> Result<Command, CoreError> {
        let t = tag_of(graph, tag)?.clone();
        let index = graph
            .tags()
            .index_of(tag)
            .ok_or(CoreError::TagNotFound { id: tag })?;
        let mut holders = Vec::new();
        for node in graph.tag_holders(tag) {
            let position = node_of(graph, node)?
                .tags
                .iter()
                .position(|x| *x == tag)
                .ok_or(CoreError::TagNotAssigned { node, tag })?;
            holders.push(TagHolder {
                node,
                index: position,
            });
        }
        Ok(Command::TagDelete {
            tag: t,
            index,
            holders,
        })
    }

    pub fn move_tag(graph: &SceneGraph, tag: TagId, to: usize) -> Result<Command, CoreError> {
        let from = graph
            .tags()
            .index_of(tag)
            .ok_or(CoreError::TagNotFound { id: tag })?;
        check_index(to, graph.tags().len())?;
        Ok(Command::TagMove { tag, from, to })
    }

    pub fn palette_color(graph: &SceneGraph, slot: PaletteSlot, color: Color) -> Command {
        Command::PaletteColorChange {
            slot,
            from: graph.palette().color(slot),
            to: color,
        }
    }

    /// Wraps several commands into one undo step.
    pub fn batch(description: impl Into<String>, commands: Vec<Command>) -> Command {
        Command::Batch {
            commands,
            description: description.into(),
        }
    }
}
