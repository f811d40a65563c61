//! Groups: rectangular containers that own node membership.

use serde::{Deserialize, Serialize};

use crate::id::{GroupId, NodeId};
use crate::types::{Color, Point, Size};

/// A container on the canvas.
///
/// The group is the owner of membership: `members` is authoritative and each
/// member's [`Node::group`](crate::node::Node::group) is a back-reference kept
/// in sync by the graph. Members stay independently addressable nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    #[serde(default = "default_name")]
    pub name: String,
    pub position: Point,
    #[serde(default = "default_size")]
    pub size: Size,
    /// Explicit color. `None` inherits the palette's group slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default)]
    pub locked: bool,
    /// Ordered member node ids.
    #[serde(default)]
    pub members: Vec<NodeId>,
}

fn default_name() -> String {
    "Group".to_string()
}

fn default_size() -> Size {
    Size::GROUP
}

impl Group {
    /// An empty, unlocked group with a fresh id.
    pub fn new(name: impl Into<String>, position: Point, size: Size) -> Self {
        Group {
            id: GroupId::new(),
            name: name.into(),
            position,
            size,
            color: None,
            locked: false,
            members: Vec::new(),
        }
    }

    pub fn with_members(mut self, members: impl IntoIterator<Item = NodeId>) -> Self {
        self.members = members.into_iter().collect();
        self
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    pub fn member_index(&self, node: NodeId) -> Option<usize> {
        self.members.iter().position(|m| *m == node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_queries() {
        let (a, b) = (NodeId::new(), NodeId::new());
        let group = Group::new("Stage 1", Point::default(), Size::GROUP).with_members([a, b]);
        assert!(group.contains(a));
        assert_eq!(group.member_index(b), Some(1));
        assert_eq!(group.member_index(NodeId::new()), None);
    }

    #[test]
    fn deserialize_fills_defaults() {
        let json = format!(
            r#"{{"id":"{}","position":{{"x":0.0,"y":0.0}}}}"#,
            GroupId::new()
        );
        let group: Group = serde_json::from_str(&json).unwrap();
        assert_eq!(group.name, "Group");
        assert_eq!(group.size, Size::GROUP);
        assert!(group.members.is_empty());
    }
}
