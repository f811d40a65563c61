//! Change notifications emitted by successful graph mutations.
//!
//! Local changes concern one entity's own state. Global changes concern a
//! value that many entities observe through a shared reference (a palette
//! slot or a tag), and are fanned out by the synchronization layer.

use serde::{Deserialize, Serialize};

use crate::id::{EdgeId, GroupId, NodeId, TagId};
use crate::palette::PaletteSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeScope {
    Local,
    Global,
}

/// The entity (or shared value) a change is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "subject", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Node(NodeId),
    NodeRemoved(NodeId),
    Group(GroupId),
    GroupRemoved(GroupId),
    Edge(EdgeId),
    EdgeRemoved(EdgeId),
    Tag(TagId),
    Palette(PaletteSlot),
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub scope: ChangeScope,
    pub subject: Subject,
}

impl ChangeEvent {
    pub fn local(subject: Subject) -> Self {
        ChangeEvent {
            scope: ChangeScope::Local,
            subject,
        }
    }

    pub fn global(subject: Subject) -> Self {
        ChangeEvent {
            scope: ChangeScope::Global,
            subject,
        }
    }

    pub fn is_global(&self) -> bool {
        self.scope == ChangeScope::Global
    }
}
