//! Stable ID newtypes for scene-graph entities.
//!
//! All IDs are distinct newtype wrappers over a v4 [`Uuid`], so a `NodeId`
//! cannot be used where a `GroupId` is expected. IDs are minted when a
//! command is built, never by the model, which means a redone command
//! recreates an entity under the identity it had before it was undone.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mints a fresh random identity.
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                $name(uuid)
            }
        }
    };
}

entity_id!(
    /// Canvas node identity.
    NodeId
);
entity_id!(
    /// Group (container) identity.
    GroupId
);
entity_id!(
    /// Edge identity.
    EdgeId
);
entity_id!(
    /// Identity of a control point inside an edge.
    WaypointId
);
entity_id!(
    /// Tag identity. Nodes hold tags by this id, never by value.
    TagId
);
entity_id!(
    /// Identity of a snippet within its node.
    SnippetId
);
