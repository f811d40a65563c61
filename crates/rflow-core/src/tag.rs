//! Tags and the ordered tag registry.
//!
//! Tags are shared by reference: nodes store [`TagId`]s and resolve name and
//! color through the [`TagRegistry`], so renaming or recoloring a tag is a
//! single registry write that every holder observes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::TagId;
use crate::types::Color;

/// A named, colored label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    #[serde(default = "Color::gray")]
    pub color: Color,
}

impl Tag {
    /// A gray tag with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Tag {
            id: TagId::new(),
            name: name.into(),
            color: Color::gray(),
        }
    }
}

/// Ordered registry of the project's tags. Order is user-visible.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Tag>", into = "Vec<Tag>")]
pub struct TagRegistry {
    tags: IndexMap<TagId, Tag>,
}

impl From<Vec<Tag>> for TagRegistry {
    fn from(tags: Vec<Tag>) -> Self {
        TagRegistry {
            tags: tags.into_iter().map(|t| (t.id, t)).collect(),
        }
    }
}

impl From<TagRegistry> for Vec<Tag> {
    fn from(registry: TagRegistry) -> Self {
        registry.tags.into_values().collect()
    }
}

impl TagRegistry {
    pub fn get(&self, id: TagId) -> Option<&Tag> {
        self.tags.get(&id)
    }

    pub fn contains(&self, id: TagId) -> bool {
        self.tags.contains_key(&id)
    }

    pub fn index_of(&self, id: TagId) -> Option<usize> {
        self.tags.get_index_of(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Tag> {
        self.tags.values().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tags in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    /// Tag ids in display order.
    pub fn ids(&self) -> Vec<TagId> {
        self.tags.keys().copied().collect()
    }

    fn check_name(&self, name: &str, except: Option<TagId>) -> Result<(), CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::EmptyName);
        }
        if let Some(existing) = self.find_by_name(name) {
            if Some(existing.id) != except {
                return Err(CoreError::DuplicateTagName {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Inserts `tag` at `index` (clamped to the end).
    pub(crate) fn insert(&mut self, tag: Tag, index: usize) -> Result<(), CoreError> {
        if self.tags.contains_key(&tag.id) {
            return Err(CoreError::DuplicateId {
                id: tag.id.to_string(),
            });
        }
        self.check_name(&tag.name, None)?;
        if index > self.tags.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: self.tags.len(),
            });
        }
        self.tags.shift_insert(index, tag.id, tag);
        Ok(())
    }

    /// Removes a tag, returning it with its former index.
    pub(crate) fn remove(&mut self, id: TagId) -> Result<(usize, Tag), CoreError> {
        self.tags
            .shift_remove_full(&id)
            .map(|(index, _, tag)| (index, tag))
            .ok_or(CoreError::TagNotFound { id })
    }

    pub(crate) fn rename(&mut self, id: TagId, name: String) -> Result<String, CoreError> {
        self.check_name(&name, Some(id))?;
        let tag = self.tags.get_mut(&id).ok_or(CoreError::TagNotFound { id })?;
        Ok(std::mem::replace(&mut tag.name, name))
    }

    pub(crate) fn recolor(&mut self, id: TagId, color: Color) -> Result<Color, CoreError> {
        let tag = self.tags.get_mut(&id).ok_or(CoreError::TagNotFound { id })?;
        Ok(std::mem::replace(&mut tag.color, color))
    }

    /// Moves a tag to position `to`, returning its former position.
    pub(crate) fn move_to(&mut self, id: TagId, to: usize) -> Result<usize, CoreError> {
        let from = self.index_of(id).ok_or(CoreError::TagNotFound { id })?;
        if to >= self.tags.len() {
            return Err(CoreError::IndexOutOfRange {
                index: to,
                len: self.tags.len(),
            });
        }
        self.tags.move_index(from, to);
        Ok(from)
    }
}
