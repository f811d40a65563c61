//! Canvas nodes and their sidebar metadata.
//!
//! A [`Node`] is one research artifact on the canvas. Its group membership
//! and its tags are weak references: the node stores ids, and the owning
//! registries in [`SceneGraph`](crate::graph::SceneGraph) resolve them.

use serde::{Deserialize, Serialize};

use crate::id::{GroupId, NodeId, SnippetId, TagId};
use crate::palette::PaletteSlot;
use crate::types::{Color, Point, Size};

/// Role of a pipeline step, mirroring the module palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Input,
    Process,
    Decision,
    Output,
}

impl ModuleType {
    pub const ALL: [ModuleType; 4] = [
        ModuleType::Input,
        ModuleType::Process,
        ModuleType::Decision,
        ModuleType::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Input => "input",
            ModuleType::Process => "process",
            ModuleType::Decision => "decision",
            ModuleType::Output => "output",
        }
    }

    pub fn parse(s: &str) -> Option<ModuleType> {
        ModuleType::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

/// What kind of artifact a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "module", rename_all = "snake_case")]
pub enum NodeKind {
    PipelineStep(ModuleType),
    Reference,
    Note,
    Image,
    Formula,
}

impl NodeKind {
    /// Returns `true` for literature reference nodes.
    pub fn is_reference(&self) -> bool {
        matches!(self, NodeKind::Reference)
    }

    /// Returns `true` for pipeline steps of any module type.
    pub fn is_pipeline_step(&self) -> bool {
        matches!(self, NodeKind::PipelineStep(_))
    }

    /// The palette slot a node of this kind inherits its color from.
    pub fn palette_slot(&self) -> PaletteSlot {
        match self {
            NodeKind::PipelineStep(module) => PaletteSlot::for_module(*module),
            NodeKind::Reference => PaletteSlot::Reference,
            NodeKind::Note => PaletteSlot::Note,
            NodeKind::Image => PaletteSlot::Image,
            NodeKind::Formula => PaletteSlot::Formula,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::PipelineStep(_) => "pipeline step",
            NodeKind::Reference => "reference",
            NodeKind::Note => "note",
            NodeKind::Image => "image",
            NodeKind::Formula => "formula",
        }
    }
}

/// Bibliographic fields of a reference node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceMeta {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub year: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub venue: String,
    /// Project-relative path of the attached markdown file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_path: String,
}

/// One entry of a TODO list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

impl TodoItem {
    pub fn new(text: impl Into<String>) -> Self {
        TodoItem {
            text: text.into(),
            done: false,
        }
    }
}

/// What a snippet holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetKind {
    #[default]
    Text,
    /// `content` is a project-relative image path under `assets/images`.
    Image,
}

/// A text excerpt or image clipped onto a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: SnippetId,
    #[serde(default)]
    pub kind: SnippetKind,
    #[serde(default)]
    pub content: String,
    /// Attribution such as "From: Deep Residual Learning".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_label: String,
}

impl Snippet {
    pub fn text(content: impl Into<String>) -> Self {
        Snippet {
            id: SnippetId::new(),
            kind: SnippetKind::Text,
            content: content.into(),
            source_label: String::new(),
        }
    }

    pub fn image(path: impl Into<String>) -> Self {
        Snippet {
            kind: SnippetKind::Image,
            ..Snippet::text(path)
        }
    }

    /// An independent copy under a fresh id. A non-empty `source_title`
    /// replaces the attribution with `From: <title>`.
    pub fn copied_from(&self, source_title: &str) -> Self {
        let source_label = if source_title.is_empty() {
            self.source_label.clone()
        } else {
            format!("From: {}", source_title)
        };
        Snippet {
            id: SnippetId::new(),
            kind: self.kind,
            content: self.content.clone(),
            source_label,
        }
    }

    /// Project-relative asset path this snippet points at, if any.
    pub fn asset_path(&self) -> Option<&str> {
        match self.kind {
            SnippetKind::Image if !self.content.is_empty() => Some(&self.content),
            _ => None,
        }
    }
}

/// Sidebar metadata shared by nodes and the project itself.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
}

/// Per-node flags. `locked` is the node's own flag only; see
/// [`SceneGraph::is_effectively_locked`](crate::graph::SceneGraph::is_effectively_locked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeFlags {
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub flagged: bool,
}

/// A positioned artifact on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub position: Point,
    #[serde(default)]
    pub size: Size,
    #[serde(default)]
    pub label: String,
    /// Note text, formula source, or an asset path, depending on `kind`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceMeta>,
    /// Explicit color. `None` inherits from the palette.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default)]
    pub flags: NodeFlags,
    #[serde(default)]
    pub meta: Metadata,
    /// Ordered tag references; no duplicates.
    #[serde(default)]
    pub tags: Vec<TagId>,
    /// Clipped excerpts, in display order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippets: Vec<Snippet>,
    /// Owning group, if bound. Maintained by the graph, never set directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
}

impl Node {
    /// Creates an unbound, untagged node with a fresh id and default size.
    pub fn new(kind: NodeKind, position: Point, label: impl Into<String>) -> Self {
        Node {
            id: NodeId::new(),
            kind,
            position,
            size: Size::NODE,
            label: label.into(),
            content: String::new(),
            reference: None,
            color: None,
            flags: NodeFlags::default(),
            meta: Metadata::default(),
            tags: Vec::new(),
            snippets: Vec::new(),
            group: None,
        }
    }

    /// Convenience constructor for a pipeline step.
    pub fn step(module: ModuleType, position: Point, label: impl Into<String>) -> Self {
        Node::new(NodeKind::PipelineStep(module), position, label)
    }

    /// Convenience constructor for a reference node; the label mirrors the title.
    pub fn reference(position: Point, reference: ReferenceMeta) -> Self {
        let mut node = Node::new(NodeKind::Reference, position, reference.title.clone());
        node.reference = Some(reference);
        node
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn has_tag(&self, tag: TagId) -> bool {
        self.tags.contains(&tag)
    }

    /// Title used when attributing content copied out of this node: the
    /// reference title, else the label.
    pub fn display_title(&self) -> &str {
        match &self.reference {
            Some(meta) if !meta.title.is_empty() => &meta.title,
            _ => &self.label,
        }
    }

    /// Project-relative asset files this node points at: its paper copy,
    /// an image node's file and image snippets.
    pub fn asset_paths(&self) -> impl Iterator<Item = &str> {
        let paper = self
            .reference
            .as_ref()
            .map(|meta| meta.source_path.as_str())
            .filter(|path| !path.is_empty());
        let image = match self.kind {
            NodeKind::Image if !self.content.is_empty() => Some(self.content.as_str()),
            _ => None,
        };
        paper
            .into_iter()
            .chain(image)
            .chain(self.snippets.iter().filter_map(Snippet::asset_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_type_parse_roundtrip() {
        for m in ModuleType::ALL {
            assert_eq!(ModuleType::parse(m.as_str()), Some(m));
        }
        assert_eq!(ModuleType::parse("sink"), None);
    }

    #[test]
    fn node_kind_palette_slots() {
        assert_eq!(
            NodeKind::PipelineStep(ModuleType::Decision).palette_slot(),
            PaletteSlot::Decision
        );
        assert_eq!(NodeKind::Formula.palette_slot(), PaletteSlot::Formula);
    }

    #[test]
    fn node_kind_serde_shape() {
        let json = serde_json::to_value(NodeKind::PipelineStep(ModuleType::Input)).unwrap();
        assert_eq!(json["kind"], "pipeline_step");
        assert_eq!(json["module"], "input");
        let json = serde_json::to_value(NodeKind::Note).unwrap();
        assert_eq!(json["kind"], "note");
    }

    #[test]
    fn snippet_copy_gets_new_id_and_attribution() {
        let mut original = Snippet::text("residual blocks ease optimisation");
        original.source_label = "From: earlier".into();
        let copy = original.copied_from("Deep Residual Learning");
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.content, original.content);
        assert_eq!(copy.source_label, "From: Deep Residual Learning");
        assert_eq!(original.copied_from("").source_label, "From: earlier");
    }

    #[test]
    fn asset_paths_cover_papers_images_and_snippets() {
        let mut paper = Node::reference(
            Point::default(),
            ReferenceMeta {
                title: "ResNet".into(),
                source_path: "assets/papers/resnet.md".into(),
                ..Default::default()
            },
        );
        paper.snippets.push(Snippet::text("quote"));
        paper.snippets.push(Snippet::image("assets/images/fig1.png"));
        let paths: Vec<&str> = paper.asset_paths().collect();
        assert_eq!(paths, ["assets/papers/resnet.md", "assets/images/fig1.png"]);

        let figure =
            Node::new(NodeKind::Image, Point::default(), "fig").with_content("assets/images/fig2.png");
        assert_eq!(figure.asset_paths().collect::<Vec<_>>(), ["assets/images/fig2.png"]);
        assert_eq!(Node::step(ModuleType::Input, Point::default(), "x").asset_paths().count(), 0);
    }

    #[test]
    fn reference_constructor_copies_title() {
        let node = Node::reference(
            Point::default(),
            ReferenceMeta {
                title: "Attention Is All You Need".into(),
                year: "2017".into(),
                ..Default::default()
            },
        );
        assert_eq!(node.label, "Attention Is All You Need");
        assert!(node.kind.is_reference());
        assert!(node.group.is_none());
    }
}
