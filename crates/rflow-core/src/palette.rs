//! The project-scoped color palette.
//!
//! Nodes, groups and edges without an explicit color inherit theirs from a
//! [`PaletteSlot`]. A palette edit is a global change: every dependent
//! entity's display color moves with it, while explicit overrides stay put.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::edge::EdgeKind;
use crate::node::ModuleType;
use crate::types::Color;

/// A named entry of the palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaletteSlot {
    Input,
    Process,
    Decision,
    Output,
    Reference,
    Note,
    Image,
    Formula,
    Group,
    PipelineEdge,
    ReferenceEdge,
}

impl PaletteSlot {
    pub const ALL: [PaletteSlot; 11] = [
        PaletteSlot::Input,
        PaletteSlot::Process,
        PaletteSlot::Decision,
        PaletteSlot::Output,
        PaletteSlot::Reference,
        PaletteSlot::Note,
        PaletteSlot::Image,
        PaletteSlot::Formula,
        PaletteSlot::Group,
        PaletteSlot::PipelineEdge,
        PaletteSlot::ReferenceEdge,
    ];

    pub fn for_module(module: ModuleType) -> Self {
        match module {
            ModuleType::Input => PaletteSlot::Input,
            ModuleType::Process => PaletteSlot::Process,
            ModuleType::Decision => PaletteSlot::Decision,
            ModuleType::Output => PaletteSlot::Output,
        }
    }

    pub fn for_edge(kind: EdgeKind) -> Self {
        match kind {
            EdgeKind::Pipeline => PaletteSlot::PipelineEdge,
            EdgeKind::Reference => PaletteSlot::ReferenceEdge,
        }
    }

    fn default_hex(&self) -> &'static str {
        match self {
            PaletteSlot::Input => "#4CAF50",
            PaletteSlot::Process => "#9C27B0",
            PaletteSlot::Decision => "#FF9800",
            PaletteSlot::Output => "#2196F3",
            PaletteSlot::Reference => "#FFFFFF",
            PaletteSlot::Note => "#FFF59D",
            PaletteSlot::Image => "#ECEFF1",
            PaletteSlot::Formula => "#E3F2FD",
            PaletteSlot::Group => "#78909C",
            PaletteSlot::PipelineEdge => "#607D8B",
            PaletteSlot::ReferenceEdge => "#4CAF50",
        }
    }

    /// The built-in color of this slot.
    pub fn default_color(&self) -> Color {
        Color::hex(self.default_hex()).unwrap_or_else(|_| Color::gray())
    }
}

/// Slot → color map. Missing slots fall back to their defaults, so a
/// palette loaded from an older project file is always complete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Palette {
    colors: BTreeMap<PaletteSlot, Color>,
}

// Compares effective colors: an absent slot equals one set to its default.
impl PartialEq for Palette {
    fn eq(&self, other: &Self) -> bool {
        PaletteSlot::ALL
            .iter()
            .all(|slot| self.color(*slot) == other.color(*slot))
    }
}

impl Palette {
    /// Returns the palette with every slot at its default color.
    pub fn defaults() -> Self {
        Palette {
            colors: PaletteSlot::ALL
                .iter()
                .map(|slot| (*slot, slot.default_color()))
                .collect(),
        }
    }

    /// Returns the color of `slot`.
    pub fn color(&self, slot: PaletteSlot) -> Color {
        self.colors
            .get(&slot)
            .cloned()
            .unwrap_or_else(|| slot.default_color())
    }

    /// Sets the color of `slot`, returning the previous color.
    pub(crate) fn set(&mut self, slot: PaletteSlot, color: Color) -> Color {
        let old = self.color(slot);
        self.colors.insert(slot, color);
        old
    }

    pub fn iter(&self) -> impl Iterator<Item = (PaletteSlot, Color)> + '_ {
        PaletteSlot::ALL.iter().map(move |slot| (*slot, self.color(*slot)))
    }
}
