//! Value types shared across the scene graph: geometry and colors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A position on the canvas, in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    /// Returns this point shifted by `(dx, dy)`.
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Point {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Returns `true` if both coordinates are finite. Non-finite values
    /// cannot be written to JSON.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Returns the point unchanged, or `InvalidPosition` if a coordinate is
    /// NaN or infinite.
    pub fn checked(self) -> Result<Self, CoreError> {
        if self.is_finite() {
            Ok(self)
        } else {
            Err(CoreError::InvalidPosition {
                x: self.x,
                y: self.y,
            })
        }
    }
}

/// Width and height of a node or group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Size { width, height }
    }

    /// Default footprint of a freshly placed node.
    pub const NODE: Size = Size::new(180.0, 80.0);

    /// Default footprint of a freshly created group.
    pub const GROUP: Size = Size::new(300.0, 200.0);

    /// Returns `true` if both dimensions are finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

impl Default for Size {
    fn default() -> Self {
        Size::NODE
    }
}

/// An opaque `#RRGGBB` color.
///
/// Parsing normalizes to upper case, so `"#ff5722"` and `"#FF5722"` compare
/// equal after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    /// Default color of a newly created tag.
    pub fn gray() -> Self {
        Color("#9E9E9E".to_string())
    }

    /// Returns the `#RRGGBB` text form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a `#RRGGBB` string. Convenience for call sites that hold
    /// trusted constants.
    pub fn hex(s: &str) -> Result<Self, CoreError> {
        s.parse()
    }
}

impl FromStr for Color {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix('#').unwrap_or("");
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidColor {
                value: s.to_string(),
            });
        }
        Ok(Color(format!("#{}", digits.to_ascii_uppercase())))
    }
}

impl TryFrom<String> for Color {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
