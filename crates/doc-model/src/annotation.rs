//! Overlay annotation data model.
//!
//! Annotations live in percentage space and belong to exactly one page.

use crate::coords::{PercentPoint, PercentRect, PercentSize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session-unique annotation identifier. Never reused, even after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnnotationId(pub u64);

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque RGB color, serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };
    pub const RED: Color = Color { r: 255, g: 0, b: 0 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255 };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Normalized components for PDF color operators.
    pub fn to_normalized(self) -> (f32, f32, f32) {
        (self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0)
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color {0:?}, expected #rrggbb")]
pub struct ColorParseError(pub String);

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ColorParseError(value.to_owned()));
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| ColorParseError(value.to_owned()))
        };

        Ok(Self { r: channel(0..2)?, g: channel(2..4)?, b: channel(4..6)? })
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Free text drawn at the annotation position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub content: String,
    pub font_size_pt: f32,
    pub color: Color,
    /// Draw an opaque patch behind the text to hide what the page shows there.
    pub background_patch: bool,
    /// Extent of the original page text this annotation rewrites. The patch
    /// is at least this large.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covers: Option<PercentSize>,
}

impl TextAnnotation {
    /// Lines of the content. A carriage return ending a line is dropped, so
    /// CRLF input lays out like LF input.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.content.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line))
    }
}

/// Opaque white cover patch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectangleAnnotation {
    pub size: PercentSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    Text(TextAnnotation),
    Rectangle(RectangleAnnotation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    /// 1-based page number.
    pub page: u32,
    /// Top-left corner in percentage space.
    pub position: PercentPoint,
    pub kind: AnnotationKind,
}

impl Annotation {
    pub fn is_text(&self) -> bool {
        matches!(self.kind, AnnotationKind::Text(_))
    }

    pub fn as_text(&self) -> Option<&TextAnnotation> {
        match &self.kind {
            AnnotationKind::Text(text) => Some(text),
            AnnotationKind::Rectangle(_) => None,
        }
    }

    pub fn as_rectangle(&self) -> Option<&RectangleAnnotation> {
        match &self.kind {
            AnnotationKind::Rectangle(rect) => Some(rect),
            AnnotationKind::Text(_) => None,
        }
    }

    /// Percentage bounds of a rectangle annotation. Text bounds depend on font
    /// metrics and are measured by the caller.
    pub fn rectangle_bounds(&self) -> Option<PercentRect> {
        self.as_rectangle().map(|rect| PercentRect::new(self.position, rect.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_parses_with_and_without_hash() {
        assert_eq!("#ff8000".parse::<Color>(), Ok(Color::rgb(255, 128, 0)));
        assert_eq!("00FF00".parse::<Color>(), Ok(Color::rgb(0, 255, 0)));
    }

    #[test]
    fn color_rejects_malformed_input() {
        assert!("#fff".parse::<Color>().is_err());
        assert!("#gg0000".parse::<Color>().is_err());
        assert!("#ééé".parse::<Color>().is_err());
    }

    #[test]
    fn annotation_serializes_with_kind_tag() {
        let annotation = Annotation {
            id: AnnotationId(7),
            page: 2,
            position: PercentPoint::new(10.0, 20.0),
            kind: AnnotationKind::Rectangle(RectangleAnnotation {
                size: PercentSize::new(5.0, 5.0),
            }),
        };

        let json = serde_json::to_value(&annotation).expect("serialize");
        assert_eq!(json["kind"]["type"], "rectangle");
        assert_eq!(json["id"], 7);

        let back: Annotation = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, annotation);
    }

    #[test]
    fn lines_drop_carriage_returns() {
        let text = TextAnnotation {
            content: "first\r\nsecond\n\nlast\r".to_owned(),
            font_size_pt: 12.0,
            color: Color::BLACK,
            background_patch: false,
            covers: None,
        };

        assert_eq!(text.lines().collect::<Vec<_>>(), ["first", "second", "", "last"]);
    }

    #[test]
    fn text_color_serializes_as_hex() {
        let text = TextAnnotation {
            content: "Hello".to_owned(),
            font_size_pt: 12.0,
            color: Color::RED,
            background_patch: false,
            covers: None,
        };

        let json = serde_json::to_value(&text).expect("serialize");
        assert_eq!(json["color"], "#ff0000");
        assert!(json.get("covers").is_none());
    }
}
