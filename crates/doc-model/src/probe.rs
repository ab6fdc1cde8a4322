use crate::coords::PercentRect;
use serde::{Deserialize, Serialize};

/// Read-only descriptor of text already present on a rendered page.
///
/// Derived from the page's text layer and used for click-to-rewrite hit
/// testing. Never persisted with the annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextProbeItem {
    pub text: String,
    /// Bounding box in percentage space, top-left anchored.
    pub bounds: PercentRect,
    /// Effective font size in points (text matrix and CTM applied).
    pub font_size_pt: f32,
}

/// Index of the first probe item whose bounds contain `point`.
pub fn probe_at(items: &[TextProbeItem], point: crate::coords::PercentPoint) -> Option<usize> {
    items.iter().position(|item| item.bounds.contains(point))
}
