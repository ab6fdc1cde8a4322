//! Conversions between the three coordinate spaces of a rendered page.
//!
//! - Pixel space: pointer positions relative to the viewport, interpreted
//!   against the bounding rectangle of the rendering container.
//! - Percentage space: 0-100 of the container's width/height, origin top-left.
//!   Annotations are stored here so they survive zoom changes.
//! - PDF point space: 1/72 inch, origin bottom-left. Used on export.

use serde::{Deserialize, Serialize};

/// Pointer position in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f32,
    pub y: f32,
}

impl PixelPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Bounding rectangle of the rendering container, in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl ContainerRect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self { left, top, width, height }
    }

    /// Container anchored at the viewport origin.
    pub fn sized(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }
}

/// Position as a percentage of the container, each axis in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PercentPoint {
    pub x: f32,
    pub y: f32,
}

impl PercentPoint {
    /// Build a point, clamping both axes into `[0, 100]`.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x: clamp_percent(x), y: clamp_percent(y) }
    }

    pub fn clamped(self) -> Self {
        Self::new(self.x, self.y)
    }
}

/// Extent as a percentage of the container.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PercentSize {
    pub width: f32,
    pub height: f32,
}

impl PercentSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width: clamp_percent(width), height: clamp_percent(height) }
    }
}

/// Page dimensions in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageDimensions {
    pub const US_LETTER: PageDimensions = PageDimensions { width_pt: 612.0, height_pt: 792.0 };

    pub fn new(width_pt: f32, height_pt: f32) -> Self {
        Self { width_pt, height_pt }
    }
}

impl Default for PageDimensions {
    fn default() -> Self {
        Self::US_LETTER
    }
}

/// Point in PDF user space (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfPoint {
    pub x: f32,
    pub y: f32,
}

/// Rectangle in PDF user space, anchored at its bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PdfRect {
    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// Rectangle in percentage space, anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PercentRect {
    pub origin: PercentPoint,
    pub size: PercentSize,
}

impl PercentRect {
    pub fn new(origin: PercentPoint, size: PercentSize) -> Self {
        Self { origin, size }
    }

    pub fn contains(&self, point: PercentPoint) -> bool {
        point.x >= self.origin.x
            && point.x <= self.origin.x + self.size.width
            && point.y >= self.origin.y
            && point.y <= self.origin.y + self.size.height
    }
}

pub fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

fn axis_to_percent(pointer: f32, origin: f32, extent: f32) -> f32 {
    if extent <= 0.0 {
        return 0.0;
    }
    clamp_percent((pointer - origin) / extent * 100.0)
}

/// Map a pointer position to percentage space.
///
/// Positions outside the container clamp to the nearest edge.
pub fn pixel_to_percent(pointer: PixelPoint, container: ContainerRect) -> PercentPoint {
    PercentPoint {
        x: axis_to_percent(pointer.x, container.left, container.width),
        y: axis_to_percent(pointer.y, container.top, container.height),
    }
}

/// Inverse of [`pixel_to_percent`] for points inside the container.
pub fn percent_to_pixel(point: PercentPoint, container: ContainerRect) -> PixelPoint {
    PixelPoint {
        x: container.left + point.x / 100.0 * container.width,
        y: container.top + point.y / 100.0 * container.height,
    }
}

/// Map a percentage position to PDF points.
///
/// Percentage space grows downward from the top edge while PDF space grows
/// upward from the bottom edge, so the y axis is inverted here.
pub fn percent_to_pdf_point(point: PercentPoint, page: PageDimensions) -> PdfPoint {
    let point = point.clamped();
    PdfPoint {
        x: point.x / 100.0 * page.width_pt,
        y: page.height_pt - point.y / 100.0 * page.height_pt,
    }
}

/// Convert a percentage extent to points.
pub fn percent_size_to_points(size: PercentSize, page: PageDimensions) -> (f32, f32) {
    (size.width / 100.0 * page.width_pt, size.height / 100.0 * page.height_pt)
}

/// Convert a top-left anchored percentage rectangle to a bottom-left anchored
/// PDF rectangle. The rectangle is clipped to the page.
pub fn percent_rect_to_pdf(
    origin: PercentPoint,
    size: PercentSize,
    page: PageDimensions,
) -> PdfRect {
    let origin = origin.clamped();
    let width_pct = clamp_percent(size.width).min(100.0 - origin.x);
    let height_pct = clamp_percent(size.height).min(100.0 - origin.y);

    let top_left = percent_to_pdf_point(origin, page);
    let (width, height) =
        percent_size_to_points(PercentSize { width: width_pct, height: height_pct }, page);

    PdfRect { x: top_left.x, y: top_left.y - height, width, height }
}
