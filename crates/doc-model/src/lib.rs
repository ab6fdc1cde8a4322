//! Overlay document model.
//!
//! Coordinate mapping, the annotation data model, and the interaction session
//! that creates, drags, edits and deletes annotations.

pub mod annotation;
pub mod coords;
pub mod probe;
pub mod session;

pub use annotation::{
    Annotation, AnnotationId, AnnotationKind, Color, ColorParseError, RectangleAnnotation,
    TextAnnotation,
};
pub use coords::{
    clamp_percent, percent_rect_to_pdf, percent_size_to_points, percent_to_pdf_point,
    percent_to_pixel, pixel_to_percent, ContainerRect, PageDimensions,
    PdfPoint, PdfRect, PercentPoint, PercentRect, PercentSize, PixelPoint,
};
pub use probe::{probe_at, TextProbeItem};
pub use session::{
    InteractionMode, OverlayDefaults, OverlayError, OverlayOutcome, OverlaySession, PointerEvent,
    PointerTarget, MAX_FONT_SIZE_PT, MIN_FONT_SIZE_PT,
};
