//! Overlay content stream generation for one page.

use crate::fonts::FontMetrics;
use crate::ExportError;
use doc_model::{
    percent_rect_to_pdf, percent_size_to_points, percent_to_pdf_point, Annotation,
    AnnotationKind, Color, PdfRect, TextAnnotation,
};
use pdf_engine::PageGeometry;
use std::io::Write;

/// Distance between baselines of consecutive lines, relative to font size.
pub const LINE_HEIGHT_FACTOR: f32 = 1.2;

/// Format a coordinate with at most three decimals and no trailing zeros.
pub(crate) fn num(value: f32) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    let text = format!("{rounded:.3}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_owned(),
        other => other.to_owned(),
    }
}

fn fill_color(out: &mut Vec<u8>, color: Color) -> Result<(), ExportError> {
    let (r, g, b) = color.to_normalized();
    writeln!(out, "{} {} {} rg", num(r), num(g), num(b))?;
    Ok(())
}

fn white_rect(out: &mut Vec<u8>, rect: PdfRect) -> Result<(), ExportError> {
    fill_color(out, Color::WHITE)?;
    writeln!(out, "{} {} {} {} re", num(rect.x), num(rect.y), num(rect.width), num(rect.height))?;
    writeln!(out, "f")?;
    Ok(())
}

/// Page-relative placement of a text annotation in points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub x: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    /// Baseline of each line, top to bottom.
    pub baselines: Vec<f32>,
}

/// Measure a text annotation at its position.
pub fn layout_text(
    annotation: &Annotation,
    text: &TextAnnotation,
    geometry: &PageGeometry,
    font: &dyn FontMetrics,
) -> Result<TextLayout, ExportError> {
    let size = text.font_size_pt;
    let anchor = percent_to_pdf_point(annotation.position, geometry.size);
    let first_baseline = anchor.y - font.ascent() / 1000.0 * size;
    let line_height = LINE_HEIGHT_FACTOR * size;

    let mut width = 0.0f32;
    let mut baselines = Vec::new();
    for (index, line) in text.lines().enumerate() {
        width = width.max(font.text_width(line, size)?);
        baselines.push(first_baseline - index as f32 * line_height);
    }

    let extra_lines = baselines.len().saturating_sub(1) as f32;
    let height = extra_lines * line_height + (font.ascent() - font.descent()) / 1000.0 * size;

    Ok(TextLayout { x: anchor.x, top: anchor.y, width, height, baselines })
}

/// White patch behind a text annotation: the measured text block or the
/// covered extent, whichever is larger, grown by `margin` on every side.
pub fn patch_rect(
    layout: &TextLayout,
    text: &TextAnnotation,
    geometry: &PageGeometry,
    margin: f32,
) -> PdfRect {
    let (cover_width, cover_height) = text
        .covers
        .map(|covers| percent_size_to_points(covers, geometry.size))
        .unwrap_or((0.0, 0.0));
    let width = layout.width.max(cover_width);
    let height = layout.height.max(cover_height);

    PdfRect {
        x: layout.x - margin,
        y: layout.top - height - margin,
        width: width + 2.0 * margin,
        height: height + 2.0 * margin,
    }
}

fn offset(rect: PdfRect, geometry: &PageGeometry) -> PdfRect {
    PdfRect { x: rect.x + geometry.origin_x, y: rect.y + geometry.origin_y, ..rect }
}

/// Build the overlay drawing operators for one page's annotations.
///
/// Rectangles are drawn first. Each text annotation then draws its patch, if
/// any, directly followed by its text.
pub fn page_overlay(
    annotations: &[Annotation],
    geometry: &PageGeometry,
    font: &dyn FontMetrics,
    font_resource: &str,
    patch_margin_pt: f32,
) -> Result<Vec<u8>, ExportError> {
    let mut out = Vec::new();

    for annotation in annotations {
        if let AnnotationKind::Rectangle(rect) = &annotation.kind {
            let pdf = percent_rect_to_pdf(annotation.position, rect.size, geometry.size);
            white_rect(&mut out, offset(pdf, geometry))?;
        }
    }

    for annotation in annotations {
        let AnnotationKind::Text(text) = &annotation.kind else {
            continue;
        };

        let layout = layout_text(annotation, text, geometry, font)?;
        if text.background_patch {
            let patch = patch_rect(&layout, text, geometry, patch_margin_pt);
            white_rect(&mut out, offset(patch, geometry))?;
        }

        writeln!(out, "BT")?;
        fill_color(&mut out, text.color)?;
        writeln!(out, "/{} {} Tf", font_resource, num(text.font_size_pt))?;
        for (line, baseline) in text.lines().zip(&layout.baselines) {
            if line.is_empty() {
                continue;
            }
            writeln!(
                out,
                "1 0 0 1 {} {} Tm",
                num(layout.x + geometry.origin_x),
                num(baseline + geometry.origin_y)
            )?;
            out.extend_from_slice(&font.encode(line)?);
            writeln!(out, " Tj")?;
        }
        writeln!(out, "ET")?;
    }

    Ok(out)
}
