//! Export/commit step: bakes overlay annotations into the page content of a
//! copy of the original document.

pub mod content;
pub mod fonts;

use doc_model::OverlaySession;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use pdf_engine::page::{inherited, page_geometry, resolve_dict};
use std::path::Path;
use tracing::{debug, info};

pub use fonts::{ExportFont, FontMetrics, PreparedFont};

pub const DEFAULT_PATCH_MARGIN_PT: f32 = 2.0;
pub const DEFAULT_OUTPUT_PREFIX: &str = "edited_";
const FALLBACK_FILE_NAME: &str = "document.pdf";
const FONT_RESOURCE_PREFIX: &str = "FOvl";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("page {0} does not exist in the document")]
    PageNotFound(u32),
    #[error("character {ch:?} cannot be drawn with {font}")]
    Unencodable { ch: char, font: String },
    #[error("the export font has no glyph for {0:?}")]
    MissingGlyph(char),
    #[error("invalid font file: {0}")]
    InvalidFont(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub font: ExportFont,
    pub patch_margin_pt: f32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { font: ExportFont::default(), patch_margin_pt: DEFAULT_PATCH_MARGIN_PT }
    }
}

/// Name for the exported file: `prefix` followed by the original file name.
pub fn output_file_name(original: &str, prefix: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(FALLBACK_FILE_NAME);

    format!("{prefix}{name}")
}

/// Produce a new document with every annotation in `session` drawn as page
/// content.
///
/// Works on a private copy of `original`; on error nothing is returned and
/// neither the input bytes nor the annotations change. Without annotations
/// the original bytes come back untouched.
pub fn commit(
    original: &[u8],
    session: &OverlaySession,
    options: &ExportOptions,
) -> Result<Vec<u8>, ExportError> {
    if session.is_empty() {
        debug!("no annotations, returning original document");
        return Ok(original.to_vec());
    }

    let mut doc = Document::load_mem(original)?;
    let font = PreparedFont::prepare(&options.font)?;

    let texts: Vec<&str> = session
        .pages_with_annotations()
        .flat_map(|(_, annotations)| annotations.iter())
        .filter_map(|annotation| annotation.as_text())
        .flat_map(|text| text.lines())
        .collect();
    let font_id = font.register(&mut doc, &texts)?;

    let pages = doc.get_pages();
    let mut drawn = 0usize;
    for (page_number, annotations) in session.pages_with_annotations() {
        let page_id =
            pages.get(&page_number).copied().ok_or(ExportError::PageNotFound(page_number))?;
        let geometry = page_geometry(&doc, page_id);

        let resource = add_font_resource(&mut doc, page_id, font_id)?;
        let overlay = content::page_overlay(
            annotations,
            &geometry,
            &font,
            &resource,
            options.patch_margin_pt,
        )?;
        wrap_page_content(&mut doc, page_id, overlay)?;

        debug!(page = page_number, count = annotations.len(), %resource, "page overlay written");
        drawn += annotations.len();
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    info!(annotations = drawn, bytes = bytes.len(), "export complete");

    Ok(bytes)
}

/// Register `font_id` in the page's font resources under a fresh name.
///
/// The effective (possibly inherited or shared) resource dictionary is copied
/// onto the page so other pages keep their own resources.
fn add_font_resource(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: ObjectId,
) -> Result<String, ExportError> {
    let mut resources = inherited(doc, page_id, b"Resources")
        .and_then(|object| object.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new);
    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|object| resolve_dict(doc, object))
        .cloned()
        .unwrap_or_else(Dictionary::new);

    let mut index = 0usize;
    let name = loop {
        let candidate = format!("{FONT_RESOURCE_PREFIX}{index}");
        if !fonts.has(candidate.as_bytes()) {
            break candidate;
        }
        index += 1;
    };

    fonts.set(name.clone(), Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));
    doc.get_object_mut(page_id)?.as_dict_mut()?.set("Resources", Object::Dictionary(resources));

    Ok(name)
}

/// Wrap the existing page content in `q`/`Q` and append `overlay` after it.
fn wrap_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    overlay: Vec<u8>,
) -> Result<(), ExportError> {
    let existing = doc.get_dictionary(page_id)?.get(b"Contents").ok().cloned();
    let mut contents = match existing {
        Some(Object::Reference(id)) => match doc.get_object(id)? {
            Object::Array(items) => items.clone(),
            _ => vec![Object::Reference(id)],
        },
        Some(Object::Array(items)) => items,
        _ => Vec::new(),
    };

    let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let mut closing = b"\nQ\n".to_vec();
    closing.extend_from_slice(&overlay);
    let overlay_id = doc.add_object(Stream::new(Dictionary::new(), closing));

    contents.insert(0, Object::Reference(open_id));
    contents.push(Object::Reference(overlay_id));
    doc.get_object_mut(page_id)?.as_dict_mut()?.set("Contents", Object::Array(contents));

    Ok(())
}
