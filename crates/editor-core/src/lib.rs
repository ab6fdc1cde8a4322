//! Editor session: one open document, the page on screen and its overlay.
//!
//! Everything the user can do between opening a file and downloading the
//! edited copy goes through [`Editor`]. Rendering is requested with
//! [`RenderTicket`]s so a late result for a page the user already left is
//! dropped instead of replacing the current view.

use doc_model::{
    probe_at, Annotation, AnnotationId, ContainerRect, InteractionMode, OverlayError,
    OverlayOutcome, OverlaySession, PageDimensions, PercentPoint, PercentRect, PercentSize,
    PointerEvent, PointerTarget,
};
use pdf_engine::{
    DocumentHandle, OpenSource, PdfEngine, PdfEngineError, RenderedSurface, StandardFont,
};
use pdf_export::content::LINE_HEIGHT_FACTOR;
use pdf_export::{output_file_name, ExportError, ExportFont, ExportOptions};
use std::fs;
use std::path::PathBuf;
use storage::{EditorPreferences, ExportFontPreference};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("no document is open")]
    NoDocument,
    #[error("failed to open document: {0}")]
    Document(#[source] PdfEngineError),
    #[error("failed to render page: {0}")]
    Render(#[source] PdfEngineError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("failed to read export font {path}: {source}")]
    FontFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

impl EditorError {
    /// Short message suitable for showing to the person using the editor.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoDocument => "Open a PDF document first.".to_owned(),
            Self::Document(PdfEngineError::EncryptedUnsupported) => {
                "Password-protected PDFs are not supported.".to_owned()
            }
            Self::Document(_) => "This file could not be opened as a PDF.".to_owned(),
            Self::Render(_) => {
                "The page could not be displayed. The previous view is still shown.".to_owned()
            }
            Self::Export(ExportError::Unencodable { ch, .. } | ExportError::MissingGlyph(ch)) => {
                format!(
                    "The character '{ch}' is not available in the export font. \
                     Your annotations are unchanged."
                )
            }
            Self::Export(_) => {
                "The edited PDF could not be created. Your annotations are unchanged.".to_owned()
            }
            Self::FontFile { .. } => "The export font file could not be read.".to_owned(),
            Self::Overlay(_) => "That annotation no longer exists.".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDocument {
    pub handle: DocumentHandle,
    pub name: String,
    pub page_count: u32,
}

/// The page currently on screen.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based page number.
    pub page: u32,
    pub surface: RenderedSurface,
}

impl RenderedPage {
    pub fn size(&self) -> PageDimensions {
        self.surface.size
    }

    /// Container matching the rendered surface at the viewport origin.
    pub fn container(&self) -> ContainerRect {
        let (width, height) = self.surface.pixel_size();
        ContainerRect::sized(width as f32, height as f32)
    }
}

/// Identifies one render request. Only the most recently issued ticket is
/// accepted by [`Editor::complete_render`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTicket {
    pub generation: u64,
    /// 1-based page number.
    pub page: u32,
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub struct Editor<E: PdfEngine> {
    engine: E,
    preferences: EditorPreferences,
    document: Option<OpenDocument>,
    current_page: u32,
    scale: f32,
    view: Option<RenderedPage>,
    overlay: OverlaySession,
    generation: u64,
}

impl<E: PdfEngine> Editor<E> {
    pub fn new(engine: E, preferences: EditorPreferences) -> Self {
        let preferences = preferences.sanitized();
        Self {
            engine,
            overlay: OverlaySession::new(preferences.overlay_defaults()),
            scale: preferences.initial_scale,
            preferences,
            document: None,
            current_page: 1,
            view: None,
            generation: 0,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn preferences(&self) -> &EditorPreferences {
        &self.preferences
    }

    pub fn document(&self) -> Option<&OpenDocument> {
        self.document.as_ref()
    }

    pub fn page_count(&self) -> u32 {
        self.document.as_ref().map_or(0, |doc| doc.page_count)
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn view(&self) -> Option<&RenderedPage> {
        self.view.as_ref()
    }

    pub fn overlay(&self) -> &OverlaySession {
        &self.overlay
    }

    /// Direct access for edits that need no page context (text, color,
    /// deletion and so on).
    pub fn overlay_mut(&mut self) -> &mut OverlaySession {
        &mut self.overlay
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        self.overlay.set_mode(mode);
    }

    fn open_document(&self) -> Result<&OpenDocument, EditorError> {
        self.document.as_ref().ok_or(EditorError::NoDocument)
    }

    /// Open `bytes` as the new document, replacing the current one.
    ///
    /// The first page is rendered before anything is replaced, so a file that
    /// cannot be opened or shown leaves the previous document in place.
    pub fn open(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> Result<(), EditorError> {
        let name = name.into();
        let handle = self.engine.open(OpenSource::Bytes(bytes)).map_err(EditorError::Document)?;

        let prepared = self
            .engine
            .page_count(handle)
            .and_then(|count| Ok((count, self.engine.render_surface(handle, 0, self.scale)?)));
        let (page_count, surface) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                if let Err(close_err) = self.engine.close(handle) {
                    warn!(error = %close_err, "failed to release rejected document");
                }
                return Err(EditorError::Render(err));
            }
        };

        self.release_document();
        self.generation += 1;
        info!(%name, page_count, "document opened");
        self.document = Some(OpenDocument { handle, name, page_count });
        self.current_page = 1;
        self.view = Some(RenderedPage { page: 1, surface });

        Ok(())
    }

    /// Drop the document, the view and every annotation.
    pub fn close(&mut self) {
        self.release_document();
        self.generation += 1;
        self.current_page = 1;
    }

    fn release_document(&mut self) {
        if let Some(doc) = self.document.take() {
            if let Err(err) = self.engine.close(doc.handle) {
                warn!(error = %err, "failed to close document");
            }
        }
        self.view = None;
        self.overlay.reset();
    }

    fn clamp_page(&self, page: u32) -> u32 {
        page.clamp(1, self.page_count().max(1))
    }

    fn clamp_scale(&self, scale: f32) -> f32 {
        if scale.is_finite() {
            scale.clamp(self.preferences.min_scale, self.preferences.max_scale)
        } else {
            self.scale
        }
    }

    /// Issue a ticket for rendering `page` at `scale`. Both are clamped to
    /// valid values. Any earlier ticket becomes stale.
    pub fn begin_render(&mut self, page: u32, scale: f32) -> Result<RenderTicket, EditorError> {
        self.open_document()?;
        self.generation += 1;
        Ok(RenderTicket {
            generation: self.generation,
            page: self.clamp_page(page),
            scale: self.clamp_scale(scale),
        })
    }

    /// Render the page a ticket describes. Does not change the editor.
    pub fn render(&self, ticket: &RenderTicket) -> Result<RenderedSurface, PdfEngineError> {
        let doc = self.document.as_ref().ok_or(PdfEngineError::Backend("no document".to_owned()))?;
        self.engine.render_surface(doc.handle, ticket.page - 1, ticket.scale)
    }

    /// Apply a finished render. Returns `Ok(false)` when the ticket is stale;
    /// a failed render keeps the previous page and view.
    pub fn complete_render(
        &mut self,
        ticket: RenderTicket,
        result: Result<RenderedSurface, PdfEngineError>,
    ) -> Result<bool, EditorError> {
        if ticket.generation != self.generation || self.document.is_none() {
            debug!(ticket = ticket.generation, current = self.generation, "stale render dropped");
            return Ok(false);
        }

        let surface = result.map_err(|err| {
            warn!(page = ticket.page, error = %err, "render failed");
            EditorError::Render(err)
        })?;

        self.current_page = ticket.page;
        self.scale = ticket.scale;
        self.view = Some(RenderedPage { page: ticket.page, surface });
        debug!(page = ticket.page, scale = ticket.scale, "view updated");

        Ok(true)
    }

    fn show(&mut self, page: u32, scale: f32) -> Result<(), EditorError> {
        let ticket = self.begin_render(page, scale)?;
        let result = self.render(&ticket);
        self.complete_render(ticket, result).map(|_| ())
    }

    /// Show page `page` (1-based). Out-of-range numbers are clamped.
    pub fn go_to_page(&mut self, page: u32) -> Result<(), EditorError> {
        self.show(page, self.scale)
    }

    pub fn next_page(&mut self) -> Result<(), EditorError> {
        self.go_to_page(self.current_page.saturating_add(1))
    }

    pub fn previous_page(&mut self) -> Result<(), EditorError> {
        self.go_to_page(self.current_page.saturating_sub(1))
    }

    /// Change the zoom, clamped to the configured bounds. Without a document
    /// only the stored scale changes.
    pub fn set_scale(&mut self, scale: f32) -> Result<f32, EditorError> {
        let scale = self.clamp_scale(scale);
        if self.document.is_none() {
            self.scale = scale;
            return Ok(scale);
        }

        self.show(self.current_page, scale)?;
        Ok(self.scale)
    }

    fn probes(&self) -> &[doc_model::TextProbeItem] {
        self.view.as_ref().map(|view| view.surface.text_items.as_slice()).unwrap_or(&[])
    }

    /// Forward a pointer event on the current page to the overlay.
    pub fn pointer(
        &mut self,
        event: PointerEvent,
        container: ContainerRect,
    ) -> Result<OverlayOutcome, EditorError> {
        self.open_document()?;
        let probes =
            self.view.as_ref().map(|view| view.surface.text_items.as_slice()).unwrap_or(&[]);
        Ok(self.overlay.handle_pointer(self.current_page, event, container, probes))
    }

    /// Remove an annotation from whichever page holds it. There is no undo.
    pub fn delete_annotation(&mut self, id: AnnotationId) -> Result<Annotation, EditorError> {
        Ok(self.overlay.delete(id)?)
    }

    fn metrics_font(&self) -> StandardFont {
        match self.preferences.export_font {
            ExportFontPreference::Standard { font } => font,
            ExportFontPreference::TrueType { .. } => StandardFont::Helvetica,
        }
    }

    /// Percentage bounds of an annotation on the current page size.
    pub fn annotation_bounds(&self, annotation: &Annotation) -> PercentRect {
        if let Some(bounds) = annotation.rectangle_bounds() {
            return bounds;
        }
        let Some(text) = annotation.as_text() else {
            return PercentRect::new(annotation.position, PercentSize::default());
        };

        let size = self.view.as_ref().map(RenderedPage::size).unwrap_or_default();
        let font = self.metrics_font();
        let (mut width_pt, mut line_count) = (0.0f32, 0usize);
        for line in text.lines() {
            width_pt = width_pt.max(font.text_width(line, text.font_size_pt));
            line_count += 1;
        }
        let height_pt = line_count.saturating_sub(1) as f32
            * LINE_HEIGHT_FACTOR
            * text.font_size_pt
            + (font.ascent() - font.descent()) / 1000.0 * text.font_size_pt;

        let mut extent =
            PercentSize::new(width_pt / size.width_pt * 100.0, height_pt / size.height_pt * 100.0);
        if let Some(covers) = text.covers {
            extent = PercentSize::new(
                extent.width.max(covers.width),
                extent.height.max(covers.height),
            );
        }
        PercentRect::new(annotation.position, extent)
    }

    /// What a press at `point` would land on: the topmost annotation, then a
    /// text item, then the page itself.
    pub fn hit_test(&self, point: PercentPoint) -> PointerTarget {
        let annotations = self.overlay.annotations_for(self.current_page);
        if let Some(hit) = annotations
            .iter()
            .rev()
            .find(|annotation| self.annotation_bounds(annotation).contains(point))
        {
            return PointerTarget::Annotation(hit.id);
        }

        match probe_at(self.probes(), point) {
            Some(index) => PointerTarget::TextItem(index),
            None => PointerTarget::Container,
        }
    }

    fn export_font(&self) -> Result<ExportFont, EditorError> {
        match &self.preferences.export_font {
            ExportFontPreference::Standard { font } => Ok(ExportFont::Standard(*font)),
            ExportFontPreference::TrueType { path } => fs::read(path)
                .map(ExportFont::TrueType)
                .map_err(|source| EditorError::FontFile { path: path.clone(), source }),
        }
    }

    /// Bake the annotations into a copy of the document.
    pub fn export(&self) -> Result<ExportedDocument, EditorError> {
        self.export_with_font(self.export_font()?)
    }

    pub fn export_with_font(&self, font: ExportFont) -> Result<ExportedDocument, EditorError> {
        let doc = self.open_document()?;
        let original = self.engine.document_bytes(doc.handle).map_err(EditorError::Document)?;
        let options = ExportOptions { font, patch_margin_pt: self.preferences.patch_margin_pt };

        let bytes = pdf_export::commit(original, &self.overlay, &options)?;
        let file_name = output_file_name(&doc.name, &self.preferences.output_prefix);
        info!(%file_name, annotations = self.overlay.len(), "document exported");

        Ok(ExportedDocument { file_name, bytes })
    }
}
