//! PDF render layer.
//!
//! Opens documents, reports page geometry, rasterizes pages and extracts the
//! positioned text layer used for hit testing in the overlay.

pub mod metrics;
pub mod page;
pub mod text_layer;

use doc_model::{PageDimensions, TextProbeItem};
use image::{ImageBuffer, Rgba};
use lopdf::{Document, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub use metrics::StandardFont;
pub use page::PageGeometry;
pub use text_layer::TextRun;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Largest zoom factor a page may be rendered at.
pub const MAX_RENDER_SCALE: f32 = 16.0;
/// Upper bound on the pixel count of one rendered surface.
pub const MAX_SURFACE_PIXELS: u64 = 64 * 1024 * 1024;

const BORDER: Rgba<u8> = Rgba([220, 220, 220, 255]);
const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

/// A rendered page together with the probe items laid over it.
#[derive(Debug, Clone)]
pub struct RenderedSurface {
    pub page_index: u32,
    pub scale: f32,
    pub size: PageDimensions,
    pub image: RgbaImage,
    pub text_items: Vec<TextProbeItem>,
}

impl RenderedSurface {
    pub fn pixel_size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("invalid render scale {0}")]
    InvalidScale(f32),
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("content stream error: {0}")]
    Content(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Pixel dimensions of a page rendered at `scale`.
pub fn surface_dimensions(size: PageDimensions, scale: f32) -> (u32, u32) {
    (
        (size.width_pt * scale).round().max(1.0) as u32,
        (size.height_pt * scale).round().max(1.0) as u32,
    )
}

/// Pixel dimensions for a render that is actually allocated. Surfaces above
/// [`MAX_SURFACE_PIXELS`] are refused.
pub fn checked_surface_dimensions(
    size: PageDimensions,
    scale: f32,
) -> Result<(u32, u32), PdfEngineError> {
    let scale = validate_scale(scale)?;
    let width = f64::from(size.width_pt) * f64::from(scale);
    let height = f64::from(size.height_pt) * f64::from(scale);
    if width.round().max(1.0) * height.round().max(1.0) > MAX_SURFACE_PIXELS as f64 {
        return Err(PdfEngineError::InvalidScale(scale));
    }

    Ok(surface_dimensions(size, scale))
}

pub fn validate_scale(scale: f32) -> Result<f32, PdfEngineError> {
    if scale.is_finite() && scale > 0.0 && scale <= MAX_RENDER_SCALE {
        Ok(scale)
    } else {
        Err(PdfEngineError::InvalidScale(scale))
    }
}

pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_geometry(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageGeometry, PdfEngineError>;
    /// The unmodified bytes the document was opened from.
    fn document_bytes(&self, handle: DocumentHandle) -> Result<&[u8], PdfEngineError>;
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn text_runs(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<TextRun>, PdfEngineError>;

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageDimensions, PdfEngineError> {
        Ok(self.page_geometry(handle, page_index)?.size)
    }

    /// Probe items in percentage space, independent of any render scale.
    fn text_items(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<TextProbeItem>, PdfEngineError> {
        let geometry = self.page_geometry(handle, page_index)?;
        let surface = surface_dimensions(geometry.size, 1.0);
        let runs = self.text_runs(handle, page_index)?;

        Ok(runs.iter().map(|run| run.to_probe(&geometry, 1.0, surface)).collect())
    }

    fn render_surface(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        scale: f32,
    ) -> Result<RenderedSurface, PdfEngineError> {
        let scale = validate_scale(scale)?;
        let geometry = self.page_geometry(handle, page_index)?;
        let image = self.render_page(handle, RenderRequest { page_index, scale })?;
        let runs = self.text_runs(handle, page_index)?;
        let text_items =
            runs.iter().map(|run| run.to_probe(&geometry, scale, image.dimensions())).collect();

        debug!(page_index, scale, items = runs.len(), "rendered surface");

        Ok(RenderedSurface { page_index, scale, size: geometry.size, image, text_items })
    }
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    bytes: Vec<u8>,
    doc: Document,
    pages: Vec<(ObjectId, PageGeometry)>,
}

impl DocumentRecord {
    fn page(&self, page_index: u32) -> Result<&(ObjectId, PageGeometry), PdfEngineError> {
        self.pages.get(page_index as usize).ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: self.pages.len() as u32,
        })
    }
}

/// Pure Rust backend. Geometry and text come from lopdf; page surfaces are
/// blank sheets of the correct size.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(bytes: Vec<u8>) -> Result<DocumentRecord, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(&bytes)?;
        let pages: Vec<_> = doc
            .get_pages()
            .into_values()
            .map(|object_id| (object_id, page::page_geometry(&doc, object_id)))
            .collect();

        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(DocumentRecord { bytes, doc, pages })
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let record = Self::parse(bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        info!(handle = handle.raw(), pages = record.pages.len(), "opened document");
        self.docs.insert(handle, record);

        Ok(handle)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.pages.len() as u32)
    }

    fn page_geometry(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageGeometry, PdfEngineError> {
        Ok(self.record(handle)?.page(page_index)?.1)
    }

    fn document_bytes(&self, handle: DocumentHandle) -> Result<&[u8], PdfEngineError> {
        Ok(&self.record(handle)?.bytes)
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let size = self.page_size(handle, request.page_index)?;
        let (width, height) = checked_surface_dimensions(size, request.scale)?;

        let mut image = RgbaImage::from_pixel(width, height, PAPER);

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, BORDER);
                image.put_pixel(x, height - 1, BORDER);
            }
            for y in 0..height {
                image.put_pixel(0, y, BORDER);
                image.put_pixel(width - 1, y, BORDER);
            }
        }

        Ok(image)
    }

    fn text_runs(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<TextRun>, PdfEngineError> {
        let record = self.record(handle)?;
        let (page_id, geometry) = *record.page(page_index)?;
        text_layer::extract_runs(&record.doc, page_id, geometry)
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    /// Rasterizes with pdfium; geometry and text still come from lopdf so
    /// both backends agree on probe positions.
    pub struct PdfiumEngine {
        pdfium: Pdfium,
        inner: LopdfEngine,
    }

    impl PdfiumEngine {
        pub fn from_system_library() -> Result<Self, PdfEngineError> {
            let bindings = Pdfium::bind_to_system_library().map_err(|err| {
                PdfEngineError::Backend(format!("failed to bind pdfium system library: {err}"))
            })?;

            Ok(Self { pdfium: Pdfium::new(bindings), inner: LopdfEngine::default() })
        }
    }

    impl PdfEngine for PdfiumEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
            self.inner.open(source)
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
            self.inner.close(handle)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            self.inner.page_count(handle)
        }

        fn page_geometry(
            &self,
            handle: DocumentHandle,
            page_index: u32,
        ) -> Result<PageGeometry, PdfEngineError> {
            self.inner.page_geometry(handle, page_index)
        }

        fn document_bytes(&self, handle: DocumentHandle) -> Result<&[u8], PdfEngineError> {
            self.inner.document_bytes(handle)
        }

        fn render_page(
            &self,
            handle: DocumentHandle,
            request: RenderRequest,
        ) -> Result<RgbaImage, PdfEngineError> {
            let size = self.inner.page_size(handle, request.page_index)?;
            let (width, height) = checked_surface_dimensions(size, request.scale)?;
            let bytes = self.inner.document_bytes(handle)?;

            let document = self
                .pdfium
                .load_pdf_from_byte_slice(bytes, None)
                .map_err(|err| PdfEngineError::Backend(format!("pdfium load failed: {err}")))?;
            let page = document
                .pages()
                .iter()
                .nth(request.page_index as usize)
                .ok_or(PdfEngineError::PageOutOfRange {
                    page: request.page_index,
                    page_count: document.pages().len() as u32,
                })?;

            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_target_height(height as i32)
                .render_form_data(true);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|err| PdfEngineError::Backend(format!("pdfium render failed: {err}")))?;

            let rendered_width = bitmap.width() as u32;
            let rendered_height = bitmap.height() as u32;
            RgbaImage::from_raw(rendered_width, rendered_height, bitmap.as_rgba_bytes()).ok_or_else(
                || PdfEngineError::Backend("pdfium returned a truncated bitmap".to_owned()),
            )
        }

        fn text_runs(
            &self,
            handle: DocumentHandle,
            page_index: u32,
        ) -> Result<Vec<TextRun>, PdfEngineError> {
            self.inner.text_runs(handle, page_index)
        }
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}
