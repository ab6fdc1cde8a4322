//! Text layer extraction.
//!
//! Interprets a page's content stream far enough to know where each text
//! showing operator puts its glyphs. The result is a list of runs in PDF
//! points, converted to percentage-space probe items for hit testing.

use crate::metrics::{decode_win_ansi, StandardFont};
use crate::page::{inherited, number, resolve, resolve_dict, PageGeometry};
use crate::PdfEngineError;
use doc_model::{PercentPoint, PercentRect, PercentSize, TextProbeItem};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
const DEFAULT_GLYPH_WIDTH: f32 = 500.0;

fn multiply(m1: &Matrix, m2: &Matrix) -> Matrix {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn translate(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

fn apply(m: &Matrix, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

/// A run of text as placed on the page, in page-relative points
/// (origin bottom-left of the MediaBox).
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub font_size_pt: f32,
}

impl TextRun {
    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    /// Probe item with percentage bounds derived from a raster surface.
    ///
    /// Positions are transformed into surface pixels at `scale` and divided
    /// by the surface dimensions.
    pub fn to_probe(
        &self,
        geometry: &PageGeometry,
        scale: f32,
        surface_px: (u32, u32),
    ) -> TextProbeItem {
        let (surface_w, surface_h) = (surface_px.0.max(1) as f32, surface_px.1.max(1) as f32);
        let left_px = self.x * scale;
        let top_px = (geometry.size.height_pt - self.top()) * scale;

        TextProbeItem {
            text: self.text.clone(),
            bounds: PercentRect::new(
                PercentPoint::new(left_px / surface_w * 100.0, top_px / surface_h * 100.0),
                PercentSize::new(
                    self.width * scale / surface_w * 100.0,
                    self.height * scale / surface_h * 100.0,
                ),
            ),
            font_size_pt: self.font_size_pt,
        }
    }
}

#[derive(Debug, Clone)]
struct FontInfo {
    first_char: u32,
    widths: Vec<f32>,
    standard: Option<StandardFont>,
    ascent: f32,
    descent: f32,
    two_byte: bool,
}

impl Default for FontInfo {
    fn default() -> Self {
        Self {
            first_char: 0,
            widths: Vec::new(),
            standard: None,
            ascent: StandardFont::Helvetica.ascent(),
            descent: StandardFont::Helvetica.descent(),
            two_byte: false,
        }
    }
}

impl FontInfo {
    fn from_dict(doc: &Document, dict: &Dictionary) -> Self {
        let mut info = FontInfo::default();

        info.two_byte =
            dict.get(b"Subtype").ok().and_then(|obj| obj.as_name().ok()) == Some(b"Type0");

        if let Some(name) = dict.get(b"BaseFont").ok().and_then(|obj| obj.as_name().ok()) {
            info.standard = StandardFont::from_base_font(&String::from_utf8_lossy(name));
        }
        if let Some(standard) = info.standard {
            info.ascent = standard.ascent();
            info.descent = standard.descent();
        }

        info.first_char = dict
            .get(b"FirstChar")
            .ok()
            .and_then(|obj| resolve(doc, obj))
            .and_then(number)
            .map(|value| value.max(0.0) as u32)
            .unwrap_or(0);

        if let Some(widths) = dict
            .get(b"Widths")
            .ok()
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_array().ok())
        {
            info.widths = widths
                .iter()
                .map(|obj| resolve(doc, obj).and_then(number).unwrap_or(0.0))
                .collect();
        }

        if let Some(descriptor) =
            dict.get(b"FontDescriptor").ok().and_then(|obj| resolve_dict(doc, obj))
        {
            let metric = |key: &[u8]| {
                descriptor.get(key).ok().and_then(|obj| resolve(doc, obj)).and_then(number)
            };
            if let Some(ascent) = metric(b"Ascent").filter(|value| *value > 0.0) {
                info.ascent = ascent;
            }
            if let Some(descent) = metric(b"Descent").filter(|value| *value < 0.0) {
                info.descent = descent;
            }
        }

        info
    }

    fn decode(&self, bytes: &[u8]) -> String {
        if self.two_byte {
            let units: Vec<u16> =
                bytes.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect();
            return String::from_utf16_lossy(&units);
        }
        decode_win_ansi(bytes)
    }

    fn code_width(&self, code: u32, decoded: Option<char>) -> f32 {
        if let Some(width) = code
            .checked_sub(self.first_char)
            .and_then(|index| self.widths.get(index as usize))
            .filter(|width| **width > 0.0)
        {
            return *width;
        }
        match (self.standard, decoded) {
            (Some(font), Some(ch)) => f32::from(font.glyph_width(ch)),
            _ => DEFAULT_GLYPH_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    font_size: f32,
    rise: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            font_size: 12.0,
            rise: 0.0,
        }
    }
}

/// Page fonts keyed by resource name.
fn page_fonts(doc: &Document, page_id: ObjectId) -> HashMap<Vec<u8>, FontInfo> {
    let mut fonts = HashMap::new();

    let Some(font_dict) = inherited(doc, page_id, b"Resources")
        .and_then(|obj| obj.as_dict().ok())
        .and_then(|resources| resources.get(b"Font").ok())
        .and_then(|obj| resolve_dict(doc, obj))
    else {
        return fonts;
    };

    for (name, entry) in font_dict.iter() {
        if let Some(dict) = resolve_dict(doc, entry) {
            fonts.insert(name.clone(), FontInfo::from_dict(doc, dict));
        }
    }

    fonts
}

struct Interpreter<'a> {
    fonts: &'a HashMap<Vec<u8>, FontInfo>,
    fallback_font: FontInfo,
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    state: TextState,
    font: Option<Vec<u8>>,
    geometry: PageGeometry,
    runs: Vec<TextRun>,
}

impl<'a> Interpreter<'a> {
    fn new(fonts: &'a HashMap<Vec<u8>, FontInfo>, geometry: PageGeometry) -> Self {
        Self {
            fonts,
            fallback_font: FontInfo::default(),
            ctm: IDENTITY,
            ctm_stack: Vec::new(),
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            state: TextState::default(),
            font: None,
            geometry,
            runs: Vec::new(),
        }
    }

    fn current_font(&self) -> &FontInfo {
        self.font
            .as_ref()
            .and_then(|name| self.fonts.get(name))
            .unwrap_or(&self.fallback_font)
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = multiply(&translate(tx, ty), &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn operation(&mut self, operator: &str, operands: &[Object]) {
        let num = |index: usize| operands.get(index).and_then(number);

        match operator {
            "q" => self.ctm_stack.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.ctm_stack.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => {
                if let [Some(a), Some(b), Some(c), Some(d), Some(e), Some(f)] =
                    [num(0), num(1), num(2), num(3), num(4), num(5)]
                {
                    self.ctm = multiply(&[a, b, c, d, e, f], &self.ctm);
                }
            }
            "BT" => {
                self.text_matrix = IDENTITY;
                self.line_matrix = IDENTITY;
            }
            "Tf" => {
                self.font = operands.first().and_then(|obj| obj.as_name().ok()).map(<[u8]>::to_vec);
                if let Some(size) = num(1) {
                    self.state.font_size = size;
                }
            }
            "Tc" => self.state.char_spacing = num(0).unwrap_or(0.0),
            "Tw" => self.state.word_spacing = num(0).unwrap_or(0.0),
            "Tz" => self.state.horizontal_scale = num(0).unwrap_or(100.0) / 100.0,
            "TL" => self.state.leading = num(0).unwrap_or(0.0),
            "Ts" => self.state.rise = num(0).unwrap_or(0.0),
            "Td" => self.next_line(num(0).unwrap_or(0.0), num(1).unwrap_or(0.0)),
            "TD" => {
                let ty = num(1).unwrap_or(0.0);
                self.state.leading = -ty;
                self.next_line(num(0).unwrap_or(0.0), ty);
            }
            "Tm" => {
                if let [Some(a), Some(b), Some(c), Some(d), Some(e), Some(f)] =
                    [num(0), num(1), num(2), num(3), num(4), num(5)]
                {
                    self.text_matrix = [a, b, c, d, e, f];
                    self.line_matrix = self.text_matrix;
                }
            }
            "T*" => self.next_line(0.0, -self.state.leading),
            "Tj" => {
                if let Some(string @ Object::String(..)) = operands.first() {
                    self.show(std::slice::from_ref(string));
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show(items);
                }
            }
            "'" => {
                self.next_line(0.0, -self.state.leading);
                if let Some(string @ Object::String(..)) = operands.first() {
                    self.show(std::slice::from_ref(string));
                }
            }
            "\"" => {
                self.state.word_spacing = num(0).unwrap_or(self.state.word_spacing);
                self.state.char_spacing = num(1).unwrap_or(self.state.char_spacing);
                self.next_line(0.0, -self.state.leading);
                if let Some(string @ Object::String(..)) = operands.get(2) {
                    self.show(std::slice::from_ref(string));
                }
            }
            _ => {}
        }
    }

    /// Show strings and kerning adjustments, then record one run for them.
    fn show(&mut self, items: &[Object]) {
        let font = self.current_font().clone();
        let state = self.state;
        let start_matrix = self.text_matrix;
        let mut text = String::new();
        let mut advance = 0.0f32;

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let decoded = font.decode(bytes);
                    let step = if font.two_byte { 2 } else { 1 };
                    let mut chars = decoded.chars();
                    for code_bytes in bytes.chunks(step) {
                        let code =
                            code_bytes.iter().fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
                        let ch = chars.next();
                        let glyph = font.code_width(code, ch) / 1000.0 * state.font_size;
                        let word = if step == 1 && code == 32 { state.word_spacing } else { 0.0 };
                        advance += (glyph + state.char_spacing + word) * state.horizontal_scale;
                    }
                    text.push_str(&decoded);
                }
                other => {
                    if let Some(adjust) = number(other) {
                        advance -= adjust / 1000.0 * state.font_size * state.horizontal_scale;
                    }
                }
            }
        }

        self.text_matrix = multiply(&translate(advance, 0.0), &self.text_matrix);

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        let to_user = multiply(&start_matrix, &self.ctm);
        let low = font.descent / 1000.0 * state.font_size + state.rise;
        let high = font.ascent / 1000.0 * state.font_size + state.rise;
        let corners = [
            apply(&to_user, 0.0, low),
            apply(&to_user, advance, low),
            apply(&to_user, 0.0, high),
            apply(&to_user, advance, high),
        ];

        let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);

        let vertical_scale = (to_user[2] * to_user[2] + to_user[3] * to_user[3]).sqrt();

        self.runs.push(TextRun {
            text: trimmed.to_owned(),
            x: min_x - self.geometry.origin_x,
            y: min_y - self.geometry.origin_y,
            width: max_x - min_x,
            height: max_y - min_y,
            font_size_pt: state.font_size * vertical_scale,
        });
    }
}

/// Extract the text runs of one page.
pub fn extract_runs(
    doc: &Document,
    page_id: ObjectId,
    geometry: PageGeometry,
) -> Result<Vec<TextRun>, PdfEngineError> {
    let content_bytes = doc.get_page_content(page_id)?;
    let content = Content::decode(&content_bytes)
        .map_err(|err| PdfEngineError::Content(err.to_string()))?;

    let fonts = page_fonts(doc, page_id);
    let mut interpreter = Interpreter::new(&fonts, geometry);
    for op in &content.operations {
        interpreter.operation(&op.operator, &op.operands);
    }

    Ok(interpreter.runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn page_with_content(content: &[u8], font: Dictionary) -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(font);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::from(page_id)],
                "Count" => 1,
            }),
        );
        (doc, page_id)
    }

    fn helvetica() -> Dictionary {
        dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        }
    }

    #[test]
    fn single_tj_produces_positioned_run() {
        let (doc, page_id) =
            page_with_content(b"BT /F1 10 Tf 72 700 Td (Hello) Tj ET", helvetica());

        let runs = extract_runs(&doc, page_id, PageGeometry::default()).expect("extract");
        assert_eq!(runs.len(), 1);

        let run = &runs[0];
        assert_eq!(run.text, "Hello");
        assert!((run.x - 72.0).abs() < 1e-3);
        assert!((run.width - 22.78).abs() < 1e-2);
        assert!((run.y - (700.0 - 2.07)).abs() < 1e-2);
        assert!((run.top() - (700.0 + 7.18)).abs() < 1e-2);
        assert_eq!(run.font_size_pt, 10.0);
    }

    #[test]
    fn ctm_scales_position_and_font_size() {
        let (doc, page_id) =
            page_with_content(b"q 2 0 0 2 0 0 cm BT /F1 10 Tf 10 20 Td (A) Tj ET Q", helvetica());

        let runs = extract_runs(&doc, page_id, PageGeometry::default()).expect("extract");
        assert!((runs[0].x - 20.0).abs() < 1e-3);
        assert_eq!(runs[0].font_size_pt, 20.0);
    }

    #[test]
    fn tj_array_joins_segments_and_applies_kerning() {
        let (doc, page_id) =
            page_with_content(b"BT /F1 10 Tf 0 0 Td [(AV) -1000 (A)] TJ ET", helvetica());

        let runs = extract_runs(&doc, page_id, PageGeometry::default()).expect("extract");
        assert_eq!(runs[0].text, "AVA");
        // A=667 V=667 A=667 plus a 1000 unit gap at 10pt.
        assert!((runs[0].width - (20.01 + 10.0)).abs() < 1e-2);
    }

    #[test]
    fn explicit_widths_override_standard_metrics() {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "TrueType",
            "BaseFont" => "Custom",
            "FirstChar" => 65,
            "Widths" => vec![1000.into()],
        };
        let (doc, page_id) = page_with_content(b"BT /F1 10 Tf (AA) Tj ET", font);

        let runs = extract_runs(&doc, page_id, PageGeometry::default()).expect("extract");
        assert!((runs[0].width - 20.0).abs() < 1e-3);
    }

    #[test]
    fn whitespace_runs_are_skipped_but_advance() {
        let (doc, page_id) =
            page_with_content(b"BT /F1 10 Tf (   ) Tj (x) Tj ET", helvetica());

        let runs = extract_runs(&doc, page_id, PageGeometry::default()).expect("extract");
        assert_eq!(runs.len(), 1);
        assert!((runs[0].x - 8.34).abs() < 1e-2);
    }

    #[test]
    fn next_line_operators_use_leading() {
        let (doc, page_id) = page_with_content(
            b"BT /F1 10 Tf 14 TL 50 500 Td (one) Tj T* (two) Tj (three) ' ET",
            helvetica(),
        );

        let runs = extract_runs(&doc, page_id, PageGeometry::default()).expect("extract");
        let baselines: Vec<f32> = runs.iter().map(|run| run.y + 2.07).collect();
        assert_eq!(runs.len(), 3);
        assert!((baselines[0] - 500.0).abs() < 1e-2);
        assert!((baselines[1] - 486.0).abs() < 1e-2);
        assert!((baselines[2] - 472.0).abs() < 1e-2);
    }

    #[test]
    fn probe_bounds_are_scale_independent() {
        let run = TextRun {
            text: "x".to_owned(),
            x: 61.2,
            y: 712.8,
            width: 61.2,
            height: 39.6,
            font_size_pt: 12.0,
        };
        let geometry = PageGeometry::default();

        let at_one = run.to_probe(&geometry, 1.0, (612, 792));
        let at_two = run.to_probe(&geometry, 2.0, (1224, 1584));

        assert!((at_one.bounds.origin.x - 10.0).abs() < 1e-3);
        assert!((at_one.bounds.origin.y - 5.0).abs() < 1e-3);
        assert!((at_one.bounds.origin.x - at_two.bounds.origin.x).abs() < 1e-3);
        assert!((at_one.bounds.size.height - at_two.bounds.size.height).abs() < 1e-3);
    }
}
