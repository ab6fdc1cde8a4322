//! Fonts available to the export step.

use crate::ExportError;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use pdf_engine::metrics::{encode_win_ansi, StandardFont};
use std::collections::BTreeSet;
use ttf_parser::{name_id, Face, GlyphId};

#[derive(Debug, Clone, PartialEq)]
pub enum ExportFont {
    Standard(StandardFont),
    /// Raw TrueType/OpenType bytes, embedded as a CID font.
    TrueType(Vec<u8>),
}

impl Default for ExportFont {
    fn default() -> Self {
        Self::Standard(StandardFont::Helvetica)
    }
}

/// Measuring and encoding for one export font.
pub trait FontMetrics {
    /// Advance width of `text` at `size` points. Fails when any character
    /// cannot be drawn with this font.
    fn text_width(&self, text: &str, size: f32) -> Result<f32, ExportError>;
    /// Ascender in 1/1000 em.
    fn ascent(&self) -> f32;
    /// Descender in 1/1000 em, negative.
    fn descent(&self) -> f32;
    /// A complete PDF string token (`(...)` or `<...>`) for `Tj`.
    fn encode(&self, text: &str) -> Result<Vec<u8>, ExportError>;
}

fn literal_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'(');
    for &byte in bytes {
        match byte {
            b'(' | b')' | b'\\' => out.extend_from_slice(&[b'\\', byte]),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(byte),
        }
    }
    out.push(b')');
    out
}

impl FontMetrics for StandardFont {
    fn text_width(&self, text: &str, size: f32) -> Result<f32, ExportError> {
        encode_win_ansi(text).map_err(|ch| ExportError::Unencodable {
            ch,
            font: self.base_font().to_owned(),
        })?;
        Ok(StandardFont::text_width(*self, text, size))
    }

    fn ascent(&self) -> f32 {
        StandardFont::ascent(*self)
    }

    fn descent(&self) -> f32 {
        StandardFont::descent(*self)
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>, ExportError> {
        let bytes = encode_win_ansi(text).map_err(|ch| ExportError::Unencodable {
            ch,
            font: self.base_font().to_owned(),
        })?;
        Ok(literal_string(&bytes))
    }
}

pub struct TrueTypeFont<'a> {
    data: &'a [u8],
    face: Face<'a>,
    units_per_em: f32,
}

impl<'a> TrueTypeFont<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ExportError> {
        let face = Face::parse(data, 0).map_err(|err| ExportError::InvalidFont(err.to_string()))?;
        let units_per_em = f32::from(face.units_per_em().max(1));
        Ok(Self { data, face, units_per_em })
    }

    fn to_thousandths(&self, units: f32) -> f32 {
        units * 1000.0 / self.units_per_em
    }

    fn glyph(&self, ch: char) -> Result<GlyphId, ExportError> {
        let ch = if ch == '\t' { ' ' } else { ch };
        self.face
            .glyph_index(ch)
            .filter(|glyph| glyph.0 != 0)
            .ok_or(ExportError::MissingGlyph(ch))
    }

    fn advance(&self, glyph: GlyphId) -> f32 {
        self.to_thousandths(f32::from(self.face.glyph_hor_advance(glyph).unwrap_or(0)))
    }

    pub fn postscript_name(&self) -> String {
        self.face
            .names()
            .into_iter()
            .filter(|name| name.name_id == name_id::POST_SCRIPT_NAME)
            .find_map(|name| name.to_string())
            .map(|name| {
                name.chars().filter(|ch| ch.is_ascii_graphic() && *ch != '/').collect::<String>()
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "EmbeddedFont".to_owned())
    }

    /// Embed the font as a Type0 font with Identity-H encoding. Widths are
    /// written for the glyphs used by `texts`, one entry per line.
    fn embed(&self, doc: &mut Document, texts: &[&str]) -> Result<ObjectId, ExportError> {
        let mut glyphs = BTreeSet::new();
        for text in texts {
            for ch in text.chars() {
                glyphs.insert(self.glyph(ch)?.0);
            }
        }

        let mut widths = Vec::with_capacity(glyphs.len() * 2);
        for glyph in glyphs {
            widths.push(Object::Integer(i64::from(glyph)));
            widths.push(Object::Array(vec![Object::Integer(
                self.advance(GlyphId(glyph)).round() as i64,
            )]));
        }

        let base_font = self.postscript_name();
        let bbox = self.face.global_bounding_box();
        let font_bbox: Vec<Object> = [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max]
            .iter()
            .map(|value| Object::Integer(self.to_thousandths(f32::from(*value)).round() as i64))
            .collect();
        let ascent = self.ascent().round() as i64;
        let descent = self.descent().round() as i64;
        let cap_height = self
            .face
            .capital_height()
            .map(|value| self.to_thousandths(f32::from(value)).round() as i64)
            .unwrap_or(ascent);

        let file_id = doc.add_object(Stream::new(
            dictionary! { "Length1" => self.data.len() as i64 },
            self.data.to_vec(),
        ));
        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => Object::Name(base_font.clone().into_bytes()),
            "Flags" => 32,
            "FontBBox" => font_bbox,
            "ItalicAngle" => 0,
            "Ascent" => ascent,
            "Descent" => descent,
            "CapHeight" => cap_height,
            "StemV" => 80,
            "FontFile2" => file_id,
        });
        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => Object::Name(base_font.clone().into_bytes()),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => 1000,
            "W" => widths,
            "CIDToGIDMap" => "Identity",
        });

        Ok(doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => Object::Name(base_font.into_bytes()),
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
        }))
    }
}

impl FontMetrics for TrueTypeFont<'_> {
    fn text_width(&self, text: &str, size: f32) -> Result<f32, ExportError> {
        let mut units = 0.0;
        for ch in text.chars() {
            units += self.advance(self.glyph(ch)?);
        }
        Ok(units * size / 1000.0)
    }

    fn ascent(&self) -> f32 {
        self.to_thousandths(f32::from(self.face.ascender()))
    }

    fn descent(&self) -> f32 {
        self.to_thousandths(f32::from(self.face.descender()))
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>, ExportError> {
        let mut out = vec![b'<'];
        for ch in text.chars() {
            out.extend_from_slice(format!("{:04X}", self.glyph(ch)?.0).as_bytes());
        }
        out.push(b'>');
        Ok(out)
    }
}

/// An [`ExportFont`] ready for measuring, encoding and embedding.
pub enum PreparedFont<'a> {
    Standard(StandardFont),
    TrueType(TrueTypeFont<'a>),
}

impl<'a> PreparedFont<'a> {
    pub fn prepare(font: &'a ExportFont) -> Result<Self, ExportError> {
        match font {
            ExportFont::Standard(standard) => Ok(Self::Standard(*standard)),
            ExportFont::TrueType(data) => Ok(Self::TrueType(TrueTypeFont::parse(data)?)),
        }
    }

    fn metrics(&self) -> &dyn FontMetrics {
        match self {
            Self::Standard(standard) => standard,
            Self::TrueType(font) => font,
        }
    }

    /// Add the font objects to `doc` and return the font dictionary id.
    pub fn register(&self, doc: &mut Document, texts: &[&str]) -> Result<ObjectId, ExportError> {
        match self {
            Self::Standard(standard) => Ok(doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => Object::Name(standard.base_font().as_bytes().to_vec()),
                "Encoding" => "WinAnsiEncoding",
            })),
            Self::TrueType(font) => font.embed(doc, texts),
        }
    }
}

impl FontMetrics for PreparedFont<'_> {
    fn text_width(&self, text: &str, size: f32) -> Result<f32, ExportError> {
        self.metrics().text_width(text, size)
    }

    fn ascent(&self) -> f32 {
        self.metrics().ascent()
    }

    fn descent(&self) -> f32 {
        self.metrics().descent()
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>, ExportError> {
        self.metrics().encode(text)
    }
}
