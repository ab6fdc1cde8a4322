//! Page tree helpers shared by the reader and the export step.

use doc_model::PageDimensions;
use lopdf::{Dictionary, Document, Object, ObjectId};

/// Parent chain depth after which inheritance lookups give up.
const MAX_INHERIT_DEPTH: usize = 32;

/// Page box geometry: visible size plus the lower-left corner of the MediaBox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub size: PageDimensions,
    pub origin_x: f32,
    pub origin_y: f32,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self { size: PageDimensions::US_LETTER, origin_x: 0.0, origin_y: 0.0 }
    }
}

pub fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

pub fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, object)?.as_dict().ok()
}

pub fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

/// Look up `key` on the page dictionary, walking `/Parent` for inherited
/// attributes (MediaBox, Resources, Rotate).
pub fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;

    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = dict.get(key) {
            return resolve(doc, value);
        }
        let parent = dict.get(b"Parent").ok()?;
        dict = resolve_dict(doc, parent)?;
    }

    None
}

pub fn page_geometry(doc: &Document, page_id: ObjectId) -> PageGeometry {
    let Some(array) = inherited(doc, page_id, b"MediaBox").and_then(|obj| obj.as_array().ok())
    else {
        return PageGeometry::default();
    };

    let values: Vec<f32> =
        array.iter().filter_map(|obj| resolve(doc, obj).and_then(number)).collect();
    let [x0, y0, x1, y1] = values[..] else {
        return PageGeometry::default();
    };

    let (width_pt, height_pt) = ((x1 - x0).abs(), (y1 - y0).abs());
    if width_pt <= 0.0 || height_pt <= 0.0 {
        return PageGeometry::default();
    }

    PageGeometry {
        size: PageDimensions { width_pt, height_pt },
        origin_x: x0.min(x1),
        origin_y: y0.min(y1),
    }
}

/// 1-based page number to object id.
pub fn page_id(doc: &Document, page_number: u32) -> Option<ObjectId> {
    doc.get_pages().get(&page_number).copied()
}
