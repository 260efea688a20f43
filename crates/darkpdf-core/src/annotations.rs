//! Annotation inventory
//!
//! Reads a page's `/Annots` into plain [`Annotation`] values and collects
//! the distinct annotation colors of a document. Also hosts the appearance
//! stream lookups shared by the composer (flattening) and the rasterizer.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashSet;
use tracing::warn;

use crate::color::Color;
use crate::document::{dict_get, resolve, SourceDocument, SourcePage};
use crate::geometry::{number, Matrix, PageRect};

/// Annotation flag bits (PDF 32000-1, table 165)
pub mod flags {
    pub const INVISIBLE: i64 = 1;
    pub const HIDDEN: i64 = 1 << 1;
    pub const PRINT: i64 = 1 << 2;
    pub const NO_VIEW: i64 = 1 << 5;
}

/// Read-only view of one annotation
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Object id, `None` for annotations stored inline in `/Annots`
    pub id: Option<ObjectId>,
    /// 1-indexed page the annotation belongs to
    pub page_number: u32,
    pub subtype: String,
    pub rect: Option<PageRect>,
    /// `/C` normalized to RGB with `/CA` as alpha
    pub color: Option<Color>,
    pub flags: i64,
    pub has_appearance: bool,
}

impl Annotation {
    /// Hidden or NoView annotations are not drawn on screen
    pub fn is_visible(&self) -> bool {
        self.flags & (flags::HIDDEN | flags::NO_VIEW) == 0
    }
}

/// Annotations of one page in `/Annots` order
pub fn annotations_of(source: &SourceDocument, page: &SourcePage) -> Vec<Annotation> {
    let doc = source.inner();
    annotation_entries(doc, page.id)
        .into_iter()
        .map(|(id, dict)| Annotation {
            id,
            page_number: page.number,
            subtype: dict_get(doc, dict, b"Subtype")
                .and_then(|s| s.as_name_str().ok())
                .unwrap_or("Unknown")
                .to_string(),
            rect: dict_get(doc, dict, b"Rect")
                .and_then(|r| r.as_array().ok())
                .and_then(|r| PageRect::from_pdf_array(r)),
            color: annotation_color(doc, dict),
            flags: annotation_flags(doc, dict),
            has_appearance: normal_appearance(doc, dict).is_some(),
        })
        .collect()
}

/// Distinct annotation colors, in first-seen order across pages and then
/// within each page
pub fn distinct_colors(source: &SourceDocument) -> Vec<Color> {
    let mut seen = HashSet::new();
    let mut colors = Vec::new();
    for page in source.pages() {
        for annotation in annotations_of(source, &page) {
            if let Some(color) = annotation.color {
                if seen.insert(color) {
                    colors.push(color);
                }
            }
        }
    }
    colors
}

/// Resolved `/Annots` entries of a page with their object ids
pub(crate) fn annotation_entries(doc: &Document, page_id: ObjectId) -> Vec<(Option<ObjectId>, &Dictionary)> {
    indexed_annotation_entries(doc, page_id)
        .into_iter()
        .map(|(_, id, dict)| (id, dict))
        .collect()
}

/// Like [`annotation_entries`], with each entry's position in the raw
/// `/Annots` array. Unreadable entries are skipped but still counted.
pub(crate) fn indexed_annotation_entries(
    doc: &Document,
    page_id: ObjectId,
) -> Vec<(usize, Option<ObjectId>, &Dictionary)> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    let Some(Object::Array(items)) = dict_get(doc, page, b"Annots") else {
        return Vec::new();
    };

    let mut entries = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let id = item.as_reference().ok();
        match resolve(doc, item).and_then(|obj| obj.as_dict().ok()) {
            Some(dict) => entries.push((index, id, dict)),
            None => warn!(?id, index, "skipping unreadable annotation entry"),
        }
    }
    entries
}

/// Raw `/C` components of an annotation
pub(crate) fn color_components(doc: &Document, dict: &Dictionary) -> Option<Vec<f32>> {
    let array = dict_get(doc, dict, b"C")?.as_array().ok()?;
    array.iter().map(number).collect()
}

/// `/C` as a normalized color, `/CA` as alpha
pub(crate) fn annotation_color(doc: &Document, dict: &Dictionary) -> Option<Color> {
    let color = Color::from_pdf_components(&color_components(doc, dict)?)?;
    let alpha = dict_get(doc, dict, b"CA").and_then(number).unwrap_or(1.0);
    Some(color.with_alpha(alpha))
}

pub(crate) fn annotation_flags(doc: &Document, dict: &Dictionary) -> i64 {
    dict_get(doc, dict, b"F")
        .and_then(|f| f.as_i64().ok())
        .unwrap_or(0)
}

/// The normal appearance stream, picking the `/AS` state when `/N` is a
/// dictionary of states
pub(crate) fn normal_appearance<'a>(doc: &'a Document, dict: &'a Dictionary) -> Option<(Option<ObjectId>, &'a Stream)> {
    let ap = dict_get(doc, dict, b"AP")?.as_dict().ok()?;
    let raw = ap.get(b"N").ok()?;
    match resolve(doc, raw)? {
        Object::Stream(stream) => Some((raw.as_reference().ok(), stream)),
        Object::Dictionary(states) => {
            let state = dict_get(doc, dict, b"AS")?.as_name().ok()?;
            let raw = states.get(state).ok()?;
            let stream = resolve(doc, raw)?.as_stream().ok()?;
            Some((raw.as_reference().ok(), stream))
        }
        _ => None,
    }
}

/// Matrix that places an appearance stream on its annotation rectangle.
///
/// The form's `/BBox` is taken through its own `/Matrix`, and the result is
/// mapped onto `/Rect` by scaling and translation. The form matrix itself
/// is applied by the `Do` operator, so it is not part of the returned value.
pub(crate) fn appearance_placement(doc: &Document, annot: &Dictionary, form: &Stream) -> Option<Matrix> {
    let rect = dict_get(doc, annot, b"Rect")
        .and_then(|r| r.as_array().ok())
        .and_then(|r| PageRect::from_pdf_array(r))?;
    let bbox = dict_get(doc, &form.dict, b"BBox")
        .and_then(|b| b.as_array().ok())
        .and_then(|b| PageRect::from_pdf_array(b))?;
    let form_matrix = dict_get(doc, &form.dict, b"Matrix")
        .and_then(|m| m.as_array().ok())
        .and_then(|m| Matrix::from_pdf_numbers(m))
        .unwrap_or_default();
    Matrix::rect_to_rect(&bbox.transformed(&form_matrix), &rect)
}
