//! In-place annotation color replacement
//!
//! Rewrites the `/C` entry of every annotation whose color exactly equals
//! the requested one, plus matching fill/stroke color operators inside that
//! annotation's own appearance streams. Page content streams and every other
//! object are left as they were. Appearance streams shared with an
//! annotation of another color are copied before being rewritten. The operation is all-or-nothing: the
//! mutated document is either serialized in full or an error is returned.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::annotations::{annotation_color, indexed_annotation_entries};
use crate::color::Color;
use crate::document::{dict_get, stream_bytes, SourceDocument};
use crate::error::{DarkPdfError, Result};
use crate::geometry::{number, pdf_number};

/// Result of a color replacement
#[derive(Debug, Clone)]
pub struct Replacement {
    /// The re-serialized document
    pub bytes: Vec<u8>,
    /// Annotations whose `/C` was rewritten
    pub annotations_changed: usize,
    /// Appearance streams with at least one rewritten color operator
    pub appearances_changed: usize,
}

/// Where an annotation dictionary lives, so it can be mutated
#[derive(Debug, Clone, Copy)]
enum AnnotSlot {
    Indirect(ObjectId),
    Inline { page_id: ObjectId, index: usize },
}

/// Parse `bytes`, replace `from` with `to` on annotations, and serialize
pub fn replace_annotation_color(bytes: &[u8], from: Color, to: Color) -> Result<Replacement> {
    let source = SourceDocument::load_mem(bytes)?;
    replace_in_document(source, from, to)
}

/// Replace `from` with `to` on the annotations of an opened document
pub fn replace_in_document(source: SourceDocument, from: Color, to: Color) -> Result<Replacement> {
    let mut doc = source.into_inner();

    let mut slots = Vec::new();
    let mut kept_appearances = HashSet::new();
    for (_, page_id) in doc.get_pages() {
        for (index, id, dict) in indexed_annotation_entries(&doc, page_id) {
            if annotation_color(&doc, dict) != Some(from) {
                kept_appearances.extend(appearance_stream_ids(&doc, dict));
                continue;
            }
            slots.push(match id {
                Some(id) => AnnotSlot::Indirect(id),
                None => AnnotSlot::Inline { page_id, index },
            });
        }
    }

    let mut annotations_changed = 0;
    let mut appearance_ids = HashSet::new();
    let mut copies = HashMap::new();
    for slot in &slots {
        let Some(mut annot) = annotation_dict_mut(&mut doc, *slot).map(|dict| dict.clone()) else {
            continue;
        };
        set_annotation_color(&mut annot, to);
        detach_shared_appearances(&mut doc, &mut annot, &kept_appearances, &mut copies);
        appearance_ids.extend(
            appearance_stream_ids(&doc, &annot)
                .into_iter()
                .filter(|id| !kept_appearances.contains(id)),
        );
        if let Some(dict) = annotation_dict_mut(&mut doc, *slot) {
            *dict = annot;
            annotations_changed += 1;
        }
    }
    if !copies.is_empty() {
        debug!(copies = copies.len(), "copied appearance streams shared with other annotations");
    }

    let mut appearances_changed = 0;
    for id in appearance_ids {
        if rewrite_appearance(&mut doc, id, from, to)? {
            appearances_changed += 1;
        }
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| DarkPdfError::Encode(e.to_string()))?;

    info!(
        from = %from,
        to = %to,
        annotations = annotations_changed,
        appearances = appearances_changed,
        "replaced annotation color"
    );
    Ok(Replacement {
        bytes,
        annotations_changed,
        appearances_changed,
    })
}

/// `index` is the position in the raw `/Annots` array
fn annotation_dict_mut(doc: &mut Document, slot: AnnotSlot) -> Option<&mut Dictionary> {
    match slot {
        AnnotSlot::Indirect(id) => doc.get_object_mut(id).ok()?.as_dict_mut().ok(),
        AnnotSlot::Inline { page_id, index } => {
            let annots_ref = doc
                .get_dictionary(page_id)
                .ok()?
                .get(b"Annots")
                .ok()?
                .as_reference()
                .ok();
            let annots = match annots_ref {
                Some(array_id) => doc.get_object_mut(array_id).ok()?,
                None => doc
                    .get_object_mut(page_id)
                    .ok()?
                    .as_dict_mut()
                    .ok()?
                    .get_mut(b"Annots")
                    .ok()?,
            };
            annots.as_array_mut().ok()?.get_mut(index)?.as_dict_mut().ok()
        }
    }
}

/// Point `annot` at private copies of any appearance stream in `shared`.
///
/// The annotation gets its own inline `/AP` when something is repointed, so
/// an `/AP` dictionary shared with other annotations is never mutated.
/// `copies` maps an original stream id to its copy across annotations.
fn detach_shared_appearances(
    doc: &mut Document,
    annot: &mut Dictionary,
    shared: &HashSet<ObjectId>,
    copies: &mut HashMap<ObjectId, ObjectId>,
) {
    let Some(mut ap) = dict_get(doc, annot, b"AP")
        .and_then(|ap| ap.as_dict().ok())
        .cloned()
    else {
        return;
    };

    let mut repointed = false;
    for key in [&b"N"[..], b"R", b"D"] {
        let Ok(entry) = ap.get(key).cloned() else {
            continue;
        };
        let replacement = match entry {
            Object::Reference(id) if matches!(doc.get_object(id), Ok(Object::Stream(_))) => shared
                .contains(&id)
                .then(|| Object::Reference(copy_object(doc, id, copies))),
            Object::Reference(id) => match doc.get_dictionary(id).ok().cloned() {
                Some(states) => detach_states(doc, states, shared, copies).map(Object::Dictionary),
                None => None,
            },
            Object::Dictionary(states) => detach_states(doc, states, shared, copies).map(Object::Dictionary),
            _ => None,
        };
        if let Some(replacement) = replacement {
            ap.set(key.to_vec(), replacement);
            repointed = true;
        }
    }

    if repointed {
        annot.set("AP", Object::Dictionary(ap));
    }
}

fn detach_states(
    doc: &mut Document,
    mut states: Dictionary,
    shared: &HashSet<ObjectId>,
    copies: &mut HashMap<ObjectId, ObjectId>,
) -> Option<Dictionary> {
    let targets: Vec<(Vec<u8>, ObjectId)> = states
        .iter()
        .filter_map(|(key, value)| {
            let id = value.as_reference().ok()?;
            shared.contains(&id).then(|| (key.clone(), id))
        })
        .collect();
    if targets.is_empty() {
        return None;
    }
    for (key, id) in targets {
        states.set(key, Object::Reference(copy_object(doc, id, copies)));
    }
    Some(states)
}

fn copy_object(doc: &mut Document, id: ObjectId, copies: &mut HashMap<ObjectId, ObjectId>) -> ObjectId {
    if let Some(&copy) = copies.get(&id) {
        return copy;
    }
    let object = doc.get_object(id).map(Object::clone).unwrap_or(Object::Null);
    let copy = doc.add_object(object);
    copies.insert(id, copy);
    copy
}

fn set_annotation_color(dict: &mut Dictionary, to: Color) {
    dict.set(
        "C",
        Object::Array(to.channels().iter().map(|&c| pdf_number(c)).collect()),
    );
    if dict.has(b"CA") || to.a < 1.0 {
        dict.set("CA", pdf_number(to.a));
    }
}

/// Ids of every appearance stream (`/N`, `/R`, `/D`, including state
/// sub-dictionaries) of an annotation
fn appearance_stream_ids(doc: &Document, annot: &Dictionary) -> Vec<ObjectId> {
    let Some(ap) = dict_get(doc, annot, b"AP").and_then(|ap| ap.as_dict().ok()) else {
        return Vec::new();
    };
    let mut ids = Vec::new();
    for key in [&b"N"[..], b"R", b"D"] {
        let Ok(entry) = ap.get(key) else { continue };
        if let Ok(id) = entry.as_reference() {
            match doc.get_object(id) {
                Ok(Object::Stream(_)) => ids.push(id),
                Ok(Object::Dictionary(states)) => ids.extend(state_refs(states)),
                _ => {}
            }
        } else if let Ok(states) = entry.as_dict() {
            ids.extend(state_refs(states));
        }
    }
    ids
}

fn state_refs(states: &Dictionary) -> Vec<ObjectId> {
    states
        .iter()
        .filter_map(|(_, value)| value.as_reference().ok())
        .collect()
}

/// Color-setting operators and the operator that replaces them
fn replacement_operator(operator: &str) -> Option<&'static str> {
    match operator {
        "g" | "rg" | "k" | "sc" | "scn" => Some("rg"),
        "G" | "RG" | "K" | "SC" | "SCN" => Some("RG"),
        _ => None,
    }
}

/// Rewrite matching color operators in one appearance stream.
///
/// Returns whether anything changed. Streams that are not decodable content
/// are left alone.
fn rewrite_appearance(doc: &mut Document, id: ObjectId, from: Color, to: Color) -> Result<bool> {
    let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
        return Ok(false);
    };
    let Ok(raw) = stream_bytes(stream) else {
        debug!(?id, "appearance stream not decodable, leaving as is");
        return Ok(false);
    };
    let Ok(mut content) = Content::decode(&raw) else {
        debug!(?id, "appearance content not parseable, leaving as is");
        return Ok(false);
    };

    let target = from.with_alpha(1.0);
    let mut changed = false;
    for operation in content.operations.iter_mut() {
        let Some(new_operator) = replacement_operator(&operation.operator) else {
            continue;
        };
        let components: Option<Vec<f32>> = operation.operands.iter().map(number).collect();
        let matches = components
            .and_then(|c| Color::from_pdf_components(&c))
            .is_some_and(|c| c == target);
        if matches {
            *operation = Operation::new(
                new_operator,
                to.channels().iter().map(|&c| pdf_number(c)).collect(),
            );
            changed = true;
        }
    }

    if changed {
        let encoded = content
            .encode()
            .map_err(|e| DarkPdfError::Encode(e.to_string()))?;
        if let Ok(Object::Stream(stream)) = doc.get_object_mut(id) {
            stream.set_plain_content(encoded);
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{annotation_entries, annotations_of, distinct_colors};
    use crate::raster::{render_page, RenderOptions};
    use image::Rgba;
    use crate::geometry::PageRect;
    use crate::test_support::{FixtureAnnotation, PdfFixture};
    use pretty_assertions::assert_eq;

    const RED: [f32; 3] = [1.0, 0.0, 0.0];
    const BLUE: [f32; 3] = [0.0, 0.0, 1.0];

    fn two_page_fixture() -> Vec<u8> {
        PdfFixture::new()
            .page(100.0, 100.0)
            .content("0 0 0 rg 10 10 20 20 re f")
            .annotation(FixtureAnnotation::ink([0.0, 0.0, 10.0, 10.0], &RED))
            .annotation(FixtureAnnotation::ink([20.0, 20.0, 30.0, 30.0], &BLUE))
            .page(100.0, 100.0)
            .annotation(FixtureAnnotation::ink([0.0, 0.0, 10.0, 10.0], &RED))
            .build()
    }

    #[test]
    fn test_replace_rewrites_only_matching_annotations() {
        let red = Color::rgb(1.0, 0.0, 0.0);
        let green = Color::rgb(0.0, 1.0, 0.0);
        let result = replace_annotation_color(&two_page_fixture(), red, green).unwrap();
        assert_eq!(result.annotations_changed, 2);
        assert_eq!(result.appearances_changed, 2);

        let source = SourceDocument::load_mem(&result.bytes).unwrap();
        let colors = distinct_colors(&source);
        assert!(!colors.contains(&red));
        assert_eq!(colors, vec![green, Color::rgb(0.0, 0.0, 1.0)]);

        let first_page = annotations_of(&source, &source.page(1).unwrap());
        assert_eq!(first_page[0].color, Some(green));
        assert_eq!(first_page[1].color, Some(Color::rgb(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_replace_rewrites_appearance_operators() {
        let red = Color::rgb(1.0, 0.0, 0.0);
        let green = Color::rgb(0.0, 1.0, 0.0);
        let result = replace_annotation_color(&two_page_fixture(), red, green).unwrap();

        let source = SourceDocument::load_mem(&result.bytes).unwrap();
        let doc = source.inner();
        let page = source.page(1).unwrap();
        let (_, dict) = annotation_entries(doc, page.id)[0];
        let ids = appearance_stream_ids(doc, dict);
        let stream = doc.get_object(ids[0]).unwrap().as_stream().unwrap();
        let content = Content::decode(&stream_bytes(stream).unwrap()).unwrap();
        let fill = content
            .operations
            .iter()
            .find(|op| op.operator == "rg")
            .unwrap();
        let components: Vec<f32> = fill.operands.iter().filter_map(number).collect();
        assert_eq!(components, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_replace_leaves_page_content_alone() {
        let red = Color::rgb(1.0, 0.0, 0.0);
        let bytes = two_page_fixture();
        let before = SourceDocument::load_mem(&bytes).unwrap();
        let result = replace_annotation_color(&bytes, red, Color::BLACK).unwrap();
        let after = SourceDocument::load_mem(&result.bytes).unwrap();

        let page_before = before.page(1).unwrap();
        let page_after = after.page(1).unwrap();
        assert_eq!(
            crate::document::page_content(before.inner(), page_before.id).unwrap(),
            crate::document::page_content(after.inner(), page_after.id).unwrap()
        );
        assert_eq!(after.page_count(), 2);
    }

    #[test]
    fn test_replace_with_no_match_changes_nothing() {
        let result = replace_annotation_color(
            &two_page_fixture(),
            Color::rgb(0.5, 0.5, 0.5),
            Color::BLACK,
        )
        .unwrap();
        assert_eq!(result.annotations_changed, 0);
        assert_eq!(result.appearances_changed, 0);
        let source = SourceDocument::load_mem(&result.bytes).unwrap();
        assert_eq!(distinct_colors(&source).len(), 2);
    }

    #[test]
    fn test_replace_sets_opacity_for_translucent_target() {
        let red = Color::rgb(1.0, 0.0, 0.0);
        let translucent = Color::rgba(0.0, 0.0, 0.0, 0.5);
        let result = replace_annotation_color(&two_page_fixture(), red, translucent).unwrap();
        let source = SourceDocument::load_mem(&result.bytes).unwrap();
        let annotations = annotations_of(&source, &source.page(2).unwrap());
        assert_eq!(annotations[0].color, Some(translucent));
    }

    fn inline_annotation(rgb: [f32; 3]) -> Object {
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Annot".to_vec())),
            ("Subtype", Object::Name(b"Square".to_vec())),
            ("Rect", PageRect::new(0.0, 0.0, 10.0, 10.0).to_pdf_array()),
            ("C", Object::Array(rgb.iter().map(|&c| Object::Real(c)).collect())),
        ]))
    }

    fn save(mut doc: Document) -> Vec<u8> {
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_replace_inline_annotation_after_unreadable_entry() {
        let mut doc = PdfFixture::new().page(100.0, 100.0).build_document();
        let page_id = doc.get_pages()[&1];
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set(
                "Annots",
                Object::Array(vec![
                    Object::Reference((9999, 0)),
                    inline_annotation(BLUE),
                    inline_annotation(RED),
                ]),
            );

        let red = Color::rgb(1.0, 0.0, 0.0);
        let green = Color::rgb(0.0, 1.0, 0.0);
        let result = replace_annotation_color(&save(doc), red, green).unwrap();
        assert_eq!(result.annotations_changed, 1);

        let source = SourceDocument::load_mem(&result.bytes).unwrap();
        assert_eq!(distinct_colors(&source), vec![Color::rgb(0.0, 0.0, 1.0), green]);
    }

    #[test]
    fn test_replace_copies_appearance_shared_with_other_color() {
        let mut doc = PdfFixture::new()
            .page(100.0, 100.0)
            .annotation(FixtureAnnotation::ink([0.0, 0.0, 10.0, 10.0], &RED))
            .annotation(FixtureAnnotation::ink([20.0, 20.0, 30.0, 30.0], &BLUE))
            .build_document();
        let page_id = doc.get_pages()[&1];
        let ids: Vec<ObjectId> = annotation_entries(&doc, page_id)
            .into_iter()
            .filter_map(|(id, _)| id)
            .collect();
        // Both annotations draw the red annotation's appearance
        let red_ap = doc.get_dictionary(ids[0]).unwrap().get(b"AP").unwrap().clone();
        doc.get_object_mut(ids[1])
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("AP", red_ap);
        let bytes = save(doc);

        let render = |bytes: &[u8]| {
            let source = SourceDocument::load_mem(bytes).unwrap();
            render_page(&source, 1, &RenderOptions::default()).unwrap()
        };
        let before = render(&bytes);
        assert_eq!(before.get_pixel(25, 75), &Rgba([255, 0, 0, 255]));

        let result = replace_annotation_color(&bytes, Color::rgb(1.0, 0.0, 0.0), Color::rgb(0.0, 1.0, 0.0)).unwrap();
        assert_eq!(result.annotations_changed, 1);
        assert_eq!(result.appearances_changed, 1);

        let after = render(&result.bytes);
        assert_eq!(after.get_pixel(5, 95), &Rgba([0, 255, 0, 255]));
        assert_eq!(after.get_pixel(25, 75), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_replace_rejects_invalid_source() {
        let result = replace_annotation_color(b"%PDF-1.7 broken", Color::BLACK, Color::WHITE);
        assert!(matches!(result, Err(DarkPdfError::Open(_))));
    }
}
