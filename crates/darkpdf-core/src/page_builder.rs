//! Output page construction
//!
//! A source page's content is replayed unmodified by wrapping its decoded
//! content stream in a Form XObject whose `/BBox` is the media box. The new
//! page then paints, in order:
//!
//! 1. the transform's backdrop over the media box,
//! 2. the source page form (`/DkPage Do`),
//! 3. one full-page rectangle per blend layer, each under its own
//!    ExtGState carrying `/BM`,
//! 4. with [`AnnotationMode::Flatten`], every visible annotation appearance,
//!    under an ExtGState carrying its `/CA` when it is translucent.
//!
//! In [`AnnotationMode::Overlay`] the annotations are instead imported as
//! annotation objects of the new page, which viewers draw above the page
//! content and therefore after the blend layers.
//!
//! Objects are copied from the source document through an
//! [`ObjectImporter`], so shared resources are imported once per document.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use tracing::debug;

use crate::annotations::{annotation_entries, annotation_flags, appearance_placement, flags, normal_appearance};
use crate::color::Color;
use crate::compose::AnnotationMode;
use crate::document::{dict_get, inherited, page_content, SourcePage};
use crate::geometry::{number, pdf_number, PageRect};
use crate::transform::TransformKind;

/// Resource name of the replayed source page
const PAGE_FORM: &str = "DkPage";
/// Prefix of blend-layer ExtGState names
const BLEND_PREFIX: &str = "DkBlend";
/// Prefix of flattened annotation appearance names
const ANNOT_PREFIX: &str = "DkAnnot";

/// Copies objects from a source document into an output document.
///
/// Every source object is copied at most once; references inside copied
/// objects are rewritten to the new ids. Ids can be seeded in advance so
/// references to source pages land on the corresponding output pages.
/// References to objects that do not exist become `null`.
pub(crate) struct ObjectImporter<'a> {
    source: &'a Document,
    memo: HashMap<ObjectId, ObjectId>,
    pending: Vec<ObjectId>,
    seeded_null: Vec<ObjectId>,
}

impl<'a> ObjectImporter<'a> {
    pub(crate) fn new(source: &'a Document) -> Self {
        Self {
            source,
            memo: HashMap::new(),
            pending: Vec::new(),
            seeded_null: Vec::new(),
        }
    }

    /// Map `source_id` to an output id without copying the object
    pub(crate) fn seed(&mut self, source_id: ObjectId, output_id: ObjectId) {
        self.memo.insert(source_id, output_id);
    }

    /// Make every reference to `source_id` import as `null`
    pub(crate) fn seed_null(&mut self, source_id: ObjectId) {
        self.seeded_null.push(source_id);
    }

    /// Number of source objects copied or seeded so far
    pub(crate) fn imported(&self) -> usize {
        self.memo.len()
    }

    /// Copy `object` and everything it references into `out`
    pub(crate) fn import(&mut self, out: &mut Document, object: &Object) -> Object {
        let converted = self.convert(out, object);
        self.drain(out);
        converted
    }

    /// Copy a direct dictionary and everything it references into `out`
    pub(crate) fn import_dict(&mut self, out: &mut Document, dict: &Dictionary) -> Dictionary {
        let converted = self.convert_dict(out, dict);
        self.drain(out);
        converted
    }

    fn convert(&mut self, out: &mut Document, object: &Object) -> Object {
        match object {
            Object::Reference(id) => self.convert_reference(out, *id),
            Object::Array(items) => {
                Object::Array(items.iter().map(|item| self.convert(out, item)).collect())
            }
            Object::Dictionary(dict) => Object::Dictionary(self.convert_dict(out, dict)),
            Object::Stream(stream) => {
                let mut copy = stream.clone();
                copy.dict = self.convert_dict(out, &stream.dict);
                Object::Stream(copy)
            }
            other => other.clone(),
        }
    }

    fn convert_dict(&mut self, out: &mut Document, dict: &Dictionary) -> Dictionary {
        let mut converted = Dictionary::new();
        for (key, value) in dict.iter() {
            converted.set(key.clone(), self.convert(out, value));
        }
        converted
    }

    fn convert_reference(&mut self, out: &mut Document, id: ObjectId) -> Object {
        if let Some(new_id) = self.memo.get(&id) {
            return Object::Reference(*new_id);
        }
        if self.seeded_null.contains(&id) || !self.source.objects.contains_key(&id) {
            return Object::Null;
        }
        let new_id = out.new_object_id();
        self.memo.insert(id, new_id);
        self.pending.push(id);
        Object::Reference(new_id)
    }

    /// Copy queued objects; references are followed iteratively so long
    /// chains (outline siblings, popup parents) never recurse deeply
    fn drain(&mut self, out: &mut Document) {
        let source = self.source;
        while let Some(id) = self.pending.pop() {
            let Ok(object) = source.get_object(id) else {
                continue;
            };
            let converted = self.convert(out, object);
            if let Some(new_id) = self.memo.get(&id) {
                out.objects.insert(*new_id, converted);
            }
        }
    }
}

/// A source page that passed validation and is ready to be built
#[derive(Debug, Clone)]
pub(crate) struct PreparedPage {
    pub page: SourcePage,
    pub media_box: PageRect,
    /// Decoded, concatenated source content
    pub content: Vec<u8>,
}

/// Check that a page can be replayed and collect its content.
///
/// The error is the human-readable reason the page is skipped.
pub(crate) fn prepare_page(doc: &Document, page: &SourcePage) -> Result<PreparedPage, String> {
    let media_box = page
        .media_box
        .ok_or_else(|| "media box is missing a usable area".to_string())?;
    let content = page_content(doc, page.id)?;
    Content::decode(&content).map_err(|e| format!("content stream does not parse: {}", e))?;
    Ok(PreparedPage {
        page: page.clone(),
        media_box,
        content,
    })
}

/// What a built page contains, for logging and reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BuiltPage {
    pub annotations_kept: usize,
    pub annotations_flattened: usize,
}

/// Caller-owned builder for the pages of one output document.
///
/// Each [`build`](Self::build) call draws one page in the fixed sequence
/// described in the module docs and writes it to `out` under a
/// pre-allocated id.
pub(crate) struct OutputPageBuilder<'a> {
    source: &'a Document,
    importer: ObjectImporter<'a>,
    transform: TransformKind,
    include_annotations: bool,
    annotation_mode: AnnotationMode,
    /// Blend-layer ExtGState objects, shared by every page
    blend_states: Vec<(String, ObjectId)>,
}

impl<'a> OutputPageBuilder<'a> {
    pub(crate) fn new(
        out: &mut Document,
        source: &'a Document,
        transform: TransformKind,
        include_annotations: bool,
        annotation_mode: AnnotationMode,
    ) -> Self {
        let blend_states = transform
            .layers()
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                let state = Dictionary::from_iter(vec![
                    ("Type", Object::Name(b"ExtGState".to_vec())),
                    ("BM", Object::Name(layer.mode.pdf_name().as_bytes().to_vec())),
                    ("ca", pdf_number(layer.color.a)),
                    ("CA", pdf_number(layer.color.a)),
                ]);
                (format!("{}{}", BLEND_PREFIX, i), out.add_object(state))
            })
            .collect();
        Self {
            source,
            importer: ObjectImporter::new(source),
            transform,
            include_annotations,
            annotation_mode,
            blend_states,
        }
    }

    /// Route references to `source_id` (a page or page-tree node) to `output_id`
    pub(crate) fn seed(&mut self, source_id: ObjectId, output_id: ObjectId) {
        self.importer.seed(source_id, output_id);
    }

    /// Drop references to a source page that has no output counterpart
    pub(crate) fn seed_skipped(&mut self, source_id: ObjectId) {
        self.importer.seed_null(source_id);
    }

    pub(crate) fn objects_imported(&self) -> usize {
        self.importer.imported()
    }

    /// Build one output page and store it in `out` as `page_id`
    pub(crate) fn build(
        &mut self,
        out: &mut Document,
        prepared: &PreparedPage,
        page_id: ObjectId,
        parent_id: ObjectId,
    ) -> Result<BuiltPage, String> {
        let source = self.source;
        let page = &prepared.page;
        let media_box = prepared.media_box;
        let mut built = BuiltPage::default();

        let resources = match inherited(source, page.id, b"Resources") {
            Some(Object::Dictionary(dict)) => self.importer.import_dict(out, dict),
            _ => Dictionary::new(),
        };
        let form = Stream::new(
            Dictionary::from_iter(vec![
                ("Type", Object::Name(b"XObject".to_vec())),
                ("Subtype", Object::Name(b"Form".to_vec())),
                ("BBox", media_box.to_pdf_array()),
                ("Resources", Object::Dictionary(resources)),
            ]),
            prepared.content.clone(),
        );
        let form_id = out.add_object(form);

        let mut xobjects = Dictionary::new();
        xobjects.set(PAGE_FORM, Object::Reference(form_id));
        let mut states = Dictionary::new();
        for (name, id) in &self.blend_states {
            states.set(name.clone(), Object::Reference(*id));
        }

        let mut ops = Vec::new();
        paint_rect(&mut ops, None, self.transform.backdrop(), &media_box);
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("Do", vec![Object::Name(PAGE_FORM.as_bytes().to_vec())]));
        ops.push(Operation::new("Q", vec![]));
        for ((name, _), layer) in self.blend_states.iter().zip(self.transform.layers()) {
            paint_rect(&mut ops, Some(name), layer.color, &media_box);
        }

        let mut annots = Vec::new();
        if self.include_annotations {
            for (index, (id, dict)) in annotation_entries(source, page.id).into_iter().enumerate() {
                match self.annotation_mode {
                    AnnotationMode::Overlay => {
                        let imported = match id {
                            Some(id) => self.importer.import(out, &Object::Reference(id)),
                            None => Object::Dictionary(self.importer.import_dict(out, dict)),
                        };
                        if !matches!(imported, Object::Null) {
                            annots.push(imported);
                            built.annotations_kept += 1;
                        }
                    }
                    AnnotationMode::Flatten => {
                        if annotation_flags(source, dict) & (flags::HIDDEN | flags::NO_VIEW) != 0 {
                            continue;
                        }
                        let Some((stream_id, stream)) = normal_appearance(source, dict) else {
                            continue;
                        };
                        let Some(placement) = appearance_placement(source, dict, stream) else {
                            debug!(page = page.index(), annotation = index, "appearance has no usable placement");
                            continue;
                        };
                        let form = match stream_id {
                            Some(stream_id) => self.importer.import(out, &Object::Reference(stream_id)),
                            None => {
                                let copy = self.importer.import(out, &Object::Stream(stream.clone()));
                                Object::Reference(out.add_object(copy))
                            }
                        };
                        let name = format!("{}{}", ANNOT_PREFIX, index);
                        xobjects.set(name.clone(), form);
                        ops.push(Operation::new("q", vec![]));
                        let opacity = dict_get(source, dict, b"CA")
                            .and_then(number)
                            .map_or(1.0, |a| a.clamp(0.0, 1.0));
                        if opacity < 1.0 {
                            let state = Dictionary::from_iter(vec![
                                ("Type", Object::Name(b"ExtGState".to_vec())),
                                ("ca", pdf_number(opacity)),
                                ("CA", pdf_number(opacity)),
                            ]);
                            states.set(name.clone(), Object::Dictionary(state));
                            ops.push(Operation::new("gs", vec![Object::Name(name.clone().into_bytes())]));
                        }
                        ops.push(Operation::new("cm", placement.to_operands()));
                        ops.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
                        ops.push(Operation::new("Q", vec![]));
                        built.annotations_flattened += 1;
                    }
                }
            }
        }

        let content = Content { operations: ops }
            .encode()
            .map_err(|e| format!("page content could not be encoded: {}", e))?;
        let content_id = out.add_object(Stream::new(Dictionary::new(), content));

        let resources = Dictionary::from_iter(vec![
            ("XObject", Object::Dictionary(xobjects)),
            ("ExtGState", Object::Dictionary(states)),
        ]);
        let group = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Group".to_vec())),
            ("S", Object::Name(b"Transparency".to_vec())),
            ("CS", Object::Name(b"DeviceRGB".to_vec())),
        ]);
        let mut page_dict = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(parent_id)),
            ("MediaBox", media_box.to_pdf_array()),
            ("Resources", Object::Dictionary(resources)),
            ("Contents", Object::Reference(content_id)),
            ("Group", Object::Dictionary(group)),
        ]);
        if let Some(crop_box) = page.crop_box {
            page_dict.set("CropBox", crop_box.to_pdf_array());
        }
        if page.rotate != 0 {
            page_dict.set("Rotate", Object::Integer(page.rotate));
        }
        if !annots.is_empty() {
            page_dict.set("Annots", Object::Array(annots));
        }
        out.objects.insert(page_id, Object::Dictionary(page_dict));
        Ok(built)
    }
}

/// `q [/name gs] color rg rect re f Q`
fn paint_rect(ops: &mut Vec<Operation>, state: Option<&str>, color: Color, rect: &PageRect) {
    ops.push(Operation::new("q", vec![]));
    if let Some(state) = state {
        ops.push(Operation::new("gs", vec![Object::Name(state.as_bytes().to_vec())]));
    }
    ops.push(Operation::new(
        "rg",
        color.channels().iter().map(|&c| pdf_number(c)).collect(),
    ));
    ops.push(Operation::new(
        "re",
        vec![
            pdf_number(rect.x0),
            pdf_number(rect.y0),
            pdf_number(rect.width()),
            pdf_number(rect.height()),
        ],
    ));
    ops.push(Operation::new("f", vec![]));
    ops.push(Operation::new("Q", vec![]));
}
