//! Synthetic PDF fixtures for tests
//!
//! Builds small documents with lopdf: pages with explicit or inherited media
//! boxes, raw content streams, and annotations whose appearance streams fill
//! their rectangle with the annotation color.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::geometry::PageRect;

/// One annotation on a fixture page
#[derive(Debug, Clone)]
pub struct FixtureAnnotation {
    pub subtype: &'static str,
    pub rect: PageRect,
    /// Raw `/C` array; empty means no `/C` entry
    pub color: Vec<f32>,
    pub opacity: Option<f32>,
    pub with_appearance: bool,
    pub flags: i64,
}

impl FixtureAnnotation {
    /// An ink annotation with an appearance that fills `rect` with `color`
    pub fn ink(rect: [f32; 4], color: &[f32]) -> Self {
        Self {
            subtype: "Ink",
            rect: PageRect::new(rect[0], rect[1], rect[2], rect[3]),
            color: color.to_vec(),
            opacity: None,
            with_appearance: true,
            flags: 4,
        }
    }

    pub fn without_appearance(mut self) -> Self {
        self.with_appearance = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.flags |= 2;
        self
    }

    pub fn opacity(mut self, opacity: f32) -> Self {
        self.opacity = Some(opacity);
        self
    }
}

#[derive(Debug, Clone, Default)]
struct FixturePage {
    media_box: Option<PageRect>,
    contents: Vec<String>,
    annotations: Vec<FixtureAnnotation>,
    dangling_contents: bool,
}

/// Builder for small test PDFs
#[derive(Debug, Clone, Default)]
pub struct PdfFixture {
    pages: Vec<FixturePage>,
    inherited_media_box: Option<PageRect>,
}

impl PdfFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page with media box `[0 0 width height]`
    pub fn page(mut self, width: f32, height: f32) -> Self {
        self.pages.push(FixturePage {
            media_box: Some(PageRect::new(0.0, 0.0, width, height)),
            ..Default::default()
        });
        self
    }

    /// Append a page whose media box must come from the page tree
    pub fn page_without_media_box(mut self) -> Self {
        self.pages.push(FixturePage::default());
        self
    }

    /// Put a media box on the root `/Pages` node
    pub fn inherited_media_box(mut self, width: f32, height: f32) -> Self {
        self.inherited_media_box = Some(PageRect::new(0.0, 0.0, width, height));
        self
    }

    /// Append a content stream to the last page
    pub fn content(mut self, ops: &str) -> Self {
        if let Some(page) = self.pages.last_mut() {
            page.contents.push(ops.to_string());
        }
        self
    }

    /// Fill the last page's media box with a color
    pub fn filled(self, rgb: [f32; 3]) -> Self {
        let rect = self
            .pages
            .last()
            .and_then(|p| p.media_box)
            .unwrap_or(PageRect::new(0.0, 0.0, 612.0, 792.0));
        let ops = format!(
            "{} {} {} rg {} {} {} {} re f",
            rgb[0],
            rgb[1],
            rgb[2],
            rect.x0,
            rect.y0,
            rect.width(),
            rect.height()
        );
        self.content(&ops)
    }

    /// Attach an annotation to the last page
    pub fn annotation(mut self, annotation: FixtureAnnotation) -> Self {
        if let Some(page) = self.pages.last_mut() {
            page.annotations.push(annotation);
        }
        self
    }

    /// Point the last page's `/Contents` at an object that does not exist
    pub fn dangling_contents(mut self) -> Self {
        if let Some(page) = self.pages.last_mut() {
            page.dangling_contents = true;
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut doc = self.build_document();
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("fixture serializes");
        buffer
    }

    pub fn build_document(self) -> Document {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();

        for page in &self.pages {
            let page_id = doc.new_object_id();
            let mut page_dict = Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
            ]);
            if let Some(media_box) = page.media_box {
                page_dict.set("MediaBox", media_box.to_pdf_array());
            }

            if page.dangling_contents {
                page_dict.set("Contents", Object::Reference((9999, 0)));
            } else if !page.contents.is_empty() {
                let refs: Vec<Object> = page
                    .contents
                    .iter()
                    .map(|ops| {
                        let id = doc.add_object(Stream::new(
                            Dictionary::new(),
                            ops.clone().into_bytes(),
                        ));
                        Object::Reference(id)
                    })
                    .collect();
                page_dict.set("Contents", Object::Array(refs));
            }

            if !page.annotations.is_empty() {
                let annots: Vec<Object> = page
                    .annotations
                    .iter()
                    .map(|a| Object::Reference(add_annotation(&mut doc, page_id, a)))
                    .collect();
                page_dict.set("Annots", Object::Array(annots));
            }

            doc.objects.insert(page_id, Object::Dictionary(page_dict));
            kids.push(Object::Reference(page_id));
        }

        let mut pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(kids.len() as i64)),
            ("Kids", Object::Array(kids)),
        ]);
        if let Some(media_box) = self.inherited_media_box {
            pages.set("MediaBox", media_box.to_pdf_array());
        }
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]);
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc
    }
}

fn add_annotation(doc: &mut Document, page_id: ObjectId, a: &FixtureAnnotation) -> ObjectId {
    let mut annot = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Annot".to_vec())),
        ("Subtype", Object::Name(a.subtype.as_bytes().to_vec())),
        ("Rect", a.rect.to_pdf_array()),
        ("P", Object::Reference(page_id)),
        ("F", Object::Integer(a.flags)),
        (
            "Contents",
            Object::String(b"fixture".to_vec(), StringFormat::Literal),
        ),
    ]);
    if !a.color.is_empty() {
        annot.set(
            "C",
            Object::Array(a.color.iter().map(|&c| Object::Real(c)).collect()),
        );
    }
    if let Some(opacity) = a.opacity {
        annot.set("CA", Object::Real(opacity));
    }

    if a.with_appearance {
        let operator = match a.color.len() {
            1 => "g",
            4 => "k",
            _ => "rg",
        };
        let components: Vec<String> = a.color.iter().map(|c| c.to_string()).collect();
        let fill = if components.is_empty() {
            String::new()
        } else {
            format!("{} {} ", components.join(" "), operator)
        };
        let ops = format!(
            "{}0 0 {} {} re f",
            fill,
            a.rect.width(),
            a.rect.height()
        );
        let bbox = PageRect::new(0.0, 0.0, a.rect.width(), a.rect.height());
        let form = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Form".to_vec())),
            ("BBox", bbox.to_pdf_array()),
        ]);
        let stream_id = doc.add_object(Stream::new(form, ops.into_bytes()));
        annot.set(
            "AP",
            Dictionary::from_iter(vec![("N", Object::Reference(stream_id))]),
        );
    }

    doc.add_object(annot)
}
