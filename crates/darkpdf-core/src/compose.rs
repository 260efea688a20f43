//! Document conversion
//!
//! [`DocumentComposer`] drives a conversion across every page of a source
//! document and assembles a new, independent PDF:
//!
//! 1. Validate each page (usable media box, decodable content). Pages that
//!    fail are reported as [`PageOutcome::Skipped`] and left out.
//! 2. Pre-allocate output page ids so references between pages (links,
//!    annotation `/P`) resolve to the new pages.
//! 3. Build each output page in source order through the
//!    [`OutputPageBuilder`](crate::page_builder).
//! 4. Assemble the page tree and catalog, compress and serialize.
//!
//! A [`CancellationToken`] is checked before every page.

use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::document::SourceDocument;
use crate::error::{DarkPdfError, Result};
use crate::geometry::PageRect;
use crate::page_builder::{prepare_page, OutputPageBuilder};
use crate::transform::TransformKind;

/// How preserved annotations end up on the output page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationMode {
    /// Keep annotations as annotation objects; viewers draw them above the
    /// transformed page content
    #[default]
    Overlay,
    /// Paint annotation appearances into the page content after the
    /// transform layers
    Flatten,
}

/// Options for one conversion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    pub include_annotations: bool,
    pub transform: TransformKind,
    pub annotation_mode: AnnotationMode,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            include_annotations: true,
            transform: TransformKind::Inversion,
            annotation_mode: AnnotationMode::Overlay,
        }
    }
}

/// What happened to one source page
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Rendered {
        /// 0-indexed position in the source document
        index: usize,
        media_box: PageRect,
        /// Annotations kept as objects or flattened into the content
        annotations: usize,
    },
    Skipped {
        index: usize,
        reason: String,
    },
}

impl PageOutcome {
    pub fn index(&self) -> usize {
        match self {
            PageOutcome::Rendered { index, .. } | PageOutcome::Skipped { index, .. } => *index,
        }
    }

    pub fn is_rendered(&self) -> bool {
        matches!(self, PageOutcome::Rendered { .. })
    }
}

/// A finished conversion
#[derive(Debug, Clone)]
pub struct Conversion {
    /// The serialized output PDF
    pub bytes: Vec<u8>,
    /// One entry per source page, in source order
    pub pages: Vec<PageOutcome>,
    pub processing_time_ms: u64,
}

impl Conversion {
    pub fn rendered_count(&self) -> usize {
        self.pages.iter().filter(|p| p.is_rendered()).count()
    }

    /// Skipped pages as `(index, reason)`
    pub fn skipped(&self) -> Vec<(usize, &str)> {
        self.pages
            .iter()
            .filter_map(|p| match p {
                PageOutcome::Skipped { index, reason } => Some((*index, reason.as_str())),
                PageOutcome::Rendered { .. } => None,
            })
            .collect()
    }
}

/// Cooperative cancellation flag shared between a caller and conversions
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DarkPdfError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Converts whole documents with one set of options
#[derive(Debug, Clone, Default)]
pub struct DocumentComposer {
    options: ConvertOptions,
    cancel: CancellationToken,
}

impl DocumentComposer {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Parse `bytes` and convert
    pub fn convert_bytes(&self, bytes: &[u8]) -> Result<Conversion> {
        let source = SourceDocument::load_mem(bytes)?;
        self.convert(&source)
    }

    /// Convert every page of `source` into a new document
    pub fn convert(&self, source: &SourceDocument) -> Result<Conversion> {
        let start = Instant::now();
        let doc = source.inner();
        let pages = source.pages();

        let mut outcomes = Vec::with_capacity(pages.len());
        let mut prepared = Vec::with_capacity(pages.len());
        for page in &pages {
            self.cancel.check()?;
            match prepare_page(doc, page) {
                Ok(ready) => prepared.push(ready),
                Err(reason) => {
                    warn!(page = page.index(), %reason, "skipping page");
                    outcomes.push(PageOutcome::Skipped {
                        index: page.index(),
                        reason,
                    });
                }
            }
        }

        let mut out = Document::with_version("1.7");
        let pages_id = out.new_object_id();
        let mut builder = OutputPageBuilder::new(
            &mut out,
            doc,
            self.options.transform,
            self.options.include_annotations,
            self.options.annotation_mode,
        );

        let kept: HashSet<ObjectId> = prepared.iter().map(|p| p.page.id).collect();
        let mut output_ids = Vec::with_capacity(prepared.len());
        for ready in &prepared {
            let id = out.new_object_id();
            builder.seed(ready.page.id, id);
            output_ids.push(id);
        }
        for page in &pages {
            if !kept.contains(&page.id) {
                builder.seed_skipped(page.id);
            }
        }
        for node in page_tree_nodes(doc, &pages.iter().map(|p| p.id).collect::<Vec<_>>()) {
            builder.seed(node, pages_id);
        }

        let mut kids = Vec::with_capacity(prepared.len());
        for (ready, page_id) in prepared.iter().zip(&output_ids) {
            self.cancel.check()?;
            let index = ready.page.index();
            match builder.build(&mut out, ready, *page_id, pages_id) {
                Ok(built) => {
                    debug!(
                        page = index,
                        annotations = built.annotations_kept,
                        flattened = built.annotations_flattened,
                        "rendered page"
                    );
                    kids.push(Object::Reference(*page_id));
                    outcomes.push(PageOutcome::Rendered {
                        index,
                        media_box: ready.media_box,
                        annotations: built.annotations_kept + built.annotations_flattened,
                    });
                }
                Err(reason) => {
                    warn!(page = index, %reason, "skipping page");
                    outcomes.push(PageOutcome::Skipped { index, reason });
                }
            }
        }
        outcomes.sort_by_key(PageOutcome::index);
        let imported = builder.objects_imported();

        let page_tree = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(kids.len() as i64)),
            ("Kids", Object::Array(kids)),
        ]);
        out.objects.insert(pages_id, Object::Dictionary(page_tree));
        let catalog_id = out.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        out.trailer.set("Root", Object::Reference(catalog_id));

        // Drop ids allocated for pages that failed during build
        out.prune_objects();
        out.compress();

        let mut bytes = Vec::new();
        out.save_to(&mut bytes)
            .map_err(|e| DarkPdfError::Encode(format!("Failed to save converted PDF: {}", e)))?;

        let conversion = Conversion {
            bytes,
            pages: outcomes,
            processing_time_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            pages = pages.len(),
            rendered = conversion.rendered_count(),
            skipped = pages.len() - conversion.rendered_count(),
            objects_imported = imported,
            output_size = conversion.bytes.len(),
            elapsed_ms = conversion.processing_time_ms,
            "converted document"
        );
        Ok(conversion)
    }
}

/// Convert `bytes` with `options`
pub fn convert(bytes: &[u8], options: ConvertOptions) -> Result<Conversion> {
    DocumentComposer::new(options).convert_bytes(bytes)
}

/// Intermediate `/Pages` nodes above the given pages
fn page_tree_nodes(doc: &Document, page_ids: &[ObjectId]) -> HashSet<ObjectId> {
    let mut nodes = HashSet::new();
    for page_id in page_ids {
        let mut current = *page_id;
        while let Some(parent) = doc
            .get_dictionary(current)
            .ok()
            .and_then(|d| d.get(b"Parent").ok())
            .and_then(|p| p.as_reference().ok())
        {
            if !nodes.insert(parent) {
                break;
            }
            current = parent;
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::annotations_of;
    use crate::color::Color;
    use crate::test_support::{FixtureAnnotation, PdfFixture};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_options() {
        let options = ConvertOptions::default();
        assert!(options.include_annotations);
        assert_eq!(options.transform, TransformKind::Inversion);
        assert_eq!(options.annotation_mode, AnnotationMode::Overlay);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let json = r#"{"transform":{"kind":"theme_recolor","theme":{"r":0.0,"g":0.0,"b":0.2}}}"#;
        let options: ConvertOptions = serde_json::from_str(json).unwrap();
        assert!(options.include_annotations);
        assert_eq!(
            options.transform,
            TransformKind::ThemeRecolor(Color::rgb(0.0, 0.0, 0.2))
        );
    }

    #[test]
    fn test_convert_preserves_page_count_and_sizes() {
        let bytes = PdfFixture::new()
            .page(612.0, 792.0)
            .filled([1.0, 1.0, 1.0])
            .page(300.0, 200.0)
            .build();
        let conversion = convert(&bytes, ConvertOptions::default()).unwrap();
        assert_eq!(conversion.rendered_count(), 2);

        let output = SourceDocument::load_mem(&conversion.bytes).unwrap();
        let sizes: Vec<_> = output.pages().into_iter().map(|p| p.media_box).collect();
        assert_eq!(
            sizes,
            vec![
                Some(PageRect::new(0.0, 0.0, 612.0, 792.0)),
                Some(PageRect::new(0.0, 0.0, 300.0, 200.0)),
            ]
        );
    }

    #[test]
    fn test_skipped_page_is_reported_and_omitted() {
        let bytes = PdfFixture::new()
            .page(100.0, 100.0)
            .page(100.0, 100.0)
            .dangling_contents()
            .page(100.0, 100.0)
            .build();
        let conversion = convert(&bytes, ConvertOptions::default()).unwrap();

        assert_eq!(conversion.pages.len(), 3);
        assert_eq!(conversion.rendered_count(), 2);
        let skipped = conversion.skipped();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].0, 1);

        let output = SourceDocument::load_mem(&conversion.bytes).unwrap();
        assert_eq!(output.page_count(), 2);
    }

    #[test]
    fn test_annotations_dropped_when_not_included() {
        let bytes = PdfFixture::new()
            .page(100.0, 100.0)
            .annotation(FixtureAnnotation::ink([0.0, 0.0, 10.0, 10.0], &[1.0, 0.0, 0.0]))
            .build();
        let options = ConvertOptions {
            include_annotations: false,
            ..Default::default()
        };
        let conversion = convert(&bytes, options).unwrap();
        let output = SourceDocument::load_mem(&conversion.bytes).unwrap();
        assert!(annotations_of(&output, &output.page(1).unwrap()).is_empty());
    }

    #[test]
    fn test_annotations_kept_point_at_new_page() {
        let bytes = PdfFixture::new()
            .page(100.0, 100.0)
            .annotation(FixtureAnnotation::ink([0.0, 0.0, 10.0, 10.0], &[1.0, 0.0, 0.0]))
            .build();
        let conversion = convert(&bytes, ConvertOptions::default()).unwrap();
        let output = SourceDocument::load_mem(&conversion.bytes).unwrap();
        let page = output.page(1).unwrap();

        let annotations = annotations_of(&output, &page);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].color, Some(Color::rgb(1.0, 0.0, 0.0)));
        let annot = output
            .inner()
            .get_dictionary(annotations[0].id.unwrap())
            .unwrap();
        assert_eq!(annot.get(b"P").unwrap().as_reference().unwrap(), page.id);
    }

    #[test]
    fn test_cancelled_token_aborts() {
        let bytes = PdfFixture::new().page(100.0, 100.0).build();
        let token = CancellationToken::new();
        token.cancel();
        let result = DocumentComposer::new(ConvertOptions::default())
            .with_cancellation(token)
            .convert_bytes(&bytes);
        assert!(matches!(result, Err(DarkPdfError::Cancelled)));
    }

    #[test]
    fn test_invalid_input_is_open_error() {
        let result = convert(b"not a pdf", ConvertOptions::default());
        assert!(matches!(result, Err(DarkPdfError::Open(_))));
    }

    #[test]
    fn test_all_pages_skipped_still_produces_document() {
        let bytes = PdfFixture::new().page(0.0, 0.0).build();
        let conversion = convert(&bytes, ConvertOptions::default()).unwrap();
        assert_eq!(conversion.rendered_count(), 0);
        assert_eq!(conversion.skipped().len(), 1);
    }
}
