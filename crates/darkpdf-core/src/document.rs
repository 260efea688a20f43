//! Source documents and their pages
//!
//! A [`SourceDocument`] is opened once, from bytes or a path, and is only
//! ever read afterwards. Page attributes that PDF allows to be inherited
//! from the page tree (`MediaBox`, `CropBox`, `Rotate`, `Resources`) are
//! resolved here so callers never walk `/Parent` chains themselves.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{DarkPdfError, Result};
use crate::geometry::PageRect;

/// Media box assumed when a page and all its ancestors omit one (US Letter)
pub const DEFAULT_MEDIA_BOX: PageRect = PageRect {
    x0: 0.0,
    y0: 0.0,
    x1: 612.0,
    y1: 792.0,
};

/// Deepest `/Parent` chain or reference chain followed before giving up
const MAX_CHAIN_DEPTH: usize = 32;

/// Where a source document came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOrigin {
    Path(PathBuf),
    Memory,
}

/// A parsed, read-only input PDF
#[derive(Debug, Clone)]
pub struct SourceDocument {
    doc: Document,
    origin: DocumentOrigin,
}

/// One page of a source document, with inherited attributes resolved
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePage {
    /// 1-indexed page number
    pub number: u32,
    pub id: ObjectId,
    /// `None` when the page has an unreadable or zero-area media box
    pub media_box: Option<PageRect>,
    pub crop_box: Option<PageRect>,
    /// Clockwise rotation in degrees, normalized to 0, 90, 180 or 270
    pub rotate: i64,
}

impl SourcePage {
    /// 0-indexed position in the document
    pub fn index(&self) -> usize {
        self.number as usize - 1
    }
}

impl SourceDocument {
    /// Parse a PDF from memory
    pub fn load_mem(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| DarkPdfError::Open(e.to_string()))?;
        Self::validate(doc, DocumentOrigin::Memory)
    }

    /// Read a PDF file fully and parse it; the file is never written
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let doc = Document::load_mem(&bytes)
            .map_err(|e| DarkPdfError::Open(format!("{}: {}", path.display(), e)))?;
        Self::validate(doc, DocumentOrigin::Path(path.to_path_buf()))
    }

    /// Wrap an already parsed document
    pub fn from_document(doc: Document) -> Result<Self> {
        Self::validate(doc, DocumentOrigin::Memory)
    }

    fn validate(doc: Document, origin: DocumentOrigin) -> Result<Self> {
        if doc.is_encrypted() {
            return Err(DarkPdfError::Open(
                "encrypted documents are not supported".into(),
            ));
        }
        let root = doc
            .trailer
            .get(b"Root")
            .ok()
            .and_then(|root| resolve(&doc, root))
            .and_then(|root| root.as_dict().ok())
            .ok_or_else(|| DarkPdfError::Open("document has no catalog".into()))?;
        if !root.has(b"Pages") {
            return Err(DarkPdfError::Open("catalog has no page tree".into()));
        }
        debug!(pages = doc.get_pages().len(), "opened source document");
        Ok(Self { doc, origin })
    }

    pub fn origin(&self) -> &DocumentOrigin {
        &self.origin
    }

    /// The underlying lopdf document
    pub fn inner(&self) -> &Document {
        &self.doc
    }

    /// Consume the wrapper and hand back the lopdf document
    pub fn into_inner(self) -> Document {
        self.doc
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// All pages in document order
    pub fn pages(&self) -> Vec<SourcePage> {
        self.doc
            .get_pages()
            .into_iter()
            .map(|(number, id)| self.describe_page(number, id))
            .collect()
    }

    /// Page by 1-indexed number
    pub fn page(&self, number: u32) -> Option<SourcePage> {
        let id = *self.doc.get_pages().get(&number)?;
        Some(self.describe_page(number, id))
    }

    fn describe_page(&self, number: u32, id: ObjectId) -> SourcePage {
        let rect = |key: &[u8]| {
            inherited(&self.doc, id, key)
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| PageRect::from_pdf_array(array))
        };
        let media_box = match inherited(&self.doc, id, b"MediaBox") {
            None => Some(DEFAULT_MEDIA_BOX),
            Some(_) => rect(b"MediaBox").filter(|r| !r.is_degenerate()),
        };
        let rotate = inherited(&self.doc, id, b"Rotate")
            .and_then(|obj| obj.as_i64().ok())
            .unwrap_or(0)
            .rem_euclid(360);
        SourcePage {
            number,
            id,
            media_box,
            crop_box: rect(b"CropBox").filter(|r| !r.is_degenerate()),
            rotate: rotate - rotate % 90,
        }
    }
}

/// Follow a chain of references to a direct object
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    let mut current = object;
    for _ in 0..MAX_CHAIN_DEPTH {
        match current {
            Object::Reference(id) => current = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

/// Look up a dictionary entry and resolve it
pub(crate) fn dict_get<'a>(
    doc: &'a Document,
    dict: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|obj| resolve(doc, obj))
}

/// Look up a page attribute, walking up the page tree for inheritable keys
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_CHAIN_DEPTH {
        if let Some(value) = dict_get(doc, node, key) {
            return Some(value);
        }
        node = dict_get(doc, node, b"Parent")?.as_dict().ok()?;
    }
    None
}

/// Raw bytes of a stream, decoded when it carries a filter
pub(crate) fn stream_bytes(stream: &Stream) -> std::result::Result<Vec<u8>, String> {
    if stream.dict.has(b"Filter") {
        stream.decompressed_content().map_err(|e| e.to_string())
    } else {
        Ok(stream.content.clone())
    }
}

/// The page's content streams, decoded and concatenated.
///
/// A missing `/Contents` is an empty page; a dangling reference or an
/// undecodable stream is an error.
pub(crate) fn page_content(doc: &Document, page_id: ObjectId) -> std::result::Result<Vec<u8>, String> {
    let page = doc
        .get_dictionary(page_id)
        .map_err(|e| format!("page object unreadable: {}", e))?;
    let contents = match page.get(b"Contents") {
        Ok(contents) => contents,
        Err(_) => return Ok(Vec::new()),
    };
    let parts: Vec<&Object> = match resolve(doc, contents) {
        Some(Object::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => return Err("page content reference is dangling".into()),
    };

    let mut buffer = Vec::new();
    for part in parts {
        let stream = resolve(doc, part)
            .and_then(|obj| obj.as_stream().ok())
            .ok_or_else(|| "page content is not a stream".to_string())?;
        buffer.extend(stream_bytes(stream)?);
        // Streams are concatenated at token boundaries
        buffer.push(b'\n');
    }
    Ok(buffer)
}
