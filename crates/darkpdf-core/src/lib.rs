//! Dark-mode color transforms for PDF documents
//!
//! This crate converts PDF pages into inverted or theme-recolored variants
//! using lopdf, keeping text and vector content as vectors:
//! - `compose::DocumentComposer`: whole-document conversion with per-page
//!   outcomes and cancellation
//! - `annotations`: annotation inventory and distinct colors
//! - `replace`: in-place annotation color replacement
//! - `raster`: a small preview rasterizer for inspecting output
//!
//! # Feature Flags
//!
//! - `runtime` (default): concurrent batch conversion on tokio
//! - `test-utils`: exposes `test_support` fixtures to integration tests

pub mod annotations;
pub mod color;
pub mod compose;
pub mod document;
pub mod error;
pub mod geometry;
pub mod raster;
pub mod replace;
pub mod transform;

mod page_builder;

#[cfg(feature = "runtime")]
pub mod batch;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use annotations::{annotations_of, distinct_colors, Annotation};
pub use color::{Color, Theme};
pub use compose::{
    convert, AnnotationMode, CancellationToken, Conversion, ConvertOptions, DocumentComposer,
    PageOutcome,
};
pub use document::{SourceDocument, SourcePage};
pub use error::{DarkPdfError, Result};
pub use geometry::PageRect;
pub use raster::{render_page, RenderOptions};
pub use replace::{replace_annotation_color, replace_in_document, Replacement};
pub use transform::TransformKind;

#[cfg(feature = "runtime")]
pub use batch::{convert_all, BatchJob, BatchResult};

/// Parse PDF bytes and return the page count
pub fn page_count(bytes: &[u8]) -> Result<usize> {
    Ok(SourceDocument::load_mem(bytes)?.page_count())
}
