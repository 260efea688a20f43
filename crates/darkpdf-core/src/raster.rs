//! Preview rasterizer
//!
//! Paints a page's filled vector content onto an RGBA surface so converted
//! output can be inspected and checked pixel by pixel. The interpreter
//! understands the graphics state stack (`q`/`Q`/`cm`), path construction,
//! fills with the nonzero and even-odd rules, device fill colors, `gs` blend
//! mode and fill alpha, and nested Form XObjects. Annotation normal
//! appearances are painted after the page content, the way a viewer
//! composites them.
//!
//! Text, images, strokes, shadings and clipping are not painted. Rotation
//! (`/Rotate`) is ignored; the surface is the unrotated media box.

use image::{Rgba, RgbaImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object};
use tracing::debug;

use crate::annotations::{annotation_color, annotation_entries, annotation_flags, appearance_placement, flags, normal_appearance};
use crate::color::Color;
use crate::document::{dict_get, inherited, page_content, stream_bytes, SourceDocument};
use crate::error::{DarkPdfError, Result};
use crate::geometry::{number, Matrix, PageRect};
use crate::transform::BlendMode;

/// Deepest Form XObject nesting that is followed
const MAX_FORM_DEPTH: usize = 16;
/// Line segments per flattened Bézier curve
const CURVE_STEPS: usize = 16;

/// Preview settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    /// Pixels per PDF point
    pub scale: f32,
    /// Paint annotation appearances over the page
    pub include_annotations: bool,
    /// Largest surface, in pixels, that will be allocated
    pub max_pixels: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            include_annotations: true,
            max_pixels: 50_000_000,
        }
    }
}

/// Render 1-indexed `page_number` of `source`
pub fn render_page(source: &SourceDocument, page_number: u32, options: &RenderOptions) -> Result<RgbaImage> {
    let page = source
        .page(page_number)
        .ok_or_else(|| DarkPdfError::Context(format!("page {} does not exist", page_number)))?;
    let media_box = page.media_box.ok_or_else(|| {
        DarkPdfError::Context(format!("page {} has no usable media box", page_number))
    })?;
    let doc = source.inner();

    let mut canvas = Canvas::new(&media_box, options)?;
    let base = Matrix::new(
        options.scale,
        0.0,
        0.0,
        -options.scale,
        -media_box.x0 * options.scale,
        media_box.y1 * options.scale,
    );
    let content = page_content(doc, page.id).map_err(DarkPdfError::Context)?;
    let resources = inherited(doc, page.id, b"Resources").and_then(|r| r.as_dict().ok());

    let mut painter = Painter { doc, canvas: &mut canvas };
    painter
        .run(&content, resources, GraphicsState::new(base), 0)
        .map_err(DarkPdfError::Context)?;

    if options.include_annotations {
        for (index, (_, annot)) in annotation_entries(doc, page.id).into_iter().enumerate() {
            if annotation_flags(doc, annot) & (flags::HIDDEN | flags::NO_VIEW) != 0 {
                continue;
            }
            let Some((_, form)) = normal_appearance(doc, annot) else {
                continue;
            };
            let Some(placement) = appearance_placement(doc, annot, form) else {
                continue;
            };
            let mut state = GraphicsState::new(placement.then(&base));
            state.alpha = annotation_color(doc, annot).map_or(1.0, |c| c.a);
            if let Err(reason) = painter.paint_form(form, resources, state, 1) {
                debug!(page = page.index(), annotation = index, %reason, "appearance not painted");
            }
        }
    }

    Ok(canvas.into_image())
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    ctm: Matrix,
    fill: [f32; 3],
    blend: BlendMode,
    alpha: f32,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            fill: [0.0; 3],
            blend: BlendMode::Normal,
            alpha: 1.0,
        }
    }
}

/// Opaque drawing surface, white paper to start with
struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 3]>,
}

impl Canvas {
    fn new(media_box: &PageRect, options: &RenderOptions) -> Result<Self> {
        let width = (media_box.width() * options.scale).ceil();
        let height = (media_box.height() * options.scale).ceil();
        if !(width >= 1.0 && height >= 1.0) {
            return Err(DarkPdfError::Context(format!(
                "surface would be empty ({}x{})",
                width, height
            )));
        }
        let pixels = width as u64 * height as u64;
        if pixels > options.max_pixels {
            return Err(DarkPdfError::Context(format!(
                "surface of {} pixels exceeds the limit of {}",
                pixels, options.max_pixels
            )));
        }
        Ok(Self {
            width: width as u32,
            height: height as u32,
            pixels: vec![[1.0; 3]; pixels as usize],
        })
    }

    /// Fill a device-space path, sampling pixel centers
    fn fill(&mut self, subpaths: &[Vec<(f32, f32)>], even_odd: bool, state: &GraphicsState) {
        let mut edges = Vec::new();
        for points in subpaths.iter().filter(|p| p.len() > 1) {
            for (i, &a) in points.iter().enumerate() {
                let b = points[(i + 1) % points.len()];
                if a.1 != b.1 {
                    edges.push((a, b));
                }
            }
        }
        if edges.is_empty() {
            return;
        }

        let (mut top, mut bottom) = (f32::INFINITY, f32::NEG_INFINITY);
        for &(a, b) in &edges {
            top = top.min(a.1).min(b.1);
            bottom = bottom.max(a.1).max(b.1);
        }
        let first_row = (top - 0.5).ceil().max(0.0) as u32;
        let last_row = ((bottom - 0.5).ceil().max(0.0) as u32).min(self.height);

        let mut crossings: Vec<(f32, i32)> = Vec::new();
        for row in first_row..last_row {
            let y = row as f32 + 0.5;
            crossings.clear();
            for &(a, b) in &edges {
                let (lo, hi) = if a.1 < b.1 { (a.1, b.1) } else { (b.1, a.1) };
                if y < lo || y >= hi {
                    continue;
                }
                let x = a.0 + (y - a.1) * (b.0 - a.0) / (b.1 - a.1);
                crossings.push((x, if b.1 > a.1 { 1 } else { -1 }));
            }
            crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut winding = 0;
            for pair in crossings.windows(2) {
                winding += pair[0].1;
                let inside = if even_odd { winding % 2 != 0 } else { winding != 0 };
                if inside {
                    self.span(row, pair[0].0, pair[1].0, state);
                }
            }
        }
    }

    fn span(&mut self, row: u32, x0: f32, x1: f32, state: &GraphicsState) {
        let start = (x0 - 0.5).ceil().max(0.0) as u32;
        let end = ((x1 - 0.5).ceil().max(0.0) as u32).min(self.width);
        let offset = (row * self.width) as usize;
        for x in start..end {
            let pixel = &mut self.pixels[offset + x as usize];
            *pixel = state.blend.composite(*pixel, state.fill, state.alpha);
        }
    }

    fn into_image(self) -> RgbaImage {
        let mut image = RgbaImage::new(self.width, self.height);
        for (pixel, value) in image.pixels_mut().zip(self.pixels) {
            let [r, g, b] = Color::from_channels(value).to_rgb8();
            *pixel = Rgba([r, g, b, 255]);
        }
        image
    }
}

/// Content stream interpreter bound to one canvas
struct Painter<'a, 'c> {
    doc: &'a Document,
    canvas: &'c mut Canvas,
}

impl<'a, 'c> Painter<'a, 'c> {
    fn run(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        initial: GraphicsState,
        depth: usize,
    ) -> std::result::Result<(), String> {
        let content = Content::decode(content).map_err(|e| format!("content does not parse: {}", e))?;

        let mut state = initial;
        let mut stack = Vec::new();
        let mut subpaths: Vec<Vec<(f32, f32)>> = Vec::new();

        for op in &content.operations {
            let nums: Vec<f32> = op.operands.iter().filter_map(number).collect();
            let point = |i: usize, state: &GraphicsState| state.ctm.apply(nums[i], nums[i + 1]);
            match op.operator.as_str() {
                "q" => stack.push(state),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        state = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_pdf_numbers(&op.operands) {
                        state.ctm = m.then(&state.ctm);
                    }
                }
                "m" if nums.len() >= 2 => subpaths.push(vec![point(0, &state)]),
                "l" if nums.len() >= 2 => {
                    let p = point(0, &state);
                    match subpaths.last_mut() {
                        Some(current) => current.push(p),
                        None => subpaths.push(vec![p]),
                    }
                }
                "c" | "v" | "y" => {
                    let Some(current) = subpaths.last_mut() else { continue };
                    let Some(&p0) = current.last() else { continue };
                    let (p1, p2, p3) = match (op.operator.as_str(), nums.len()) {
                        ("c", 6..) => (point(0, &state), point(2, &state), point(4, &state)),
                        ("v", 4..) => (p0, point(0, &state), point(2, &state)),
                        ("y", 4..) => {
                            let end = point(2, &state);
                            (point(0, &state), end, end)
                        }
                        _ => continue,
                    };
                    current.extend(flatten_cubic(p0, p1, p2, p3));
                }
                "re" if nums.len() >= 4 => {
                    let (x, y, w, h) = (nums[0], nums[1], nums[2], nums[3]);
                    subpaths.push(vec![
                        state.ctm.apply(x, y),
                        state.ctm.apply(x + w, y),
                        state.ctm.apply(x + w, y + h),
                        state.ctm.apply(x, y + h),
                    ]);
                }
                "f" | "F" | "B" | "b" => {
                    self.canvas.fill(&subpaths, false, &state);
                    subpaths.clear();
                }
                "f*" | "B*" | "b*" => {
                    self.canvas.fill(&subpaths, true, &state);
                    subpaths.clear();
                }
                "S" | "s" | "n" => subpaths.clear(),
                "g" | "rg" | "k" | "sc" | "scn" => {
                    if let Some(color) = Color::from_pdf_components(&nums) {
                        state.fill = color.channels();
                    }
                }
                "gs" => {
                    let name = op.operands.first().and_then(|n| n.as_name().ok());
                    let ext = name.and_then(|name| self.resource(resources, b"ExtGState", name));
                    if let Some(ext) = ext.and_then(|e| e.as_dict().ok()) {
                        self.apply_ext_state(ext, &mut state);
                    }
                }
                "Do" => {
                    let name = op.operands.first().and_then(|n| n.as_name().ok());
                    let xobject = name.and_then(|name| self.resource(resources, b"XObject", name));
                    let Some(Object::Stream(form)) = xobject else { continue };
                    let is_form = form
                        .dict
                        .get(b"Subtype")
                        .and_then(Object::as_name)
                        .is_ok_and(|s| s == b"Form");
                    if !is_form {
                        continue;
                    }
                    if let Err(reason) = self.paint_form(form, resources, state, depth + 1) {
                        debug!(%reason, "form not painted");
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Paint a Form XObject with `state`; the form's `/Matrix` is applied here
    fn paint_form(
        &mut self,
        form: &'a lopdf::Stream,
        parent_resources: Option<&'a Dictionary>,
        state: GraphicsState,
        depth: usize,
    ) -> std::result::Result<(), String> {
        if depth > MAX_FORM_DEPTH {
            return Err("form nesting too deep".into());
        }
        let matrix = dict_get(self.doc, &form.dict, b"Matrix")
            .and_then(|m| m.as_array().ok())
            .and_then(|m| Matrix::from_pdf_numbers(m))
            .unwrap_or_default();
        let resources = dict_get(self.doc, &form.dict, b"Resources")
            .and_then(|r| r.as_dict().ok())
            .or(parent_resources);
        let content = stream_bytes(form)?;
        let mut inner = state;
        inner.ctm = matrix.then(&state.ctm);
        self.run(&content, resources, inner, depth)
    }

    fn resource(&self, resources: Option<&'a Dictionary>, category: &[u8], name: &[u8]) -> Option<&'a Object> {
        let category = dict_get(self.doc, resources?, category)?.as_dict().ok()?;
        dict_get(self.doc, category, name)
    }

    fn apply_ext_state(&self, ext: &Dictionary, state: &mut GraphicsState) {
        if let Some(bm) = dict_get(self.doc, ext, b"BM") {
            let mode = match bm {
                Object::Name(name) => BlendMode::from_pdf_name(name),
                Object::Array(names) => names
                    .iter()
                    .filter_map(|n| n.as_name().ok())
                    .find_map(BlendMode::from_pdf_name),
                _ => None,
            };
            state.blend = mode.unwrap_or(BlendMode::Normal);
        }
        if let Some(alpha) = dict_get(self.doc, ext, b"ca").and_then(number) {
            state.alpha = alpha.clamp(0.0, 1.0);
        }
    }
}

fn flatten_cubic(p0: (f32, f32), p1: (f32, f32), p2: (f32, f32), p3: (f32, f32)) -> Vec<(f32, f32)> {
    (1..=CURVE_STEPS)
        .map(|i| {
            let t = i as f32 / CURVE_STEPS as f32;
            let u = 1.0 - t;
            let (w0, w1, w2, w3) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
            (
                w0 * p0.0 + w1 * p1.0 + w2 * p2.0 + w3 * p3.0,
                w0 * p0.1 + w1 * p1.1 + w2 * p2.1 + w3 * p3.1,
            )
        })
        .collect()
}
