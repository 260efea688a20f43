//! Color transform math
//!
//! Two equivalent views of the same transforms live here:
//!
//! - the blend layers the composer paints over a page (a white
//!   `Difference` layer for inversion; `Saturation`, `Difference` and a
//!   theme-colored `Screen` layer for the theme recolor), and
//! - closed-form per-color and per-pixel functions (`map_color`, `invert`,
//!   `recolor`) built on the theme's 3x4 color matrix.
//!
//! Everything in this module is pure; no I/O.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::color::Color;

/// Which transform a conversion applies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "theme", rename_all = "snake_case")]
pub enum TransformKind {
    /// Per-channel `1 - value`
    #[default]
    Inversion,
    /// Grayscale, invert, then tint so black lands on the theme color
    ThemeRecolor(Color),
}

/// A full-page layer composited over already drawn content
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendLayer {
    pub mode: BlendMode,
    pub color: Color,
}

impl TransformKind {
    /// Color painted under the page content.
    ///
    /// White for both kinds: inversion turns it black, and the theme remap
    /// turns it into exactly the theme color, so transparent regions of the
    /// source end up as the defined dark background.
    pub fn backdrop(&self) -> Color {
        Color::WHITE
    }

    /// Layers painted over the replayed content, in order
    pub fn layers(&self) -> Vec<BlendLayer> {
        match self {
            TransformKind::Inversion => vec![BlendLayer {
                mode: BlendMode::Difference,
                color: Color::WHITE,
            }],
            TransformKind::ThemeRecolor(theme) => vec![
                BlendLayer {
                    mode: BlendMode::Saturation,
                    color: Color::WHITE,
                },
                BlendLayer {
                    mode: BlendMode::Difference,
                    color: Color::WHITE,
                },
                BlendLayer {
                    mode: BlendMode::Screen,
                    color: theme.with_alpha(1.0),
                },
            ],
        }
    }

    /// What the transform does to one opaque color, in closed form
    pub fn map_color(&self, color: Color) -> Color {
        match self {
            TransformKind::Inversion => color.inverted(),
            TransformKind::ThemeRecolor(theme) => {
                let v = 1.0 - color.luminosity();
                Color::from_channels(ColorMatrix::for_theme(*theme).apply([v, v, v]))
                    .with_alpha(color.a)
            }
        }
    }

    /// Run a color through the blend layers, as a compositor would
    pub fn composite_layers(&self, color: Color) -> Color {
        let mut channels = color.channels();
        for layer in self.layers() {
            channels = layer
                .mode
                .composite(channels, layer.color.channels(), layer.color.a);
        }
        Color::from_channels(channels).with_alpha(color.a)
    }
}

/// Separable and non-separable PDF blend modes used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Difference,
    Saturation,
    Luminosity,
}

impl BlendMode {
    /// Name used for `/BM` in an ExtGState
    pub fn pdf_name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Difference => "Difference",
            BlendMode::Saturation => "Saturation",
            BlendMode::Luminosity => "Luminosity",
        }
    }

    /// Parse a `/BM` name; `Compatible` is an alias of `Normal`
    pub fn from_pdf_name(name: &[u8]) -> Option<Self> {
        match name {
            b"Normal" | b"Compatible" => Some(BlendMode::Normal),
            b"Multiply" => Some(BlendMode::Multiply),
            b"Screen" => Some(BlendMode::Screen),
            b"Difference" => Some(BlendMode::Difference),
            b"Saturation" => Some(BlendMode::Saturation),
            b"Luminosity" => Some(BlendMode::Luminosity),
            _ => None,
        }
    }

    /// Blend function `B(backdrop, source)`
    pub fn blend(&self, cb: [f32; 3], cs: [f32; 3]) -> [f32; 3] {
        match self {
            BlendMode::Normal => cs,
            BlendMode::Multiply => per_channel(cb, cs, |b, s| b * s),
            BlendMode::Screen => per_channel(cb, cs, |b, s| b + s - b * s),
            BlendMode::Difference => per_channel(cb, cs, |b, s| (b - s).abs()),
            BlendMode::Saturation => set_lum(set_sat(cb, sat(cs)), lum(cb)),
            BlendMode::Luminosity => set_lum(cb, lum(cs)),
        }
    }

    /// Composite an opaque-backdrop pixel with source alpha `alpha`
    pub fn composite(&self, cb: [f32; 3], cs: [f32; 3], alpha: f32) -> [f32; 3] {
        let blended = self.blend(cb, cs);
        let a = alpha.clamp(0.0, 1.0);
        per_channel(cb, blended, |b, x| ((1.0 - a) * b + a * x).clamp(0.0, 1.0))
    }
}

fn per_channel(a: [f32; 3], b: [f32; 3], f: impl Fn(f32, f32) -> f32) -> [f32; 3] {
    [f(a[0], b[0]), f(a[1], b[1]), f(a[2], b[2])]
}

fn lum(c: [f32; 3]) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn clip_color(c: [f32; 3]) -> [f32; 3] {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0.0 && l - n != 0.0 {
        out = out.map(|v| l + (v - l) * l / (l - n));
    }
    if x > 1.0 && x - l != 0.0 {
        out = out.map(|v| l + (v - l) * (1.0 - l) / (x - l));
    }
    out
}

fn set_lum(c: [f32; 3], l: f32) -> [f32; 3] {
    let d = l - lum(c);
    clip_color(c.map(|v| v + d))
}

fn sat(c: [f32; 3]) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn set_sat(c: [f32; 3], s: f32) -> [f32; 3] {
    let max = c[0].max(c[1]).max(c[2]);
    let min = c[0].min(c[1]).min(c[2]);
    if max <= min {
        return [0.0; 3];
    }
    c.map(|v| {
        if v == max {
            s
        } else if v == min {
            0.0
        } else {
            (v - min) * s / (max - min)
        }
    })
}

/// A 3x4 affine color matrix: `out_c = sum_k rows[c][k] * in_k + rows[c][3]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatrix {
    pub rows: [[f32; 4]; 3],
}

impl ColorMatrix {
    /// Matrix mapping black to the theme color and white to white.
    ///
    /// Each output channel mixes the three inputs equally with weight
    /// `(1 - theme_c) / 3` and adds `theme_c` as bias.
    pub fn for_theme(theme: Color) -> Self {
        let row = |t: f32| {
            let w = (1.0 - t) / 3.0;
            [w, w, w, t]
        };
        Self {
            rows: [row(theme.r), row(theme.g), row(theme.b)],
        }
    }

    pub fn apply(&self, input: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for (value, row) in out.iter_mut().zip(&self.rows) {
            *value = (row[0] * input[0] + row[1] * input[1] + row[2] * input[2] + row[3])
                .clamp(0.0, 1.0);
        }
        out
    }
}

/// Invert every pixel in place (`255 - channel`), alpha untouched
pub fn invert(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        for channel in &mut pixel.0[..3] {
            *channel = 255 - *channel;
        }
    }
}

/// Grayscale, invert and tint every pixel in place
pub fn recolor(image: &mut RgbaImage, theme: Color) {
    let matrix = ColorMatrix::for_theme(theme);
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let gray = Color::from_rgb8([r, g, b]).luminosity();
        let v = 1.0 - gray;
        let out = Color::from_channels(matrix.apply([v, v, v])).to_rgb8();
        pixel.0[..3].copy_from_slice(&out);
    }
}

/// Apply a transform kind to a rendered image in place
pub fn apply(image: &mut RgbaImage, kind: &TransformKind) {
    match kind {
        TransformKind::Inversion => invert(image),
        TransformKind::ThemeRecolor(theme) => recolor(image, *theme),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Theme;
    use image::Rgba;
    use proptest::prelude::*;

    fn close(a: [f32; 3], b: [f32; 3]) -> bool {
        a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-4)
    }

    #[test]
    fn test_difference_with_white_inverts() {
        let out = BlendMode::Difference.blend([0.2, 0.5, 1.0], [1.0; 3]);
        assert!(close(out, [0.8, 0.5, 0.0]));
    }

    #[test]
    fn test_saturation_with_white_desaturates_to_luminosity() {
        let cb = [1.0, 0.0, 0.0];
        let out = BlendMode::Saturation.blend(cb, [1.0; 3]);
        assert!(close(out, [0.3, 0.3, 0.3]));
    }

    #[test]
    fn test_screen_with_theme_lifts_black_to_theme() {
        let theme = [0.0, 0.0, 0.2];
        assert!(close(BlendMode::Screen.blend([0.0; 3], theme), theme));
        assert!(close(BlendMode::Screen.blend([1.0; 3], theme), [1.0; 3]));
    }

    #[test]
    fn test_composite_respects_alpha() {
        let out = BlendMode::Normal.composite([1.0; 3], [0.0; 3], 0.25);
        assert!(close(out, [0.75; 3]));
    }

    #[test]
    fn test_theme_matrix_maps_black_and_white() {
        let matrix = ColorMatrix::for_theme(Color::rgb(0.0, 0.0, 0.2));
        assert!(close(matrix.apply([0.0; 3]), [0.0, 0.0, 0.2]));
        assert!(close(matrix.apply([1.0; 3]), [1.0; 3]));
    }

    #[test]
    fn test_recolor_white_page_becomes_theme() {
        let theme = Color::rgb(0.0, 0.0, 0.2);
        let mapped = TransformKind::ThemeRecolor(theme).map_color(Color::WHITE);
        assert!(mapped.approx_eq(&theme, 1e-4));

        let black = TransformKind::ThemeRecolor(theme).map_color(Color::BLACK);
        assert!(black.approx_eq(&Color::WHITE, 1e-4));
    }

    #[test]
    fn test_backdrop_resolves_to_dark_background() {
        let inversion = TransformKind::Inversion;
        assert_eq!(inversion.map_color(inversion.backdrop()), Color::BLACK);

        let theme = Theme::NightBlue.background();
        let recolor = TransformKind::ThemeRecolor(theme);
        assert!(recolor
            .composite_layers(recolor.backdrop())
            .approx_eq(&theme, 1e-4));
    }

    #[test]
    fn test_invert_image_pixels() {
        let mut image = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 10, 128]));
        invert(&mut image);
        assert_eq!(image.get_pixel(1, 1), &Rgba([0, 255, 245, 128]));
    }

    #[test]
    fn test_recolor_image_pixels() {
        let mut image = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        recolor(&mut image, Color::rgb(0.0, 0.0, 0.2));
        assert_eq!(image.get_pixel(0, 0), &Rgba([0, 0, 51, 255]));
    }

    #[test]
    fn test_blend_names_parse_back() {
        for mode in [
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Difference,
            BlendMode::Saturation,
            BlendMode::Luminosity,
        ] {
            assert_eq!(BlendMode::from_pdf_name(mode.pdf_name().as_bytes()), Some(mode));
        }
        assert_eq!(BlendMode::from_pdf_name(b"ColorDodge"), None);
    }

    proptest! {
        /// Property: inverting an image twice restores it exactly
        #[test]
        fn double_inversion_is_identity(pixels in proptest::collection::vec(any::<[u8; 4]>(), 1..64)) {
            let width = pixels.len() as u32;
            let raw: Vec<u8> = pixels.iter().flatten().copied().collect();
            let original = RgbaImage::from_raw(width, 1, raw).unwrap();
            let mut image = original.clone();
            invert(&mut image);
            invert(&mut image);
            prop_assert_eq!(image, original);
        }

        /// Property: the blend layers and the closed-form math agree
        #[test]
        fn layers_match_closed_form(
            r in 0.0f32..=1.0, g in 0.0f32..=1.0, b in 0.0f32..=1.0,
            tr in 0.0f32..=1.0, tg in 0.0f32..=1.0, tb in 0.0f32..=1.0,
        ) {
            let color = Color::rgb(r, g, b);
            for kind in [TransformKind::Inversion, TransformKind::ThemeRecolor(Color::rgb(tr, tg, tb))] {
                let layered = kind.composite_layers(color);
                let closed = kind.map_color(color);
                prop_assert!(layered.approx_eq(&closed, 1e-4), "{:?}: {:?} vs {:?}", kind, layered, closed);
            }
        }

        /// Property: map_color inversion is an involution
        #[test]
        fn color_inversion_round_trips(r in 0.0f32..=1.0, g in 0.0f32..=1.0, b in 0.0f32..=1.0) {
            let color = Color::rgb(r, g, b);
            let twice = TransformKind::Inversion.map_color(TransformKind::Inversion.map_color(color));
            prop_assert!(twice.approx_eq(&color, 1e-6));
        }
    }
}
