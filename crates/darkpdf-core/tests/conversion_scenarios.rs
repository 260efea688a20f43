//! End-to-end conversion scenarios, checked on rendered pixels

use darkpdf_core::test_support::{FixtureAnnotation, PdfFixture};
use darkpdf_core::{
    annotations_of, convert, distinct_colors, render_page, replace_annotation_color,
    AnnotationMode, Color, ConvertOptions, RenderOptions, SourceDocument, Theme, TransformKind,
};
use image::{Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const RED: [f32; 3] = [1.0, 0.0, 0.0];

fn render(bytes: &[u8], page: u32) -> RgbaImage {
    let source = SourceDocument::load_mem(bytes).unwrap();
    render_page(&source, page, &RenderOptions::default()).unwrap()
}

fn convert_with(bytes: &[u8], options: ConvertOptions) -> Vec<u8> {
    convert(bytes, options).unwrap().bytes
}

fn close(actual: &Rgba<u8>, expected: [u8; 3], tolerance: u8) -> bool {
    actual.0[..3]
        .iter()
        .zip(expected)
        .all(|(a, e)| a.abs_diff(e) <= tolerance)
}

/// A white page with a gray square and a red annotation in the corner
fn annotated_page() -> Vec<u8> {
    PdfFixture::new()
        .page(100.0, 100.0)
        .filled([1.0, 1.0, 1.0])
        .content("0.25 g 60 60 30 30 re f")
        .annotation(FixtureAnnotation::ink([0.0, 0.0, 20.0, 20.0], &RED))
        .build()
}

#[test]
fn white_page_inverts_to_black() {
    let bytes = PdfFixture::new().page(50.0, 40.0).filled([1.0, 1.0, 1.0]).build();
    let output = convert_with(&bytes, ConvertOptions::default());

    assert_eq!(SourceDocument::load_mem(&output).unwrap().page_count(), 1);
    let image = render(&output, 1);
    assert_eq!(image.dimensions(), (50, 40));
    assert!(image.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
}

#[test]
fn transparent_page_also_inverts_to_black() {
    let bytes = PdfFixture::new().page(30.0, 30.0).build();
    let image = render(&convert_with(&bytes, ConvertOptions::default()), 1);
    assert!(image.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
}

#[test]
fn annotation_color_survives_inversion() {
    let output = convert_with(&annotated_page(), ConvertOptions::default());
    let image = render(&output, 1);

    // Under the annotation: original red, not cyan
    assert_eq!(image.get_pixel(10, 90), &Rgba([255, 0, 0, 255]));
    // Page background inverted
    assert_eq!(image.get_pixel(50, 50), &Rgba([0, 0, 0, 255]));
    // 0.25 gray becomes 0.75 gray
    assert!(close(image.get_pixel(75, 25), [191, 191, 191], 1));

    let source = SourceDocument::load_mem(&output).unwrap();
    let annotations = annotations_of(&source, &source.page(1).unwrap());
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].color, Some(Color::rgb(1.0, 0.0, 0.0)));
}

#[test]
fn flattened_annotation_keeps_its_color() {
    let options = ConvertOptions {
        annotation_mode: AnnotationMode::Flatten,
        ..Default::default()
    };
    let output = convert_with(&annotated_page(), options);
    let source = SourceDocument::load_mem(&output).unwrap();
    assert!(annotations_of(&source, &source.page(1).unwrap()).is_empty());

    let image = render(&output, 1);
    assert_eq!(image.get_pixel(10, 90), &Rgba([255, 0, 0, 255]));
    assert_eq!(image.get_pixel(50, 50), &Rgba([0, 0, 0, 255]));
}

#[test]
fn flattened_translucent_annotation_matches_overlay() {
    let bytes = PdfFixture::new()
        .page(100.0, 100.0)
        .filled([1.0, 1.0, 1.0])
        .annotation(FixtureAnnotation::ink([0.0, 0.0, 20.0, 20.0], &RED).opacity(0.5))
        .build();
    let overlay = render(&convert_with(&bytes, ConvertOptions::default()), 1);
    let flatten = render(
        &convert_with(
            &bytes,
            ConvertOptions {
                annotation_mode: AnnotationMode::Flatten,
                ..Default::default()
            },
        ),
        1,
    );

    // Half red over the inverted (black) page
    assert!(close(overlay.get_pixel(10, 90), [128, 0, 0], 1));
    let expected = overlay.get_pixel(10, 90).0;
    assert!(close(flatten.get_pixel(10, 90), [expected[0], expected[1], expected[2]], 1));
}

#[test]
fn excluded_annotation_region_is_inverted_background() {
    let options = ConvertOptions {
        include_annotations: false,
        ..Default::default()
    };
    let output = convert_with(&annotated_page(), options);
    let source = SourceDocument::load_mem(&output).unwrap();
    assert!(annotations_of(&source, &source.page(1).unwrap()).is_empty());

    let image = render(&output, 1);
    for (x, y) in [(1, 99), (10, 90), (19, 81)] {
        assert_eq!(image.get_pixel(x, y), &Rgba([0, 0, 0, 255]));
    }
}

#[test]
fn theme_recolor_white_page_becomes_theme_background() {
    let bytes = PdfFixture::new().page(40.0, 40.0).filled([1.0, 1.0, 1.0]).build();
    let options = ConvertOptions {
        transform: TransformKind::ThemeRecolor(Theme::NightBlue.background()),
        ..Default::default()
    };
    let image = render(&convert_with(&bytes, options), 1);
    assert!(image.pixels().all(|p| close(p, [0, 0, 51], 1)));
}

#[test]
fn theme_recolor_black_content_becomes_white() {
    let bytes = PdfFixture::new()
        .page(40.0, 40.0)
        .filled([1.0, 1.0, 1.0])
        .content("0 g 0 0 10 10 re f")
        .build();
    let options = ConvertOptions {
        transform: TransformKind::ThemeRecolor(Theme::DarkGray.background()),
        ..Default::default()
    };
    let image = render(&convert_with(&bytes, options), 1);
    assert!(close(image.get_pixel(5, 35), [255, 255, 255], 1));
    assert!(close(image.get_pixel(30, 5), [25, 25, 25], 1));
}

#[test]
fn double_inversion_restores_pixels() {
    let bytes = PdfFixture::new()
        .page(60.0, 60.0)
        .filled([0.9, 0.8, 0.7])
        .content("0.1 0.4 0.6 rg 10 10 20 30 re f")
        .build();
    let original = render(&bytes, 1);
    let once = convert_with(&bytes, ConvertOptions::default());
    let twice = convert_with(&once, ConvertOptions::default());
    let restored = render(&twice, 1);

    assert_eq!(original.dimensions(), restored.dimensions());
    for (a, b) in original.pixels().zip(restored.pixels()) {
        assert!(close(b, [a.0[0], a.0[1], a.0[2]], 1), "{:?} vs {:?}", a, b);
    }
}

#[test]
fn vector_layers_match_pixel_transforms() {
    let bytes = PdfFixture::new()
        .page(60.0, 60.0)
        .filled([0.95, 0.9, 0.85])
        .content("0.8 0.1 0.1 rg 5 5 20 20 re f 0.1 0.3 0.9 rg 30 30 25 25 re f")
        .build();
    let original = render(&bytes, 1);

    for kind in [
        TransformKind::Inversion,
        TransformKind::ThemeRecolor(Theme::NightBlue.background()),
        TransformKind::ThemeRecolor(Theme::DarkGray.background()),
    ] {
        let mut expected = original.clone();
        darkpdf_core::transform::apply(&mut expected, &kind);

        let options = ConvertOptions {
            transform: kind,
            ..Default::default()
        };
        let actual = render(&convert_with(&bytes, options), 1);
        for (e, a) in expected.pixels().zip(actual.pixels()) {
            assert!(close(a, [e.0[0], e.0[1], e.0[2]], 2), "{:?}: {:?} vs {:?}", kind, e, a);
        }
    }
}

#[test]
fn annotation_counts_preserved_per_page() {
    let bytes = PdfFixture::new()
        .page(100.0, 100.0)
        .annotation(FixtureAnnotation::ink([0.0, 0.0, 10.0, 10.0], &RED))
        .annotation(FixtureAnnotation::ink([10.0, 10.0, 20.0, 20.0], &[0.0, 0.0, 1.0]).hidden())
        .page(100.0, 100.0)
        .page(100.0, 100.0)
        .annotation(FixtureAnnotation::ink([0.0, 0.0, 10.0, 10.0], &[0.5]).without_appearance())
        .build();
    let input = SourceDocument::load_mem(&bytes).unwrap();
    let output = SourceDocument::load_mem(&convert_with(&bytes, ConvertOptions::default())).unwrap();

    let counts = |doc: &SourceDocument| -> Vec<usize> {
        doc.pages().iter().map(|p| annotations_of(doc, p).len()).collect()
    };
    assert_eq!(counts(&output), counts(&input));
    assert_eq!(counts(&output), vec![2, 0, 1]);
}

#[test]
fn replace_then_inventory_has_no_old_color() {
    let red = Color::rgb(1.0, 0.0, 0.0);
    let teal = Color::from_hex("#008080").unwrap();
    let bytes = annotated_page();
    assert_eq!(distinct_colors(&SourceDocument::load_mem(&bytes).unwrap()), vec![red]);

    let replaced = replace_annotation_color(&bytes, red, teal).unwrap();
    let source = SourceDocument::load_mem(&replaced.bytes).unwrap();
    let colors = distinct_colors(&source);
    assert_eq!(colors.len(), 1);
    assert!(colors[0].approx_eq(&teal, 1e-4));
    assert!(!colors.contains(&red));

    // The appearance was rewritten too, so the rendered ink changes
    let image = render(&replaced.bytes, 1);
    assert!(close(image.get_pixel(10, 90), [0, 128, 128], 1));
}

#[test]
fn skipped_page_shortens_output() {
    let bytes = PdfFixture::new()
        .page(100.0, 100.0)
        .page(200.0, 200.0)
        .dangling_contents()
        .page(300.0, 300.0)
        .build();
    let conversion = convert(&bytes, ConvertOptions::default()).unwrap();
    assert_eq!(conversion.skipped().len(), 1);

    let output = SourceDocument::load_mem(&conversion.bytes).unwrap();
    let sizes: Vec<f32> = output
        .pages()
        .iter()
        .filter_map(|p| p.media_box.map(|m| m.width()))
        .collect();
    assert_eq!(sizes, vec![100.0, 300.0]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: every page comes out in order with its own media box
    #[test]
    fn page_count_and_sizes_preserved(
        sizes in proptest::collection::vec((1u16..1000, 1u16..1000), 1..6)
    ) {
        let fixture = sizes
            .iter()
            .fold(PdfFixture::new(), |f, &(w, h)| f.page(w as f32, h as f32));
        let bytes = fixture.build();
        let input = SourceDocument::load_mem(&bytes).unwrap();
        let output = SourceDocument::load_mem(&convert_with(&bytes, ConvertOptions::default())).unwrap();

        prop_assert_eq!(output.page_count(), input.page_count());
        for (a, b) in input.pages().iter().zip(output.pages().iter()) {
            prop_assert_eq!(a.media_box, b.media_box);
        }
    }

    /// Property: the color inventory is stable across calls
    #[test]
    fn distinct_colors_deterministic(
        colors in proptest::collection::vec(proptest::array::uniform3(0u8..=4), 0..8)
    ) {
        let fixture = colors.iter().fold(PdfFixture::new().page(50.0, 50.0), |f, c| {
            let rgb: Vec<f32> = c.iter().map(|&v| v as f32 / 4.0).collect();
            f.annotation(FixtureAnnotation::ink([0.0, 0.0, 5.0, 5.0], &rgb))
        });
        let source = SourceDocument::load_mem(&fixture.build()).unwrap();
        let first = distinct_colors(&source);
        prop_assert_eq!(&first, &distinct_colors(&source));

        let mut unique = colors.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(first.len(), unique.len());
    }
}
