//! Geometric properties of canvas normalization across input shapes

use backdrop_studio::{normalize, CanvasNormalizer, SourceImage, StudioError};
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};

const PRODUCT: [u8; 3] = [30, 90, 160];
const FILL: [u8; 3] = [255, 255, 255];

fn product_photo(width: u32, height: u32) -> SourceImage {
    let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb(PRODUCT));
    SourceImage::new(&DynamicImage::ImageRgb8(img)).unwrap()
}

fn close(actual: &Rgb<u8>, expected: [u8; 3], tolerance: u8) -> bool {
    actual
        .0
        .iter()
        .zip(expected.iter())
        .all(|(a, e)| a.abs_diff(*e) <= tolerance)
}

/// Bounding box `(x, y, w, h)` of the pixels that differ from the fill colour
fn painted_bounds(canvas: &RgbImage, fill: [u8; 3]) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in canvas.enumerate_pixels() {
        if close(pixel, fill, 8) {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds.map(|(x0, y0, x1, y1)| (x0, y0, x1 - x0 + 1, y1 - y0 + 1))
}

#[test]
fn test_output_is_always_the_target_square() {
    for (w, h) in [(1, 1), (500, 250), (250, 500), (1024, 1024), (3000, 2000), (7, 1300)] {
        let canvas = normalize(&product_photo(w, h), 1024, FILL).unwrap();
        assert_eq!(canvas.dimensions(), (1024, 1024), "{}x{}", w, h);
    }
}

#[test]
fn test_landscape_scenario() {
    let canvas = normalize(&product_photo(500, 250), 1024, FILL).unwrap();

    assert_eq!(canvas.content_region(), (0, 256, 1024, 512));
    assert_eq!(painted_bounds(canvas.pixels(), FILL), Some((0, 256, 1024, 512)));
    assert!(close(canvas.pixels().get_pixel(512, 100), FILL, 1));
    assert!(close(canvas.pixels().get_pixel(512, 900), FILL, 1));
    assert!(close(canvas.pixels().get_pixel(512, 512), PRODUCT, 1));
}

#[test]
fn test_aspect_ratio_is_preserved() {
    for (w, h) in [(640, 480), (480, 640), (1920, 1080), (300, 1200), (2048, 512)] {
        let canvas = normalize(&product_photo(w, h), 1024, FILL).unwrap();
        let painted = painted_bounds(canvas.pixels(), FILL).unwrap();
        assert_eq!(painted, canvas.content_region(), "{}x{}", w, h);
        let (_, _, cw, ch) = painted;

        let source_ratio = f64::from(w) / f64::from(h);
        let content_ratio = f64::from(cw) / f64::from(ch);
        // Rounding each edge to whole pixels costs at most one pixel per side
        let tolerance = source_ratio * (1.0 / f64::from(ch.min(cw)) * 2.0);
        assert!(
            (source_ratio - content_ratio).abs() <= tolerance,
            "{}x{}: {} vs {}",
            w,
            h,
            source_ratio,
            content_ratio
        );
        // Longest side spans the whole canvas
        assert_eq!(cw.max(ch), 1024);
    }
}

#[test]
fn test_content_is_centered() {
    for (w, h) in [(640, 480), (480, 640), (100, 37)] {
        let canvas = normalize(&product_photo(w, h), 512, FILL).unwrap();
        let (x, y, cw, ch) = painted_bounds(canvas.pixels(), FILL).unwrap();
        assert_eq!((x, y, cw, ch), canvas.content_region(), "{}x{}", w, h);
        let before_x = x;
        let after_x = 512 - (x + cw);
        let before_y = y;
        let after_y = 512 - (y + ch);
        // An odd padding split puts the extra pixel after the content
        assert!(before_x.abs_diff(after_x) <= 1, "{}x{} horizontal", w, h);
        assert!(before_y.abs_diff(after_y) <= 1, "{}x{} vertical", w, h);
    }
}

#[test]
fn test_padding_uses_fill_color() {
    let fill = [12, 200, 40];
    let canvas = normalize(&product_photo(200, 100), 256, fill).unwrap();
    for (x, y) in [(0, 0), (255, 0), (0, 255), (255, 255)] {
        assert!(close(canvas.pixels().get_pixel(x, y), fill, 1), "corner ({}, {})", x, y);
    }
}

#[test]
fn test_source_is_not_modified() {
    let source = product_photo(320, 200);
    let before = source.pixels().clone();
    let _ = normalize(&source, 128, FILL).unwrap();
    assert_eq!(source.pixels(), &before);
}

#[test]
fn test_small_source_is_upscaled() {
    let canvas = CanvasNormalizer::new(64, FILL)
        .normalize(&product_photo(8, 4))
        .unwrap();
    assert_eq!(canvas.content_region(), (0, 16, 64, 32));
}

#[test]
fn test_invalid_inputs() {
    let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 10));
    assert!(matches!(
        SourceImage::new(&empty).unwrap_err(),
        StudioError::InvalidImage(_)
    ));

    assert!(matches!(
        normalize(&product_photo(10, 10), 0, FILL).unwrap_err(),
        StudioError::InvalidConfig(_)
    ));
    assert!(matches!(
        normalize(&product_photo(10, 10), 8192, FILL).unwrap_err(),
        StudioError::InvalidConfig(_)
    ));

    assert!(matches!(
        SourceImage::from_bytes(&[]).unwrap_err(),
        StudioError::InvalidImage(_)
    ));
    assert!(matches!(
        SourceImage::from_bytes(b"definitely not an image").unwrap_err(),
        StudioError::InvalidImage(_)
    ));
}
