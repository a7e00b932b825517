use super::Segmenter;
use crate::{error::Result, types::Canvas};
use async_trait::async_trait;
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::VecDeque;

/// Local segmenter for products shot on a plain backdrop
///
/// The backdrop color is estimated as the per-channel median of the border of
/// the photo. Every pixel reachable from that border through pixels within
/// `tolerance` (Euclidean RGB distance) of that color is treated as background.
/// Interior regions that match the backdrop color but are enclosed by the
/// subject stay opaque.
///
/// On a normalized canvas the padding around the photo is background by
/// construction, and the backdrop color is taken from the border of the
/// photo's content region rather than from the canvas edge.
#[derive(Debug, Clone)]
pub struct BackdropKeySegmenter {
    tolerance: f32,
}

impl Default for BackdropKeySegmenter {
    fn default() -> Self {
        Self {
            tolerance: Self::DEFAULT_TOLERANCE,
        }
    }
}

/// Half-open pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl Rect {
    fn full(width: u32, height: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
        }
    }

    /// `(x, y, width, height)` clamped to a `width`x`height` image
    fn clamped(region: (u32, u32, u32, u32), width: u32, height: u32) -> Self {
        let (x, y, w, h) = region;
        let x0 = x.min(width.saturating_sub(1));
        let y0 = y.min(height.saturating_sub(1));
        Self {
            x0,
            y0,
            x1: x.saturating_add(w).clamp(x0 + 1, width),
            y1: y.saturating_add(h).clamp(y0 + 1, height),
        }
    }

    fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

impl BackdropKeySegmenter {
    /// Euclidean RGB distance still counted as backdrop
    pub const DEFAULT_TOLERANCE: f32 = 24.0;

    #[must_use]
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
        }
    }

    #[must_use]
    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    fn distance(a: Rgb<u8>, b: Rgb<u8>) -> f32 {
        let dr = f32::from(a.0[0]) - f32::from(b.0[0]);
        let dg = f32::from(a.0[1]) - f32::from(b.0[1]);
        let db = f32::from(a.0[2]) - f32::from(b.0[2]);
        (dr * dr + dg * dg + db * db).sqrt()
    }

    /// Per-channel median of the pixels on the border of `rect`
    fn backdrop_color(image: &RgbImage, rect: Rect) -> Rgb<u8> {
        let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        let mut push = |p: &Rgb<u8>| {
            for (c, values) in channels.iter_mut().enumerate() {
                values.push(p.0[c]);
            }
        };
        for x in rect.x0..rect.x1 {
            push(image.get_pixel(x, rect.y0));
            push(image.get_pixel(x, rect.y1 - 1));
        }
        for y in (rect.y0 + 1)..rect.y1.saturating_sub(1) {
            push(image.get_pixel(rect.x0, y));
            push(image.get_pixel(rect.x1 - 1, y));
        }

        let mut median = [0u8; 3];
        for (c, values) in channels.iter_mut().enumerate() {
            values.sort_unstable();
            median[c] = values[values.len() / 2];
        }
        Rgb(median)
    }

    /// Flood fill from the image border; returns a row-major background flag per pixel
    ///
    /// Pixels outside `content` are padding and always background.
    fn background_flags(&self, image: &RgbImage, content: Rect) -> Vec<bool> {
        let (width, height) = image.dimensions();
        let w = width as usize;
        let backdrop = Self::backdrop_color(image, content);
        let matches = |x: u32, y: u32| {
            !content.contains(x, y)
                || Self::distance(*image.get_pixel(x, y), backdrop) <= self.tolerance
        };

        let mut background = vec![false; w * height as usize];
        let mut queue: VecDeque<(u32, u32)> = VecDeque::new();

        let seed = |x: u32, y: u32, flags: &mut Vec<bool>, queue: &mut VecDeque<(u32, u32)>| {
            let idx = y as usize * w + x as usize;
            // A subject touching the edge must not seed the fill
            if !flags[idx] && matches(x, y) {
                flags[idx] = true;
                queue.push_back((x, y));
            }
        };

        for x in 0..width {
            seed(x, 0, &mut background, &mut queue);
            seed(x, height - 1, &mut background, &mut queue);
        }
        for y in 0..height {
            seed(0, y, &mut background, &mut queue);
            seed(width - 1, y, &mut background, &mut queue);
        }

        while let Some((x, y)) = queue.pop_front() {
            let neighbors = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for (nx, ny) in neighbors {
                if nx >= width || ny >= height {
                    continue;
                }
                let idx = ny as usize * w + nx as usize;
                if !background[idx] && matches(nx, ny) {
                    background[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        background
    }

    fn key(&self, image: &RgbImage, content: Rect) -> RgbaImage {
        let (width, height) = image.dimensions();
        let background = self.background_flags(image, content);
        let mut output = RgbaImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels() {
            let idx = y as usize * width as usize + x as usize;
            let alpha = if background[idx] { 0 } else { 255 };
            output.put_pixel(x, y, Rgba([pixel.0[0], pixel.0[1], pixel.0[2], alpha]));
        }

        log::debug!(
            "Backdrop keying marked {} of {} pixels as background",
            background.iter().filter(|&&b| b).count(),
            background.len()
        );
        output
    }
}

#[async_trait]
impl Segmenter for BackdropKeySegmenter {
    fn name(&self) -> &str {
        "backdrop-key"
    }

    async fn segment(&self, image: &RgbImage) -> Result<RgbaImage> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(RgbaImage::new(width, height));
        }
        Ok(self.key(image, Rect::full(width, height)))
    }

    async fn segment_canvas(&self, canvas: &Canvas) -> Result<RgbaImage> {
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return Ok(RgbaImage::new(width, height));
        }
        let content = Rect::clamped(canvas.content_region(), width, height);
        Ok(self.key(canvas.pixels(), content))
    }
}
