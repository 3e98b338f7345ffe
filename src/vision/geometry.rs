//! Box geometry for OCR regions
//!
//! Rectangle derivation from OCR quads, proportional slicing by character
//! range, cropping and horizontal edge adjustment. Nothing here fails: a
//! degenerate rectangle simply clamps to an empty one and callers decide what
//! an empty region means for them.

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

/// A point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Four ordered corners of a text region as returned by OCR
pub type Quad = [Point; 4];

/// Axis-aligned rectangle in (sub)pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

/// Integer pixel bounds (x, y, width, height), always non-empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// A rectangle without positive area is a no-op everywhere
    pub fn is_empty(&self) -> bool {
        !(self.x_min < self.x_max && self.y_min < self.y_max)
    }

    /// Clamp to `[0, width] x [0, height]`
    pub fn clamp(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            x_min: self.x_min.clamp(0.0, w),
            y_min: self.y_min.clamp(0.0, h),
            x_max: self.x_max.clamp(0.0, w),
            y_max: self.y_max.clamp(0.0, h),
        }
    }

    /// Integer pixel bounds inside an image of the given size.
    ///
    /// Edges round outward so a redaction never leaves a partial pixel column
    /// uncovered. Returns `None` when the clamped rectangle is degenerate.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<PixelBounds> {
        let clamped = self.clamp(width, height);
        let x0 = clamped.x_min.floor() as u32;
        let y0 = clamped.y_min.floor() as u32;
        let x1 = (clamped.x_max.ceil() as u32).min(width);
        let y1 = (clamped.y_max.ceil() as u32).min(height);

        if x0 >= x1 || y0 >= y1 {
            return None;
        }

        Some(PixelBounds {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// Bounding rectangle of a quad (min/max over its corners)
pub fn bounding_rect(quad: &Quad) -> Rect {
    let x_min = quad.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let y_min = quad.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let x_max = quad.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let y_max = quad.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);

    Rect::new(x_min, y_min, x_max, y_max)
}

/// Slice the part of a text box covering characters `[start, end)` of `text`.
///
/// Characters are assumed to be spread evenly over the box width. The slice is
/// then padded by `padding_ratio` of its own width on both sides; vertical
/// edges are those of the full box.
pub fn sub_rect_by_char_range(
    quad: &Quad,
    text: &str,
    start: usize,
    end: usize,
    padding_ratio: f32,
) -> Rect {
    let full = bounding_rect(quad);
    let len = text.chars().count();
    if len == 0 {
        return full;
    }

    let start = start.min(len) as f32 / len as f32;
    let end = end.min(len) as f32 / len as f32;

    let left = full.x_min + full.width() * start;
    let right = full.x_min + full.width() * end;
    let padding = (right - left) * padding_ratio;

    Rect::new(left - padding, full.y_min, right + padding, full.y_max)
}

/// Crop `rect` out of `image`, clamped to the image bounds.
///
/// A degenerate clamped rectangle yields a 0x0 image.
pub fn crop(image: &RgbImage, rect: &Rect) -> RgbImage {
    match rect.pixel_bounds(image.width(), image.height()) {
        Some(b) => imageops::crop_imm(image, b.x, b.y, b.width, b.height).to_image(),
        None => RgbImage::new(0, 0),
    }
}

/// Move the left edge outward by `left_ratio * width` and the right edge
/// outward by `right_ratio * width`. Negative ratios pull that edge inward.
pub fn shift_edges(rect: &Rect, left_ratio: f32, right_ratio: f32) -> Rect {
    let width = rect.width();
    Rect::new(
        rect.x_min - left_ratio * width,
        rect.y_min,
        rect.x_max + right_ratio * width,
        rect.y_max,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn quad(x0: f32, y0: f32, x1: f32, y1: f32) -> Quad {
        [
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    #[test]
    fn test_bounding_rect_of_skewed_quad() {
        let q = [
            Point::new(10.0, 22.0),
            Point::new(110.0, 20.0),
            Point::new(112.0, 40.0),
            Point::new(8.0, 42.0),
        ];
        assert_eq!(bounding_rect(&q), Rect::new(8.0, 20.0, 112.0, 42.0));
    }

    #[test]
    fn test_sub_rect_interpolates_by_character() {
        // 20 chars over 200px: chars 5..15 sit at 50..150
        let q = quad(0.0, 10.0, 200.0, 30.0);
        let text = "a".repeat(20);
        let r = sub_rect_by_char_range(&q, &text, 5, 15, 0.0);
        assert!((r.x_min - 50.0).abs() < 1e-4);
        assert!((r.x_max - 150.0).abs() < 1e-4);
        assert_eq!(r.y_min, 10.0);
        assert_eq!(r.y_max, 30.0);
    }

    #[test]
    fn test_sub_rect_padding_uses_slice_width() {
        let q = quad(0.0, 0.0, 200.0, 20.0);
        let text = "a".repeat(20);
        let r = sub_rect_by_char_range(&q, &text, 5, 15, 0.05);
        assert!((r.x_min - 45.0).abs() < 1e-4);
        assert!((r.x_max - 155.0).abs() < 1e-4);
    }

    #[test]
    fn test_sub_rect_counts_characters_not_bytes() {
        let q = quad(0.0, 0.0, 160.0, 20.0);
        // 4 CJK chars + 12 ascii = 16 chars, 10px each
        let text = "手机号：138123456789";
        let r = sub_rect_by_char_range(&q, text, 4, 15, 0.0);
        assert!((r.x_min - 40.0).abs() < 1e-4);
        assert!((r.x_max - 150.0).abs() < 1e-4);
    }

    #[test]
    fn test_shift_edges_signs() {
        let r = Rect::new(100.0, 0.0, 200.0, 10.0);
        let expanded = shift_edges(&r, 0.15, 0.0);
        assert!((expanded.x_min - 85.0).abs() < 1e-4);
        assert_eq!(expanded.x_max, 200.0);

        let shrunk = shift_edges(&r, 0.0, -0.1);
        assert_eq!(shrunk.x_min, 100.0);
        assert!((shrunk.x_max - 190.0).abs() < 1e-4);
    }

    #[test]
    fn test_pixel_bounds_clamps_and_rounds_outward() {
        let r = Rect::new(-5.0, 2.4, 10.2, 50.0);
        let b = r.pixel_bounds(8, 20).unwrap();
        assert_eq!(b, PixelBounds { x: 0, y: 2, width: 8, height: 18 });
    }

    #[test]
    fn test_pixel_bounds_degenerate() {
        assert!(Rect::new(5.0, 5.0, 5.0, 10.0).pixel_bounds(20, 20).is_none());
        assert!(Rect::new(30.0, 0.0, 40.0, 10.0).pixel_bounds(20, 20).is_none());
        assert!(Rect::new(10.0, 0.0, 5.0, 10.0).is_empty());
    }

    #[test]
    fn test_crop_region() {
        let mut img = RgbImage::new(20, 10);
        img.put_pixel(6, 3, Rgb([255, 0, 0]));
        let cropped = crop(&img, &Rect::new(5.0, 2.0, 9.0, 6.0));
        assert_eq!(cropped.dimensions(), (4, 4));
        assert_eq!(cropped.get_pixel(1, 1), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_crop_outside_image_is_empty() {
        let img = RgbImage::new(20, 10);
        let cropped = crop(&img, &Rect::new(25.0, 0.0, 30.0, 5.0));
        assert_eq!(cropped.dimensions(), (0, 0));
    }
}
