//! Redaction transforms
//!
//! Obscures a rectangular region of a frame with one of three methods.
//! Regions are clamped to the frame first; a region that clamps to nothing
//! leaves the frame untouched.

use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::filter::separable_filter_equal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::vision::geometry::{PixelBounds, Rect};

/// Side of the mosaic grid used by [`BlurMethod::Pixelate`]
pub const PIXELATE_GRID: u32 = 10;

/// Obscuring transform
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BlurMethod {
    /// Gaussian blur with a square kernel of `strength` pixels
    #[default]
    Gaussian,
    /// Blocky 10x10 mosaic
    Pixelate,
    /// Solid black fill
    Black,
}

impl fmt::Display for BlurMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlurMethod::Gaussian => "gaussian",
            BlurMethod::Pixelate => "pixelate",
            BlurMethod::Black => "black",
        };
        f.write_str(name)
    }
}

/// Method plus kernel size; the kernel size is always odd
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionParams {
    pub method: BlurMethod,
    pub strength: u32,
}

impl RedactionParams {
    /// Even strengths are bumped to the next odd value (0 becomes 1)
    pub fn new(method: BlurMethod, strength: u32) -> Self {
        Self {
            method,
            strength: odd_kernel(strength),
        }
    }
}

impl Default for RedactionParams {
    fn default() -> Self {
        Self::new(BlurMethod::Gaussian, 51)
    }
}

fn odd_kernel(strength: u32) -> u32 {
    if strength % 2 == 0 {
        strength + 1
    } else {
        strength
    }
}

/// Sigma OpenCV derives for a Gaussian kernel of `ksize` taps
fn sigma_for_kernel(ksize: u32) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Normalized 1-D Gaussian weights, exactly `ksize` taps long
fn gaussian_kernel(ksize: u32) -> Vec<f32> {
    let sigma = sigma_for_kernel(ksize);
    let center = (ksize / 2) as f32;
    let weights: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Return a copy of `image` with `rect` obscured
pub fn apply_redaction(image: &RgbImage, rect: &Rect, params: &RedactionParams) -> RgbImage {
    let mut output = image.clone();
    redact_in_place(&mut output, rect, params);
    output
}

/// Obscure `rect` directly in `image`. Returns whether any pixel was touched.
pub fn redact_in_place(image: &mut RgbImage, rect: &Rect, params: &RedactionParams) -> bool {
    let Some(bounds) = rect.pixel_bounds(image.width(), image.height()) else {
        return false;
    };

    match params.method {
        BlurMethod::Gaussian => {
            let region = region_of(image, bounds);
            let kernel = gaussian_kernel(odd_kernel(params.strength));
            let blurred = separable_filter_equal(&region, &kernel);
            paste(image, &blurred, bounds);
        }
        BlurMethod::Pixelate => {
            let region = region_of(image, bounds);
            let small =
                imageops::resize(&region, PIXELATE_GRID, PIXELATE_GRID, FilterType::Triangle);
            let mosaic = imageops::resize(&small, bounds.width, bounds.height, FilterType::Nearest);
            paste(image, &mosaic, bounds);
        }
        BlurMethod::Black => {
            let area = imageproc::rect::Rect::at(bounds.x as i32, bounds.y as i32)
                .of_size(bounds.width, bounds.height);
            draw_filled_rect_mut(image, area, Rgb([0, 0, 0]));
        }
    }
    true
}

fn region_of(image: &RgbImage, bounds: PixelBounds) -> RgbImage {
    imageops::crop_imm(image, bounds.x, bounds.y, bounds.width, bounds.height).to_image()
}

fn paste(image: &mut RgbImage, region: &RgbImage, bounds: PixelBounds) {
    imageops::replace(image, region, bounds.x as i64, bounds.y as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Every pixel gets a distinct color
    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) * 3 % 256) as u8])
        })
    }

    #[test]
    fn test_strength_forced_odd() {
        assert_eq!(RedactionParams::new(BlurMethod::Gaussian, 50).strength, 51);
        assert_eq!(RedactionParams::new(BlurMethod::Gaussian, 51).strength, 51);
        assert_eq!(RedactionParams::new(BlurMethod::Gaussian, 0).strength, 1);
    }

    #[test]
    fn test_black_fills_region_only() {
        let img = gradient(60, 40);
        let rect = Rect::new(10.0, 5.0, 30.0, 25.0);
        let out = apply_redaction(&img, &rect, &RedactionParams::new(BlurMethod::Black, 3));

        for y in 5..25 {
            for x in 10..30 {
                assert_eq!(out.get_pixel(x, y), &Rgb([0, 0, 0]));
            }
        }
        assert_eq!(out.get_pixel(35, 30), img.get_pixel(35, 30));
        assert_eq!(out.get_pixel(9, 5), img.get_pixel(9, 5));
    }

    #[test]
    fn test_pixelate_has_at_most_grid_blocks() {
        let img = gradient(120, 80);
        let rect = Rect::new(0.0, 0.0, 100.0, 60.0);
        let out = apply_redaction(&img, &rect, &RedactionParams::new(BlurMethod::Pixelate, 1));

        let mut colors = HashSet::new();
        for y in 0..60 {
            for x in 0..100 {
                colors.insert(out.get_pixel(x, y).0);
            }
        }
        assert!(colors.len() <= (PIXELATE_GRID * PIXELATE_GRID) as usize);
        assert!(colors.len() > 1);
        assert_eq!(out.get_pixel(110, 70), img.get_pixel(110, 70));
    }

    #[test]
    fn test_gaussian_smooths_region() {
        let mut img = RgbImage::new(50, 50);
        img.put_pixel(25, 25, Rgb([255, 255, 255]));
        let rect = Rect::new(10.0, 10.0, 40.0, 40.0);
        let out = apply_redaction(&img, &rect, &RedactionParams::new(BlurMethod::Gaussian, 9));

        assert!(out.get_pixel(25, 25).0[0] < 255);
        assert!(out.get_pixel(26, 25).0[0] > 0);
        assert_eq!(out.get_pixel(5, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_gaussian_kernel_has_strength_taps() {
        for strength in [1, 5, 51] {
            let kernel = gaussian_kernel(strength);
            assert_eq!(kernel.len(), strength as usize);
            assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-4);
            assert_eq!(kernel[0], kernel[strength as usize - 1]);
        }
        assert_eq!(gaussian_kernel(1), vec![1.0]);

        // a 5-tap blur spreads a dot exactly two pixels each way
        let mut img = RgbImage::new(50, 50);
        img.put_pixel(25, 25, Rgb([255, 255, 255]));
        let rect = Rect::new(10.0, 10.0, 40.0, 40.0);
        let out = apply_redaction(&img, &rect, &RedactionParams::new(BlurMethod::Gaussian, 5));
        assert!(out.get_pixel(27, 25).0[0] > 0);
        assert_eq!(out.get_pixel(28, 25).0[0], 0);
        assert_eq!(out.get_pixel(22, 25).0[0], 0);
    }

    #[test]
    fn test_degenerate_region_is_noop() {
        let img = gradient(20, 20);
        let params = RedactionParams::new(BlurMethod::Black, 1);

        let out = apply_redaction(&img, &Rect::new(30.0, 30.0, 40.0, 40.0), &params);
        assert_eq!(out, img);

        let mut copy = img.clone();
        assert!(!redact_in_place(&mut copy, &Rect::new(5.0, 5.0, 5.0, 15.0), &params));
        assert_eq!(copy, img);
    }

    #[test]
    fn test_region_clamped_to_frame() {
        let img = gradient(20, 20);
        let out = apply_redaction(
            &img,
            &Rect::new(-10.0, -10.0, 5.0, 5.0),
            &RedactionParams::new(BlurMethod::Black, 1),
        );
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(4, 4), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(5, 5), img.get_pixel(5, 5));
    }
}
