//! Vision Layer
//!
//! Text detection on decoded frames and everything derived from it:
//! - number matching on recognized text
//! - box geometry for OCR quads
//! - iterative refinement of a coarse text box onto the number itself
//!
//! OCR itself is an external collaborator behind [`TextDetector`].

pub mod geometry;
pub mod ocr;
pub mod phone;
pub mod refine;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use geometry::{Point, Quad, Rect};
pub use ocr::{SidecarOcr, SidecarOcrFactory};
pub use phone::NumberMatch;
pub use refine::{Adjustment, BoxRefiner, RefineExit, RefinedBox, RefinerOptions};

/// One text region reported by OCR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Corner points of the region
    #[serde(rename = "box")]
    pub quad: Quad,
    /// Recognized text content
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl Detection {
    pub fn new(quad: Quad, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            quad,
            text: text.into(),
            confidence,
        }
    }

    /// Axis-aligned bounds of the region
    pub fn bounds(&self) -> Rect {
        geometry::bounding_rect(&self.quad)
    }
}

/// OCR collaborator: returns recognized text regions for an image.
///
/// Results carry no ordering guarantee; confidence is the only tie-break.
/// Calls block until OCR finishes and cannot be cancelled.
pub trait TextDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;
}

impl<T: TextDetector + ?Sized> TextDetector for Box<T> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        (**self).detect(image)
    }
}

/// Builds one detector per worker; `use_gpu` only selects the OCR device
pub trait DetectorFactory: Send + Sync {
    fn create(&self, use_gpu: bool) -> Result<Box<dyn TextDetector + Send>>;
}

/// Highest-confidence detection, if any
pub fn most_confident(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f32) -> Quad {
        [
            Point::new(0.0, 0.0),
            Point::new(size, 0.0),
            Point::new(size, size),
            Point::new(0.0, size),
        ]
    }

    #[test]
    fn test_most_confident_picks_highest() {
        let dets = vec![
            Detection::new(square(1.0), "a", 0.4),
            Detection::new(square(1.0), "b", 0.9),
            Detection::new(square(1.0), "c", 0.7),
        ];
        assert_eq!(most_confident(&dets).unwrap().text, "b");
        assert!(most_confident(&[]).is_none());
    }

    #[test]
    fn test_detection_json_roundtrip() {
        let det = Detection::new(square(4.0), "13812345678", 0.93);
        let json = serde_json::to_string(&det).unwrap();
        let roundtrip: Detection = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip, det);
        assert!(serde_json::to_string(&det).unwrap().contains("\"box\""));
        assert_eq!(det.bounds(), Rect::new(0.0, 0.0, 4.0, 4.0));
    }
}
