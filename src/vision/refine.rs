//! Iterative bounding-box refinement
//!
//! OCR returns a box for a whole text line ("手机号:13812345678 可联系"), but
//! only the number needs to be covered. The refiner slices the line box by
//! character position, re-runs OCR on the slice and nudges its horizontal
//! edges until the slice reads as exactly the number, or the iteration limit
//! runs out.

use image::RgbImage;
use tracing::debug;

use super::geometry::{self, Rect};
use super::phone::{self, NumberMatch};
use super::{most_confident, Detection, TextDetector};
use crate::error::Result;

/// Edge step when the slice holds extra characters
const SHRINK_RATIO: f32 = 0.10;
/// Edge step when the slice cuts the number off
const EXPAND_RATIO: f32 = 0.15;
/// Distinct digits the read must share with the number to be accepted as it
const FUZZY_MIN_DIGITS: usize = 8;

/// Refinement settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinerOptions {
    /// Upper bound on OCR verification rounds
    pub max_iterations: usize,
    /// Padding added around the initial character slice
    pub padding_ratio: f32,
}

impl Default for RefinerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            padding_ratio: 0.05,
        }
    }
}

/// How the current slice should change, judged from what OCR read in it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// Slice reads as the number
    Perfect,
    /// Leading part of the number is cut off
    ExpandLeft,
    /// Trailing part of the number is cut off
    ExpandRight,
    /// Extra characters before the number
    ShrinkLeft,
    /// Extra characters after the number
    ShrinkRight,
    /// Read has no usable relation to the number
    Unknown,
}

impl Adjustment {
    /// `(left_ratio, right_ratio)` for [`geometry::shift_edges`]
    fn edge_shift(self) -> Option<(f32, f32)> {
        match self {
            Adjustment::ExpandLeft => Some((EXPAND_RATIO, 0.0)),
            Adjustment::ExpandRight => Some((0.0, EXPAND_RATIO)),
            Adjustment::ShrinkLeft => Some((-SHRINK_RATIO, 0.0)),
            Adjustment::ShrinkRight => Some((0.0, -SHRINK_RATIO)),
            Adjustment::Perfect | Adjustment::Unknown => None,
        }
    }
}

/// Decide how to move the slice edges given the OCR read of the slice.
///
/// Both inputs are normalized first, so `"138 1234 5678"` reads as perfect.
pub fn classify(target: &str, recognized: &str) -> Adjustment {
    let target = phone::normalize(target);
    let recognized = phone::normalize(recognized);

    if recognized == target {
        return Adjustment::Perfect;
    }

    if let Some(pos) = recognized.find(&target) {
        if pos > 0 {
            return Adjustment::ShrinkLeft;
        }
        if pos + target.len() < recognized.len() {
            return Adjustment::ShrinkRight;
        }
        return Adjustment::Perfect;
    }

    if !recognized.is_empty() && recognized.len() < target.len() {
        if target.starts_with(&recognized) {
            return Adjustment::ExpandRight;
        }
        if target.ends_with(&recognized) {
            return Adjustment::ExpandLeft;
        }
    }

    if shared_digits(&target, &recognized) >= FUZZY_MIN_DIGITS {
        return Adjustment::Perfect;
    }

    Adjustment::Unknown
}

/// Count of distinct digit values present in both strings
fn shared_digits(target: &str, recognized: &str) -> usize {
    fn digit_set(text: &str) -> u16 {
        text.chars()
            .filter_map(|c| c.to_digit(10))
            .fold(0, |set, d| set | (1 << d))
    }
    (digit_set(target) & digit_set(recognized)).count_ones() as usize
}

/// Why refinement stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineExit {
    /// Slice verified as the number
    Perfect,
    /// OCR read could not be related to the number
    Unknown,
    /// OCR found no text in the slice
    NoText,
    /// Slice clamped to nothing; previous slice kept
    EmptyCrop,
    /// Iteration limit reached; best effort
    Exhausted,
}

/// Result of refining one number
#[derive(Debug, Clone, PartialEq)]
pub struct RefinedBox {
    pub rect: Rect,
    /// Last OCR read of the slice, or the number itself if OCR never read it
    pub text: String,
    /// OCR verification rounds performed
    pub iterations: usize,
    pub exit: RefineExit,
}

/// Narrows a line-level OCR box down to the number it contains
#[derive(Debug, Clone, Default)]
pub struct BoxRefiner {
    options: RefinerOptions,
}

impl BoxRefiner {
    pub fn new(options: RefinerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RefinerOptions {
        &self.options
    }

    /// Refine `detection`'s box onto `target`.
    ///
    /// `target` must come from [`phone::find_all`] on `detection.text`.
    /// Returns `Ok(None)` only when the number cannot be found in the text at
    /// all; OCR failures propagate.
    pub fn refine<D>(
        &self,
        detector: &mut D,
        image: &RgbImage,
        detection: &Detection,
        target: &NumberMatch,
    ) -> Result<Option<RefinedBox>>
    where
        D: TextDetector + ?Sized,
    {
        let normalized = phone::normalize(&detection.text);
        let Some((start, end)) = locate(&normalized, target) else {
            debug!("Number {} not found in '{}'", target.value, detection.text);
            return Ok(None);
        };

        let (width, height) = image.dimensions();
        let mut current = geometry::sub_rect_by_char_range(
            &detection.quad,
            &normalized,
            start,
            end,
            self.options.padding_ratio,
        )
        .clamp(width, height);
        let mut last_text = target.value.clone();

        for iteration in 1..=self.options.max_iterations {
            let crop = geometry::crop(image, &current);
            if crop.width() == 0 || crop.height() == 0 {
                let exit = RefineExit::EmptyCrop;
                return Ok(Some(self.finish(current, last_text, iteration - 1, exit)));
            }

            let detections = detector.detect(&crop)?;
            let Some(best) = most_confident(&detections) else {
                debug!("Iteration {}: no text in slice", iteration);
                return Ok(Some(self.finish(current, last_text, iteration, RefineExit::NoText)));
            };
            last_text = best.text.clone();

            let adjustment = classify(&target.value, &last_text);
            debug!(
                "Iteration {}: read '{}' ({:.3}) -> {:?}",
                iteration, last_text, best.confidence, adjustment
            );

            let Some((left, right)) = adjustment.edge_shift() else {
                let exit = match adjustment {
                    Adjustment::Perfect => RefineExit::Perfect,
                    _ => RefineExit::Unknown,
                };
                return Ok(Some(self.finish(current, last_text, iteration, exit)));
            };

            let next = geometry::shift_edges(&current, left, right).clamp(width, height);
            if next.pixel_bounds(width, height).is_none() {
                return Ok(Some(self.finish(current, last_text, iteration, RefineExit::EmptyCrop)));
            }
            current = next;
        }

        Ok(Some(self.finish(
            current,
            last_text,
            self.options.max_iterations,
            RefineExit::Exhausted,
        )))
    }

    fn finish(&self, rect: Rect, text: String, iterations: usize, exit: RefineExit) -> RefinedBox {
        RefinedBox {
            rect,
            text,
            iterations,
            exit,
        }
    }
}

/// Character span of `target` in normalized text, preferring its recorded span
fn locate(normalized: &str, target: &NumberMatch) -> Option<(usize, usize)> {
    let at_span: String = normalized
        .chars()
        .skip(target.start)
        .take(target.end.saturating_sub(target.start))
        .collect();
    if at_span == target.value {
        return Some((target.start, target.end));
    }

    let byte_pos = normalized.find(&target.value)?;
    let start = normalized[..byte_pos].chars().count();
    Some((start, start + target.value.chars().count()))
}
