//! Temporal Sampling Pipeline
//!
//! Two passes over a video:
//! 1. **Detect**: OCR runs on every `stride`-th frame only. Each number found
//!    becomes a [`PhoneRegion`] valid `buffer` frames either side of the
//!    sample.
//! 2. **Apply**: every frame is decoded again, redacted with the regions
//!    covering it, and written out in order.
//!
//! Consecutive samples leave no uncovered frames as long as
//! `2 * buffer >= stride`, which the default `buffer_time = sample_interval`
//! satisfies.

pub mod progress;
pub mod timeline;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{RedactError, Result};
use crate::redaction::{self, RedactionParams};
use crate::video::{FrameSink, FrameSource, VideoBackend, VideoInfo};
use crate::vision::{phone, BoxRefiner, Detection, NumberMatch, RefinerOptions, TextDetector};

pub use progress::{NoProgress, Phase, ProgressEvent, ProgressSink};
pub use timeline::{PhoneRegion, RegionTimeline};

/// Sampling and redaction options for one run
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerOptions {
    /// Seconds between OCR passes
    pub sample_interval: f64,
    /// Seconds of coverage before and after a sample; `sample_interval` when unset
    pub buffer_time: Option<f64>,
    pub redaction: RedactionParams,
    /// Precise location; `None` redacts whole OCR line boxes
    pub refinement: Option<RefinerOptions>,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            sample_interval: 1.0,
            buffer_time: None,
            redaction: RedactionParams::default(),
            refinement: None,
        }
    }
}

impl SamplerOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_interval.is_finite() && self.sample_interval > 0.0) {
            return Err(RedactError::Config(format!(
                "sample_interval must be positive, got {}",
                self.sample_interval
            )));
        }
        if let Some(buffer) = self.buffer_time {
            if !(buffer.is_finite() && buffer >= 0.0) {
                return Err(RedactError::Config(format!(
                    "buffer_time must not be negative, got {}",
                    buffer
                )));
            }
        }
        if self.refinement.is_some_and(|r| r.max_iterations == 0) {
            return Err(RedactError::Config("max_iterations must be positive".to_string()));
        }
        Ok(())
    }

    pub fn effective_buffer_time(&self) -> f64 {
        self.buffer_time.unwrap_or(self.sample_interval)
    }

    /// Frames between OCR passes, at least 1
    pub fn stride_frames(&self, fps: f64) -> usize {
        ((fps * self.sample_interval).round() as usize).max(1)
    }

    /// Half-width of a region's validity window in frames
    pub fn buffer_frames(&self, fps: f64) -> usize {
        (fps * self.effective_buffer_time()).round() as usize
    }
}

/// Counters reported after a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingStats {
    pub total_frames: usize,
    pub ocr_calls: usize,
    /// Output frames with at least one region applied
    pub frames_with_detections: usize,
    /// Region applications summed over all output frames
    pub total_detections: usize,
    /// Phone regions recorded during detection
    pub regions: usize,
    pub unique_numbers: BTreeSet<String>,
}

impl SamplingStats {
    /// Frames per OCR call
    pub fn accelerate_ratio(&self) -> f64 {
        if self.ocr_calls == 0 {
            return 0.0;
        }
        self.total_frames as f64 / self.ocr_calls as f64
    }

    /// OCR calls avoided compared with running on every frame
    pub fn saved_calls(&self) -> usize {
        self.total_frames.saturating_sub(self.ocr_calls)
    }
}

/// Result of the detection pass
#[derive(Debug, Clone)]
pub struct DetectOutcome {
    /// Frames actually decoded
    pub total_frames: usize,
    pub ocr_calls: usize,
    pub timeline: RegionTimeline,
    pub unique_numbers: BTreeSet<String>,
}

/// Result of the redaction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub frames_written: usize,
    pub frames_with_detections: usize,
    pub total_detections: usize,
}

/// Two-phase detect-then-redact driver
#[derive(Debug, Clone, Default)]
pub struct TemporalSampler {
    options: SamplerOptions,
}

impl TemporalSampler {
    pub fn new(options: SamplerOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &SamplerOptions {
        &self.options
    }

    /// Redact every phone number in `input`, writing the result to `output`.
    ///
    /// The input is decoded twice. The output sink is opened before detection
    /// starts and removed again if anything fails.
    pub fn process<D>(
        &self,
        detector: &mut D,
        backend: &dyn VideoBackend,
        input: &Path,
        output: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<SamplingStats>
    where
        D: TextDetector + ?Sized,
    {
        let (mut source, info) = backend.open(input)?;
        info!(
            "Processing {}: {}x{} @ {:.2} fps, {} frames",
            input.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
        );

        let mut sink = backend.create_sink(output, &info)?;
        let stats = match self.run_phases(
            detector,
            backend,
            input,
            source.as_mut(),
            &info,
            sink.as_mut(),
            progress,
        ) {
            Ok(stats) => stats,
            Err(e) => {
                sink.abort();
                return Err(e);
            }
        };
        sink.finish()?;

        info!(
            "Finished {}: {} frames, {} OCR calls ({:.1}x), {} frames redacted, {} unique numbers",
            input.display(),
            stats.total_frames,
            stats.ocr_calls,
            stats.accelerate_ratio(),
            stats.frames_with_detections,
            stats.unique_numbers.len()
        );
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phases<D>(
        &self,
        detector: &mut D,
        backend: &dyn VideoBackend,
        input: &Path,
        source: &mut dyn FrameSource,
        info: &VideoInfo,
        sink: &mut dyn FrameSink,
        progress: &mut dyn ProgressSink,
    ) -> Result<SamplingStats>
    where
        D: TextDetector + ?Sized,
    {
        let detected = self.detect_phase(detector, source, info, progress)?;
        if detected.total_frames == 0 {
            return Err(RedactError::input(input, "video has no frames"));
        }

        let mut timeline = detected.timeline;
        let (mut second_pass, _) = backend.open(input)?;
        let applied = self.apply_phase(
            second_pass.as_mut(),
            sink,
            &mut timeline,
            detected.total_frames,
            progress,
        )?;

        Ok(SamplingStats {
            total_frames: applied.frames_written,
            ocr_calls: detected.ocr_calls,
            frames_with_detections: applied.frames_with_detections,
            total_detections: applied.total_detections,
            regions: timeline.len(),
            unique_numbers: detected.unique_numbers,
        })
    }

    /// Phase 1: OCR every `stride`-th frame and build the region timeline
    pub fn detect_phase<D>(
        &self,
        detector: &mut D,
        source: &mut dyn FrameSource,
        info: &VideoInfo,
        progress: &mut dyn ProgressSink,
    ) -> Result<DetectOutcome>
    where
        D: TextDetector + ?Sized,
    {
        let stride = self.options.stride_frames(info.fps);
        let buffer = self.options.buffer_frames(info.fps);
        info!(
            "Sampling every {} frames ({:.2}s), buffer {} frames ({:.2}s)",
            stride,
            self.options.sample_interval,
            buffer,
            self.options.effective_buffer_time()
        );
        if buffer * 2 < stride {
            warn!(
                "buffer_time {:.2}s is under half of sample_interval {:.2}s; \
                 frames between samples may stay unredacted",
                self.options.effective_buffer_time(),
                self.options.sample_interval
            );
        }

        let refiner = self.options.refinement.map(BoxRefiner::new);
        let mut regions = Vec::new();
        let mut unique_numbers = BTreeSet::new();
        let mut ocr_calls = 0;
        let mut frame_index: usize = 0;

        while let Some(frame) = source.next_frame()? {
            let detections = detector.detect(&frame)?;
            ocr_calls += 1;

            let window = (frame_index.saturating_sub(buffer), frame_index + buffer);
            for detection in &detections {
                let matches = phone::find_all(&detection.text);
                if matches.is_empty() {
                    continue;
                }
                regions.extend(self.regions_for(
                    detector,
                    refiner.as_ref(),
                    &frame,
                    detection,
                    &matches,
                    window,
                )?);
                for m in matches {
                    debug!(
                        "Frame {}: number {} valid [{}, {}]",
                        frame_index, m.value, window.0, window.1
                    );
                    unique_numbers.insert(m.value);
                }
            }

            progress.report(ProgressEvent {
                phase: Phase::Detect,
                frame: frame_index + 1,
                total: info.frame_count,
            });

            let skipped = source.skip_frames(stride - 1)?;
            frame_index += 1 + skipped;
            if skipped < stride - 1 {
                break;
            }
        }

        let total_frames = frame_index;
        if info.frame_count.is_some_and(|n| n != total_frames) {
            debug!(
                "Container reported {:?} frames, decoded {}",
                info.frame_count, total_frames
            );
        }
        let timeline = RegionTimeline::new(regions, total_frames);
        info!(
            "Detection done: {} OCR calls over {} frames, {} regions, {} unique numbers",
            ocr_calls,
            total_frames,
            timeline.len(),
            unique_numbers.len()
        );

        Ok(DetectOutcome {
            total_frames,
            ocr_calls,
            timeline,
            unique_numbers,
        })
    }

    /// Regions for the numbers `matches` found in `detection`.
    ///
    /// Coarse mode yields the whole line box once; precise mode refines each
    /// number separately.
    fn regions_for<D>(
        &self,
        detector: &mut D,
        refiner: Option<&BoxRefiner>,
        frame: &RgbImage,
        detection: &Detection,
        matches: &[NumberMatch],
        (valid_from, valid_to): (usize, usize),
    ) -> Result<Vec<PhoneRegion>>
    where
        D: TextDetector + ?Sized,
    {
        let (width, height) = frame.dimensions();

        let Some(refiner) = refiner else {
            return Ok(vec![PhoneRegion {
                rect: detection.bounds().clamp(width, height),
                text: detection.text.clone(),
                confidence: detection.confidence,
                valid_from,
                valid_to,
            }]);
        };

        let mut regions = Vec::with_capacity(matches.len());
        for target in matches {
            let (rect, text) = match refiner.refine(detector, frame, detection, target)? {
                Some(refined) => {
                    debug!(
                        "Refined {} in {} rounds ({:?})",
                        target.value, refined.iterations, refined.exit
                    );
                    (refined.rect, refined.text)
                }
                None => (detection.bounds().clamp(width, height), target.value.clone()),
            };
            regions.push(PhoneRegion {
                rect,
                text,
                confidence: detection.confidence,
                valid_from,
                valid_to,
            });
        }
        Ok(regions)
    }

    /// Phase 2: redact and write every frame in order
    pub fn apply_phase(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        timeline: &mut RegionTimeline,
        total_frames: usize,
        progress: &mut dyn ProgressSink,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();

        while let Some(mut frame) = source.next_frame()? {
            let index = outcome.frames_written;
            let mut applied = 0;
            for region in timeline.advance(index) {
                redaction::redact_in_place(&mut frame, &region.rect, &self.options.redaction);
                applied += 1;
            }
            if applied > 0 {
                outcome.frames_with_detections += 1;
                outcome.total_detections += applied;
            }

            sink.write_frame(&frame)?;
            outcome.frames_written += 1;
            progress.report(ProgressEvent {
                phase: Phase::Apply,
                frame: outcome.frames_written,
                total: Some(total_frames),
            });
        }

        if outcome.frames_written != total_frames {
            warn!(
                "Redaction pass read {} frames, detection pass read {}",
                outcome.frames_written, total_frames
            );
        }
        info!(
            "Redaction done: {} frames written, {} with regions",
            outcome.frames_written, outcome.frames_with_detections
        );
        Ok(outcome)
    }
}
