//! Image-sequence video backend: a directory of frames sorted by file name

use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{FrameSink, FrameSource, VideoBackend, VideoInfo};
use crate::error::{RedactError, Result};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone)]
pub struct ImageSequenceBackend {
    fps: f64,
}

impl ImageSequenceBackend {
    pub fn new(fps: f64) -> Self {
        Self { fps }
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Name of the `index`th output frame
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{:06}.png", index)
}

impl VideoBackend for ImageSequenceBackend {
    fn open(&self, path: &Path) -> Result<(Box<dyn FrameSource>, VideoInfo)> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(RedactError::Config(format!("invalid sequence frame rate {}", self.fps)));
        }

        let entries = std::fs::read_dir(path).map_err(|e| RedactError::input(path, e))?;
        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_frame_file(p))
            .collect();
        frames.sort();

        let first = frames
            .first()
            .ok_or_else(|| RedactError::input(path, "no image frames in directory"))?;
        let (width, height) =
            image::image_dimensions(first).map_err(|e| RedactError::input(first, e))?;

        debug!("Opened sequence {} ({} frames)", path.display(), frames.len());
        let info = VideoInfo {
            fps: self.fps,
            width,
            height,
            frame_count: Some(frames.len()),
        };
        Ok((Box::new(SequenceSource { frames, next: 0 }), info))
    }

    fn create_sink(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>> {
        std::fs::create_dir_all(path).map_err(|e| RedactError::encoding(path, e))?;
        Ok(Box::new(SequenceSink {
            dir: path.to_path_buf(),
            width: info.width,
            height: info.height,
            written: Vec::new(),
        }))
    }
}

struct SequenceSource {
    frames: Vec<PathBuf>,
    next: usize,
}

impl FrameSource for SequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let frame = image::open(path).map_err(|e| RedactError::input(path, e))?;
        Ok(Some(frame.to_rgb8()))
    }

    fn skip_frames(&mut self, count: usize) -> Result<usize> {
        let skipped = count.min(self.frames.len() - self.next);
        self.next += skipped;
        Ok(skipped)
    }
}

struct SequenceSink {
    dir: PathBuf,
    width: u32,
    height: u32,
    written: Vec<PathBuf>,
}

impl FrameSink for SequenceSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(RedactError::encoding(&self.dir, "frame size changed mid-sequence"));
        }
        let path = self.dir.join(frame_file_name(self.written.len()));
        frame
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| RedactError::encoding(&path, e))?;
        self.written.push(path);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        debug!("Wrote {} frames to {}", self.written.len(), self.dir.display());
        Ok(())
    }

    fn abort(self: Box<Self>) {
        for path in &self.written {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}
