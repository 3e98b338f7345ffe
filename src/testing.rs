//! Test doubles for the OCR and video collaborators

use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{RedactError, Result};
use crate::video::{FrameSink, FrameSource, VideoBackend, VideoInfo};
use crate::vision::{Detection, DetectorFactory, Point, TextDetector};

type Script = Box<dyn FnMut(&RgbImage) -> Result<Vec<Detection>> + Send>;

/// Detector driven by a closure, counting its calls
pub(crate) struct ScriptedDetector {
    script: Script,
    calls: usize,
}

impl ScriptedDetector {
    pub fn from_fn<F>(script: F) -> Self
    where
        F: FnMut(&RgbImage) -> Result<Vec<Detection>> + Send + 'static,
    {
        Self {
            script: Box::new(script),
            calls: 0,
        }
    }

    /// The nth call reads `texts[n]` across the whole image; later calls read nothing
    pub fn reads(texts: &[&str]) -> Self {
        let mut remaining: Vec<String> = texts.iter().rev().map(|t| t.to_string()).collect();
        Self::from_fn(move |image| {
            let (w, h) = (image.width() as f32, image.height() as f32);
            Ok(remaining
                .pop()
                .map(|text| vec![phone_detection(&text, 0.0, 0.0, w, h)])
                .unwrap_or_default())
        })
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl TextDetector for ScriptedDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        self.calls += 1;
        (self.script)(image)
    }
}

/// Factory building a fresh scripted detector per worker
pub(crate) struct ScriptedFactory {
    build: Box<dyn Fn() -> Result<ScriptedDetector> + Send + Sync>,
}

impl ScriptedFactory {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn() -> Result<ScriptedDetector> + Send + Sync + 'static,
    {
        Self {
            build: Box::new(build),
        }
    }
}

impl DetectorFactory for ScriptedFactory {
    fn create(&self, _use_gpu: bool) -> Result<Box<dyn TextDetector + Send>> {
        Ok(Box::new((self.build)()?))
    }
}

/// Axis-aligned detection with confidence 0.9
pub(crate) fn phone_detection(
    text: &str,
    x_min: f32,
    y_min: f32,
    x_max: f32,
    y_max: f32,
) -> Detection {
    Detection::new(
        [
            Point::new(x_min, y_min),
            Point::new(x_max, y_min),
            Point::new(x_max, y_max),
            Point::new(x_min, y_max),
        ],
        text,
        0.9,
    )
}

/// Frames whose pixel (0, 0) encodes their index; no pixel is black
pub(crate) fn numbered_frames(count: usize, width: u32, height: u32) -> Vec<RgbImage> {
    (0..count)
        .map(|i| {
            let mut frame = RgbImage::from_pixel(width, height, Rgb([90, 120, 200]));
            frame.put_pixel(0, 0, Rgb([(i % 256) as u8, (i / 256) as u8, 255]));
            frame
        })
        .collect()
}

/// Index stored by [`numbered_frames`]
pub(crate) fn frame_index(frame: &RgbImage) -> usize {
    let Rgb([low, high, _]) = *frame.get_pixel(0, 0);
    high as usize * 256 + low as usize
}

pub(crate) struct MemorySource {
    frames: std::vec::IntoIter<RgbImage>,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.next())
    }
}

struct StoredVideo {
    frames: Vec<RgbImage>,
    fps: f64,
    frame_count: Option<usize>,
}

/// Videos kept in memory, keyed by path
#[derive(Clone, Default)]
pub(crate) struct MemoryBackend {
    inputs: Arc<Mutex<HashMap<PathBuf, Arc<StoredVideo>>>>,
    outputs: Arc<Mutex<HashMap<PathBuf, Vec<RgbImage>>>>,
    fail_sinks: Arc<Mutex<bool>>,
    write_files: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished sinks also write "<n> frames" to their path on disk
    pub fn with_files() -> Self {
        Self {
            write_files: true,
            ..Self::default()
        }
    }

    pub fn add_video(&self, path: &Path, frames: Vec<RgbImage>, fps: f64) {
        let count = frames.len();
        self.add_video_with_count(path, frames, fps, Some(count));
    }

    /// Register a video whose container reports `frame_count`
    pub fn add_video_with_count(
        &self,
        path: &Path,
        frames: Vec<RgbImage>,
        fps: f64,
        frame_count: Option<usize>,
    ) {
        self.inputs.lock().insert(
            path.to_path_buf(),
            Arc::new(StoredVideo {
                frames,
                fps,
                frame_count,
            }),
        );
    }

    pub fn output(&self, path: &Path) -> Option<Vec<RgbImage>> {
        self.outputs.lock().get(path).cloned()
    }

    /// Make every later `create_sink` fail
    pub fn fail_sinks(&self) {
        *self.fail_sinks.lock() = true;
    }
}

impl VideoBackend for MemoryBackend {
    fn open(&self, path: &Path) -> Result<(Box<dyn FrameSource>, VideoInfo)> {
        let video = self
            .inputs
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| RedactError::input(path, "no such video"))?;
        let (width, height) = video.frames.first().map_or((0, 0), |f| f.dimensions());
        let info = VideoInfo {
            fps: video.fps,
            width,
            height,
            frame_count: video.frame_count,
        };
        Ok((Box::new(MemorySource::new(video.frames.clone())), info))
    }

    fn create_sink(&self, path: &Path, _info: &VideoInfo) -> Result<Box<dyn FrameSink>> {
        if *self.fail_sinks.lock() {
            return Err(RedactError::encoding(path, "sink unavailable"));
        }
        Ok(Box::new(MemorySink {
            path: path.to_path_buf(),
            frames: Vec::new(),
            outputs: Arc::clone(&self.outputs),
            write_file: self.write_files,
        }))
    }
}

struct MemorySink {
    path: PathBuf,
    frames: Vec<RgbImage>,
    outputs: Arc<Mutex<HashMap<PathBuf, Vec<RgbImage>>>>,
    write_file: bool,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let MemorySink {
            path,
            frames,
            outputs,
            write_file,
        } = *self;
        if write_file {
            std::fs::write(&path, format!("{} frames", frames.len()))?;
        }
        outputs.lock().insert(path, frames);
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}
