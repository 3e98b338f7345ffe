//! Video IO Layer
//!
//! Frames are consumed and produced in strict sequential order. Two backends
//! are provided: ffmpeg/ffprobe child processes for container formats, and
//! plain directories of image files.

pub mod ffmpeg;
pub mod sequence;

use image::RgbImage;
use std::path::Path;

use crate::config::VideoSettings;
use crate::error::Result;

pub use ffmpeg::FfmpegBackend;
pub use sequence::ImageSequenceBackend;

/// Stream properties reported when a video is opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    /// Frames per second
    pub fps: f64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame count as reported by the container, when known
    pub frame_count: Option<usize>,
}

/// Sequential frame reader
pub trait FrameSource {
    /// Next frame, or `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Discard up to `count` frames; returns how many were actually skipped
    fn skip_frames(&mut self, count: usize) -> Result<usize> {
        for skipped in 0..count {
            if self.next_frame()?.is_none() {
                return Ok(skipped);
            }
        }
        Ok(count)
    }
}

/// Sequential frame writer
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the output
    fn finish(self: Box<Self>) -> Result<()>;

    /// Drop the output without finalizing it, removing anything written
    fn abort(self: Box<Self>);
}

/// Video IO collaborator
pub trait VideoBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<(Box<dyn FrameSource>, VideoInfo)>;

    /// Stream properties without keeping a reader open
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        self.open(path).map(|(_, info)| info)
    }

    fn create_sink(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>>;
}

/// Picks a backend by path: directories (and extension-less outputs) are
/// image sequences, everything else goes through ffmpeg
#[derive(Debug, Clone)]
pub struct AutoBackend {
    ffmpeg: FfmpegBackend,
    sequence: ImageSequenceBackend,
}

impl AutoBackend {
    pub fn new(settings: &VideoSettings) -> Self {
        Self {
            ffmpeg: FfmpegBackend::new(settings.clone()),
            sequence: ImageSequenceBackend::new(settings.sequence_fps),
        }
    }
}

fn is_sequence_path(path: &Path) -> bool {
    path.is_dir() || path.extension().is_none()
}

impl VideoBackend for AutoBackend {
    fn open(&self, path: &Path) -> Result<(Box<dyn FrameSource>, VideoInfo)> {
        if path.is_dir() {
            self.sequence.open(path)
        } else {
            self.ffmpeg.open(path)
        }
    }

    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        if path.is_dir() {
            self.sequence.probe(path)
        } else {
            self.ffmpeg.probe(path)
        }
    }

    fn create_sink(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>> {
        if is_sequence_path(path) {
            self.sequence.create_sink(path, info)
        } else {
            self.ffmpeg.create_sink(path, info)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        remaining: usize,
    }

    impl FrameSource for Counter {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(RgbImage::new(1, 1)))
        }
    }

    #[test]
    fn test_default_skip_stops_at_end() {
        let mut source = Counter { remaining: 5 };
        assert_eq!(source.skip_frames(3).unwrap(), 3);
        assert_eq!(source.skip_frames(3).unwrap(), 2);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_sequence_path_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_sequence_path(dir.path()));
        assert!(is_sequence_path(Path::new("/tmp/frames_out")));
        assert!(!is_sequence_path(Path::new("/tmp/out.mp4")));
    }

    #[test]
    fn test_probe_checks_input_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let backend = AutoBackend::new(&VideoSettings::default());

        let missing = dir.path().join("missing.mp4");
        assert!(matches!(
            backend.probe(&missing),
            Err(crate::RedactError::Input { .. })
        ));

        RgbImage::new(6, 4).save(dir.path().join("f000.png")).unwrap();
        let info = backend.probe(dir.path()).unwrap();
        assert_eq!((info.width, info.height), (6, 4));
    }
}
