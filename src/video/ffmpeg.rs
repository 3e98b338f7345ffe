//! ffmpeg/ffprobe backed video IO
//!
//! Decoding pipes `rgb24` rawvideo out of an ffmpeg child; encoding pipes raw
//! frames into another one. Probing uses `ffprobe -of json`.

use image::RgbImage;
use serde::Deserialize;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

use super::{FrameSink, FrameSource, VideoBackend, VideoInfo};
use crate::config::VideoSettings;
use crate::error::{RedactError, Result};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    tags: Option<FfprobeTags>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<serde_json::Value>,
}

impl FfprobeStream {
    /// Display rotation in degrees, normalized to `0..360`
    fn rotation(&self) -> i64 {
        let from_matrix = self
            .side_data_list
            .iter()
            .filter_map(|d| d.rotation.as_ref())
            .find_map(|r| r.as_f64().or_else(|| r.as_str()?.parse().ok()));
        let from_tag = || {
            self.tags
                .as_ref()
                .and_then(|t| t.rotate.as_deref())
                .and_then(|r| r.parse::<f64>().ok())
        };
        let degrees = from_matrix.or_else(from_tag).unwrap_or(0.0).round() as i64;
        degrees.rem_euclid(360)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse "30000/1001" or "25" into frames per second
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().ok()?;
            let den = den.parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse::<f64>().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_probe(json: &str) -> std::result::Result<VideoInfo, String> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| format!("unreadable ffprobe output: {}", e))?;
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| "no video stream".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };
    // ffmpeg autorotates on decode, so quarter turns arrive transposed
    let (width, height) = match stream.rotation() {
        90 | 270 => (height, width),
        _ => (width, height),
    };
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| "video stream has no frame rate".to_string())?;

    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());
    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .or_else(|| duration.map(|d| (d * fps).round() as usize).filter(|n| *n > 0));

    Ok(VideoInfo {
        fps,
        width,
        height,
        frame_count,
    })
}

/// Video IO through ffmpeg child processes
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    settings: VideoSettings,
}

impl FfmpegBackend {
    pub fn new(settings: VideoSettings) -> Self {
        Self { settings }
    }
}

impl VideoBackend for FfmpegBackend {
    /// Read stream properties with ffprobe
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        if !path.is_file() {
            return Err(RedactError::input(path, "file not found"));
        }

        let output = Command::new(&self.settings.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames\
                 :stream_tags=rotate:stream_side_data=rotation:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(|e| RedactError::input(path, format!("failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RedactError::input(path, format!("ffprobe failed: {}", stderr.trim())));
        }

        parse_probe(&String::from_utf8_lossy(&output.stdout))
            .map_err(|e| RedactError::input(path, e))
    }

    fn open(&self, path: &Path) -> Result<(Box<dyn FrameSource>, VideoInfo)> {
        let info = self.probe(path)?;
        debug!("Probed {}: {:?}", path.display(), info);

        let mut child = Command::new(&self.settings.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| RedactError::input(path, format!("failed to execute ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RedactError::input(path, "ffmpeg has no stdout"))?;

        let source = FfmpegSource {
            path: path.to_path_buf(),
            child,
            stdout,
            width: info.width,
            height: info.height,
            finished: false,
        };
        Ok((Box::new(source), info))
    }

    fn create_sink(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RedactError::encoding(path, e))?;
        }

        let size = format!("{}x{}", info.width, info.height);
        let fps = format!("{}", info.fps);
        let mut child = Command::new(&self.settings.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", &size, "-r", &fps, "-i", "-"])
            .args(["-an", "-c:v", &self.settings.codec])
            // yuv420p needs even dimensions
            .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| RedactError::encoding(path, format!("failed to execute ffmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RedactError::encoding(path, "ffmpeg has no stdin"))?;

        info!("Encoding {} ({} @ {:.3} fps)", path.display(), size, info.fps);
        Ok(Box::new(FfmpegSink {
            path: path.to_path_buf(),
            child,
            stdin: Some(stdin),
            width: info.width,
            height: info.height,
        }))
    }
}

/// Frames decoded by an ffmpeg child
struct FfmpegSource {
    path: PathBuf,
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    finished: bool,
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finished = true;
                let status = self.child.wait()?;
                if !status.success() {
                    let reason = format!("ffmpeg decode exited with {}", status);
                    return Err(RedactError::input(&self.path, reason));
                }
                return Ok(None);
            }
            Err(e) => return Err(RedactError::input(&self.path, e)),
        }

        let frame = RgbImage::from_raw(self.width, self.height, buffer)
            .ok_or_else(|| RedactError::input(&self.path, "short frame buffer"))?;
        Ok(Some(frame))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Frames encoded by an ffmpeg child
struct FfmpegSink {
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
}

impl FrameSink for FfmpegSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(RedactError::encoding(
                &self.path,
                format!(
                    "frame is {}x{}, encoder expects {}x{}",
                    frame.width(),
                    frame.height(),
                    self.width,
                    self.height
                ),
            ));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RedactError::encoding(&self.path, "encoder already closed"))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(|e| RedactError::encoding(&self.path, e))
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        drop(self.stdin.take());
        let status = self.child.wait().map_err(|e| RedactError::encoding(&self.path, e))?;
        if !status.success() {
            let reason = format!("ffmpeg encode exited with {}", status);
            return Err(RedactError::encoding(&self.path, reason));
        }
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove partial output {}: {}", self.path.display(), e);
            }
        }
    }
}
