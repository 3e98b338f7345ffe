//! OCR sidecar backend
//!
//! Runs an external OCR program (typically a PaddleOCR wrapper) as a long-lived
//! child process. Each request writes the image to a scratch PNG, sends its
//! path as one line on stdin and reads one line of JSON back:
//!
//! ```text
//! [{"box": [[x, y], [x, y], [x, y], [x, y]], "text": "...", "confidence": 0.97}]
//! ```
//!
//! A line of the form `{"error": "..."}` reports a failed recognition.

use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::geometry::Point;
use super::{Detection, DetectorFactory, TextDetector};
use crate::config::OcrSettings;
use crate::error::{RedactError, Result};

/// One region as written by the sidecar
#[derive(Debug, Deserialize)]
struct WireDetection {
    #[serde(rename = "box")]
    points: [[f32; 2]; 4],
    text: String,
    confidence: f32,
}

impl From<WireDetection> for Detection {
    fn from(wire: WireDetection) -> Self {
        let quad = wire.points.map(|[x, y]| Point::new(x, y));
        Detection::new(quad, wire.text, wire.confidence)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Detections(Vec<WireDetection>),
    Failure { error: String },
}

/// Parse one response line from the sidecar
fn parse_response(line: &str, min_confidence: f32) -> Result<Vec<Detection>> {
    let response: WireResponse = serde_json::from_str(line.trim())
        .map_err(|e| RedactError::Detection(format!("malformed OCR response: {}", e)))?;

    match response {
        WireResponse::Detections(regions) => Ok(regions
            .into_iter()
            .filter(|r| r.confidence >= min_confidence)
            .map(Detection::from)
            .collect()),
        WireResponse::Failure { error } => Err(RedactError::Detection(error)),
    }
}

/// Text detector backed by an OCR child process
pub struct SidecarOcr {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    scratch: TempDir,
    min_confidence: f32,
}

impl SidecarOcr {
    /// Start the configured OCR command
    pub fn spawn(settings: &OcrSettings, use_gpu: bool) -> Result<Self> {
        let (program, args) = settings
            .command
            .split_first()
            .ok_or_else(|| RedactError::Config("ocr.command is empty".to_string()))?;

        let mut command = Command::new(program);
        command.args(args);
        if use_gpu {
            if let Some(flag) = &settings.gpu_flag {
                command.arg(flag);
            }
        }

        info!("Starting OCR sidecar: {:?} (gpu: {})", settings.command, use_gpu);
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| RedactError::Detection(format!("failed to start {}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RedactError::Detection("OCR sidecar has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RedactError::Detection("OCR sidecar has no stdout".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            scratch: tempfile::Builder::new().prefix("phone-redact-ocr-").tempdir()?,
            min_confidence: settings.min_confidence,
        })
    }

    fn scratch_path(&self) -> PathBuf {
        self.scratch.path().join("frame.png")
    }
}

impl TextDetector for SidecarOcr {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let path = self.scratch_path();
        image.save_with_format(&path, ImageFormat::Png)?;

        writeln!(self.stdin, "{}", path.display())
            .and_then(|_| self.stdin.flush())
            .map_err(|e| RedactError::Detection(format!("OCR sidecar closed its input: {}", e)))?;

        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| RedactError::Detection(format!("failed to read OCR response: {}", e)))?;
        if read == 0 {
            return Err(RedactError::Detection("OCR sidecar exited".to_string()));
        }

        let detections = parse_response(&line, self.min_confidence)?;
        debug!(
            "OCR on {}x{} image: {} regions",
            image.width(),
            image.height(),
            detections.len()
        );
        Ok(detections)
    }
}

impl Drop for SidecarOcr {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("Failed to stop OCR sidecar: {}", e);
        }
        let _ = self.child.wait();
    }
}

/// Spawns one [`SidecarOcr`] per caller from shared settings
#[derive(Debug, Clone)]
pub struct SidecarOcrFactory {
    settings: OcrSettings,
}

impl SidecarOcrFactory {
    pub fn new(settings: OcrSettings) -> Self {
        Self { settings }
    }
}

impl DetectorFactory for SidecarOcrFactory {
    fn create(&self, use_gpu: bool) -> Result<Box<dyn TextDetector + Send>> {
        Ok(Box::new(SidecarOcr::spawn(&self.settings, use_gpu)?))
    }
}
