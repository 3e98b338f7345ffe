//! Progress events emitted while a video is processed

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Sparse OCR pass
    Detect,
    /// Full redaction pass
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// Frames consumed so far in this phase
    pub frame: usize,
    /// Frames in the video, if known
    pub total: Option<usize>,
}

impl ProgressEvent {
    /// Overall completion: detection covers 0-50, redaction 50-100
    pub fn percent(&self) -> u8 {
        let half = match self.total {
            Some(total) if total > 0 => (self.frame.min(total) * 50 / total) as u8,
            _ => 0,
        };
        match self.phase {
            Phase::Detect => half,
            Phase::Apply => 50 + half,
        }
    }
}

/// Consumer of progress events
pub trait ProgressSink {
    fn report(&mut self, event: ProgressEvent);
}

/// Discards progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _event: ProgressEvent) {}
}

impl ProgressSink for Sender<ProgressEvent> {
    fn report(&mut self, event: ProgressEvent) {
        // Receiver gone means nobody is watching
        let _ = self.send(event);
    }
}
