//! phone-redact
//!
//! Finds mobile phone numbers in video frames with OCR and obscures them.
//! OCR runs on sampled frames only; each hit is redacted across a window of
//! neighbouring frames.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod redaction;
pub mod storage;
pub mod tasks;
pub mod video;
pub mod vision;

#[cfg(test)]
mod testing;

pub use error::{RedactError, Result};
