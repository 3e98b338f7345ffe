//! Error types for the detection-to-redaction pipeline

use thiserror::Error;

/// Errors surfaced by the pipeline and its collaborators.
///
/// Degenerate rectangles and empty crops never show up here: geometry code
/// returns `Option`s and the refiner falls back to its best rectangle.
#[derive(Error, Debug)]
pub enum RedactError {
    /// Input video could not be opened or probed
    #[error("cannot open input {path}: {reason}")]
    Input { path: String, reason: String },

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// OCR collaborator failed mid-pipeline
    #[error("text detection failed: {0}")]
    Detection(String),

    /// Output sink could not be created or finalized
    #[error("cannot encode output {path}: {reason}")]
    Encoding { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl RedactError {
    pub(crate) fn input(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::Input {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encoding(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::Encoding {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, RedactError>;
