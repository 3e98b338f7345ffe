//! Application Configuration
//!
//! Processing settings stored in TOML format. Every section falls back to
//! its defaults, so a config file only needs the values it changes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::RedactError;
use crate::pipeline::SamplerOptions;
use crate::redaction::{BlurMethod, RedactionParams};
use crate::vision::RefinerOptions;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// How detected numbers are obscured
    pub redaction: RedactionSettings,
    /// Temporal sampling of OCR passes
    pub sampling: SamplingSettings,
    /// Precise number location
    pub refinement: RefinementSettings,
    /// OCR sidecar
    pub ocr: OcrSettings,
    /// Video decode/encode tools
    pub video: VideoSettings,
    /// Background task service
    pub service: ServiceSettings,
}

/// Redaction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionSettings {
    /// Obscuring transform
    pub method: BlurMethod,
    /// Gaussian kernel size; even values are bumped to the next odd one
    pub strength: u32,
}

impl Default for RedactionSettings {
    fn default() -> Self {
        Self {
            method: BlurMethod::Gaussian,
            strength: 51,
        }
    }
}

/// Sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    /// Seconds between OCR passes
    pub sample_interval: f64,
    /// Seconds of redaction before and after each OCR pass; defaults to
    /// `sample_interval`
    pub buffer_time: Option<f64>,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            sample_interval: 1.0,
            buffer_time: None,
        }
    }
}

/// Refinement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementSettings {
    /// Narrow OCR line boxes down to the number itself
    pub precise_location: bool,
    /// Verification rounds per number
    pub max_iterations: usize,
    /// Padding around the initial character slice
    pub padding_ratio: f32,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            precise_location: false,
            max_iterations: 3,
            padding_ratio: 0.05,
        }
    }
}

/// OCR sidecar settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Program and arguments of the OCR sidecar
    pub command: Vec<String>,
    /// Run OCR on the GPU
    pub use_gpu: bool,
    /// Extra argument passed to the sidecar when `use_gpu` is set
    pub gpu_flag: Option<String>,
    /// Regions below this confidence are dropped
    pub min_confidence: f32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            command: vec!["paddleocr-sidecar".to_string()],
            use_gpu: false,
            gpu_flag: Some("--use-gpu".to_string()),
            min_confidence: 0.0,
        }
    }
}

/// Video tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    /// ffmpeg executable
    pub ffmpeg: String,
    /// ffprobe executable
    pub ffprobe: String,
    /// Output video codec
    pub codec: String,
    /// Frame rate assumed for image-sequence input
    pub sequence_fps: f64,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            codec: "libx264".to_string(),
            sequence_fps: 30.0,
        }
    }
}

/// Task service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Concurrent videos
    pub workers: usize,
    /// Root for task outputs; platform data dir when unset
    pub storage_dir: Option<PathBuf>,
    /// Finished tasks older than this are swept
    pub retention_hours: u64,
    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            storage_dir: None,
            retention_hours: 48,
            sweep_interval_secs: 3600,
        }
    }
}

impl AppConfig {
    /// Reject values processing cannot start with
    pub fn validate(&self) -> Result<(), RedactError> {
        self.sampler_options().validate()?;
        if self.refinement.max_iterations == 0 {
            return Err(RedactError::Config(
                "refinement.max_iterations must be positive".to_string(),
            ));
        }
        if self.service.workers == 0 {
            return Err(RedactError::Config("service.workers must be positive".to_string()));
        }
        Ok(())
    }

    /// Pipeline options derived from these settings
    pub fn sampler_options(&self) -> SamplerOptions {
        SamplerOptions {
            sample_interval: self.sampling.sample_interval,
            buffer_time: self.sampling.buffer_time,
            redaction: RedactionParams::new(self.redaction.method, self.redaction.strength),
            refinement: self.refinement.precise_location.then(|| RefinerOptions {
                max_iterations: self.refinement.max_iterations,
                padding_ratio: self.refinement.padding_ratio,
            }),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.redaction.method, BlurMethod::Gaussian);
        assert_eq!(config.redaction.strength, 51);

        assert!((config.sampling.sample_interval - 1.0).abs() < f64::EPSILON);
        assert!(config.sampling.buffer_time.is_none());

        assert!(!config.refinement.precise_location);
        assert_eq!(config.refinement.max_iterations, 3);

        assert!(!config.ocr.use_gpu);
        assert_eq!(config.ocr.gpu_flag.as_deref(), Some("--use-gpu"));

        assert_eq!(config.service.workers, 1);
        assert_eq!(config.service.retention_hours, 48);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.redaction.method = BlurMethod::Pixelate;
        config.sampling.buffer_time = Some(0.5);

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.redaction.method, BlurMethod::Pixelate);
        assert_eq!(parsed.sampling.buffer_time, Some(0.5));
        assert_eq!(parsed.video.codec, config.video.codec);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [redaction]
            method = "black"

            [refinement]
            precise_location = true
            "#,
        )
        .unwrap();

        assert_eq!(parsed.redaction.method, BlurMethod::Black);
        assert_eq!(parsed.redaction.strength, 51);
        assert!(parsed.refinement.precise_location);
        assert_eq!(parsed.refinement.max_iterations, 3);
        assert_eq!(parsed.service.sweep_interval_secs, 3600);
    }

    #[test]
    fn test_sampler_options_follow_settings() {
        let mut config = AppConfig::default();
        config.redaction.strength = 50;
        let options = config.sampler_options();
        assert!(options.refinement.is_none());
        assert_eq!(options.redaction.strength, 51);

        config.refinement.precise_location = true;
        config.refinement.max_iterations = 5;
        let options = config.sampler_options();
        assert_eq!(options.refinement.unwrap().max_iterations, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.sampling.sample_interval = 0.0;
        assert!(matches!(config.validate(), Err(RedactError::Config(_))));

        let mut config = AppConfig::default();
        config.sampling.buffer_time = Some(-1.0);
        assert!(matches!(config.validate(), Err(RedactError::Config(_))));

        let mut config = AppConfig::default();
        config.refinement.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.service.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.ocr.command, loaded.ocr.command);
        assert_eq!(config.service.workers, loaded.service.workers);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
