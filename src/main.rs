//! phone-redact - Blur mobile phone numbers out of videos
//!
//! OCR runs on sampled frames only; every number it finds is redacted over
//! a window of surrounding frames.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use phone_redact::config::{self, AppConfig};
use phone_redact::pipeline::{ProgressEvent, SamplingStats, TemporalSampler};
use phone_redact::redaction::BlurMethod;
use phone_redact::storage;
use phone_redact::tasks::{ServiceDeps, TaskId, TaskRequest, TaskService, TaskState};
use phone_redact::video::{AutoBackend, VideoBackend};
use phone_redact::vision::{phone, SidecarOcr, SidecarOcrFactory};

/// Extensions picked up by `batch`
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "flv", "wmv"];

/// phone-redact - Detect and redact phone numbers in videos
#[derive(Parser, Debug)]
#[command(name = "phone-redact")]
#[command(about = "Detect and redact mobile phone numbers in videos")]
struct Args {
    /// Config file (default: platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Redact a single video
    Process {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Redact every video in a directory
    Batch {
        input_dir: PathBuf,
        output_dir: PathBuf,
        /// Videos processed in parallel
        #[arg(long)]
        workers: Option<usize>,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the phone numbers found in a piece of text
    Scan { text: String },
    /// Write the default configuration file
    InitConfig {
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Command-line overrides of config file values
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Seconds between OCR passes
    #[arg(long)]
    sample_interval: Option<f64>,

    /// Seconds redacted before and after each OCR hit (default: sample interval)
    #[arg(long)]
    buffer_time: Option<f64>,

    #[arg(long, value_enum)]
    blur_method: Option<BlurMethod>,

    /// Gaussian kernel size, forced odd
    #[arg(long)]
    blur_strength: Option<u32>,

    /// Run OCR on the GPU
    #[arg(long)]
    use_gpu: bool,

    /// Narrow boxes down to the number itself
    #[arg(long)]
    precise: bool,

    /// Verification rounds per number in precise mode
    #[arg(long)]
    max_iterations: Option<usize>,
}

impl Overrides {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(interval) = self.sample_interval {
            config.sampling.sample_interval = interval;
        }
        if let Some(buffer) = self.buffer_time {
            config.sampling.buffer_time = Some(buffer);
        }
        if let Some(method) = self.blur_method {
            config.redaction.method = method;
        }
        if let Some(strength) = self.blur_strength {
            config.redaction.strength = strength;
        }
        if self.use_gpu {
            config.ocr.use_gpu = true;
        }
        if self.precise {
            config.refinement.precise_location = true;
        }
        if let Some(iterations) = self.max_iterations {
            config.refinement.max_iterations = iterations;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Process {
            input,
            output,
            overrides,
        } => {
            let mut config = load_config(args.config.as_deref())?;
            overrides.apply(&mut config);
            run_process(&config, &input, &output)
        }
        Command::Batch {
            input_dir,
            output_dir,
            workers,
            overrides,
        } => {
            let mut config = load_config(args.config.as_deref())?;
            overrides.apply(&mut config);
            if let Some(workers) = workers {
                config.service.workers = workers;
            }
            run_batch(&config, &input_dir, &output_dir)
        }
        Command::Scan { text } => {
            run_scan(&text);
            Ok(())
        }
        Command::InitConfig { path, force } => {
            let path = match path.or(args.config) {
                Some(path) => path,
                None => storage::default_config_path()?,
            };
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config::save_config(&AppConfig::default(), &path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

/// Load the config given on the command line, else the default file if present
fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(path) = storage::default_config_path() {
        if path.exists() {
            match config::load_config(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring unreadable config {:?}: {}", path, e),
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn run_process(config: &AppConfig, input: &Path, output: &Path) -> Result<()> {
    config.validate()?;
    if config.sampling.sample_interval > 2.0 {
        warn!("Sample interval above 2s may miss numbers that move or change quickly");
    }

    let sampler = TemporalSampler::new(config.sampler_options())?;
    let backend = AutoBackend::new(&config.video);
    let info = backend.probe(input)?;
    info!(
        "Input {}: {}x{} @ {:.2} fps",
        input.display(),
        info.width,
        info.height,
        info.fps
    );
    let mut detector = SidecarOcr::spawn(&config.ocr, config.ocr.use_gpu)?;

    let (mut progress_tx, progress_rx) = unbounded::<ProgressEvent>();
    let reporter = std::thread::spawn(move || {
        let mut last_decile = None;
        for event in progress_rx.iter() {
            let decile = event.percent() / 10;
            if last_decile != Some(decile) {
                last_decile = Some(decile);
                info!("Progress: {}% ({:?}, frame {})", event.percent(), event.phase, event.frame);
            }
        }
    });

    let result = sampler.process(&mut detector, &backend, input, output, &mut progress_tx);
    drop(progress_tx);
    let _ = reporter.join();

    let stats = result.with_context(|| format!("Failed to process {}", input.display()))?;
    print_stats(&stats);
    println!("Output written to {}", output.display());
    Ok(())
}

fn print_stats(stats: &SamplingStats) {
    let saved_percent = if stats.total_frames > 0 {
        stats.saved_calls() as f64 * 100.0 / stats.total_frames as f64
    } else {
        0.0
    };

    println!("Total frames:           {}", stats.total_frames);
    println!("OCR calls:              {}", stats.ocr_calls);
    println!("Saved OCR calls:        {} ({:.1}%)", stats.saved_calls(), saved_percent);
    println!("Accelerate ratio:       {:.1}x", stats.accelerate_ratio());
    println!("Frames redacted:        {}", stats.frames_with_detections);
    println!("Unique numbers:         {}", stats.unique_numbers.len());
    for number in &stats.unique_numbers {
        println!("  {}", number);
    }
}

fn is_video_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn run_batch(config: &AppConfig, input_dir: &Path, output_dir: &Path) -> Result<()> {
    config.validate()?;

    let mut videos: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_video_file(p))
        .collect();
    videos.sort();
    if videos.is_empty() {
        warn!("No video files found in {}", input_dir.display());
        return Ok(());
    }
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut service = TaskService::start(ServiceDeps {
        detectors: Arc::new(SidecarOcrFactory::new(config.ocr.clone())),
        backend: Arc::new(AutoBackend::new(&config.video)),
        storage_root: storage::task_storage_root(config)?,
        settings: config.service.clone(),
    })?;

    let mut pending: Vec<(TaskId, PathBuf)> = Vec::with_capacity(videos.len());
    for video in &videos {
        let id = service.create(TaskRequest::new(video, config))?;
        pending.push((id, video.clone()));
    }
    info!("Submitted {} videos", pending.len());

    let mut completed = 0;
    let mut failed = 0;
    while !pending.is_empty() {
        std::thread::sleep(Duration::from_millis(500));
        let mut still_running = Vec::with_capacity(pending.len());

        for (id, video) in pending {
            let status = service.status(id)?;
            match status.state {
                TaskState::Completed => {
                    let target = output_dir.join(masked_name(&video));
                    std::fs::copy(service.output_path(id)?, &target)
                        .with_context(|| format!("Failed to copy result to {}", target.display()))?;
                    println!("Done: {} -> {}", video.display(), target.display());
                    service.delete(id)?;
                    completed += 1;
                }
                TaskState::Failed => {
                    println!(
                        "Failed: {}: {}",
                        video.display(),
                        status.error.as_deref().unwrap_or("unknown error")
                    );
                    service.delete(id)?;
                    failed += 1;
                }
                TaskState::Pending | TaskState::Processing => still_running.push((id, video)),
            }
        }
        pending = still_running;
    }

    service.shutdown();
    println!("Batch finished: {} completed, {} failed", completed, failed);
    if failed > 0 {
        anyhow::bail!("{} of {} videos failed", failed, videos.len());
    }
    Ok(())
}

/// `clip.mp4` -> `clip_masked.mp4`
fn masked_name(video: &Path) -> String {
    let stem = video.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    match video.extension() {
        Some(ext) => format!("{}_masked.{}", stem, ext.to_string_lossy()),
        None => format!("{}_masked", stem),
    }
}

fn run_scan(text: &str) {
    let matches = phone::find_all(text);
    if matches.is_empty() {
        println!("No phone numbers found");
        return;
    }
    println!("Normalized: {}", phone::normalize(text));
    for m in matches {
        println!("{} at [{}, {})", m.value, m.start, m.end);
    }
}
