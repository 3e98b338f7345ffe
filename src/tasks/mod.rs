//! Background Task Service
//!
//! A fixed pool of worker threads pulls task ids from a FIFO queue and runs
//! each video end-to-end. Task status lives in a map behind a mutex; callers
//! poll snapshots of it. A sweeper thread removes finished tasks once they
//! pass the retention age.
//!
//! The sweeper and a concurrent `download`/`delete` of the same task only
//! share the map lock, so a download can lose a race against the sweep and
//! report `NotFound`.

pub mod state;

use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServiceSettings;
use crate::error::RedactError;
use crate::pipeline::{Phase, ProgressEvent, ProgressSink, SamplingStats, TemporalSampler};
use crate::video::VideoBackend;
use crate::vision::{DetectorFactory, TextDetector};

pub use state::{TaskId, TaskRequest, TaskState, TaskStatus};

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id} is {state}")]
    NotReady { id: TaskId, state: TaskState },

    #[error("invalid task: {0}")]
    Invalid(#[from] RedactError),

    #[error("task service is shut down")]
    Stopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Collaborators injected into the service
pub struct ServiceDeps {
    pub detectors: Arc<dyn DetectorFactory>,
    pub backend: Arc<dyn VideoBackend>,
    /// Outputs are written under `<storage_root>/outputs`
    pub storage_root: PathBuf,
    pub settings: ServiceSettings,
}

struct TaskRecord {
    status: TaskStatus,
    request: TaskRequest,
    /// Creation order, breaks timestamp ties
    seq: u64,
}

struct Shared {
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    detectors: Arc<dyn DetectorFactory>,
    backend: Arc<dyn VideoBackend>,
    retention: Duration,
}

impl Shared {
    /// Mark a queued task as processing and hand out what the worker needs
    fn begin(&self, id: TaskId) -> Option<(TaskRequest, PathBuf)> {
        let mut tasks = self.tasks.lock();
        let record = tasks.get_mut(&id)?;
        if record.status.state != TaskState::Pending {
            return None;
        }
        record.status.start(Utc::now());
        Some((record.request.clone(), record.status.output.clone()))
    }

    fn finish(&self, id: TaskId, outcome: Result<SamplingStats, RedactError>) {
        let mut tasks = self.tasks.lock();
        let Some(record) = tasks.get_mut(&id) else {
            return;
        };
        match outcome {
            Ok(stats) => {
                info!("Task {} completed", id);
                record.status.complete(stats, Utc::now());
            }
            Err(e) => {
                error!("Task {} failed: {}", id, e);
                record.status.fail(e.to_string(), Utc::now());
            }
        }
    }

    fn update_progress(&self, id: TaskId, event: ProgressEvent) {
        let mut tasks = self.tasks.lock();
        if let Some(record) = tasks.get_mut(&id) {
            let status = &mut record.status;
            status.progress = event.percent();
            status.message = match event.phase {
                Phase::Detect => "Detecting phone numbers".to_string(),
                Phase::Apply => "Applying redaction".to_string(),
            };
            status.updated_at = Utc::now();
        }
    }

    /// Remove terminal tasks finished before `now - retention`
    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return 0;
        };
        let removed: Vec<TaskRecord> = {
            let mut tasks = self.tasks.lock();
            let expired: Vec<TaskId> = tasks
                .values()
                .filter(|r| r.status.expired(cutoff))
                .map(|r| r.status.id)
                .collect();
            expired.iter().filter_map(|id| tasks.remove(id)).collect()
        };

        for record in &removed {
            remove_files(record);
        }
        if !removed.is_empty() {
            info!("Swept {} expired tasks", removed.len());
        }
        removed.len()
    }
}

/// Delete a task's output, and its input when the service owns it
fn remove_files(record: &TaskRecord) {
    remove_path(&record.status.output);
    if record.request.owns_input {
        remove_path(&record.request.input);
    }
}

fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Output location for a task: same extension as the input, none for
/// image-sequence directories
fn output_path(outputs_dir: &Path, id: TaskId, input: &Path) -> PathBuf {
    match input.extension().filter(|_| !input.is_dir()) {
        Some(ext) => outputs_dir.join(format!("{}.{}", id, ext.to_string_lossy())),
        None => outputs_dir.join(id.to_string()),
    }
}

/// Progress adapter writing into the task map
struct TaskProgress<'a> {
    shared: &'a Shared,
    id: TaskId,
    last_percent: Option<u8>,
}

impl ProgressSink for TaskProgress<'_> {
    fn report(&mut self, event: ProgressEvent) {
        let percent = event.percent();
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            self.shared.update_progress(self.id, event);
        }
    }
}

/// Detectors owned by one worker, one per OCR device
#[derive(Default)]
struct WorkerDetectors {
    cpu: Option<Box<dyn TextDetector + Send>>,
    gpu: Option<Box<dyn TextDetector + Send>>,
}

impl WorkerDetectors {
    fn slot(&mut self, use_gpu: bool) -> &mut Option<Box<dyn TextDetector + Send>> {
        if use_gpu {
            &mut self.gpu
        } else {
            &mut self.cpu
        }
    }
}

fn worker_loop(worker: usize, shared: Arc<Shared>, queue: Receiver<TaskId>) {
    debug!("Worker {} started", worker);
    let mut detectors = WorkerDetectors::default();

    for id in queue.iter() {
        let Some((request, output)) = shared.begin(id) else {
            debug!("Worker {}: task {} no longer pending", worker, id);
            continue;
        };
        info!("Worker {} processing task {} ({})", worker, id, request.input.display());

        let outcome = run_task(&shared, &mut detectors, id, &request, &output);
        if matches!(outcome, Err(RedactError::Detection(_))) {
            // The OCR process may be gone; start a fresh one next time
            detectors.slot(request.use_gpu).take();
        }
        shared.finish(id, outcome);
    }
    debug!("Worker {} stopped", worker);
}

fn run_task(
    shared: &Shared,
    detectors: &mut WorkerDetectors,
    id: TaskId,
    request: &TaskRequest,
    output: &Path,
) -> Result<SamplingStats, RedactError> {
    let sampler = TemporalSampler::new(request.options.clone())?;

    let slot = detectors.slot(request.use_gpu);
    if slot.is_none() {
        *slot = Some(shared.detectors.create(request.use_gpu)?);
    }
    let detector = slot
        .as_mut()
        .ok_or_else(|| RedactError::Detection("no detector available".to_string()))?;

    let mut progress = TaskProgress {
        shared,
        id,
        last_percent: None,
    };
    sampler.process(
        detector.as_mut(),
        shared.backend.as_ref(),
        &request.input,
        output,
        &mut progress,
    )
}

/// Owns the worker pool, the sweeper and the task map
pub struct TaskService {
    shared: Arc<Shared>,
    outputs_dir: PathBuf,
    queue: Option<Sender<TaskId>>,
    workers: Vec<JoinHandle<()>>,
    sweeper: Option<(Sender<()>, JoinHandle<()>)>,
    next_seq: Mutex<u64>,
}

impl TaskService {
    /// Create the output directory and start workers and the sweeper
    pub fn start(deps: ServiceDeps) -> TaskResult<Self> {
        let outputs_dir = deps.storage_root.join("outputs");
        std::fs::create_dir_all(&outputs_dir)?;

        let retention = i64::try_from(deps.settings.retention_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX);
        let shared = Arc::new(Shared {
            tasks: Mutex::new(HashMap::new()),
            detectors: deps.detectors,
            backend: deps.backend,
            retention,
        });

        let (queue_tx, queue_rx) = unbounded::<TaskId>();
        let workers = (0..deps.settings.workers.max(1))
            .map(|worker| {
                let shared = Arc::clone(&shared);
                let queue = queue_rx.clone();
                std::thread::spawn(move || worker_loop(worker, shared, queue))
            })
            .collect::<Vec<_>>();

        let (stop_tx, stop_rx) = unbounded::<()>();
        let ticker = crossbeam_channel::tick(std::time::Duration::from_secs(
            deps.settings.sweep_interval_secs.max(1),
        ));
        let sweep_shared = Arc::clone(&shared);
        let sweeper = std::thread::spawn(move || loop {
            select! {
                recv(ticker) -> _ => {
                    sweep_shared.sweep(Utc::now());
                }
                recv(stop_rx) -> _ => break,
            }
        });

        info!(
            "Task service started: {} workers, outputs in {}",
            workers.len(),
            outputs_dir.display()
        );
        Ok(Self {
            shared,
            outputs_dir,
            queue: Some(queue_tx),
            workers,
            sweeper: Some((stop_tx, sweeper)),
            next_seq: Mutex::new(0),
        })
    }

    /// Queue a video for processing
    pub fn create(&self, request: TaskRequest) -> TaskResult<TaskId> {
        request.options.validate()?;
        let queue = self.queue.as_ref().ok_or(TaskError::Stopped)?;

        let id = Uuid::new_v4();
        let output = output_path(&self.outputs_dir, id, &request.input);
        let status = TaskStatus::pending(id, request.input.clone(), output, Utc::now());
        let seq = {
            let mut next = self.next_seq.lock();
            *next += 1;
            *next
        };

        self.shared
            .tasks
            .lock()
            .insert(id, TaskRecord { status, request, seq });
        queue.send(id).map_err(|_| TaskError::Stopped)?;

        info!("Task {} queued", id);
        Ok(id)
    }

    pub fn status(&self, id: TaskId) -> TaskResult<TaskStatus> {
        self.shared
            .tasks
            .lock()
            .get(&id)
            .map(|r| r.status.clone())
            .ok_or(TaskError::NotFound(id))
    }

    /// Newest first, optionally only tasks in `filter` state
    pub fn list(&self, filter: Option<TaskState>, limit: usize) -> Vec<TaskStatus> {
        let tasks = self.shared.tasks.lock();
        let mut records: Vec<&TaskRecord> = tasks
            .values()
            .filter(|r| filter.map_or(true, |state| r.status.state == state))
            .collect();
        records.sort_by(|a, b| {
            b.status
                .created_at
                .cmp(&a.status.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        records
            .into_iter()
            .take(limit)
            .map(|r| r.status.clone())
            .collect()
    }

    /// Output location of a completed task
    pub fn output_path(&self, id: TaskId) -> TaskResult<PathBuf> {
        let tasks = self.shared.tasks.lock();
        let record = tasks.get(&id).ok_or(TaskError::NotFound(id))?;
        if record.status.state != TaskState::Completed {
            return Err(TaskError::NotReady {
                id,
                state: record.status.state,
            });
        }
        Ok(record.status.output.clone())
    }

    /// Open the output of a completed task for reading
    pub fn download(&self, id: TaskId) -> TaskResult<File> {
        let path = self.output_path(id)?;
        File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TaskError::NotFound(id),
            _ => TaskError::Io(e),
        })
    }

    /// Remove a completed or failed task with its files
    pub fn delete(&self, id: TaskId) -> TaskResult<()> {
        let record = {
            let mut tasks = self.shared.tasks.lock();
            let record = tasks.get(&id).ok_or(TaskError::NotFound(id))?;
            if !record.status.state.is_terminal() {
                return Err(TaskError::NotReady {
                    id,
                    state: record.status.state,
                });
            }
            tasks.remove(&id).ok_or(TaskError::NotFound(id))?
        };

        remove_files(&record);
        info!("Task {} deleted", id);
        Ok(())
    }

    /// Remove finished tasks older than the retention age, as of `now`
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        self.shared.sweep(now)
    }

    /// Stop accepting tasks, let workers drain the queue and join all threads
    pub fn shutdown(&mut self) {
        self.queue.take();
        if let Some((stop, handle)) = self.sweeper.take() {
            drop(stop);
            let _ = handle.join();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Task worker panicked");
            }
        }
    }
}

impl Drop for TaskService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
