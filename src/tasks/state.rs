//! Task records and the status snapshots handed to readers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::pipeline::{SamplerOptions, SamplingStats};

pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    /// Completed or failed; only these may be deleted or swept
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What to process and how
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub input: PathBuf,
    pub options: SamplerOptions,
    pub use_gpu: bool,
    /// The input belongs to the service and is removed with the task
    pub owns_input: bool,
}

impl TaskRequest {
    /// Request using the processing settings of `config`
    pub fn new(input: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self {
            input: input.into(),
            options: config.sampler_options(),
            use_gpu: config.ocr.use_gpu,
            owns_input: false,
        }
    }
}

/// Point-in-time copy of a task's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub state: TaskState,
    /// 0-100
    pub progress: u8,
    pub message: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub result: Option<SamplingStats>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskStatus {
    pub(crate) fn pending(id: TaskId, input: PathBuf, output: PathBuf, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            progress: 0,
            message: "Queued".to_string(),
            input,
            output,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Processing;
        self.message = "Detecting phone numbers".to_string();
        self.updated_at = now;
    }

    pub(crate) fn complete(&mut self, stats: SamplingStats, now: DateTime<Utc>) {
        self.state = TaskState::Completed;
        self.progress = 100;
        self.message = format!(
            "Done: {} frames, {} unique numbers",
            stats.total_frames,
            stats.unique_numbers.len()
        );
        self.result = Some(stats);
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    pub(crate) fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.state = TaskState::Failed;
        self.message = "Processing failed".to_string();
        self.error = Some(error);
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    /// Terminal and finished before `cutoff`
    pub(crate) fn expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.state.is_terminal() && self.finished_at.unwrap_or(self.updated_at) < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn status() -> TaskStatus {
        TaskStatus::pending(
            Uuid::new_v4(),
            PathBuf::from("in.mp4"),
            PathBuf::from("out.mp4"),
            Utc::now(),
        )
    }

    #[test]
    fn test_state_transitions() {
        let mut task = status();
        assert_eq!(task.state, TaskState::Pending);
        assert!(!task.state.is_terminal());

        task.start(Utc::now());
        assert_eq!(task.state, TaskState::Processing);

        task.complete(SamplingStats::default(), Utc::now());
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_only_finished_tasks_expire() {
        let now = Utc::now();
        let mut task = status();
        assert!(!task.expired(now + Duration::hours(100)));

        task.fail("boom".to_string(), now);
        assert!(!task.expired(now));
        assert!(task.expired(now + Duration::seconds(1)));
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskState::Completed).unwrap(), "\"completed\"");
        assert_eq!(TaskState::Processing.to_string(), "processing");
    }
}
