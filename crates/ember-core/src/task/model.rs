//! Task domain model.
//!
//! This module contains the core entities and value objects that represent
//! one unit of work (a repository pipeline or a shell task) as it moves
//! through the engine: the spec describing what to run, the result handed
//! back by an executor, and the metadata record persisted per execution.

use crate::config::{RepoConfig, ShellTaskConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The terminal status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The task completed successfully.
    Success,
    /// The task failed during execution.
    Failure,
}

/// The kind of executor backing a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    /// Container-based sync/build/test pipeline for a repository.
    #[serde(rename = "repo-pipeline")]
    RepoPipeline,
    /// Shell command or script task.
    #[serde(rename = "shell")]
    Shell,
}

/// What to execute.
///
/// The backend is a closed set of variants chosen at configuration time;
/// the coordinator dispatches to the matching executor based on the variant,
/// never on runtime type inspection.
#[derive(Debug, Clone)]
pub enum TaskSpec {
    /// Run the container pipeline for `repo` at `branch`.
    Pipeline { repo: RepoConfig, branch: String },
    /// Run a shell command or script.
    Shell(ShellTaskConfig),
}

impl TaskSpec {
    /// The configured name of the underlying task.
    pub fn name(&self) -> &str {
        match self {
            TaskSpec::Pipeline { repo, .. } => &repo.name,
            TaskSpec::Shell(task) => &task.name,
        }
    }

    /// The task type recorded in metadata.
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskSpec::Pipeline { .. } => TaskType::RepoPipeline,
            TaskSpec::Shell(_) => TaskType::Shell,
        }
    }

    /// The configured execution deadline in seconds (0 = default).
    pub fn timeout_secs(&self) -> u64 {
        match self {
            TaskSpec::Pipeline { repo, .. } => repo.timeout_secs,
            TaskSpec::Shell(task) => task.timeout_secs,
        }
    }
}

/// The outcome of one executor run.
///
/// A *task-level* failure (test failed, subprocess timed out) is still a
/// produced result: `error` is populated and the workspace/log paths remain
/// available for analysis and history. Executors reserve `Err` for failures
/// that prevent producing a result at all.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Unique task identity for this execution.
    pub id: String,
    /// Per-execution workspace directory.
    pub workspace_dir: PathBuf,
    /// Log file inside the workspace.
    pub log_file: PathBuf,
    /// Terminal error text, if the task failed.
    pub error: Option<String>,
}

impl TaskResult {
    /// Whether the execution reached a successful terminal state.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The terminal status for the metadata record.
    pub fn status(&self) -> TaskStatus {
        if self.is_success() {
            TaskStatus::Success
        } else {
            TaskStatus::Failure
        }
    }
}

/// The persisted record of one execution.
///
/// Written exactly once at terminal state and treated as immutable
/// thereafter; the metadata store re-reads these records to answer history
/// and statistics queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub task_id: String,
    pub task_name: String,
    pub task_type: TaskType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Execution duration in seconds (= end_time - start_time).
    pub duration: f64,
    pub status: TaskStatus,
    /// Terminal error text; empty on success.
    #[serde(default)]
    pub error: String,
    pub log_file: PathBuf,
    pub workspace_dir: PathBuf,
    /// Free-form snapshot of the task configuration at trigger time.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl TaskMetadata {
    /// Builds the terminal record for an executor run.
    pub fn from_result(
        result: &TaskResult,
        spec: &TaskSpec,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let config = match spec {
            TaskSpec::Pipeline { repo, .. } => {
                serde_json::to_value(repo).unwrap_or(serde_json::Value::Null)
            }
            TaskSpec::Shell(task) => {
                serde_json::to_value(task).unwrap_or(serde_json::Value::Null)
            }
        };

        Self {
            task_id: result.id.clone(),
            task_name: spec.name().to_string(),
            task_type: spec.task_type(),
            start_time,
            end_time,
            duration: (end_time - start_time).num_milliseconds() as f64 / 1000.0,
            status: result.status(),
            error: result.error.clone().unwrap_or_default(),
            log_file: result.log_file.clone(),
            workspace_dir: result.workspace_dir.clone(),
            config,
        }
    }
}

/// Aggregate statistics over a task's execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub task_name: String,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Success rate as a percentage (0.0 - 100.0).
    pub success_rate: f64,
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    /// The most recent execution in the window.
    pub last_execution: TaskMetadata,
    /// The earliest execution in the window.
    pub first_execution: TaskMetadata,
}
