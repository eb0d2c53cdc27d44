//! Executor trait.
//!
//! Defines the common contract shared by the container pipeline executor
//! and the shell task executor.

use crate::error::Result;
use crate::task::{TaskResult, TaskSpec};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// An abstract executor for one unit of work.
///
/// Both backends honor the same contract:
///
/// - the execution deadline is derived from the spec's configured timeout
///   (300s when zero/unset) and combined with the external cancellation
///   token; the underlying process or container is terminated promptly on
///   either,
/// - an ordered log file is written into the per-execution workspace with a
///   terminating summary line (success/exit-code or failure/error) on every
///   exit path,
/// - a metadata record is persisted at each terminal branch.
///
/// # Returns
///
/// - `Ok(TaskResult)` whenever a workspace and log exist — including
///   task-level failures, which populate [`TaskResult::error`]
/// - `Err(_)`: the spec was rejected or no workspace could be created
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes the task described by `spec`.
    async fn execute(&self, cancel: CancellationToken, spec: &TaskSpec) -> Result<TaskResult>;
}
