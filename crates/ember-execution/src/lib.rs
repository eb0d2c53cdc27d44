//! Executor backends for the Ember engine.
//!
//! Two implementations of the [`ember_core::executor::Executor`] contract:
//!
//! - [`ShellExecutor`] runs an inline command or a script file through
//!   `bash -c` with concurrent stdout/stderr capture.
//! - [`PipelineExecutor`] runs the container-based sync/build/test sequence
//!   for a repository, driving `git` and `docker` as external CLIs.
//!
//! Both derive their deadline from the task's configured timeout (300s when
//! unset), terminate promptly on cancellation, close the log with a summary
//! line on every exit path, and persist a metadata record at each terminal
//! branch.

mod pipeline;
mod shell;

pub use pipeline::PipelineExecutor;
pub use shell::ShellExecutor;

use std::time::Duration;

/// Log file name inside each workspace.
pub const TASK_LOG_FILE: &str = "task.log";

/// Default execution deadline when the task leaves the timeout unset.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Resolves the effective deadline for a configured timeout.
pub(crate) fn effective_timeout(timeout_secs: u64) -> Duration {
    if timeout_secs == 0 {
        Duration::from_secs(DEFAULT_TIMEOUT_SECS)
    } else {
        Duration::from_secs(timeout_secs)
    }
}
