//! Task identity and workspace lifecycle.
//!
//! Every trigger gets a fresh identity and an isolated workspace directory
//! `<base_dir>/<task_id>` holding the log file, the metadata record, and
//! optional analysis output. Workspaces are never reused and never deleted
//! by the engine (retention is manual).

use chrono::Local;
use ember_core::error::{EmberError, Result};
use std::path::{Path, PathBuf};

/// Generates a unique task identity.
///
/// Combines a second-precision timestamp with a 4-byte random hex suffix,
/// e.g. `20250812-153042-9f3a01c2`. The random suffix keeps concurrent
/// same-second calls collision resistant.
pub fn generate_task_id() -> String {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let random_bytes: [u8; 4] = rand::random();
    let suffix: String = random_bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", timestamp, suffix)
}

/// Creates the workspace directory for a task and returns its path.
///
/// The creation is recursive and idempotent: calling it again for an
/// existing task id succeeds and leaves existing files untouched.
///
/// # Errors
///
/// Returns an IO error if the filesystem rejects the operation
/// (permissions, quota).
pub async fn create_workspace(base_dir: &Path, task_id: &str) -> Result<PathBuf> {
    let workspace = base_dir.join(task_id);
    tokio::fs::create_dir_all(&workspace)
        .await
        .map_err(|e| EmberError::io(format!("Failed to create workspace {}: {}", workspace.display(), e)))?;
    Ok(workspace)
}
