//! Container pipeline executor.
//!
//! Runs the fail-fast sync -> build -> test sequence for a repository task:
//! shallow-clone or force-update the source, build a deterministically
//! tagged image, run the test command in a fresh container, copy the
//! container log into the workspace, and always remove the container
//! afterwards. `git` and `docker` are driven as external CLIs and assumed
//! available.

use crate::{effective_timeout, TASK_LOG_FILE};
use async_trait::async_trait;
use chrono::Utc;
use ember_core::config::RepoConfig;
use ember_core::error::{EmberError, Result};
use ember_core::executor::Executor;
use ember_core::task::{TaskMetadata, TaskResult, TaskSpec};
use ember_infrastructure::{create_workspace, generate_task_id, MetadataStore};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fixed in-container path the test command output is redirected to.
const CONTAINER_LOG_PATH: &str = "/task.log";

/// Executes container-based repository pipelines.
pub struct PipelineExecutor {
    workspace_root: PathBuf,
    /// Checkouts live under `<sources_dir>/<repo>/<branch>` and are reused
    /// across runs.
    sources_dir: PathBuf,
    image_prefix: String,
    store: MetadataStore,
}

impl PipelineExecutor {
    /// Creates a pipeline executor writing workspaces under `workspace_root`.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let store = MetadataStore::new(&workspace_root);
        Self {
            workspace_root,
            sources_dir: std::env::temp_dir().join("ember").join("sources"),
            image_prefix: "ember-".to_string(),
            store,
        }
    }

    /// Overrides the checkout directory.
    pub fn with_sources_dir(mut self, sources_dir: impl Into<PathBuf>) -> Self {
        self.sources_dir = sources_dir.into();
        self
    }

    /// Overrides the image tag prefix.
    pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_prefix = prefix.into();
        self
    }

    fn work_dir(&self, repo: &RepoConfig, branch: &str) -> PathBuf {
        self.sources_dir.join(&repo.name).join(branch)
    }

    fn image_tag(&self, repo: &RepoConfig, branch: &str) -> String {
        format!("{}{}:{}", self.image_prefix, repo.name.to_lowercase(), branch)
    }

    /// Runs one external command, appending a step header plus the combined
    /// output to the log file, and returns the captured stdout.
    ///
    /// Terminates the command promptly when the deadline passes or the
    /// token fires; error messages are plain text so callers can wrap them
    /// in the step-appropriate variant.
    async fn step(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        log_file: &Path,
        step_name: &str,
        program: &str,
        args: &[&str],
    ) -> std::result::Result<String, String> {
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .await
            .map_err(|e| format!("failed to open log file: {}", e))?;
        log.write_all(format!("--- [{}] {} {}\n", step_name, program, args.join(" ")).as_bytes())
            .await
            .map_err(|e| e.to_string())?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", program, e))?;

        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| format!("failed to wait for {}: {}", program, e))?
            }
            _ = tokio::time::sleep_until(deadline) => {
                // kill_on_drop reaps the child when the future is dropped
                log.write_all(b"(step timed out)\n").await.ok();
                return Err("timed out".to_string());
            }
            _ = cancel.cancelled() => {
                log.write_all(b"(step cancelled)\n").await.ok();
                return Err("execution cancelled".to_string());
            }
        };

        log.write_all(&output.stdout).await.map_err(|e| e.to_string())?;
        log.write_all(&output.stderr).await.map_err(|e| e.to_string())?;
        log.flush().await.ok();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(format!(
                "{} exited with {}: {}",
                program, output.status, tail
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Step 1 — shallow clone at the branch, or force-update an existing
    /// checkout to `origin/<branch>`.
    async fn sync_source(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        repo: &RepoConfig,
        branch: &str,
        work_dir: &Path,
        log_file: &Path,
    ) -> Result<()> {
        if !work_dir.exists() {
            if let Some(parent) = work_dir.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let dir = work_dir.display().to_string();
            self.step(
                cancel,
                deadline,
                log_file,
                "sync",
                "git",
                &["clone", "--depth", "1", "--branch", branch, &repo.url, &dir],
            )
            .await
            .map_err(|e| EmberError::sync(format!("clone of {} failed: {}", repo.name, e)))?;
            return Ok(());
        }

        let dir = work_dir.display().to_string();
        self.step(
            cancel,
            deadline,
            log_file,
            "sync",
            "git",
            &["-C", &dir, "fetch", "origin", branch],
        )
        .await
        .map_err(|e| EmberError::sync(format!("fetch of {} failed: {}", repo.name, e)))?;

        let target = format!("origin/{}", branch);
        self.step(
            cancel,
            deadline,
            log_file,
            "sync",
            "git",
            &["-C", &dir, "reset", "--hard", &target],
        )
        .await
        .map_err(|e| EmberError::sync(format!("reset of {} failed: {}", repo.name, e)))?;
        Ok(())
    }

    /// Step 2 — build the deterministically tagged image.
    async fn build_image(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        repo: &RepoConfig,
        tag: &str,
        work_dir: &Path,
        log_file: &Path,
    ) -> Result<()> {
        let dockerfile = work_dir.join(&repo.dockerfile).display().to_string();
        let context = work_dir.display().to_string();
        self.step(
            cancel,
            deadline,
            log_file,
            "build",
            "docker",
            &["build", "-t", tag, "-f", &dockerfile, &context],
        )
        .await
        .map_err(|e| EmberError::build(format!("image build for {} failed: {}", repo.name, e)))?;
        Ok(())
    }

    /// Step 3 — run the test command in a fresh container, copy the log out,
    /// and always remove the container afterwards (best-effort).
    async fn run_test(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        repo: &RepoConfig,
        tag: &str,
        workspace_dir: &Path,
        log_file: &Path,
    ) -> Result<()> {
        let redirected = format!("{} > {} 2>&1", repo.test_cmd, CONTAINER_LOG_PATH);
        let created = self
            .step(
                cancel,
                deadline,
                log_file,
                "test",
                "docker",
                &["create", tag, "sh", "-c", &redirected],
            )
            .await
            .map_err(EmberError::execution)?;
        let container_id = created
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .to_string();
        if container_id.is_empty() {
            return Err(EmberError::execution("docker create returned no container id"));
        }

        let outcome = self
            .run_container(cancel, deadline, &container_id, workspace_dir, log_file)
            .await;

        // Cleanup is unconditional regardless of success/failure
        if let Err(e) = Command::new("docker")
            .args(["rm", "-f", &container_id])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            warn!(container = %container_id, error = %e, "container removal failed");
        }

        outcome
    }

    async fn run_container(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        container_id: &str,
        workspace_dir: &Path,
        log_file: &Path,
    ) -> Result<()> {
        self.step(
            cancel,
            deadline,
            log_file,
            "test",
            "docker",
            &["start", container_id],
        )
        .await
        .map_err(EmberError::execution)?;

        // Blocks until the container reaches a non-running state; stdout
        // carries the exit code.
        let wait_out = self
            .step(
                cancel,
                deadline,
                log_file,
                "test",
                "docker",
                &["wait", container_id],
            )
            .await
            .map_err(EmberError::execution)?;
        let exit_code: i64 = wait_out.trim().parse().unwrap_or(-1);

        // Copy the in-container log out even when the test failed
        self.copy_container_log(container_id, workspace_dir, log_file)
            .await?;

        if exit_code != 0 {
            return Err(EmberError::execution(format!(
                "test command exited with code {}",
                exit_code
            )));
        }
        Ok(())
    }

    /// Copies the in-container log into the workspace log file.
    async fn copy_container_log(
        &self,
        container_id: &str,
        workspace_dir: &Path,
        log_file: &Path,
    ) -> Result<()> {
        let staging = workspace_dir.join(".container.log");
        let source = format!("{}:{}", container_id, CONTAINER_LOG_PATH);
        let dest = staging.display().to_string();
        let output = Command::new("docker")
            .args(["cp", &source, &dest])
            .output()
            .await
            .map_err(|e| EmberError::execution(format!("docker cp failed: {}", e)))?;
        if !output.status.success() {
            return Err(EmberError::execution(format!(
                "docker cp failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let content = tokio::fs::read(&staging).await?;
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .await?;
        log.write_all(b"--- [test] container output\n").await?;
        log.write_all(&content).await?;
        log.flush().await?;
        tokio::fs::remove_file(&staging).await.ok();
        Ok(())
    }

    async fn run_pipeline(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        repo: &RepoConfig,
        branch: &str,
        workspace_dir: &Path,
        log_file: &Path,
    ) -> Result<()> {
        let work_dir = self.work_dir(repo, branch);
        let tag = self.image_tag(repo, branch);

        info!(repo = %repo.name, branch = %branch, "syncing source");
        self.sync_source(cancel, deadline, repo, branch, &work_dir, log_file)
            .await?;

        info!(repo = %repo.name, tag = %tag, "building image");
        self.build_image(cancel, deadline, repo, &tag, &work_dir, log_file)
            .await?;

        info!(repo = %repo.name, tag = %tag, "running test container");
        self.run_test(cancel, deadline, repo, &tag, workspace_dir, log_file)
            .await
    }

    async fn append_summary(&self, log_file: &Path, error: Option<&str>) {
        let line = match error {
            None => "\n\n=== pipeline completed ===\nexit code: 0\n".to_string(),
            Some(e) => format!("\n\n=== pipeline failed ===\nerror: {}\n", e),
        };
        let open = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .await;
        match open {
            Ok(mut log) => {
                let _ = log.write_all(line.as_bytes()).await;
                let _ = log.flush().await;
            }
            Err(e) => warn!(error = %e, "failed to append log summary"),
        }
    }
}

#[async_trait]
impl Executor for PipelineExecutor {
    async fn execute(&self, cancel: CancellationToken, spec: &TaskSpec) -> Result<TaskResult> {
        let (repo, branch) = match spec {
            TaskSpec::Pipeline { repo, branch } => (repo, branch.as_str()),
            TaskSpec::Shell(task) => {
                return Err(EmberError::config(format!(
                    "pipeline executor cannot run shell task '{}'",
                    task.name
                )));
            }
        };

        let start_time = Utc::now();
        let id = generate_task_id();
        let workspace_dir = create_workspace(&self.workspace_root, &id).await?;
        let log_file = workspace_dir.join(TASK_LOG_FILE);
        let deadline = Instant::now() + effective_timeout(repo.timeout_secs);

        info!(repo = %repo.name, branch = %branch, task_id = %id, "running pipeline");

        let mut result = TaskResult {
            id,
            workspace_dir: workspace_dir.clone(),
            log_file: log_file.clone(),
            error: None,
        };

        if let Err(e) = self
            .run_pipeline(&cancel, deadline, repo, branch, &workspace_dir, &log_file)
            .await
        {
            result.error = Some(e.to_string());
        }

        self.append_summary(&log_file, result.error.as_deref()).await;

        let metadata = TaskMetadata::from_result(&result, spec, start_time, Utc::now());
        if let Err(e) = self.store.save(&metadata).await {
            // Recording failures never override the task outcome
            warn!(repo = %repo.name, error = %e, "failed to persist task metadata");
        }

        if result.is_success() {
            info!(repo = %repo.name, task_id = %result.id, "pipeline completed");
        } else {
            warn!(repo = %repo.name, task_id = %result.id, error = ?result.error, "pipeline failed");
        }
        Ok(result)
    }
}
