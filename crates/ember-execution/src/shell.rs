//! Shell task executor.
//!
//! Runs an inline command or the verbatim contents of a script file through
//! `bash -c`, inheriting the parent environment. Stdout and stderr are
//! drained concurrently into the single workspace log file by two
//! independent copy tasks; interleaving between the two streams is
//! unordered, but both are fully drained before the run is finalized.

use crate::{effective_timeout, TASK_LOG_FILE};
use async_trait::async_trait;
use chrono::Utc;
use ember_core::config::ShellTaskConfig;
use ember_core::error::{EmberError, Result};
use ember_core::executor::Executor;
use ember_core::task::{TaskMetadata, TaskResult, TaskSpec};
use ember_infrastructure::{create_workspace, generate_task_id, MetadataStore};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Executes shell command/script tasks.
pub struct ShellExecutor {
    workspace_root: PathBuf,
    store: MetadataStore,
}

impl ShellExecutor {
    /// Creates a shell executor writing workspaces under `workspace_root`.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let store = MetadataStore::new(&workspace_root);
        Self {
            workspace_root,
            store,
        }
    }

    /// Resolves the command text for a task.
    ///
    /// Exactly one of `command` / `script_file` must be supplied. A script
    /// file is used verbatim.
    async fn resolve_command(task: &ShellTaskConfig) -> Result<String> {
        match (&task.command, &task.script_file) {
            (Some(_), Some(_)) => Err(EmberError::config(format!(
                "task '{}' sets both command and script_file",
                task.name
            ))),
            (None, None) => Err(EmberError::config(format!(
                "task '{}' sets neither command nor script_file",
                task.name
            ))),
            (Some(command), None) => Ok(command.clone()),
            (None, Some(script_file)) => {
                if !script_file.exists() {
                    return Err(EmberError::not_found(
                        "script file",
                        script_file.display().to_string(),
                    ));
                }
                tokio::fs::read_to_string(script_file).await.map_err(|e| {
                    EmberError::io(format!(
                        "Failed to read script file {}: {}",
                        script_file.display(),
                        e
                    ))
                })
            }
        }
    }

    /// Runs the resolved command, streaming output into `log_file`.
    ///
    /// Returns `Ok(())` only for a zero exit code; every other path (non-zero
    /// exit, deadline, cancellation) yields an execution error after the
    /// closing summary line has been written.
    async fn run_command(
        &self,
        cancel: &CancellationToken,
        command: &str,
        working_dir: Option<&Path>,
        log_file: &Path,
        timeout: std::time::Duration,
    ) -> Result<()> {
        let mut log = tokio::fs::File::create(log_file)
            .await
            .map_err(|e| EmberError::io(format!("Failed to create log file: {}", e)))?;

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EmberError::execution(format!("Failed to start command: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EmberError::internal("child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EmberError::internal("child stderr not captured"))?;

        // Two independent copy tasks share the log file descriptor; relative
        // ordering between the streams is unordered by contract.
        let mut stdout_sink = log.try_clone().await?;
        let mut stderr_sink = log.try_clone().await?;
        let stdout_task = tokio::spawn(async move {
            let mut stdout = stdout;
            let _ = tokio::io::copy(&mut stdout, &mut stdout_sink).await;
        });
        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let _ = tokio::io::copy(&mut stderr, &mut stderr_sink).await;
        });

        enum Exit {
            Status(std::process::ExitStatus),
            TimedOut,
            Cancelled,
        }

        let exit = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Exit::Status(status),
                Err(e) => {
                    return Err(EmberError::execution(format!("Failed to wait for command: {}", e)));
                }
            },
            _ = tokio::time::sleep(timeout) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Cancelled,
        };

        if matches!(exit, Exit::TimedOut | Exit::Cancelled) {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill timed-out subprocess");
            }
        }

        // Both streams must be fully drained before the run is finalized.
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let outcome = match exit {
            Exit::Status(status) => match status.code() {
                Some(0) => {
                    log.write_all(b"\n\n=== task completed ===\nexit code: 0\n")
                        .await?;
                    Ok(())
                }
                Some(code) => {
                    log.write_all(
                        format!("\n\n=== task failed ===\nexit code: {}\n", code).as_bytes(),
                    )
                    .await?;
                    Err(EmberError::execution(format!(
                        "command exited with code {}",
                        code
                    )))
                }
                None => {
                    log.write_all(b"\n\n=== task failed ===\nerror: terminated by signal\n")
                        .await?;
                    Err(EmberError::execution("command terminated by signal"))
                }
            },
            Exit::TimedOut => {
                log.write_all(
                    format!(
                        "\n\n=== task failed ===\nerror: timed out after {}s\n",
                        timeout.as_secs()
                    )
                    .as_bytes(),
                )
                .await?;
                Err(EmberError::execution(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )))
            }
            Exit::Cancelled => {
                log.write_all(b"\n\n=== task failed ===\nerror: execution cancelled\n")
                    .await?;
                Err(EmberError::execution("execution cancelled"))
            }
        };

        log.flush().await?;
        outcome
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, cancel: CancellationToken, spec: &TaskSpec) -> Result<TaskResult> {
        let task = match spec {
            TaskSpec::Shell(task) => task,
            TaskSpec::Pipeline { repo, .. } => {
                return Err(EmberError::config(format!(
                    "shell executor cannot run pipeline task '{}'",
                    repo.name
                )));
            }
        };

        let command = Self::resolve_command(task).await?;

        let start_time = Utc::now();
        let id = generate_task_id();
        let workspace_dir = create_workspace(&self.workspace_root, &id).await?;
        let log_file = workspace_dir.join(TASK_LOG_FILE);

        info!(task = %task.name, task_id = %id, workspace = %workspace_dir.display(), "running shell task");

        let timeout = effective_timeout(task.timeout_secs);
        let mut result = TaskResult {
            id,
            workspace_dir,
            log_file: log_file.clone(),
            error: None,
        };

        if let Err(e) = self
            .run_command(
                &cancel,
                &command,
                task.working_dir.as_deref(),
                &log_file,
                timeout,
            )
            .await
        {
            result.error = Some(e.to_string());
        }

        let metadata = TaskMetadata::from_result(&result, spec, start_time, Utc::now());
        if let Err(e) = self.store.save(&metadata).await {
            // Recording failures never override the task outcome
            warn!(task = %task.name, error = %e, "failed to persist task metadata");
        }

        if result.is_success() {
            info!(task = %task.name, task_id = %result.id, "shell task completed");
        } else {
            warn!(task = %task.name, task_id = %result.id, error = ?result.error, "shell task failed");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn shell_spec(task: ShellTaskConfig) -> TaskSpec {
        TaskSpec::Shell(task)
    }

    fn simple_task(name: &str, command: &str) -> ShellTaskConfig {
        ShellTaskConfig {
            name: name.to_string(),
            command: Some(command.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_command_writes_log_and_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(temp_dir.path());
        let spec = shell_spec(simple_task("hello", "echo hello-ember"));

        let result = executor
            .execute(CancellationToken::new(), &spec)
            .await
            .unwrap();

        assert!(result.is_success());
        let log = std::fs::read_to_string(&result.log_file).unwrap();
        assert!(log.contains("hello-ember"));
        assert!(log.contains("exit code: 0"));

        let store = MetadataStore::new(temp_dir.path());
        let metadata = store.load(&result.workspace_dir).await.unwrap();
        assert_eq!(metadata.task_name, "hello");
        assert_eq!(metadata.task_id, result.id);
        assert!(metadata.error.is_empty());
    }

    #[tokio::test]
    async fn test_both_streams_are_drained() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(temp_dir.path());
        let spec = shell_spec(simple_task("streams", "echo A && echo B 1>&2"));

        let result = executor
            .execute(CancellationToken::new(), &spec)
            .await
            .unwrap();

        assert!(result.is_success());
        let log = std::fs::read_to_string(&result.log_file).unwrap();
        assert!(log.contains("A"));
        assert!(log.contains("B"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_task_failure() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(temp_dir.path());
        let spec = shell_spec(simple_task("failing", "exit 3"));

        let result = executor
            .execute(CancellationToken::new(), &spec)
            .await
            .unwrap();

        assert!(!result.is_success());
        assert!(result.error.as_deref().unwrap().contains("code 3"));
        let log = std::fs::read_to_string(&result.log_file).unwrap();
        assert!(log.contains("exit code: 3"));
    }

    #[tokio::test]
    async fn test_timeout_kills_the_subprocess() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(temp_dir.path());
        let mut task = simple_task("sleepy", "sleep 5");
        task.timeout_secs = 2;
        let spec = shell_spec(task);

        let started = Instant::now();
        let result = executor
            .execute(CancellationToken::new(), &spec)
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(!result.is_success());
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert!(elapsed < std::time::Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cancellation_terminates_promptly() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(temp_dir.path());
        let spec = shell_spec(simple_task("cancelled", "sleep 30"));

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result = executor.execute(cancel, &spec).await.unwrap();

        assert!(!result.is_success());
        assert!(result.error.as_deref().unwrap().contains("cancelled"));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_script_file_runs_verbatim() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("job.sh");
        std::fs::write(&script, "echo from-script\n").unwrap();

        let executor = ShellExecutor::new(temp_dir.path().join("runs"));
        let spec = shell_spec(ShellTaskConfig {
            name: "scripted".to_string(),
            script_file: Some(script),
            ..Default::default()
        });

        let result = executor
            .execute(CancellationToken::new(), &spec)
            .await
            .unwrap();
        assert!(result.is_success());
        let log = std::fs::read_to_string(&result.log_file).unwrap();
        assert!(log.contains("from-script"));
    }

    #[tokio::test]
    async fn test_missing_script_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(temp_dir.path());
        let spec = shell_spec(ShellTaskConfig {
            name: "missing".to_string(),
            script_file: Some(temp_dir.path().join("nope.sh")),
            ..Default::default()
        });

        let err = executor
            .execute(CancellationToken::new(), &spec)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_command_source_must_be_exactly_one() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(temp_dir.path());

        let neither = shell_spec(ShellTaskConfig {
            name: "neither".to_string(),
            ..Default::default()
        });
        let err = executor
            .execute(CancellationToken::new(), &neither)
            .await
            .unwrap_err();
        assert!(err.is_config());

        let both = shell_spec(ShellTaskConfig {
            name: "both".to_string(),
            command: Some("echo hi".to_string()),
            script_file: Some(temp_dir.path().join("job.sh")),
            ..Default::default()
        });
        let err = executor
            .execute(CancellationToken::new(), &both)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_working_dir_override() {
        let temp_dir = TempDir::new().unwrap();
        let work = temp_dir.path().join("inside");
        std::fs::create_dir_all(&work).unwrap();

        let executor = ShellExecutor::new(temp_dir.path().join("runs"));
        let spec = shell_spec(ShellTaskConfig {
            name: "pwd".to_string(),
            command: Some("pwd".to_string()),
            working_dir: Some(work.clone()),
            ..Default::default()
        });

        let result = executor
            .execute(CancellationToken::new(), &spec)
            .await
            .unwrap();
        assert!(result.is_success());
        let log = std::fs::read_to_string(&result.log_file).unwrap();
        assert!(log.contains("inside"));
    }

    #[tokio::test]
    async fn test_pipeline_spec_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(temp_dir.path());
        let spec = TaskSpec::Pipeline {
            repo: ember_core::config::RepoConfig {
                name: "backend".to_string(),
                url: "https://example.com/x.git".to_string(),
                branches: vec!["main".to_string()],
                dockerfile: "Dockerfile".to_string(),
                test_cmd: "true".to_string(),
                timeout_secs: 0,
                auto_analyze: false,
            },
            branch: "main".to_string(),
        };

        let err = executor
            .execute(CancellationToken::new(), &spec)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }
}
