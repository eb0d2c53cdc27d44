//! Dynamic scheduler.
//!
//! Owns one global registration sweeping every declared pipeline on its
//! primary branch, plus independently startable/stoppable per-task
//! registrations for shell tasks. Every registration is a cancellable
//! loop task; ticks submit work to the coordinator exactly as a manual
//! trigger would, as detached executions gated by a bounded semaphore.

use crate::engine::{Engine, EngineState, ScheduleHandle};
use crate::schedule::Schedule;
use chrono::Utc;
use ember_core::error::{EmberError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on simultaneously running scheduled executions.
pub const MAX_CONCURRENT_SCHEDULED_TASKS: usize = 4;

/// What a registration triggers on each tick.
enum ScheduledAction {
    /// Trigger every declared pipeline on its primary branch.
    Sweep,
    /// Trigger one shell task by name.
    Task(String),
}

/// Manages periodic trigger registrations.
///
/// All registration bookkeeping (the global sweep included) lives in the
/// engine's single mutual-exclusion domain.
pub struct Scheduler {
    engine: Arc<Engine>,
    state: Arc<Mutex<EngineState>>,
    shutdown: CancellationToken,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    /// Creates a scheduler driving the given engine.
    pub fn new(engine: Arc<Engine>) -> Self {
        let state = engine.state_handle();
        Self {
            engine,
            state,
            shutdown: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_SCHEDULED_TASKS)),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs the global pipeline sweep, when the engine config declares
    /// a schedule. A config without one simply never sweeps.
    pub fn start_sweep(&self) -> Result<()> {
        let Some(expr) = self.engine.config().schedule.as_deref() else {
            return Ok(());
        };
        let schedule = Schedule::parse(expr)?;

        let mut state = self.lock_state();
        if state.sweep.is_some() {
            return Err(EmberError::config("pipeline sweep already started"));
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(run_schedule_loop(
            Arc::clone(&self.engine),
            Arc::clone(&self.permits),
            cancel.clone(),
            schedule,
            ScheduledAction::Sweep,
        ));
        state.sweep = Some(ScheduleHandle { cancel, handle });
        info!(schedule = %expr, "pipeline sweep started");
        Ok(())
    }

    /// Starts the periodic registration for a shell task.
    ///
    /// # Errors
    ///
    /// Returns a Config error when the task is unknown, has no configured
    /// schedule, or is already registered.
    pub fn start_task(&self, name: &str) -> Result<()> {
        let task = self
            .engine
            .config()
            .find_task(name)
            .ok_or_else(|| EmberError::config(format!("unknown task '{}'", name)))?;
        let expr = task.schedule.as_deref().ok_or_else(|| {
            EmberError::config(format!("task '{}' has no configured schedule", name))
        })?;
        let schedule = Schedule::parse(expr)?;

        let mut state = self.lock_state();
        if state.schedules.contains_key(name) {
            return Err(EmberError::config(format!(
                "task '{}' is already scheduled",
                name
            )));
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(run_schedule_loop(
            Arc::clone(&self.engine),
            Arc::clone(&self.permits),
            cancel.clone(),
            schedule,
            ScheduledAction::Task(name.to_string()),
        ));
        state
            .schedules
            .insert(name.to_string(), ScheduleHandle { cancel, handle });
        info!(task = %name, schedule = %expr, "task schedule started");
        Ok(())
    }

    /// Stops the periodic registration for a shell task.
    ///
    /// # Errors
    ///
    /// Returns a Config error when no active registration exists.
    pub fn stop_task(&self, name: &str) -> Result<()> {
        let removed = self.lock_state().schedules.remove(name).ok_or_else(|| {
            EmberError::config(format!("task '{}' has no active schedule", name))
        })?;
        removed.cancel.cancel();
        info!(task = %name, "task schedule stopped");
        Ok(())
    }

    /// Stops all registrations and waits up to `grace` for the in-flight
    /// scheduler loops to finish (not the detached executions they
    /// spawned).
    ///
    /// Returns whether everything finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();

        let mut handles = Vec::new();
        {
            let mut state = self.lock_state();
            if let Some(sweep) = state.sweep.take() {
                handles.push(sweep.handle);
            }
            for (_, registration) in state.schedules.drain() {
                handles.push(registration.handle);
            }
        }

        let drained = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        let completed = tokio::time::timeout(grace, drained).await.is_ok();
        if !completed {
            warn!("scheduler shutdown exceeded grace period");
        }
        completed
    }
}

/// One registration loop: sleep until the next tick, then fire.
async fn run_schedule_loop(
    engine: Arc<Engine>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    schedule: Schedule,
    action: ScheduledAction,
) {
    loop {
        let Some(delay) = schedule.next_delay(Utc::now()) else {
            warn!("schedule has no future occurrence, stopping loop");
            return;
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        match &action {
            ScheduledAction::Sweep => {
                for repo in &engine.config().repos {
                    match repo.primary_branch() {
                        Some(branch) => spawn_trigger(
                            Arc::clone(&engine),
                            Arc::clone(&permits),
                            repo.name.clone(),
                            Some(branch.to_string()),
                        ),
                        None => {
                            warn!(repo = %repo.name, "pipeline has no branches, skipping sweep")
                        }
                    }
                }
            }
            ScheduledAction::Task(name) => spawn_trigger(
                Arc::clone(&engine),
                Arc::clone(&permits),
                name.clone(),
                None,
            ),
        }
    }
}

/// Submits one detached execution, gated by the bounded semaphore.
fn spawn_trigger(
    engine: Arc<Engine>,
    permits: Arc<Semaphore>,
    name: String,
    branch: Option<String>,
) {
    tokio::spawn(async move {
        let _permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // semaphore closed, engine is going away
        };
        let cancel = CancellationToken::new();
        let outcome = match &branch {
            Some(branch) => engine.trigger(&name, Some(branch), cancel).await,
            None => engine.trigger_task(&name, cancel).await,
        };
        match outcome {
            Ok(result) if result.is_success() => {
                info!(task = %name, task_id = %result.id, "scheduled execution completed");
            }
            Ok(result) => {
                warn!(task = %name, task_id = %result.id, error = ?result.error, "scheduled execution failed");
            }
            Err(e) => warn!(task = %name, error = %e, "scheduled trigger failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::config::{EngineConfig, ShellTaskConfig};
    use tempfile::TempDir;

    fn scheduled_task(name: &str, command: &str, schedule: Option<&str>) -> ShellTaskConfig {
        ShellTaskConfig {
            name: name.to_string(),
            command: Some(command.to_string()),
            schedule: schedule.map(String::from),
            ..Default::default()
        }
    }

    fn scheduler_with(temp_dir: &TempDir, tasks: Vec<ShellTaskConfig>) -> (Scheduler, Arc<Engine>) {
        let engine = Arc::new(Engine::new(EngineConfig {
            workspace_root: temp_dir.path().to_path_buf(),
            tasks,
            ..Default::default()
        }));
        (Scheduler::new(Arc::clone(&engine)), engine)
    }

    #[tokio::test]
    async fn test_start_task_validation() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, _engine) = scheduler_with(
            &temp_dir,
            vec![
                scheduled_task("manual", "true", None),
                scheduled_task("periodic", "true", Some("every 1h")),
            ],
        );

        // Unknown task
        assert!(scheduler.start_task("ghost").unwrap_err().is_config());
        // No configured schedule
        assert!(scheduler.start_task("manual").unwrap_err().is_config());
        // Duplicate registration
        scheduler.start_task("periodic").unwrap();
        assert!(scheduler.start_task("periodic").unwrap_err().is_config());

        scheduler.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_stop_start_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, engine) = scheduler_with(
            &temp_dir,
            vec![scheduled_task("periodic", "true", Some("every 1h"))],
        );

        // Stop before start fails
        assert!(scheduler.stop_task("periodic").unwrap_err().is_config());

        // start -> stop -> start succeeds, with status reflecting each step
        scheduler.start_task("periodic").unwrap();
        assert!(engine.status(Some("periodic")).unwrap()[0].scheduled);
        scheduler.stop_task("periodic").unwrap();
        assert!(!engine.status(Some("periodic")).unwrap()[0].scheduled);
        scheduler.start_task("periodic").unwrap();

        scheduler.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_scheduled_task_fires() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, engine) = scheduler_with(
            &temp_dir,
            vec![scheduled_task("ticker", "echo tick", Some("every 1s"))],
        );

        scheduler.start_task("ticker").unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(scheduler.shutdown(Duration::from_secs(2)).await);

        // Detached executions persist records as manual triggers would
        tokio::time::sleep(Duration::from_millis(500)).await;
        let executions = engine.list_executions("ticker", None, None).await.unwrap();
        assert!(!executions.is_empty());
        assert!(executions.iter().all(|m| m.task_name == "ticker"));
    }

    #[tokio::test]
    async fn test_sweep_registration_is_exclusive_and_cleared_by_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Arc::new(Engine::new(EngineConfig {
            schedule: Some("every 1h".to_string()),
            workspace_root: temp_dir.path().to_path_buf(),
            ..Default::default()
        }));
        let scheduler = Scheduler::new(Arc::clone(&engine));

        scheduler.start_sweep().unwrap();
        assert!(scheduler.start_sweep().unwrap_err().is_config());

        assert!(scheduler.shutdown(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_sweep_without_engine_schedule_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, _engine) = scheduler_with(&temp_dir, vec![]);

        // No engine-level schedule: nothing to install, repeatedly callable
        scheduler.start_sweep().unwrap();
        scheduler.start_sweep().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_completes_within_grace() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, _engine) = scheduler_with(
            &temp_dir,
            vec![scheduled_task("periodic", "true", Some("every 1h"))],
        );
        scheduler.start_task("periodic").unwrap();

        assert!(scheduler.shutdown(Duration::from_secs(2)).await);
        // All registrations are forgotten after shutdown
        assert!(scheduler.stop_task("periodic").unwrap_err().is_config());
    }

    #[tokio::test]
    async fn test_invalid_schedule_expression_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, _engine) = scheduler_with(
            &temp_dir,
            vec![scheduled_task("weird", "true", Some("whenever"))],
        );
        assert!(scheduler.start_task("weird").unwrap_err().is_config());
    }
}
