//! Engine coordinator.
//!
//! Wires triggers (manual, scheduled, webhook-sourced — the callers are
//! external layers) to the matching executor, keeps the running-state and
//! schedule-registration bookkeeping behind one mutual-exclusion domain,
//! and invokes AI analysis on outcome.

use crate::analysis;
use chrono::Duration as ChronoDuration;
use ember_core::agent::Agent;
use ember_core::config::EngineConfig;
use ember_core::error::{EmberError, Result};
use ember_core::executor::Executor;
use ember_core::task::{TaskMetadata, TaskResult, TaskSpec, TaskStatistics};
use ember_execution::{PipelineExecutor, ShellExecutor};
use ember_infrastructure::MetadataStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A live schedule registration: cancelling the token stops the loop task.
pub(crate) struct ScheduleHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) handle: JoinHandle<()>,
}

/// All mutable bookkeeping, guarded by a single lock.
///
/// The critical sections only ever mutate the maps; blocking executor calls
/// never run under this lock.
#[derive(Default)]
pub(crate) struct EngineState {
    pub(crate) running: HashMap<String, bool>,
    pub(crate) schedules: HashMap<String, ScheduleHandle>,
    /// The global pipeline sweep registration, when installed.
    pub(crate) sweep: Option<ScheduleHandle>,
}

/// A consistent point-in-time view of one task's engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub name: String,
    pub running: bool,
    pub scheduled: bool,
}

/// The task orchestration engine.
pub struct Engine {
    config: EngineConfig,
    pipeline_executor: Arc<dyn Executor>,
    shell_executor: Arc<dyn Executor>,
    agent: Option<Arc<dyn Agent>>,
    store: MetadataStore,
    state: Arc<Mutex<EngineState>>,
}

impl Engine {
    /// Creates an engine with the default executors rooted at the
    /// configured workspace root.
    pub fn new(config: EngineConfig) -> Self {
        let store = MetadataStore::new(&config.workspace_root);
        let pipeline_executor = Arc::new(PipelineExecutor::new(&config.workspace_root));
        let shell_executor = Arc::new(ShellExecutor::new(&config.workspace_root));
        Self {
            config,
            pipeline_executor,
            shell_executor,
            agent: None,
            store,
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    /// Attaches an AI analysis agent.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The metadata store backing history queries.
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub(crate) fn state_handle(&self) -> Arc<Mutex<EngineState>> {
        Arc::clone(&self.state)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Triggers a repository pipeline.
    ///
    /// `branch` defaults to the repository's primary branch. Unknown names
    /// are returned as Config errors, never swallowed.
    pub async fn trigger(
        &self,
        name: &str,
        branch: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<TaskResult> {
        let repo = self
            .config
            .find_repo(name)
            .ok_or_else(|| EmberError::config(format!("unknown repository '{}'", name)))?;
        let branch = match branch {
            Some(branch) => branch.to_string(),
            None => repo
                .primary_branch()
                .ok_or_else(|| {
                    EmberError::config(format!("repository '{}' has no branches", name))
                })?
                .to_string(),
        };

        let legacy_analyze = repo.auto_analyze;
        let spec = TaskSpec::Pipeline {
            repo: repo.clone(),
            branch,
        };
        self.run(&*self.pipeline_executor, spec, legacy_analyze, cancel)
            .await
    }

    /// Triggers a shell task.
    pub async fn trigger_task(&self, name: &str, cancel: CancellationToken) -> Result<TaskResult> {
        let task = self
            .config
            .find_task(name)
            .ok_or_else(|| EmberError::config(format!("unknown task '{}'", name)))?;
        let spec = TaskSpec::Shell(task.clone());
        self.run(&*self.shell_executor, spec, false, cancel).await
    }

    async fn run(
        &self,
        executor: &dyn Executor,
        spec: TaskSpec,
        legacy_analyze: bool,
        cancel: CancellationToken,
    ) -> Result<TaskResult> {
        // The guard clears the flag on every exit path, success or failure
        let _guard = RunningGuard::set(&self.state, spec.name());

        let result = executor.execute(cancel, &spec).await?;
        self.handle_outcome(&result, legacy_analyze).await;
        Ok(result)
    }

    /// Routes the outcome to the enabled AI analysis paths.
    ///
    /// Both the legacy whole-log path and the context-bundle path fire
    /// independently when both are enabled; analysis failures are logged
    /// and never affect the task outcome.
    async fn handle_outcome(&self, result: &TaskResult, legacy_analyze: bool) {
        let Some(agent) = &self.agent else {
            return;
        };

        if !result.is_success() && legacy_analyze {
            if let Err(e) = analysis::analyze_log_file(agent.as_ref(), result).await {
                warn!(task_id = %result.id, error = %e, "log analysis failed");
            }
        }

        let ai = &self.config.ai;
        if ai.enabled && (!result.is_success() || ai.on_success) {
            if let Err(e) = analysis::analyze_with_context(agent.as_ref(), ai, result).await {
                warn!(task_id = %result.id, error = %e, "context analysis failed");
            }
        }
    }

    /// Returns status snapshots for one task or for every configured task.
    ///
    /// The snapshot is taken under the single lock guarding all mutable
    /// maps, so running-state and registration presence are consistent with
    /// each other.
    pub fn status(&self, name: Option<&str>) -> Result<Vec<StatusSnapshot>> {
        let names: Vec<String> = match name {
            Some(name) => {
                if self.config.find_repo(name).is_none() && self.config.find_task(name).is_none() {
                    return Err(EmberError::config(format!("unknown task '{}'", name)));
                }
                vec![name.to_string()]
            }
            None => self
                .config
                .repos
                .iter()
                .map(|r| r.name.clone())
                .chain(self.config.tasks.iter().map(|t| t.name.clone()))
                .collect(),
        };

        let state = self.lock_state();
        Ok(names
            .into_iter()
            .map(|name| StatusSnapshot {
                running: state.running.get(&name).copied().unwrap_or(false),
                scheduled: state.schedules.contains_key(&name),
                name,
            })
            .collect())
    }

    /// Lists a task's executions, most recent first.
    pub async fn list_executions(
        &self,
        name: &str,
        window: Option<ChronoDuration>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskMetadata>> {
        let mut executions = self.store.list_executions(name, window).await?;
        if let Some(limit) = limit {
            executions.truncate(limit);
        }
        Ok(executions)
    }

    /// Returns the most recent execution of a task.
    pub async fn latest_execution(&self, name: &str) -> Result<TaskMetadata> {
        self.store.latest_execution(name).await
    }

    /// Computes aggregate statistics over a task's history.
    pub async fn statistics(
        &self,
        name: &str,
        window: Option<ChronoDuration>,
    ) -> Result<TaskStatistics> {
        self.store.statistics(name, window).await
    }
}

/// Scoped running-state flag: set on construction, cleared on drop.
struct RunningGuard {
    state: Arc<Mutex<EngineState>>,
    name: String,
}

impl RunningGuard {
    fn set(state: &Arc<Mutex<EngineState>>, name: &str) -> Self {
        state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
            .insert(name.to_string(), true);
        Self {
            state: Arc::clone(state),
            name: name.to_string(),
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
            .insert(self.name.clone(), false);
    }
}
