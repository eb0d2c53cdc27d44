//! Directory-backed metadata recorder and query engine.
//!
//! One `metadata.json` per execution workspace is the sole source of
//! execution history; there is no external database. Queries re-scan the
//! base directory and run a single linear pass — acceptable for the
//! expected per-task history volume.
//!
//! Directory structure:
//! ```text
//! base_dir/
//! ├── 20250812-153042-9f3a01c2/
//! │   ├── task.log
//! │   └── metadata.json
//! └── 20250812-160002-c41b77d0/
//!     └── metadata.json
//! ```

use chrono::{DateTime, Duration, Utc};
use ember_core::error::{EmberError, Result};
use ember_core::task::{TaskMetadata, TaskStatistics, TaskStatus};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the per-workspace record file.
pub const METADATA_FILE: &str = "metadata.json";

/// Directory-backed store for execution records.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    base_dir: PathBuf,
}

impl MetadataStore {
    /// Creates a store rooted at `base_dir` (the workspace root).
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The workspace root this store scans.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Persists a terminal record into its workspace directory.
    ///
    /// Records are written exactly once at terminal state; the store never
    /// rewrites an existing record.
    pub async fn save(&self, metadata: &TaskMetadata) -> Result<()> {
        if metadata.workspace_dir.as_os_str().is_empty() {
            return Err(EmberError::data_access("workspace_dir must not be empty"));
        }

        let path = metadata.workspace_dir.join(METADATA_FILE);
        let data = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| EmberError::data_access(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Loads the record from one workspace directory.
    pub async fn load(&self, workspace_dir: &Path) -> Result<TaskMetadata> {
        let path = workspace_dir.join(METADATA_FILE);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| EmberError::data_access(format!("Failed to read {}: {}", path.display(), e)))?;
        let metadata = serde_json::from_slice(&data)?;
        Ok(metadata)
    }

    /// Lists every available record under the base directory.
    ///
    /// Scans immediate subdirectories only; entries without a readable
    /// record are skipped. The result is sorted by start time, most recent
    /// first.
    pub async fn list_all(&self) -> Result<Vec<TaskMetadata>> {
        let mut entries = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| EmberError::data_access(format!(
                "Failed to read workspace root {}: {}",
                self.base_dir.display(),
                e
            )))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EmberError::data_access(e.to_string()))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match self.load(&path).await {
                Ok(metadata) => records.push(metadata),
                Err(e) => {
                    // Unreadable or missing records never fail the scan
                    debug!(workspace = %path.display(), error = %e, "skipping workspace without readable metadata");
                }
            }
        }

        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }

    /// Lists a task's executions, most recent first, optionally limited to
    /// records whose start time falls inside the trailing `window`.
    pub async fn list_executions(
        &self,
        task_name: &str,
        window: Option<Duration>,
    ) -> Result<Vec<TaskMetadata>> {
        let all = self.list_all().await?;
        let mut filtered = filter_by_task_name(all, task_name);
        if let Some(window) = window {
            let end = Utc::now();
            let start = end - window;
            filtered = filter_by_time_range(filtered, start, end);
        }
        Ok(filtered)
    }

    /// Returns the most recent execution of a task.
    ///
    /// # Errors
    ///
    /// Returns a NotFound error if the task has no recorded executions.
    pub async fn latest_execution(&self, task_name: &str) -> Result<TaskMetadata> {
        let executions = self.list_executions(task_name, None).await?;
        executions
            .into_iter()
            .next()
            .ok_or_else(|| EmberError::not_found("execution", task_name))
    }

    /// Computes aggregate statistics over a task's filtered history.
    ///
    /// A single linear pass over the filtered set yields total, success and
    /// failure counts, the success rate percentage, min/avg/max duration,
    /// and the earliest/latest record.
    ///
    /// # Errors
    ///
    /// Returns a NotFound error if the filtered set is empty.
    pub async fn statistics(
        &self,
        task_name: &str,
        window: Option<Duration>,
    ) -> Result<TaskStatistics> {
        let executions = self.list_executions(task_name, window).await?;
        compute_statistics(task_name, &executions)
    }
}

/// Keeps only records with an exact task-name match.
pub fn filter_by_task_name(records: Vec<TaskMetadata>, task_name: &str) -> Vec<TaskMetadata> {
    records
        .into_iter()
        .filter(|m| m.task_name == task_name)
        .collect()
}

/// Keeps only records whose start time lies inside `[start, end]`
/// (both bounds inclusive).
pub fn filter_by_time_range(
    records: Vec<TaskMetadata>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<TaskMetadata> {
    records
        .into_iter()
        .filter(|m| m.start_time >= start && m.start_time <= end)
        .collect()
}

fn compute_statistics(task_name: &str, executions: &[TaskMetadata]) -> Result<TaskStatistics> {
    if executions.is_empty() {
        return Err(EmberError::not_found("execution", task_name));
    }

    // Input is sorted most recent first
    let last_execution = executions[0].clone();
    let first_execution = executions[executions.len() - 1].clone();

    let mut success_count = 0;
    let mut failure_count = 0;
    let mut total_duration = 0.0;
    let mut min_duration = executions[0].duration;
    let mut max_duration = executions[0].duration;

    for record in executions {
        match record.status {
            TaskStatus::Success => success_count += 1,
            TaskStatus::Failure => failure_count += 1,
        }
        total_duration += record.duration;
        if record.duration < min_duration {
            min_duration = record.duration;
        }
        if record.duration > max_duration {
            max_duration = record.duration;
        }
    }

    let total_count = executions.len();
    Ok(TaskStatistics {
        task_name: task_name.to_string(),
        total_count,
        success_count,
        failure_count,
        success_rate: success_count as f64 / total_count as f64 * 100.0,
        avg_duration: total_duration / total_count as f64,
        min_duration,
        max_duration,
        last_execution,
        first_execution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::task::TaskType;
    use tempfile::TempDir;

    fn make_record(
        base: &Path,
        id: &str,
        name: &str,
        status: TaskStatus,
        start: DateTime<Utc>,
        duration: f64,
    ) -> TaskMetadata {
        let workspace = base.join(id);
        std::fs::create_dir_all(&workspace).unwrap();
        TaskMetadata {
            task_id: id.to_string(),
            task_name: name.to_string(),
            task_type: TaskType::Shell,
            start_time: start,
            end_time: start + Duration::milliseconds((duration * 1000.0) as i64),
            duration,
            status,
            error: match status {
                TaskStatus::Success => String::new(),
                TaskStatus::Failure => "exit code 1".to_string(),
            },
            log_file: workspace.join("task.log"),
            workspace_dir: workspace,
            config: serde_json::json!({"command": "echo hi"}),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = MetadataStore::new(temp_dir.path());

        let record = make_record(
            temp_dir.path(),
            "20250101-120000-aabbccdd",
            "nightly",
            TaskStatus::Success,
            Utc::now(),
            1.25,
        );
        store.save(&record).await.unwrap();

        let loaded = store.load(&record.workspace_dir).await.unwrap();
        assert_eq!(loaded.task_id, record.task_id);
        assert_eq!(loaded.task_name, record.task_name);
        assert_eq!(loaded.task_type, record.task_type);
        assert_eq!(loaded.start_time, record.start_time);
        assert_eq!(loaded.end_time, record.end_time);
        assert!((loaded.duration - record.duration).abs() < 1e-9);
        assert_eq!(loaded.status, record.status);
        assert_eq!(loaded.error, record.error);
        assert_eq!(loaded.log_file, record.log_file);
        assert_eq!(loaded.workspace_dir, record.workspace_dir);
        assert_eq!(loaded.config, record.config);
    }

    #[tokio::test]
    async fn test_list_all_sorts_and_skips_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let store = MetadataStore::new(temp_dir.path());
        let now = Utc::now();

        let older = make_record(
            temp_dir.path(),
            "20250101-100000-00000001",
            "nightly",
            TaskStatus::Success,
            now - Duration::hours(2),
            1.0,
        );
        let newer = make_record(
            temp_dir.path(),
            "20250101-120000-00000002",
            "nightly",
            TaskStatus::Failure,
            now,
            2.0,
        );
        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();

        // A workspace without a record and one with a corrupt record are skipped
        std::fs::create_dir_all(temp_dir.path().join("20250101-110000-00000003")).unwrap();
        let corrupt = temp_dir.path().join("20250101-113000-00000004");
        std::fs::create_dir_all(&corrupt).unwrap();
        std::fs::write(corrupt.join(METADATA_FILE), "{not json").unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].task_id, newer.task_id);
        assert_eq!(all[1].task_id, older.task_id);
    }

    #[tokio::test]
    async fn test_list_executions_window_filter() {
        let temp_dir = TempDir::new().unwrap();
        let store = MetadataStore::new(temp_dir.path());
        let now = Utc::now();

        let recent = make_record(
            temp_dir.path(),
            "20250101-120000-00000001",
            "nightly",
            TaskStatus::Success,
            now - Duration::minutes(30),
            1.0,
        );
        let old = make_record(
            temp_dir.path(),
            "20250101-100000-00000002",
            "nightly",
            TaskStatus::Success,
            now - Duration::hours(48),
            1.0,
        );
        let other = make_record(
            temp_dir.path(),
            "20250101-110000-00000003",
            "cleanup",
            TaskStatus::Success,
            now - Duration::minutes(5),
            1.0,
        );
        for r in [&recent, &old, &other] {
            store.save(r).await.unwrap();
        }

        let in_window = store
            .list_executions("nightly", Some(Duration::hours(24)))
            .await
            .unwrap();
        assert_eq!(in_window.len(), 1);
        assert_eq!(in_window[0].task_id, recent.task_id);

        let unbounded = store.list_executions("nightly", None).await.unwrap();
        assert_eq!(unbounded.len(), 2);
    }

    #[tokio::test]
    async fn test_statistics() {
        let temp_dir = TempDir::new().unwrap();
        let store = MetadataStore::new(temp_dir.path());
        let now = Utc::now();

        // 3 successes and 2 failures with known durations
        let specs = [
            (TaskStatus::Success, 1.0),
            (TaskStatus::Success, 2.0),
            (TaskStatus::Success, 3.0),
            (TaskStatus::Failure, 4.0),
            (TaskStatus::Failure, 5.0),
        ];
        for (i, (status, duration)) in specs.iter().enumerate() {
            let record = make_record(
                temp_dir.path(),
                &format!("20250101-1200{:02}-0000000{}", i, i),
                "nightly",
                *status,
                now - Duration::minutes(specs.len() as i64 - i as i64),
                *duration,
            );
            store.save(&record).await.unwrap();
        }

        let stats = store.statistics("nightly", None).await.unwrap();
        assert_eq!(stats.total_count, 5);
        assert_eq!(stats.success_count, 3);
        assert_eq!(stats.failure_count, 2);
        assert!((stats.success_rate - 60.0).abs() < 1e-9);
        assert!((stats.min_duration - 1.0).abs() < 1e-9);
        assert!((stats.max_duration - 5.0).abs() < 1e-9);
        assert!((stats.avg_duration - 3.0).abs() < 1e-9);
        // Most recent start time is the last one created
        assert!((stats.last_execution.duration - 5.0).abs() < 1e-9);
        assert!((stats.first_execution.duration - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_statistics_not_found_on_empty_set() {
        let temp_dir = TempDir::new().unwrap();
        let store = MetadataStore::new(temp_dir.path());

        let err = store.statistics("ghost", None).await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.latest_execution("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
