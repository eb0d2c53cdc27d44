//! Configuration types for the Ember engine.
//!
//! These structs are consumed already parsed. Loading them from YAML (or any
//! other format) is the responsibility of the embedding application; the
//! engine only reads the resolved values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine configuration.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct EngineConfig {
    /// Global schedule expression for the pipeline sweep
    /// (e.g. `"every 1h"`, `"daily"`, or a cron expression).
    /// `None` disables the sweep.
    #[serde(default)]
    pub schedule: Option<String>,
    /// Base directory under which per-execution workspaces are created.
    pub workspace_root: PathBuf,
    /// Declared repository pipelines.
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
    /// Declared shell tasks.
    #[serde(default)]
    pub tasks: Vec<ShellTaskConfig>,
    /// Rich AI analysis configuration, shared by all tasks.
    #[serde(default)]
    pub ai: AiConfig,
}

impl EngineConfig {
    /// Finds a repository pipeline by name.
    pub fn find_repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Finds a shell task by name.
    pub fn find_task(&self, name: &str) -> Option<&ShellTaskConfig> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// A container-based source-repository test pipeline.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RepoConfig {
    pub name: String,
    pub url: String,
    /// Tracked branches. The first entry is the primary branch used by the
    /// scheduled sweep.
    pub branches: Vec<String>,
    pub dockerfile: String,
    pub test_cmd: String,
    /// Execution deadline in seconds. Zero/unset means the 300s default.
    #[serde(default)]
    pub timeout_secs: u64,
    /// Whether a failed run triggers the legacy whole-log AI analysis.
    #[serde(default)]
    pub auto_analyze: bool,
}

impl RepoConfig {
    /// Returns the primary branch (the sweep target).
    pub fn primary_branch(&self) -> Option<&str> {
        self.branches.first().map(String::as_str)
    }
}

/// An arbitrary shell command or script task.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ShellTaskConfig {
    pub name: String,
    /// Inline command text. Exactly one of `command` / `script_file` must be
    /// set.
    #[serde(default)]
    pub command: Option<String>,
    /// Script file whose verbatim contents are executed.
    #[serde(default)]
    pub script_file: Option<PathBuf>,
    /// Working directory override for the subprocess.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Execution deadline in seconds. Zero/unset means the 300s default.
    #[serde(default)]
    pub timeout_secs: u64,
    /// Per-task schedule expression. `None` means manual-only.
    #[serde(default)]
    pub schedule: Option<String>,
}

/// Rich AI analysis configuration.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Ordered context directives: the reserved keyword `"log"`, a glob
    /// pattern, or a `**` recursive pattern, all relative to the workspace.
    #[serde(default)]
    pub context: Vec<String>,
    /// Analysis prompt. Empty means the built-in default.
    #[serde(default)]
    pub prompt: String,
    /// Output file inside the workspace. Empty means `ai-analysis.md`.
    #[serde(default)]
    pub output_file: String,
    /// Whether the analysis also fires on success.
    #[serde(default)]
    pub on_success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_by_name() {
        let cfg = EngineConfig {
            workspace_root: PathBuf::from("/tmp/ember"),
            repos: vec![RepoConfig {
                name: "backend".to_string(),
                url: "https://example.com/backend.git".to_string(),
                branches: vec!["main".to_string(), "dev".to_string()],
                dockerfile: "Dockerfile".to_string(),
                test_cmd: "cargo test".to_string(),
                timeout_secs: 0,
                auto_analyze: false,
            }],
            tasks: vec![ShellTaskConfig {
                name: "cleanup".to_string(),
                command: Some("echo done".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };

        assert_eq!(cfg.find_repo("backend").unwrap().primary_branch(), Some("main"));
        assert!(cfg.find_repo("frontend").is_none());
        assert!(cfg.find_task("cleanup").is_some());
        assert!(cfg.find_task("backend").is_none());
    }
}
