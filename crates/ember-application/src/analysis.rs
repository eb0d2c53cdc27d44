//! AI analysis invocation.
//!
//! Two independent paths, both non-fatal to the task outcome:
//!
//! - the legacy whole-log path writes `<logfile>.analysis.md` next to the
//!   run log,
//! - the richer context-bundle path collects configured directives and
//!   writes the report into the workspace (default `ai-analysis.md`).
//!
//! Both may fire for the same failure event when both are enabled; that
//! behavior is deliberate.

use crate::context::collect_context;
use ember_core::agent::{Agent, DEFAULT_ANALYSIS_PROMPT};
use ember_core::config::AiConfig;
use ember_core::error::{EmberError, Result};
use ember_core::task::TaskResult;
use std::path::{Path, PathBuf};
use tracing::info;

/// Logs are tail-truncated before analysis to keep prompts bounded.
const LOG_TAIL_LIMIT: usize = 8000;

/// Default output file for the context-bundle analysis.
const DEFAULT_OUTPUT_FILE: &str = "ai-analysis.md";

/// Runs the legacy whole-log analysis and writes `<logfile>.analysis.md`.
pub(crate) async fn analyze_log_file(agent: &dyn Agent, result: &TaskResult) -> Result<PathBuf> {
    let content = tokio::fs::read_to_string(&result.log_file)
        .await
        .map_err(|e| {
            EmberError::analysis(format!(
                "failed to read log {}: {}",
                result.log_file.display(),
                e
            ))
        })?;

    let analysis = agent.analyze_log(tail(&content, LOG_TAIL_LIMIT)).await?;

    let output = PathBuf::from(format!("{}.analysis.md", result.log_file.display()));
    tokio::fs::write(&output, analysis)
        .await
        .map_err(|e| EmberError::analysis(format!("failed to write analysis report: {}", e)))?;
    info!(report = %output.display(), "log analysis report written");
    Ok(output)
}

/// Runs the context-bundle analysis and writes the configured output file
/// inside the workspace.
pub(crate) async fn analyze_with_context(
    agent: &dyn Agent,
    ai: &AiConfig,
    result: &TaskResult,
) -> Result<PathBuf> {
    let bundle = collect_context(&ai.context, &result.workspace_dir, &result.log_file)?;

    let prompt = if ai.prompt.is_empty() {
        DEFAULT_ANALYSIS_PROMPT
    } else {
        &ai.prompt
    };

    let analysis = agent.analyze_with_context(prompt, &bundle).await?;

    let output_file = if ai.output_file.is_empty() {
        DEFAULT_OUTPUT_FILE
    } else {
        &ai.output_file
    };
    let output = if Path::new(output_file).is_absolute() {
        PathBuf::from(output_file)
    } else {
        result.workspace_dir.join(output_file)
    };

    tokio::fs::write(&output, analysis)
        .await
        .map_err(|e| EmberError::analysis(format!("failed to write analysis report: {}", e)))?;
    info!(report = %output.display(), "context analysis report written");
    Ok(output)
}

/// Returns at most the last `limit` bytes of `content`, aligned to a char
/// boundary.
fn tail(content: &str, limit: usize) -> &str {
    if content.len() <= limit {
        return content;
    }
    let mut start = content.len() - limit;
    while start < content.len() && !content.is_char_boundary(start) {
        start += 1;
    }
    &content[start..]
}
