//! Context collector.
//!
//! Builds the ephemeral key -> content bundle handed to the AI agent.
//! Directives are processed in order:
//!
//! - the reserved keyword `"log"` maps to the run log content,
//! - a directive containing `**` walks the directory tree under its prefix
//!   and collects every regular file whose base name matches the suffix,
//! - anything else is a direct glob expression relative to the workspace.
//!
//! Unreadable files are skipped silently; malformed patterns abort the
//! whole bundle.

use ember_core::agent::ContextBundle;
use ember_core::error::{EmberError, Result};
use std::path::{Path, PathBuf};

/// Reserved directive mapping to the run log.
pub const LOG_CONTEXT_KEY: &str = "log";

/// Builds a context bundle from an ordered list of directives.
pub fn collect_context(
    directives: &[String],
    workspace_dir: &Path,
    log_file: &Path,
) -> Result<ContextBundle> {
    let mut bundle = ContextBundle::new();

    for directive in directives {
        if directive == LOG_CONTEXT_KEY {
            let content = std::fs::read_to_string(log_file).map_err(|e| {
                EmberError::io(format!(
                    "Failed to read log file {}: {}",
                    log_file.display(),
                    e
                ))
            })?;
            bundle.insert(LOG_CONTEXT_KEY.to_string(), content);
        } else if directive.contains("**") {
            collect_recursive(directive, workspace_dir, &mut bundle)?;
        } else {
            collect_glob(directive, workspace_dir, &mut bundle)?;
        }
    }

    Ok(bundle)
}

/// Collects files under a `<prefix>/**/<suffix>` recursive directive.
fn collect_recursive(
    pattern: &str,
    workspace_dir: &Path,
    bundle: &mut ContextBundle,
) -> Result<()> {
    let parts: Vec<&str> = pattern.split("**").collect();
    if parts.len() != 2 {
        return Err(EmberError::config(format!(
            "unsupported recursive pattern '{}'",
            pattern
        )));
    }

    let prefix = parts[0].trim_end_matches('/');
    let suffix = parts[1].trim_start_matches('/');

    let search_root = if Path::new(prefix).is_absolute() {
        PathBuf::from(prefix)
    } else if prefix.is_empty() {
        workspace_dir.to_path_buf()
    } else {
        workspace_dir.join(prefix)
    };

    let matcher = glob::Pattern::new(suffix)
        .map_err(|e| EmberError::config(format!("invalid pattern '{}': {}", pattern, e)))?;

    // Iterative walk; traversal errors are ignored and the walk continues
    let mut pending = vec![search_root];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let base_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !matcher.matches(base_name) {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(&path) {
                bundle.insert(relative_key(&path, workspace_dir), content);
            }
        }
    }

    Ok(())
}

/// Collects files matching a direct glob expression.
fn collect_glob(pattern: &str, workspace_dir: &Path, bundle: &mut ContextBundle) -> Result<()> {
    let search_path = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        workspace_dir.join(pattern).display().to_string()
    };

    let matches = glob::glob(&search_path)
        .map_err(|e| EmberError::config(format!("path match failed [{}]: {}", pattern, e)))?;

    for path in matches.flatten() {
        if path.is_dir() {
            continue;
        }
        if let Ok(content) = std::fs::read_to_string(&path) {
            bundle.insert(relative_key(&path, workspace_dir), content);
        }
    }

    Ok(())
}

/// Keys are paths relative to the workspace; files outside it fall back to
/// their base name.
fn relative_key(path: &Path, workspace_dir: &Path) -> String {
    match path.strip_prefix(workspace_dir) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.display().to_string(),
        _ => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
    }
}
