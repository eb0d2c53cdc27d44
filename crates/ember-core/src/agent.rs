//! Agent trait.
//!
//! The AI analysis capability is an external collaborator; the engine only
//! depends on this narrow seam. The concrete backend (which model, which
//! API) is out of scope here.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// An ephemeral key -> content bundle assembled for one analysis call.
///
/// The reserved key `"log"` maps to the run's log content; every other key
/// is a path relative to the workspace.
pub type ContextBundle = HashMap<String, String>;

/// Default prompt used when the AI configuration leaves it empty.
pub const DEFAULT_ANALYSIS_PROMPT: &str =
    "Analyze the following content, identify problems and give recommendations:";

/// An abstract AI analysis capability.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Analyzes raw log content and returns a report.
    ///
    /// The caller is responsible for reading (and truncating) the log file;
    /// the agent only sees text.
    async fn analyze_log(&self, log_content: &str) -> Result<String>;

    /// Analyzes a context bundle under the given prompt.
    async fn analyze_with_context(
        &self,
        prompt: &str,
        context: &ContextBundle,
    ) -> Result<String>;
}
