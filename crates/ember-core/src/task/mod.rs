//! Task domain module.
//!
//! # Module Structure
//!
//! - `model`: core task domain models (`TaskSpec`, `TaskResult`,
//!   `TaskMetadata`, `TaskStatistics`, status/type enums)

mod model;

// Re-export public API
pub use model::{TaskMetadata, TaskResult, TaskSpec, TaskStatistics, TaskStatus, TaskType};
