//! Application layer: the engine coordinator, scheduler, and the AI
//! analysis paths built on top of the core abstractions.

mod analysis;

pub mod context;
pub mod engine;
pub mod schedule;
pub mod scheduler;

pub use context::{collect_context, LOG_CONTEXT_KEY};
pub use engine::{Engine, StatusSnapshot};
pub use schedule::Schedule;
pub use scheduler::{Scheduler, MAX_CONCURRENT_SCHEDULED_TASKS};
