//! Core domain layer for the Ember engine.
//!
//! Holds the shared error type, configuration types, the task domain model,
//! and the two seam traits ([`executor::Executor`], [`agent::Agent`]) that
//! decouple the coordinator from the concrete backends.

pub mod agent;
pub mod config;
pub mod error;
pub mod executor;
pub mod task;

// Re-export common error type
pub use error::{EmberError, Result};
