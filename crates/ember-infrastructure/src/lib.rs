//! Infrastructure layer for the Ember engine.
//!
//! Provides task identity/workspace lifecycle and the directory-backed
//! metadata recorder & query engine.

pub mod metadata_store;
pub mod workspace;

pub use metadata_store::{MetadataStore, METADATA_FILE};
pub use workspace::{create_workspace, generate_task_id};
