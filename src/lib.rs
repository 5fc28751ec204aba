//! Taskweave - a dependency-aware YAML task runner
//!
//! Tasks are declared in a `Taskfile.yml`. Taskweave resolves their
//! dependencies, skips work that is already up to date, bounds how many
//! commands run at once, and can re-run tasks when their sources change.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod runner;
pub mod ui;

// Re-export commonly used types
pub use error::{Result, TaskError};

/// Current version of taskweave
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
