//! CLI interface and argument parsing
//!
//! This module turns the command line into an executor configuration and a
//! list of task calls, and generates shell completion scripts.

pub mod app;

// Re-export main types
pub use app::*;
