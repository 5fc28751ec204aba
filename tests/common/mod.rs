//! Common test utilities

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use taskweave::runner::{Executor, ExecutorConfig, TaskRunner};
use taskweave::ui::SharedBuffer;
use tempfile::TempDir;

/// Create a temporary directory with a Taskfile.yml
pub fn create_taskfile(content: &str) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("Taskfile.yml"), content).unwrap();
    temp_dir
}

/// Executor set up in `dir`, writing to in-memory stdout and stderr
pub struct Harness {
    pub executor: Arc<Executor>,
    pub stdout: SharedBuffer,
    pub stderr: SharedBuffer,
}

pub fn harness(config: ExecutorConfig) -> Harness {
    let stdout = SharedBuffer::new();
    let stderr = SharedBuffer::new();
    let mut executor = Executor::new(config.with_color(false)).with_io(stdout.sink(), stderr.sink());
    executor.setup().unwrap();
    Harness {
        executor: Arc::new(executor),
        stdout,
        stderr,
    }
}

/// Lines of a file, empty if it does not exist
pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
