//! Task execution engine
//!
//! This module handles compiling Taskfile tasks, resolving their
//! dependencies, deciding whether they are up to date, and running their
//! commands.

pub mod command;
pub mod compiler;
pub mod executor;
pub mod fingerprint;
pub mod gate;
pub mod interpolate;
pub mod iterator;
pub mod output;
pub mod precondition;
pub mod task;
pub mod watch;

// Re-export main types
pub use command::{check_command, run_command, RunCommandOptions};
pub use compiler::{Compiler, Environment, TaskfileCompiler, TaskfileDefaults};
pub use executor::{
    CallState, Executor, ExecutorConfig, TaskRunner, TaskSorter, WatchCallGuard,
    DEFAULT_MAX_TASK_CALLS, TEMP_DIR_NAME,
};
pub use fingerprint::{is_task_up_to_date, FingerprintOptions, Method};
pub use gate::{ConcurrencyGate, GatePermit};
pub use interpolate::{interpolate, Vars};
pub use iterator::{TaskIterator, TaskStep};
pub use output::{GroupOptions, Output, OutputConfig};
pub use task::{
    Call, Cmd, CmdKind, Glob, Platform, Precondition, RequiredVar, RunPolicy, Task, TaskIdentity,
};
pub use watch::{cancel_on_interrupt, FileWatcher, WatchEvent, WatchSession};
