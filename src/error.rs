//! Error types for taskweave

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for taskweave operations
pub type Result<T> = std::result::Result<T, TaskError>;

/// Main error type for taskweave
#[derive(Error, Debug)]
pub enum TaskError {
    /// Configuration-related errors
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Task execution errors
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// Variable interpolation errors
    #[error("task: interpolation failed: {0}")]
    Interpolation(#[from] InterpolationError),

    /// I/O errors
    #[error("task: I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("task: failed to parse Taskfile: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Taskfile loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("task: no Taskfile found (searched: {0})")]
    NotFound(String),

    #[error("task: invalid Taskfile: {0}")]
    Invalid(String),

    #[error("task: invalid method \"{0}\" (expected always, once, when_changed or timestamp)")]
    InvalidMethod(String),

    #[error("task: invalid run \"{0}\" (expected always, once or when_changed)")]
    InvalidRun(String),

    #[error("task: {0}")]
    InvalidOutput(String),

    #[error("task: Task \"{0}\" does not exist")]
    TaskNotFound(String),

    #[error("task: Found cyclic dependency: {0}")]
    CircularDependency(String),

    #[error("task: Taskfile version \"{0}\" is not supported (expected \"3\")")]
    UnsupportedVersion(String),

    #[error("task: error reading env file {path}: {error}")]
    Dotenv { path: PathBuf, error: String },
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("exit status {}", .code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    CommandFailed { code: Option<i32> },

    #[error("task: failed to start command: {0}")]
    Spawn(String),

    #[error("task: precondition not met")]
    PreconditionNotMet,

    #[error("task: Maximum task call exceeded ({max}) for task \"{task}\": probably an cyclic dep or infinite loop")]
    CalledTooManyTimes { task: String, max: u32 },

    #[error("task: Command index {index} out of range for task \"{task}\"")]
    CommandIndex { task: String, index: usize },

    #[error("task: Task \"{task}\" cancelled because it has missing required variables: {}", .vars.join(", "))]
    MissingRequiredVars { task: String, vars: Vec<String> },

    #[error("task: Task \"{task}\" cancelled because variable \"{var}\" has value \"{value}\" (allowed: {})", .allowed.join(", "))]
    VarValueNotAllowed {
        task: String,
        var: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("context canceled")]
    Cancelled,

    #[error("task: Task \"{task}\" cancelled by user")]
    CancelledByUser { task: String },

    #[error("task: Task \"{task}\" cancelled because it has prompts and no terminal is attached")]
    CancelledNoTerminal { task: String },

    #[error("task: Failed to run task \"{task}\": {source}")]
    TaskRun {
        task: String,
        #[source]
        source: Box<TaskError>,
    },

    #[error("task: fingerprint error: {0}")]
    Fingerprint(String),
}

/// Variable interpolation errors
#[derive(Error, Debug)]
pub enum InterpolationError {
    #[error("Recursive interpolation detected")]
    RecursiveInterpolation,

    #[error("dynamic variable command `{command}` failed: {error}")]
    DynamicVariable { command: String, error: String },
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for interpolation operations
pub type InterpolationResult<T> = std::result::Result<T, InterpolationError>;

impl TaskError {
    /// Unwrap `TaskRun` layers down to the error that actually happened
    pub fn root(&self) -> &TaskError {
        match self {
            TaskError::Execution(ExecutionError::TaskRun { source, .. }) => source.root(),
            other => other,
        }
    }

    /// Whether the error is a benign termination caused by cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self.root(), TaskError::Execution(ExecutionError::Cancelled))
    }

    /// Whether the user (or the lack of a terminal) cancelled a prompt
    pub fn is_prompt_cancellation(&self) -> bool {
        matches!(
            self.root(),
            TaskError::Execution(
                ExecutionError::CancelledByUser { .. } | ExecutionError::CancelledNoTerminal { .. }
            )
        )
    }

    pub fn is_precondition_not_met(&self) -> bool {
        matches!(
            self.root(),
            TaskError::Execution(ExecutionError::PreconditionNotMet)
        )
    }

    /// Exit code of the failed process, if the failure came from one
    pub fn exit_code(&self) -> Option<i32> {
        match self.root() {
            TaskError::Execution(ExecutionError::CommandFailed { code }) => *code,
            _ => None,
        }
    }
}

impl ExecutionError {
    /// Wrap an error with the name of the task it happened in
    pub fn task_run(task: impl Into<String>, source: impl Into<TaskError>) -> Self {
        ExecutionError::TaskRun {
            task: task.into(),
            source: Box::new(source.into()),
        }
    }
}
