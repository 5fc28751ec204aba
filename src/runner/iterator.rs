//! Step-at-a-time execution of one task
//!
//! [`TaskIterator`] hands out one [`TaskStep`] per command so a caller can run
//! them individually and look at each one's output in between.

use crate::error::{ConfigError, ExecutionError, Result};
use crate::runner::compiler::Environment;
use crate::runner::executor::TaskRunner;
use crate::runner::task::{Call, Task};
use crate::ui::Sink;
use tokio_util::sync::CancellationToken;

enum Preparation {
    Pending,
    Ready(Task),
    /// Platform mismatch: nothing to run
    Skipped,
    Failed(String),
}

/// Iterator over the commands of one task
pub struct TaskIterator<R: TaskRunner> {
    runner: R,
    call: Call,
    environment: Option<Environment>,
    io: Option<(Sink, Sink)>,
    preparation: Preparation,
    index: usize,
}

impl<R: TaskRunner> TaskIterator<R> {
    /// Iterate over the commands of `call`; `runner` is set up lazily
    pub fn new(runner: R, call: Call) -> Self {
        TaskIterator {
            runner,
            call,
            environment: None,
            io: None,
            preparation: Preparation::Pending,
            index: 0,
        }
    }

    /// Override Taskfile environment variables before preparing
    pub fn with_env(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Send command output to the given sinks
    pub fn with_io(mut self, stdout: Sink, stderr: Sink) -> Self {
        self.io = Some((stdout, stderr));
        self
    }

    fn prepare(&mut self) {
        if !matches!(self.preparation, Preparation::Pending) {
            return;
        }

        if let Some(environment) = self.environment.take() {
            self.runner.set_environment(environment);
        }
        if let Some((stdout, stderr)) = self.io.take() {
            self.runner.set_io(stdout, stderr);
        }

        let prepared = self
            .runner
            .setup()
            .and_then(|()| self.runner.prepare_task(&self.call));
        self.preparation = match prepared {
            Ok(Some(task)) => Preparation::Ready(task),
            Ok(None) => Preparation::Skipped,
            Err(err) => Preparation::Failed(err.to_string()),
        };
    }

    /// The prepared task, if preparation succeeded
    pub fn task(&mut self) -> Option<&Task> {
        self.prepare();
        match &self.preparation {
            Preparation::Ready(task) => Some(task),
            _ => None,
        }
    }

    /// Number of steps
    pub fn len(&mut self) -> usize {
        self.task().map_or(0, Task::len)
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    pub fn has_next(&mut self) -> bool {
        self.index < self.len()
    }

    /// Advance to the next command
    pub fn next(&mut self) -> Result<TaskStep<'_, R>> {
        self.prepare();
        let len = match &self.preparation {
            Preparation::Ready(task) => task.len(),
            Preparation::Failed(message) => {
                return Err(ConfigError::Invalid(format!(
                    "error preparing execution of task \"{}\": {}",
                    self.call.task, message
                ))
                .into())
            }
            Preparation::Skipped | Preparation::Pending => 0,
        };

        if self.index >= len {
            return Err(ExecutionError::CommandIndex {
                task: self.call.task.clone(),
                index: self.index,
            }
            .into());
        }

        let index = self.index;
        self.index += 1;
        Ok(TaskStep { iter: self, index })
    }
}

/// One command of a [`TaskIterator`]
pub struct TaskStep<'a, R: TaskRunner> {
    iter: &'a mut TaskIterator<R>,
    index: usize,
}

impl<R: TaskRunner> TaskStep<'_, R> {
    /// Zero-based index of the command
    pub fn index(&self) -> usize {
        self.index
    }

    /// Send this and later steps' output to the given sinks
    pub fn set_io(&mut self, stdout: Sink, stderr: Sink) {
        self.iter.runner.set_io(stdout, stderr);
    }

    /// Run the command
    pub async fn execute(&self, ctx: &CancellationToken) -> Result<()> {
        let Preparation::Ready(task) = &self.iter.preparation else {
            return Err(ExecutionError::CommandIndex {
                task: self.iter.call.task.clone(),
                index: self.index,
            }
            .into());
        };
        self.iter
            .runner
            .run_task_cmd(ctx, &self.iter.call, task, self.index)
            .await
    }
}
