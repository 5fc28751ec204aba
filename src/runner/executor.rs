//! Task executor
//!
//! The [`Executor`] drives one call end to end: it resolves dependencies,
//! checks preconditions and freshness, asks for confirmation, and runs the
//! task's commands through the concurrency gate and the output multiplexer.
//!
//! Every call moves through [`CallState`]; transitions are traced at `debug`
//! level.

use crate::error::{ConfigError, ExecutionError, Result, TaskError};
use crate::runner::command::{self, RunCommandOptions};
use crate::runner::compiler::{Compiler, Environment, TaskfileCompiler, TaskfileDefaults};
use crate::runner::fingerprint::{is_task_up_to_date, FingerprintOptions, Method};
use crate::runner::gate::ConcurrencyGate;
use crate::runner::output::{build_for, Output, OutputConfig, WrappedWriters};
use crate::runner::precondition::are_preconditions_met;
use crate::runner::task::{should_run_on_current_platform, Call, CmdKind, RunPolicy, Task, TaskIdentity};
use crate::ui::{stderr_sink, stdout_sink, Logger, PromptError, PromptInput, Sink};
use async_recursion::async_recursion;
use async_trait::async_trait;
use colored::Color;
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Default limit on calls of one task name within a run
pub const DEFAULT_MAX_TASK_CALLS: u32 = 1000;

/// Directory, relative to the Taskfile, holding internal state
pub const TEMP_DIR_NAME: &str = ".task";

/// Where a call is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    DependenciesRunning,
    PreconditionCheck,
    FingerprintCheck,
    Skipped,
    Prompted,
    Cancelled,
    Running,
    Deferred,
    Succeeded,
    Failed,
}

/// Ordering of listed tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskSorter {
    /// Alphanumeric, namespaced (`a:b`) tasks last
    #[default]
    Default,
    Alphanumeric,
    /// Declaration order
    None,
}

impl TaskSorter {
    pub fn sort(&self, names: &mut [String]) {
        match self {
            TaskSorter::Default => names.sort_by(|a, b| (a.contains(':'), a).cmp(&(b.contains(':'), b))),
            TaskSorter::Alphanumeric => names.sort(),
            TaskSorter::None => {}
        }
    }
}

impl FromStr for TaskSorter {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "default" | "" => Ok(TaskSorter::Default),
            "alphanumeric" => Ok(TaskSorter::Alphanumeric),
            "none" => Ok(TaskSorter::None),
            other => Err(ConfigError::Invalid(format!("unknown task sorter \"{}\"", other))),
        }
    }
}

/// Whether the call-count guard is active while watching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchCallGuard {
    /// No guard in watch mode
    #[default]
    Disabled,

    /// Guard active, counters reset at the start of every generation
    ResetPerGeneration,
}

impl FromStr for WatchCallGuard {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(WatchCallGuard::Disabled),
            "reset" | "reset_per_generation" => Ok(WatchCallGuard::ResetPerGeneration),
            other => Err(ConfigError::Invalid(format!("unknown watch call guard \"{}\"", other))),
        }
    }
}

/// Immutable executor settings
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory to search the Taskfile from
    pub dir: PathBuf,

    /// Explicit Taskfile path
    pub entrypoint: Option<PathBuf>,

    /// Ignore freshness for directly called tasks
    pub force: bool,

    /// Ignore freshness for every task
    pub force_all: bool,

    /// Simultaneous commands (`0` for unlimited)
    pub concurrency: usize,

    /// Print commands without running them
    pub dry: bool,

    pub watch: bool,

    /// Watch interval; falls back to the Taskfile's, then 5s
    pub interval: Option<Duration>,

    /// Output style; unset falls back to the Taskfile's
    pub output: OutputConfig,

    pub silent: bool,
    pub verbose: bool,

    /// Answer yes to every prompt
    pub assume_yes: bool,

    /// Run top-level calls concurrently
    pub parallel: bool,

    /// Print task summaries instead of running
    pub summary: bool,

    pub sorter: TaskSorter,
    pub version_check: bool,
    pub max_task_calls: u32,
    pub watch_call_guard: WatchCallGuard,
    pub color: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            dir: PathBuf::from("."),
            entrypoint: None,
            force: false,
            force_all: false,
            concurrency: 0,
            dry: false,
            watch: false,
            interval: None,
            output: OutputConfig::default(),
            silent: false,
            verbose: false,
            assume_yes: false,
            parallel: false,
            summary: false,
            sorter: TaskSorter::default(),
            version_check: true,
            max_task_calls: DEFAULT_MAX_TASK_CALLS,
            watch_call_guard: WatchCallGuard::default(),
            color: std::env::var_os("NO_COLOR").is_none(),
        }
    }
}

impl ExecutorConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ExecutorConfig {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<PathBuf>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_force_all(mut self, force_all: bool) -> Self {
        self.force_all = force_all;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_dry(mut self, dry: bool) -> Self {
        self.dry = dry;
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_assume_yes(mut self, assume_yes: bool) -> Self {
        self.assume_yes = assume_yes;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_summary(mut self, summary: bool) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_sorter(mut self, sorter: TaskSorter) -> Self {
        self.sorter = sorter;
        self
    }

    pub fn with_version_check(mut self, version_check: bool) -> Self {
        self.version_check = version_check;
        self
    }

    pub fn with_max_task_calls(mut self, max: u32) -> Self {
        self.max_task_calls = max;
        self
    }

    pub fn with_watch_call_guard(mut self, guard: WatchCallGuard) -> Self {
        self.watch_call_guard = guard;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }
}

/// What an executor can do, as seen by the iterator adapter
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Load the Taskfile and build everything that depends on it
    fn setup(&mut self) -> Result<()>;

    /// Environment applied to the Taskfile when it is loaded
    fn set_environment(&mut self, environment: Environment);

    fn compiled_task(&self, call: &Call) -> Result<Task>;

    /// Resolve a call into a runnable task
    ///
    /// `Ok(None)` means the task does not target this platform.
    fn prepare_task(&self, call: &Call) -> Result<Option<Task>>;

    /// Run the command at `index` of an already prepared task
    async fn run_task_cmd(&self, ctx: &CancellationToken, call: &Call, task: &Task, index: usize) -> Result<()>;

    /// Redirect command output
    fn set_io(&self, stdout: Sink, stderr: Sink);
}

struct Io {
    stdout: Sink,
    stderr: Sink,
}

/// Runs tasks produced by a [`Compiler`]
pub struct Executor {
    config: ExecutorConfig,
    logger: Logger,
    gate: ConcurrencyGate,
    io: RwLock<Io>,
    environment: Option<Environment>,
    compiler: Option<Arc<dyn Compiler>>,
    output: Option<Box<dyn Output>>,
    call_counts: HashMap<String, AtomicU32>,
    temp_dir: PathBuf,
    in_flight: Mutex<HashMap<TaskIdentity, Arc<tokio::sync::Mutex<()>>>>,
    executions: Mutex<HashMap<String, CancellationToken>>,
}

/// Outcome of claiming a task's execution slot
enum Claim {
    /// Execute; the guard, if any, marks the execution finished when dropped
    Run(Option<DropGuard>),

    /// An identical call already covered this one
    Skip,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        let logger = Logger::new()
            .with_verbose(config.verbose)
            .with_color(config.color)
            .with_assume_yes(config.assume_yes);

        Executor {
            gate: ConcurrencyGate::new(config.concurrency),
            temp_dir: config.dir.join(TEMP_DIR_NAME),
            io: RwLock::new(Io {
                stdout: stdout_sink(),
                stderr: stderr_sink(),
            }),
            environment: None,
            compiler: None,
            output: None,
            call_counts: HashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
            executions: Mutex::new(HashMap::new()),
            logger,
            config,
        }
    }

    /// Use `compiler` instead of loading a Taskfile
    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Send command output and log messages to the given sinks
    pub fn with_io(mut self, stdout: Sink, stderr: Sink) -> Self {
        self.logger = self.logger.with_sinks(Arc::clone(&stdout), Arc::clone(&stderr));
        self.io = RwLock::new(Io { stdout, stderr });
        self
    }

    /// Read prompt answers from `input`
    pub fn with_input(mut self, input: PromptInput) -> Self {
        self.logger = self.logger.with_input(input);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub(crate) fn compiler(&self) -> Result<&Arc<dyn Compiler>> {
        self.compiler.as_ref().ok_or_else(not_set_up)
    }

    fn output(&self) -> Result<&dyn Output> {
        self.output.as_deref().ok_or_else(not_set_up)
    }

    fn defaults(&self) -> Result<&TaskfileDefaults> {
        Ok(self.compiler()?.defaults())
    }

    /// Watch interval: configured, then Taskfile, then 5s
    pub fn watch_interval(&self) -> Duration {
        self.config
            .interval
            .or_else(|| self.compiler.as_ref().and_then(|c| c.defaults().interval))
            .unwrap_or(Duration::from_secs(5))
    }

    /// Zero every call counter
    pub fn reset_call_counts(&self) {
        for counter in self.call_counts.values() {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Forget which executions ran, so `run: once` tasks run again
    pub fn reset_executions(&self) {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Run the given calls
    ///
    /// Honours `summary`, `watch` and `parallel`. A top-level call whose
    /// precondition is not met is reported as skipped rather than failed.
    pub async fn run(self: &Arc<Self>, ctx: &CancellationToken, calls: &[Call]) -> Result<()> {
        let compiler = self.compiler()?;
        let names = compiler.task_names();
        for call in calls {
            if !names.contains(&call.task) {
                return Err(ConfigError::TaskNotFound(call.task.clone()).into());
            }
        }

        if self.config.summary {
            for (i, call) in calls.iter().enumerate() {
                if i > 0 {
                    self.logger.outf(Color::White, "\n");
                }
                let task = compiler.compiled_task(call)?;
                self.display_summary(&task);
            }
            return Ok(());
        }

        if self.config.watch {
            return self.watch_tasks(calls).await;
        }

        if self.config.parallel {
            try_join_all(calls.iter().map(|call| self.run_top_level(ctx, call))).await?;
        } else {
            for call in calls {
                self.run_top_level(ctx, call).await?;
            }
        }
        Ok(())
    }

    async fn run_top_level(&self, ctx: &CancellationToken, call: &Call) -> Result<()> {
        match self.run_task(ctx, call).await {
            Err(err) if err.is_precondition_not_met() => {
                self.logger.verbose_errf(
                    Color::Yellow,
                    &format!("task: Task \"{}\" skipped: precondition not met\n", call.task),
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Run every command of a task
    ///
    /// Deferred commands run after the main list, last registered first.
    /// Tasks that can be up to date are serialised per identity so that a
    /// concurrent second call sees the first one's fingerprint. Calls that
    /// share an execution under the task's [`RunPolicy`] run it once.
    pub async fn run_task(&self, ctx: &CancellationToken, call: &Call) -> Result<()> {
        self.run_call(ctx, call, &[]).await
    }

    /// `run_task` for a call issued under the tasks in `callers`
    #[async_recursion]
    async fn run_call(&self, ctx: &CancellationToken, call: &Call, callers: &[TaskIdentity]) -> Result<()> {
        let Some(task) = self.prepare_task(call)? else {
            return Ok(());
        };

        self.begin_call(&task)?;
        let _execution = match self.claim_execution(ctx, &task, callers).await? {
            Claim::Run(guard) => guard,
            Claim::Skip => return Ok(()),
        };

        let chain = with_caller(callers, &task);
        self.run_deps(ctx, &task, &chain).await?;

        let _guard = self.lock_in_flight(&task, callers).await?;
        if self.check_before_run(ctx, call, &task).await? == CallState::Skipped {
            return Ok(());
        }

        self.logger
            .verbose_errf(Color::Magenta, &format!("task: \"{}\" started\n", call.task));

        let mut deferred = Vec::new();
        let mut result = Ok(());
        for (index, cmd) in task.cmds.iter().enumerate() {
            if cmd.defer {
                trace_state(&task, CallState::Deferred);
                deferred.push(index);
                continue;
            }
            if let Err(err) = self.run_classified(ctx, call, &task, index, None, &chain).await {
                result = Err(err);
                break;
            }
        }

        let exit_code = result.as_ref().err().and_then(TaskError::exit_code);
        for &index in deferred.iter().rev() {
            let cleanup = CancellationToken::new();
            if let Err(err) = self.run_classified(&cleanup, call, &task, index, exit_code, &chain).await {
                if result.is_ok() {
                    result = Err(err);
                } else {
                    self.logger
                        .verbose_errf(Color::Yellow, &format!("task: deferred command failed: {}\n", err));
                }
            }
        }

        match &result {
            Ok(()) => {
                trace_state(&task, CallState::Succeeded);
                self.logger
                    .verbose_errf(Color::Magenta, &format!("task: \"{}\" finished\n", call.task));
            }
            Err(err) if err.is_cancellation() => trace_state(&task, CallState::Cancelled),
            Err(_) => trace_state(&task, CallState::Failed),
        }
        result
    }

    fn begin_call(&self, task: &Task) -> Result<()> {
        trace_state(task, CallState::Pending);

        if self.config.watch && self.config.watch_call_guard == WatchCallGuard::Disabled {
            return Ok(());
        }
        let Some(counter) = self.call_counts.get(task.name()) else {
            return Ok(());
        };

        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.config.max_task_calls {
            return Err(ExecutionError::CalledTooManyTimes {
                task: task.task.clone(),
                max: self.config.max_task_calls,
            }
            .into());
        }
        Ok(())
    }

    /// Execution slot shared by calls that `run` policy treats as identical
    ///
    /// A call re-entering a slot held by one of its callers skips instead of
    /// waiting for itself.
    async fn claim_execution(&self, ctx: &CancellationToken, task: &Task, callers: &[TaskIdentity]) -> Result<Claim> {
        let Some(key) = self.execution_key(task)? else {
            return Ok(Claim::Run(None));
        };

        let done = {
            let mut executions = self.executions.lock().unwrap_or_else(PoisonError::into_inner);
            match executions.entry(key.clone()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let done = CancellationToken::new();
                    entry.insert(done.clone());
                    return Ok(Claim::Run(Some(done.drop_guard())));
                }
            }
        };

        self.logger
            .verbose_errf(Color::Magenta, &format!("task: skipping execution of task: {}\n", key));
        trace_state(task, CallState::Skipped);
        if callers.iter().any(|caller| caller.name == task.task) {
            return Ok(Claim::Skip);
        }

        tokio::select! {
            _ = done.cancelled() => Ok(Claim::Skip),
            _ = ctx.cancelled() => Err(ExecutionError::Cancelled.into()),
        }
    }

    fn execution_key(&self, task: &Task) -> Result<Option<String>> {
        Ok(match task.run.unwrap_or(self.defaults()?.run) {
            RunPolicy::Always => None,
            RunPolicy::Once => Some(task.task.clone()),
            RunPolicy::WhenChanged => {
                let mut hasher = Sha256::new();
                for (key, value) in &task.vars {
                    hasher.update(key.as_bytes());
                    hasher.update([0u8]);
                    hasher.update(value.as_bytes());
                    hasher.update([0u8]);
                }
                let digest = hex::encode(hasher.finalize());
                Some(format!("{}:{}", task.task, &digest[..16]))
            }
        })
    }

    /// Run all dependencies concurrently
    async fn run_deps(&self, ctx: &CancellationToken, task: &Task, callers: &[TaskIdentity]) -> Result<()> {
        if task.deps.is_empty() {
            return Ok(());
        }
        trace_state(task, CallState::DependenciesRunning);

        let deps = task.deps.iter().map(|dep| {
            let call = dep.clone().indirect();
            async move { self.run_call(ctx, &call, callers).await }
        });
        try_join_all(deps).await?;
        Ok(())
    }

    /// Per-identity lock for tasks that can be up to date
    ///
    /// Not taken when a caller already holds it, so a task calling itself
    /// reaches the call limit instead of waiting on its own lock.
    async fn lock_in_flight(&self, task: &Task, callers: &[TaskIdentity]) -> Result<Option<OwnedMutexGuard<()>>> {
        let method = self.effective_method(task)?;
        let can_be_fresh = method == Method::Once || !task.sources.is_empty() || !task.status.is_empty();
        if method == Method::Always || !can_be_fresh {
            return Ok(None);
        }
        let identity = task.identity();
        if callers.contains(&identity) {
            return Ok(None);
        }

        let lock = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(in_flight.entry(identity).or_default())
        };
        Ok(Some(lock.lock_owned().await))
    }

    fn effective_method(&self, task: &Task) -> Result<Method> {
        Ok(task.method.unwrap_or(self.defaults()?.method))
    }

    fn fingerprint_options(&self, task: &Task) -> Result<FingerprintOptions> {
        Ok(FingerprintOptions::new()
            .with_method(self.effective_method(task)?)
            .with_temp_dir(&self.temp_dir)
            .with_dry(self.config.dry)
            .with_logger(self.logger.clone()))
    }

    /// Preconditions, freshness, prompts and the task directory
    ///
    /// Returns `Skipped` when the task is up to date, `Running` otherwise.
    async fn check_before_run(&self, ctx: &CancellationToken, call: &Call, task: &Task) -> Result<CallState> {
        let forced = self.config.force_all || (self.config.force && !call.indirect);
        if !forced {
            if ctx.is_cancelled() {
                return Err(ExecutionError::Cancelled.into());
            }

            trace_state(task, CallState::PreconditionCheck);
            are_preconditions_met(ctx, task, &self.logger).await?;

            trace_state(task, CallState::FingerprintCheck);
            let options = self.fingerprint_options(task)?;
            if is_task_up_to_date(ctx, task, &options).await? {
                let defaults = self.defaults()?;
                if self.config.verbose || (!call.silent && !task.silent && !defaults.silent && !self.config.silent) {
                    self.logger.errf(
                        Color::Magenta,
                        &format!("task: Task \"{}\" is up to date\n", task.name()),
                    );
                }
                trace_state(task, CallState::Skipped);
                return Ok(CallState::Skipped);
            }
        }

        if !self.config.dry {
            for prompt in task.prompt.iter().filter(|p| !p.is_empty()) {
                trace_state(task, CallState::Prompted);
                self.prompt(call, prompt).await?;
            }
        }

        if let Err(err) = tokio::fs::create_dir_all(&task.dir).await {
            self.logger.errf(
                Color::Red,
                &format!("task: cannot make directory \"{}\": {}\n", task.dir.display(), err),
            );
        }

        trace_state(task, CallState::Running);
        Ok(CallState::Running)
    }

    async fn prompt(&self, call: &Call, message: &str) -> Result<()> {
        let logger = self.logger.clone();
        let message = message.to_string();
        let answer = tokio::task::spawn_blocking(move || logger.prompt(Color::Yellow, &message, "n", &["y", "yes"]))
            .await
            .map_err(|e| ExecutionError::Spawn(e.to_string()))?;

        match answer {
            Ok(()) => Ok(()),
            Err(PromptError::NoTerminal) => Err(ExecutionError::CancelledNoTerminal {
                task: call.task.clone(),
            }
            .into()),
            Err(PromptError::Cancelled) => Err(ExecutionError::CancelledByUser {
                task: call.task.clone(),
            }
            .into()),
            Err(PromptError::Io(e)) => Err(e.into()),
        }
    }

    /// Run one command and classify its failure
    ///
    /// On failure the fingerprint record is dropped, `ignore_error` is
    /// honoured and, for direct calls only, the error is wrapped with the
    /// task name. Cancellation is never wrapped.
    async fn run_classified(
        &self,
        ctx: &CancellationToken,
        call: &Call,
        task: &Task,
        index: usize,
        exit_code: Option<i32>,
        callers: &[TaskIdentity],
    ) -> Result<()> {
        let err = match self.run_command(ctx, call, task, index, exit_code, callers).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if let Err(cleanup) = self.status_on_error(task) {
            self.logger.verbose_errf(
                Color::Yellow,
                &format!("task: error cleaning status on error: {}\n", cleanup),
            );
        }

        if err.is_cancellation() {
            return Err(err);
        }

        if err.exit_code().is_some() && (task.ignore_error || task.cmds[index].ignore_error) {
            self.logger
                .verbose_errf(Color::Yellow, &format!("task: task error ignored: {}\n", err));
            return Ok(());
        }

        if call.indirect {
            Err(err)
        } else {
            Err(ExecutionError::task_run(task.task.clone(), err).into())
        }
    }

    /// Forget the fingerprint of a task whose run failed
    fn status_on_error(&self, task: &Task) -> Result<()> {
        self.fingerprint_options(task)?
            .sources_checker()
            .on_error(task)?;
        Ok(())
    }

    async fn run_command(
        &self,
        ctx: &CancellationToken,
        call: &Call,
        task: &Task,
        index: usize,
        exit_code: Option<i32>,
        callers: &[TaskIdentity],
    ) -> Result<()> {
        let cmd = &task.cmds[index];
        if !should_run_on_current_platform(&cmd.platforms) {
            self.logger.verbose_outf(
                Color::Yellow,
                &format!("task: [{}] command {} not for current platform - ignored\n", task.name(), index),
            );
            return Ok(());
        }

        match &cmd.kind {
            CmdKind::Task(sub) => {
                let silent = sub.silent || cmd.silent;
                let sub = sub.clone().silent(silent).indirect();
                self.run_call(ctx, &sub, callers).await
            }
            CmdKind::Shell(line) => {
                if ctx.is_cancelled() {
                    return Err(ExecutionError::Cancelled.into());
                }

                let defaults = self.defaults()?;
                let silent = cmd.silent || task.silent || call.silent || defaults.silent || self.config.silent;
                if !silent || self.config.dry {
                    self.logger
                        .errf(Color::Green, &format!("task: [{}] {}\n", task.name(), line));
                }
                if self.config.dry {
                    return Ok(());
                }

                let _permit = self.gate.acquire(ctx).await?;

                let (stdout, stderr) = {
                    let io = self.io.read().unwrap_or_else(PoisonError::into_inner);
                    (Arc::clone(&io.stdout), Arc::clone(&io.stderr))
                };
                let WrappedWriters { stdout, stderr, close } =
                    self.output()?.wrap_writer(&stdout, &stderr, &task.prefix, &task.vars);

                let mut env = task.env.clone();
                if let Some(code) = exit_code {
                    env.insert("EXIT_CODE".to_string(), code.to_string());
                }

                let result = command::run_command(
                    ctx,
                    RunCommandOptions {
                        command: line,
                        dir: &task.dir,
                        env: &env,
                        stdout,
                        stderr,
                    },
                )
                .await;

                if let Err(err) = close(result.as_ref().err()) {
                    self.logger
                        .errf(Color::Red, &format!("task: failed to write output: {}\n", err));
                }
                Ok(result?)
            }
        }
    }

    /// Tasks ordered by the configured sorter
    ///
    /// Without `all`, tasks lacking a description are left out.
    pub fn list_tasks(&self, all: bool) -> Result<Vec<Task>> {
        let compiler = self.compiler()?;
        let mut names = compiler.task_names();
        self.config.sorter.sort(&mut names);

        let mut tasks = Vec::with_capacity(names.len());
        for name in names {
            let task = compiler.fast_compiled_task(&Call::new(name))?;
            if all || task.desc.is_some() {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Print the task list
    pub fn print_tasks(&self, all: bool) -> Result<()> {
        let tasks = self.list_tasks(all)?;
        if tasks.is_empty() {
            self.logger.errf(
                Color::Yellow,
                "task: No tasks with description available. Try --list-all to list all tasks\n",
            );
            return Ok(());
        }

        let width = tasks.iter().map(|t| t.name().len()).max().unwrap_or(0);
        self.logger
            .outf(Color::White, "task: Available tasks for this project:\n");
        for task in &tasks {
            let desc = task.desc.as_deref().unwrap_or_default();
            self.logger.outf(
                Color::Green,
                &format!("* {:width$}  {}\n", format!("{}:", task.name()), desc, width = width + 1),
            );
        }
        Ok(())
    }

    fn display_summary(&self, task: &Task) {
        let mut text = format!("task: {}\n\n", task.name());
        match (&task.summary, &task.desc) {
            (Some(summary), _) => text.push_str(summary.trim_end()),
            (None, Some(desc)) => text.push_str(desc.trim_end()),
            (None, None) => text.push_str("(task does not have description or summary)"),
        }
        text.push('\n');

        if !task.deps.is_empty() {
            text.push_str("\ndependencies:\n");
            for dep in &task.deps {
                text.push_str(&format!(" - {}\n", dep.task));
            }
        }

        if !task.cmds.is_empty() {
            text.push_str("\ncommands:\n");
            for cmd in &task.cmds {
                match &cmd.kind {
                    CmdKind::Shell(line) => text.push_str(&format!(" - {}\n", line)),
                    CmdKind::Task(call) => text.push_str(&format!(" - Task: {}\n", call.task)),
                }
            }
        }

        self.logger.outf(Color::White, &text);
    }
}

#[async_trait]
impl TaskRunner for Executor {
    fn setup(&mut self) -> Result<()> {
        if self.compiler.is_none() {
            let mut compiler = TaskfileCompiler::load(
                &self.config.dir,
                self.config.entrypoint.as_deref(),
                self.config.version_check,
            )?;
            if let Some(environment) = &self.environment {
                compiler.set_environment(environment);
            }
            self.temp_dir = compiler.dir().join(TEMP_DIR_NAME);
            self.compiler = Some(Arc::new(compiler));
        } else if self.environment.is_some() {
            tracing::warn!("environment ignored: it only applies to Taskfiles loaded by the executor");
        }

        let compiler = Arc::clone(self.compiler()?);
        let output = if self.config.output.is_set() {
            &self.config.output
        } else {
            &compiler.defaults().output
        };
        self.output = Some(build_for(output, &self.logger)?);

        self.call_counts = compiler
            .task_names()
            .into_iter()
            .map(|name| (name, AtomicU32::new(0)))
            .collect();

        tracing::debug!(
            tasks = self.call_counts.len(),
            concurrency = self.gate.size(),
            temp_dir = %self.temp_dir.display(),
            "executor set up"
        );
        Ok(())
    }

    fn set_environment(&mut self, environment: Environment) {
        self.environment = Some(environment);
    }

    fn compiled_task(&self, call: &Call) -> Result<Task> {
        self.compiler()?.compiled_task(call)
    }

    fn prepare_task(&self, call: &Call) -> Result<Option<Task>> {
        let compiler = self.compiler()?;

        let task = compiler.fast_compiled_task(call)?;
        if !should_run_on_current_platform(&task.platforms) {
            self.logger.verbose_outf(
                Color::Yellow,
                &format!("task: \"{}\" not for current platform - ignored\n", call.task),
            );
            return Ok(None);
        }

        let missing: Vec<String> = task
            .requires
            .iter()
            .filter(|r| !task.vars.contains_key(&r.name))
            .map(|r| r.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(ExecutionError::MissingRequiredVars {
                task: call.task.clone(),
                vars: missing,
            }
            .into());
        }

        let task = compiler.compiled_task(call)?;
        for required in task.requires.iter().filter(|r| !r.allowed.is_empty()) {
            let value = task.vars.get(&required.name).cloned().unwrap_or_default();
            if !required.allowed.contains(&value) {
                return Err(ExecutionError::VarValueNotAllowed {
                    task: call.task.clone(),
                    var: required.name.clone(),
                    value,
                    allowed: required.allowed.clone(),
                }
                .into());
            }
        }

        Ok(Some(task))
    }

    async fn run_task_cmd(&self, ctx: &CancellationToken, call: &Call, task: &Task, index: usize) -> Result<()> {
        if index >= task.cmds.len() {
            return Err(ExecutionError::CommandIndex {
                task: task.task.clone(),
                index,
            }
            .into());
        }

        self.begin_call(task)?;
        let callers = with_caller(&[], task);
        self.run_deps(ctx, task, &callers).await?;

        let _guard = self.lock_in_flight(task, &[]).await?;
        if self.check_before_run(ctx, call, task).await? == CallState::Skipped {
            return Ok(());
        }

        if task.cmds[index].defer {
            trace_state(task, CallState::Deferred);
            let cleanup = CancellationToken::new();
            return self.run_classified(&cleanup, call, task, index, None, &callers).await;
        }
        self.run_classified(ctx, call, task, index, None, &callers).await
    }

    fn set_io(&self, stdout: Sink, stderr: Sink) {
        let mut io = self.io.write().unwrap_or_else(PoisonError::into_inner);
        *io = Io { stdout, stderr };
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("temp_dir", &self.temp_dir)
            .field("set_up", &self.compiler.is_some())
            .finish()
    }
}

fn not_set_up() -> TaskError {
    ConfigError::Invalid("executor used before setup".to_string()).into()
}

/// `callers` extended with `task`
fn with_caller(callers: &[TaskIdentity], task: &Task) -> Vec<TaskIdentity> {
    let mut chain = Vec::with_capacity(callers.len() + 1);
    chain.extend_from_slice(callers);
    chain.push(task.identity());
    chain
}

fn trace_state(task: &Task, state: CallState) {
    tracing::debug!(task = %task.name(), ?state, "call state");
}
