//! Watch mode
//!
//! A [`WatchSession`] runs the requested calls, then restarts them as a new
//! generation whenever one of their source files changes. Files are found by
//! walking each call's dependencies and task commands every interval, and a
//! polling [`FileWatcher`] compares modification times.
//!
//! Change events go through a queue holding a single event. Events arriving
//! while one is pending are dropped, so a burst of changes starts one
//! generation, not several.

use crate::error::Result;
use crate::runner::executor::{Executor, WatchCallGuard};
use crate::runner::fingerprint::globs;
use crate::runner::interpolate::Vars;
use crate::runner::task::{Call, CmdKind};
use colored::Color;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Paths never registered with the watcher
const IGNORED_PATHS: &[&str] = &[".git", ".hg", ".task", "node_modules"];

static IGNORED: OnceLock<GlobSet> = OnceLock::new();

/// Whether `path` lies in a version control, cache or dependency directory
pub fn should_ignore_file(path: &Path) -> bool {
    IGNORED
        .get_or_init(|| {
            let mut builder = GlobSetBuilder::new();
            for dir in IGNORED_PATHS {
                for pattern in [format!("**/{}", dir), format!("**/{}/**", dir)] {
                    if let Ok(glob) = Glob::new(&pattern) {
                        builder.add(glob);
                    }
                }
            }
            builder.build().unwrap_or_else(|_| GlobSet::empty())
        })
        .is_match(path)
}

/// A change seen by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchEvent::Changed(path) => write!(f, "WRITE \"{}\"", path.display()),
            WatchEvent::Removed(path) => write!(f, "REMOVE \"{}\"", path.display()),
        }
    }
}

/// Polling file watcher
pub struct FileWatcher {
    files: Mutex<HashMap<PathBuf, Option<SystemTime>>>,
    events: mpsc::Sender<WatchEvent>,
}

impl FileWatcher {
    pub fn new(events: mpsc::Sender<WatchEvent>) -> Self {
        FileWatcher {
            files: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Start watching `path`; false if it was already watched
    pub fn add(&self, path: PathBuf) -> bool {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        if files.contains_key(&path) {
            return false;
        }
        let modified = modified_time(&path);
        files.insert(path, modified);
        true
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compare every watched file with its last seen state
    ///
    /// Returns the number of changes found. Each one is offered to the event
    /// queue; a full queue drops it.
    pub fn poll(&self) -> usize {
        let mut changes = Vec::new();
        {
            let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
            files.retain(|path, seen| match modified_time(path) {
                Some(modified) if path.exists() => {
                    if *seen != Some(modified) {
                        *seen = Some(modified);
                        changes.push(WatchEvent::Changed(path.clone()));
                    }
                    true
                }
                _ if !path.exists() => {
                    changes.push(WatchEvent::Removed(path.clone()));
                    false
                }
                _ => true,
            });
        }

        let found = changes.len();
        for event in changes {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => tracing::trace!(%event, "watch event coalesced"),
                Err(TrySendError::Closed(_)) => break,
            }
        }
        found
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// One execution cycle of the watched calls
struct Generation {
    id: u64,
    token: CancellationToken,
}

/// Long-running restart loop around an executor
pub struct WatchSession {
    executor: Arc<Executor>,
    calls: Vec<Call>,
    generation: AtomicU64,
}

impl WatchSession {
    pub fn new(executor: Arc<Executor>, calls: Vec<Call>) -> Self {
        WatchSession {
            executor,
            calls,
            generation: AtomicU64::new(0),
        }
    }

    /// Id of the current generation (the first one is 0)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) -> Result<()> {
        let (tx, rx) = mpsc::channel(1);
        let watcher = Arc::new(FileWatcher::new(tx));

        let mut current = self.launch(0);

        let registration = tokio::spawn(registration_loop(
            Arc::clone(&self.executor),
            self.calls.clone(),
            Arc::clone(&watcher),
            interval,
            shutdown.clone(),
        ));

        self.consume(rx, &mut current, &shutdown).await;

        current.token.cancel();
        registration.abort();
        tracing::debug!(generation = current.id, "watch session closed");
        Ok(())
    }

    /// Single consumer of the event queue
    async fn consume(
        &self,
        mut events: mpsc::Receiver<WatchEvent>,
        current: &mut Generation,
        shutdown: &CancellationToken,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.executor.logger().verbose_errf(
                            Color::Magenta,
                            &format!("task: received watch event: {}\n", event),
                        );
                        current.token.cancel();
                        if let Ok(compiler) = self.executor.compiler() {
                            compiler.reset_cache();
                        }
                        *current = self.launch(current.id + 1);
                    }
                    None => return,
                },
                _ = shutdown.cancelled() => return,
            }
        }
    }

    /// Start every call as generation `id`
    fn launch(&self, id: u64) -> Generation {
        let token = CancellationToken::new();
        self.generation.store(id, Ordering::SeqCst);

        if id > 0 {
            self.executor.reset_executions();
            if self.executor.config().watch_call_guard == WatchCallGuard::ResetPerGeneration {
                self.executor.reset_call_counts();
            }
        }
        tracing::debug!(generation = id, calls = self.calls.len(), "generation started");

        for call in &self.calls {
            let executor = Arc::clone(&self.executor);
            let call = call.clone();
            let token = token.clone();
            tokio::spawn(async move {
                if let Err(err) = executor.run_task(&token, &call).await {
                    // Errors of a superseded generation are dropped
                    if !err.is_cancellation() && !token.is_cancelled() {
                        executor.logger().errf(Color::Red, &format!("{}\n", err));
                    }
                }
            });
        }

        Generation { id, token }
    }
}

/// Register new source files, poll for changes, sleep; until shutdown
async fn registration_loop(
    executor: Arc<Executor>,
    calls: Vec<Call>,
    watcher: Arc<FileWatcher>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        if let Err(err) = register_watched_files(&executor, &calls, &watcher) {
            executor.logger().errf(Color::Red, &format!("{}\n", err));
        }
        watcher.poll();

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

/// Add the sources of every call, its dependencies and its task commands
pub fn register_watched_files(executor: &Executor, calls: &[Call], watcher: &FileWatcher) -> Result<()> {
    let mut seen = HashSet::new();
    for call in calls {
        register_task_files(executor, call, watcher, &mut seen)?;
    }
    Ok(())
}

fn register_task_files(
    executor: &Executor,
    call: &Call,
    watcher: &FileWatcher,
    seen: &mut HashSet<(String, Vars)>,
) -> Result<()> {
    if !seen.insert((call.task.clone(), call.vars.clone())) {
        return Ok(());
    }

    let task = executor.compiler()?.compiled_task(call)?;
    for dep in &task.deps {
        register_task_files(executor, dep, watcher, seen)?;
    }
    for cmd in &task.cmds {
        if let CmdKind::Task(sub) = &cmd.kind {
            register_task_files(executor, sub, watcher, seen)?;
        }
    }

    for file in globs(&task.dir, &task.sources) {
        let file = if file.is_absolute() { file } else { task.dir.join(file) };
        if should_ignore_file(&file) {
            continue;
        }
        if watcher.add(file.clone()) {
            executor
                .logger()
                .verbose_outf(Color::Green, &format!("task: watching new file: {}\n", file.display()));
        }
    }
    Ok(())
}

impl Executor {
    /// Run `calls` in watch mode until interrupted
    pub async fn watch_tasks(self: &Arc<Self>, calls: &[Call]) -> Result<()> {
        let names: Vec<&str> = calls.iter().map(|c| c.task.as_str()).collect();
        self.logger().errf(
            Color::Green,
            &format!("task: Started watching for tasks: {}\n", names.join(", ")),
        );

        let interval = self.watch_interval();
        self.logger().verbose_outf(
            Color::Green,
            &format!("task: Watching for changes every {:?}\n", interval),
        );

        let shutdown = CancellationToken::new();
        cancel_on_interrupt(shutdown.clone());

        WatchSession::new(Arc::clone(self), calls.to_vec())
            .run(interval, shutdown)
            .await
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM
pub fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::debug!("interrupt received");
        token.cancel();
    });
}
