//! Runtime task representation
//!
//! A [`Task`] is what the compiler produces for one [`Call`]: every variable
//! has been resolved and every path is absolute. Tasks are not modified after
//! compilation.

use crate::error::ConfigError;
use crate::runner::fingerprint::Method;
use crate::runner::interpolate::Vars;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One request to run a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Call {
    /// Name of the task to run
    pub task: String,

    /// Variables passed by the caller
    pub vars: Vars,

    /// Suppress command echoing for this call
    pub silent: bool,

    /// True when issued by another task (dependency or task command)
    pub indirect: bool,
}

impl Call {
    pub fn new(task: impl Into<String>) -> Self {
        Call {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_vars(mut self, vars: Vars) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Mark the call as issued by another task
    pub fn indirect(mut self) -> Self {
        self.indirect = true;
        self
    }
}

/// A fully resolved task
#[derive(Debug, Clone, Default)]
pub struct Task {
    /// Name the task is declared under
    pub task: String,

    pub desc: Option<String>,
    pub summary: Option<String>,

    /// Absolute working directory
    pub dir: PathBuf,

    pub cmds: Vec<Cmd>,
    pub deps: Vec<Call>,
    pub preconditions: Vec<Precondition>,

    /// Status predicates; any non-zero exit means "not up to date"
    pub status: Vec<String>,

    pub sources: Vec<Glob>,
    pub generates: Vec<Glob>,

    /// Freshness method; `None` uses the Taskfile default
    pub method: Option<Method>,

    /// How identical calls within one run share an execution; `None` uses
    /// the Taskfile default
    pub run: Option<RunPolicy>,

    pub platforms: Vec<Platform>,
    pub silent: bool,
    pub ignore_error: bool,
    pub prompt: Vec<String>,

    /// Resolved variables (also used to render output banners)
    pub vars: Vars,

    /// Environment passed to every command
    pub env: Vars,

    pub requires: Vec<RequiredVar>,

    /// Prefix for the prefixed output style
    pub prefix: String,
}

impl Task {
    /// Display name of the task
    pub fn name(&self) -> &str {
        &self.task
    }

    /// Identity used for fingerprint records and in-flight serialisation
    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity {
            name: self.task.clone(),
            dir: self.dir.clone(),
        }
    }

    /// Number of commands, deferred ones included
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }
}

/// Which calls of a task within one run execute it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RunPolicy {
    /// Every call executes
    #[default]
    Always,

    /// The first call executes, later ones wait for it and skip
    Once,

    /// Calls with the same resolved variables share one execution
    WhenChanged,
}

impl FromStr for RunPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(RunPolicy::Always),
            "once" => Ok(RunPolicy::Once),
            "when_changed" => Ok(RunPolicy::WhenChanged),
            other => Err(ConfigError::InvalidRun(other.to_string())),
        }
    }
}

impl fmt::Display for RunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunPolicy::Always => "always",
            RunPolicy::Once => "once",
            RunPolicy::WhenChanged => "when_changed",
        })
    }
}

/// A task is uniquely identified by its name and directory during a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskIdentity {
    pub name: String,
    pub dir: PathBuf,
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.dir.display())
    }
}

/// One entry of a task's command list
#[derive(Debug, Clone)]
pub struct Cmd {
    pub kind: CmdKind,
    pub silent: bool,
    pub ignore_error: bool,

    /// Run after the main command list, whatever its outcome
    pub defer: bool,

    pub platforms: Vec<Platform>,
}

impl Cmd {
    pub fn shell(cmd: impl Into<String>) -> Self {
        Cmd {
            kind: CmdKind::Shell(cmd.into()),
            silent: false,
            ignore_error: false,
            defer: false,
            platforms: Vec::new(),
        }
    }

    pub fn task(call: Call) -> Self {
        Cmd {
            kind: CmdKind::Task(call),
            silent: false,
            ignore_error: false,
            defer: false,
            platforms: Vec::new(),
        }
    }

    pub fn deferred(mut self) -> Self {
        self.defer = true;
        self
    }
}

/// What a command does
#[derive(Debug, Clone)]
pub enum CmdKind {
    /// Shell command line
    Shell(String),

    /// Run another task
    Task(Call),
}

/// A gating shell predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub sh: String,
    pub msg: String,
}

impl Precondition {
    pub fn new(sh: impl Into<String>) -> Self {
        let sh = sh.into();
        Precondition {
            msg: format!("`{}` failed", sh),
            sh,
        }
    }
}

/// A source or generated file pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    pub glob: String,

    /// Matches of a negated pattern are removed from the final set
    pub negate: bool,
}

impl Glob {
    /// Parse a pattern, treating a leading `!` as negation
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_prefix('!') {
            Some(rest) => Glob {
                glob: rest.to_string(),
                negate: true,
            },
            None => Glob {
                glob: pattern.to_string(),
                negate: false,
            },
        }
    }
}

/// A variable that must be set before the task can run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredVar {
    pub name: String,

    /// Allowed values; empty means any value
    pub allowed: Vec<String>,
}

/// An `os`, `arch` or `os/arch` platform constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: Option<String>,
    pub arch: Option<String>,
}

const KNOWN_OS: &[&str] = &[
    "linux", "darwin", "macos", "windows", "freebsd", "openbsd", "netbsd", "dragonfly",
    "solaris", "illumos", "android", "ios",
];

impl Platform {
    /// Parse `linux`, `amd64` or `linux/amd64`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.split_once('/') {
            Some((os, arch)) => Some(Platform {
                os: Some(normalize_os(os)),
                arch: Some(normalize_arch(arch)),
            }),
            None if value.is_empty() => None,
            None if KNOWN_OS.contains(&value) => Some(Platform {
                os: Some(normalize_os(value)),
                arch: None,
            }),
            None => Some(Platform {
                os: None,
                arch: Some(normalize_arch(value)),
            }),
        }
    }

    /// Whether this constraint matches the given os/arch pair
    pub fn matches(&self, os: &str, arch: &str) -> bool {
        self.os.as_deref().map_or(true, |o| o == os) && self.arch.as_deref().map_or(true, |a| a == arch)
    }
}

fn normalize_os(os: &str) -> String {
    match os {
        "darwin" => "macos".to_string(),
        other => other.to_string(),
    }
}

fn normalize_arch(arch: &str) -> String {
    match arch {
        "amd64" => "x86_64".to_string(),
        "arm64" => "aarch64".to_string(),
        "386" => "x86".to_string(),
        other => other.to_string(),
    }
}

/// Whether a platform list allows running on this machine (empty allows all)
pub fn should_run_on_current_platform(platforms: &[Platform]) -> bool {
    platforms.is_empty()
        || platforms
            .iter()
            .any(|p| p.matches(std::env::consts::OS, std::env::consts::ARCH))
}
