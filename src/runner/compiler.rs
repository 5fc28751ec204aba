//! Turning task definitions into resolved tasks
//!
//! The executor only depends on the [`Compiler`] trait. [`TaskfileCompiler`]
//! is the implementation backed by a YAML Taskfile.
//!
//! Variables resolve in this order, later entries winning: special variables
//! (`TASK`, `ROOT_DIR`), Taskfile `vars`, task `vars`, then the call's own
//! variables. The environment is built from the dotenv files, the Taskfile
//! `env` and the task `env`, in that order.

use crate::config::{
    load_dotenv, parse_interval, parse_taskfile_file, resolve_taskfile, validate_taskfile,
    CmdSpec, DeferSpec, DepSpec, PreconditionSpec, RequiredVarSpec, TaskRefSpec, TaskSpec,
    Taskfile, VarSpec,
};
use crate::error::{ConfigError, InterpolationError, Result};
use crate::runner::fingerprint::Method;
use crate::runner::interpolate::{interpolate, interpolate_list, Vars};
use crate::runner::output::OutputConfig;
use crate::runner::task::{Call, Cmd, CmdKind, Glob, Platform, Precondition, RequiredVar, RunPolicy, Task};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::block_in_place;

/// Produces resolved tasks for calls
pub trait Compiler: Send + Sync {
    /// Names of every task, in declaration order
    fn task_names(&self) -> Vec<String>;

    /// Cheap compile that does not evaluate dynamic variables
    ///
    /// Good enough for platform filtering and required-variable checks.
    fn fast_compiled_task(&self, call: &Call) -> Result<Task>;

    /// Full compile with every variable resolved
    fn compiled_task(&self, call: &Call) -> Result<Task>;

    /// Forget cached dynamic variable values
    fn reset_cache(&self);

    /// Taskfile-wide settings
    fn defaults(&self) -> &TaskfileDefaults;
}

/// Settings that apply to every task unless overridden
#[derive(Debug, Clone, Default)]
pub struct TaskfileDefaults {
    pub method: Method,
    pub run: RunPolicy,
    pub silent: bool,
    pub interval: Option<Duration>,
    pub output: OutputConfig,
}

/// Named variables supplied from outside the Taskfile
///
/// Only keys the Taskfile already declares in its `env` are overridden.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub name: String,
    pub vars: Vars,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Environment {
            name: name.into(),
            vars: Vars::new(),
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

/// Compiler backed by a parsed Taskfile
#[derive(Debug)]
pub struct TaskfileCompiler {
    dir: PathBuf,
    taskfile: Taskfile,
    dotenv: Vars,
    environment: Vars,
    defaults: TaskfileDefaults,
    dynamic_cache: Mutex<HashMap<(String, PathBuf), String>>,
}

impl TaskfileCompiler {
    /// Find, parse and validate the Taskfile for `dir`
    pub fn load(dir: &Path, entrypoint: Option<&Path>, version_check: bool) -> Result<Self> {
        let path = resolve_taskfile(dir, entrypoint)?;
        let taskfile = parse_taskfile_file(&path)?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.to_path_buf());

        tracing::debug!(taskfile = %path.display(), tasks = taskfile.tasks.len(), "taskfile loaded");
        Self::from_taskfile(taskfile, root, version_check)
    }

    /// Build a compiler for an already parsed Taskfile rooted at `dir`
    pub fn from_taskfile(taskfile: Taskfile, dir: PathBuf, version_check: bool) -> Result<Self> {
        validate_taskfile(&taskfile, version_check)?;

        let method = match &taskfile.method {
            Some(method) => method.parse()?,
            None => Method::default(),
        };
        let run = match &taskfile.run {
            Some(run) => run.parse()?,
            None => RunPolicy::default(),
        };
        let interval = taskfile.interval.as_deref().map(parse_interval).transpose()?;
        let output = taskfile
            .output
            .as_ref()
            .map(OutputConfig::from_spec)
            .unwrap_or_default();
        let dotenv = load_dotenv(&taskfile, &dir)?;

        Ok(TaskfileCompiler {
            defaults: TaskfileDefaults {
                method,
                run,
                silent: taskfile.silent,
                interval,
                output,
            },
            dir,
            taskfile,
            dotenv,
            environment: Vars::new(),
            dynamic_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Directory of the Taskfile
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn taskfile(&self) -> &Taskfile {
        &self.taskfile
    }

    /// Override declared Taskfile environment variables
    pub fn set_environment(&mut self, environment: &Environment) {
        for (key, value) in &environment.vars {
            if self.taskfile.env.contains_key(key) {
                self.environment.insert(key.clone(), value.clone());
            }
        }
        tracing::debug!(
            environment = %environment.name,
            applied = self.environment.len(),
            "environment applied"
        );
    }

    fn compile(&self, call: &Call, evaluate_dynamic: bool) -> Result<Task> {
        let spec = self
            .taskfile
            .tasks
            .get(&call.task)
            .ok_or_else(|| ConfigError::TaskNotFound(call.task.clone()))?;

        let mut vars = Vars::new();
        vars.insert("TASK".to_string(), call.task.clone());
        vars.insert("ROOT_DIR".to_string(), self.dir.display().to_string());
        self.resolve_vars(&self.taskfile.vars, &mut vars, &self.dir, evaluate_dynamic)?;

        let dir = match &spec.dir {
            Some(d) => {
                let d = PathBuf::from(interpolate(d, &vars)?);
                if d.is_absolute() {
                    d
                } else {
                    self.dir.join(d)
                }
            }
            None => self.dir.clone(),
        };

        self.resolve_vars(&spec.vars, &mut vars, &dir, evaluate_dynamic)?;
        for (key, value) in &call.vars {
            vars.insert(key.clone(), value.clone());
        }

        let mut env = self.dotenv.clone();
        self.resolve_vars_into(&self.taskfile.env, &vars, &mut env, &self.dir, evaluate_dynamic)?;
        for (key, value) in &self.environment {
            env.insert(key.clone(), value.clone());
        }
        self.resolve_vars_into(&spec.env, &vars, &mut env, &dir, evaluate_dynamic)?;

        self.build_task(call, spec, dir, vars, env)
    }

    /// Resolve `specs` into `vars`, each one seeing the ones before it
    fn resolve_vars(
        &self,
        specs: &BTreeMap<String, VarSpec>,
        vars: &mut Vars,
        dir: &Path,
        evaluate_dynamic: bool,
    ) -> Result<()> {
        for (key, spec) in specs {
            let value = self.resolve_var(spec, vars, dir, evaluate_dynamic)?;
            vars.insert(key.clone(), value);
        }
        Ok(())
    }

    fn resolve_vars_into(
        &self,
        specs: &BTreeMap<String, VarSpec>,
        vars: &Vars,
        target: &mut Vars,
        dir: &Path,
        evaluate_dynamic: bool,
    ) -> Result<()> {
        for (key, spec) in specs {
            let value = self.resolve_var(spec, vars, dir, evaluate_dynamic)?;
            target.insert(key.clone(), value);
        }
        Ok(())
    }

    fn resolve_var(&self, spec: &VarSpec, vars: &Vars, dir: &Path, evaluate_dynamic: bool) -> Result<String> {
        match spec {
            VarSpec::Dynamic { sh } => {
                if !evaluate_dynamic {
                    return Ok(String::new());
                }
                let command = interpolate(sh, vars)?;
                Ok(self.dynamic_value(&command, dir)?)
            }
            other => Ok(interpolate(&other.as_static().unwrap_or_default(), vars)?),
        }
    }

    /// Output of a dynamic variable command, cached per command and directory
    fn dynamic_value(&self, command: &str, dir: &Path) -> std::result::Result<String, InterpolationError> {
        let key = (command.to_string(), dir.to_path_buf());
        if let Some(value) = self
            .dynamic_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(value.clone());
        }

        let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let output = blocking(|| Command::new(shell).arg(flag).arg(command).current_dir(dir).output())
            .map_err(|e| InterpolationError::DynamicVariable {
                command: command.to_string(),
                error: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(InterpolationError::DynamicVariable {
                command: command.to_string(),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let value = String::from_utf8_lossy(&output.stdout)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        tracing::trace!(command, value = %value, "dynamic variable evaluated");

        self.dynamic_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value.clone());
        Ok(value)
    }

    fn build_task(&self, call: &Call, spec: &TaskSpec, dir: PathBuf, vars: Vars, env: Vars) -> Result<Task> {
        let render = |s: &str| interpolate(s, &vars);
        let render_opt = |s: &Option<String>| s.as_deref().map(|s| interpolate(s, &vars)).transpose();

        let cmds = spec
            .cmds
            .iter()
            .map(|cmd| compile_cmd(cmd, &vars))
            .collect::<Result<Vec<_>>>()?;

        let deps = spec
            .deps
            .iter()
            .map(|dep| match dep {
                DepSpec::Simple(name) => Ok(Call::new(name.clone())),
                DepSpec::Detailed(detail) => compile_call(detail, &vars),
            })
            .collect::<Result<Vec<_>>>()?;

        let preconditions = spec
            .preconditions
            .iter()
            .map(|p| -> Result<Precondition> {
                match p {
                    PreconditionSpec::Simple(sh) => Ok(Precondition::new(render(sh)?)),
                    PreconditionSpec::Detailed { sh, msg } => {
                        let mut precondition = Precondition::new(render(sh)?);
                        if let Some(msg) = msg {
                            precondition.msg = render(msg)?;
                        }
                        Ok(precondition)
                    }
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let sources = interpolate_list(&spec.sources, &vars)?
            .iter()
            .map(|s| Glob::parse(s))
            .collect();
        let generates = interpolate_list(&spec.generates, &vars)?
            .iter()
            .map(|s| Glob::parse(s))
            .collect();

        let method = spec.method.as_deref().map(str::parse::<Method>).transpose()?;
        let run = spec.run.as_deref().map(str::parse::<RunPolicy>).transpose()?;

        let requires = spec
            .requires
            .iter()
            .flat_map(|r| r.vars.iter())
            .map(|v| match v {
                RequiredVarSpec::Name(name) => RequiredVar {
                    name: name.clone(),
                    allowed: Vec::new(),
                },
                RequiredVarSpec::Constrained { name, allowed } => RequiredVar {
                    name: name.clone(),
                    allowed: allowed.clone(),
                },
            })
            .collect();

        let prefix = match &spec.prefix {
            Some(prefix) => render(prefix)?,
            None => call.task.clone(),
        };

        Ok(Task {
            task: call.task.clone(),
            desc: render_opt(&spec.desc)?,
            summary: render_opt(&spec.summary)?,
            dir,
            cmds,
            deps,
            preconditions,
            status: interpolate_list(&spec.status, &vars)?,
            sources,
            generates,
            method,
            run,
            platforms: parse_platforms(&spec.platforms),
            silent: spec.silent,
            ignore_error: spec.ignore_error,
            prompt: interpolate_list(&spec.prompt, &vars)?,
            requires,
            prefix,
            vars,
            env,
        })
    }
}

impl Compiler for TaskfileCompiler {
    fn task_names(&self) -> Vec<String> {
        self.taskfile.tasks.keys().cloned().collect()
    }

    fn fast_compiled_task(&self, call: &Call) -> Result<Task> {
        self.compile(call, false)
    }

    fn compiled_task(&self, call: &Call) -> Result<Task> {
        self.compile(call, true)
    }

    fn reset_cache(&self) {
        self.dynamic_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn defaults(&self) -> &TaskfileDefaults {
        &self.defaults
    }
}

/// Run blocking work without stalling the other tasks of a multi-threaded runtime
///
/// Compiles happen from async callers, but [`Compiler`] is synchronous.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => block_in_place(f),
        _ => f(),
    }
}

fn compile_call(spec: &TaskRefSpec, vars: &Vars) -> Result<Call> {
    let mut call_vars = Vars::new();
    for (key, value) in &spec.vars {
        call_vars.insert(key.clone(), interpolate(value, vars)?);
    }
    Ok(Call::new(spec.task.clone())
        .with_vars(call_vars)
        .silent(spec.silent))
}

fn compile_cmd(spec: &CmdSpec, vars: &Vars) -> Result<Cmd> {
    Ok(match spec {
        CmdSpec::Simple(cmd) => Cmd::shell(interpolate(cmd, vars)?),
        CmdSpec::Task(task) => {
            let silent = task.silent;
            let mut cmd = Cmd::task(compile_call(task, vars)?);
            cmd.silent = silent;
            cmd
        }
        CmdSpec::Detailed(detail) => Cmd {
            kind: CmdKind::Shell(interpolate(&detail.cmd, vars)?),
            silent: detail.silent,
            ignore_error: detail.ignore_error,
            defer: detail.defer,
            platforms: parse_platforms(&detail.platforms),
        },
        CmdSpec::Defer { defer } => match defer {
            DeferSpec::Shell(cmd) => Cmd::shell(interpolate(cmd, vars)?).deferred(),
            DeferSpec::Task(task) => Cmd::task(compile_call(task, vars)?).deferred(),
        },
    })
}

fn parse_platforms(platforms: &[String]) -> Vec<Platform> {
    platforms.iter().filter_map(|p| Platform::parse(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_taskfile;
    use tempfile::TempDir;

    fn compiler(yaml: &str) -> (TaskfileCompiler, TempDir) {
        let dir = TempDir::new().unwrap();
        let taskfile = parse_taskfile(yaml).unwrap();
        let compiler = TaskfileCompiler::from_taskfile(taskfile, dir.path().to_path_buf(), true).unwrap();
        (compiler, dir)
    }

    #[test]
    fn test_variable_precedence() {
        let (compiler, _dir) = compiler(
            r#"
version: '3'
vars:
  GREETING: hello
  NAME: world
tasks:
  greet:
    vars:
      NAME: task
    cmds:
      - echo ${GREETING} ${NAME} from ${TASK}
"#,
        );

        let task = compiler.compiled_task(&Call::new("greet")).unwrap();
        assert!(matches!(&task.cmds[0].kind, CmdKind::Shell(s) if s == "echo hello task from greet"));

        let task = compiler
            .compiled_task(&Call::new("greet").with_var("NAME", "caller"))
            .unwrap();
        assert!(matches!(&task.cmds[0].kind, CmdKind::Shell(s) if s == "echo hello caller from greet"));
    }

    #[test]
    fn test_dynamic_vars_only_in_full_compile() {
        let (compiler, _dir) = compiler(
            r#"
version: '3'
vars:
  REV:
    sh: echo abc123
tasks:
  show:
    cmds:
      - echo ${REV}
"#,
        );

        let fast = compiler.fast_compiled_task(&Call::new("show")).unwrap();
        assert_eq!(fast.vars.get("REV").map(String::as_str), Some(""));

        let full = compiler.compiled_task(&Call::new("show")).unwrap();
        assert_eq!(full.vars.get("REV").map(String::as_str), Some("abc123"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dynamic_vars_inside_runtime() {
        let (compiler, _dir) = compiler(
            r#"
version: '3'
vars:
  SLOW:
    sh: sleep 0.2 && echo done
tasks:
  show:
    cmds: [echo ${SLOW}]
"#,
        );

        let ticker = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            "ticked"
        });
        let task = compiler.compiled_task(&Call::new("show")).unwrap();
        assert_eq!(task.vars.get("SLOW").map(String::as_str), Some("done"));
        assert_eq!(ticker.await.unwrap(), "ticked");
    }

    #[tokio::test]
    async fn test_dynamic_vars_on_current_thread_runtime() {
        let (compiler, _dir) = compiler(
            "version: '3'\nvars:\n  REV:\n    sh: echo abc\ntasks:\n  show:\n    cmds: [echo ${REV}]\n",
        );
        let task = compiler.compiled_task(&Call::new("show")).unwrap();
        assert_eq!(task.vars.get("REV").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_task_fields_are_resolved() {
        let (compiler, dir) = compiler(
            r#"
version: '3'
tasks:
  build:
    dir: out
    sources: ['src/**/*.rs', '!src/generated.rs']
    method: checksum
    platforms: [linux, darwin/arm64]
    preconditions:
      - test -f Cargo.toml
      - sh: test -n "$HOME"
        msg: HOME must be set
    cmds:
      - task: lint
        vars: { LEVEL: strict }
      - defer: echo cleanup
  lint:
    cmds: [echo lint]
"#,
        );

        let task = compiler.compiled_task(&Call::new("build")).unwrap();
        assert_eq!(task.dir, dir.path().join("out"));
        assert_eq!(task.sources.len(), 2);
        assert!(task.sources[1].negate);
        assert_eq!(task.method, Some(Method::WhenChanged));
        assert_eq!(task.platforms.len(), 2);
        assert_eq!(task.preconditions[0].msg, "`test -f Cargo.toml` failed");
        assert_eq!(task.preconditions[1].msg, "HOME must be set");
        assert!(matches!(&task.cmds[0].kind, CmdKind::Task(c) if c.task == "lint" && c.vars["LEVEL"] == "strict"));
        assert!(task.cmds[1].defer);
        assert_eq!(task.prefix, "build");
    }

    #[test]
    fn test_environment_overrides_declared_keys_only() {
        let (mut compiler, _dir) = compiler(
            r#"
version: '3'
env:
  STAGE: dev
tasks:
  deploy:
    cmds: [echo $STAGE]
"#,
        );

        compiler.set_environment(
            &Environment::new("prod")
                .with_var("STAGE", "prod")
                .with_var("UNDECLARED", "x"),
        );

        let task = compiler.compiled_task(&Call::new("deploy")).unwrap();
        assert_eq!(task.env.get("STAGE").map(String::as_str), Some("prod"));
        assert!(!task.env.contains_key("UNDECLARED"));
    }

    #[test]
    fn test_unknown_task() {
        let (compiler, _dir) = compiler("version: '3'\ntasks:\n  a:\n    cmds: [echo a]\n");
        let err = compiler.compiled_task(&Call::new("missing")).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_defaults() {
        let (compiler, _dir) = compiler(
            r#"
version: '3'
method: timestamp
run: once
interval: 250ms
silent: true
output: prefixed
tasks: {}
"#,
        );
        let defaults = compiler.defaults();
        assert_eq!(defaults.method, Method::Timestamp);
        assert_eq!(defaults.run, RunPolicy::Once);
        assert_eq!(defaults.interval, Some(Duration::from_millis(250)));
        assert!(defaults.silent);
        assert_eq!(defaults.output.name, "prefixed");
    }
}
