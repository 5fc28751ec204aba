//! Main CLI application

use crate::config::parse_interval;
use crate::error::{ConfigError, Result};
use crate::runner::{
    cancel_on_interrupt, Call, Executor, ExecutorConfig, GroupOptions, OutputConfig, TaskRunner,
    TaskSorter, Vars, WatchCallGuard, DEFAULT_MAX_TASK_CALLS,
};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Task run when none is named on the command line
pub const DEFAULT_TASK: &str = "default";

/// What the command line asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Run,
    List { all: bool },
    Completion(Shell),
}

/// A parsed command line
#[derive(Debug)]
pub struct Invocation {
    pub action: Action,
    pub config: ExecutorConfig,
    pub calls: Vec<Call>,
}

/// CLI application
pub struct App {
    /// The clap command
    command: Command,
}

impl App {
    pub fn new() -> Self {
        App {
            command: build_command(),
        }
    }

    /// Run the application with the process arguments
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_from(std::env::args_os()).await
    }

    /// Run the application with the given arguments
    pub async fn run_from<I, T>(mut self, args: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.command.clone().try_get_matches_from(args)?;
        let invocation = parse_invocation(&matches)?;

        if let Action::Completion(shell) = invocation.action {
            let name = self.command.get_name().to_string();
            clap_complete::generate(shell, &mut self.command, name, &mut io::stdout());
            return Ok(());
        }

        let mut executor = Executor::new(invocation.config);
        executor.setup()?;

        if let Action::List { all } = invocation.action {
            executor.print_tasks(all)?;
            return Ok(());
        }

        let executor = Arc::new(executor);
        let ctx = CancellationToken::new();
        if !executor.config().watch {
            cancel_on_interrupt(ctx.clone());
        }

        executor.run(&ctx, &invocation.calls).await?;
        Ok(())
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("taskweave")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A dependency-aware YAML task runner")
        .arg(
            Arg::new("args")
                .value_name("TASK|VAR=VALUE")
                .help("Tasks to run, and variables passed to every one of them")
                .num_args(0..)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Sets directory of execution"),
        )
        .arg(
            Arg::new("taskfile")
                .short('t')
                .long("taskfile")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Choose which Taskfile to run (defaults to Taskfile.yml)"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .help("Forces execution of the directly called task")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("force-all")
                .long("force-all")
                .help("Forces execution of the called task and all its dependencies")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("watch")
                .short('w')
                .long("watch")
                .help("Re-runs the given tasks when their sources change")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("interval")
                .short('I')
                .long("interval")
                .value_name("DURATION")
                .help("Interval between checks for changes (e.g. 500ms, 5s)"),
        )
        .arg(
            Arg::new("concurrency")
                .short('C')
                .long("concurrency")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .help("Limits the number of commands running at once (0 is unlimited)"),
        )
        .arg(
            Arg::new("dry")
                .short('n')
                .long("dry")
                .help("Prints the commands that would run without running them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("STYLE")
                .value_parser(["interleaved", "group", "prefixed"])
                .help("Sets output style"),
        )
        .arg(
            Arg::new("output-group-begin")
                .long("output-group-begin")
                .value_name("TEMPLATE")
                .help("Message printed before a task's grouped output"),
        )
        .arg(
            Arg::new("output-group-end")
                .long("output-group-end")
                .value_name("TEMPLATE")
                .help("Message printed after a task's grouped output"),
        )
        .arg(
            Arg::new("output-group-error-only")
                .long("output-group-error-only")
                .help("Swallows grouped output of commands that succeed")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Disables echoing of commands")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enables verbose mode")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("yes")
                .short('y')
                .long("yes")
                .help("Assumes \"yes\" as answer to all prompts")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("parallel")
                .short('p')
                .long("parallel")
                .help("Runs the given tasks in parallel")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("summary")
                .long("summary")
                .help("Shows a summary of the given tasks")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .help("Lists tasks that have a description")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-all")
                .short('a')
                .long("list-all")
                .help("Lists all tasks")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("sort")
                .long("sort")
                .value_name("ORDER")
                .value_parser(["default", "alphanumeric", "none"])
                .help("Order of listed tasks"),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disables colored output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("disable-version-check")
                .long("disable-version-check")
                .help("Accepts Taskfiles of any schema version")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("max-task-calls")
                .long("max-task-calls")
                .value_name("N")
                .value_parser(value_parser!(u32))
                .help("Fails when one task is called more often than this in a run"),
        )
        .arg(
            Arg::new("watch-call-guard")
                .long("watch-call-guard")
                .value_name("POLICY")
                .value_parser(["disabled", "reset"])
                .help("Whether the call limit applies in watch mode"),
        )
        .arg(
            Arg::new("completion")
                .long("completion")
                .value_name("SHELL")
                .value_parser(value_parser!(Shell))
                .help("Generates a shell completion script"),
        )
}

/// Turn parsed arguments into an [`Invocation`]
pub fn parse_invocation(matches: &ArgMatches) -> Result<Invocation> {
    let args: Vec<String> = matches
        .get_many::<String>("args")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let (mut tasks, vars) = split_args(&args);
    if tasks.is_empty() {
        tasks.push(DEFAULT_TASK.to_string());
    }
    let calls = tasks
        .into_iter()
        .map(|task| Call::new(task).with_vars(vars.clone()))
        .collect();

    let action = if let Some(shell) = matches.get_one::<Shell>("completion") {
        Action::Completion(*shell)
    } else if matches.get_flag("list") || matches.get_flag("list-all") {
        Action::List {
            all: matches.get_flag("list-all"),
        }
    } else {
        Action::Run
    };

    Ok(Invocation {
        action,
        config: build_config(matches)?,
        calls,
    })
}

fn build_config(matches: &ArgMatches) -> Result<ExecutorConfig> {
    let dir = matches
        .get_one::<PathBuf>("dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = ExecutorConfig::new(dir)
        .with_force(matches.get_flag("force"))
        .with_force_all(matches.get_flag("force-all"))
        .with_watch(matches.get_flag("watch"))
        .with_dry(matches.get_flag("dry"))
        .with_silent(matches.get_flag("silent"))
        .with_verbose(matches.get_flag("verbose"))
        .with_assume_yes(matches.get_flag("yes"))
        .with_parallel(matches.get_flag("parallel"))
        .with_summary(matches.get_flag("summary"))
        .with_version_check(!matches.get_flag("disable-version-check"))
        .with_output(get_output(matches)?)
        .with_concurrency(matches.get_one::<usize>("concurrency").copied().unwrap_or(0))
        .with_max_task_calls(
            matches
                .get_one::<u32>("max-task-calls")
                .copied()
                .unwrap_or(DEFAULT_MAX_TASK_CALLS),
        );

    if matches.get_flag("no-color") {
        config = config.with_color(false);
    }
    if let Some(entrypoint) = matches.get_one::<PathBuf>("taskfile") {
        config = config.with_entrypoint(entrypoint);
    }
    if let Some(interval) = matches.get_one::<String>("interval") {
        config = config.with_interval(parse_interval(interval)?);
    }
    if let Some(sort) = matches.get_one::<String>("sort") {
        config = config.with_sorter(sort.parse::<TaskSorter>()?);
    }
    if let Some(guard) = matches.get_one::<String>("watch-call-guard") {
        config = config.with_watch_call_guard(guard.parse::<WatchCallGuard>()?);
    }
    Ok(config)
}

/// Output settings from the command line; unset when no flag was given
fn get_output(matches: &ArgMatches) -> Result<OutputConfig> {
    let group = GroupOptions {
        begin: matches.get_one::<String>("output-group-begin").cloned(),
        end: matches.get_one::<String>("output-group-end").cloned(),
        error_only: matches.get_flag("output-group-error-only"),
    };
    let output = match matches.get_one::<String>("output") {
        Some(name) => OutputConfig {
            name: name.clone(),
            group,
        },
        None if group.is_set() => {
            return Err(ConfigError::InvalidOutput(
                "the output-group flags require --output group".to_string(),
            )
            .into())
        }
        None => OutputConfig::default(),
    };
    output.validate()?;
    Ok(output)
}

/// Split positional arguments into task names and `VAR=value` pairs
pub fn split_args(args: &[String]) -> (Vec<String>, Vars) {
    let mut tasks = Vec::new();
    let mut vars = Vars::new();
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                vars.insert(name.to_string(), value.to_string());
            }
            _ => tasks.push(arg.clone()),
        }
    }
    (tasks, vars)
}

/// Run the CLI application with the process arguments
pub async fn run() -> anyhow::Result<()> {
    App::new().run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn invocation(args: &[&str]) -> Invocation {
        let matches = build_command().get_matches_from(args);
        parse_invocation(&matches).unwrap()
    }

    #[test]
    fn test_split_args() {
        let args: Vec<String> = ["build", "ENV=prod", "test", "EMPTY="]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (tasks, vars) = split_args(&args);
        assert_eq!(tasks, ["build", "test"]);
        assert_eq!(vars.get("ENV").map(String::as_str), Some("prod"));
        assert_eq!(vars.get("EMPTY").map(String::as_str), Some(""));
    }

    #[test]
    fn test_default_task_when_none_given() {
        let inv = invocation(&["taskweave", "GREETING=hi"]);
        assert_eq!(inv.action, Action::Run);
        assert_eq!(inv.calls.len(), 1);
        assert_eq!(inv.calls[0].task, DEFAULT_TASK);
        assert_eq!(inv.calls[0].vars.get("GREETING").map(String::as_str), Some("hi"));
    }

    #[test]
    fn test_flags_reach_config() {
        let inv = invocation(&[
            "taskweave", "-f", "-C", "2", "-n", "-s", "-I", "500ms", "--sort", "none", "--max-task-calls", "10",
            "--watch-call-guard", "reset", "build",
        ]);
        let config = &inv.config;
        assert!(config.force);
        assert!(!config.force_all);
        assert_eq!(config.concurrency, 2);
        assert!(config.dry);
        assert!(config.silent);
        assert_eq!(config.interval, Some(Duration::from_millis(500)));
        assert_eq!(config.sorter, TaskSorter::None);
        assert_eq!(config.max_task_calls, 10);
        assert_eq!(config.watch_call_guard, WatchCallGuard::ResetPerGeneration);
        assert_eq!(inv.calls[0].task, "build");
    }

    #[test]
    fn test_list_all() {
        let inv = invocation(&["taskweave", "--list-all"]);
        assert_eq!(inv.action, Action::List { all: true });
    }

    #[test]
    fn test_group_output_flags() {
        let inv = invocation(&["taskweave", "-o", "group", "--output-group-begin", "::group::{{.TASK}}"]);
        assert_eq!(inv.config.output.name, "group");
        assert_eq!(inv.config.output.group.begin.as_deref(), Some("::group::{{.TASK}}"));
    }

    #[test]
    fn test_group_flags_without_group_style_are_rejected() {
        let matches = build_command().get_matches_from(["taskweave", "--output-group-error-only"]);
        assert!(parse_invocation(&matches).is_err());

        let matches = build_command().get_matches_from(["taskweave", "-o", "prefixed", "--output-group-end", "x"]);
        assert!(parse_invocation(&matches).is_err());
    }

    #[test]
    fn test_invalid_interval() {
        let matches = build_command().get_matches_from(["taskweave", "-I", "soon"]);
        assert!(parse_invocation(&matches).is_err());
    }
}
