//! Taskfile validation

use crate::config::types::{CmdSpec, DeferSpec, Taskfile, TaskSpec};
use crate::error::{ConfigError, ConfigResult};
use crate::runner::{Method, OutputConfig, RunPolicy};
use std::collections::HashSet;

/// Validate a complete Taskfile
pub fn validate_taskfile(taskfile: &Taskfile, version_check: bool) -> ConfigResult<()> {
    if version_check {
        if let Some(version) = &taskfile.version {
            let major = version.split('.').next().unwrap_or_default();
            if major != "3" {
                return Err(ConfigError::UnsupportedVersion(version.clone()));
            }
        }
    }

    if let Some(method) = &taskfile.method {
        method.parse::<Method>()?;
    }

    if let Some(run) = &taskfile.run {
        run.parse::<RunPolicy>()?;
    }

    if let Some(output) = &taskfile.output {
        OutputConfig::from_spec(output).validate()?;
    }

    for (name, task) in taskfile.tasks.iter() {
        validate_task(taskfile, name, task)?;
    }

    detect_circular_dependencies(taskfile)
}

/// Validate a single task
pub fn validate_task(taskfile: &Taskfile, _name: &str, task: &TaskSpec) -> ConfigResult<()> {
    if let Some(method) = &task.method {
        method.parse::<Method>()?;
    }

    if let Some(run) = &task.run {
        run.parse::<RunPolicy>()?;
    }

    for called in called_tasks(task) {
        if !taskfile.tasks.contains_key(called) {
            return Err(ConfigError::TaskNotFound(called.to_string()));
        }
    }

    Ok(())
}

/// Names of every task a task depends on or calls from its commands
fn called_tasks(task: &TaskSpec) -> Vec<&str> {
    let deps = task.deps.iter().map(|d| d.task());
    let cmds = task.cmds.iter().filter_map(|cmd| match cmd {
        CmdSpec::Task(t) => Some(t.task.as_str()),
        CmdSpec::Defer {
            defer: DeferSpec::Task(t),
        } => Some(t.task.as_str()),
        _ => None,
    });
    deps.chain(cmds).collect()
}

/// Detect cycles through deps and task-calling commands
fn detect_circular_dependencies(taskfile: &Taskfile) -> ConfigResult<()> {
    let mut visited = HashSet::new();
    for task_name in taskfile.tasks.keys() {
        let mut stack = Vec::new();
        check_task_cycle(taskfile, task_name, &mut visited, &mut stack)?;
    }
    Ok(())
}

fn check_task_cycle(
    taskfile: &Taskfile,
    task_name: &str,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
) -> ConfigResult<()> {
    if stack.iter().any(|t| t == task_name) {
        stack.push(task_name.to_string());
        return Err(ConfigError::CircularDependency(stack.join(" -> ")));
    }

    if visited.contains(task_name) {
        return Ok(());
    }

    let task = taskfile
        .tasks
        .get(task_name)
        .ok_or_else(|| ConfigError::TaskNotFound(task_name.to_string()))?;

    stack.push(task_name.to_string());
    for called in called_tasks(task) {
        check_task_cycle(taskfile, called, visited, stack)?;
    }
    stack.pop();

    visited.insert(task_name.to_string());
    Ok(())
}
