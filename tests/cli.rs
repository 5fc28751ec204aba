//! Integration tests for the command line

#![cfg(unix)]

mod common;

use assert_cmd::Command;
use common::create_taskfile;
use predicates::prelude::*;

const TASKFILE: &str = r#"
version: '3'
tasks:
  greet:
    desc: Say hello
    cmds:
      - echo "hello ${NAME}"
  fail:
    cmds:
      - exit 3
  internal:
    cmds:
      - touch internal.txt
"#;

fn taskweave() -> Command {
    let mut cmd = Command::cargo_bin("taskweave").unwrap();
    cmd.env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_runs_task_with_cli_vars() {
    let dir = create_taskfile(TASKFILE);

    taskweave()
        .current_dir(dir.path())
        .args(["greet", "NAME=cli"])
        .assert()
        .success()
        .stdout("hello cli\n")
        .stderr(predicate::str::contains("task: [greet] echo \"hello cli\""));
}

#[test]
fn test_exit_code_passes_through() {
    let dir = create_taskfile(TASKFILE);

    taskweave()
        .current_dir(dir.path())
        .arg("fail")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("task: Failed to run task \"fail\": exit status 3"));
}

#[test]
fn test_unknown_task() {
    let dir = create_taskfile(TASKFILE);

    taskweave()
        .args(["-d", dir.path().to_str().unwrap(), "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task: Task \"nope\" does not exist"));
}

#[test]
fn test_list_shows_only_described_tasks() {
    let dir = create_taskfile(TASKFILE);

    taskweave()
        .current_dir(dir.path())
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains("* greet:"))
        .stdout(predicate::str::contains("Say hello"))
        .stdout(predicate::str::contains("internal").not());
}

#[test]
fn test_dry_run_prints_without_running() {
    let dir = create_taskfile(TASKFILE);

    taskweave()
        .current_dir(dir.path())
        .args(["--dry", "internal"])
        .assert()
        .success()
        .stderr(predicate::str::contains("task: [internal] touch internal.txt"));

    assert!(!dir.path().join("internal.txt").exists());
}

#[test]
fn test_summary() {
    let dir = create_taskfile(TASKFILE);

    taskweave()
        .current_dir(dir.path())
        .args(["--summary", "greet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("task: greet"))
        .stdout(predicate::str::contains("Say hello"));
}

#[test]
fn test_missing_taskfile() {
    let dir = tempfile::TempDir::new().unwrap();

    taskweave()
        .args(["-d", dir.path().to_str().unwrap(), "-t", "Missing.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no Taskfile found"));
}

#[test]
fn test_completion_needs_no_taskfile() {
    let dir = tempfile::TempDir::new().unwrap();

    taskweave()
        .current_dir(dir.path())
        .args(["--completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("taskweave"));
}
