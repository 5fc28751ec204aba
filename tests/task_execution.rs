//! Integration tests for task execution

#![cfg(unix)]

mod common;

use common::{create_taskfile, harness, read_lines};
use std::fs;
use taskweave::error::{ExecutionError, TaskError};
use taskweave::runner::{Call, ExecutorConfig};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_dependencies_respect_concurrency_limit() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  default:
    deps: [a, b, c, d]
  a:
    cmds:
      - echo start >> log.txt; sleep 0.2; echo end >> log.txt
  b:
    cmds:
      - echo start >> log.txt; sleep 0.2; echo end >> log.txt
  c:
    cmds:
      - echo start >> log.txt; sleep 0.2; echo end >> log.txt
  d:
    cmds:
      - echo start >> log.txt; sleep 0.2; echo end >> log.txt
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()).with_concurrency(2).with_silent(true));

    h.executor
        .run(&CancellationToken::new(), &[Call::new("default")])
        .await
        .unwrap();

    let lines = read_lines(&dir.path().join("log.txt"));
    let mut running = 0;
    let mut peak = 0;
    for line in &lines {
        if line == "start" {
            running += 1;
            peak = peak.max(running);
        } else {
            running -= 1;
        }
    }
    assert_eq!(lines.iter().filter(|l| *l == "start").count(), 4);
    assert!(peak <= 2, "peak concurrency was {}", peak);
}

#[tokio::test]
async fn test_call_limit_fails_the_call_past_the_maximum() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  child:
    cmds: [echo child]
  default:
    cmds:
      - task: child
      - task: child
      - task: child
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()).with_max_task_calls(2).with_silent(true));

    let err = h
        .executor
        .run(&CancellationToken::new(), &[Call::new("default")])
        .await
        .unwrap_err();

    match err.root() {
        TaskError::Execution(ExecutionError::CalledTooManyTimes { task, max }) => {
            assert_eq!(task, "child");
            assert_eq!(*max, 2);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.stdout.contents(), "child\nchild\n");
}

#[tokio::test]
async fn test_deferred_commands_see_the_exit_code() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  default:
    cmds:
      - defer: echo "cleanup after $EXIT_CODE"
      - echo working
      - exit 3
      - echo unreachable
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()).with_silent(true));

    let err = h
        .executor
        .run(&CancellationToken::new(), &[Call::new("default")])
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(3));
    assert_eq!(h.stdout.contents(), "working\ncleanup after 3\n");
}

#[tokio::test]
async fn test_unmet_precondition_skips_top_level_task() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  default:
    preconditions:
      - sh: test -f missing.txt
        msg: missing.txt is required
    cmds:
      - touch ran.txt
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()));

    h.executor
        .run(&CancellationToken::new(), &[Call::new("default")])
        .await
        .unwrap();

    assert!(!dir.path().join("ran.txt").exists());
    assert!(h.stderr.contents().contains("missing.txt is required"));
}

#[tokio::test]
async fn test_unmet_precondition_is_reported_by_run_task() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  default:
    preconditions: [test -f missing.txt]
    cmds:
      - touch ran.txt
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()).with_silent(true));

    let err = h
        .executor
        .run_task(&CancellationToken::new(), &Call::new("default"))
        .await
        .unwrap_err();

    assert!(err.is_precondition_not_met());
    assert!(!dir.path().join("ran.txt").exists());
    assert!(!dir.path().join(".task").join("checksum").exists());
}

#[tokio::test]
async fn test_failing_deferred_command_runs_once() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  default:
    cmds:
      - cmd: echo deferred >> runs.txt; exit 5
        defer: true
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()).with_silent(true));

    let err = h
        .executor
        .run(&CancellationToken::new(), &[Call::new("default")])
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(5));
    assert_eq!(read_lines(&dir.path().join("runs.txt")), ["deferred"]);
}

#[tokio::test]
async fn test_sources_make_a_task_up_to_date() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  build:
    sources: ["src/*.txt"]
    cmds:
      - echo run >> runs.txt
"#,
    );
    fs::create_dir(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/a.txt"), "one").unwrap();

    let ctx = CancellationToken::new();
    let runs = dir.path().join("runs.txt");

    let h = harness(ExecutorConfig::new(dir.path()));
    h.executor.run(&ctx, &[Call::new("build")]).await.unwrap();
    h.executor.run(&ctx, &[Call::new("build")]).await.unwrap();
    assert_eq!(read_lines(&runs).len(), 1);
    assert!(h.stderr.contents().contains("task: Task \"build\" is up to date"));

    fs::write(dir.path().join("src/a.txt"), "two").unwrap();
    h.executor.run(&ctx, &[Call::new("build")]).await.unwrap();
    assert_eq!(read_lines(&runs).len(), 2);

    let forced = harness(ExecutorConfig::new(dir.path()).with_force(true));
    forced.executor.run(&ctx, &[Call::new("build")]).await.unwrap();
    assert_eq!(read_lines(&runs).len(), 3);
}

#[tokio::test]
async fn test_once_runs_a_single_time() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  setup:
    method: once
    cmds:
      - echo run >> runs.txt
  default:
    deps: [setup]
    cmds:
      - task: setup
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()).with_silent(true));

    h.executor
        .run(&CancellationToken::new(), &[Call::new("default")])
        .await
        .unwrap();

    assert_eq!(read_lines(&dir.path().join("runs.txt")).len(), 1);
}

#[tokio::test]
async fn test_status_checks_make_a_task_up_to_date() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  generate:
    status:
      - test -f out.txt
    cmds:
      - echo run >> runs.txt
      - touch out.txt
"#,
    );
    let ctx = CancellationToken::new();
    let h = harness(ExecutorConfig::new(dir.path()).with_silent(true));

    h.executor.run(&ctx, &[Call::new("generate")]).await.unwrap();
    h.executor.run(&ctx, &[Call::new("generate")]).await.unwrap();

    assert_eq!(read_lines(&dir.path().join("runs.txt")).len(), 1);
}

#[tokio::test]
async fn test_only_direct_calls_are_wrapped() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  fail:
    cmds: [exit 2]
  via-dep:
    deps: [fail]
  direct:
    cmds: [exit 4]
"#,
    );
    let ctx = CancellationToken::new();
    let h = harness(ExecutorConfig::new(dir.path()).with_silent(true));

    let err = h.executor.run(&ctx, &[Call::new("via-dep")]).await.unwrap_err();
    assert_eq!(err.to_string(), "exit status 2");

    let err = h.executor.run(&ctx, &[Call::new("direct")]).await.unwrap_err();
    assert_eq!(err.to_string(), "task: Failed to run task \"direct\": exit status 4");
    assert_eq!(err.exit_code(), Some(4));
}

#[tokio::test]
async fn test_parallel_calls() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  one:
    cmds: [touch one.txt]
  two:
    cmds: [touch two.txt]
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()).with_parallel(true).with_silent(true));

    h.executor
        .run(&CancellationToken::new(), &[Call::new("one"), Call::new("two")])
        .await
        .unwrap();

    assert!(dir.path().join("one.txt").exists());
    assert!(dir.path().join("two.txt").exists());
}

#[tokio::test]
async fn test_call_vars_override_taskfile_vars() {
    let dir = create_taskfile(
        r#"
version: '3'
vars:
  NAME: world
tasks:
  greet:
    cmds: ['echo hello ${NAME}']
"#,
    );
    let ctx = CancellationToken::new();
    let h = harness(ExecutorConfig::new(dir.path()).with_silent(true));

    h.executor.run(&ctx, &[Call::new("greet")]).await.unwrap();
    h.executor
        .run(&ctx, &[Call::new("greet").with_var("NAME", "there")])
        .await
        .unwrap();

    assert_eq!(h.stdout.contents(), "hello world\nhello there\n");
}

#[tokio::test]
async fn test_unknown_task_is_rejected_before_running() {
    let dir = create_taskfile(
        r#"
version: '3'
tasks:
  default:
    cmds: [touch ran.txt]
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()));

    let err = h
        .executor
        .run(&CancellationToken::new(), &[Call::new("default"), Call::new("nope")])
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "task: Task \"nope\" does not exist");
    assert!(!dir.path().join("ran.txt").exists());
}

#[tokio::test]
async fn test_group_output_keeps_task_output_together() {
    let dir = create_taskfile(
        r#"
version: '3'
output:
  group:
    begin: "begin ${TASK}"
    end: "end ${TASK}"
tasks:
  default:
    cmds: ['echo inside']
"#,
    );
    let h = harness(ExecutorConfig::new(dir.path()).with_silent(true));

    h.executor
        .run(&CancellationToken::new(), &[Call::new("default")])
        .await
        .unwrap();

    assert_eq!(h.stdout.contents(), "begin default\ninside\nend default\n");
}
