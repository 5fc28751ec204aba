//! Shell command execution
//!
//! Commands run through the platform shell. Output is copied into the
//! writers handed in by the caller, and a cancelled context kills the child.

use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::interpolate::Vars;
use std::io::{self, Write};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[cfg(not(windows))]
const SHELL: &[&str] = &["sh", "-c"];
#[cfg(windows)]
const SHELL: &[&str] = &["cmd", "/C"];

/// Everything needed to run one shell command
pub struct RunCommandOptions<'a> {
    pub command: &'a str,
    pub dir: &'a Path,
    pub env: &'a Vars,
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

impl<'a> RunCommandOptions<'a> {
    /// Options that discard all output
    pub fn quiet(command: &'a str, dir: &'a Path, env: &'a Vars) -> Self {
        RunCommandOptions {
            command,
            dir,
            env,
            stdout: Box::new(io::sink()),
            stderr: Box::new(io::sink()),
        }
    }
}

/// Run a command to completion
///
/// Returns `CommandFailed` with the exit code on a non-zero exit and
/// `Cancelled` if `ctx` is cancelled first.
pub async fn run_command(ctx: &CancellationToken, opts: RunCommandOptions<'_>) -> ExecutionResult<()> {
    if ctx.is_cancelled() {
        return Err(ExecutionError::Cancelled);
    }

    let mut command = Command::new(SHELL[0]);
    command
        .args(&SHELL[1..])
        .arg(opts.command)
        .current_dir(opts.dir)
        .envs(opts.env)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| ExecutionError::Spawn(format!("{}: {}", opts.command, e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let finished = tokio::select! {
        result = async {
            let (out, err) = tokio::join!(
                copy_stream(stdout, opts.stdout),
                copy_stream(stderr, opts.stderr),
            );
            out?;
            err?;
            child.wait().await
        } => Some(result),
        _ = ctx.cancelled() => None,
    };

    let status = match finished {
        Some(result) => result.map_err(|e| ExecutionError::Spawn(e.to_string()))?,
        None => {
            // The child may already be gone
            let _ = child.kill().await;
            return Err(ExecutionError::Cancelled);
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(ExecutionError::CommandFailed {
            code: status.code(),
        })
    }
}

/// Run a predicate command, discarding its output
///
/// `Ok(false)` means the command ran and exited non-zero.
pub async fn check_command(
    ctx: &CancellationToken,
    command: &str,
    dir: &Path,
    env: &Vars,
) -> ExecutionResult<bool> {
    match run_command(ctx, RunCommandOptions::quiet(command, dir, env)).await {
        Ok(()) => Ok(true),
        Err(ExecutionError::CommandFailed { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

async fn copy_stream<R>(reader: Option<R>, mut writer: Box<dyn Write + Send>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut buf = vec![0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
    }
    writer.flush()
}
