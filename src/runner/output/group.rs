//! Grouped output
//!
//! Both streams of a command are buffered together and written to stdout in
//! one piece when the command finishes.

use super::{Output, WrappedWriters};
use crate::runner::interpolate::{interpolate, Vars};
use crate::ui::{write_sink, Sink, SharedBuffer};
use std::sync::Arc;

pub struct Group {
    /// Template printed before the output
    pub begin: Option<String>,

    /// Template printed after the output
    pub end: Option<String>,

    /// Drop the output of commands that succeed
    pub error_only: bool,
}

impl Output for Group {
    fn wrap_writer(&self, stdout: &Sink, _stderr: &Sink, prefix: &str, vars: &Vars) -> WrappedWriters {
        let buffer = SharedBuffer::new();
        let sink = Arc::clone(stdout);
        let error_only = self.error_only;

        let mut vars = vars.clone();
        vars.entry("TASK".to_string())
            .or_insert_with(|| prefix.to_string());
        let render = |template: &Option<String>| {
            template
                .as_ref()
                .map(|t| interpolate(t, &vars).unwrap_or_else(|_| t.clone()))
        };
        let begin = render(&self.begin);
        let end = render(&self.end);

        let captured = buffer.clone();
        let close = Box::new(move |err: Option<&crate::error::ExecutionError>| {
            let body = captured.take();
            if error_only && err.is_none() {
                return Ok(());
            }

            let mut chunk = Vec::with_capacity(body.len() + 64);
            if let Some(begin) = begin {
                chunk.extend_from_slice(begin.as_bytes());
                chunk.push(b'\n');
            }
            chunk.extend_from_slice(&body);
            if let Some(end) = end {
                chunk.extend_from_slice(end.as_bytes());
                chunk.push(b'\n');
            }
            write_sink(&sink, &chunk)
        });

        WrappedWriters {
            stdout: Box::new(buffer.clone()),
            stderr: Box::new(buffer),
            close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use std::io::Write;

    fn group(begin: Option<&str>, end: Option<&str>, error_only: bool) -> Group {
        Group {
            begin: begin.map(str::to_string),
            end: end.map(str::to_string),
            error_only,
        }
    }

    #[test]
    fn test_output_is_held_until_close() {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let g = group(Some("::group::${TASK}"), Some("::endgroup::"), false);
        let mut w = g.wrap_writer(&out.sink(), &err.sink(), "build", &Vars::new());

        w.stdout.write_all(b"line 1\n").unwrap();
        w.stderr.write_all(b"line 2\n").unwrap();
        assert!(out.is_empty());

        (w.close)(None).unwrap();
        assert_eq!(out.contents(), "::group::build\nline 1\nline 2\n::endgroup::\n");
        assert!(err.is_empty());
    }

    #[test]
    fn test_error_only_swallows_success() {
        let out = SharedBuffer::new();
        let g = group(None, None, true);

        let mut ok = g.wrap_writer(&out.sink(), &out.sink(), "ok", &Vars::new());
        ok.stdout.write_all(b"fine\n").unwrap();
        (ok.close)(None).unwrap();
        assert!(out.is_empty());

        let mut failed = g.wrap_writer(&out.sink(), &out.sink(), "bad", &Vars::new());
        failed.stdout.write_all(b"boom\n").unwrap();
        (failed.close)(Some(&ExecutionError::CommandFailed { code: Some(1) })).unwrap();
        assert_eq!(out.contents(), "boom\n");
    }
}
