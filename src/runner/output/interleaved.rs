//! Pass-through output

use super::{Output, SinkWriter, WrappedWriters};
use crate::runner::interpolate::Vars;
use crate::ui::Sink;
use std::sync::Arc;

/// Writes straight to the sinks as output arrives
pub struct Interleaved;

impl Output for Interleaved {
    fn wrap_writer(&self, stdout: &Sink, stderr: &Sink, _prefix: &str, _vars: &Vars) -> WrappedWriters {
        WrappedWriters {
            stdout: Box::new(SinkWriter(Arc::clone(stdout))),
            stderr: Box::new(SinkWriter(Arc::clone(stderr))),
            close: Box::new(|_| Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::SharedBuffer;
    use std::io::Write;

    #[test]
    fn test_streams_stay_separate() {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let mut w = Interleaved.wrap_writer(&out.sink(), &err.sink(), "task", &Vars::new());

        w.stdout.write_all(b"to stdout\n").unwrap();
        w.stderr.write_all(b"to stderr\n").unwrap();
        (w.close)(None).unwrap();

        assert_eq!(out.contents(), "to stdout\n");
        assert_eq!(err.contents(), "to stderr\n");
    }
}
