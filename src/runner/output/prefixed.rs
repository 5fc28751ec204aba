//! Line-prefixed output

use super::{Output, WrappedWriters};
use crate::runner::interpolate::Vars;
use crate::ui::{write_sink, Sink};
use colored::{Color, Colorize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

const PALETTE: &[Color] = &[
    Color::Yellow,
    Color::Blue,
    Color::Green,
    Color::Cyan,
    Color::Magenta,
    Color::BrightYellow,
    Color::BrightBlue,
    Color::BrightGreen,
];

/// Prepends `[prefix] ` to every line
pub struct Prefixed {
    color: bool,
    assigned: Mutex<HashMap<String, Color>>,
}

impl Prefixed {
    pub fn new(color: bool) -> Self {
        Prefixed {
            color,
            assigned: Mutex::new(HashMap::new()),
        }
    }

    /// Rendered `[prefix] `, each prefix keeping the colour it first got
    fn label(&self, prefix: &str) -> String {
        let label = format!("[{}] ", prefix);
        if !self.color {
            return label;
        }
        let mut assigned = self.assigned.lock().unwrap_or_else(PoisonError::into_inner);
        let next = PALETTE[assigned.len() % PALETTE.len()];
        let color = *assigned.entry(prefix.to_string()).or_insert(next);
        label.color(color).to_string()
    }
}

impl Output for Prefixed {
    fn wrap_writer(&self, stdout: &Sink, stderr: &Sink, prefix: &str, _vars: &Vars) -> WrappedWriters {
        let label = self.label(prefix);
        WrappedWriters {
            stdout: Box::new(PrefixWriter::new(Arc::clone(stdout), label.clone())),
            stderr: Box::new(PrefixWriter::new(Arc::clone(stderr), label)),
            close: Box::new(|_| Ok(())),
        }
    }
}

/// Buffers partial lines and writes complete ones with the label
struct PrefixWriter {
    sink: Sink,
    label: String,
    pending: Vec<u8>,
}

impl PrefixWriter {
    fn new(sink: Sink, label: String) -> Self {
        PrefixWriter {
            sink,
            label,
            pending: Vec::new(),
        }
    }

    fn emit(&self, line: &[u8]) -> io::Result<()> {
        let mut out = Vec::with_capacity(self.label.len() + line.len() + 1);
        out.extend_from_slice(self.label.as_bytes());
        out.extend_from_slice(line);
        if !line.ends_with(b"\n") {
            out.push(b'\n');
        }
        write_sink(&self.sink, &out)
    }
}

impl Write for PrefixWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line)?;
        }
        Ok(buf.len())
    }

    /// Emits a trailing partial line, if any
    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.pending);
        self.emit(&line)
    }
}
