//! User-facing messages and prompts
//!
//! Everything printed with the `task:` prefix goes through here so that the
//! silent/verbose flags and colour settings are honoured in one place.

use crate::ui::sink::{stderr_sink, stdout_sink, write_sink, Sink};
use colored::{Color, Colorize};
use std::io::{self, BufRead, IsTerminal};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Source of prompt answers
pub type PromptInput = Arc<Mutex<dyn BufRead + Send>>;

/// Why a prompt did not get a positive answer
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("no terminal attached")]
    NoTerminal,

    #[error("prompt cancelled")]
    Cancelled,

    #[error("failed to read answer: {0}")]
    Io(#[from] io::Error),
}

/// Verbosity-gated, optionally coloured logger
#[derive(Clone)]
pub struct Logger {
    stdout: Sink,
    stderr: Sink,
    input: Option<PromptInput>,
    verbose: bool,
    color: bool,
    assume_yes: bool,
}

impl Logger {
    /// Logger writing to the process stdout/stderr
    pub fn new() -> Self {
        Logger {
            stdout: stdout_sink(),
            stderr: stderr_sink(),
            input: None,
            verbose: false,
            color: std::env::var_os("NO_COLOR").is_none(),
            assume_yes: false,
        }
    }

    pub fn with_sinks(mut self, stdout: Sink, stderr: Sink) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    /// Read prompt answers from `input` instead of the terminal
    pub fn with_input(mut self, input: PromptInput) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_assume_yes(mut self, assume_yes: bool) -> Self {
        self.assume_yes = assume_yes;
        self
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn color_enabled(&self) -> bool {
        self.color
    }

    /// Print to stdout
    pub fn outf(&self, color: Color, message: &str) {
        self.write(&self.stdout, color, message);
    }

    /// Print to stderr
    pub fn errf(&self, color: Color, message: &str) {
        self.write(&self.stderr, color, message);
    }

    /// Print to stdout in verbose mode only
    pub fn verbose_outf(&self, color: Color, message: &str) {
        if self.verbose {
            self.outf(color, message);
        }
    }

    /// Print to stderr in verbose mode only
    pub fn verbose_errf(&self, color: Color, message: &str) {
        if self.verbose {
            self.errf(color, message);
        }
    }

    /// Ask for confirmation
    ///
    /// An empty answer means `default`. Any answer in `continue_values`
    /// (case-insensitive) continues; everything else cancels.
    pub fn prompt(
        &self,
        color: Color,
        message: &str,
        default: &str,
        continue_values: &[&str],
    ) -> Result<(), PromptError> {
        let question = format!("{} [{}/{}]: ", message, continue_values.first().unwrap_or(&"y"), default);

        if self.assume_yes {
            self.outf(color, &format!("{}{}\n", question, "y"));
            return Ok(());
        }

        let answer = match &self.input {
            Some(input) => {
                self.outf(color, &question);
                let mut line = String::new();
                input
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .read_line(&mut line)?;
                line
            }
            None => {
                if !io::stdin().is_terminal() {
                    return Err(PromptError::NoTerminal);
                }
                self.outf(color, &question);
                let mut line = String::new();
                io::stdin().lock().read_line(&mut line)?;
                line
            }
        };

        let answer = answer.trim().to_lowercase();
        let answer = if answer.is_empty() {
            default.to_lowercase()
        } else {
            answer
        };

        if continue_values.iter().any(|v| v.eq_ignore_ascii_case(&answer)) {
            Ok(())
        } else {
            Err(PromptError::Cancelled)
        }
    }

    fn write(&self, sink: &Sink, color: Color, message: &str) {
        let text = if self.color {
            message.color(color).to_string()
        } else {
            message.to_string()
        };
        // Nothing sensible to do when the log destination itself is broken
        let _ = write_sink(sink, text.as_bytes());
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}
