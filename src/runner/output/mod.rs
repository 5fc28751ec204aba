//! Output multiplexing
//!
//! Every command gets its own stdout/stderr writers from the configured
//! [`Output`] style. The writers are owned by that command alone and write
//! through to the shared sinks.

pub mod group;
pub mod interleaved;
pub mod prefixed;

pub use group::Group;
pub use interleaved::Interleaved;
pub use prefixed::Prefixed;

use crate::config::OutputSpec;
use crate::error::{ConfigError, ConfigResult, ExecutionError};
use crate::runner::interpolate::Vars;
use crate::ui::{write_sink, Logger, Sink};
use std::io::{self, Write};

/// Finishes a command's output once the command is done
pub type CloseFn = Box<dyn FnOnce(Option<&ExecutionError>) -> io::Result<()> + Send>;

/// Writers for one command
pub struct WrappedWriters {
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
    pub close: CloseFn,
}

/// An output style
pub trait Output: Send + Sync {
    /// Writers for one command of the task identified by `prefix`
    ///
    /// `vars` are the task's resolved variables, used to render templates.
    fn wrap_writer(&self, stdout: &Sink, stderr: &Sink, prefix: &str, vars: &Vars) -> WrappedWriters;
}

/// Options of the group style
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupOptions {
    pub begin: Option<String>,
    pub end: Option<String>,
    pub error_only: bool,
}

impl GroupOptions {
    pub fn is_set(&self) -> bool {
        self.begin.is_some() || self.end.is_some() || self.error_only
    }
}

/// Resolved output configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Style name; empty means interleaved
    pub name: String,
    pub group: GroupOptions,
}

impl OutputConfig {
    pub fn named(name: impl Into<String>) -> Self {
        OutputConfig {
            name: name.into(),
            group: GroupOptions::default(),
        }
    }

    pub fn group(group: GroupOptions) -> Self {
        OutputConfig {
            name: "group".to_string(),
            group,
        }
    }

    pub fn from_spec(spec: &OutputSpec) -> Self {
        match spec {
            OutputSpec::Name(name) => Self::named(name.clone()),
            OutputSpec::Group { group } => Self::group(GroupOptions {
                begin: group.begin.clone(),
                end: group.end.clone(),
                error_only: group.error_only,
            }),
        }
    }

    pub fn is_set(&self) -> bool {
        !self.name.is_empty() || self.group.is_set()
    }

    /// Reject unknown styles and group options used with another style
    pub fn validate(&self) -> ConfigResult<()> {
        match self.name.as_str() {
            "group" => Ok(()),
            "" | "interleaved" | "prefixed" => {
                if self.group.is_set() {
                    return Err(ConfigError::InvalidOutput(format!(
                        "output style \"{}\" does not support the group begin/end/error_only parameters",
                        if self.name.is_empty() { "interleaved" } else { &self.name }
                    )));
                }
                Ok(())
            }
            other => Err(ConfigError::InvalidOutput(format!(
                "output style \"{}\" not recognized",
                other
            ))),
        }
    }
}

/// Build the output style for a configuration
pub fn build_for(config: &OutputConfig, logger: &Logger) -> ConfigResult<Box<dyn Output>> {
    config.validate()?;
    Ok(match config.name.as_str() {
        "group" => Box::new(Group {
            begin: config.group.begin.clone(),
            end: config.group.end.clone(),
            error_only: config.group.error_only,
        }),
        "prefixed" => Box::new(Prefixed::new(logger.color_enabled())),
        _ => Box::new(Interleaved),
    })
}

/// Writer forwarding every write to a sink
pub struct SinkWriter(pub Sink);

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_sink(&self.0, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_options_rejected_for_other_styles() {
        let config = OutputConfig {
            name: "prefixed".to_string(),
            group: GroupOptions {
                begin: Some("::group::".to_string()),
                ..Default::default()
            },
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOutput(_))));

        let interleaved = OutputConfig {
            name: String::new(),
            group: GroupOptions {
                error_only: true,
                ..Default::default()
            },
        };
        assert!(build_for(&interleaved, &Logger::new()).is_err());
    }

    #[test]
    fn test_unknown_style() {
        let config = OutputConfig::named("fancy");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOutput(msg)) if msg.contains("fancy")));
    }

    #[test]
    fn test_known_styles_build() {
        let logger = Logger::new();
        for name in ["", "interleaved", "group", "prefixed"] {
            assert!(build_for(&OutputConfig::named(name), &logger).is_ok());
        }
    }
}
