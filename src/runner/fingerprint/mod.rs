//! Fingerprinting: deciding whether a task is already up to date
//!
//! The decision combines two independent signals. The sources checker for the
//! task's [`Method`] compares resolved source files against a persisted
//! record, and the status checker runs the task's status predicates. A task
//! runs if either one says it is stale.

pub mod glob;
pub mod sources;
pub mod status;

pub use glob::{glob, globs};
pub use sources::{checker_for, FingerprintRecord, RecordStore, SourcesChecker};
pub use status::StatusChecker;

use crate::error::{ConfigError, ExecutionResult};
use crate::runner::task::Task;
use crate::ui::Logger;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// Freshness policy of a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Never up to date
    Always,

    /// Up to date after the first successful run
    Once,

    /// Up to date while the digest of the sources is unchanged
    #[default]
    WhenChanged,

    /// Up to date while the modification times of the sources are unchanged
    Timestamp,
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" | "none" => Ok(Method::Always),
            "once" => Ok(Method::Once),
            "when_changed" | "checksum" => Ok(Method::WhenChanged),
            "timestamp" => Ok(Method::Timestamp),
            other => Err(ConfigError::InvalidMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Always => "always",
            Method::Once => "once",
            Method::WhenChanged => "when_changed",
            Method::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Options for [`is_task_up_to_date`]
#[derive(Clone, Default)]
pub struct FingerprintOptions {
    method: Method,
    temp_dir: PathBuf,
    dry: bool,
    logger: Option<Logger>,
}

impl FingerprintOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Directory holding the fingerprint records
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    /// Evaluate without writing anything
    pub fn with_dry(mut self, dry: bool) -> Self {
        self.dry = dry;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn sources_checker(&self) -> Box<dyn SourcesChecker> {
        checker_for(self.method, &self.temp_dir, self.dry)
    }
}

/// Decide whether `task` can be skipped
pub async fn is_task_up_to_date(
    ctx: &CancellationToken,
    task: &Task,
    options: &FingerprintOptions,
) -> ExecutionResult<bool> {
    let method = options.method;
    if method == Method::Always {
        return Ok(false);
    }

    let status_is_set = !task.status.is_empty();
    let sources_is_set = method == Method::Once || !task.sources.is_empty();

    let status_up_to_date = if status_is_set {
        StatusChecker::new(options.logger.as_ref())
            .is_up_to_date(ctx, task)
            .await?
    } else {
        false
    };

    let sources_up_to_date = if sources_is_set {
        options.sources_checker().is_up_to_date(task)?
    } else {
        false
    };

    tracing::debug!(
        task = %task.name(),
        %method,
        status_is_set,
        status_up_to_date,
        sources_is_set,
        sources_up_to_date,
        "fingerprint evaluated"
    );

    Ok(match (status_is_set, sources_is_set) {
        (true, true) => status_up_to_date && sources_up_to_date,
        (true, false) => status_up_to_date,
        (false, true) => sources_up_to_date,
        (false, false) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::task::Glob;
    use std::fs;
    use tempfile::TempDir;

    fn task_in(dir: &Path) -> Task {
        Task {
            task: "build".to_string(),
            dir: dir.to_path_buf(),
            sources: vec![Glob::parse("src/*.txt"), Glob::parse("!src/ignored.txt")],
            ..Default::default()
        }
    }

    fn options(dir: &Path, method: Method) -> FingerprintOptions {
        FingerprintOptions::new()
            .with_method(method)
            .with_temp_dir(dir.join(".task"))
    }

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.txt"), "main").unwrap();
        fs::write(dir.path().join("src/ignored.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("always".parse::<Method>().unwrap(), Method::Always);
        assert_eq!("once".parse::<Method>().unwrap(), Method::Once);
        assert_eq!("when_changed".parse::<Method>().unwrap(), Method::WhenChanged);
        assert_eq!("checksum".parse::<Method>().unwrap(), Method::WhenChanged);
        assert!("sometimes".parse::<Method>().is_err());
        assert_eq!(Method::WhenChanged.to_string(), "when_changed");
    }

    #[tokio::test]
    async fn test_always_is_never_up_to_date() {
        let dir = setup();
        let mut task = task_in(dir.path());
        task.status = vec!["true".to_string()];
        let ctx = CancellationToken::new();
        let opts = options(dir.path(), Method::Always);

        for _ in 0..3 {
            assert!(!is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_once_ignores_content_changes() {
        let dir = setup();
        let task = task_in(dir.path());
        let ctx = CancellationToken::new();
        let opts = options(dir.path(), Method::Once);

        assert!(!is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
        fs::write(dir.path().join("src/main.txt"), "changed").unwrap();
        assert!(is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_when_changed_tracks_included_files_only() {
        let dir = setup();
        let task = task_in(dir.path());
        let ctx = CancellationToken::new();
        let opts = options(dir.path(), Method::WhenChanged);

        assert!(!is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
        assert!(is_task_up_to_date(&ctx, &task, &opts).await.unwrap());

        fs::write(dir.path().join("src/ignored.txt"), "still ignored").unwrap();
        assert!(is_task_up_to_date(&ctx, &task, &opts).await.unwrap());

        fs::write(dir.path().join("src/main.txt"), "changed").unwrap();
        assert!(!is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_never_writes() {
        let dir = setup();
        let task = task_in(dir.path());
        let ctx = CancellationToken::new();
        let opts = options(dir.path(), Method::WhenChanged).with_dry(true);

        assert!(!is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
        assert!(!is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
        assert!(!dir.path().join(".task").exists());
    }

    #[tokio::test]
    async fn test_status_composes_with_sources() {
        let dir = setup();
        let mut task = task_in(dir.path());
        task.status = vec!["test -f done.flag".to_string()];
        let ctx = CancellationToken::new();
        let opts = options(dir.path(), Method::WhenChanged);

        is_task_up_to_date(&ctx, &task, &opts).await.unwrap();
        // Sources are fresh now, but the status check still fails
        assert!(!is_task_up_to_date(&ctx, &task, &opts).await.unwrap());

        fs::write(dir.path().join("done.flag"), "").unwrap();
        assert!(is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_sources_and_no_status_is_stale() {
        let dir = setup();
        let mut task = task_in(dir.path());
        task.sources.clear();
        let ctx = CancellationToken::new();
        let opts = options(dir.path(), Method::WhenChanged);

        assert!(!is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
        assert!(!is_task_up_to_date(&ctx, &task, &opts).await.unwrap());
    }
}
