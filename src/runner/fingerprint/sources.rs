//! Persisted fingerprint records and the checkers that compare against them

use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::fingerprint::glob::{glob, globs};
use crate::runner::fingerprint::Method;
use crate::runner::task::{Task, TaskIdentity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// What gets written to disk for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub method: Method,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timestamps: BTreeMap<PathBuf, u128>,
}

/// Directory of fingerprint records, one file per task
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    /// Store rooted at `<temp_dir>/checksum`
    pub fn new(temp_dir: &Path) -> Self {
        RecordStore {
            dir: temp_dir.join("checksum"),
        }
    }

    /// Record file of a task identity
    ///
    /// The readable part is the normalised name; the suffix tells apart
    /// identities whose names normalise alike or that run in other
    /// directories.
    pub fn path_for(&self, identity: &TaskIdentity) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(identity.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(identity.dir.to_string_lossy().as_bytes());
        let digest = hex::encode(hasher.finalize());

        self.dir
            .join(format!("{}-{}", normalize_filename(&identity.name), &digest[..16]))
    }

    pub fn read(&self, identity: &TaskIdentity) -> Option<FingerprintRecord> {
        let contents = fs::read_to_string(self.path_for(identity)).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn write(&self, identity: &TaskIdentity, record: &FingerprintRecord) -> ExecutionResult<()> {
        fs::create_dir_all(&self.dir).map_err(fingerprint_err)?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| ExecutionError::Fingerprint(e.to_string()))?;
        fs::write(self.path_for(identity), json).map_err(fingerprint_err)
    }

    /// Remove a record; a missing record is not an error
    pub fn remove(&self, identity: &TaskIdentity) -> ExecutionResult<()> {
        match fs::remove_file(self.path_for(identity)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(fingerprint_err(e)),
        }
    }
}

fn fingerprint_err(e: io::Error) -> ExecutionError {
    ExecutionError::Fingerprint(e.to_string())
}

/// Replace characters that cannot appear in a file name
fn normalize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect()
}

/// Decides whether a task's sources are fresh
pub trait SourcesChecker: Send + Sync {
    /// Compare the current state with the stored record
    ///
    /// When not dry, a changed state is written back so that the next check
    /// sees it.
    fn is_up_to_date(&self, task: &Task) -> ExecutionResult<bool>;

    /// Forget the stored state after a failed run
    fn on_error(&self, task: &Task) -> ExecutionResult<()>;
}

/// Build the checker for a method
pub fn checker_for(method: Method, temp_dir: &Path, dry: bool) -> Box<dyn SourcesChecker> {
    let store = RecordStore::new(temp_dir);
    match method {
        Method::Always => Box::new(AlwaysChecker),
        Method::Once => Box::new(OnceChecker { store, dry }),
        Method::WhenChanged => Box::new(ChecksumChecker { store, dry }),
        Method::Timestamp => Box::new(TimestampChecker { store, dry }),
    }
}

pub struct AlwaysChecker;

impl SourcesChecker for AlwaysChecker {
    fn is_up_to_date(&self, _task: &Task) -> ExecutionResult<bool> {
        Ok(false)
    }

    fn on_error(&self, _task: &Task) -> ExecutionResult<()> {
        Ok(())
    }
}

/// Fresh as soon as a record for the task name exists
pub struct OnceChecker {
    store: RecordStore,
    dry: bool,
}

impl SourcesChecker for OnceChecker {
    fn is_up_to_date(&self, task: &Task) -> ExecutionResult<bool> {
        if self.store.read(&task.identity()).is_some_and(|r| r.method == Method::Once) {
            return Ok(true);
        }
        if !self.dry {
            let record = FingerprintRecord {
                method: Method::Once,
                digest: None,
                timestamps: BTreeMap::new(),
            };
            self.store.write(&task.identity(), &record)?;
        }
        Ok(false)
    }

    fn on_error(&self, task: &Task) -> ExecutionResult<()> {
        if self.dry {
            return Ok(());
        }
        self.store.remove(&task.identity())
    }
}

/// Fresh while the SHA-256 digest of the sources is unchanged
pub struct ChecksumChecker {
    store: RecordStore,
    dry: bool,
}

impl ChecksumChecker {
    /// Digest over file paths and contents, in sorted path order
    pub fn digest(files: &[PathBuf]) -> ExecutionResult<String> {
        let mut hasher = Sha256::new();
        for file in files {
            hasher.update(file.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(fs::read(file).map_err(fingerprint_err)?);
            hasher.update([0u8]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

impl SourcesChecker for ChecksumChecker {
    fn is_up_to_date(&self, task: &Task) -> ExecutionResult<bool> {
        let files = globs(&task.dir, &task.sources);
        let record = FingerprintRecord {
            method: Method::WhenChanged,
            digest: Some(Self::digest(&files)?),
            timestamps: BTreeMap::new(),
        };

        let unchanged = self.store.read(&task.identity()).as_ref() == Some(&record);
        if !unchanged && !self.dry {
            self.store.write(&task.identity(), &record)?;
        }

        Ok(unchanged && generates_exist(task))
    }

    fn on_error(&self, task: &Task) -> ExecutionResult<()> {
        if self.dry {
            return Ok(());
        }
        self.store.remove(&task.identity())
    }
}

/// Fresh while every source keeps its modification time
pub struct TimestampChecker {
    store: RecordStore,
    dry: bool,
}

impl TimestampChecker {
    pub fn timestamps(files: &[PathBuf]) -> ExecutionResult<BTreeMap<PathBuf, u128>> {
        files
            .iter()
            .map(|file| {
                let modified = fs::metadata(file)
                    .and_then(|m| m.modified())
                    .map_err(fingerprint_err)?;
                let nanos = modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or_default();
                Ok((file.clone(), nanos))
            })
            .collect()
    }
}

impl SourcesChecker for TimestampChecker {
    fn is_up_to_date(&self, task: &Task) -> ExecutionResult<bool> {
        let files = globs(&task.dir, &task.sources);
        let record = FingerprintRecord {
            method: Method::Timestamp,
            digest: None,
            timestamps: Self::timestamps(&files)?,
        };

        let unchanged = self.store.read(&task.identity()).as_ref() == Some(&record);
        if !unchanged && !self.dry {
            self.store.write(&task.identity(), &record)?;
        }

        Ok(unchanged && generates_exist(task))
    }

    fn on_error(&self, task: &Task) -> ExecutionResult<()> {
        if self.dry {
            return Ok(());
        }
        self.store.remove(&task.identity())
    }
}

/// Every non-negated `generates` pattern must match at least one file
fn generates_exist(task: &Task) -> bool {
    task.generates
        .iter()
        .filter(|g| !g.negate)
        .all(|g| glob(&task.dir, &g.glob).map(|m| !m.is_empty()).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::task::Glob;
    use tempfile::TempDir;

    fn task_in(dir: &Path) -> Task {
        Task {
            task: "build:web".to_string(),
            dir: dir.to_path_buf(),
            sources: vec![Glob::parse("*.txt")],
            ..Default::default()
        }
    }

    #[test]
    fn test_record_file_per_identity() {
        let store = RecordStore::new(Path::new("/tmp/.task"));
        let identity = |name: &str, dir: &str| TaskIdentity {
            name: name.to_string(),
            dir: PathBuf::from(dir),
        };

        let path = store.path_for(&identity("build:web", "/repo"));
        assert_eq!(path.parent(), Some(Path::new("/tmp/.task/checksum")));
        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("build-web-"));
        assert_eq!(path, store.path_for(&identity("build:web", "/repo")));

        assert_ne!(path, store.path_for(&identity("build-web", "/repo")));
        assert_ne!(path, store.path_for(&identity("build:web", "/repo/sub")));
    }

    #[test]
    fn test_same_name_in_other_dir_keeps_its_own_record() {
        let dir = TempDir::new().unwrap();
        let other = dir.path().join("other");
        fs::create_dir(&other).unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(other.join("a.txt"), "b").unwrap();
        let temp = dir.path().join(".task");
        let checker = checker_for(Method::WhenChanged, &temp, false);

        let here = task_in(dir.path());
        let there = task_in(&other);
        assert!(!checker.is_up_to_date(&here).unwrap());
        assert!(!checker.is_up_to_date(&there).unwrap());
        assert!(checker.is_up_to_date(&here).unwrap());
        assert!(checker.is_up_to_date(&there).unwrap());
    }

    #[test]
    fn test_checksum_writes_only_when_not_dry() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let task = task_in(dir.path());
        let temp = dir.path().join(".task");

        let dry = checker_for(Method::WhenChanged, &temp, true);
        assert!(!dry.is_up_to_date(&task).unwrap());
        assert!(!RecordStore::new(&temp).path_for(&task.identity()).exists());

        let real = checker_for(Method::WhenChanged, &temp, false);
        assert!(!real.is_up_to_date(&task).unwrap());
        assert!(real.is_up_to_date(&task).unwrap());
        assert!(dry.is_up_to_date(&task).unwrap());
    }

    #[test]
    fn test_on_error_forgets_the_record() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let task = task_in(dir.path());
        let checker = checker_for(Method::WhenChanged, &dir.path().join(".task"), false);

        checker.is_up_to_date(&task).unwrap();
        assert!(checker.is_up_to_date(&task).unwrap());

        checker.on_error(&task).unwrap();
        assert!(!checker.is_up_to_date(&task).unwrap());
    }

    #[test]
    fn test_missing_generated_file_is_stale() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let mut task = task_in(dir.path());
        task.generates = vec![Glob::parse("out.bin")];
        let checker = checker_for(Method::WhenChanged, &dir.path().join(".task"), false);

        checker.is_up_to_date(&task).unwrap();
        assert!(!checker.is_up_to_date(&task).unwrap());

        fs::write(dir.path().join("out.bin"), "").unwrap();
        assert!(checker.is_up_to_date(&task).unwrap());
    }

    #[test]
    fn test_timestamp_detects_touch() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "a").unwrap();
        let task = task_in(dir.path());
        let checker = checker_for(Method::Timestamp, &dir.path().join(".task"), false);

        checker.is_up_to_date(&task).unwrap();
        assert!(checker.is_up_to_date(&task).unwrap());

        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert!(!checker.is_up_to_date(&task).unwrap());
    }
}
