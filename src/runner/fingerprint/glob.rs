//! Source pattern resolution

use crate::runner::task::Glob;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Resolve a list of patterns relative to `dir`
///
/// Files matched by any negated pattern are removed regardless of pattern
/// order. The result is deduplicated and sorted. Invalid patterns are skipped.
pub fn globs(dir: &Path, patterns: &[Glob]) -> Vec<PathBuf> {
    let mut included = BTreeSet::new();
    let mut excluded = BTreeSet::new();

    for pattern in patterns {
        let matches = match glob(dir, &pattern.glob) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(pattern = %pattern.glob, error = %e, "skipping invalid pattern");
                continue;
            }
        };
        if pattern.negate {
            excluded.extend(matches);
        } else {
            included.extend(matches);
        }
    }

    included.difference(&excluded).cloned().collect()
}

/// Expand one pattern relative to `dir`, returning regular files only
pub fn glob(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, glob::PatternError> {
    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        format!(
            "{}/{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            pattern.trim_start_matches("./")
        )
    };

    let mut files = Vec::new();
    for entry in glob::glob(&full)? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "unreadable path while globbing"),
        }
    }
    Ok(files)
}
