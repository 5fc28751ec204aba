//! Taskfile discovery and parsing

use crate::config::types::Taskfile;
use crate::error::{ConfigError, ConfigResult, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Taskfile names to search for, in priority order
pub const TASKFILE_NAMES: &[&str] = &["Taskfile.yml", "Taskfile.yaml", "taskfile.yml", "taskfile.yaml"];

/// Find the Taskfile by searching `start_dir` and its parents
pub fn find_taskfile_from(start_dir: &Path) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir.to_path_buf();
    let mut searched_paths = Vec::new();

    loop {
        for file_name in TASKFILE_NAMES {
            let path = current_dir.join(file_name);
            searched_paths.push(path.display().to_string());

            if path.is_file() {
                return Ok(path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Resolve an explicit entrypoint or search for one from `dir`
pub fn resolve_taskfile(dir: &Path, entrypoint: Option<&Path>) -> ConfigResult<PathBuf> {
    match entrypoint {
        Some(path) => {
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                dir.join(path)
            };
            if path.is_file() {
                Ok(path)
            } else {
                Err(ConfigError::NotFound(path.display().to_string()))
            }
        }
        None => find_taskfile_from(dir),
    }
}

/// Parse a Taskfile from a path
pub fn parse_taskfile_file(path: &Path) -> Result<Taskfile> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("failed to read {}: {}", path.display(), e)))?;

    parse_taskfile(&contents)
}

/// Parse a Taskfile from a string
pub fn parse_taskfile(yaml: &str) -> Result<Taskfile> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Read the Taskfile's dotenv files relative to `dir`
///
/// Missing files are skipped. When several files define the same key the
/// first one wins.
pub fn load_dotenv(taskfile: &Taskfile, dir: &Path) -> ConfigResult<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();

    for entry in &taskfile.dotenv {
        if entry.is_empty() {
            continue;
        }
        let path = dir.join(entry);
        if !path.exists() {
            continue;
        }

        let iter = dotenvy::from_path_iter(&path).map_err(|e| ConfigError::Dotenv {
            path: path.clone(),
            error: e.to_string(),
        })?;
        for item in iter {
            let (key, value) = item.map_err(|e| ConfigError::Dotenv {
                path: path.clone(),
                error: e.to_string(),
            })?;
            env.entry(key).or_insert(value);
        }
    }

    Ok(env)
}

/// Parse a duration such as `500ms`, `5s`, `2m` or `1h` (bare numbers are seconds)
pub fn parse_interval(value: &str) -> ConfigResult<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let amount: u64 = number
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("invalid interval \"{}\"", value)))?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        _ => Err(ConfigError::Invalid(format!("invalid interval \"{}\"", value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_simple_taskfile() {
        let yaml = r#"
version: '3'
tasks:
  hello:
    cmds: [echo "hello"]
"#;
        let taskfile = parse_taskfile(yaml).unwrap();
        assert_eq!(taskfile.tasks.len(), 1);
        assert!(taskfile.tasks.contains_key("hello"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_taskfile("version: '3' env: FOO: bar tasks:");
        assert!(result.is_err());
    }

    #[test]
    fn test_find_taskfile_in_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Taskfile.yml");
        let sub_dir = temp_dir.path().join("subdir");

        fs::create_dir(&sub_dir).unwrap();
        fs::write(&path, "tasks: {}\n").unwrap();

        let found = find_taskfile_from(&sub_dir).unwrap();
        assert_eq!(found, path);
    }

    #[test]
    fn test_taskfile_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let result = resolve_taskfile(temp_dir.path(), Some(Path::new("missing.yml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_dotenv_first_file_wins() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".env"), "FOO=first\nBAR=bar\n").unwrap();
        fs::write(temp_dir.path().join(".env.local"), "FOO=second\n").unwrap();

        let taskfile = parse_taskfile(
            "dotenv: ['.env', '.env.local', '.env.missing']\ntasks: {}\n",
        )
        .unwrap();
        let env = load_dotenv(&taskfile, temp_dir.path()).unwrap();

        assert_eq!(env.get("FOO").map(String::as_str), Some("first"));
        assert_eq!(env.get("BAR").map(String::as_str), Some("bar"));
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_interval("3").unwrap(), Duration::from_secs(3));
        assert!(parse_interval("soon").is_err());
    }
}
