//! Core configuration types
//!
//! This module defines the data structures that represent a Taskfile.yml.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level Taskfile structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Taskfile {
    /// Schema version, expected to be "3"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Default freshness method for tasks without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Default run policy for tasks without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// Output style shared by all tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,

    /// Watch interval (e.g. "500ms", "5s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Silence all tasks
    #[serde(default)]
    pub silent: bool,

    /// Dotenv files to read into the environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dotenv: Vec<String>,

    /// Taskfile-level variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, VarSpec>,

    /// Taskfile-level environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, VarSpec>,

    /// Tasks in declaration order
    #[serde(default)]
    pub tasks: indexed::Tasks,
}

/// A task definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Working directory, relative to the Taskfile directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub cmds: Vec<CmdSpec>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<DepSpec>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<PreconditionSpec>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub generates: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Run policy: `always`, `once` or `when_changed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,

    #[serde(default)]
    pub silent: bool,

    #[serde(default)]
    pub ignore_error: bool,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub prompt: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, VarSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, VarSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<RequiresSpec>,

    /// Prefix used by the prefixed output style (defaults to the task name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// A variable value: static or computed by a shell command
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum VarSpec {
    Static(String),
    Bool(bool),
    Number(serde_yaml::Number),
    Dynamic { sh: String },
}

impl VarSpec {
    /// The literal value, or `None` for dynamic variables
    pub fn as_static(&self) -> Option<String> {
        match self {
            VarSpec::Static(s) => Some(s.clone()),
            VarSpec::Bool(b) => Some(b.to_string()),
            VarSpec::Number(n) => Some(n.to_string()),
            VarSpec::Dynamic { .. } => None,
        }
    }
}

/// A command to execute
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CmdSpec {
    /// Simple shell command string
    Simple(String),

    /// Reference to another task
    Task(TaskRefSpec),

    /// Shell command with options
    Detailed(CmdDetail),

    /// `defer:` shorthand for a command or task that runs last
    Defer { defer: DeferSpec },
}

/// Detailed command specification
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CmdDetail {
    pub cmd: String,

    #[serde(default)]
    pub silent: bool,

    #[serde(default)]
    pub ignore_error: bool,

    #[serde(default)]
    pub defer: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
}

/// A call to another task from `cmds` or `defer`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRefSpec {
    pub task: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,

    #[serde(default)]
    pub silent: bool,
}

/// Target of a `defer:` entry
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DeferSpec {
    Shell(String),
    Task(TaskRefSpec),
}

/// A dependency
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DepSpec {
    Simple(String),
    Detailed(TaskRefSpec),
}

impl DepSpec {
    pub fn task(&self) -> &str {
        match self {
            DepSpec::Simple(name) => name,
            DepSpec::Detailed(detail) => &detail.task,
        }
    }
}

/// A precondition
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PreconditionSpec {
    Simple(String),
    Detailed {
        sh: String,
        #[serde(default)]
        msg: Option<String>,
    },
}

/// Required variables of a task
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RequiresSpec {
    #[serde(default)]
    pub vars: Vec<RequiredVarSpec>,
}

/// A required variable, optionally constrained to a set of values
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequiredVarSpec {
    Name(String),
    Constrained {
        name: String,
        #[serde(rename = "enum", default)]
        allowed: Vec<String>,
    },
}

/// Output style as written in the Taskfile
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OutputSpec {
    /// "interleaved", "group" or "prefixed"
    Name(String),

    /// `group:` with options
    Group { group: GroupSpec },
}

/// Options of the group output style
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GroupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,

    #[serde(default)]
    pub error_only: bool,
}

/// Deserializer for fields that accept a single value or a list
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|item| T::deserialize(item).map_err(D::Error::custom))
            .collect(),
        Value::Null => Ok(Vec::new()),
        single => Ok(vec![T::deserialize(single).map_err(D::Error::custom)?]),
    }
}

pub mod indexed {
    //! Task map that keeps declaration order

    use super::TaskSpec;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;

    #[derive(Debug, Clone, Default)]
    pub struct Tasks(Vec<(String, TaskSpec)>);

    impl Tasks {
        pub fn get(&self, name: &str) -> Option<&TaskSpec> {
            self.0.iter().find(|(n, _)| n == name).map(|(_, t)| t)
        }

        pub fn contains_key(&self, name: &str) -> bool {
            self.get(name).is_some()
        }

        pub fn insert(&mut self, name: String, task: TaskSpec) {
            match self.0.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = task,
                None => self.0.push((name, task)),
            }
        }

        pub fn iter(&self) -> impl Iterator<Item = (&String, &TaskSpec)> {
            self.0.iter().map(|(n, t)| (n, t))
        }

        pub fn keys(&self) -> impl Iterator<Item = &String> {
            self.0.iter().map(|(n, _)| n)
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    impl<'de> Deserialize<'de> for Tasks {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct TasksVisitor;

            impl<'de> Visitor<'de> for TasksVisitor {
                type Value = Tasks;

                fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    f.write_str("a map of task names to task definitions")
                }

                fn visit_unit<E>(self) -> Result<Tasks, E> {
                    Ok(Tasks::default())
                }

                fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Tasks, A::Error> {
                    let mut tasks = Tasks::default();
                    while let Some((name, task)) = map.next_entry::<String, Option<TaskSpec>>()? {
                        tasks.insert(name, task.unwrap_or_default());
                    }
                    Ok(tasks)
                }
            }

            deserializer.deserialize_any(TasksVisitor)
        }
    }

    impl Serialize for Tasks {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(self.0.len()))?;
            for (name, task) in &self.0 {
                map.serialize_entry(name, task)?;
            }
            map.end()
        }
    }
}
