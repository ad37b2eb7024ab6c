//! Pipeline Domain Model
//!
//! Pipelines own ordered jobs; jobs own ordered tasks. Each level carries
//! its own `dependsOn` list and enabled flag. Tasks are the unit of
//! dispatch: a typed worker claims a task by its type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::domain::context::default_true;
use crate::domain::dependency::DependencyNode;

/// The enumerated task types the worker catalog covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Infrastructure,
    Docker,
    Dotnet,
    Npm,
    Git,
    Keyvault,
    Sql,
    Bash,
    Curl,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::Infrastructure => "infrastructure",
            TaskType::Docker => "docker",
            TaskType::Dotnet => "dotnet",
            TaskType::Npm => "npm",
            TaskType::Git => "git",
            TaskType::Keyvault => "keyvault",
            TaskType::Sql => "sql",
            TaskType::Bash => "bash",
            TaskType::Curl => "curl",
        };
        f.write_str(name)
    }
}

/// A pipeline: a named, dependency-ordered set of jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_by: Vec<String>,

    #[serde(default)]
    pub jobs: Vec<Job>,

    #[serde(skip)]
    pub source: PathBuf,
}

impl Pipeline {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

// Enabled matches the parse-time default, not the derived `false`.
impl Default for Pipeline {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            tags: Vec::new(),
            depends_on: Vec::new(),
            required_by: Vec::new(),
            jobs: Vec::new(),
            source: PathBuf::new(),
        }
    }
}

/// A job inside a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_by: Vec<String>,

    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(skip)]
    pub source: PathBuf,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            depends_on: Vec::new(),
            required_by: Vec::new(),
            tasks: Vec::new(),
            source: PathBuf::new(),
        }
    }
}

/// A task: one dispatch to a typed worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extra run attempts after the first failure.
    #[serde(default)]
    pub retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Free-form inputs, decoded by the claiming worker's typed schema.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, serde_json::Value>,

    /// Optional inline body (scripts, queries).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_by: Vec<String>,

    #[serde(skip)]
    pub source: PathBuf,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            name: String::new(),
            task_type: TaskType::Bash,
            enabled: true,
            retries: 0,
            working_directory: None,
            inputs: HashMap::new(),
            body: None,
            depends_on: Vec::new(),
            required_by: Vec::new(),
            source: PathBuf::new(),
        }
    }
}

macro_rules! impl_dependency_node {
    ($ty:ty) => {
        impl DependencyNode for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn dependencies(&self) -> &[String] {
                &self.depends_on
            }

            fn source(&self) -> &Path {
                &self.source
            }

            fn add_dependency(&mut self, name: String) {
                self.depends_on.push(name);
            }

            fn add_required_by(&mut self, name: String) {
                if !self
                    .required_by
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(&name))
                {
                    self.required_by.push(name);
                }
            }

            fn required_by(&self) -> &[String] {
                &self.required_by
            }
        }
    };
}

impl_dependency_node!(Pipeline);
impl_dependency_node!(Job);
impl_dependency_node!(Task);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_yaml_names() {
        let parsed: TaskType = serde_yaml::from_str("infrastructure").unwrap();
        assert_eq!(parsed, TaskType::Infrastructure);
        assert_eq!(TaskType::Keyvault.to_string(), "keyvault");
    }

    #[test]
    fn test_pipeline_defaults_enabled() {
        let yaml = r#"
name: bootstrap
jobs:
  - name: services
    tasks:
      - name: clone
        type: git
"#;
        let pipeline: Pipeline = serde_yaml::from_str(yaml).unwrap();
        assert!(pipeline.enabled);
        assert!(pipeline.jobs[0].enabled);
        assert!(pipeline.jobs[0].tasks[0].enabled);
        assert_eq!(pipeline.jobs[0].tasks[0].retries, 0);
    }

    // Constructed values (CLI-synthesized tasks, test fixtures) must match
    // the parse-time default or they silently fall out of the plan.
    #[test]
    fn test_constructed_defaults_are_enabled() {
        assert!(Pipeline::default().enabled);
        assert!(Job::default().enabled);
        assert!(Task::default().enabled);
    }
}
