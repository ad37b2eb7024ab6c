//! Infrastructure Stack Domain Model

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::dependency::DependencyNode;

/// An infrastructure-as-code module deployable as a single unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    pub name: String,

    /// Entry file of the stack, relative to the context config folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_state: Option<BackendState>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_by: Vec<String>,

    #[serde(skip)]
    pub source: PathBuf,
}

impl Stack {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

impl DependencyNode for Stack {
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

/// Remote-state descriptor for a stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<String>,

    /// Typically a `${{ backend.azure.access_key }}` token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
}
