//! Context Domain Model
//!
//! A context is the root unit of a developer environment: one root config
//! file plus the fragment files that merged into it. The global config file
//! lists the known contexts and remembers which one is current.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Plain data describing contexts, fragments and their
//!   configuration blocks
//! - **Invariants:** unique names, unique ids, at most one default context

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::pipeline::Pipeline;
use crate::domain::service::Service;
use crate::domain::stack::Stack;

/// Schema version the loader expects in root config files. A mismatch is a
/// warning, never a load failure.
pub const SCHEMA_VERSION: &str = "1.1";

// ============================================================================
// Global configuration file
// ============================================================================

/// The global config file: the list of known contexts plus the process-wide
/// current-context selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cors: Vec<String>,

    #[serde(default)]
    pub contexts: Vec<ContextEntry>,
}

/// One context entry in the global file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    /// Stable id; assigned on first load if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub default: bool,

    /// Path to the context's root config file.
    pub config_file: PathBuf,
}

impl GlobalConfig {
    /// Upsert a context entry, matching by id first and name second.
    pub fn upsert_context(&mut self, entry: ContextEntry) {
        let existing = self.contexts.iter_mut().find(|c| {
            (entry.id.is_some() && c.id == entry.id) || c.name == entry.name
        });
        match existing {
            Some(slot) => *slot = entry,
            None => self.contexts.push(entry),
        }
    }

    /// Promote the first context to default when no entry claims it.
    /// Explicit so that reads never mutate.
    pub fn ensure_default_context(&mut self) {
        if !self.contexts.iter().any(|c| c.default) {
            if let Some(first) = self.contexts.first_mut() {
                first.default = true;
            }
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// A fully loaded context: the root file plus every fragment that merged in.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub default: bool,

    /// Absolute path of the root config file.
    pub config_file: PathBuf,

    /// A context is valid iff its root file existed and parsed.
    pub valid: bool,

    /// Format the root file was read in; re-writes preserve it.
    pub format: crate::infrastructure::format::ConfigFormat,

    pub config: ContextConfig,
    pub environment: EnvironmentVariables,
    pub stacks: Vec<Stack>,
    pub backend_services: Vec<Service>,
    pub frontend_services: Vec<Service>,
    pub mock_services: Vec<Service>,
    pub tenants: Vec<Tenant>,
    pub nuget_packages: Vec<NugetPackage>,
    pub pipelines: Vec<Pipeline>,
    pub credentials: Option<Credentials>,
    pub backend_config: Option<BackendConfig>,

    /// Every file that contributed to this context, root file excluded.
    pub fragments: Vec<Fragment>,
}

impl Context {
    /// All services regardless of flavour, backends first.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.backend_services
            .iter()
            .chain(self.frontend_services.iter())
            .chain(self.mock_services.iter())
    }

    pub fn find_pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn find_stack(&self, name: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// Scalar configuration block of a context. Fragments overwrite these fields
/// last-write-wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    /// Folder where generated artifacts land; canonical subfolders are
    /// auto-created under it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Folder scanned recursively for fragment files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,

    /// Secondary output locations, merged last-write-wins.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub secondary_outputs: HashMap<String, PathBuf>,

    /// Timestamp of the last successful `up`; cleared by cleanup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_initiated: Option<chrono::DateTime<chrono::Utc>>,
}

/// Environment-variable buckets. Sub-buckets merge key-wise across fragments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentVariables {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub global: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "KeyvaultEnvironment::is_empty")]
    pub keyvault: KeyvaultEnvironment,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub terraform: HashMap<String, String>,
}

impl EnvironmentVariables {
    /// Key-wise merge; `other` wins on conflicts.
    pub fn merge(&mut self, other: EnvironmentVariables) {
        self.global.extend(other.global);
        self.terraform.extend(other.terraform);
        if other.keyvault.url.is_some() {
            self.keyvault.url = other.keyvault.url;
        }
        if other.keyvault.base64_decode {
            self.keyvault.base64_decode = true;
        }
        self.keyvault.variables.extend(other.keyvault.variables);
    }
}

/// Keyvault bucket: where to sync secrets from and how to decode them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyvaultEnvironment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default)]
    pub base64_decode: bool,

    /// Secret-name -> vault-key mapping.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
}

impl KeyvaultEnvironment {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && !self.base64_decode && self.variables.is_empty()
    }
}

/// Cloud credentials block; user-writable through the root config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Backend-storage block used by infrastructure state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureBackend>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureBackend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    /// Short-lived; cleared from disk by the cleanup operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
}

/// A tenant of the application stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub settings: HashMap<String, String>,

    #[serde(skip)]
    pub source: PathBuf,
}

/// A NuGet package fed from a local feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NugetPackage {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(skip)]
    pub source: PathBuf,
}

// ============================================================================
// Fragments
// ============================================================================

/// A file that contributed to a context. Aggregated items remember the
/// fragment they came from so override writes and dependency lookups can
/// target the right file.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    /// Absolute path of the file that was parsed.
    pub source: PathBuf,
}

impl Fragment {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self { source: source.into() }
    }
}

/// The override marker inserted before a file's extension. A default file
/// whose override twin exists contributes nothing.
pub const OVERRIDE_MARKER: &str = ".override";

/// Extensions recognized as configuration files.
pub const CONFIG_EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// Whether `path` is an override file (`name.override.yml` and friends).
/// Only configuration extensions qualify; `notes.override.txt` is not ours
/// to manage.
pub fn is_override_file(path: &Path) -> bool {
    let recognized = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| CONFIG_EXTENSIONS.contains(&e));
    if !recognized {
        return false;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(OVERRIDE_MARKER))
}

/// The override twin for a default file: `infra.yml` -> `infra.override.yml`.
/// Returns `None` when the path has no extension.
pub fn override_twin(path: &Path) -> Option<PathBuf> {
    let ext = path.extension()?.to_str()?;
    let stem = path.file_stem()?.to_str()?;
    Some(path.with_file_name(format!("{stem}{OVERRIDE_MARKER}.{ext}")))
}

pub(crate) fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_twin_naming() {
        let twin = override_twin(Path::new("/ctx/infra.yml")).unwrap();
        assert_eq!(twin, PathBuf::from("/ctx/infra.override.yml"));
    }

    #[test]
    fn test_override_detection() {
        assert!(is_override_file(Path::new("/ctx/infra.override.yml")));
        assert!(is_override_file(Path::new("/ctx/infra.override.json")));
        assert!(!is_override_file(Path::new("/ctx/infra.yml")));
        assert!(!is_override_file(Path::new("/ctx/override")));
        // Unmanaged extensions never count, whatever the stem says.
        assert!(!is_override_file(Path::new("/ctx/notes.override.txt")));
        assert!(!is_override_file(Path::new("/ctx/plan.override")));
    }

    #[test]
    fn test_ensure_default_promotes_first() {
        let mut global = GlobalConfig {
            contexts: vec![
                ContextEntry {
                    id: None,
                    name: "dev".into(),
                    enabled: true,
                    default: false,
                    config_file: "dev.yml".into(),
                },
                ContextEntry {
                    id: None,
                    name: "test".into(),
                    enabled: true,
                    default: false,
                    config_file: "test.yml".into(),
                },
            ],
            ..Default::default()
        };

        global.ensure_default_context();
        assert!(global.contexts[0].default);
        assert!(!global.contexts[1].default);
    }

    #[test]
    fn test_upsert_matches_by_name() {
        let mut global = GlobalConfig::default();
        global.upsert_context(ContextEntry {
            id: None,
            name: "dev".into(),
            enabled: true,
            default: false,
            config_file: "a.yml".into(),
        });
        global.upsert_context(ContextEntry {
            id: None,
            name: "dev".into(),
            enabled: false,
            default: true,
            config_file: "b.yml".into(),
        });

        assert_eq!(global.contexts.len(), 1);
        assert_eq!(global.contexts[0].config_file, PathBuf::from("b.yml"));
    }

    #[test]
    fn test_environment_merge_is_keywise() {
        let mut base = EnvironmentVariables::default();
        base.global.insert("a".into(), "1".into());
        base.global.insert("b".into(), "2".into());

        let mut incoming = EnvironmentVariables::default();
        incoming.global.insert("b".into(), "3".into());
        incoming.terraform.insert("t".into(), "x".into());

        base.merge(incoming);
        assert_eq!(base.global["a"], "1");
        assert_eq!(base.global["b"], "3");
        assert_eq!(base.terraform["t"], "x");
    }
}
