//! Service Domain Model
//!
//! Backend, frontend and mock services share one shape: a name, a location
//! on disk, optional git/registry/compose specs, components (backends only)
//! and dependency edges.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::context::default_true;
use crate::domain::dependency::DependencyNode;

/// A backend, frontend or mock service declared by a fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,

    #[serde(default, skip_serializing_if = "ServiceLocation::is_empty")]
    pub location: ServiceLocation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<GitRepositorySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<ContainerRegistrySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<ComposeSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_origins: Vec<String>,

    /// Sub-deployables of a backend service; empty for frontends and mocks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ServiceComponent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_by: Vec<String>,

    #[serde(skip)]
    pub source: PathBuf,
}

impl Service {
    /// A service has a path iff a local root folder is set, a git clone is
    /// enabled, or the registry image reference is fully qualified
    /// (registry host + manifest + all component manifests).
    pub fn has_path(&self) -> bool {
        if self.location.root.is_some() {
            return true;
        }
        if self.repository.as_ref().is_some_and(|r| r.enabled) {
            return true;
        }
        if let Some(registry) = &self.registry {
            let components_qualified = self
                .components
                .iter()
                .all(|c| c.manifest_path.is_some());
            return !registry.host.is_empty()
                && registry.manifest_path.is_some()
                && components_qualified;
        }
        false
    }

    pub fn find_component(&self, name: &str) -> Option<&ServiceComponent> {
        self.components
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

impl DependencyNode for Service {
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

/// Where the service's code lives on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLocation {
    /// Root folder containing the service checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Subpath under the root, when the service is not at the checkout root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ServiceLocation {
    pub fn is_empty(&self) -> bool {
        self.root.is_none() && self.path.is_none()
    }

    /// The effective working directory: root joined with the subpath.
    pub fn resolve(&self) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        Some(match &self.path {
            Some(sub) => root.join(sub),
            None => root.clone(),
        })
    }
}

/// Git source of a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepositorySpec {
    #[serde(default)]
    pub enabled: bool,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Container-registry source of a service image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRegistrySpec {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Registry hostname, e.g. `myregistry.azurecr.io`.
    #[serde(default)]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,

    /// Image manifest path under the base path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Credential values; typically `${{ credentials.* }}` tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<RegistryCredentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Container-compose description for a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Free-form compose services map, passed through to the engine.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub services: HashMap<String, serde_json::Value>,
}

/// A deployable component of a backend service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceComponent {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Image manifest path for registry-sourced components.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_path_with_local_root() {
        let service = Service {
            name: "api".into(),
            location: ServiceLocation {
                root: Some("/src/api".into()),
                path: None,
            },
            ..Default::default()
        };
        assert!(service.has_path());
    }

    #[test]
    fn test_has_path_with_enabled_clone() {
        let service = Service {
            name: "api".into(),
            repository: Some(GitRepositorySpec {
                enabled: true,
                url: "https://example.com/api.git".into(),
                branch: None,
            }),
            ..Default::default()
        };
        assert!(service.has_path());
    }

    #[test]
    fn test_has_path_requires_qualified_registry() {
        let mut service = Service {
            name: "api".into(),
            registry: Some(ContainerRegistrySpec {
                enabled: true,
                host: "registry.example.com".into(),
                manifest_path: Some("teams/api".into()),
                ..Default::default()
            }),
            components: vec![ServiceComponent {
                name: "worker".into(),
                path: None,
                manifest_path: None,
            }],
            ..Default::default()
        };
        // Component without a manifest path disqualifies the reference.
        assert!(!service.has_path());

        service.components[0].manifest_path = Some("teams/api-worker".into());
        assert!(service.has_path());
    }

    #[test]
    fn test_no_path_when_nothing_is_set() {
        let service = Service {
            name: "api".into(),
            ..Default::default()
        };
        assert!(!service.has_path());
    }

    #[test]
    fn test_location_resolve_joins_subpath() {
        let location = ServiceLocation {
            root: Some("/src/platform".into()),
            path: Some("services/api".into()),
        };
        assert_eq!(
            location.resolve().unwrap(),
            PathBuf::from("/src/platform/services/api")
        );
    }
}
