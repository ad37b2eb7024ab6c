//! Configuration Loader
//!
//! Loads the layered on-disk configuration into the context graph:
//! discover the global file, load each context's root file, walk its
//! fragment tree with the default/override twin rule, merge everything,
//! and provision the canonical output folders.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** On-disk state -> domain model, plus the three writable
//!   persistence surfaces (root file, override twin, global file)
//! - **Determinism:** `load()` twice over the same disk state yields the
//!   same in-memory model

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::application::resolver::{self, DependencyError};
use crate::domain::context::{
    is_override_file, override_twin, BackendConfig, Context, ContextConfig, ContextEntry,
    Credentials, EnvironmentVariables, Fragment, GlobalConfig, NugetPackage, Tenant,
    SCHEMA_VERSION,
};
use crate::domain::pipeline::Pipeline;
use crate::domain::service::Service;
use crate::domain::stack::Stack;
use crate::infrastructure::format::{
    self, read_config, write_config, ConfigFormat, FormatError,
};
use crate::infrastructure::notifications::NotificationBus;

/// Global-config discovery order; first existing file wins.
pub const GLOBAL_CONFIG_NAMES: [&str; 10] = [
    "locally-config.personal.yml",
    "locally-config.personal.yaml",
    "locally-config.yml",
    "locally-config.yaml",
    "config.personal.yml",
    "config.personal.yaml",
    "config.yml",
    "config.yaml",
    "config.personal.json",
    "config.json",
];

/// Canonical subfolders auto-created under a context's output path.
pub const OUTPUT_SUBFOLDERS: [&str; 8] = [
    "caddy",
    "webclients",
    "infrastructure",
    "pipelines",
    "sources",
    "docker_compose",
    "ssl",
    "config-data",
];

/// Service subfolders auto-created under the output path.
pub const SERVICE_SUBFOLDERS: [&str; 4] = [
    "services",
    "services/backends",
    "services/mocks",
    "services/webclients",
];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("global config: {0}")]
    Global(#[from] FormatError),

    #[error("io error at {path}: {error}")]
    Io { path: String, error: String },

    #[error("dependency validation failed in context '{context}': {error}")]
    Dependencies {
        context: String,
        error: DependencyError,
    },

    #[error("refusing to write empty override file {path}")]
    EmptyOverride { path: String },

    #[error("no context named '{0}'")]
    UnknownContext(String),
}

// ============================================================================
// Manifest schema (external representation)
// ============================================================================

/// External schema of root config files and fragments. Both parse into this
/// one shape; a fragment simply leaves most fields empty. It is merged into
/// the domain [`Context`] with validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ContextConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_variables: Option<EnvironmentVariables>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<InfrastructureManifest>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_services: Vec<Service>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frontend_services: Vec<Service>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mock_services: Vec<Service>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tenants: Vec<Tenant>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nuget_packages: Vec<NugetPackage>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipelines: Vec<Pipeline>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_config: Option<BackendConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureManifest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<Stack>,
}

impl ContextManifest {
    pub fn is_empty(&self) -> bool {
        self.configuration.is_none()
            && self.environment_variables.is_none()
            && self
                .infrastructure
                .as_ref()
                .map_or(true, |i| i.stacks.is_empty())
            && self.backend_services.is_empty()
            && self.frontend_services.is_empty()
            && self.mock_services.is_empty()
            && self.tenants.is_empty()
            && self.nuget_packages.is_empty()
            && self.pipelines.is_empty()
            && self.credentials.is_none()
            && self.backend_config.is_none()
    }
}

// ============================================================================
// Loaded workspace
// ============================================================================

/// The result of a load: the global file plus every context it named.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub global: GlobalConfig,
    pub global_path: PathBuf,
    pub global_format: ConfigFormat,
    pub contexts: Vec<Context>,
}

impl Workspace {
    pub fn current_context(&self) -> Option<&Context> {
        let name = self.global.current_context.as_deref()?;
        self.contexts
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn current_context_mut(&mut self) -> Option<&mut Context> {
        let name = self.global.current_context.clone()?;
        self.contexts
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&name))
    }

    pub fn find_context(&self, name: &str) -> Option<&Context> {
        self.contexts
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Collect everything a given fragment contributed, as a manifest ready
    /// to be written to the fragment's override twin.
    pub fn fragment_manifest(context: &Context, source: &Path) -> ContextManifest {
        let stacks: Vec<Stack> = context
            .stacks
            .iter()
            .filter(|s| s.source == source)
            .cloned()
            .collect();

        ContextManifest {
            configuration: None,
            environment_variables: None,
            infrastructure: if stacks.is_empty() {
                None
            } else {
                Some(InfrastructureManifest { stacks })
            },
            backend_services: filter_by_source(&context.backend_services, source, |s| &s.source),
            frontend_services: filter_by_source(&context.frontend_services, source, |s| &s.source),
            mock_services: filter_by_source(&context.mock_services, source, |s| &s.source),
            tenants: filter_by_source(&context.tenants, source, |t| &t.source),
            nuget_packages: filter_by_source(&context.nuget_packages, source, |p| &p.source),
            pipelines: filter_by_source(&context.pipelines, source, |p| &p.source),
            credentials: None,
            backend_config: None,
        }
    }
}

fn filter_by_source<T: Clone>(items: &[T], source: &Path, get: impl Fn(&T) -> &Path) -> Vec<T> {
    items
        .iter()
        .filter(|i| get(i) == source)
        .cloned()
        .collect()
}

// ============================================================================
// Loader
// ============================================================================

pub struct ConfigLoader {
    /// Directory discovery runs in and `./` prefixes resolve against.
    base_dir: PathBuf,

    /// Explicit `--file` override; skips discovery entirely.
    explicit_file: Option<PathBuf>,

    notifications: NotificationBus,
}

impl ConfigLoader {
    pub fn new(base_dir: impl Into<PathBuf>, notifications: NotificationBus) -> Self {
        Self {
            base_dir: base_dir.into(),
            explicit_file: None,
            notifications,
        }
    }

    pub fn with_file(mut self, file: Option<PathBuf>) -> Self {
        self.explicit_file = file;
        self
    }

    /// Load the whole workspace. Individual contexts failing to load are
    /// marked invalid, never fatal; only a missing/unparsable global file
    /// (when explicitly given) fails the load.
    pub fn load(&self) -> Result<Workspace, LoadError> {
        let (mut global, global_path, global_format) = self.discover_global()?;

        // Assign ids before loading so contexts and entries stay in step,
        // and persist them: an id must survive the next load.
        let mut ids_assigned = false;
        for entry in &mut global.contexts {
            if entry.id.is_none() {
                entry.id = Some(Uuid::new_v4().to_string());
                ids_assigned = true;
            }
        }
        if ids_assigned {
            let _guard = path_lock(&global_path);
            write_config(&global_path, &global, global_format)?;
            debug!(path = %global_path.display(), "Persisted newly assigned context ids");
        }

        let mut contexts = Vec::with_capacity(global.contexts.len());
        for entry in &global.contexts {
            contexts.push(self.load_context(entry));
        }

        // A broken current context is cleared rather than served.
        if let Some(current) = global.current_context.clone() {
            let usable = contexts
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&current) && c.valid);
            if !usable {
                warn!(context = %current, "Current context is invalid, clearing selection");
                self.notifications.warning(
                    "context_error",
                    format!("current context '{current}' is invalid"),
                );
                global.current_context = None;
            }
        }

        // Promotion only considers contexts that actually loaded; promoting
        // an invalid default would undo the clearing above.
        global.ensure_default_context();
        if global.current_context.is_none() {
            global.current_context = global
                .contexts
                .iter()
                .filter(|entry| entry.default && entry.enabled)
                .map(|entry| entry.name.clone())
                .find(|name| {
                    contexts
                        .iter()
                        .any(|c| c.name.eq_ignore_ascii_case(name) && c.valid)
                });
        }

        Ok(Workspace {
            global,
            global_path,
            global_format,
            contexts,
        })
    }

    fn discover_global(&self) -> Result<(GlobalConfig, PathBuf, ConfigFormat), LoadError> {
        if let Some(explicit) = &self.explicit_file {
            let path = self.normalize_path(explicit);
            let (global, format) = read_config(&path)?;
            return Ok((global, path, format));
        }

        for name in GLOBAL_CONFIG_NAMES {
            let candidate = self.base_dir.join(name);
            if candidate.exists() {
                debug!(path = %candidate.display(), "Discovered global config");
                let (global, format) = read_config(&candidate)?;
                return Ok((global, candidate, format));
            }
        }

        // Nothing on disk: synthesize a fresh default and persist it.
        let path = self.base_dir.join(GLOBAL_CONFIG_NAMES[2]);
        let global = GlobalConfig::default();
        write_config(&path, &global, ConfigFormat::Yaml)?;
        info!(path = %path.display(), "Synthesized fresh global config");
        self.notifications
            .info("global_created", format!("created {}", path.display()));
        Ok((global, path, ConfigFormat::Yaml))
    }

    /// `./` and `.\` prefixes are rewritten relative to the base directory;
    /// everything else passes through, made absolute.
    fn normalize_path(&self, path: &Path) -> PathBuf {
        let text = path.to_string_lossy();
        if let Some(rest) = text.strip_prefix("./").or_else(|| text.strip_prefix(".\\")) {
            return self.base_dir.join(rest);
        }
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn load_context(&self, entry: &ContextEntry) -> Context {
        let config_file = self.normalize_path(&entry.config_file);

        let mut context = Context {
            id: entry.id.clone().unwrap_or_default(),
            name: entry.name.clone(),
            enabled: entry.enabled,
            default: entry.default,
            config_file: config_file.clone(),
            ..Default::default()
        };

        let (manifest, root_format): (ContextManifest, ConfigFormat) =
            match read_config(&config_file) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(context = %entry.name, error = %e, "Context root file failed to load");
                    self.notifications.error(
                        "context_error",
                        format!("context '{}' failed to load: {e}", entry.name),
                    );
                    context.valid = false;
                    return context;
                }
            };

        context.valid = true;
        context.format = root_format;
        apply_manifest(&mut context, manifest, &config_file);

        // Version drift warns, never blocks.
        if let Some(version) = &context.config.schema_version {
            if version != SCHEMA_VERSION {
                warn!(
                    context = %entry.name,
                    found = %version,
                    expected = SCHEMA_VERSION,
                    "Schema version mismatch"
                );
                self.notifications.warning(
                    "schema_mismatch",
                    format!(
                        "context '{}' declares schema {version}, expected {SCHEMA_VERSION}",
                        entry.name
                    ),
                );
            }
        }

        if let Some(output) = context.config.output_path.clone() {
            let output = self.normalize_path(&output);
            context.config.output_path = Some(output.clone());
            if let Err(e) = ensure_output_folders(&output) {
                warn!(error = %e, "Failed to provision output folders");
            }
        }

        if let Some(config_dir) = context.config.config_path.clone() {
            let config_dir = self.normalize_path(&config_dir);
            context.config.config_path = Some(config_dir.clone());
            self.load_fragments(&mut context, &config_dir);
        }

        // Unresolved dependsOn references are a load-time error for the
        // context, not the process.
        if let Err(e) = validate_dependencies(&context) {
            warn!(context = %entry.name, error = %e, "Dependency validation failed");
            self.notifications.error(
                "dependency_error",
                format!("context '{}': {e}", entry.name),
            );
            context.valid = false;
        }

        context
    }

    /// Walk the config folder; for each recognized file, skip defaults whose
    /// override twin exists, parse the rest and merge.
    fn load_fragments(&self, context: &mut Context, config_dir: &Path) {
        if !config_dir.is_dir() {
            return;
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(config_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| ConfigFormat::EXTENSIONS.contains(&e))
            })
            .collect();
        paths.sort();

        for path in paths {
            if path == context.config_file {
                continue;
            }
            if !is_override_file(&path) {
                if let Some(twin) = override_twin(&path) {
                    if twin.exists() {
                        debug!(path = %path.display(), "Default suppressed by override twin");
                        continue;
                    }
                }
            }

            match read_config::<ContextManifest>(&path) {
                Ok((manifest, _)) => {
                    apply_manifest(context, manifest, &path);
                    context.fragments.push(Fragment::new(&path));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Fragment failed to parse");
                    self.notifications.warning(
                        "fragment_error",
                        format!("fragment {} failed to parse: {e}", path.display()),
                    );
                }
            }
        }
    }

    // ========================================================================
    // Persistence surfaces
    // ========================================================================

    /// Rewrite the global file: currentContext, cors and the contexts list.
    pub fn save_global(&self, workspace: &Workspace) -> Result<(), LoadError> {
        let _guard = path_lock(&workspace.global_path);
        write_config(
            &workspace.global_path,
            &workspace.global,
            workspace.global_format,
        )?;
        Ok(())
    }

    /// Overwrite one modeled field of a context's root file. The file is
    /// re-read, the target field replaced, and the file rewritten in its
    /// original format; everything else it contains is preserved.
    pub fn save_root_field(
        &self,
        context: &Context,
        patch: RootFieldPatch,
    ) -> Result<(), LoadError> {
        let _guard = path_lock(&context.config_file);
        let (mut manifest, format): (ContextManifest, ConfigFormat) =
            read_config(&context.config_file)?;

        match patch {
            RootFieldPatch::Credentials(credentials) => {
                manifest.credentials = Some(credentials);
            }
            RootFieldPatch::BackendConfig(backend) => {
                manifest.backend_config = Some(backend);
            }
            RootFieldPatch::EnvironmentVariables(environment) => {
                manifest.environment_variables = Some(environment);
            }
        }

        write_config(&context.config_file, &manifest, format)?;
        Ok(())
    }

    /// Write a fragment's full content to its override twin. From then on
    /// every load uses the twin instead of the default. Empty manifests are
    /// refused: an empty override would silently erase the default.
    pub fn write_fragment_override(
        &self,
        default_source: &Path,
        manifest: &ContextManifest,
    ) -> Result<PathBuf, LoadError> {
        if manifest.is_empty() {
            return Err(LoadError::EmptyOverride {
                path: default_source.display().to_string(),
            });
        }

        let target = if is_override_file(default_source) {
            default_source.to_path_buf()
        } else {
            override_twin(default_source).ok_or_else(|| LoadError::EmptyOverride {
                path: default_source.display().to_string(),
            })?
        };

        let format = ConfigFormat::from_extension(&target).unwrap_or_default();
        let _guard = path_lock(&target);
        write_config(&target, manifest, format)?;
        info!(path = %target.display(), "Wrote fragment override");
        Ok(target)
    }

    /// Reset dynamic state: delete every override file under the context's
    /// config folder, then clear `lastInitiated` and the backend access key
    /// from the root file.
    pub fn clean_context(&self, context: &Context) -> Result<(), LoadError> {
        if let Some(config_dir) = &context.config.config_path {
            for entry in WalkDir::new(config_dir).follow_links(false) {
                let Ok(entry) = entry else { continue };
                if entry.file_type().is_file() && is_override_file(entry.path()) {
                    fs::remove_file(entry.path()).map_err(|e| LoadError::Io {
                        path: entry.path().display().to_string(),
                        error: e.to_string(),
                    })?;
                    info!(path = %entry.path().display(), "Deleted override file");
                }
            }
        }

        let _guard = path_lock(&context.config_file);
        let (mut manifest, format): (ContextManifest, ConfigFormat) =
            read_config(&context.config_file)?;

        if let Some(configuration) = &mut manifest.configuration {
            configuration.last_initiated = None;
        }
        if let Some(backend) = &mut manifest.backend_config {
            if let Some(azure) = &mut backend.azure {
                azure.access_key = None;
            }
        }

        write_config(&context.config_file, &manifest, format)?;
        self.notifications
            .success("clean", format!("context '{}' reset", context.name));
        Ok(())
    }
}

/// A single writable field of the root config file.
#[derive(Debug, Clone)]
pub enum RootFieldPatch {
    Credentials(Credentials),
    BackendConfig(BackendConfig),
    EnvironmentVariables(EnvironmentVariables),
}

// ============================================================================
// Merge
// ============================================================================

/// Merge one parsed manifest into a context: list fields append, scalar
/// configuration is last-write-wins, environment buckets merge key-wise.
/// Every contributed item is tagged with the file it came from.
fn apply_manifest(context: &mut Context, manifest: ContextManifest, source: &Path) {
    if let Some(configuration) = manifest.configuration {
        merge_config(&mut context.config, configuration);
    }
    if let Some(environment) = manifest.environment_variables {
        context.environment.merge(environment);
    }
    if let Some(credentials) = manifest.credentials {
        context.credentials = Some(credentials);
    }
    if let Some(backend) = manifest.backend_config {
        context.backend_config = Some(backend);
    }

    if let Some(infrastructure) = manifest.infrastructure {
        for mut stack in infrastructure.stacks {
            stack.source = source.to_path_buf();
            context.stacks.push(stack);
        }
    }
    for mut service in manifest.backend_services {
        service.source = source.to_path_buf();
        context.backend_services.push(service);
    }
    for mut service in manifest.frontend_services {
        service.source = source.to_path_buf();
        context.frontend_services.push(service);
    }
    for mut service in manifest.mock_services {
        service.source = source.to_path_buf();
        context.mock_services.push(service);
    }
    for mut tenant in manifest.tenants {
        tenant.source = source.to_path_buf();
        context.tenants.push(tenant);
    }
    for mut package in manifest.nuget_packages {
        package.source = source.to_path_buf();
        context.nuget_packages.push(package);
    }
    for mut pipeline in manifest.pipelines {
        pipeline.source = source.to_path_buf();
        for job in &mut pipeline.jobs {
            job.source = source.to_path_buf();
            for task in &mut job.tasks {
                task.source = source.to_path_buf();
            }
        }
        context.pipelines.push(pipeline);
    }
}

fn merge_config(target: &mut ContextConfig, incoming: ContextConfig) {
    if incoming.schema_version.is_some() {
        target.schema_version = incoming.schema_version;
    }
    if incoming.output_path.is_some() {
        target.output_path = incoming.output_path;
    }
    if incoming.config_path.is_some() {
        target.config_path = incoming.config_path;
    }
    if incoming.last_initiated.is_some() {
        target.last_initiated = incoming.last_initiated;
    }
    target.secondary_outputs.extend(incoming.secondary_outputs);
}

fn ensure_output_folders(output: &Path) -> std::io::Result<()> {
    for sub in OUTPUT_SUBFOLDERS.iter().chain(SERVICE_SUBFOLDERS.iter()) {
        fs::create_dir_all(output.join(sub))?;
    }
    Ok(())
}

fn validate_dependencies(context: &Context) -> Result<(), DependencyError> {
    resolver::check_references(&context.backend_services)?;
    resolver::check_references(&context.frontend_services)?;
    resolver::check_references(&context.mock_services)?;
    resolver::check_references(&context.stacks)?;
    resolver::check_references(&context.pipelines)?;
    for pipeline in &context.pipelines {
        resolver::check_references(&pipeline.jobs)?;
        for job in &pipeline.jobs {
            resolver::check_references(&job.tasks)?;
        }
    }
    Ok(())
}

// Override writes are serialized per path.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<dashmap::DashMap<PathBuf, Arc<Mutex<()>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(dashmap::DashMap::new);
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new(dir, NotificationBus::with_default_capacity())
    }

    #[test]
    fn test_discovery_synthesizes_default() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = loader(dir.path()).load().unwrap();

        assert!(workspace.contexts.is_empty());
        assert!(dir.path().join("locally-config.yml").exists());
        assert_eq!(workspace.global_format, ConfigFormat::Yaml);
    }

    #[test]
    fn test_discovery_prefers_personal_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("locally-config.yml"), "contexts: []\n").unwrap();
        std::fs::write(
            dir.path().join("locally-config.personal.yml"),
            "currentContext: personal\ncontexts: []\n",
        )
        .unwrap();

        let workspace = loader(dir.path()).load().unwrap();
        assert_eq!(
            workspace.global_path,
            dir.path().join("locally-config.personal.yml")
        );
    }

    #[test]
    fn test_missing_root_marks_context_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("locally-config.yml"),
            "currentContext: dev\ncontexts:\n  - name: dev\n    configFile: ./missing.yml\n",
        )
        .unwrap();

        let workspace = loader(dir.path()).load().unwrap();
        assert_eq!(workspace.contexts.len(), 1);
        assert!(!workspace.contexts[0].valid);
        // Invalid current context gets cleared.
        assert_eq!(workspace.global.current_context, None);
    }

    #[test]
    fn test_invalid_default_is_not_promoted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("locally-config.yml"),
            "currentContext: dev\ncontexts:\n  - name: dev\n    default: true\n    configFile: ./missing.yml\n",
        )
        .unwrap();

        let workspace = loader(dir.path()).load().unwrap();
        assert!(!workspace.contexts[0].valid);
        // The cleared selection stays cleared; the broken default does not
        // win it back.
        assert_eq!(workspace.global.current_context, None);
    }

    #[test]
    fn test_invalid_current_falls_back_to_valid_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.yml"), "pipelines: []\n").unwrap();
        std::fs::write(
            dir.path().join("locally-config.yml"),
            "currentContext: broken\ncontexts:\n  - name: broken\n    configFile: ./missing.yml\n  - name: good\n    default: true\n    configFile: ./good.yml\n",
        )
        .unwrap();

        let workspace = loader(dir.path()).load().unwrap();
        assert_eq!(workspace.global.current_context.as_deref(), Some("good"));
    }

    #[test]
    fn test_assigned_ids_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dev.yml"), "pipelines: []\n").unwrap();
        std::fs::write(
            dir.path().join("locally-config.yml"),
            "contexts:\n  - name: dev\n    configFile: ./dev.yml\n",
        )
        .unwrap();

        let first = loader(dir.path()).load().unwrap();
        let id = first.contexts[0].id.clone();
        assert!(!id.is_empty());

        // A separate loader over the same directory sees the same id.
        let second = loader(dir.path()).load().unwrap();
        assert_eq!(second.contexts[0].id, id);
    }

    #[test]
    fn test_fragment_appends_and_tags_source() {
        let dir = tempfile::tempdir().unwrap();
        let frags = dir.path().join("frags");
        std::fs::create_dir_all(&frags).unwrap();

        std::fs::write(
            dir.path().join("dev.yml"),
            format!(
                "configuration:\n  schemaVersion: \"1.1\"\n  configPath: {}\nbackendServices:\n  - name: api\n",
                frags.display()
            ),
        )
        .unwrap();
        std::fs::write(
            frags.join("extra.yml"),
            "backendServices:\n  - name: worker\n    dependsOn: [api]\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("locally-config.yml"),
            "contexts:\n  - name: dev\n    configFile: ./dev.yml\n",
        )
        .unwrap();

        let workspace = loader(dir.path()).load().unwrap();
        let context = &workspace.contexts[0];
        assert!(context.valid);
        assert_eq!(context.backend_services.len(), 2);
        assert_eq!(context.backend_services[1].source, frags.join("extra.yml"));
        assert_eq!(context.fragments.len(), 1);
    }

    #[test]
    fn test_override_twin_suppresses_default() {
        let dir = tempfile::tempdir().unwrap();
        let frags = dir.path().join("frags");
        std::fs::create_dir_all(&frags).unwrap();

        std::fs::write(
            dir.path().join("dev.yml"),
            format!("configuration:\n  configPath: {}\n", frags.display()),
        )
        .unwrap();
        std::fs::write(
            frags.join("infra.yml"),
            "infrastructure:\n  stacks:\n    - name: from-default\n",
        )
        .unwrap();
        std::fs::write(
            frags.join("infra.override.yml"),
            "infrastructure:\n  stacks:\n    - name: from-override\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("locally-config.yml"),
            "contexts:\n  - name: dev\n    configFile: ./dev.yml\n",
        )
        .unwrap();

        let workspace = loader(dir.path()).load().unwrap();
        let context = &workspace.contexts[0];
        assert_eq!(context.stacks.len(), 1);
        assert_eq!(context.stacks[0].name, "from-override");
        assert!(context
            .stacks
            .iter()
            .all(|s| s.source == frags.join("infra.override.yml")));
    }

    #[test]
    fn test_unresolved_dependency_invalidates_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("dev.yml"),
            "backendServices:\n  - name: api\n    dependsOn: [ghost]\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("locally-config.yml"),
            "contexts:\n  - name: dev\n    configFile: ./dev.yml\n",
        )
        .unwrap();

        let workspace = loader(dir.path()).load().unwrap();
        assert!(!workspace.contexts[0].valid);
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("dev.yml"),
            "pipelines:\n  - name: up\n    jobs: []\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("locally-config.yml"),
            "currentContext: dev\ncontexts:\n  - name: dev\n    id: fixed\n    configFile: ./dev.yml\n",
        )
        .unwrap();

        let l = loader(dir.path());
        let first = l.load().unwrap();
        let second = l.load().unwrap();

        assert_eq!(first.contexts.len(), second.contexts.len());
        assert_eq!(first.contexts[0].id, second.contexts[0].id);
        assert_eq!(
            first.contexts[0].pipelines[0].name,
            second.contexts[0].pipelines[0].name
        );
        assert_eq!(first.global.current_context, second.global.current_context);
    }

    #[test]
    fn test_refuses_empty_override() {
        let dir = tempfile::tempdir().unwrap();
        let l = loader(dir.path());
        let result =
            l.write_fragment_override(&dir.path().join("infra.yml"), &ContextManifest::default());
        assert!(matches!(result, Err(LoadError::EmptyOverride { .. })));
    }

    #[test]
    fn test_clean_deletes_overrides_and_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let frags = dir.path().join("frags");
        std::fs::create_dir_all(&frags).unwrap();
        std::fs::write(
            frags.join("infra.override.yml"),
            "infrastructure:\n  stacks:\n    - name: s\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("dev.yml"),
            format!(
                "configuration:\n  configPath: {}\n  lastInitiated: \"2026-01-01T00:00:00Z\"\nbackendConfig:\n  azure:\n    accessKey: secret\n",
                frags.display()
            ),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("locally-config.yml"),
            "contexts:\n  - name: dev\n    configFile: ./dev.yml\n",
        )
        .unwrap();

        let l = loader(dir.path());
        let workspace = l.load().unwrap();
        l.clean_context(&workspace.contexts[0]).unwrap();

        assert!(!frags.join("infra.override.yml").exists());

        let reloaded = l.load().unwrap();
        assert!(reloaded.contexts[0].config.last_initiated.is_none());
        let backend = reloaded.contexts[0].backend_config.as_ref().unwrap();
        assert!(backend.azure.as_ref().unwrap().access_key.is_none());
    }
}
