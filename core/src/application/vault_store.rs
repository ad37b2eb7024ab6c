//! Vault Store & Providers
//!
//! Vaults are opaque named key-value providers with a sync lifecycle:
//! unsynced -> synced. Only synced vaults answer lookups, and one vault's
//! sync failure never poisons the others.
//!
//! The whole store sits behind one reader/writer lock: readers are the
//! variable resolvers, writers are `sync`/`refresh`/`register`/`set`/
//! `remove` and the infrastructure worker's output injection.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::context::Context;
use crate::domain::tools::SecretStore;
use crate::domain::vault::VaultName;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault '{vault}' failed to sync: {error}")]
    SyncFailed { vault: String, error: String },

    #[error("no vault named '{0}' is registered")]
    UnknownVault(String),
}

/// A named key-value provider. The store does not care how a provider
/// obtains its data.
#[async_trait]
pub trait VaultProvider: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Produce the full key -> value map. Idempotent.
    async fn sync(&self, cancel: &CancellationToken) -> Result<HashMap<String, String>, VaultError>;
}

struct VaultState {
    provider: Arc<dyn VaultProvider>,
    synced: bool,
    items: HashMap<String, String>,
}

/// Registry of vaults guarded by a single RwLock (single writer, many
/// readers). Keys are lower-cased on insertion.
#[derive(Default)]
pub struct VaultStore {
    inner: RwLock<HashMap<String, VaultState>>,
}

impl VaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn VaultProvider>) {
        let name = provider.name().to_lowercase();
        self.inner.write().insert(
            name,
            VaultState {
                provider,
                synced: false,
                items: HashMap::new(),
            },
        );
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn is_synced(&self, vault: &str) -> bool {
        self.inner
            .read()
            .get(&vault.to_lowercase())
            .map(|v| v.synced)
            .unwrap_or(false)
    }

    /// Lookup in a synced vault. Unsynced or unknown vaults answer nothing.
    pub fn get(&self, vault: &str, key: &str) -> Option<String> {
        let inner = self.inner.read();
        let state = inner.get(&vault.to_lowercase())?;
        if !state.synced {
            return None;
        }
        state.items.get(&key.to_lowercase()).cloned()
    }

    /// Key names held by a vault, synced or not.
    pub fn keys(&self, vault: &str) -> Vec<String> {
        self.inner
            .read()
            .get(&vault.to_lowercase())
            .map(|v| v.items.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// True when the vault is registered but holds no items.
    pub fn is_empty(&self, vault: &str) -> bool {
        self.inner
            .read()
            .get(&vault.to_lowercase())
            .map(|v| v.items.is_empty())
            .unwrap_or(true)
    }

    /// Insert an item, marking the vault synced so the value is servable.
    /// Used by the infrastructure worker to inject stack outputs.
    pub fn set(&self, vault: &str, key: &str, value: impl Into<String>) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.get_mut(&vault.to_lowercase()) {
            state.items.insert(key.to_lowercase(), value.into());
            state.synced = true;
        }
    }

    pub fn remove(&self, vault: &str, key: &str) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.get_mut(&vault.to_lowercase()) {
            state.items.remove(&key.to_lowercase());
        }
    }

    /// Sync one vault. Idempotent: a synced vault is left alone unless
    /// `force` is set. A failed sync marks the vault not-synced.
    pub async fn sync(
        &self,
        vault: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), VaultError> {
        let name = vault.to_lowercase();
        let provider = {
            let inner = self.inner.read();
            let state = inner
                .get(&name)
                .ok_or_else(|| VaultError::UnknownVault(vault.to_string()))?;
            if !state.provider.is_enabled() {
                debug!(vault = %name, "Vault disabled, skipping sync");
                return Ok(());
            }
            if state.synced && !force {
                return Ok(());
            }
            state.provider.clone()
        };

        // Provider I/O happens outside the lock.
        match provider.sync(cancel).await {
            Ok(items) => {
                let mut inner = self.inner.write();
                if let Some(state) = inner.get_mut(&name) {
                    state.items = items
                        .into_iter()
                        .map(|(k, v)| (k.to_lowercase(), v))
                        .collect();
                    state.synced = true;
                }
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.write();
                if let Some(state) = inner.get_mut(&name) {
                    state.synced = false;
                }
                Err(e)
            }
        }
    }

    /// Sync every registered vault; failures are collected, not fatal.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Vec<VaultError> {
        let mut names = self.names();
        names.sort();

        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.sync(&name, false, cancel).await {
                warn!(vault = %name, error = %e, "Vault sync failed");
                failures.push(e);
            }
        }
        failures
    }

    /// Force a re-sync of one vault, or all of them when `vault` is `None`.
    pub async fn refresh(
        &self,
        vault: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), VaultError> {
        match vault {
            Some(name) => self.sync(name, true, cancel).await,
            None => {
                let mut names = self.names();
                names.sort();
                for name in names {
                    self.sync(&name, true, cancel).await?;
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Built-in providers
// ============================================================================

/// In-memory provider over a fixed snapshot. Backs the config, credentials,
/// backend and global vaults (snapshots of the current context) and the
/// initially-empty terraform vault.
pub struct SnapshotVault {
    name: String,
    items: HashMap<String, String>,
}

impl SnapshotVault {
    pub fn new(name: impl Into<String>, items: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }

    /// Keys drawn from the static configuration block of the context.
    pub fn config(context: &Context) -> Self {
        let mut items = HashMap::new();
        if let Some(output) = &context.config.output_path {
            items.insert("output_path".into(), output.display().to_string());
        }
        if let Some(config_dir) = &context.config.config_path {
            items.insert("config_path".into(), config_dir.display().to_string());
        }
        for (key, value) in &context.config.secondary_outputs {
            items.insert(format!("output.{key}"), value.display().to_string());
        }
        items.insert("context_name".into(), context.name.clone());
        Self::new(VaultName::Config.as_str(), items)
    }

    /// Keys drawn from the credentials block.
    pub fn credentials(context: &Context) -> Self {
        let mut items = HashMap::new();
        if let Some(credentials) = &context.credentials {
            if let Some(v) = &credentials.subscription_id {
                items.insert("subscription_id".into(), v.clone());
            }
            if let Some(v) = &credentials.tenant_id {
                items.insert("tenant_id".into(), v.clone());
            }
            if let Some(v) = &credentials.client_id {
                items.insert("client_id".into(), v.clone());
            }
            if let Some(v) = &credentials.client_secret {
                items.insert("client_secret".into(), v.clone());
            }
        }
        Self::new(VaultName::Credentials.as_str(), items)
    }

    /// Keys drawn from the backendConfig block, e.g. `azure.access_key`.
    pub fn backend(context: &Context) -> Self {
        let mut items = HashMap::new();
        if let Some(azure) = context.backend_config.as_ref().and_then(|b| b.azure.as_ref()) {
            if let Some(v) = &azure.resource_group {
                items.insert("azure.resource_group".into(), v.clone());
            }
            if let Some(v) = &azure.storage_account {
                items.insert("azure.storage_account".into(), v.clone());
            }
            if let Some(v) = &azure.container {
                items.insert("azure.container".into(), v.clone());
            }
            if let Some(v) = &azure.access_key {
                items.insert("azure.access_key".into(), v.clone());
            }
        }
        Self::new(VaultName::Backend.as_str(), items)
    }

    /// The user-writable global environment map.
    pub fn global(context: &Context) -> Self {
        Self::new(
            VaultName::Global.as_str(),
            context.environment.global.clone(),
        )
    }

    /// Terraform outputs start empty; the infrastructure worker injects
    /// them after reading stack outputs.
    pub fn terraform() -> Self {
        Self::new(VaultName::Terraform.as_str(), HashMap::new())
    }
}

#[async_trait]
impl VaultProvider for SnapshotVault {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sync(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>, VaultError> {
        Ok(self.items.clone())
    }
}

/// Secrets pulled from a cloud secret store identified by URL, optionally
/// base64-decoded before insertion.
pub struct KeyvaultProvider {
    url: Option<String>,
    base64_decode: bool,
    store: Arc<dyn SecretStore>,
}

impl KeyvaultProvider {
    pub fn new(context: &Context, store: Arc<dyn SecretStore>) -> Self {
        Self {
            url: context.environment.keyvault.url.clone(),
            base64_decode: context.environment.keyvault.base64_decode,
            store,
        }
    }
}

#[async_trait]
impl VaultProvider for KeyvaultProvider {
    fn name(&self) -> &str {
        VaultName::Keyvault.as_str()
    }

    fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    async fn sync(&self, cancel: &CancellationToken) -> Result<HashMap<String, String>, VaultError> {
        let Some(url) = &self.url else {
            return Ok(HashMap::new());
        };

        let raw = self
            .store
            .fetch_secrets(url, cancel)
            .await
            .map_err(|e| VaultError::SyncFailed {
                vault: self.name().to_string(),
                error: e.to_string(),
            })?;

        if !self.base64_decode {
            return Ok(raw);
        }

        use base64::Engine;
        let engine = base64::engine::general_purpose::STANDARD;
        let mut decoded = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            match engine.decode(&value) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        decoded.insert(key, text);
                    }
                    Err(_) => {
                        warn!(secret = %key, "Decoded secret is not UTF-8, keeping raw value");
                        decoded.insert(key, value);
                    }
                },
                Err(_) => {
                    // Not every secret is encoded; pass through untouched.
                    decoded.insert(key, value);
                }
            }
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str, pairs: &[(&str, &str)]) -> Arc<SnapshotVault> {
        Arc::new(SnapshotVault::new(
            name,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    #[tokio::test]
    async fn test_unsynced_vault_answers_nothing() {
        let store = VaultStore::new();
        store.register(snapshot("config", &[("Key", "value")]));

        assert_eq!(store.get("config", "key"), None);

        store
            .sync("config", false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.get("config", "key"), Some("value".into()));
    }

    #[tokio::test]
    async fn test_keys_are_lowercased_on_insertion() {
        let store = VaultStore::new();
        store.register(snapshot("config", &[("MiXeD", "v")]));
        store
            .sync("config", false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.get("config", "mixed"), Some("v".into()));
        assert_eq!(store.get("CONFIG", "MIXED"), Some("v".into()));
    }

    #[tokio::test]
    async fn test_failed_sync_does_not_poison_others() {
        struct Failing;

        #[async_trait]
        impl VaultProvider for Failing {
            fn name(&self) -> &str {
                "keyvault"
            }
            async fn sync(
                &self,
                _cancel: &CancellationToken,
            ) -> Result<HashMap<String, String>, VaultError> {
                Err(VaultError::SyncFailed {
                    vault: "keyvault".into(),
                    error: "timeout".into(),
                })
            }
        }

        let store = VaultStore::new();
        store.register(Arc::new(Failing));
        store.register(snapshot("global", &[("a", "1")]));

        let failures = store.sync_all(&CancellationToken::new()).await;
        assert_eq!(failures.len(), 1);
        assert!(!store.is_synced("keyvault"));
        assert_eq!(store.get("global", "a"), Some("1".into()));
    }

    #[tokio::test]
    async fn test_set_marks_synced_and_serves() {
        let store = VaultStore::new();
        store.register(Arc::new(SnapshotVault::terraform()));

        store.set("terraform", "Cluster_IP", "10.0.0.1");
        assert_eq!(store.get("terraform", "cluster_ip"), Some("10.0.0.1".into()));

        store.remove("terraform", "CLUSTER_IP");
        assert_eq!(store.get("terraform", "cluster_ip"), None);
    }

    #[tokio::test]
    async fn test_refresh_forces_resync() {
        use parking_lot::Mutex;

        struct Counting(Mutex<u32>);

        #[async_trait]
        impl VaultProvider for Counting {
            fn name(&self) -> &str {
                "global"
            }
            async fn sync(
                &self,
                _cancel: &CancellationToken,
            ) -> Result<HashMap<String, String>, VaultError> {
                *self.0.lock() += 1;
                Ok(HashMap::new())
            }
        }

        let provider = Arc::new(Counting(Mutex::new(0)));
        let store = VaultStore::new();
        store.register(provider.clone());

        let cancel = CancellationToken::new();
        store.sync("global", false, &cancel).await.unwrap();
        store.sync("global", false, &cancel).await.unwrap();
        assert_eq!(*provider.0.lock(), 1);

        store.refresh(Some("global"), &cancel).await.unwrap();
        assert_eq!(*provider.0.lock(), 2);
    }
}
