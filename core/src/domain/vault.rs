//! Vault Domain Model
//!
//! A vault is a named key-value provider consulted by the variable
//! resolver. Keys are lower-cased on insertion; values may themselves
//! contain further `${{ … }}` tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Names of the vaults the core ships with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultName {
    Config,
    Credentials,
    Backend,
    Global,
    Terraform,
    Keyvault,
}

impl VaultName {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultName::Config => "config",
            VaultName::Credentials => "credentials",
            VaultName::Backend => "backend",
            VaultName::Global => "global",
            VaultName::Terraform => "terraform",
            VaultName::Keyvault => "keyvault",
        }
    }
}

impl fmt::Display for VaultName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(vault, key, value)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultItem {
    pub vault: String,
    pub key: String,
    pub value: String,
}

impl VaultItem {
    /// Keys are lower-cased on construction so lookups are case-insensitive.
    pub fn new(
        vault: impl Into<String>,
        key: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            vault: vault.into(),
            key: key.as_ref().to_lowercase(),
            value: value.into(),
        }
    }
}
