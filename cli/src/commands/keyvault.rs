//! Secret-store vault commands
//!
//! Commands: sync, list. Values never print; `list` shows key names only.

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use locally_core::domain::vault::VaultName;

use crate::bootstrap::{load_session, vault_store_for};
use crate::GlobalArgs;

#[derive(Subcommand)]
pub enum KeyvaultCommand {
    /// Force a re-sync of the secret-store vault
    Sync,

    /// List the keys currently held by the vault
    List,
}

pub async fn handle(
    command: KeyvaultCommand,
    globals: &GlobalArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let session = load_session(globals)?;
    let context = session.current_context()?;

    if context.environment.keyvault.url.is_none() {
        bail!("context '{}' has no keyvault url configured", context.name);
    }
    let store = vault_store_for(context, cancel).await;

    match command {
        KeyvaultCommand::Sync => {
            store
                .refresh(Some(VaultName::Keyvault.as_str()), cancel)
                .await?;
            println!("{}", "keyvault synced".green());
        }
        KeyvaultCommand::List => {
            if !store.is_synced(VaultName::Keyvault.as_str()) {
                bail!("keyvault is not synced; run 'locally keyvault sync'");
            }
            // Keys only; secret values stay out of terminal history.
            let mut keys = store.keys(VaultName::Keyvault.as_str());
            keys.sort();
            for key in keys {
                println!("{key}");
            }
        }
    }
    Ok(())
}
