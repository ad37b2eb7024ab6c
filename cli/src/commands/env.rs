//! Global environment variable commands
//!
//! Commands: list, get, set, unset. Writes go to the `environmentVariables`
//! block of the current context's root file.

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use locally_core::infrastructure::loader::RootFieldPatch;

use crate::bootstrap::load_session;
use crate::GlobalArgs;

#[derive(Subcommand)]
pub enum EnvCommand {
    /// List global variables of the current context
    List,

    /// Print one variable
    Get {
        key: String,
    },

    /// Set a variable and persist it
    Set {
        key: String,
        value: String,
    },

    /// Remove a variable and persist the change
    Unset {
        key: String,
    },
}

pub async fn handle(
    command: EnvCommand,
    globals: &GlobalArgs,
    _cancel: &CancellationToken,
) -> Result<()> {
    match command {
        EnvCommand::List => list(globals),
        EnvCommand::Get { key } => get(globals, &key),
        EnvCommand::Set { key, value } => set(globals, &key, Some(value)),
        EnvCommand::Unset { key } => set(globals, &key, None),
    }
}

fn list(globals: &GlobalArgs) -> Result<()> {
    let session = load_session(globals)?;
    let context = session.current_context()?;

    let mut keys: Vec<&String> = context.environment.global.keys().collect();
    keys.sort();
    for key in keys {
        println!("{}={}", key.bold(), context.environment.global[key]);
    }
    Ok(())
}

fn get(globals: &GlobalArgs, key: &str) -> Result<()> {
    let session = load_session(globals)?;
    let context = session.current_context()?;

    match context.environment.global.get(key) {
        Some(value) => {
            println!("{value}");
            Ok(())
        }
        None => bail!("no global variable '{key}'"),
    }
}

fn set(globals: &GlobalArgs, key: &str, value: Option<String>) -> Result<()> {
    let session = load_session(globals)?;
    let context = session.current_context()?;

    let mut environment = context.environment.clone();
    match value {
        Some(value) => {
            environment.global.insert(key.to_string(), value);
        }
        None => {
            if environment.global.remove(key).is_none() {
                bail!("no global variable '{key}'");
            }
        }
    }

    session
        .loader
        .save_root_field(context, RootFieldPatch::EnvironmentVariables(environment))?;
    println!("{} {key}", "updated".green());
    Ok(())
}
