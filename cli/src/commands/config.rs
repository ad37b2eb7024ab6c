//! Configuration management commands
//!
//! Commands: show, contexts, use, validate, clean

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::load_session;
use crate::GlobalArgs;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the current context
    Show,

    /// List every known context
    Contexts,

    /// Select the current context
    #[command(name = "use")]
    Use {
        /// Context name
        name: String,
    },

    /// Load the configuration and report per-context validity
    Validate,

    /// Delete override files and derived state of the current context
    Clean,
}

pub async fn handle(
    command: ConfigCommand,
    globals: &GlobalArgs,
    _cancel: &CancellationToken,
) -> Result<()> {
    match command {
        ConfigCommand::Show => show(globals),
        ConfigCommand::Contexts => contexts(globals),
        ConfigCommand::Use { name } => use_context(globals, &name),
        ConfigCommand::Validate => validate(globals),
        ConfigCommand::Clean => clean(globals),
    }
}

fn show(globals: &GlobalArgs) -> Result<()> {
    let session = load_session(globals)?;
    let context = session.current_context()?;

    println!("{} {}", "context:".bold(), context.name);
    println!("{} {}", "config file:".bold(), context.config_file.display());
    if let Some(output) = &context.config.output_path {
        println!("{} {}", "output path:".bold(), output.display());
    }
    println!(
        "{} {} stacks, {} services, {} pipelines, {} fragments",
        "contents:".bold(),
        context.stacks.len(),
        context.services().count(),
        context.pipelines.len(),
        context.fragments.len()
    );
    Ok(())
}

fn contexts(globals: &GlobalArgs) -> Result<()> {
    let session = load_session(globals)?;
    let current = session.workspace.global.current_context.clone();

    for context in &session.workspace.contexts {
        let marker = if Some(&context.name) == current.as_ref() {
            "*".green().bold().to_string()
        } else {
            " ".to_string()
        };
        let state = if !context.valid {
            "invalid".red().to_string()
        } else if !context.enabled {
            "disabled".yellow().to_string()
        } else {
            "ok".green().to_string()
        };
        let default = if context.default { " (default)" } else { "" };
        println!("{marker} {} [{state}]{default}", context.name);
    }
    Ok(())
}

fn use_context(globals: &GlobalArgs, name: &str) -> Result<()> {
    let mut session = load_session(globals)?;

    let Some(context) = session.workspace.find_context(name) else {
        bail!("no context named '{name}'");
    };
    if !context.valid {
        bail!("context '{}' failed to load and cannot be selected", context.name);
    }
    let selected = context.name.clone();

    session.workspace.global.current_context = Some(selected.clone());
    session.loader.save_global(&session.workspace)?;
    println!("{} {selected}", "switched to".green());
    Ok(())
}

fn validate(globals: &GlobalArgs) -> Result<()> {
    let session = load_session(globals)?;

    let mut invalid = 0;
    for context in &session.workspace.contexts {
        if context.valid {
            println!("{} {}", "ok".green(), context.name);
        } else {
            invalid += 1;
            println!("{} {}", "invalid".red(), context.name);
        }
    }
    if invalid > 0 {
        bail!("{invalid} context(s) failed to load");
    }
    Ok(())
}

fn clean(globals: &GlobalArgs) -> Result<()> {
    let session = load_session(globals)?;
    let context = session.current_context()?;
    session.loader.clean_context(context)?;
    Ok(())
}
