//! External tool availability commands
//!
//! Commands: check. Probes every tool the workers shell out to and reports
//! what is installed.

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use locally_core::domain::tools::{CommandRunner, CommandSpec};
use locally_core::infrastructure::process::ProcessRunner;

use crate::GlobalArgs;

/// Tool name and the argument that makes it print a version and exit.
const PROBES: &[(&str, &str)] = &[
    ("docker", "--version"),
    ("terraform", "--version"),
    ("git", "--version"),
    ("npm", "--version"),
    ("bash", "--version"),
    ("sqlcmd", "-?"),
];

#[derive(Subcommand)]
pub enum ToolsCommand {
    /// Check that the external tools workers rely on are installed
    Check,
}

pub async fn handle(
    command: ToolsCommand,
    _globals: &GlobalArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        ToolsCommand::Check => check(cancel).await,
    }
}

async fn check(cancel: &CancellationToken) -> Result<()> {
    let runner = Arc::new(ProcessRunner::new());
    let mut missing = 0;

    for (tool, probe) in PROBES {
        let spec = CommandSpec::new(*tool).arg(*probe);
        match runner.run(spec, cancel).await {
            Ok(output) if output.success() => {
                let version = output
                    .stdout
                    .lines()
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_string();
                println!("{} {tool} {version}", "found".green());
            }
            Ok(_) | Err(_) => {
                missing += 1;
                println!("{} {tool}", "missing".red());
            }
        }
    }

    if missing > 0 {
        bail!("{missing} tool(s) missing");
    }
    println!("{}", "all tools available".green().bold());
    Ok(())
}
