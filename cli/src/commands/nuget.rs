//! Package feed commands
//!
//! Commands: list, restore. Packages come from context fragments; restore
//! copies built packages into the local feed folder under the output path.

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::load_session;
use crate::GlobalArgs;

#[derive(Subcommand)]
pub enum NugetCommand {
    /// List packages declared by the current context
    List,

    /// Copy declared package files into the local feed folder
    Restore,
}

pub async fn handle(
    command: NugetCommand,
    globals: &GlobalArgs,
    _cancel: &CancellationToken,
) -> Result<()> {
    let session = load_session(globals)?;
    let context = session.current_context()?;

    match command {
        NugetCommand::List => {
            for package in &context.nuget_packages {
                let version = package.version.as_deref().unwrap_or("*");
                println!("{} {version}", package.name.bold());
            }
            Ok(())
        }
        NugetCommand::Restore => {
            let Some(output) = &context.config.output_path else {
                bail!("context has no output path configured");
            };
            let feed = output.join("config-data").join("nuget");
            std::fs::create_dir_all(&feed)?;

            let mut copied = 0;
            for package in &context.nuget_packages {
                let Some(path) = &package.path else { continue };
                if !path.exists() {
                    println!("{} {} ({})", "missing".yellow(), package.name, path.display());
                    continue;
                }
                let target = feed.join(path.file_name().unwrap_or_default());
                std::fs::copy(path, &target)?;
                copied += 1;
            }
            println!("{} {copied} package(s) into {}", "restored".green(), feed.display());
            Ok(())
        }
    }
}
