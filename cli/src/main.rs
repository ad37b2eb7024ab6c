//! # locally CLI
//!
//! The `locally` binary boots cloud-native development stacks on a
//! workstation: it loads the layered file configuration, selects a
//! context, and drives external tools through declarative pipelines.
//!
//! ## Commands
//!
//! - `locally config show|contexts|use|validate|clean` - Configuration management
//! - `locally env list|get|set` - Global environment variables
//! - `locally keyvault sync|list` - Secret-store vault
//! - `locally infrastructure up|plan|destroy|output` - IaC stacks
//! - `locally pipelines list|run` - Pipeline execution
//! - `locally docker <verb>` - Container lifecycle per service
//! - `locally nuget|tools` - Supporting utilities

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod bootstrap;
mod commands;

use commands::{
    ConfigCommand, DockerArgs, EnvCommand, InfrastructureCommand, KeyvaultCommand, NugetCommand,
    PipelinesCommand, ToolsCommand,
};

/// Exit code for a run interrupted during graceful shutdown.
const EXIT_INTERRUPTED: u8 = 2;

/// Boot local development stacks from layered configuration
#[derive(Parser)]
#[command(name = "locally")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the global config file (overrides discovery)
    #[arg(short, long, global = true, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Amplify debug output (implies --debug)
    #[arg(long, global = true)]
    verbose: bool,

    /// Select items by tag (repeatable)
    #[arg(long = "tag", global = true, value_name = "NAME")]
    tags: Vec<String>,

    /// Select all items
    #[arg(long, global = true)]
    all: bool,

    /// Include upstream dependencies in execution
    #[arg(long, global = true)]
    build_dependencies: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration and context management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Global environment variables
    Env {
        #[command(subcommand)]
        command: EnvCommand,
    },

    /// Secret-store vault operations
    Keyvault {
        #[command(subcommand)]
        command: KeyvaultCommand,
    },

    /// Infrastructure-as-code stacks
    Infrastructure {
        #[command(subcommand)]
        command: InfrastructureCommand,
    },

    /// Pipeline listing and execution
    Pipelines {
        #[command(subcommand)]
        command: PipelinesCommand,
    },

    /// Container lifecycle for services
    Docker(DockerArgs),

    /// Package feeds declared by the context
    Nuget {
        #[command(subcommand)]
        command: NugetCommand,
    },

    /// Check external tool availability
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },
}

/// Cross-cutting selection and behavior flags handed to every command.
#[derive(Clone)]
pub struct GlobalArgs {
    pub file: Option<PathBuf>,
    pub tags: Vec<String>,
    pub all: bool,
    pub build_dependencies: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.debug, cli.verbose) {
        eprintln!("{} {e:#}", "error:".red().bold());
        return ExitCode::from(1);
    }

    // Ctrl-C flips the token; workers unwind at their next suspension
    // point and the engine reports the run as aborted.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "interrupt received, shutting down".yellow());
            signal_token.cancel();
        }
    });

    let globals = GlobalArgs {
        file: cli.file,
        tags: cli.tags,
        all: cli.all,
        build_dependencies: cli.build_dependencies,
    };

    let result = dispatch(cli.command, &globals, &cancel).await;

    if cancel.is_cancelled() {
        return ExitCode::from(EXIT_INTERRUPTED);
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::from(1)
        }
    }
}

async fn dispatch(command: Commands, globals: &GlobalArgs, cancel: &CancellationToken) -> Result<()> {
    debug!("Dispatching command");
    match command {
        Commands::Config { command } => commands::config::handle(command, globals, cancel).await,
        Commands::Env { command } => commands::env::handle(command, globals, cancel).await,
        Commands::Keyvault { command } => commands::keyvault::handle(command, globals, cancel).await,
        Commands::Infrastructure { command } => {
            commands::infrastructure::handle(command, globals, cancel).await
        }
        Commands::Pipelines { command } => {
            commands::pipelines::handle(command, globals, cancel).await
        }
        Commands::Docker(args) => commands::docker::handle(args, globals, cancel).await,
        Commands::Nuget { command } => commands::nuget::handle(command, globals, cancel).await,
        Commands::Tools { command } => commands::tools::handle(command, globals, cancel).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, verbose: bool) -> Result<()> {
    let level = if verbose {
        "trace"
    } else if debug {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
