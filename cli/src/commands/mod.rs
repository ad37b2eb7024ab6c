//! Command Modules
//!
//! One module per top-level command. Every handler receives the parsed
//! subcommand, the cross-cutting flags and the process cancellation token.

pub mod config;
pub mod docker;
pub mod env;
pub mod infrastructure;
pub mod keyvault;
pub mod nuget;
pub mod pipelines;
pub mod tools;

pub use config::ConfigCommand;
pub use docker::DockerArgs;
pub use env::EnvCommand;
pub use infrastructure::InfrastructureCommand;
pub use keyvault::KeyvaultCommand;
pub use nuget::NugetCommand;
pub use pipelines::PipelinesCommand;
pub use tools::ToolsCommand;
