//! locally-core
//!
//! Boots local development stacks from layered file-based configuration.
//! The core loads contexts and their fragments, resolves `${{ … }}`
//! variables against named vaults, orders work by dependencies, and runs
//! pipelines by dispatching typed tasks to workers that drive external
//! tools.
//!
//! # Architecture
//!
//! - **domain** — contexts, services, stacks, pipelines, vault items and
//!   the external-tool seams.
//! - **application** — dependency resolver, vault store and variable
//!   resolver, pipeline engine, worker adapters.
//! - **infrastructure** — config formats and the loader, process and HTTP
//!   seam implementations, the notification bus.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::engine::{PipelineEngine, RunReport, RunState, TaskState};
pub use application::variables::VariableResolver;
pub use application::vault_store::VaultStore;
pub use domain::context::{Context, GlobalConfig};
pub use infrastructure::loader::ConfigLoader;
