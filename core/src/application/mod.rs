//! Application Layer
//!
//! Dependency resolution, the vault store and variable resolver, the
//! pipeline engine and the worker adapters it dispatches to.

pub mod engine;
pub mod resolver;
pub mod variables;
pub mod vault_store;
pub mod workers;
