//! Infrastructure Layer
//!
//! File formats and the configuration loader, plus the process- and
//! HTTP-backed implementations of the external-tool seams.

pub mod format;
pub mod http_client;
pub mod keyvault_client;
pub mod loader;
pub mod notifications;
pub mod process;
