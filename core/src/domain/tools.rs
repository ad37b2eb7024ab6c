//! External Tool Seams
//!
//! The core never spells external command lines itself; workers assemble
//! fully-formed argument vectors and hand them to these interfaces. The
//! process-backed implementations live in the infrastructure layer; tests
//! substitute mocks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A fully-formed external command invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,

    /// Payload delivered on the child's stdin. Without one, stdin is
    /// closed. Secrets travel here rather than in `args`, which leak
    /// through process listings.
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn '{program}': {error}")]
    SpawnFailed { program: String, error: String },

    #[error("'{program}' exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("http request failed: {0}")]
    Http(String),
}

/// Spawns an external program and waits for it to exit. Implementations
/// must honour the cancellation token at every suspension point.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ToolError>;
}

/// Fetches secrets from a cloud secret store identified by URL.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// List and fetch every secret under `url` as name -> value.
    async fn fetch_secrets(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>, ToolError>;
}

/// Response surfaced by the curl worker's seam.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Minimal HTTP interface behind the curl worker.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ToolError>;
}
