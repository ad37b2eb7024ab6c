//! Worker Adapters
//!
//! Workers wrap external tools behind one fixed contract: a worker names
//! itself, declares the task types it handles, proves a task's inputs at
//! validate time, and runs it. Cross-worker sequencing is expressed only
//! through `dependsOn`; a worker never calls another worker.
//!
//! Input decoding is uniform: the free-form input map is re-serialized
//! and deserialized into the worker's typed input struct, after variable
//! resolution has run over every string field. A shape mismatch is the
//! `invalid_parameters` outcome, never a panic.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::variables::VariableResolver;
use crate::application::vault_store::VaultStore;
use crate::domain::context::Context;
use crate::domain::pipeline::{Task, TaskType};
use crate::domain::tools::{CommandRunner, HttpClient, SecretStore};
use crate::infrastructure::notifications::NotificationBus;

pub mod bash;
pub mod curl;
pub mod docker;
pub mod dotnet;
pub mod git;
pub mod infrastructure;
pub mod keyvault;
pub mod npm;
pub mod sql;

/// The full built-in worker set, in dispatch order.
pub fn default_workers() -> Vec<Arc<dyn Worker>> {
    vec![
        Arc::new(infrastructure::InfrastructureWorker),
        Arc::new(docker::DockerWorker),
        Arc::new(dotnet::DotnetWorker),
        Arc::new(npm::NpmWorker),
        Arc::new(git::GitWorker),
        Arc::new(keyvault::KeyvaultWorker),
        Arc::new(sql::SqlWorker),
        Arc::new(bash::BashWorker),
        Arc::new(curl::CurlWorker),
    ]
}

pub const CODE_INVALID_PARAMETERS: &str = "invalid_parameters";
pub const CODE_EXTERNAL_TOOL: &str = "external_tool_error";
pub const CODE_NETWORK: &str = "network_error";
pub const CODE_CANCELLED: &str = "cancelled";

/// What a worker reports back for a validate or run call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Validate accepted the task.
    Valid,
    /// Run completed successfully.
    Executed,
    /// Not my type (or cancelled before work started).
    Ignored,
    /// Failed with a short error code and a message.
    Errored { code: String, message: String },
}

impl Outcome {
    pub fn errored(code: &str, message: impl Into<String>) -> Self {
        Self::Errored {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, Self::Errored { .. })
    }
}

/// Shared collaborators handed to every worker call. Workers are stateless;
/// everything they need arrives through here.
pub struct WorkerContext {
    pub context: Context,
    pub runner: Arc<dyn CommandRunner>,
    pub secrets: Arc<dyn SecretStore>,
    pub http: Arc<dyn HttpClient>,
    pub vaults: Arc<VaultStore>,
    pub resolver: Arc<VariableResolver>,
    pub notifications: NotificationBus,
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    fn handles(&self, task_type: TaskType) -> bool;

    /// Prove the shape of the task's inputs without side effects.
    async fn validate(&self, task: &Task, ctx: &WorkerContext) -> Outcome;

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome;
}

/// Resolve variables through every string field of the task's input map,
/// then decode into the worker's typed inputs.
pub fn decode_inputs<T: DeserializeOwned>(
    task: &Task,
    resolver: &VariableResolver,
) -> Result<T, Outcome> {
    let raw = serde_json::Value::Object(
        task.inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    let resolved = resolver.resolve_value(&raw).map_err(|e| {
        Outcome::errored(CODE_INVALID_PARAMETERS, e.to_string())
    })?;
    serde_json::from_value(resolved)
        .map_err(|e| Outcome::errored(CODE_INVALID_PARAMETERS, e.to_string()))
}

/// Decode without variable resolution. Validate-only calls use this: shape
/// is provable before vaults are synced.
pub fn decode_shape<T: DeserializeOwned>(task: &Task) -> Result<T, Outcome> {
    let raw = serde_json::Value::Object(
        task.inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    serde_json::from_value(raw)
        .map_err(|e| Outcome::errored(CODE_INVALID_PARAMETERS, e.to_string()))
}

/// Map a tool-seam failure onto the outcome taxonomy.
pub fn outcome_from_tool_error(error: crate::domain::tools::ToolError) -> Outcome {
    use crate::domain::tools::ToolError;
    match error {
        ToolError::Cancelled => Outcome::Ignored,
        ToolError::Http(message) => Outcome::errored(CODE_NETWORK, message),
        other => Outcome::errored(CODE_EXTERNAL_TOOL, other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::application::vault_store::SnapshotVault;
    use crate::domain::tools::{CommandOutput, CommandSpec, HttpResponse, ToolError};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Records every spawned command and replays scripted outputs.
    pub struct ScriptedRunner {
        pub calls: Mutex<Vec<CommandSpec>>,
        pub outputs: Mutex<Vec<Result<CommandOutput, ToolError>>>,
    }

    impl ScriptedRunner {
        pub fn ok() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                outputs: Mutex::new(Vec::new()),
            }
        }

        pub fn push(&self, result: Result<CommandOutput, ToolError>) {
            self.outputs.lock().push(result);
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls.lock().iter().map(|c| c.program.clone()).collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            spec: CommandSpec,
            _cancel: &CancellationToken,
        ) -> Result<CommandOutput, ToolError> {
            self.calls.lock().push(spec);
            let mut outputs = self.outputs.lock();
            if outputs.is_empty() {
                Ok(CommandOutput {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            } else {
                outputs.remove(0)
            }
        }
    }

    pub struct StaticSecrets(pub HashMap<String, String>);

    #[async_trait]
    impl SecretStore for StaticSecrets {
        async fn fetch_secrets(
            &self,
            _url: &str,
            _cancel: &CancellationToken,
        ) -> Result<HashMap<String, String>, ToolError> {
            Ok(self.0.clone())
        }
    }

    pub struct StaticHttp(pub HttpResponse);

    #[async_trait]
    impl HttpClient for StaticHttp {
        async fn request(
            &self,
            _method: &str,
            _url: &str,
            _headers: &HashMap<String, String>,
            _body: Option<String>,
            _cancel: &CancellationToken,
        ) -> Result<HttpResponse, ToolError> {
            Ok(HttpResponse {
                status: self.0.status,
                body: self.0.body.clone(),
            })
        }
    }

    /// A worker context over scripted seams and an empty context.
    pub async fn worker_context(runner: Arc<ScriptedRunner>) -> WorkerContext {
        worker_context_with(runner, Context::default()).await
    }

    pub async fn worker_context_with(
        runner: Arc<ScriptedRunner>,
        context: Context,
    ) -> WorkerContext {
        let vaults = Arc::new(VaultStore::new());
        vaults.register(Arc::new(SnapshotVault::config(&context)));
        vaults.register(Arc::new(SnapshotVault::credentials(&context)));
        vaults.register(Arc::new(SnapshotVault::backend(&context)));
        vaults.register(Arc::new(SnapshotVault::global(&context)));
        vaults.register(Arc::new(SnapshotVault::terraform()));
        vaults.register(Arc::new(SnapshotVault::new("keyvault", HashMap::new())));
        vaults.sync_all(&CancellationToken::new()).await;

        WorkerContext {
            context,
            runner,
            secrets: Arc::new(StaticSecrets(HashMap::new())),
            http: Arc::new(StaticHttp(HttpResponse {
                status: 200,
                body: String::new(),
            })),
            vaults: vaults.clone(),
            resolver: Arc::new(VariableResolver::new(vaults)),
            notifications: NotificationBus::with_default_capacity(),
        }
    }

    pub fn task(task_type: TaskType, inputs: serde_json::Value) -> Task {
        let serde_json::Value::Object(map) = inputs else {
            panic!("task inputs must be a JSON object");
        };
        Task {
            name: "test-task".into(),
            task_type,
            inputs: map.into_iter().collect(),
            ..Default::default()
        }
    }
}
