//! Keyvault Worker
//!
//! Syncs a cloud secret store into the `keyvault` vault. With no inputs
//! the context's configured store is refreshed; an explicit `url` input
//! pulls from that store instead, with optional base64 decoding.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    decode_inputs, decode_shape, outcome_from_tool_error, Outcome, Worker, WorkerContext,
};
use crate::domain::pipeline::{Task, TaskType};
use crate::domain::vault::VaultName;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyvaultInputs {
    #[serde(default)]
    url: Option<String>,

    #[serde(default)]
    base64_decode: bool,
}

pub struct KeyvaultWorker;

#[async_trait]
impl Worker for KeyvaultWorker {
    fn name(&self) -> &str {
        "keyvault"
    }

    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::Keyvault
    }

    async fn validate(&self, task: &Task, _ctx: &WorkerContext) -> Outcome {
        match decode_shape::<KeyvaultInputs>(task) {
            Ok(_) => Outcome::Valid,
            Err(outcome) => outcome,
        }
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome {
        let inputs: KeyvaultInputs = match decode_inputs(task, &ctx.resolver) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };

        let Some(url) = &inputs.url else {
            // No explicit source: force-refresh the registered vault.
            return match ctx
                .vaults
                .refresh(Some(VaultName::Keyvault.as_str()), cancel)
                .await
            {
                Ok(()) => Outcome::Executed,
                Err(e) => Outcome::errored(super::CODE_NETWORK, e.to_string()),
            };
        };

        let secrets = match ctx.secrets.fetch_secrets(url, cancel).await {
            Ok(secrets) => secrets,
            Err(e) => return outcome_from_tool_error(e),
        };

        use base64::Engine;
        let engine = base64::engine::general_purpose::STANDARD;
        let mut inserted = 0usize;
        for (key, value) in secrets {
            let value = if inputs.base64_decode {
                engine
                    .decode(&value)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .unwrap_or(value)
            } else {
                value
            };
            ctx.vaults.set(VaultName::Keyvault.as_str(), &key, value);
            inserted += 1;
        }

        info!(url = %url, secrets = inserted, "Secret store synced");
        ctx.notifications
            .success("keyvault_sync", format!("synced {inserted} secrets"));
        Outcome::Executed
    }
}
