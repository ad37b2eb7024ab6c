//! Curl Worker
//!
//! One HTTP request through the [`HttpClient`] seam. The status code is
//! part of the outcome: 2xx/3xx succeed, anything else errors with the
//! status in the message.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{decode_inputs, decode_shape, Outcome, Worker, WorkerContext, CODE_NETWORK};
use crate::domain::pipeline::{Task, TaskType};
use crate::domain::tools::ToolError;

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurlInputs {
    url: String,

    #[serde(default = "default_method")]
    method: String,

    #[serde(default)]
    headers: HashMap<String, String>,

    #[serde(default)]
    body: Option<String>,
}

pub struct CurlWorker;

#[async_trait]
impl Worker for CurlWorker {
    fn name(&self) -> &str {
        "curl"
    }

    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::Curl
    }

    async fn validate(&self, task: &Task, _ctx: &WorkerContext) -> Outcome {
        match decode_shape::<CurlInputs>(task) {
            Ok(_) => Outcome::Valid,
            Err(outcome) => outcome,
        }
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome {
        let inputs: CurlInputs = match decode_inputs(task, &ctx.resolver) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };

        let response = match ctx
            .http
            .request(&inputs.method, &inputs.url, &inputs.headers, inputs.body, cancel)
            .await
        {
            Ok(response) => response,
            Err(ToolError::Cancelled) => return Outcome::Ignored,
            Err(e) => return Outcome::errored(CODE_NETWORK, e.to_string()),
        };

        debug!(url = %inputs.url, status = response.status, "HTTP request completed");
        if response.status < 400 {
            ctx.notifications.success(
                "http_request",
                format!("{} {} -> {}", inputs.method, inputs.url, response.status),
            );
            Outcome::Executed
        } else {
            Outcome::errored(
                CODE_NETWORK,
                format!("{} {} returned HTTP {}", inputs.method, inputs.url, response.status),
            )
        }
    }
}
