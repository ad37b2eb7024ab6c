//! Bash Worker
//!
//! Runs a shell script given inline (`script` input or the task body) in
//! the task's working directory. The script text goes through variable
//! resolution before it runs; a non-zero exit is the task's failure.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use super::{
    decode_inputs, decode_shape, outcome_from_tool_error, Outcome, Worker, WorkerContext,
    CODE_EXTERNAL_TOOL, CODE_INVALID_PARAMETERS,
};
use crate::domain::pipeline::{Task, TaskType};
use crate::domain::tools::CommandSpec;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BashInputs {
    #[serde(default)]
    script: Option<String>,

    /// Extra environment for the spawned shell.
    #[serde(default)]
    environment: HashMap<String, String>,
}

pub struct BashWorker;

impl BashWorker {
    fn script(task: &Task, inputs: &BashInputs) -> Option<String> {
        inputs
            .script
            .clone()
            .or_else(|| task.body.clone())
            .filter(|s| !s.trim().is_empty())
    }
}

#[async_trait]
impl Worker for BashWorker {
    fn name(&self) -> &str {
        "bash"
    }

    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::Bash
    }

    async fn validate(&self, task: &Task, _ctx: &WorkerContext) -> Outcome {
        let inputs: BashInputs = match decode_shape(task) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        if Self::script(task, &inputs).is_none() {
            return Outcome::errored(
                CODE_INVALID_PARAMETERS,
                "bash task needs a 'script' input or a body",
            );
        }
        Outcome::Valid
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome {
        let inputs: BashInputs = match decode_inputs(task, &ctx.resolver) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        let Some(raw) = Self::script(task, &inputs) else {
            return Outcome::errored(CODE_INVALID_PARAMETERS, "empty script");
        };
        // The body bypasses decode_inputs, resolve it here.
        let script = match ctx.resolver.resolve(&raw) {
            Ok(script) => script,
            Err(e) => return Outcome::errored(CODE_INVALID_PARAMETERS, e.to_string()),
        };

        let mut spec = CommandSpec::new("bash").arg("-c").arg(script);
        if let Some(dir) = &task.working_directory {
            spec = spec.cwd(dir);
        }
        for (key, value) in inputs.environment {
            spec = spec.env(key, value);
        }

        match ctx.runner.run(spec, cancel).await {
            Ok(output) if output.success() => Outcome::Executed,
            Ok(output) => Outcome::errored(
                CODE_EXTERNAL_TOOL,
                format!("script exited with code {}: {}", output.exit_code, output.stderr.trim()),
            ),
            Err(e) => outcome_from_tool_error(e),
        }
    }
}
