//! Dotnet Worker
//!
//! Runs a managed-runtime project as a one-shot container. The worker
//! writes an ephemeral dockerfile and compose file under the context's
//! `sources` output folder, runs the container to completion, and tears
//! the stack down afterwards whether the run succeeded or not.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    decode_inputs, decode_shape, outcome_from_tool_error, Outcome, Worker, WorkerContext,
    CODE_EXTERNAL_TOOL, CODE_INVALID_PARAMETERS,
};
use crate::domain::pipeline::{Task, TaskType};
use crate::domain::tools::CommandSpec;

fn default_sdk_version() -> String {
    "8.0".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DotnetInputs {
    /// Path to the project folder; the entry project is found by `dotnet run`.
    project: String,

    /// Container and image name; defaults to the project folder name.
    #[serde(default)]
    name: Option<String>,

    #[serde(default = "default_sdk_version")]
    sdk_version: String,

    #[serde(default)]
    environment: HashMap<String, String>,
}

pub struct DotnetWorker;

impl DotnetWorker {
    fn run_name(inputs: &DotnetInputs) -> String {
        inputs
            .name
            .clone()
            .unwrap_or_else(|| {
                PathBuf::from(&inputs.project)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "dotnet-run".to_string())
            })
            .to_lowercase()
    }

    fn dockerfile(inputs: &DotnetInputs) -> String {
        format!(
            "FROM mcr.microsoft.com/dotnet/sdk:{}\nWORKDIR /app\nCOPY . .\nENTRYPOINT [\"dotnet\", \"run\", \"--project\", \"/app\"]\n",
            inputs.sdk_version
        )
    }

    fn compose(inputs: &DotnetInputs, name: &str) -> serde_yaml::Value {
        let environment: Vec<String> = inputs
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        serde_yaml::to_value(serde_json::json!({
            "name": name,
            "services": {
                name: {
                    "build": {"context": inputs.project, "dockerfile": "Dockerfile"},
                    "environment": environment,
                }
            }
        }))
        .unwrap_or(serde_yaml::Value::Null)
    }

    /// Write dockerfile + compose under `<output>/sources/<name>/`.
    fn write_ephemeral_files(
        ctx: &WorkerContext,
        inputs: &DotnetInputs,
        name: &str,
    ) -> Result<PathBuf, Outcome> {
        let Some(output) = &ctx.context.config.output_path else {
            return Err(Outcome::errored(
                CODE_INVALID_PARAMETERS,
                "context has no output path configured",
            ));
        };
        let folder = output.join("sources").join(name);
        std::fs::create_dir_all(&folder)
            .map_err(|e| Outcome::errored(CODE_EXTERNAL_TOOL, e.to_string()))?;

        let dockerfile = PathBuf::from(&inputs.project).join("Dockerfile");
        std::fs::write(&dockerfile, Self::dockerfile(inputs))
            .map_err(|e| Outcome::errored(CODE_EXTERNAL_TOOL, e.to_string()))?;

        let compose_path = folder.join("docker-compose.yml");
        let compose = serde_yaml::to_string(&Self::compose(inputs, name))
            .map_err(|e| Outcome::errored(CODE_EXTERNAL_TOOL, e.to_string()))?;
        std::fs::write(&compose_path, compose)
            .map_err(|e| Outcome::errored(CODE_EXTERNAL_TOOL, e.to_string()))?;

        debug!(folder = %folder.display(), "Ephemeral container files written");
        Ok(compose_path)
    }
}

#[async_trait]
impl Worker for DotnetWorker {
    fn name(&self) -> &str {
        "dotnet"
    }

    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::Dotnet
    }

    async fn validate(&self, task: &Task, _ctx: &WorkerContext) -> Outcome {
        let inputs: DotnetInputs = match decode_shape(task) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        if inputs.project.trim().is_empty() {
            return Outcome::errored(CODE_INVALID_PARAMETERS, "empty project path");
        }
        Outcome::Valid
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome {
        let inputs: DotnetInputs = match decode_inputs(task, &ctx.resolver) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        let name = Self::run_name(&inputs);

        let compose_path = match Self::write_ephemeral_files(ctx, &inputs, &name) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };
        let compose_arg = compose_path.display().to_string();

        let up = CommandSpec::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(&compose_arg)
            .arg("up")
            .arg("--build")
            .arg("--abort-on-container-exit")
            .arg("--exit-code-from")
            .arg(&name);
        let result = ctx.runner.run(up, cancel).await;

        // Teardown runs regardless of the run's outcome.
        let down = CommandSpec::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(&compose_arg)
            .arg("down")
            .arg("--rmi")
            .arg("local");
        let teardown = ctx.runner.run(down, &CancellationToken::new()).await;
        if let Ok(output) = &teardown {
            if !output.success() {
                ctx.notifications.warning(
                    "dotnet_teardown",
                    format!("container teardown failed: {}", output.stderr.trim()),
                );
            }
        }

        match result {
            Ok(output) if output.success() => {
                info!(name = %name, "Containerized run completed");
                Outcome::Executed
            }
            Ok(output) => Outcome::errored(
                CODE_EXTERNAL_TOOL,
                format!(
                    "containerized run exited with code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            ),
            Err(e) => outcome_from_tool_error(e),
        }
    }
}
