//! Infrastructure Worker
//!
//! Drives an IaC stack through the terraform CLI: init, validate, plan,
//! apply, destroy, output, graph, and the composite `up` which chains
//! init through output and stops on the first error. After `output`,
//! stack outputs land in the `terraform` vault so later tasks can read
//! them through `${{ terraform.* }}` tokens.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    decode_inputs, decode_shape, outcome_from_tool_error, Outcome, Worker, WorkerContext,
    CODE_EXTERNAL_TOOL, CODE_INVALID_PARAMETERS,
};
use crate::domain::pipeline::{Task, TaskType};
use crate::domain::stack::Stack;
use crate::domain::tools::CommandSpec;
use crate::domain::vault::VaultName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StackCommand {
    Init,
    Validate,
    Plan,
    Apply,
    Destroy,
    Output,
    Graph,
    Up,
}

impl StackCommand {
    fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Validate => "validate",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Output => "output",
            Self::Graph => "graph",
            Self::Up => "up",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfrastructureInputs {
    stack: String,
    command: StackCommand,
}

/// Shape of one entry in `terraform output -json`.
#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: serde_json::Value,
}

pub struct InfrastructureWorker;

impl InfrastructureWorker {
    /// The stack's working directory: the folder of its entry file,
    /// resolved against the context config path, else the task's.
    fn working_directory(ctx: &WorkerContext, stack: &Stack, task: &Task) -> Option<PathBuf> {
        if let Some(source_file) = &stack.source_file {
            let resolved = match &ctx.context.config.config_path {
                Some(base) => base.join(source_file),
                None => source_file.clone(),
            };
            return Some(
                resolved
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or(resolved),
            );
        }
        task.working_directory.clone()
    }

    fn base_spec(command: &str, cwd: Option<&PathBuf>) -> CommandSpec {
        let mut spec = CommandSpec::new("terraform").arg(command);
        if let Some(dir) = cwd {
            spec = spec.cwd(dir);
        }
        spec
    }

    /// `init` carries the remote-state backend configuration of the stack.
    fn init_spec(stack: &Stack, cwd: Option<&PathBuf>) -> CommandSpec {
        let mut spec = Self::base_spec("init", cwd).arg("-input=false");
        if let Some(state) = &stack.backend_state {
            let pairs = [
                ("resource_group_name", &state.resource_group),
                ("storage_account_name", &state.storage_account),
                ("container_name", &state.container),
                ("key", &state.state_file),
                ("access_key", &state.access_key),
            ];
            for (name, value) in pairs {
                if let Some(value) = value {
                    spec = spec.arg(format!("-backend-config={name}={value}"));
                }
            }
        }
        spec
    }

    fn command_spec(command: StackCommand, stack: &Stack, cwd: Option<&PathBuf>) -> CommandSpec {
        match command {
            StackCommand::Init => Self::init_spec(stack, cwd),
            StackCommand::Validate => Self::base_spec("validate", cwd),
            StackCommand::Plan => Self::base_spec("plan", cwd)
                .arg("-input=false")
                .arg("-out=tfplan"),
            StackCommand::Apply => Self::base_spec("apply", cwd)
                .arg("-input=false")
                .arg("-auto-approve")
                .arg("tfplan"),
            StackCommand::Destroy => Self::base_spec("destroy", cwd).arg("-auto-approve"),
            StackCommand::Output => Self::base_spec("output", cwd).arg("-json"),
            StackCommand::Graph => Self::base_spec("graph", cwd),
            // `up` never reaches here; it is expanded into its steps.
            StackCommand::Up => Self::base_spec("plan", cwd),
        }
    }

    async fn run_step(
        &self,
        command: StackCommand,
        stack: &Stack,
        cwd: Option<&PathBuf>,
        ctx: &WorkerContext,
        cancel: &CancellationToken,
    ) -> Outcome {
        // The access key usually arrives as a `${{ backend.* }}` token.
        let mut stack = stack.clone();
        if let Some(state) = &mut stack.backend_state {
            if let Some(key) = &state.access_key {
                match ctx.resolver.resolve(key) {
                    Ok(resolved) => state.access_key = Some(resolved),
                    Err(e) => return Outcome::errored(CODE_INVALID_PARAMETERS, e.to_string()),
                }
            }
        }

        let spec = Self::command_spec(command, &stack, cwd);
        let output = match ctx.runner.run(spec, cancel).await {
            Ok(output) => output,
            Err(e) => return outcome_from_tool_error(e),
        };
        if !output.success() {
            return Outcome::errored(
                CODE_EXTERNAL_TOOL,
                format!(
                    "terraform {} failed for stack '{}': {}",
                    command.as_str(),
                    stack.name,
                    output.stderr.trim()
                ),
            );
        }

        if command == StackCommand::Output {
            if let Err(outcome) = self.inject_outputs(&stack, &output.stdout, ctx) {
                return outcome;
            }
        }
        Outcome::Executed
    }

    /// Parse `output -json` and push every value into the terraform vault.
    fn inject_outputs(
        &self,
        stack: &Stack,
        stdout: &str,
        ctx: &WorkerContext,
    ) -> Result<(), Outcome> {
        let outputs: HashMap<String, OutputEntry> =
            serde_json::from_str(stdout).map_err(|e| {
                Outcome::errored(
                    CODE_EXTERNAL_TOOL,
                    format!("unparsable terraform output: {e}"),
                )
            })?;

        for (key, entry) in &outputs {
            let value = match &entry.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            ctx.vaults
                .set(VaultName::Terraform.as_str(), key, value);
        }
        info!(stack = %stack.name, outputs = outputs.len(), "Stack outputs injected");
        Ok(())
    }
}

#[async_trait]
impl Worker for InfrastructureWorker {
    fn name(&self) -> &str {
        "infrastructure"
    }

    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::Infrastructure
    }

    async fn validate(&self, task: &Task, _ctx: &WorkerContext) -> Outcome {
        let inputs: InfrastructureInputs = match decode_shape(task) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        if inputs.stack.trim().is_empty() {
            return Outcome::errored(CODE_INVALID_PARAMETERS, "empty stack name");
        }
        Outcome::Valid
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome {
        let inputs: InfrastructureInputs = match decode_inputs(task, &ctx.resolver) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };

        let Some(stack) = ctx.context.find_stack(&inputs.stack).cloned() else {
            return Outcome::errored(
                CODE_INVALID_PARAMETERS,
                format!("unknown stack '{}'", inputs.stack),
            );
        };
        let cwd = Self::working_directory(ctx, &stack, task);

        let steps: &[StackCommand] = match inputs.command {
            StackCommand::Up => &[
                StackCommand::Init,
                StackCommand::Validate,
                StackCommand::Plan,
                StackCommand::Apply,
                StackCommand::Output,
            ],
            single => return self.run_step(single, &stack, cwd.as_ref(), ctx, cancel).await,
        };

        for step in steps {
            let outcome = self.run_step(*step, &stack, cwd.as_ref(), ctx, cancel).await;
            if outcome != Outcome::Executed {
                return outcome;
            }
        }
        Outcome::Executed
    }
}
