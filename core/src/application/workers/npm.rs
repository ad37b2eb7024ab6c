//! Npm Worker
//!
//! Runs `ci`, `install`, `publish` or a free-form custom command in a
//! working directory. An optional minimum-version guard checks the
//! installed client before anything runs.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{
    decode_inputs, decode_shape, outcome_from_tool_error, Outcome, Worker, WorkerContext,
    CODE_EXTERNAL_TOOL, CODE_INVALID_PARAMETERS,
};
use crate::domain::pipeline::{Task, TaskType};
use crate::domain::tools::CommandSpec;

const KNOWN_COMMANDS: &[&str] = &["ci", "install", "publish"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NpmInputs {
    command: String,

    #[serde(default)]
    minimum_version: Option<String>,
}

pub struct NpmWorker;

impl NpmWorker {
    /// Dotted numeric comparison; missing segments count as zero.
    fn version_at_least(installed: &str, minimum: &str) -> bool {
        let parse = |v: &str| -> Vec<u64> {
            v.trim()
                .trim_start_matches('v')
                .split('.')
                .map(|part| part.trim().parse().unwrap_or(0))
                .collect()
        };
        let installed = parse(installed);
        let minimum = parse(minimum);
        for i in 0..installed.len().max(minimum.len()) {
            let a = installed.get(i).copied().unwrap_or(0);
            let b = minimum.get(i).copied().unwrap_or(0);
            if a != b {
                return a > b;
            }
        }
        true
    }
}

#[async_trait]
impl Worker for NpmWorker {
    fn name(&self) -> &str {
        "npm"
    }

    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::Npm
    }

    async fn validate(&self, task: &Task, _ctx: &WorkerContext) -> Outcome {
        let inputs: NpmInputs = match decode_shape(task) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        if inputs.command.trim().is_empty() {
            return Outcome::errored(CODE_INVALID_PARAMETERS, "empty npm command");
        }
        Outcome::Valid
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome {
        let inputs: NpmInputs = match decode_inputs(task, &ctx.resolver) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };

        if let Some(minimum) = &inputs.minimum_version {
            let version = match ctx
                .runner
                .run(CommandSpec::new("npm").arg("--version"), cancel)
                .await
            {
                Ok(output) if output.success() => output.stdout,
                Ok(output) => {
                    return Outcome::errored(
                        CODE_EXTERNAL_TOOL,
                        format!("npm --version failed: {}", output.stderr.trim()),
                    )
                }
                Err(e) => return outcome_from_tool_error(e),
            };
            if !Self::version_at_least(&version, minimum) {
                return Outcome::errored(
                    CODE_EXTERNAL_TOOL,
                    format!(
                        "npm {} is older than the required {minimum}",
                        version.trim()
                    ),
                );
            }
        }

        // Known verbs run as-is; anything else is a free-form command line.
        let command = inputs.command.trim();
        let args: Vec<String> = if KNOWN_COMMANDS.contains(&command) {
            vec![command.to_string()]
        } else {
            command.split_whitespace().map(str::to_string).collect()
        };

        let mut spec = CommandSpec::new("npm").args(args);
        if let Some(dir) = &task.working_directory {
            spec = spec.cwd(dir);
        }

        match ctx.runner.run(spec, cancel).await {
            Ok(output) if output.success() => Outcome::Executed,
            Ok(output) => Outcome::errored(
                CODE_EXTERNAL_TOOL,
                format!("npm {command} failed: {}", output.stderr.trim()),
            ),
            Err(e) => outcome_from_tool_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::workers::test_support::{task, worker_context, ScriptedRunner};
    use crate::domain::tools::CommandOutput;
    use std::sync::Arc;

    #[test]
    fn test_version_comparison() {
        assert!(NpmWorker::version_at_least("10.2.1", "10.2"));
        assert!(NpmWorker::version_at_least("10.2.0", "10.2.0"));
        assert!(!NpmWorker::version_at_least("9.9.9", "10.0.0"));
        assert!(NpmWorker::version_at_least("v11.0.0\n", "10"));
    }

    #[tokio::test]
    async fn test_custom_command_is_split() {
        let runner = Arc::new(ScriptedRunner::ok());
        let ctx = worker_context(runner.clone()).await;

        let t = task(
            TaskType::Npm,
            serde_json::json!({"command": "run build --workspace web"}),
        );
        assert_eq!(NpmWorker.run(&t, &ctx, &CancellationToken::new()).await, Outcome::Executed);
        assert_eq!(
            runner.calls.lock()[0].args,
            vec!["run", "build", "--workspace", "web"]
        );
    }

    #[tokio::test]
    async fn test_minimum_version_guard_blocks_old_client() {
        let runner = Arc::new(ScriptedRunner::ok());
        runner.push(Ok(CommandOutput {
            exit_code: 0,
            stdout: "8.19.4\n".into(),
            stderr: String::new(),
        }));
        let ctx = worker_context(runner.clone()).await;

        let t = task(
            TaskType::Npm,
            serde_json::json!({"command": "ci", "minimumVersion": "9.0.0"}),
        );
        let outcome = NpmWorker.run(&t, &ctx, &CancellationToken::new()).await;
        assert!(outcome.is_errored());
        // Only the version probe ran.
        assert_eq!(runner.calls.lock().len(), 1);
    }
}
