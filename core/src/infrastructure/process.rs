//! Process-Backed Tool Runner
//!
//! Default implementation of the [`CommandRunner`] seam: spawns the
//! external program with `tokio::process`, captures output, and kills the
//! child on cancellation.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::tools::{CommandOutput, CommandRunner, CommandSpec, ToolError};

#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        debug!(program = %spec.program, args = ?spec.args, "Spawning external tool");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| ToolError::SpawnFailed {
            program: spec.program.clone(),
            error: e.to_string(),
        })?;

        // Write the payload and close the pipe so the child sees EOF. A
        // write failure (child exited early) surfaces through the exit
        // code, not here.
        if let Some(payload) = &spec.stdin {
            if let Some(mut handle) = child.stdin.take() {
                if let Err(e) = handle.write_all(payload.as_bytes()).await {
                    warn!(program = %spec.program, error = %e, "Stdin payload not fully written");
                }
            }
        }

        let output = tokio::select! {
            result = child.wait_with_output() => {
                result.map_err(|e| ToolError::SpawnFailed {
                    program: spec.program.clone(),
                    error: e.to_string(),
                })?
            }
            _ = cancel.cancelled() => {
                warn!(program = %spec.program, "External tool cancelled");
                return Err(ToolError::Cancelled);
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("sh").args(["-c", "echo hello"]);
        let output = runner.run(spec, &CancellationToken::new()).await.unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_surfaced_not_an_error() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("sh").args(["-c", "exit 3"]);
        let output = runner.run(spec, &CancellationToken::new()).await.unwrap();

        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_stdin_payload_reaches_child() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("sh")
            .args(["-c", "if read line; then echo got:$line; else echo nothing; fi"])
            .stdin("sekret\n");
        let output = runner.run(spec, &CancellationToken::new()).await.unwrap();

        assert_eq!(output.stdout.trim(), "got:sekret");
    }

    #[tokio::test]
    async fn test_stdin_closed_when_no_payload() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("sh").args(["-c", "if read line; then echo got:$line; else echo nothing; fi"]);
        let output = runner.run(spec, &CancellationToken::new()).await.unwrap();

        assert_eq!(output.stdout.trim(), "nothing");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("definitely-not-a-real-binary");
        let result = runner.run(spec, &CancellationToken::new()).await;

        assert!(matches!(result, Err(ToolError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn() {
        let runner = ProcessRunner::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runner.run(CommandSpec::new("sh"), &cancel).await;
        assert!(matches!(result, Err(ToolError::Cancelled)));
    }
}
