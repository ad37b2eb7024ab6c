//! Git Worker
//!
//! Clones a repository to a destination, or pulls the default branch if
//! the destination is already a clone. Access-token, user/password and
//! SSH-key credentials are supported; `cleanBeforeClone` wipes the
//! destination first.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    decode_inputs, decode_shape, outcome_from_tool_error, Outcome, Worker, WorkerContext,
    CODE_EXTERNAL_TOOL, CODE_INVALID_PARAMETERS,
};
use crate::domain::pipeline::{Task, TaskType};
use crate::domain::tools::CommandSpec;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitInputs {
    url: String,
    destination: String,

    #[serde(default)]
    branch: Option<String>,

    #[serde(default)]
    clean_before_clone: bool,

    #[serde(default)]
    credentials: Option<GitCredentials>,
}

/// Exactly one credential style is used; token wins over user/password,
/// which wins over an SSH key.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitCredentials {
    #[serde(default)]
    access_token: Option<String>,

    #[serde(default)]
    username: Option<String>,

    #[serde(default)]
    password: Option<String>,

    #[serde(default)]
    ssh_key_path: Option<String>,
}

pub struct GitWorker;

impl GitWorker {
    /// Embed http(s) credentials into the clone URL.
    fn authenticated_url(url: &str, credentials: &GitCredentials) -> Result<String, String> {
        let Some(rest) = url
            .strip_prefix("https://")
            .map(|r| ("https", r))
            .or_else(|| url.strip_prefix("http://").map(|r| ("http", r)))
        else {
            return Err(format!("cannot embed credentials into non-http url '{url}'"));
        };
        let (scheme, rest) = rest;

        if let Some(token) = &credentials.access_token {
            return Ok(format!("{scheme}://{token}@{rest}"));
        }
        match (&credentials.username, &credentials.password) {
            (Some(user), Some(password)) => Ok(format!("{scheme}://{user}:{password}@{rest}")),
            _ => Err("credentials need an accessToken or username+password".into()),
        }
    }
}

#[async_trait]
impl Worker for GitWorker {
    fn name(&self) -> &str {
        "git"
    }

    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::Git
    }

    async fn validate(&self, task: &Task, _ctx: &WorkerContext) -> Outcome {
        let inputs: GitInputs = match decode_shape(task) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        if inputs.url.trim().is_empty() || inputs.destination.trim().is_empty() {
            return Outcome::errored(CODE_INVALID_PARAMETERS, "git task needs url and destination");
        }
        Outcome::Valid
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome {
        let inputs: GitInputs = match decode_inputs(task, &ctx.resolver) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        let destination = Path::new(&inputs.destination);

        // Already cloned: pull the default branch and stop.
        if destination.join(".git").is_dir() && !inputs.clean_before_clone {
            info!(destination = %inputs.destination, "Repository present, pulling");
            let spec = CommandSpec::new("git").arg("pull").cwd(destination);
            return match ctx.runner.run(spec, cancel).await {
                Ok(output) if output.success() => Outcome::Executed,
                Ok(output) => Outcome::errored(
                    CODE_EXTERNAL_TOOL,
                    format!("git pull failed: {}", output.stderr.trim()),
                ),
                Err(e) => outcome_from_tool_error(e),
            };
        }

        if inputs.clean_before_clone && destination.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(destination).await {
                return Outcome::errored(
                    CODE_EXTERNAL_TOOL,
                    format!("failed to clean '{}': {e}", inputs.destination),
                );
            }
        }

        let mut spec = CommandSpec::new("git").arg("clone");
        if let Some(branch) = &inputs.branch {
            spec = spec.arg("--branch").arg(branch);
        }

        let url = match &inputs.credentials {
            Some(credentials) if credentials.ssh_key_path.is_some() => {
                let key = credentials.ssh_key_path.as_deref().unwrap_or_default();
                spec = spec.env(
                    "GIT_SSH_COMMAND",
                    format!("ssh -i {key} -o IdentitiesOnly=yes"),
                );
                inputs.url.clone()
            }
            Some(credentials) => match Self::authenticated_url(&inputs.url, credentials) {
                Ok(url) => url,
                Err(e) => return Outcome::errored(CODE_INVALID_PARAMETERS, e),
            },
            None => inputs.url.clone(),
        };
        spec = spec.arg(url).arg(&inputs.destination);

        match ctx.runner.run(spec, cancel).await {
            Ok(output) if output.success() => Outcome::Executed,
            Ok(output) => Outcome::errored(
                CODE_EXTERNAL_TOOL,
                format!("git clone failed: {}", output.stderr.trim()),
            ),
            Err(e) => outcome_from_tool_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::workers::test_support::{task, worker_context, ScriptedRunner};
    use std::sync::Arc;

    #[test]
    fn test_token_embeds_into_url() {
        let credentials = GitCredentials {
            access_token: Some("tok".into()),
            ..Default::default()
        };
        assert_eq!(
            GitWorker::authenticated_url("https://example.com/repo.git", &credentials).unwrap(),
            "https://tok@example.com/repo.git"
        );
    }

    #[test]
    fn test_user_password_embed_into_url() {
        let credentials = GitCredentials {
            username: Some("u".into()),
            password: Some("p".into()),
            ..Default::default()
        };
        assert_eq!(
            GitWorker::authenticated_url("http://example.com/r", &credentials).unwrap(),
            "http://u:p@example.com/r"
        );
    }

    #[tokio::test]
    async fn test_fresh_destination_clones() {
        let runner = Arc::new(ScriptedRunner::ok());
        let ctx = worker_context(runner.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("repo");

        let t = task(
            TaskType::Git,
            serde_json::json!({
                "url": "https://example.com/repo.git",
                "destination": dest.to_str().unwrap(),
                "branch": "main"
            }),
        );
        assert_eq!(GitWorker.run(&t, &ctx, &CancellationToken::new()).await, Outcome::Executed);

        let calls = runner.calls.lock();
        assert_eq!(calls[0].args[0], "clone");
        assert!(calls[0].args.contains(&"--branch".to_string()));
    }

    #[tokio::test]
    async fn test_existing_clone_pulls() {
        let runner = Arc::new(ScriptedRunner::ok());
        let ctx = worker_context(runner.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();

        let t = task(
            TaskType::Git,
            serde_json::json!({
                "url": "https://example.com/repo.git",
                "destination": dir.path().to_str().unwrap()
            }),
        );
        assert_eq!(GitWorker.run(&t, &ctx, &CancellationToken::new()).await, Outcome::Executed);
        assert_eq!(runner.calls.lock()[0].args, vec!["pull"]);
    }

    #[tokio::test]
    async fn test_ssh_key_goes_through_environment() {
        let runner = Arc::new(ScriptedRunner::ok());
        let ctx = worker_context(runner.clone()).await;
        let dir = tempfile::tempdir().unwrap();

        let t = task(
            TaskType::Git,
            serde_json::json!({
                "url": "git@example.com:org/repo.git",
                "destination": dir.path().join("repo").to_str().unwrap(),
                "credentials": {"sshKeyPath": "/home/dev/.ssh/id_ed25519"}
            }),
        );
        assert_eq!(GitWorker.run(&t, &ctx, &CancellationToken::new()).await, Outcome::Executed);

        let calls = runner.calls.lock();
        assert!(calls[0].env["GIT_SSH_COMMAND"].contains("id_ed25519"));
    }
}
