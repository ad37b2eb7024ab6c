//! Docker Worker
//!
//! Drives the container engine for a named service: compose generation,
//! build, lifecycle verbs and inspection. The compose file is written
//! under the context's `docker_compose` output folder; a service with a
//! registry spec gets a `docker login` with credentials resolved through
//! the variable resolver before any image operation.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    decode_inputs, decode_shape, outcome_from_tool_error, Outcome, Worker, WorkerContext,
    CODE_EXTERNAL_TOOL, CODE_INVALID_PARAMETERS,
};
use crate::domain::pipeline::{Task, TaskType};
use crate::domain::service::Service;
use crate::domain::tools::CommandSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DockerCommand {
    Generate,
    Build,
    Rebuild,
    Up,
    Down,
    Start,
    Stop,
    Pause,
    Resume,
    Status,
    List,
    Logs,
    Delete,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerInputs {
    command: DockerCommand,

    /// Service name; optional only for `list`.
    #[serde(default)]
    service: Option<String>,

    /// Limit the operation to one component of a backend service.
    #[serde(default)]
    component: Option<String>,
}

pub struct DockerWorker;

impl DockerWorker {
    fn compose_file(ctx: &WorkerContext, service: &Service) -> Option<PathBuf> {
        let output = ctx.context.config.output_path.as_ref()?;
        Some(
            output
                .join("docker_compose")
                .join(format!("{}.yml", service.name.to_lowercase())),
        )
    }

    /// Serialize the service's compose spec to its well-known location.
    fn generate(ctx: &WorkerContext, service: &Service) -> Outcome {
        let Some(compose) = &service.compose else {
            return Outcome::errored(
                CODE_INVALID_PARAMETERS,
                format!("service '{}' has no compose spec", service.name),
            );
        };
        let Some(path) = Self::compose_file(ctx, service) else {
            return Outcome::errored(
                CODE_INVALID_PARAMETERS,
                "context has no output path configured",
            );
        };

        let text = match serde_yaml::to_string(compose) {
            Ok(text) => text,
            Err(e) => return Outcome::errored(CODE_EXTERNAL_TOOL, e.to_string()),
        };
        // Compose files go through the same variable resolution as inputs.
        let text = match ctx.resolver.resolve(&text) {
            Ok(text) => text,
            Err(e) => return Outcome::errored(CODE_INVALID_PARAMETERS, e.to_string()),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Outcome::errored(CODE_EXTERNAL_TOOL, e.to_string());
            }
        }
        if let Err(e) = std::fs::write(&path, text) {
            return Outcome::errored(CODE_EXTERNAL_TOOL, e.to_string());
        }
        info!(service = %service.name, file = %path.display(), "Compose file generated");
        Outcome::Executed
    }

    /// `docker login` for services sourced from a registry. Credentials are
    /// usually `${{ credentials.* }}` tokens.
    async fn registry_login(
        ctx: &WorkerContext,
        service: &Service,
        cancel: &CancellationToken,
    ) -> Result<(), Outcome> {
        let Some(registry) = service.registry.as_ref().filter(|r| r.enabled) else {
            return Ok(());
        };
        let Some(credentials) = &registry.credentials else {
            return Ok(());
        };
        let (Some(username), Some(password)) = (&credentials.username, &credentials.password)
        else {
            return Ok(());
        };

        let resolve = |value: &str| {
            ctx.resolver
                .resolve(value)
                .map_err(|e| Outcome::errored(CODE_INVALID_PARAMETERS, e.to_string()))
        };
        let username = resolve(username)?;
        let password = resolve(password)?;

        // The password travels over stdin; it must never appear in argv.
        let spec = CommandSpec::new("docker")
            .arg("login")
            .arg(&registry.host)
            .arg("--username")
            .arg(username)
            .arg("--password-stdin")
            .stdin(password);
        debug!(registry = %registry.host, "Logging in to container registry");

        match ctx.runner.run(spec, cancel).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(Outcome::errored(
                CODE_EXTERNAL_TOOL,
                format!("registry login failed: {}", output.stderr.trim()),
            )),
            Err(e) => Err(outcome_from_tool_error(e)),
        }
    }

    fn compose_spec(
        ctx: &WorkerContext,
        service: &Service,
        verbs: &[&str],
        component: Option<&str>,
    ) -> Result<CommandSpec, Outcome> {
        let Some(file) = Self::compose_file(ctx, service) else {
            return Err(Outcome::errored(
                CODE_INVALID_PARAMETERS,
                "context has no output path configured",
            ));
        };
        let mut spec = CommandSpec::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(file.display().to_string())
            .args(verbs.iter().copied());
        if let Some(component) = component {
            spec = spec.arg(component);
        }
        Ok(spec)
    }
}

#[async_trait]
impl Worker for DockerWorker {
    fn name(&self) -> &str {
        "docker"
    }

    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::Docker
    }

    async fn validate(&self, task: &Task, _ctx: &WorkerContext) -> Outcome {
        let inputs: DockerInputs = match decode_shape(task) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };
        if inputs.service.is_none() && inputs.command != DockerCommand::List {
            return Outcome::errored(
                CODE_INVALID_PARAMETERS,
                "docker task needs a 'service' input",
            );
        }
        Outcome::Valid
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome {
        let inputs: DockerInputs = match decode_inputs(task, &ctx.resolver) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };

        if inputs.command == DockerCommand::List {
            let spec = CommandSpec::new("docker").arg("ps").arg("--all");
            return match ctx.runner.run(spec, cancel).await {
                Ok(output) if output.success() => {
                    ctx.notifications.info("docker_list", output.stdout);
                    Outcome::Executed
                }
                Ok(output) => Outcome::errored(CODE_EXTERNAL_TOOL, output.stderr.trim().to_string()),
                Err(e) => outcome_from_tool_error(e),
            };
        }

        let name = inputs.service.as_deref().unwrap_or_default();
        let Some(service) = ctx
            .context
            .services()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned()
        else {
            return Outcome::errored(
                CODE_INVALID_PARAMETERS,
                format!("unknown service '{name}'"),
            );
        };
        let component = inputs.component.as_deref();

        if matches!(
            inputs.command,
            DockerCommand::Build | DockerCommand::Rebuild | DockerCommand::Up
        ) {
            if let Err(outcome) = Self::registry_login(ctx, &service, cancel).await {
                return outcome;
            }
        }

        let spec = match inputs.command {
            DockerCommand::Generate => return Self::generate(ctx, &service),
            DockerCommand::Build => Self::compose_spec(ctx, &service, &["build"], component),
            DockerCommand::Rebuild => {
                Self::compose_spec(ctx, &service, &["build", "--no-cache"], component)
            }
            DockerCommand::Up => Self::compose_spec(ctx, &service, &["up", "-d"], component),
            DockerCommand::Down => Self::compose_spec(ctx, &service, &["down"], None),
            DockerCommand::Start => Self::compose_spec(ctx, &service, &["start"], component),
            DockerCommand::Stop => Self::compose_spec(ctx, &service, &["stop"], component),
            DockerCommand::Pause => Self::compose_spec(ctx, &service, &["pause"], component),
            DockerCommand::Resume => Self::compose_spec(ctx, &service, &["unpause"], component),
            DockerCommand::Status => Self::compose_spec(ctx, &service, &["ps"], None),
            DockerCommand::Logs => {
                Self::compose_spec(ctx, &service, &["logs", "--tail", "200"], component)
            }
            DockerCommand::Delete => {
                Self::compose_spec(ctx, &service, &["down", "--rmi", "local", "--volumes"], None)
            }
            DockerCommand::List => unreachable!(),
        };
        let spec = match spec {
            Ok(spec) => spec,
            Err(outcome) => return outcome,
        };

        match ctx.runner.run(spec, cancel).await {
            Ok(output) if output.success() => {
                if matches!(inputs.command, DockerCommand::Status | DockerCommand::Logs) {
                    ctx.notifications.info("docker_output", output.stdout);
                }
                Outcome::Executed
            }
            Ok(output) => Outcome::errored(
                CODE_EXTERNAL_TOOL,
                format!("docker command failed: {}", output.stderr.trim()),
            ),
            Err(e) => outcome_from_tool_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::workers::test_support::{task, worker_context_with, ScriptedRunner};
    use crate::domain::context::{Context, ContextConfig};
    use crate::domain::service::{ComposeSpec, ContainerRegistrySpec, RegistryCredentials};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn context_with_service(output: &std::path::Path) -> Context {
        Context {
            config: ContextConfig {
                output_path: Some(output.to_path_buf()),
                ..Default::default()
            },
            backend_services: vec![Service {
                name: "api".into(),
                compose: Some(ComposeSpec {
                    version: Some("3.9".into()),
                    name: Some("api".into()),
                    services: HashMap::from([(
                        "api".to_string(),
                        serde_json::json!({"image": "api:latest"}),
                    )]),
                }),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generate_writes_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = worker_context_with(
            Arc::new(ScriptedRunner::ok()),
            context_with_service(dir.path()),
        )
        .await;

        let t = task(
            TaskType::Docker,
            serde_json::json!({"command": "generate", "service": "api"}),
        );
        assert_eq!(DockerWorker.run(&t, &ctx, &CancellationToken::new()).await, Outcome::Executed);

        let written = dir.path().join("docker_compose/api.yml");
        let text = std::fs::read_to_string(written).unwrap();
        assert!(text.contains("api:latest"));
    }

    #[tokio::test]
    async fn test_up_targets_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::ok());
        let ctx = worker_context_with(runner.clone(), context_with_service(dir.path())).await;

        let t = task(
            TaskType::Docker,
            serde_json::json!({"command": "up", "service": "API"}),
        );
        assert_eq!(DockerWorker.run(&t, &ctx, &CancellationToken::new()).await, Outcome::Executed);

        let calls = runner.calls.lock();
        assert_eq!(calls[0].args[0], "compose");
        assert!(calls[0].args.contains(&"up".to_string()));
        assert!(calls[0].args.iter().any(|a| a.ends_with("api.yml")));
    }

    #[tokio::test]
    async fn test_registry_login_precedes_build() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::ok());
        let mut context = context_with_service(dir.path());
        context.backend_services[0].registry = Some(ContainerRegistrySpec {
            enabled: true,
            host: "registry.example.com".into(),
            credentials: Some(RegistryCredentials {
                username: Some("svc".into()),
                password: Some("secret".into()),
            }),
            ..Default::default()
        });
        let ctx = worker_context_with(runner.clone(), context).await;

        let t = task(
            TaskType::Docker,
            serde_json::json!({"command": "build", "service": "api"}),
        );
        assert_eq!(DockerWorker.run(&t, &ctx, &CancellationToken::new()).await, Outcome::Executed);

        let calls = runner.calls.lock();
        assert_eq!(calls[0].args[0], "login");
        assert_eq!(calls[1].args[0], "compose");
    }

    #[tokio::test]
    async fn test_login_password_goes_to_stdin_not_argv() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::ok());
        let mut context = context_with_service(dir.path());
        context.backend_services[0].registry = Some(ContainerRegistrySpec {
            enabled: true,
            host: "registry.example.com".into(),
            credentials: Some(RegistryCredentials {
                username: Some("svc".into()),
                password: Some("secret".into()),
            }),
            ..Default::default()
        });
        let ctx = worker_context_with(runner.clone(), context).await;

        let t = task(
            TaskType::Docker,
            serde_json::json!({"command": "build", "service": "api"}),
        );
        DockerWorker.run(&t, &ctx, &CancellationToken::new()).await;

        let calls = runner.calls.lock();
        let login = &calls[0];
        assert!(login.args.contains(&"--password-stdin".to_string()));
        assert_eq!(login.stdin.as_deref(), Some("secret"));
        assert!(!login.args.iter().any(|a| a.contains("secret")));
    }

    #[tokio::test]
    async fn test_unknown_service_is_invalid_parameters() {
        let ctx =
            worker_context_with(Arc::new(ScriptedRunner::ok()), Context::default()).await;
        let t = task(
            TaskType::Docker,
            serde_json::json!({"command": "up", "service": "ghost"}),
        );
        let outcome = DockerWorker.run(&t, &ctx, &CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            Outcome::Errored { code, .. } if code == CODE_INVALID_PARAMETERS
        ));
    }
}
