//! Container lifecycle commands
//!
//! `locally docker <verb> [service]` drives the docker worker directly.
//! With `--all` or `--tag` the verb runs over the matching services in
//! dependency order (reverse order for teardown verbs).

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use locally_core::application::resolver;
use locally_core::application::workers::{docker::DockerWorker, Outcome, Worker};
use locally_core::domain::pipeline::{Task, TaskType};
use locally_core::domain::service::Service;

use crate::bootstrap::{load_session, worker_context};
use crate::GlobalArgs;

#[derive(Args)]
pub struct DockerArgs {
    /// generate, build, rebuild, up, down, start, stop, pause, resume,
    /// status, list, logs or delete
    pub verb: String,

    /// Service name; omit with --all, --tag, or for `list`
    pub service: Option<String>,

    /// Limit the operation to one component of a backend service
    #[arg(long)]
    pub component: Option<String>,
}

pub async fn handle(args: DockerArgs, globals: &GlobalArgs, cancel: &CancellationToken) -> Result<()> {
    let session = load_session(globals)?;
    let ctx = worker_context(&session, cancel).await?;
    let worker = DockerWorker;

    if args.verb == "list" {
        let task = docker_task(&args.verb, None, None);
        return run_one(&worker, &task, &ctx, cancel).await;
    }

    let services = select_services(&ctx.context, args.service.as_deref(), globals)?;
    let teardown = matches!(args.verb.as_str(), "down" | "stop" | "delete" | "pause");
    let ordered = if teardown {
        resolver::sort_subset_reverse(&services)?
    } else {
        resolver::sort_subset(&services)?
    };

    for service in &ordered {
        if cancel.is_cancelled() {
            bail!("interrupted");
        }
        println!("{} {} ({})", "service".bold(), service.name, args.verb);
        let task = docker_task(&args.verb, Some(&service.name), args.component.as_deref());
        run_one(&worker, &task, &ctx, cancel).await?;
    }
    println!("{}", "done".green());
    Ok(())
}

async fn run_one(
    worker: &DockerWorker,
    task: &Task,
    ctx: &locally_core::application::workers::WorkerContext,
    cancel: &CancellationToken,
) -> Result<()> {
    match worker.run(task, ctx, cancel).await {
        Outcome::Executed | Outcome::Valid => Ok(()),
        Outcome::Ignored => bail!("interrupted"),
        Outcome::Errored { code, message } => bail!("docker {code}: {message}"),
    }
}

fn docker_task(verb: &str, service: Option<&str>, component: Option<&str>) -> Task {
    let mut inputs: HashMap<String, serde_json::Value> = HashMap::new();
    inputs.insert("command".into(), serde_json::Value::String(verb.into()));
    if let Some(service) = service {
        inputs.insert("service".into(), serde_json::Value::String(service.into()));
    }
    if let Some(component) = component {
        inputs.insert(
            "component".into(),
            serde_json::Value::String(component.into()),
        );
    }
    Task {
        name: format!("docker-{verb}"),
        task_type: TaskType::Docker,
        inputs,
        ..Default::default()
    }
}

fn select_services(
    context: &locally_core::domain::context::Context,
    name: Option<&str>,
    globals: &GlobalArgs,
) -> Result<Vec<Service>> {
    let selected: Vec<Service> = if let Some(name) = name {
        match context
            .services()
            .find(|s| s.name.eq_ignore_ascii_case(name))
        {
            Some(service) => vec![service.clone()],
            None => bail!("no service named '{name}'"),
        }
    } else if globals.all {
        context.services().cloned().collect()
    } else if !globals.tags.is_empty() {
        context
            .services()
            .filter(|s| globals.tags.iter().any(|t| s.has_tag(t)))
            .cloned()
            .collect()
    } else {
        bail!("name a service, or pass --all or --tag");
    };

    if selected.is_empty() {
        bail!("selection matched no services");
    }
    Ok(selected)
}
