//! Infrastructure stack commands
//!
//! Commands: up, plan, destroy, output, graph. Stacks are selected by
//! name, `--tag` or `--all`; `--build-dependencies` pulls upstream stacks
//! into the selection. Execution order comes from the dependency sort,
//! reversed for destroy.

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use locally_core::application::resolver;
use locally_core::application::workers::{
    infrastructure::InfrastructureWorker, Outcome, Worker,
};
use locally_core::domain::pipeline::{Task, TaskType};
use locally_core::domain::stack::Stack;

use crate::bootstrap::{load_session, worker_context};
use crate::GlobalArgs;

#[derive(Subcommand)]
pub enum InfrastructureCommand {
    /// Init, validate, plan, apply and read outputs in one shot
    Up {
        /// Stack name; omit with --all or --tag
        stack: Option<String>,
    },

    /// Plan only
    Plan {
        stack: Option<String>,
    },

    /// Destroy stacks, dependents first
    Destroy {
        stack: Option<String>,
    },

    /// Read stack outputs into the terraform vault and print the keys
    Output {
        stack: Option<String>,
    },

    /// Emit the resource graph
    Graph {
        stack: Option<String>,
    },
}

pub async fn handle(
    command: InfrastructureCommand,
    globals: &GlobalArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let (name, verb, reverse) = match &command {
        InfrastructureCommand::Up { stack } => (stack, "up", false),
        InfrastructureCommand::Plan { stack } => (stack, "plan", false),
        InfrastructureCommand::Destroy { stack } => (stack, "destroy", true),
        InfrastructureCommand::Output { stack } => (stack, "output", false),
        InfrastructureCommand::Graph { stack } => (stack, "graph", false),
    };

    let session = load_session(globals)?;
    let ctx = worker_context(&session, cancel).await?;

    let selected = select_stacks(&ctx.context.stacks, name.as_deref(), globals)?;
    let ordered = if reverse {
        resolver::sort_subset_reverse(&selected)?
    } else {
        resolver::sort_subset(&selected)?
    };

    let worker = InfrastructureWorker;
    for stack in &ordered {
        if cancel.is_cancelled() {
            bail!("interrupted");
        }
        println!("{} {} ({verb})", "stack".bold(), stack.name);

        let task = stack_task(&stack.name, verb);
        match worker.run(&task, &ctx, cancel).await {
            Outcome::Executed => {}
            Outcome::Ignored => bail!("stack '{}' was interrupted", stack.name),
            Outcome::Errored { code, message } => {
                bail!("stack '{}' failed ({code}): {message}", stack.name)
            }
            Outcome::Valid => {}
        }
    }

    if verb == "output" {
        let mut keys = ctx.vaults.keys("terraform");
        keys.sort();
        for key in keys {
            println!("terraform.{key}");
        }
    }
    println!("{}", "done".green());
    Ok(())
}

fn stack_task(stack: &str, verb: &str) -> Task {
    let mut inputs: HashMap<String, serde_json::Value> = HashMap::new();
    inputs.insert("stack".into(), serde_json::Value::String(stack.into()));
    inputs.insert("command".into(), serde_json::Value::String(verb.into()));
    Task {
        name: format!("{verb}-{stack}"),
        task_type: TaskType::Infrastructure,
        inputs,
        ..Default::default()
    }
}

/// Resolve the stack selection from the name and the cross-cutting flags,
/// expanding with transitive dependencies when requested.
fn select_stacks(
    stacks: &[Stack],
    name: Option<&str>,
    globals: &GlobalArgs,
) -> Result<Vec<Stack>> {
    let mut selected: Vec<Stack> = if let Some(name) = name {
        match stacks.iter().find(|s| s.name.eq_ignore_ascii_case(name)) {
            Some(stack) => vec![stack.clone()],
            None => bail!("no stack named '{name}'"),
        }
    } else if globals.all {
        stacks.to_vec()
    } else if !globals.tags.is_empty() {
        stacks
            .iter()
            .filter(|s| globals.tags.iter().any(|t| s.has_tag(t)))
            .cloned()
            .collect()
    } else {
        bail!("name a stack, or pass --all or --tag");
    };

    if globals.build_dependencies {
        let mut index = 0;
        while index < selected.len() {
            let deps = selected[index].depends_on.clone();
            for dep in deps {
                let present = selected.iter().any(|s| s.name.eq_ignore_ascii_case(&dep));
                if !present {
                    if let Some(stack) =
                        stacks.iter().find(|s| s.name.eq_ignore_ascii_case(&dep))
                    {
                        selected.push(stack.clone());
                    }
                }
            }
            index += 1;
        }
    }

    if selected.is_empty() {
        bail!("selection matched no stacks");
    }
    Ok(selected)
}
