//! Pipeline commands
//!
//! Commands: list, run. Selection honors `--tag`, `--all` and explicit
//! names; `--build-dependencies` pulls upstream pipelines in. The run
//! exits non-zero when the engine reports failure or abort.

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use locally_core::application::engine::{select_pipelines, RunState, TaskState};
use locally_core::domain::pipeline::Pipeline;

use crate::bootstrap::{engine, load_session, worker_context};
use crate::GlobalArgs;

#[derive(Subcommand)]
pub enum PipelinesCommand {
    /// List the pipelines of the current context
    List,

    /// Validate and execute pipelines
    Run {
        /// Pipeline names; omit with --all or --tag
        names: Vec<String>,
    },
}

pub async fn handle(
    command: PipelinesCommand,
    globals: &GlobalArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        PipelinesCommand::List => list(globals),
        PipelinesCommand::Run { names } => run(globals, names, cancel).await,
    }
}

fn list(globals: &GlobalArgs) -> Result<()> {
    let session = load_session(globals)?;
    let context = session.current_context()?;

    for pipeline in &context.pipelines {
        let state = if pipeline.enabled {
            "enabled".green()
        } else {
            "disabled".yellow()
        };
        let tags = if pipeline.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", pipeline.tags.join(", "))
        };
        println!(
            "{} ({state}) {} jobs{tags}",
            pipeline.name.bold(),
            pipeline.jobs.len()
        );
    }
    Ok(())
}

async fn run(globals: &GlobalArgs, names: Vec<String>, cancel: &CancellationToken) -> Result<()> {
    let session = load_session(globals)?;
    let ctx = worker_context(&session, cancel).await?;

    let mut selected: Vec<Pipeline> =
        select_pipelines(&ctx.context.pipelines, &names, &globals.tags, globals.all)
            .into_iter()
            .cloned()
            .collect();
    if selected.is_empty() {
        bail!("selection matched no pipelines");
    }
    if globals.build_dependencies {
        expand_with_dependencies(&mut selected, &ctx.context.pipelines);
    }

    let engine = engine(ctx);
    let report = engine.run(&selected, cancel).await?;

    for task in &report.tasks {
        let state = match task.state {
            TaskState::Succeeded => "ok".green().to_string(),
            TaskState::Ignored => "skipped".yellow().to_string(),
            TaskState::Failed => "failed".red().to_string(),
            other => format!("{other:?}").to_lowercase(),
        };
        let error = task
            .error
            .as_ref()
            .map(|(code, message)| format!(" ({code}: {message})"))
            .unwrap_or_default();
        println!(
            "{state} {}/{}/{} x{}{error}",
            task.pipeline, task.job, task.task, task.attempts
        );
    }

    match report.state {
        RunState::Succeeded => {
            println!("{}", "pipeline run succeeded".green().bold());
            Ok(())
        }
        RunState::Aborted => bail!("pipeline run aborted"),
        _ => bail!("pipeline run failed"),
    }
}

/// Pull transitive `dependsOn` pipelines into the selection so the sort
/// has every referenced node.
fn expand_with_dependencies(selected: &mut Vec<Pipeline>, all: &[Pipeline]) {
    let mut index = 0;
    while index < selected.len() {
        let deps = selected[index].depends_on.clone();
        for dep in deps {
            let present = selected.iter().any(|p| p.name.eq_ignore_ascii_case(&dep));
            if !present {
                if let Some(pipeline) = all.iter().find(|p| p.name.eq_ignore_ascii_case(&dep)) {
                    selected.push(pipeline.clone());
                }
            }
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(name: &str, deps: &[&str]) -> Pipeline {
        Pipeline {
            name: name.into(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_expand_pulls_transitive_dependencies() {
        let all = vec![
            pipeline("base", &[]),
            pipeline("mid", &["base"]),
            pipeline("top", &["mid"]),
        ];
        let mut selected = vec![pipeline("top", &["mid"])];

        expand_with_dependencies(&mut selected, &all);
        let names: Vec<&str> = selected.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["top", "mid", "base"]);
    }
}
