//! SQL Worker
//!
//! Executes a query against a connection string through the `sqlcmd`
//! command-line client. The connection string is parsed into discrete
//! flags; an unparsable string is an input error, not a tool error.

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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlInputs {
    connection_string: String,
    query: String,
}

/// `Server=..;Database=..;User Id=..;Password=..` split into parts.
#[derive(Debug, Default, PartialEq)]
struct ConnectionParts {
    server: String,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

fn parse_connection_string(raw: &str) -> Result<ConnectionParts, String> {
    let mut parts = ConnectionParts::default();
    let pairs: HashMap<String, String> = raw
        .split(';')
        .filter(|p| !p.trim().is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((
                key.trim().to_lowercase().replace(' ', ""),
                value.trim().to_string(),
            ))
        })
        .collect();

    parts.server = pairs
        .get("server")
        .or_else(|| pairs.get("datasource"))
        .cloned()
        .ok_or("connection string has no Server")?;
    parts.database = pairs
        .get("database")
        .or_else(|| pairs.get("initialcatalog"))
        .cloned();
    parts.user = pairs.get("userid").or_else(|| pairs.get("uid")).cloned();
    parts.password = pairs.get("password").or_else(|| pairs.get("pwd")).cloned();
    Ok(parts)
}

pub struct SqlWorker;

#[async_trait]
impl Worker for SqlWorker {
    fn name(&self) -> &str {
        "sql"
    }

    fn handles(&self, task_type: TaskType) -> bool {
        task_type == TaskType::Sql
    }

    async fn validate(&self, task: &Task, _ctx: &WorkerContext) -> Outcome {
        match decode_shape::<SqlInputs>(task) {
            Ok(_) => Outcome::Valid,
            Err(outcome) => outcome,
        }
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext, cancel: &CancellationToken) -> Outcome {
        let inputs: SqlInputs = match decode_inputs(task, &ctx.resolver) {
            Ok(inputs) => inputs,
            Err(outcome) => return outcome,
        };

        let parts = match parse_connection_string(&inputs.connection_string) {
            Ok(parts) => parts,
            Err(e) => return Outcome::errored(CODE_INVALID_PARAMETERS, e),
        };

        let mut spec = CommandSpec::new("sqlcmd")
            .arg("-b")
            .arg("-S")
            .arg(parts.server)
            .arg("-Q")
            .arg(inputs.query);
        if let Some(database) = parts.database {
            spec = spec.arg("-d").arg(database);
        }
        if let Some(user) = parts.user {
            spec = spec.arg("-U").arg(user);
        }
        if let Some(password) = parts.password {
            // Keeps the password out of argv listings.
            spec = spec.env("SQLCMDPASSWORD", password);
        }

        match ctx.runner.run(spec, cancel).await {
            Ok(output) if output.success() => Outcome::Executed,
            Ok(output) => Outcome::errored(
                CODE_EXTERNAL_TOOL,
                format!("query failed: {}", output.stderr.trim()),
            ),
            Err(e) => outcome_from_tool_error(e),
        }
    }
}
