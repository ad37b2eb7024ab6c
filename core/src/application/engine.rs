//! Pipeline Engine
//!
//! Validates and executes pipelines. Validation happens before any side
//! effect: dependency order is established for pipelines, then jobs, then
//! tasks, and every task must find a willing worker. Execution then walks
//! the same order, retrying failed tasks against a per-task budget and
//! failing fast on terminal errors.
//!
//! # Architecture
//!
//! The engine owns an ordered worker registry. Several workers may claim
//! the same task type; the first whose `validate` answers *valid* wins,
//! and workers that answer *ignored* are skipped without error. The
//! winning worker is remembered per task so execution dispatches to the
//! worker that validated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::resolver::{self, DependencyError};
use super::workers::{Outcome, Worker, WorkerContext, CODE_CANCELLED};
use crate::domain::pipeline::{Job, Pipeline, Task};

/// Fixed delay between retry attempts of one task.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error("no worker accepts task '{task}' of type '{task_type}'")]
    NoWorker { task: String, task_type: String },

    #[error("task '{task}' failed validation ({code}): {message}")]
    Validation {
        task: String,
        code: String,
        message: String,
    },
}

// ============================================================================
// Run reporting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Retrying,
    Failed,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Validated,
    Executing,
    Succeeded,
    Failed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub pipeline: String,
    pub job: String,
    pub task: String,
    pub state: TaskState,
    pub attempts: u32,
    pub error: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }
}

// ============================================================================
// Validated plan
// ============================================================================

struct PlannedTask {
    pipeline: String,
    job: String,
    task: Task,
    worker: Arc<dyn Worker>,
}

/// Everything sorted and worker-matched; execution consumes this in order.
/// Scope boundaries are kept so fail-fast can skip the rest of a job or
/// pipeline.
pub struct RunPlan {
    tasks: Vec<PlannedTask>,
}

impl RunPlan {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct PipelineEngine {
    workers: Vec<Arc<dyn Worker>>,
    ctx: Arc<WorkerContext>,
    retry_delay: Duration,
}

impl PipelineEngine {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self {
            workers: Vec::new(),
            ctx,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Registration order is dispatch order.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.push(worker);
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Validate everything, then execute. The returned report carries the
    /// terminal state of every task that entered the plan.
    pub async fn run(
        &self,
        pipelines: &[Pipeline],
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let plan = self.validate(pipelines).await?;
        info!(tasks = plan.len(), "Pipeline run validated");
        Ok(self.execute(plan, cancel).await)
    }

    /// Dependency-sort pipelines, jobs and tasks, and match every enabled
    /// task to a worker. Disabled scopes are not validated and contribute
    /// nothing to the plan.
    pub async fn validate(&self, pipelines: &[Pipeline]) -> Result<RunPlan, EngineError> {
        // The pipelines arrive as a selection; a dependency on a pipeline
        // that was not selected is satisfied outside this run. Jobs and
        // tasks are always complete within their parent and sort strictly.
        let sorted_pipelines = resolver::sort_subset(pipelines)?;
        let mut tasks = Vec::new();

        for pipeline in &sorted_pipelines {
            if !pipeline.enabled {
                debug!(pipeline = %pipeline.name, "Pipeline disabled, skipping");
                continue;
            }
            for job in resolver::sort(&pipeline.jobs)? {
                if !job.enabled {
                    debug!(pipeline = %pipeline.name, job = %job.name, "Job disabled, skipping");
                    continue;
                }
                for task in resolver::sort(&job.tasks)? {
                    if !task.enabled {
                        continue;
                    }
                    let worker = self.match_worker(&task).await?;
                    tasks.push(PlannedTask {
                        pipeline: pipeline.name.clone(),
                        job: job.name.clone(),
                        task,
                        worker,
                    });
                }
            }
        }

        Ok(RunPlan { tasks })
    }

    /// First worker whose validate answers *valid* wins; *ignored* means
    /// not my type; *errored* at validate time fails the whole run before
    /// any side effect.
    async fn match_worker(&self, task: &Task) -> Result<Arc<dyn Worker>, EngineError> {
        for worker in &self.workers {
            if !worker.handles(task.task_type) {
                continue;
            }
            match worker.validate(task, &self.ctx).await {
                Outcome::Valid => return Ok(worker.clone()),
                Outcome::Ignored => continue,
                Outcome::Errored { code, message } => {
                    return Err(EngineError::Validation {
                        task: task.name.clone(),
                        code,
                        message,
                    });
                }
                Outcome::Executed => {
                    // A validate call must not execute; treat as accepted.
                    return Ok(worker.clone());
                }
            }
        }
        Err(EngineError::NoWorker {
            task: task.name.clone(),
            task_type: task.task_type.to_string(),
        })
    }

    async fn execute(&self, plan: RunPlan, cancel: &CancellationToken) -> RunReport {
        let mut reports = Vec::with_capacity(plan.tasks.len());
        let mut run_failed = false;
        let mut aborted = false;

        for planned in plan.tasks {
            // Fail-fast: a terminal task failure poisons the rest of the
            // run; cancellation ignores everything still pending.
            if aborted || cancel.is_cancelled() || run_failed {
                if cancel.is_cancelled() {
                    aborted = true;
                }
                reports.push(TaskReport {
                    pipeline: planned.pipeline,
                    job: planned.job,
                    task: planned.task.name,
                    state: TaskState::Ignored,
                    attempts: 0,
                    error: if aborted {
                        Some((CODE_CANCELLED.into(), "cancelled".into()))
                    } else {
                        None
                    },
                });
                continue;
            }

            let report = self.execute_task(&planned, cancel).await;
            match report.state {
                TaskState::Failed => {
                    warn!(
                        pipeline = %report.pipeline,
                        task = %report.task,
                        "Task failed, skipping dependents"
                    );
                    run_failed = true;
                }
                TaskState::Ignored if cancel.is_cancelled() => aborted = true,
                _ => {}
            }
            reports.push(report);
        }

        let state = if aborted {
            RunState::Aborted
        } else if run_failed {
            RunState::Failed
        } else {
            RunState::Succeeded
        };
        RunReport {
            state,
            tasks: reports,
        }
    }

    /// One task through its retry budget. Each attempt calls the worker's
    /// `run` afresh, which re-decodes and re-resolves the inputs so newly
    /// populated vaults are picked up.
    async fn execute_task(&self, planned: &PlannedTask, cancel: &CancellationToken) -> TaskReport {
        let task = &planned.task;
        let budget = task.retries + 1;
        let mut attempts = 0;
        let mut last_error = None;

        info!(
            pipeline = %planned.pipeline,
            job = %planned.job,
            task = %task.name,
            worker = %planned.worker.name(),
            "Running task"
        );

        while attempts < budget {
            attempts += 1;
            match planned.worker.run(task, &self.ctx, cancel).await {
                Outcome::Executed | Outcome::Valid => {
                    return TaskReport {
                        pipeline: planned.pipeline.clone(),
                        job: planned.job.clone(),
                        task: task.name.clone(),
                        state: TaskState::Succeeded,
                        attempts,
                        error: None,
                    };
                }
                Outcome::Ignored => {
                    // Cancellation surfaces as ignored; it never retries.
                    return TaskReport {
                        pipeline: planned.pipeline.clone(),
                        job: planned.job.clone(),
                        task: task.name.clone(),
                        state: TaskState::Ignored,
                        attempts,
                        error: cancel
                            .is_cancelled()
                            .then(|| (CODE_CANCELLED.to_string(), "cancelled".to_string())),
                    };
                }
                Outcome::Errored { code, message } => {
                    warn!(
                        task = %task.name,
                        attempt = attempts,
                        budget,
                        code = %code,
                        "Task attempt failed"
                    );
                    last_error = Some((code, message));
                    if attempts < budget {
                        tokio::select! {
                            _ = tokio::time::sleep(self.retry_delay) => {}
                            _ = cancel.cancelled() => {
                                return TaskReport {
                                    pipeline: planned.pipeline.clone(),
                                    job: planned.job.clone(),
                                    task: task.name.clone(),
                                    state: TaskState::Ignored,
                                    attempts,
                                    error: Some((
                                        CODE_CANCELLED.to_string(),
                                        "cancelled".to_string(),
                                    )),
                                };
                            }
                        }
                    }
                }
            }
        }

        TaskReport {
            pipeline: planned.pipeline.clone(),
            job: planned.job.clone(),
            task: task.name.clone(),
            state: TaskState::Failed,
            attempts,
            error: last_error,
        }
    }
}

/// Select pipelines by tag or take all; an explicit name list overrides
/// both. Selection never reorders, C4 does that later.
pub fn select_pipelines<'a>(
    pipelines: &'a [Pipeline],
    names: &[String],
    tags: &[String],
    all: bool,
) -> Vec<&'a Pipeline> {
    if !names.is_empty() {
        let wanted: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        return pipelines
            .iter()
            .filter(|p| wanted.contains(&p.name.to_lowercase()))
            .collect();
    }
    if all || tags.is_empty() {
        return pipelines.iter().collect();
    }
    let tags: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
    pipelines
        .iter()
        .filter(|p| p.tags.iter().any(|t| tags.contains(&t.to_lowercase())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::workers::test_support::{worker_context, ScriptedRunner};
    use crate::domain::pipeline::TaskType;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted worker: counts runs, fails the first `fail_first` attempts.
    struct StubWorker {
        runs: Mutex<Vec<String>>,
        fail_first: u32,
    }

    impl StubWorker {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                runs: Mutex::new(Vec::new()),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl Worker for StubWorker {
        fn name(&self) -> &str {
            "stub"
        }

        fn handles(&self, task_type: TaskType) -> bool {
            task_type == TaskType::Bash
        }

        async fn validate(&self, _task: &Task, _ctx: &WorkerContext) -> Outcome {
            Outcome::Valid
        }

        async fn run(
            &self,
            task: &Task,
            _ctx: &WorkerContext,
            _cancel: &CancellationToken,
        ) -> Outcome {
            let mut runs = self.runs.lock();
            runs.push(task.name.clone());
            let attempt = runs.iter().filter(|n| *n == &task.name).count() as u32;
            if attempt <= self.fail_first {
                Outcome::errored("external_tool_error", "scripted failure")
            } else {
                Outcome::Executed
            }
        }
    }

    fn task(name: &str, deps: &[&str]) -> Task {
        Task {
            name: name.into(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    fn pipeline(name: &str, tasks: Vec<Task>) -> Pipeline {
        Pipeline {
            name: name.into(),
            jobs: vec![Job {
                name: format!("{name}-job"),
                tasks,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn engine(worker: Arc<StubWorker>) -> PipelineEngine {
        let ctx = Arc::new(worker_context(Arc::new(ScriptedRunner::ok())).await);
        let mut engine =
            PipelineEngine::new(ctx).with_retry_delay(Duration::from_millis(1));
        engine.register(worker);
        engine
    }

    #[tokio::test]
    async fn test_tasks_run_in_dependency_order() {
        let worker = StubWorker::new(0);
        let engine = engine(worker.clone()).await;

        let pipelines = vec![pipeline(
            "p",
            vec![task("last", &["first"]), task("first", &[])],
        )];
        let report = engine.run(&pipelines, &CancellationToken::new()).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(*worker.runs.lock(), vec!["first", "last"]);
    }

    #[tokio::test]
    async fn test_selected_pipeline_with_unselected_dependency_runs() {
        let worker = StubWorker::new(0);
        let engine = engine(worker.clone()).await;

        // "deploy" depends on "bootstrap", which ran in an earlier
        // invocation and is not part of this selection.
        let mut deploy = pipeline("deploy", vec![task("t", &[])]);
        deploy.depends_on = vec!["bootstrap".into()];

        let report = engine.run(&[deploy], &CancellationToken::new()).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(*worker.runs.lock(), vec!["t"]);
    }

    #[tokio::test]
    async fn test_unknown_task_type_fails_validation() {
        let engine = engine(StubWorker::new(0)).await;

        let mut t = task("tf", &[]);
        t.task_type = TaskType::Infrastructure;
        let result = engine.run(&[pipeline("p", vec![t])], &CancellationToken::new()).await;

        assert!(matches!(result, Err(EngineError::NoWorker { .. })));
    }

    #[tokio::test]
    async fn test_retry_budget_recovers_transient_failure() {
        let worker = StubWorker::new(1);
        let engine = engine(worker.clone()).await;

        let mut t = task("flaky", &[]);
        t.retries = 2;
        let report = engine
            .run(&[pipeline("p", vec![t])], &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.tasks[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_fast() {
        let worker = StubWorker::new(10);
        let engine = engine(worker.clone()).await;

        let pipelines = vec![
            pipeline("p1", vec![task("boom", &[]), task("skipped", &["boom"])]),
            pipeline("p2", vec![task("never", &[])]),
        ];
        let report = engine.run(&pipelines, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.tasks[0].state, TaskState::Failed);
        assert_eq!(report.tasks[0].attempts, 1);
        assert_eq!(report.tasks[1].state, TaskState::Ignored);
        assert_eq!(report.tasks[2].state, TaskState::Ignored);
        // boom ran once, nothing after it did.
        assert_eq!(*worker.runs.lock(), vec!["boom"]);
    }

    #[tokio::test]
    async fn test_disabled_scopes_are_skipped_not_failed() {
        let worker = StubWorker::new(0);
        let engine = engine(worker.clone()).await;

        let mut off = pipeline("off", vec![task("hidden", &[])]);
        off.enabled = false;
        let pipelines = vec![off, pipeline("on", vec![task("visible", &[])])];

        let report = engine.run(&pipelines, &CancellationToken::new()).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(*worker.runs.lock(), vec!["visible"]);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_with_pending_ignored() {
        let worker = StubWorker::new(0);
        let engine = engine(worker.clone()).await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine
            .run(&[pipeline("p", vec![task("a", &[]), task("b", &["a"])])], &cancel)
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Aborted);
        assert!(report.tasks.iter().all(|t| t.state == TaskState::Ignored));
        assert!(worker.runs.lock().is_empty());
    }

    #[test]
    fn test_select_pipelines_by_tag_and_all() {
        let mut tagged = pipeline("infra", vec![]);
        tagged.tags = vec!["core".into()];
        let plain = pipeline("web", vec![]);
        let pipelines = vec![tagged, plain];

        let by_tag = select_pipelines(&pipelines, &[], &["CORE".into()], false);
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].name, "infra");

        let all = select_pipelines(&pipelines, &[], &["core".into()], true);
        assert_eq!(all.len(), 2);

        let named = select_pipelines(&pipelines, &["WEB".into()], &[], false);
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].name, "web");
    }
}
