//! The workflow run state machine.
//!
//! One coordinator task per run owns every job-status transition and
//! applies completion reports one at a time, cascade included, so
//! dependents never race into inconsistent readiness. Independent ready
//! jobs execute as separate tasks with no serialization between them.

use crate::dag::{DagBuilder, JobDag};
use crate::triggers::TriggerEvaluator;
use gantry_core::event::Event;
use gantry_core::ids::RunId;
use gantry_core::job::WorkflowDefinition;
use gantry_core::ports::{ContextStore, ExecutionOutcome, ExecutionRequest, JobExecutor};
use gantry_core::run::{
    FailureCause, JobRecord, JobStatus, RunReport, RunStatus, SkipReason,
};
use gantry_core::{Error, Result};
use gantry_secrets::ScopeResolver;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Message from a job task (or the engine) to a run's coordinator.
enum CoordinatorMessage {
    JobFinished { name: String, outcome: JobOutcome },
    Cancel,
}

/// How a dispatched job ended.
enum JobOutcome {
    Executed(ExecutionOutcome),
    /// An unknown context aborted the job before the command ran.
    UnknownContext { context: String },
    /// Executor-level fault (spawn failure and kin). Job-local.
    ExecutorFault(Error),
}

/// Handle kept per run. The report channel stays readable after the
/// coordinator exits, which is how archived runs remain queryable.
struct RunHandle {
    control: mpsc::Sender<CoordinatorMessage>,
    report: watch::Receiver<RunReport>,
}

/// The workflow engine: accepts events, owns run lifecycles, and answers
/// status queries.
pub struct WorkflowEngine {
    contexts: Arc<dyn ContextStore>,
    executor: Arc<dyn JobExecutor>,
    evaluator: TriggerEvaluator,
    dag_builder: DagBuilder,
    runs: Arc<RwLock<HashMap<RunId, RunHandle>>>,
}

impl WorkflowEngine {
    pub fn new(contexts: Arc<dyn ContextStore>, executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            contexts,
            executor,
            evaluator: TriggerEvaluator::new(),
            dag_builder: DagBuilder::new(),
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a run for one event.
    ///
    /// DAG validation happens up front: a cyclic, duplicate, or dangling
    /// "requires" configuration aborts here and no job executes. Jobs
    /// whose filter does not match the event are skipped immediately; the
    /// rest are dispatched as their requirements succeed.
    pub async fn start(&self, workflow: WorkflowDefinition, event: Event) -> Result<RunId> {
        let dag = self.dag_builder.build(&workflow)?;
        let run_id = RunId::new();

        let mut records: HashMap<String, JobRecord> = HashMap::new();
        for node in dag.jobs() {
            let mut record = JobRecord::pending(&node.name);
            if !self.evaluator.is_eligible(&node.definition, &event) {
                record.status = JobStatus::Skipped;
                record.skip_reason = Some(SkipReason::FilterMismatch);
                debug!(run = %run_id, job = %node.name, "Skipped: filter mismatch");
            }
            records.insert(node.name.clone(), record);
        }

        info!(
            run = %run_id,
            workflow = %workflow.name,
            ref_name = %event.ref_name,
            jobs = dag.len(),
            "Starting workflow run"
        );

        let report = RunReport {
            run_id,
            workflow: workflow.name.clone(),
            event: event.clone(),
            status: RunStatus::Running,
            jobs: order_records(&dag, &records),
            created_at: chrono::Utc::now(),
            completed_at: None,
        };

        let (report_tx, report_rx) = watch::channel(report);
        let (control_tx, control_rx) = mpsc::channel(dag.len() + 16);

        {
            let mut runs = self.runs.write().await;
            runs.insert(
                run_id,
                RunHandle {
                    control: control_tx.clone(),
                    report: report_rx,
                },
            );
        }

        let coordinator = Coordinator {
            run_id,
            dag,
            records,
            running: HashMap::new(),
            resolver: ScopeResolver::new(self.contexts.clone()),
            executor: self.executor.clone(),
            completions: control_tx,
            report: report_tx,
        };
        tokio::spawn(coordinator.run(control_rx));

        Ok(run_id)
    }

    /// Current snapshot of a run, live or archived.
    pub async fn report(&self, run_id: RunId) -> Result<RunReport> {
        let runs = self.runs.read().await;
        let handle = runs
            .get(&run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        Ok(handle.report.borrow().clone())
    }

    /// Wait until the run reaches a terminal state and return its report.
    /// Event-driven; no polling.
    pub async fn wait(&self, run_id: RunId) -> Result<RunReport> {
        let mut rx = {
            let runs = self.runs.read().await;
            runs.get(&run_id)
                .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?
                .report
                .clone()
        };

        let report = rx
            .wait_for(|report| report.status.is_terminal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(report.clone())
    }

    /// Cancel a run: running jobs are terminated, jobs not yet started
    /// are skipped, and the run finalizes as cancelled. Cancelling a run
    /// that already finished is a no-op.
    pub async fn cancel(&self, run_id: RunId) -> Result<()> {
        let runs = self.runs.read().await;
        let handle = runs
            .get(&run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;

        // A closed channel means the coordinator already finalized.
        let _ = handle.control.send(CoordinatorMessage::Cancel).await;
        Ok(())
    }
}

/// Per-run single-writer over job status. Lives on its own task until the
/// run is terminal.
struct Coordinator {
    run_id: RunId,
    dag: JobDag,
    records: HashMap<String, JobRecord>,
    running: HashMap<String, JoinHandle<()>>,
    resolver: ScopeResolver,
    executor: Arc<dyn JobExecutor>,
    completions: mpsc::Sender<CoordinatorMessage>,
    report: watch::Sender<RunReport>,
}

impl Coordinator {
    async fn run(mut self, mut inbox: mpsc::Receiver<CoordinatorMessage>) {
        self.dispatch_ready().await;
        self.publish();

        if self.all_terminal() {
            self.finalize(None);
            return;
        }

        while let Some(message) = inbox.recv().await {
            match message {
                CoordinatorMessage::JobFinished { name, outcome } => {
                    self.apply_completion(&name, outcome);
                    self.dispatch_ready().await;
                    self.publish();

                    if self.all_terminal() {
                        self.finalize(None);
                        return;
                    }
                }
                CoordinatorMessage::Cancel => {
                    self.apply_cancel();
                    self.publish();
                    self.finalize(Some(RunStatus::Cancelled));
                    return;
                }
            }
        }
    }

    /// Move every unblocked pending job to ready and spawn its task.
    /// Jobs whose requirements can no longer all succeed are skipped.
    async fn dispatch_ready(&mut self) {
        loop {
            let mut to_skip = Vec::new();
            let mut to_run = Vec::new();

            for node in self.dag.jobs() {
                if self.records[&node.name].status != JobStatus::Pending {
                    continue;
                }

                let mut blocked = false;
                let mut doomed = false;
                for pred in self.dag.predecessors(&node.name) {
                    match self.records[&pred.name].status {
                        JobStatus::Succeeded => {}
                        JobStatus::Failed | JobStatus::Skipped => doomed = true,
                        _ => blocked = true,
                    }
                }

                if doomed {
                    to_skip.push(node.name.clone());
                } else if !blocked {
                    to_run.push(node.name.clone());
                }
            }

            // Skipping a job can doom jobs downstream of it, so iterate
            // to a fixpoint.
            if to_skip.is_empty() && to_run.is_empty() {
                break;
            }

            for name in to_skip {
                self.skip(&name, SkipReason::UpstreamFailure);
            }
            for name in to_run {
                if let Some(record) = self.records.get_mut(&name) {
                    record.status = JobStatus::Ready;
                }
                self.spawn_job(&name).await;
            }
        }
    }

    async fn spawn_job(&mut self, name: &str) {
        let node = match self.dag.get(name) {
            Some(node) => node.clone(),
            None => return,
        };

        // Resolve the credential scope at dispatch time. An unknown
        // context fails this job before execution; siblings are
        // untouched.
        let scope = match self.resolver.resolve(&node.definition.contexts).await {
            Ok(scope) => scope,
            Err(err) => {
                warn!(run = %self.run_id, job = %name, error = %err, "Context resolution failed");
                let outcome = match err {
                    Error::UnknownContext(context) => JobOutcome::UnknownContext { context },
                    other => JobOutcome::ExecutorFault(other),
                };
                let _ = self
                    .completions
                    .send(CoordinatorMessage::JobFinished {
                        name: name.to_string(),
                        outcome,
                    })
                    .await;
                return;
            }
        };

        self.mark_running(name);
        info!(run = %self.run_id, job = %name, "Dispatching job");

        let executor = self.executor.clone();
        let completions = self.completions.clone();
        let job_name = name.to_string();
        let handle = tokio::spawn(async move {
            let request = ExecutionRequest {
                job: node.definition,
                env: scope,
            };
            let outcome = match executor.execute(request).await {
                Ok(outcome) => JobOutcome::Executed(outcome),
                Err(err) => JobOutcome::ExecutorFault(err),
            };
            let _ = completions
                .send(CoordinatorMessage::JobFinished {
                    name: job_name,
                    outcome,
                })
                .await;
        });
        self.running.insert(name.to_string(), handle);
    }

    fn mark_running(&mut self, name: &str) {
        if let Some(record) = self.records.get_mut(name) {
            record.status = JobStatus::Running;
            record.started_at = Some(chrono::Utc::now());
        }
    }

    /// Apply one completion report in full, cascade included, before the
    /// next is taken off the inbox.
    fn apply_completion(&mut self, name: &str, outcome: JobOutcome) {
        self.running.remove(name);

        let record = match self.records.get_mut(name) {
            Some(record) => record,
            None => return,
        };
        // Terminal statuses are never overwritten.
        if record.status.is_terminal() {
            return;
        }

        record.completed_at = Some(chrono::Utc::now());
        match outcome {
            JobOutcome::Executed(result) => {
                record.exit_code = Some(result.exit_code);
                record.output = result.output;
                record.output_truncated = result.truncated;
                if let Some(cause) = result.cause {
                    record.status = JobStatus::Failed;
                    record.cause = Some(cause);
                } else {
                    record.status = JobStatus::Succeeded;
                }
            }
            JobOutcome::UnknownContext { context } => {
                record.status = JobStatus::Failed;
                record.cause = Some(FailureCause::UnknownContext { context });
            }
            JobOutcome::ExecutorFault(err) => {
                warn!(run = %self.run_id, job = %name, error = %err, "Executor fault");
                record.status = JobStatus::Failed;
                record.exit_code = Some(-1);
                record.cause = Some(FailureCause::ExecutionFailure { exit_code: -1 });
            }
        }

        let status = record.status;
        info!(run = %self.run_id, job = %name, ?status, "Job finished");

        if status == JobStatus::Failed {
            let dependents: Vec<String> = self
                .dag
                .transitive_dependents(name)
                .iter()
                .map(|n| n.name.clone())
                .collect();
            for dependent in dependents {
                self.skip(&dependent, SkipReason::UpstreamFailure);
            }
        }
    }

    fn apply_cancel(&mut self) {
        info!(run = %self.run_id, "Cancelling run");

        // Aborting a job task drops the executor future; child processes
        // are spawned kill_on_drop, so this reaps them.
        for (name, handle) in self.running.drain() {
            handle.abort();
            if let Some(record) = self.records.get_mut(&name)
                && !record.status.is_terminal()
            {
                record.status = JobStatus::Failed;
                record.cause = Some(FailureCause::Cancelled);
                record.completed_at = Some(chrono::Utc::now());
            }
        }

        for record in self.records.values_mut() {
            if !record.status.is_terminal() {
                record.status = JobStatus::Skipped;
                record.skip_reason = Some(SkipReason::Cancelled);
            }
        }
    }

    fn skip(&mut self, name: &str, reason: SkipReason) {
        if let Some(record) = self.records.get_mut(name)
            && !record.status.is_terminal()
        {
            record.status = JobStatus::Skipped;
            record.skip_reason = Some(reason);
            debug!(run = %self.run_id, job = %name, ?reason, "Skipped");
        }
    }

    fn all_terminal(&self) -> bool {
        self.records.values().all(|r| r.status.is_terminal())
    }

    /// Publish the current snapshot to status queries.
    fn publish(&self) {
        self.report.send_modify(|report| {
            report.jobs = order_records(&self.dag, &self.records);
        });
    }

    fn finalize(&mut self, status: Option<RunStatus>) {
        let status = status.unwrap_or_else(|| {
            if self
                .records
                .values()
                .any(|r| r.status == JobStatus::Failed)
            {
                RunStatus::Failed
            } else {
                // All-skipped counts as success: no eligible work for
                // this event is a valid outcome.
                RunStatus::Succeeded
            }
        });

        info!(run = %self.run_id, ?status, "Run finished");
        self.report.send_modify(|report| {
            report.status = status;
            report.jobs = order_records(&self.dag, &self.records);
            report.completed_at = Some(chrono::Utc::now());
        });
    }
}

/// Records in definition order, for stable report output.
fn order_records(dag: &JobDag, records: &HashMap<String, JobRecord>) -> Vec<JobRecord> {
    dag.jobs()
        .iter()
        .filter_map(|node| records.get(&node.name).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gantry_core::job::{CommandSpec, FilterRule, JobDefinition};
    use gantry_core::run::OutputLine;
    use gantry_secrets::InMemoryContextStore;
    use std::sync::Mutex;

    /// Executor stub: jobs named `fail-*` exit 1, everything else exits 0.
    /// Records dispatch order.
    struct StubExecutor {
        dispatched: Mutex<Vec<String>>,
    }

    impl StubExecutor {
        fn new() -> Self {
            Self {
                dispatched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobExecutor for StubExecutor {
        async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
            self.dispatched
                .lock()
                .unwrap()
                .push(request.job.name.clone());

            let fails = request.job.name.starts_with("fail-");
            Ok(ExecutionOutcome {
                exit_code: if fails { 1 } else { 0 },
                output: Vec::<OutputLine>::new(),
                truncated: false,
                duration_ms: 1,
                cause: fails.then_some(FailureCause::ExecutionFailure { exit_code: 1 }),
            })
        }
    }

    fn engine() -> (WorkflowEngine, Arc<StubExecutor>) {
        let executor = Arc::new(StubExecutor::new());
        let engine = WorkflowEngine::new(
            Arc::new(InMemoryContextStore::new()),
            executor.clone(),
        );
        (engine, executor)
    }

    fn job(name: &str, requires: Vec<&str>) -> JobDefinition {
        JobDefinition::new(name, CommandSpec::new("true")).with_requires(requires)
    }

    #[tokio::test]
    async fn test_linear_run_succeeds() {
        let (engine, executor) = engine();
        let workflow = WorkflowDefinition::new("wf")
            .job(job("a", vec![]))
            .job(job("b", vec!["a"]));

        let run_id = engine.start(workflow, Event::branch("main")).await.unwrap();
        let report = engine.wait(run_id).await.unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.job("a").unwrap().status, JobStatus::Succeeded);
        assert_eq!(report.job("b").unwrap().status, JobStatus::Succeeded);
        assert_eq!(
            *executor.dispatched.lock().unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cyclic_workflow_never_starts() {
        let (engine, executor) = engine();
        let workflow = WorkflowDefinition::new("wf")
            .job(job("a", vec!["b"]))
            .job(job("b", vec!["a"]));

        let err = engine
            .start(workflow, Event::branch("main"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CyclicDependency));
        assert!(executor.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_cascades_to_transitive_dependents() {
        let (engine, executor) = engine();
        let workflow = WorkflowDefinition::new("wf")
            .job(job("fail-build", vec![]))
            .job(job("publish", vec!["fail-build"]))
            .job(job("deploy", vec!["publish"]));

        let run_id = engine.start(workflow, Event::branch("main")).await.unwrap();
        let report = engine.wait(run_id).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.job("fail-build").unwrap().status, JobStatus::Failed);
        assert_eq!(
            report.job("fail-build").unwrap().cause,
            Some(FailureCause::ExecutionFailure { exit_code: 1 })
        );
        for name in ["publish", "deploy"] {
            let record = report.job(name).unwrap();
            assert_eq!(record.status, JobStatus::Skipped);
            assert_eq!(record.skip_reason, Some(SkipReason::UpstreamFailure));
        }
        assert_eq!(*executor.dispatched.lock().unwrap(), vec!["fail-build"]);
    }

    #[tokio::test]
    async fn test_all_skipped_run_succeeds_with_zero_executed_jobs() {
        let (engine, executor) = engine();
        let mut release = job("release", vec![]);
        release.filter = Some(FilterRule::release_only());
        let workflow = WorkflowDefinition::new("wf").job(release);

        let run_id = engine
            .start(workflow, Event::branch("feature/x"))
            .await
            .unwrap();
        let report = engine.wait(run_id).await.unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        let record = report.job("release").unwrap();
        assert_eq!(record.status, JobStatus::Skipped);
        assert_eq!(record.skip_reason, Some(SkipReason::FilterMismatch));
        assert!(executor.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dependent_of_filter_skipped_job_is_skipped_upstream() {
        let (engine, _) = engine();
        let mut gated = job("gated", vec![]);
        gated.filter = Some(FilterRule::release_only());
        let workflow = WorkflowDefinition::new("wf")
            .job(gated)
            .job(job("after", vec!["gated"]));

        let run_id = engine.start(workflow, Event::branch("main")).await.unwrap();
        let report = engine.wait(run_id).await.unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(
            report.job("gated").unwrap().skip_reason,
            Some(SkipReason::FilterMismatch)
        );
        assert_eq!(
            report.job("after").unwrap().skip_reason,
            Some(SkipReason::UpstreamFailure)
        );
    }

    #[tokio::test]
    async fn test_unknown_context_fails_job_not_siblings() {
        let executor = Arc::new(StubExecutor::new());
        let store = Arc::new(InMemoryContextStore::new());
        let engine = WorkflowEngine::new(store, executor.clone());

        let broken = job("broken", vec![]).with_contexts(["missing-context"]);
        let workflow = WorkflowDefinition::new("wf")
            .job(broken)
            .job(job("healthy", vec![]));

        let run_id = engine.start(workflow, Event::branch("main")).await.unwrap();
        let report = engine.wait(run_id).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        let broken = report.job("broken").unwrap();
        assert_eq!(broken.status, JobStatus::Failed);
        assert_eq!(
            broken.cause,
            Some(FailureCause::UnknownContext {
                context: "missing-context".to_string()
            })
        );
        assert_eq!(report.job("healthy").unwrap().status, JobStatus::Succeeded);
        // The broken job never reached the executor.
        assert_eq!(*executor.dispatched.lock().unwrap(), vec!["healthy"]);
    }

    #[tokio::test]
    async fn test_report_queryable_after_completion() {
        let (engine, _) = engine();
        let workflow = WorkflowDefinition::new("wf").job(job("only", vec![]));

        let run_id = engine.start(workflow, Event::branch("main")).await.unwrap();
        engine.wait(run_id).await.unwrap();

        // Archived and still readable.
        let report = engine.report(run_id).await.unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);
        assert!(report.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_run_id() {
        let (engine, _) = engine();
        let err = engine.report(RunId::new()).await.unwrap_err();
        assert!(matches!(err, Error::RunNotFound(_)));
    }
}
