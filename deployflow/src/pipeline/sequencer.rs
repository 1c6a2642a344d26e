//! Stage sequencer: drives one pipeline run from trigger to terminal status.
//!
//! Stages run strictly in order. Inside a stage, actions are grouped by
//! run-order; the actions of one group are spawned concurrently and joined
//! before the next group starts. The first failure halts the run after the
//! current group settles; stages that already succeeded are never rolled back.

use super::{ActionSpec, OutputRegistry, Pipeline, PipelineRun, RunReport, StageDefinition};
use crate::actions::{ActionContext, ActionExecutor};
use crate::artifacts::ArtifactStore;
use crate::cancellation::CancellationToken;
use crate::core::{ActionResult, ActionStatus, PipelineEvent, RunStatus, StageStatus};
use crate::errors::DeployflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::secrets::SecretResolver;
use crate::source::TriggerEvent;
use crate::utils::{generate_uuid, now_utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

type ActionTask = JoinHandle<(String, Result<ActionResult, DeployflowError>, f64)>;

/// How a run-order group (or a whole stage) ended.
#[derive(Debug)]
enum Outcome {
    Completed,
    Failed(DeployflowError),
    Cancelled(String),
}

/// Mutable state of one run, owned by the sequencer task.
struct RunState {
    run: PipelineRun,
    outputs: OutputRegistry,
    secrets: Arc<dyn SecretResolver>,
    token: Arc<CancellationToken>,
}

/// Executes a [`Pipeline`] against trigger events.
///
/// One sequencer can drive any number of runs; each run gets its own
/// output registry, artifact table and cancellation token.
#[derive(Clone)]
pub struct StageSequencer {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn ArtifactStore>,
    executor: ActionExecutor,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSequencer")
            .field("pipeline", &self.pipeline.name())
            .field("stages", &self.pipeline.stage_names())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl StageSequencer {
    /// Creates a sequencer that discards events.
    #[must_use]
    pub fn new(pipeline: Pipeline, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            store,
            executor: ActionExecutor::new(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs the pipeline to completion.
    ///
    /// Secrets are resolved through `secrets` while actions run; nothing is
    /// looked up before the run starts.
    pub async fn run(&self, trigger: TriggerEvent, secrets: Arc<dyn SecretResolver>) -> RunReport {
        self.run_with_token(trigger, secrets, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs the pipeline, stopping early once `token` is cancelled.
    pub async fn run_with_token(
        &self,
        trigger: TriggerEvent,
        secrets: Arc<dyn SecretResolver>,
        token: Arc<CancellationToken>,
    ) -> RunReport {
        self.execute(generate_uuid(), trigger, secrets, token).await
    }

    /// Starts a run in the background and returns a handle to it.
    #[must_use]
    pub fn start(
        self: &Arc<Self>,
        trigger: TriggerEvent,
        secrets: Arc<dyn SecretResolver>,
    ) -> RunHandle {
        let run_id = generate_uuid();
        let token = Arc::new(CancellationToken::new());
        let sequencer = Arc::clone(self);
        let task_token = Arc::clone(&token);
        let task = tokio::spawn(async move {
            sequencer.execute(run_id, trigger, secrets, task_token).await
        });
        RunHandle {
            run_id,
            token,
            task,
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        trigger: TriggerEvent,
        secrets: Arc<dyn SecretResolver>,
        token: Arc<CancellationToken>,
    ) -> RunReport {
        let span = info_span!(
            "pipeline_run",
            run_id = %run_id,
            pipeline = %self.pipeline.name(),
            commit = %trigger.commit,
        );

        async move {
            let mut state = RunState {
                run: PipelineRun::new(run_id, &self.pipeline, trigger),
                outputs: OutputRegistry::new(),
                secrets,
                token,
            };
            info!(stages = self.pipeline.stages().len(), "pipeline run started");
            self.event_sink
                .emit(PipelineEvent::pipeline_started(
                    run_id,
                    self.pipeline.name(),
                    &state.run.trigger.commit,
                ))
                .await;

            for stage in self.pipeline.stages() {
                if state.token.is_cancelled() {
                    let reason = state.token.reason().unwrap_or_default();
                    return self.conclude(state, Outcome::Cancelled(reason)).await;
                }

                match self.run_stage(&mut state, stage).await {
                    Outcome::Completed => {}
                    outcome => return self.conclude(state, outcome).await,
                }
            }

            self.conclude(state, Outcome::Completed).await
        }
        .instrument(span)
        .await
    }

    async fn run_stage(&self, state: &mut RunState, stage: &StageDefinition) -> Outcome {
        let run_id = state.run.run_id;
        state.run.current_stage = Some(stage.name.clone());
        set_stage_status(state, &stage.name, StageStatus::InProgress);
        info!(stage = %stage.name, "stage started");
        self.event_sink
            .emit(PipelineEvent::stage_started(run_id, &stage.name))
            .await;

        let mut outcome = Outcome::Completed;
        for (run_order, group) in stage.run_order_groups() {
            if state.token.is_cancelled() {
                outcome = Outcome::Cancelled(state.token.reason().unwrap_or_default());
                break;
            }
            outcome = self
                .run_group(state, stage, run_order, &group)
                .instrument(info_span!("run_order", stage = %stage.name, run_order))
                .await;
            if !matches!(outcome, Outcome::Completed) {
                break;
            }
        }

        let status = match &outcome {
            Outcome::Completed => StageStatus::Succeeded,
            Outcome::Failed(_) => StageStatus::Failed,
            Outcome::Cancelled(reason) => {
                cancel_unfinished(state, &stage.name, reason);
                StageStatus::Cancelled
            }
        };
        set_stage_status(state, &stage.name, status);
        info!(stage = %stage.name, status = %status, "stage finished");
        self.event_sink
            .emit(PipelineEvent::stage_completed(
                run_id,
                &stage.name,
                &status.to_string(),
            ))
            .await;
        outcome
    }

    async fn run_group(
        &self,
        state: &mut RunState,
        stage: &StageDefinition,
        run_order: u32,
        group: &[&ActionSpec],
    ) -> Outcome {
        let run_id = state.run.run_id;
        let mut contexts = Vec::with_capacity(group.len());
        for spec in group {
            match self.context_for(state, stage, spec) {
                Ok(ctx) => contexts.push(((*spec).clone(), ctx)),
                Err(err) => {
                    let err = self.fail_action(state, &stage.name, &spec.name, err).await;
                    return Outcome::Failed(err);
                }
            }
        }

        let mut tasks: FuturesUnordered<ActionTask> = FuturesUnordered::new();
        let mut aborts: Vec<AbortHandle> = Vec::with_capacity(contexts.len());
        for (spec, ctx) in contexts {
            if let Some(record) = action_record(state, &stage.name, &spec.name) {
                record.status = ActionStatus::Running;
                record.started_at = Some(now_utc());
            }
            debug!(stage = %stage.name, action = %spec.name, run_order, "action started");
            self.event_sink
                .emit(PipelineEvent::action_started(
                    run_id,
                    &stage.name,
                    &spec.name,
                    run_order,
                ))
                .await;

            let executor = self.executor;
            let span = info_span!("action", stage = %stage.name, action = %spec.name, kind = %spec.kind());
            let task = tokio::spawn(
                async move {
                    let started = Instant::now();
                    let result = executor.execute(&spec, &ctx).await;
                    (spec.name, result, started.elapsed().as_secs_f64() * 1000.0)
                }
                .instrument(span),
            );
            aborts.push(task.abort_handle());
            tasks.push(task);
        }

        let mut failure: Option<DeployflowError> = None;
        let mut cancelled: Option<String> = None;
        loop {
            let next = tokio::select! {
                biased;
                () = state.token.cancelled() => None,
                next = tasks.next() => Some(next),
            };

            let joined = match next {
                None => {
                    for abort in &aborts {
                        abort.abort();
                    }
                    // Aborted tasks resolve once their futures are dropped.
                    while tasks.next().await.is_some() {}
                    let reason = state.token.reason().unwrap_or_default();
                    warn!(stage = %stage.name, run_order, reason = %reason, "run cancelled, aborting in-flight actions");
                    return Outcome::Cancelled(reason);
                }
                Some(None) => break,
                Some(Some(joined)) => joined,
            };

            match joined {
                Ok((name, Ok(result), duration_ms)) if result.status == ActionStatus::Cancelled => {
                    let reason = result.message.unwrap_or_default();
                    self.finish_action(state, &stage.name, &name, ActionStatus::Cancelled, duration_ms)
                        .await;
                    cancelled.get_or_insert(reason);
                }
                Ok((name, Ok(result), duration_ms)) => {
                    if let Err(err) = record_result(state, &stage.name, &name, result) {
                        let err = self.fail_action(state, &stage.name, &name, err).await;
                        failure.get_or_insert(err);
                        continue;
                    }
                    self.finish_action(state, &stage.name, &name, ActionStatus::Succeeded, duration_ms)
                        .await;
                }
                Ok((name, Err(err), duration_ms)) if err.is_cancellation() => {
                    if let Some(record) = action_record(state, &stage.name, &name) {
                        record.error = Some(err.to_string());
                    }
                    self.finish_action(state, &stage.name, &name, ActionStatus::Cancelled, duration_ms)
                        .await;
                    if let DeployflowError::Cancelled(reason) = err {
                        cancelled.get_or_insert(reason);
                    }
                }
                Ok((name, Err(err), _)) => {
                    let err = self.fail_action(state, &stage.name, &name, err).await;
                    failure.get_or_insert(err);
                }
                Err(join_error) => {
                    warn!(stage = %stage.name, error = %join_error, "action task did not complete");
                    failure.get_or_insert(DeployflowError::Internal(format!(
                        "action task in stage '{}' did not complete: {join_error}",
                        stage.name
                    )));
                }
            }
        }

        if let Some(err) = failure {
            mark_running(state, &stage.name, ActionStatus::Failed);
            return Outcome::Failed(err);
        }
        if let Some(reason) = cancelled {
            return Outcome::Cancelled(reason);
        }
        Outcome::Completed
    }

    /// Builds the execution context: inputs from the run's artifact table and
    /// environment bindings resolved from outputs produced so far.
    fn context_for(
        &self,
        state: &RunState,
        stage: &StageDefinition,
        spec: &ActionSpec,
    ) -> Result<ActionContext, DeployflowError> {
        let consumer = format!("{}/{}", stage.name, spec.name);
        let env = state.outputs.resolve_bindings(&spec.use_outputs, &consumer)?;
        let inputs: HashMap<_, _> = spec
            .inputs
            .iter()
            .filter_map(|name| {
                state
                    .run
                    .artifacts
                    .get(name)
                    .map(|artifact| (name.clone(), artifact.clone()))
            })
            .collect();

        Ok(ActionContext {
            run_id: state.run.run_id,
            stage: stage.name.clone(),
            action: spec.name.clone(),
            trigger: state.run.trigger.clone(),
            inputs,
            env,
            store: Arc::clone(&self.store),
            secrets: Arc::clone(&state.secrets),
            cancel: Arc::clone(&state.token),
        })
    }

    async fn finish_action(
        &self,
        state: &mut RunState,
        stage: &str,
        action: &str,
        status: ActionStatus,
        duration_ms: f64,
    ) {
        if let Some(record) = action_record(state, stage, action) {
            record.status = status;
            record.finished_at = Some(now_utc());
        }
        debug!(stage = %stage, action = %action, status = %status, duration_ms, "action finished");
        self.event_sink
            .emit(PipelineEvent::action_completed(
                state.run.run_id,
                stage,
                action,
                &status.to_string(),
                duration_ms,
            ))
            .await;
    }

    async fn fail_action(
        &self,
        state: &mut RunState,
        stage: &str,
        action: &str,
        err: DeployflowError,
    ) -> DeployflowError {
        if let Some(record) = action_record(state, stage, action) {
            record.status = ActionStatus::Failed;
            record.finished_at = Some(now_utc());
            record.error = Some(err.to_string());
        }
        warn!(stage = %stage, action = %action, kind = err.kind(), error = %err, "action failed");
        self.event_sink
            .emit(PipelineEvent::action_failed(
                state.run.run_id,
                stage,
                action,
                err.kind(),
                &err.to_string(),
            ))
            .await;
        err
    }

    async fn conclude(&self, mut state: RunState, outcome: Outcome) -> RunReport {
        state.run.outputs = state.outputs.snapshot();
        let run_id = state.run.run_id;

        let (status, error) = match outcome {
            Outcome::Completed => (RunStatus::Succeeded, None),
            Outcome::Failed(err) => (RunStatus::Failed, Some(err)),
            Outcome::Cancelled(reason) => {
                self.event_sink
                    .emit(PipelineEvent::pipeline_cancelled(run_id, &reason))
                    .await;
                (RunStatus::Cancelled, Some(DeployflowError::Cancelled(reason)))
            }
        };
        state.run.finish(status);

        let duration_ms = state.run.duration_ms();
        match &error {
            None => info!(duration_ms, "pipeline run succeeded"),
            Some(err) => warn!(status = %status, error = %err, duration_ms, "pipeline run stopped"),
        }
        self.event_sink
            .emit(PipelineEvent::pipeline_completed(
                run_id,
                &status.to_string(),
                duration_ms,
            ))
            .await;

        RunReport {
            run: state.run,
            error,
        }
    }
}

/// Handle to a run started with [`StageSequencer::start`].
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    token: Arc<CancellationToken>,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Requests cancellation. In-flight actions are aborted and later
    /// stages never start.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::Internal`] if the run task panicked.
    pub async fn wait(self) -> Result<RunReport, DeployflowError> {
        self.task
            .await
            .map_err(|e| DeployflowError::Internal(format!("pipeline run task failed: {e}")))
    }
}

fn action_record<'a>(
    state: &'a mut RunState,
    stage: &str,
    action: &str,
) -> Option<&'a mut super::ActionRecord> {
    state.run.stage_mut(stage).and_then(|s| s.action_mut(action))
}

fn set_stage_status(state: &mut RunState, stage: &str, status: StageStatus) {
    if let Some(record) = state.run.stage_mut(stage) {
        record.status = status;
    }
}

fn mark_running(state: &mut RunState, stage: &str, status: ActionStatus) {
    if let Some(record) = state.run.stage_mut(stage) {
        for action in record.actions.iter_mut().filter(|a| a.status == ActionStatus::Running) {
            action.status = status;
            action.finished_at = Some(now_utc());
        }
    }
}

/// Marks every action of the stage that has not finished as cancelled.
fn cancel_unfinished(state: &mut RunState, stage: &str, reason: &str) {
    if let Some(record) = state.run.stage_mut(stage) {
        for action in record.actions.iter_mut().filter(|a| !a.status.is_terminal()) {
            action.status = ActionStatus::Cancelled;
            action.finished_at = Some(now_utc());
            action.error.get_or_insert_with(|| format!("cancelled: {reason}"));
        }
    }
}

/// Publishes a successful result into the run's output registry and artifact table.
fn record_result(
    state: &mut RunState,
    stage: &str,
    action: &str,
    result: ActionResult,
) -> Result<(), DeployflowError> {
    for (key, value) in &result.outputs {
        state.outputs.record(stage, key, value.clone())?;
    }
    for artifact in result.artifacts {
        state.run.record_artifact(artifact)?;
    }
    if let Some(record) = action_record(state, stage, action) {
        record.outputs = result.outputs;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::secrets::StaticSecretResolver;
    use crate::testing::{BlockingAction, FailingAction, RecordingAction};
    use pretty_assertions::assert_eq;

    fn trigger() -> TriggerEvent {
        TriggerEvent::new("acme/webservice", "master", "abc123")
    }

    fn secrets() -> Arc<dyn SecretResolver> {
        Arc::new(StaticSecretResolver::new())
    }

    fn sequencer(builder: PipelineBuilder) -> StageSequencer {
        StageSequencer::new(builder.build().unwrap(), Arc::new(InMemoryArtifactStore::new()))
    }

    #[tokio::test]
    async fn test_successful_run() {
        let mut builder = PipelineBuilder::new("webservice");
        let test = builder.add_stage("Test");
        builder.add_action(
            test,
            ActionSpec::new("Deploy", Arc::new(RecordingAction::new("Deploy").with_output("URL", "u")))
                .with_output_key("URL"),
        );
        let sink = Arc::new(CollectingEventSink::new());
        let report = sequencer(builder).with_event_sink(sink.clone()).run(trigger(), secrets()).await;

        assert!(report.is_success());
        assert!(report.error().is_none());
        assert_eq!(report.run.output("Test.URL"), Some("u"));
        assert_eq!(report.run.stage_status("Test"), StageStatus::Succeeded);
        assert!(report.run.finished_at.is_some());
        assert_eq!(
            sink.event_types(),
            vec![
                "pipeline.started",
                "stage.started",
                "action.started",
                "action.completed",
                "stage.completed",
                "pipeline.completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_halts_later_stages() {
        let mut builder = PipelineBuilder::new("webservice");
        let test = builder.add_stage("Test");
        builder.add_action(test, ActionSpec::new("Broken", Arc::new(FailingAction::new("boom"))));
        let prod = builder.add_stage("Prod");
        let later = Arc::new(RecordingAction::new("Deploy"));
        builder.add_action(prod, ActionSpec::new("Deploy", later.clone()));

        let report = sequencer(builder).run(trigger(), secrets()).await;

        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.error().map(DeployflowError::kind), Some("ActionFailed"));
        assert_eq!(report.run.stage_status("Test"), StageStatus::Failed);
        assert_eq!(report.run.stage_status("Prod"), StageStatus::NotStarted);
        assert_eq!(report.run.current_stage.as_deref(), Some("Test"));
        assert_eq!(later.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_group_lets_siblings_finish() {
        let mut builder = PipelineBuilder::new("webservice");
        let test = builder.add_stage("Test");
        let sibling = Arc::new(RecordingAction::new("Sibling"));
        let next = Arc::new(RecordingAction::new("Next"));
        builder
            .add_action(test, ActionSpec::new("Broken", Arc::new(FailingAction::new("boom"))))
            .add_action(test, ActionSpec::new("Sibling", sibling.clone()))
            .add_action(test, ActionSpec::new("Next", next.clone()).with_run_order(2));

        let report = sequencer(builder).run(trigger(), secrets()).await;

        assert_eq!(sibling.call_count(), 1);
        assert_eq!(next.call_count(), 0);
        assert_eq!(
            report.run.action("Test", "Sibling").unwrap().status,
            ActionStatus::Succeeded
        );
        assert_eq!(
            report.run.action("Test", "Next").unwrap().status,
            ActionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let mut builder = PipelineBuilder::new("webservice");
        let test = builder.add_stage("Test");
        let action = Arc::new(RecordingAction::new("a"));
        builder.add_action(test, ActionSpec::new("a", action.clone()));
        let token = Arc::new(CancellationToken::new());
        token.cancel("operator");

        let report = sequencer(builder)
            .run_with_token(trigger(), secrets(), token)
            .await;

        assert_eq!(report.status(), RunStatus::Cancelled);
        assert_eq!(report.run.stage_status("Test"), StageStatus::NotStarted);
        assert_eq!(action.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_action() {
        let mut builder = PipelineBuilder::new("webservice");
        let test = builder.add_stage("Test");
        let blocking = Arc::new(BlockingAction::new());
        builder.add_action(test, ActionSpec::new("Wait", blocking.clone()));
        let sink = Arc::new(CollectingEventSink::new());
        let sequencer = Arc::new(sequencer(builder).with_event_sink(sink.clone()));

        let handle = sequencer.start(trigger(), secrets());
        blocking.wait_started().await;
        handle.cancel("operator");
        let report = handle.wait().await.unwrap();

        assert_eq!(report.status(), RunStatus::Cancelled);
        assert_eq!(report.run.stage_status("Test"), StageStatus::Cancelled);
        assert_eq!(
            report.run.action("Test", "Wait").unwrap().status,
            ActionStatus::Cancelled
        );
        assert!(report.error().is_some_and(DeployflowError::is_cancellation));
        assert_eq!(sink.events_of_type("pipeline.cancelled").len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_binding_fails_action() {
        // Bypasses build-time validation to exercise the run-time check.
        let stage = StageDefinition {
            name: "Test".to_string(),
            actions: vec![ActionSpec::new("Smoke", Arc::new(RecordingAction::new("Smoke")))
                .use_output("URL", crate::pipeline::OutputRef::new("Prod", "URL"))],
        };
        let pipeline = Pipeline::new("webservice".to_string(), vec![stage]);
        let sequencer = StageSequencer::new(pipeline, Arc::new(InMemoryArtifactStore::new()));

        let report = sequencer.run(trigger(), secrets()).await;
        assert_eq!(report.error().map(DeployflowError::kind), Some("ForwardReference"));
        assert_eq!(
            report.run.action("Test", "Smoke").unwrap().status,
            ActionStatus::Failed
        );
    }
}
