//! Mock actions for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::actions::{Action, ActionContext};
use crate::core::{ActionKind, ActionResult};
use crate::errors::DeployflowError;

/// A shared, ordered log of action starts and ends.
///
/// Also tracks how many logged actions were executing at the same time.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    entries: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entries, `"{stage}/{action}:start"` and `"…:end"`.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the position of an entry, if present.
    #[must_use]
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    /// Returns the highest number of simultaneously executing actions.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn start(&self, name: &str) {
        self.entries.lock().push(format!("{name}:start"));
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
    }

    fn end(&self, name: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.entries.lock().push(format!("{name}:end"));
    }
}

/// An action that succeeds with fixed outputs and records every call.
#[derive(Debug)]
pub struct RecordingAction {
    name: String,
    kind: ActionKind,
    outputs: BTreeMap<String, String>,
    delay: Option<Duration>,
    log: Option<Arc<ExecutionLog>>,
    envs: Mutex<Vec<BTreeMap<String, String>>>,
}

impl RecordingAction {
    /// Creates a shell-script-kind recording action.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::ShellScript,
            outputs: BTreeMap::new(),
            delay: None,
            log: None,
            envs: Mutex::new(Vec::new()),
        }
    }

    /// Adds an output the action produces.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    /// Sets the reported kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ActionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Makes every execution take `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Records starts and ends into a shared log.
    #[must_use]
    pub fn with_log(mut self, log: Arc<ExecutionLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Returns the configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.envs.lock().len()
    }

    /// Returns the environment seen by each execution.
    #[must_use]
    pub fn envs(&self) -> Vec<BTreeMap<String, String>> {
        self.envs.lock().clone()
    }
}

#[async_trait]
impl Action for RecordingAction {
    fn kind(&self) -> ActionKind {
        self.kind
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult, DeployflowError> {
        let name = ctx.qualified_name();
        self.envs.lock().push(ctx.env.clone());
        if let Some(log) = &self.log {
            log.start(&name);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(log) = &self.log {
            log.end(&name);
        }
        Ok(ActionResult::succeeded().with_outputs(self.outputs.clone()))
    }
}

/// An action that always fails.
#[derive(Debug)]
pub struct FailingAction {
    reason: String,
    calls: AtomicUsize,
}

impl FailingAction {
    /// Creates an action failing with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for FailingAction {
    fn kind(&self) -> ActionKind {
        ActionKind::ShellScript
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult, DeployflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ctx.failure(self.reason.clone()))
    }
}

/// An action that never finishes on its own.
///
/// Used to hold a run inside a stage until it is cancelled.
#[derive(Debug, Default)]
pub struct BlockingAction {
    started: AtomicBool,
    notify: Notify,
}

impl BlockingAction {
    /// Creates a blocking action.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once execution has begun.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Completes once execution has begun.
    pub async fn wait_started(&self) {
        loop {
            let notified = self.notify.notified();
            if self.has_started() {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Action for BlockingAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Deploy
    }

    async fn execute(&self, _ctx: &ActionContext) -> Result<ActionResult, DeployflowError> {
        self.started.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        std::future::pending::<()>().await;
        Ok(ActionResult::succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::cancellation::CancellationToken;
    use crate::secrets::StaticSecretResolver;
    use crate::source::TriggerEvent;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn context(action: &str) -> ActionContext {
        ActionContext {
            run_id: Uuid::new_v4(),
            stage: "Test".to_string(),
            action: action.to_string(),
            trigger: TriggerEvent::new("acme/webservice", "master", "abc123"),
            inputs: HashMap::new(),
            env: BTreeMap::new(),
            store: Arc::new(InMemoryArtifactStore::new()),
            secrets: Arc::new(StaticSecretResolver::new()),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    #[tokio::test]
    async fn test_recording_action_logs() {
        let log = Arc::new(ExecutionLog::new());
        let action = RecordingAction::new("a")
            .with_output("K", "v")
            .with_log(log.clone());

        let result = action.execute(&context("a")).await.unwrap();

        assert_eq!(result.outputs.get("K").map(String::as_str), Some("v"));
        assert_eq!(action.call_count(), 1);
        assert_eq!(log.entries(), vec!["Test/a:start", "Test/a:end"]);
        assert_eq!(log.max_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_failing_action() {
        let action = FailingAction::new("boom");
        let err = action.execute(&context("f")).await.unwrap_err();
        assert_eq!(err.kind(), "ActionFailed");
        assert_eq!(action.call_count(), 1);
    }

    #[tokio::test]
    async fn test_blocking_action_signals_start() {
        let action = Arc::new(BlockingAction::new());
        let task = {
            let action = action.clone();
            tokio::spawn(async move { action.execute(&context("b")).await })
        };

        action.wait_started().await;
        assert!(action.has_started());
        task.abort();
    }
}
