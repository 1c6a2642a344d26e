//! Manual approval: a human-in-the-loop gate inside a stage.

use super::{Action, ActionContext};
use crate::core::{ActionKind, ActionResult};
use crate::errors::DeployflowError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

/// A pending approval as seen by operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequestInfo {
    /// Request ID.
    pub id: Uuid,
    /// The run waiting on the decision.
    pub run_id: Uuid,
    /// The gated action, `stage/action`.
    pub action: String,
    /// Message shown to the approver.
    pub message: String,
}

#[derive(Debug)]
struct PendingApproval {
    info: ApprovalRequestInfo,
    created_at: Instant,
    response_tx: Option<oneshot::Sender<bool>>,
}

/// Service for managing approval requests.
#[derive(Debug, Default)]
pub struct ApprovalService {
    requests: RwLock<HashMap<Uuid, PendingApproval>>,
}

impl ApprovalService {
    /// Creates a new approval service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request; the receiver resolves with the decision.
    pub fn request(
        &self,
        run_id: Uuid,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> (Uuid, oneshot::Receiver<bool>) {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let pending = PendingApproval {
            info: ApprovalRequestInfo {
                id,
                run_id,
                action: action.into(),
                message: message.into(),
            },
            created_at: Instant::now(),
            response_tx: Some(tx),
        };
        self.requests.write().insert(id, pending);
        (id, rx)
    }

    /// Approves a pending request.
    pub fn approve(&self, request_id: Uuid) -> bool {
        self.decide(request_id, true)
    }

    /// Denies a pending request.
    pub fn deny(&self, request_id: Uuid) -> bool {
        self.decide(request_id, false)
    }

    /// Withdraws a pending request without a decision.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        self.requests.write().remove(&request_id).is_some()
    }

    /// Returns all pending requests, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<ApprovalRequestInfo> {
        let requests = self.requests.read();
        let mut pending: Vec<_> = requests.values().collect();
        pending.sort_by_key(|p| p.created_at);
        pending.into_iter().map(|p| p.info.clone()).collect()
    }

    /// Returns the pending request for an action (`stage/action`), if any.
    #[must_use]
    pub fn pending_for(&self, action: &str) -> Option<Uuid> {
        self.requests
            .read()
            .values()
            .find(|p| p.info.action == action)
            .map(|p| p.info.id)
    }

    fn decide(&self, request_id: Uuid, approved: bool) -> bool {
        if let Some(mut request) = self.requests.write().remove(&request_id) {
            if let Some(tx) = request.response_tx.take() {
                return tx.send(approved).is_ok();
            }
        }
        false
    }
}

/// Withdraws a request when the waiting action goes away, including when its
/// task is aborted. Withdrawing a decided request is a no-op.
struct PendingRequest<'a> {
    service: &'a ApprovalService,
    id: Uuid,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.service.cancel(self.id) {
            debug!(request_id = %self.id, "approval request withdrawn");
        }
    }
}

/// Blocks the stage until an operator approves through the [`ApprovalService`].
#[derive(Debug, Clone)]
pub struct ManualApprovalAction {
    service: Arc<ApprovalService>,
    message: String,
    timeout: Option<Duration>,
}

impl ManualApprovalAction {
    /// Creates an approval gate with no timeout.
    #[must_use]
    pub fn new(service: Arc<ApprovalService>, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
            timeout: None,
        }
    }

    /// Fails the action if no decision arrives within `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Action for ManualApprovalAction {
    fn kind(&self) -> ActionKind {
        ActionKind::ManualApproval
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult, DeployflowError> {
        let (request_id, rx) =
            self.service
                .request(ctx.run_id, ctx.qualified_name(), self.message.clone());
        let _pending = PendingRequest {
            service: &self.service,
            id: request_id,
        };
        info!(stage = %ctx.stage, action = %ctx.action, request_id = %request_id, "awaiting approval");

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            decision = rx => match decision {
                Ok(true) => {
                    info!(request_id = %request_id, "approved");
                    Ok(ActionResult::succeeded().with_message("approved"))
                }
                Ok(false) => Err(ctx.failure("approval denied")),
                Err(_) => Err(ctx.failure("approval request withdrawn")),
            },
            () = ctx.cancel.cancelled() => {
                Err(DeployflowError::Cancelled(ctx.cancel.reason().unwrap_or_default()))
            }
            () = deadline => {
                Err(ctx.failure("approval timed out"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::cancellation::CancellationToken;
    use crate::secrets::StaticSecretResolver;
    use crate::source::TriggerEvent;
    use std::collections::BTreeMap;

    fn context() -> ActionContext {
        ActionContext {
            run_id: Uuid::new_v4(),
            stage: "Prod".to_string(),
            action: "Approve".to_string(),
            trigger: TriggerEvent::new("acme/webservice", "master", "abc123"),
            inputs: HashMap::new(),
            env: BTreeMap::new(),
            store: Arc::new(InMemoryArtifactStore::new()),
            secrets: Arc::new(StaticSecretResolver::new()),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    async fn wait_for_request(service: &ApprovalService) -> Uuid {
        for _ in 0..100 {
            if let Some(id) = service.pending_for("Prod/Approve") {
                return id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("approval was never requested");
    }

    #[test]
    fn test_service_approve_and_deny() {
        let service = ApprovalService::new();
        let (id, mut rx) = service.request(Uuid::new_v4(), "Prod/Approve", "ship it?");

        assert_eq!(service.pending().len(), 1);
        assert!(service.approve(id));
        assert!(rx.try_recv().unwrap());
        assert!(!service.deny(id));
        assert!(service.pending().is_empty());
    }

    #[tokio::test]
    async fn test_approved_action_succeeds() {
        let service = Arc::new(ApprovalService::new());
        let action = ManualApprovalAction::new(service.clone(), "Promote to Prod?");
        let ctx = context();

        let task = tokio::spawn(async move { action.execute(&ctx).await });
        let id = wait_for_request(&service).await;
        assert!(service.approve(id));

        let result = task.await.unwrap().unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_denied_action_fails() {
        let service = Arc::new(ApprovalService::new());
        let action = ManualApprovalAction::new(service.clone(), "Promote to Prod?");
        let ctx = context();

        let task = tokio::spawn(async move { action.execute(&ctx).await });
        let id = wait_for_request(&service).await;
        service.deny(id);

        let err = task.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("approval denied"));
    }

    #[tokio::test]
    async fn test_timeout_fails_and_withdraws_request() {
        let service = Arc::new(ApprovalService::new());
        let action = ManualApprovalAction::new(service.clone(), "Promote?")
            .with_timeout(Duration::from_millis(20));

        let err = action.execute(&context()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(service.pending().is_empty());
    }

    #[tokio::test]
    async fn test_aborted_action_withdraws_request() {
        let service = Arc::new(ApprovalService::new());
        let action = ManualApprovalAction::new(service.clone(), "Promote?");
        let ctx = context();

        let task = tokio::spawn(async move { action.execute(&ctx).await });
        wait_for_request(&service).await;
        task.abort();

        assert!(task.await.unwrap_err().is_cancelled());
        assert!(service.pending().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let service = Arc::new(ApprovalService::new());
        let action = ManualApprovalAction::new(service.clone(), "Promote?");
        let ctx = context();
        let cancel = ctx.cancel.clone();

        let task = tokio::spawn(async move { action.execute(&ctx).await });
        wait_for_request(&service).await;
        cancel.cancel("operator");

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
        assert!(service.pending().is_empty());
    }
}
