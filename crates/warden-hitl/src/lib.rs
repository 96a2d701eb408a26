//! Risk-gated approval state machine. `check_and_gate` is the single entry
//! point every caller goes through before a risky task is allowed to run;
//! everything else (`resolve`, `expire_timeouts`, `pending`) manages the
//! lifecycle of the `ApprovalRequest`s it creates.

use std::sync::Arc;

use chrono::Utc;
use tracing::Level;
use uuid::Uuid;
use warden_config::HitlConfig;
use warden_observability::{emit_event, Component, GovernanceEvent};
use warden_providers::Notifier;
use warden_storage::ApprovalStore;
use warden_types::{ApprovalAction, ApprovalRequest, ApprovalStatus, RiskLevel, WardenError, WardenResult};

pub struct HitlGate {
    store: Arc<ApprovalStore>,
    notifier: Arc<dyn Notifier>,
    /// Read once at construction — an operator who flips `HITL_REQUIRE_MED`
    /// must restart the process for it to take effect. See the decision
    /// note on this in the design ledger.
    require_approval_for_medium: bool,
    timeout_hours: f64,
}

impl HitlGate {
    pub fn new(store: Arc<ApprovalStore>, notifier: Arc<dyn Notifier>, config: &HitlConfig) -> Self {
        Self { store, notifier, require_approval_for_medium: config.require_approval_for_medium, timeout_hours: config.timeout_hours }
    }

    /// LOW always auto-approves. MEDIUM auto-approves unless the gate was
    /// configured to require sign-off for it. HIGH (and gated MEDIUM)
    /// creates a `PENDING` request and fires a best-effort webhook.
    pub async fn check_and_gate(&self, task: &str, agent_name: &str, risk_level: RiskLevel, risk_reason: &str) -> WardenResult<ApprovalRequest> {
        let auto_approve = match risk_level {
            RiskLevel::Low => true,
            RiskLevel::Medium => !self.require_approval_for_medium,
            RiskLevel::High => false,
        };

        if auto_approve {
            let now = Utc::now();
            let note = match risk_level {
                RiskLevel::Low => "auto-approved: low risk",
                RiskLevel::Medium => "auto-approved: medium risk, HITL_REQUIRE_MED is disabled",
                RiskLevel::High => unreachable!("high risk never auto-approves"),
            };
            let request = ApprovalRequest {
                request_id: Uuid::new_v4().to_string(),
                agent_name: agent_name.to_string(),
                task: task.to_string(),
                risk_level,
                risk_reason: risk_reason.to_string(),
                status: ApprovalStatus::AutoApproved,
                created_at: now,
                resolved_at: Some(now),
                resolved_by: Some("system".to_string()),
                resolution_note: Some(note.to_string()),
                webhook_sent: false,
                timeout_hours: self.timeout_hours,
            };
            self.store.insert(&request).await?;
            emit_event(
                Level::INFO,
                GovernanceEvent::new("approval.auto_approved", Component::Hitl)
                    .with_agent(agent_name)
                    .with_approval(&request.request_id)
                    .with_risk_level(risk_level.as_str())
                    .with_status("auto_approved"),
            );
            return Ok(request);
        }

        let request = ApprovalRequest {
            request_id: Uuid::new_v4().to_string(),
            agent_name: agent_name.to_string(),
            task: task.to_string(),
            risk_level,
            risk_reason: risk_reason.to_string(),
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
            webhook_sent: false,
            timeout_hours: self.timeout_hours,
        };
        self.store.insert(&request).await?;

        if self.notifier.notify_approval_required(&request).await {
            self.store.mark_webhook_sent(&request.request_id).await?;
        }

        tracing::warn!(request_id = %request.request_id, agent_name, ?risk_level, "task gated, awaiting approval");
        emit_event(
            Level::WARN,
            GovernanceEvent::new("approval.requested", Component::Hitl)
                .with_agent(agent_name)
                .with_approval(&request.request_id)
                .with_risk_level(risk_level.as_str())
                .with_status("pending"),
        );
        Ok(request)
    }

    pub async fn resolve(&self, request_id: &str, action: ApprovalAction, resolved_by: &str, note: Option<&str>) -> WardenResult<ApprovalRequest> {
        let status = match action {
            ApprovalAction::Approve => ApprovalStatus::Approved,
            ApprovalAction::Reject => ApprovalStatus::Rejected,
        };
        self.store.resolve(request_id, status, resolved_by, note).await?;
        let request = self.store.get(request_id).await?.ok_or_else(|| WardenError::validation(format!("unknown approval request {request_id}")))?;
        self.notifier.notify_resolved(&request).await;
        emit_event(
            Level::INFO,
            GovernanceEvent::new("approval.resolved", Component::Hitl)
                .with_agent(&request.agent_name)
                .with_approval(request_id)
                .with_risk_level(request.risk_level.as_str())
                .with_status(if status == ApprovalStatus::Approved { "approved" } else { "rejected" }),
        );
        Ok(request)
    }

    pub async fn get(&self, request_id: &str) -> WardenResult<Option<ApprovalRequest>> {
        self.store.get(request_id).await
    }

    pub async fn is_approved(&self, request_id: &str) -> WardenResult<bool> {
        let status = self.store.get(request_id).await?.map(|r| r.status);
        Ok(matches!(status, Some(ApprovalStatus::Approved) | Some(ApprovalStatus::AutoApproved)))
    }

    pub async fn pending(&self) -> WardenResult<Vec<ApprovalRequest>> {
        self.store.pending().await
    }

    pub async fn expire_timeouts(&self) -> WardenResult<Vec<String>> {
        self.store.expire_timeouts(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use warden_types::QueuedTask;

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn notify_approval_required(&self, _request: &ApprovalRequest) -> bool {
            true
        }
        async fn notify_resolved(&self, _request: &ApprovalRequest) -> bool {
            true
        }
        async fn notify_task_complete(&self, _task: &QueuedTask) -> bool {
            true
        }
    }

    fn gate(require_med: bool) -> HitlGate {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ApprovalStore::open(&dir.path().join("hitl.db")).unwrap());
        let config = HitlConfig { require_approval_for_medium: require_med, ..HitlConfig::default() };
        HitlGate::new(store, Arc::new(NoopNotifier), &config)
    }

    #[tokio::test]
    async fn low_risk_auto_approves() {
        let gate = gate(false);
        let request = gate.check_and_gate("summarize notes", "km_agent", RiskLevel::Low, "none").await.unwrap();
        assert_eq!(request.status, ApprovalStatus::AutoApproved);
        assert!(gate.is_approved(&request.request_id).await.unwrap());
    }

    #[tokio::test]
    async fn medium_risk_auto_approves_unless_required() {
        let lenient_gate = gate(false);
        let request = lenient_gate.check_and_gate("publish update", "process_agent", RiskLevel::Medium, "publish keyword").await.unwrap();
        assert_eq!(request.status, ApprovalStatus::AutoApproved);

        let strict_gate = gate(true);
        let request = strict_gate.check_and_gate("publish update", "process_agent", RiskLevel::Medium, "publish keyword").await.unwrap();
        assert_eq!(request.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn high_risk_always_gates_and_resolves() {
        let gate = gate(false);
        let request = gate.check_and_gate("delete prod records", "decision_agent", RiskLevel::High, "delete keyword").await.unwrap();
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert!(!gate.is_approved(&request.request_id).await.unwrap());

        let resolved = gate.resolve(&request.request_id, ApprovalAction::Approve, "alice", Some("reviewed")).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(gate.is_approved(&request.request_id).await.unwrap());
    }
}
