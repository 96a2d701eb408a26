use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use warden_types::{ApprovalRequest, ApprovalStatus, QueuedTask};

/// Outbound notification for HITL approval events and queue task
/// completions. Failures are logged and swallowed — a notifier never
/// changes task or approval state, it only best-effort informs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_approval_required(&self, request: &ApprovalRequest) -> bool;
    async fn notify_resolved(&self, request: &ApprovalRequest) -> bool;
    async fn notify_task_complete(&self, task: &QueuedTask) -> bool;
}

/// Posts to a Slack incoming webhook (if configured) and/or a generic JSON
/// endpoint. Mirrors the reference harness's `WebhookNotifier`: either URL
/// may be absent, in which case that leg is silently skipped.
pub struct WebhookNotifier {
    client: reqwest::Client,
    slack_webhook_url: Option<String>,
    generic_webhook_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(slack_webhook_url: Option<String>, generic_webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client, slack_webhook_url, generic_webhook_url }
    }

    async fn post_json(&self, url: &str, body: serde_json::Value) -> bool {
        match self.client.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), url, "webhook returned non-success status");
                false
            }
            Err(err) => {
                tracing::warn!(%err, url, "webhook delivery failed");
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_approval_required(&self, request: &ApprovalRequest) -> bool {
        let mut sent = false;

        if let Some(slack_url) = &self.slack_webhook_url {
            let text = format!(
                "Approval required | risk: {:?}\nAgent: {}\nTask: {}\nReason: {}\nID: {}",
                request.risk_level,
                request.agent_name,
                truncate(&request.task, 200),
                request.risk_reason,
                request.request_id,
            );
            sent |= self.post_json(slack_url, json!({ "text": text })).await;
        }

        if let Some(generic_url) = &self.generic_webhook_url {
            let payload = json!({
                "event": "approval_required",
                "request_id": request.request_id,
                "agent": request.agent_name,
                "task": request.task,
                "risk_level": request.risk_level,
                "risk_reason": request.risk_reason,
                "created_at": request.created_at,
                "timeout_hours": request.timeout_hours,
            });
            sent |= self.post_json(generic_url, payload).await;
        }

        sent
    }

    async fn notify_resolved(&self, request: &ApprovalRequest) -> bool {
        let mut sent = false;
        let icon = if request.status == ApprovalStatus::Approved { "approved" } else { "not approved" };

        if let Some(slack_url) = &self.slack_webhook_url {
            let text = format!(
                "Approval resolved ({icon}) | {:?}\nAgent: {}\nID: {}\nResolved by: {}",
                request.status,
                request.agent_name,
                request.request_id,
                request.resolved_by.as_deref().unwrap_or("unknown"),
            );
            sent |= self.post_json(slack_url, json!({ "text": text })).await;
        }

        if let Some(generic_url) = &self.generic_webhook_url {
            let payload = json!({
                "event": "approval_resolved",
                "request_id": request.request_id,
                "agent": request.agent_name,
                "status": request.status,
                "resolved_by": request.resolved_by,
                "resolution_note": request.resolution_note,
                "resolved_at": request.resolved_at,
            });
            sent |= self.post_json(generic_url, payload).await;
        }

        sent
    }

    async fn notify_task_complete(&self, task: &QueuedTask) -> bool {
        let Some(callback_url) = &task.callback_url else { return false };
        let payload = json!({
            "task_id": task.task_id,
            "agent_name": task.agent_name,
            "status": task.status,
            "result": task.result,
            "error": task.error,
            "completed_at": task.completed_at,
        });
        self.post_json(callback_url, payload).await
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
