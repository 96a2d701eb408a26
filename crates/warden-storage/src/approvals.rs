use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;
use warden_types::{ApprovalRequest, ApprovalStatus, RiskLevel, WardenError, WardenResult};

use crate::connection;

pub struct ApprovalStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl ApprovalStore {
    pub fn open(db_path: &Path) -> WardenResult<Self> {
        let conn = connection::open(db_path, |conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS approval_requests (
                    request_id       TEXT PRIMARY KEY,
                    agent_name       TEXT NOT NULL,
                    task             TEXT NOT NULL,
                    risk_level       TEXT NOT NULL,
                    risk_reason      TEXT NOT NULL,
                    status           TEXT NOT NULL DEFAULT 'PENDING',
                    created_at       TEXT NOT NULL,
                    resolved_at      TEXT,
                    resolved_by      TEXT,
                    resolution_note  TEXT,
                    webhook_sent     INTEGER NOT NULL DEFAULT 0,
                    timeout_hours    REAL NOT NULL DEFAULT 24.0
                )",
                [],
            )?;
            conn.execute("CREATE INDEX IF NOT EXISTS idx_approvals_status ON approval_requests(status)", [])?;
            Ok(())
        })?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn insert(&self, request: &ApprovalRequest) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO approval_requests (request_id, agent_name, task, risk_level, risk_reason,
                status, created_at, resolved_at, resolved_by, resolution_note, webhook_sent, timeout_hours)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                request.request_id,
                request.agent_name,
                request.task,
                risk_str(request.risk_level),
                request.risk_reason,
                status_str(request.status),
                request.created_at.to_rfc3339(),
                request.resolved_at.map(|t| t.to_rfc3339()),
                request.resolved_by,
                request.resolution_note,
                request.webhook_sent as i64,
                request.timeout_hours,
            ],
        )?;
        Ok(())
    }

    pub async fn get(&self, request_id: &str) -> WardenResult<Option<ApprovalRequest>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM approval_requests WHERE request_id = ?1", params![request_id], row_to_request)
            .optional()
            .map_err(WardenError::from)
    }

    pub async fn mark_webhook_sent(&self, request_id: &str) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("UPDATE approval_requests SET webhook_sent = 1 WHERE request_id = ?1", params![request_id])?;
        Ok(())
    }

    pub async fn resolve(&self, request_id: &str, status: ApprovalStatus, resolved_by: &str, note: Option<&str>) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE approval_requests SET status = ?1, resolved_at = ?2, resolved_by = ?3, resolution_note = ?4 WHERE request_id = ?5",
            params![status_str(status), Utc::now().to_rfc3339(), resolved_by, note, request_id],
        )?;
        Ok(())
    }

    pub async fn pending(&self) -> WardenResult<Vec<ApprovalRequest>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM approval_requests WHERE status = 'PENDING' ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], row_to_request)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(WardenError::from)
    }

    /// Transitions any `PENDING` request older than its own `timeout_hours`
    /// to `TIMEOUT`. Returns the request ids that timed out.
    pub async fn expire_timeouts(&self, now: DateTime<Utc>) -> WardenResult<Vec<String>> {
        let pending = self.pending().await?;
        let mut expired = Vec::new();
        for request in pending {
            if request.is_expired(now) {
                self.resolve(&request.request_id, ApprovalStatus::Timeout, "system", Some("approval window elapsed")).await?;
                expired.push(request.request_id);
            }
        }
        Ok(expired)
    }
}

fn status_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "PENDING",
        ApprovalStatus::Approved => "APPROVED",
        ApprovalStatus::Rejected => "REJECTED",
        ApprovalStatus::Timeout => "TIMEOUT",
        ApprovalStatus::AutoApproved => "AUTO_APPROVED",
    }
}

fn parse_status(s: &str) -> ApprovalStatus {
    match s {
        "APPROVED" => ApprovalStatus::Approved,
        "REJECTED" => ApprovalStatus::Rejected,
        "TIMEOUT" => ApprovalStatus::Timeout,
        "AUTO_APPROVED" => ApprovalStatus::AutoApproved,
        _ => ApprovalStatus::Pending,
    }
}

fn risk_str(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "LOW",
        RiskLevel::Medium => "MEDIUM",
        RiskLevel::High => "HIGH",
    }
}

fn parse_risk(s: &str) -> RiskLevel {
    match s {
        "HIGH" => RiskLevel::High,
        "MEDIUM" => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalRequest> {
    let resolved_at: Option<String> = row.get("resolved_at")?;
    Ok(ApprovalRequest {
        request_id: row.get("request_id")?,
        agent_name: row.get("agent_name")?,
        task: row.get("task")?,
        risk_level: parse_risk(&row.get::<_, String>("risk_level")?),
        risk_reason: row.get("risk_reason")?,
        status: parse_status(&row.get::<_, String>("status")?),
        created_at: crate::parse_rfc3339(&row.get::<_, String>("created_at")?),
        resolved_at: resolved_at.as_deref().map(crate::parse_rfc3339),
        resolved_by: row.get("resolved_by")?,
        resolution_note: row.get("resolution_note")?,
        webhook_sent: row.get::<_, i64>("webhook_sent")? != 0,
        timeout_hours: row.get("timeout_hours")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ApprovalStore {
        let dir = tempfile::tempdir().unwrap();
        ApprovalStore::open(&dir.path().join("hitl.db")).unwrap()
    }

    fn sample_request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            request_id: id.to_string(),
            agent_name: "decision_agent".to_string(),
            task: "approve vendor contract renewal".to_string(),
            risk_level: RiskLevel::High,
            risk_reason: "contains financial commitment keywords".to_string(),
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
            webhook_sent: false,
            timeout_hours: 24.0,
        }
    }

    #[tokio::test]
    async fn resolve_transitions_status_and_timestamps() {
        let store = store();
        let request = sample_request("req-1");
        store.insert(&request).await.unwrap();

        store.resolve("req-1", ApprovalStatus::Approved, "alice", Some("looks fine")).await.unwrap();
        let fetched = store.get("req-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, ApprovalStatus::Approved);
        assert_eq!(fetched.resolved_by.as_deref(), Some("alice"));
        assert!(fetched.resolved_at.is_some());
    }

    #[tokio::test]
    async fn expire_timeouts_only_touches_elapsed_pending() {
        let store = store();
        let mut stale = sample_request("req-old");
        stale.created_at = Utc::now() - chrono::Duration::hours(48);
        stale.timeout_hours = 24.0;
        store.insert(&stale).await.unwrap();

        let mut fresh = sample_request("req-new");
        fresh.timeout_hours = 24.0;
        store.insert(&fresh).await.unwrap();

        let expired = store.expire_timeouts(Utc::now()).await.unwrap();
        assert_eq!(expired, vec!["req-old".to_string()]);

        let fetched = store.get("req-new").await.unwrap().unwrap();
        assert_eq!(fetched.status, ApprovalStatus::Pending);
    }
}
