use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;
use warden_types::{RiskLevel, SessionRecord, SessionStatus, WardenError, WardenResult};

use crate::connection;

/// Idempotent session outcome store, keyed on `(agent_name, task_id)` via a
/// `UNIQUE` constraint so a retried EPCC cycle overwrites rather than
/// duplicates its prior record.
pub struct SessionStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SessionStore {
    pub fn open(db_path: &Path) -> WardenResult<Self> {
        let conn = connection::open(db_path, |conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    agent_name  TEXT    NOT NULL,
                    task_id     TEXT    NOT NULL,
                    status      TEXT    NOT NULL,
                    eval_score  REAL,
                    risk_level  TEXT    NOT NULL DEFAULT 'LOW',
                    output      TEXT,
                    created_at  TEXT    NOT NULL,
                    updated_at  TEXT    NOT NULL,
                    UNIQUE (agent_name, task_id)
                )",
                [],
            )?;
            Ok(())
        })?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn save(&self, record: &SessionRecord) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (agent_name, task_id, status, eval_score, risk_level, output, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(agent_name, task_id) DO UPDATE SET
                status = excluded.status,
                eval_score = excluded.eval_score,
                risk_level = excluded.risk_level,
                output = excluded.output,
                updated_at = excluded.updated_at",
            params![
                record.agent_name,
                record.task_id,
                status_str(record.status),
                record.eval_score,
                risk_str(record.risk_level),
                record.output.as_ref().map(|v| v.to_string()),
                now,
            ],
        )?;
        Ok(())
    }

    pub async fn get(&self, agent_name: &str, task_id: &str) -> WardenResult<Option<SessionRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT agent_name, task_id, status, eval_score, risk_level, output, created_at, updated_at
             FROM sessions WHERE agent_name = ?1 AND task_id = ?2",
            params![agent_name, task_id],
            row_to_session,
        )
        .optional()
        .map_err(WardenError::from)
    }

    pub async fn list_for_agent(&self, agent_name: &str) -> WardenResult<Vec<SessionRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT agent_name, task_id, status, eval_score, risk_level, output, created_at, updated_at
             FROM sessions WHERE agent_name = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![agent_name], row_to_session)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(WardenError::from)
    }
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Success => "success",
        SessionStatus::Failed => "failed",
        SessionStatus::Blocked => "blocked",
    }
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "success" => SessionStatus::Success,
        "failed" => SessionStatus::Failed,
        _ => SessionStatus::Blocked,
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

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let output: Option<String> = row.get(5)?;
    Ok(SessionRecord {
        agent_name: row.get(0)?,
        task_id: row.get(1)?,
        status: parse_status(&row.get::<_, String>(2)?),
        eval_score: row.get(3)?,
        risk_level: parse_risk(&row.get::<_, String>(4)?),
        output: output.and_then(|o| serde_json::from_str(&o).ok()),
        created_at: crate::parse_rfc3339(&row.get::<_, String>(6)?),
        updated_at: crate::parse_rfc3339(&row.get::<_, String>(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::SessionRecord;

    fn store() -> SessionStore {
        let dir = tempfile::tempdir().unwrap();
        SessionStore::open(&dir.path().join("sessions.db")).unwrap()
    }

    #[tokio::test]
    async fn save_is_idempotent_per_agent_and_task() {
        let store = store();
        let mut record = SessionRecord::new("km_agent", "t-1", RiskLevel::Low);
        record.status = SessionStatus::Success;
        store.save(&record).await.unwrap();

        record.status = SessionStatus::Failed;
        store.save(&record).await.unwrap();

        let fetched = store.get("km_agent", "t-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Failed);

        let all = store.list_for_agent("km_agent").await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
