use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;
use warden_types::{Priority, QueuedTask, QueueStats, TaskStatus, WardenError, WardenResult};

use crate::connection;

/// Durable backing store for the task queue. One row per `QueuedTask`,
/// keyed by `task_id`.
pub struct TaskStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl TaskStore {
    pub fn open(db_path: &Path) -> WardenResult<Self> {
        let conn = connection::open(db_path, |conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS tasks (
                    task_id      TEXT PRIMARY KEY,
                    agent_name   TEXT NOT NULL,
                    instruction  TEXT NOT NULL,
                    priority     INTEGER NOT NULL DEFAULT 2,
                    status       TEXT NOT NULL DEFAULT 'PENDING',
                    created_at   TEXT NOT NULL,
                    started_at   TEXT,
                    completed_at TEXT,
                    result       TEXT,
                    error        TEXT,
                    retry_count  INTEGER NOT NULL DEFAULT 0,
                    max_retries  INTEGER NOT NULL DEFAULT 3,
                    callback_url TEXT,
                    metadata     TEXT NOT NULL DEFAULT '{}'
                )",
                [],
            )?;
            conn.execute("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)", [])?;
            Ok(())
        })?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn insert(&self, task: &QueuedTask) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (task_id, agent_name, instruction, priority, status, created_at,
                started_at, completed_at, result, error, retry_count, max_retries, callback_url, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                task.task_id,
                task.agent_name,
                task.instruction,
                task.priority as i64,
                status_str(task.status),
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.result.as_ref().map(|v| v.to_string()),
                task.error,
                task.retry_count,
                task.max_retries,
                task.callback_url,
                serde_json::to_string(&task.metadata).unwrap_or_else(|_| "{}".to_string()),
            ],
        )?;
        Ok(())
    }

    /// Atomically claims the highest-priority pending task, oldest first
    /// within a priority tier, and marks it `RUNNING`. Returns `None` when
    /// the queue is empty. Callers must serialize their own claim attempts
    /// (the queue worker pool holds a process-wide lock around this call)
    /// since SQLite's `UPDATE ... WHERE status='PENDING'` alone cannot
    /// prevent two workers from racing to read the same row id.
    pub async fn claim_next(&self) -> WardenResult<Option<QueuedTask>> {
        let conn = self.conn.lock().await;
        let task_id: Option<String> = conn
            .query_row(
                "SELECT task_id FROM tasks WHERE status = 'PENDING'
                 ORDER BY priority ASC, created_at ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(task_id) = task_id else { return Ok(None) };
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE tasks SET status = 'RUNNING', started_at = ?1 WHERE task_id = ?2",
            params![now, task_id],
        )?;
        drop(conn);
        self.get(&task_id).await
    }

    pub async fn get(&self, task_id: &str) -> WardenResult<Option<QueuedTask>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM tasks WHERE task_id = ?1", params![task_id], row_to_task)
            .optional()
            .map_err(WardenError::from)
    }

    pub async fn update_status(&self, task_id: &str, status: TaskStatus, error: Option<&str>) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        let completed_at = matches!(status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
            .then(|| Utc::now().to_rfc3339());
        conn.execute(
            "UPDATE tasks SET status = ?1, error = ?2, completed_at = COALESCE(?3, completed_at) WHERE task_id = ?4",
            params![status_str(status), error, completed_at, task_id],
        )?;
        Ok(())
    }

    pub async fn complete(&self, task_id: &str, result: &serde_json::Value) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tasks SET status = 'COMPLETED', result = ?1, completed_at = ?2 WHERE task_id = ?3",
            params![result.to_string(), Utc::now().to_rfc3339(), task_id],
        )?;
        Ok(())
    }

    pub async fn record_retry(&self, task_id: &str, retry_count: u32, error: &str) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tasks SET retry_count = ?1, error = ?2, status = 'PENDING' WHERE task_id = ?3",
            params![retry_count, error, task_id],
        )?;
        Ok(())
    }

    /// Only a `PENDING` row can be cancelled — once a worker has claimed a
    /// task and moved it to `RUNNING`, cancellation would race the in-flight
    /// execution, so the queue lets it run to completion instead.
    pub async fn cancel(&self, task_id: &str) -> WardenResult<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE tasks SET status = 'CANCELLED', completed_at = ?1
             WHERE task_id = ?2 AND status = 'PENDING'",
            params![Utc::now().to_rfc3339(), task_id],
        )?;
        Ok(changed > 0)
    }

    pub async fn pending(&self) -> WardenResult<Vec<QueuedTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE status = 'PENDING' ORDER BY priority ASC, created_at ASC")?;
        let rows = stmt.query_map([], row_to_task)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(WardenError::from)
    }

    pub async fn stats(&self) -> WardenResult<QueueStats> {
        let conn = self.conn.lock().await;
        let mut stats = QueueStats::default();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "PENDING" => stats.pending = count,
                "RUNNING" => stats.running = count,
                "COMPLETED" => stats.completed = count,
                "FAILED" => stats.failed = count,
                "CANCELLED" => stats.cancelled = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Reclaims `RUNNING` rows whose `started_at` is older than
    /// `older_than`, treating them as orphaned by a crashed worker:
    /// bumps `retry_count` and returns them to `PENDING` (or `FAILED` if
    /// retries are exhausted).
    pub async fn reclaim_stale_running(&self, older_than: DateTime<Utc>) -> WardenResult<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT task_id, retry_count, max_retries FROM tasks
             WHERE status = 'RUNNING' AND started_at IS NOT NULL AND started_at < ?1",
        )?;
        let stale: Vec<(String, u32, u32)> = stmt
            .query_map(params![older_than.to_rfc3339()], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut reclaimed = Vec::new();
        for (task_id, retry_count, max_retries) in stale {
            let next_retry = retry_count + 1;
            if next_retry <= max_retries {
                conn.execute(
                    "UPDATE tasks SET status = 'PENDING', retry_count = ?1, started_at = NULL WHERE task_id = ?2",
                    params![next_retry, task_id],
                )?;
            } else {
                conn.execute(
                    "UPDATE tasks SET status = 'FAILED', error = 'stale worker, retries exhausted', completed_at = ?1 WHERE task_id = ?2",
                    params![Utc::now().to_rfc3339(), task_id],
                )?;
            }
            reclaimed.push(task_id);
        }
        Ok(reclaimed)
    }
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "PENDING",
        TaskStatus::Running => "RUNNING",
        TaskStatus::Completed => "COMPLETED",
        TaskStatus::Failed => "FAILED",
        TaskStatus::Cancelled => "CANCELLED",
        TaskStatus::WaitingApproval => "WAITING_APPROVAL",
    }
}

fn parse_status(s: &str) -> TaskStatus {
    match s {
        "RUNNING" => TaskStatus::Running,
        "COMPLETED" => TaskStatus::Completed,
        "FAILED" => TaskStatus::Failed,
        "CANCELLED" => TaskStatus::Cancelled,
        "WAITING_APPROVAL" => TaskStatus::WaitingApproval,
        _ => TaskStatus::Pending,
    }
}

fn parse_priority(p: i64) -> Priority {
    match p {
        0 => Priority::Critical,
        1 => Priority::High,
        3 => Priority::Low,
        _ => Priority::Normal,
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedTask> {
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let result: Option<String> = row.get("result")?;
    let metadata: String = row.get("metadata")?;

    Ok(QueuedTask {
        task_id: row.get("task_id")?,
        agent_name: row.get("agent_name")?,
        instruction: row.get("instruction")?,
        priority: parse_priority(row.get::<_, i64>("priority")?),
        status: parse_status(&row.get::<_, String>("status")?),
        created_at: parse_rfc3339(&created_at),
        started_at: started_at.as_deref().map(parse_rfc3339),
        completed_at: completed_at.as_deref().map(parse_rfc3339),
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        error: row.get("error")?,
        retry_count: row.get("retry_count")?,
        max_retries: row.get("max_retries")?,
        callback_url: row.get("callback_url")?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}
