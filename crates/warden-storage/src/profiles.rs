use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;
use warden_types::{AgentProfile, CostRecord, PerformanceSnapshot, SkillEntry, SlaTarget, WardenError, WardenResult};

use crate::connection;

/// Backing store for `AgentProfile` plus its daily `PerformanceSnapshot`
/// history and per-task `CostRecord` ledger.
pub struct ProfileStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl ProfileStore {
    pub fn open(db_path: &Path) -> WardenResult<Self> {
        let conn = connection::open(db_path, |conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS agent_profiles (
                    agent_name             TEXT PRIMARY KEY,
                    role                   TEXT NOT NULL,
                    department             TEXT NOT NULL,
                    hired_date             TEXT NOT NULL,
                    skill_matrix           TEXT NOT NULL DEFAULT '{}',
                    sla_targets            TEXT NOT NULL DEFAULT '[]',
                    total_tasks_completed  INTEGER NOT NULL DEFAULT 0,
                    total_tasks_failed     INTEGER NOT NULL DEFAULT 0,
                    total_tokens_used      INTEGER NOT NULL DEFAULT 0,
                    total_cost_usd         REAL NOT NULL DEFAULT 0.0
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS performance_history (
                    id               INTEGER PRIMARY KEY AUTOINCREMENT,
                    agent_name       TEXT NOT NULL,
                    date             TEXT NOT NULL,
                    tasks_completed  INTEGER NOT NULL DEFAULT 0,
                    tasks_failed     INTEGER NOT NULL DEFAULT 0,
                    avg_eval_score   REAL,
                    tokens_used      INTEGER NOT NULL DEFAULT 0,
                    cost_usd         REAL NOT NULL DEFAULT 0.0,
                    UNIQUE(agent_name, date)
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS cost_history (
                    id           INTEGER PRIMARY KEY AUTOINCREMENT,
                    agent_name   TEXT NOT NULL,
                    task_id      TEXT NOT NULL,
                    tokens_used  INTEGER NOT NULL,
                    cost_usd     REAL NOT NULL,
                    recorded_at  TEXT NOT NULL
                )",
                [],
            )?;
            Ok(())
        })?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn upsert(&self, profile: &AgentProfile) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO agent_profiles (agent_name, role, department, hired_date, skill_matrix,
                sla_targets, total_tasks_completed, total_tasks_failed, total_tokens_used, total_cost_usd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(agent_name) DO UPDATE SET
                role = excluded.role,
                department = excluded.department,
                skill_matrix = excluded.skill_matrix,
                sla_targets = excluded.sla_targets,
                total_tasks_completed = excluded.total_tasks_completed,
                total_tasks_failed = excluded.total_tasks_failed,
                total_tokens_used = excluded.total_tokens_used,
                total_cost_usd = excluded.total_cost_usd",
            params![
                profile.agent_name,
                profile.role,
                profile.department,
                profile.hired_date.to_string(),
                serde_json::to_string(&profile.skill_matrix).unwrap_or_else(|_| "{}".to_string()),
                serde_json::to_string(&profile.sla_targets).unwrap_or_else(|_| "[]".to_string()),
                profile.total_tasks_completed,
                profile.total_tasks_failed,
                profile.total_tokens_used,
                profile.total_cost_usd,
            ],
        )?;
        Ok(())
    }

    pub async fn get(&self, agent_name: &str) -> WardenResult<Option<AgentProfile>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM agent_profiles WHERE agent_name = ?1", params![agent_name], row_to_profile)
            .optional()
            .map_err(WardenError::from)
    }

    pub async fn record_cost(&self, record: &CostRecord) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO cost_history (agent_name, task_id, tokens_used, cost_usd, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.agent_name, record.task_id, record.tokens_used, record.cost_usd, record.recorded_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn upsert_snapshot(&self, snapshot: &PerformanceSnapshot) -> WardenResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO performance_history (agent_name, date, tasks_completed, tasks_failed, avg_eval_score, tokens_used, cost_usd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(agent_name, date) DO UPDATE SET
                tasks_completed = excluded.tasks_completed,
                tasks_failed = excluded.tasks_failed,
                avg_eval_score = excluded.avg_eval_score,
                tokens_used = excluded.tokens_used,
                cost_usd = excluded.cost_usd",
            params![
                snapshot.agent_name,
                snapshot.date.to_string(),
                snapshot.tasks_completed,
                snapshot.tasks_failed,
                snapshot.avg_eval_score,
                snapshot.tokens_used,
                snapshot.cost_usd,
            ],
        )?;
        Ok(())
    }

    pub async fn get_today_snapshot(&self, agent_name: &str, today: NaiveDate) -> WardenResult<Option<PerformanceSnapshot>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT agent_name, date, tasks_completed, tasks_failed, avg_eval_score, tokens_used, cost_usd
             FROM performance_history WHERE agent_name = ?1 AND date = ?2",
            params![agent_name, today.to_string()],
            row_to_snapshot,
        )
        .optional()
        .map_err(WardenError::from)
    }

    pub async fn performance_trend(&self, agent_name: &str, days: i64) -> WardenResult<Vec<PerformanceSnapshot>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT agent_name, date, tasks_completed, tasks_failed, avg_eval_score, tokens_used, cost_usd
             FROM performance_history WHERE agent_name = ?1 ORDER BY date DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent_name, days], row_to_snapshot)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(WardenError::from)
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentProfile> {
    let skill_matrix: String = row.get("skill_matrix")?;
    let sla_targets: String = row.get("sla_targets")?;
    let hired_date: String = row.get("hired_date")?;
    Ok(AgentProfile {
        agent_name: row.get("agent_name")?,
        role: row.get("role")?,
        department: row.get("department")?,
        hired_date: NaiveDate::parse_from_str(&hired_date, "%Y-%m-%d").unwrap_or_else(|_| Utc::now().date_naive()),
        skill_matrix: serde_json::from_str::<HashMap<String, SkillEntry>>(&skill_matrix).unwrap_or_default(),
        sla_targets: serde_json::from_str::<Vec<SlaTarget>>(&sla_targets).unwrap_or_default(),
        total_tasks_completed: row.get("total_tasks_completed")?,
        total_tasks_failed: row.get("total_tasks_failed")?,
        total_tokens_used: row.get("total_tokens_used")?,
        total_cost_usd: row.get("total_cost_usd")?,
    })
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<PerformanceSnapshot> {
    let date: String = row.get(1)?;
    Ok(PerformanceSnapshot {
        agent_name: row.get(0)?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap_or_else(|_| Utc::now().date_naive()),
        tasks_completed: row.get(2)?,
        tasks_failed: row.get(3)?,
        avg_eval_score: row.get(4)?,
        tokens_used: row.get(5)?,
        cost_usd: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{AgentProfile, SkillLevel};

    fn store() -> ProfileStore {
        let dir = tempfile::tempdir().unwrap();
        ProfileStore::open(&dir.path().join("profiles.db")).unwrap()
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_profile() {
        let store = store();
        let mut profile = AgentProfile::new("km_agent", "Knowledge Manager", "Research", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        profile.update_skill("summarization", SkillLevel::Advanced);
        profile.record_task(true, 100, 0.01);
        store.upsert(&profile).await.unwrap();

        profile.record_task(true, 50, 0.005);
        store.upsert(&profile).await.unwrap();

        let fetched = store.get("km_agent").await.unwrap().unwrap();
        assert_eq!(fetched.total_tasks_completed, 2);
        assert_eq!(fetched.skill_matrix.get("summarization").unwrap().level, SkillLevel::Advanced);
    }

    #[tokio::test]
    async fn snapshot_upsert_is_idempotent_per_day() {
        let store = store();
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let snapshot = PerformanceSnapshot {
            agent_name: "km_agent".to_string(),
            date: today,
            tasks_completed: 3,
            tasks_failed: 0,
            avg_eval_score: Some(0.9),
            tokens_used: 500,
            cost_usd: 0.05,
        };
        store.upsert_snapshot(&snapshot).await.unwrap();
        let mut updated = snapshot.clone();
        updated.tasks_completed = 5;
        store.upsert_snapshot(&updated).await.unwrap();

        let fetched = store.get_today_snapshot("km_agent", today).await.unwrap().unwrap();
        assert_eq!(fetched.tasks_completed, 5);
    }
}
