//! Wraps [`warden_storage::ProfileStore`] with the running-accumulator
//! logic a profile needs day to day: every completed task nudges today's
//! rolling averages, which periodically roll up into a durable
//! `PerformanceSnapshot` and feed SLA compliance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use warden_storage::ProfileStore;
use warden_types::{AgentProfile, CostRecord, PerformanceSnapshot, SkillLevel, WardenResult};

#[derive(Debug, Default, Clone)]
struct DailyAccumulator {
    scores: Vec<f64>,
    successes: u64,
    tokens: u64,
    cost_usd: f64,
}

/// Injected dependency, not a global: callers hold an `Arc<ProfileManager>`
/// and pass it down explicitly, mirroring the registry-as-dependency shape
/// used elsewhere in the fabric rather than a process-wide singleton.
pub struct ProfileManager {
    store: Arc<ProfileStore>,
    today: RwLock<HashMap<String, DailyAccumulator>>,
}

impl ProfileManager {
    pub fn new(store: Arc<ProfileStore>) -> Self {
        Self { store, today: RwLock::new(HashMap::new()) }
    }

    pub async fn get_or_create(&self, agent_name: &str, role: &str, department: &str) -> WardenResult<AgentProfile> {
        if let Some(profile) = self.store.get(agent_name).await? {
            return Ok(profile);
        }
        let profile = AgentProfile::new(agent_name, role, department, Utc::now().date_naive());
        self.store.upsert(&profile).await?;
        Ok(profile)
    }

    pub async fn update_skill(&self, agent_name: &str, skill_name: &str, level: SkillLevel) -> WardenResult<()> {
        let Some(mut profile) = self.store.get(agent_name).await? else { return Ok(()) };
        profile.update_skill(skill_name, level);
        self.store.upsert(&profile).await
    }

    /// Records one completed task's outcome: nudges the durable running
    /// totals on `AgentProfile`, the in-memory today accumulator used for
    /// the daily snapshot, and the per-task cost ledger.
    pub async fn record_task(&self, agent_name: &str, succeeded: bool, score: f64, tokens_used: u64, cost_usd: f64, task_id: &str) -> WardenResult<()> {
        if let Some(mut profile) = self.store.get(agent_name).await? {
            profile.record_task(succeeded, tokens_used, cost_usd);
            self.store.upsert(&profile).await?;
        }

        {
            let mut today = self.today.write().await;
            let acc = today.entry(agent_name.to_string()).or_default();
            acc.scores.push(score);
            acc.tokens += tokens_used;
            acc.cost_usd += cost_usd;
            if succeeded {
                acc.successes += 1;
            }
        }

        self.store
            .record_cost(&CostRecord { agent_name: agent_name.to_string(), task_id: task_id.to_string(), tokens_used, cost_usd, recorded_at: Utc::now() })
            .await
    }

    /// Rolls today's in-memory accumulator into a durable snapshot. Callers
    /// decide the cadence (e.g. once per completed task, or on a timer);
    /// this fabric does not run its own scheduler for it.
    pub async fn flush_today_snapshot(&self, agent_name: &str) -> WardenResult<PerformanceSnapshot> {
        let today = self.today.read().await;
        let acc = today.get(agent_name).cloned().unwrap_or_default();
        drop(today);

        let n = acc.scores.len();
        let snapshot = PerformanceSnapshot {
            agent_name: agent_name.to_string(),
            date: Utc::now().date_naive(),
            tasks_completed: n as u64,
            tasks_failed: n as u64 - acc.successes.min(n as u64),
            avg_eval_score: if n == 0 { None } else { Some(acc.scores.iter().sum::<f64>() / n as f64) },
            tokens_used: acc.tokens,
            cost_usd: acc.cost_usd,
        };
        self.store.upsert_snapshot(&snapshot).await?;
        Ok(snapshot)
    }

    pub async fn performance_trend(&self, agent_name: &str, days: i64) -> WardenResult<Vec<PerformanceSnapshot>> {
        self.store.performance_trend(agent_name, days).await
    }

    pub async fn sla_compliance(&self, agent_name: &str) -> WardenResult<HashMap<String, bool>> {
        match self.store.get(agent_name).await? {
            Some(profile) => Ok(profile.calculate_sla_compliance()),
            None => Ok(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ProfileManager {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProfileStore::open(&dir.path().join("profiles.db")).unwrap());
        ProfileManager::new(store)
    }

    #[tokio::test]
    async fn record_task_accumulates_and_flushes_snapshot() {
        let manager = manager();
        manager.get_or_create("km_agent", "Knowledge Manager", "Research").await.unwrap();

        manager.record_task("km_agent", true, 0.9, 120, 0.01, "t-1").await.unwrap();
        manager.record_task("km_agent", false, 0.3, 80, 0.008, "t-2").await.unwrap();

        let snapshot = manager.flush_today_snapshot("km_agent").await.unwrap();
        assert_eq!(snapshot.tasks_completed, 2);
        assert_eq!(snapshot.tasks_failed, 1);
        assert!((snapshot.avg_eval_score.unwrap() - 0.6).abs() < f64::EPSILON);

        let profile = manager.store.get("km_agent").await.unwrap().unwrap();
        assert_eq!(profile.total_tasks_completed, 1);
        assert_eq!(profile.total_tasks_failed, 1);
    }
}
