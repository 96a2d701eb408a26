use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SkillLevel {
    Beginner = 1,
    Intermediate = 2,
    Advanced = 3,
    Expert = 4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    pub skill_name: String,
    pub level: SkillLevel,
    pub updated_at: DateTime<Utc>,
}

/// A target service-level agreement tracked per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaTarget {
    pub metric: String,
    pub target_value: f64,
    /// `true` when higher observed values are better (e.g. success rate);
    /// `false` when lower is better (e.g. latency).
    pub higher_is_better: bool,
}

impl SlaTarget {
    pub fn is_meeting_sla(&self, observed: f64) -> bool {
        if self.higher_is_better {
            observed >= self.target_value
        } else {
            observed <= self.target_value
        }
    }
}

/// One day's rollup of an agent's activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub agent_name: String,
    pub date: NaiveDate,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub avg_eval_score: Option<f64>,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub agent_name: String,
    pub task_id: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Durable profile for one agent: skill matrix, SLA targets and running
/// totals. Mutated through [`AgentProfile::record_task`], never directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_name: String,
    pub role: String,
    pub department: String,
    pub hired_date: NaiveDate,
    pub skill_matrix: HashMap<String, SkillEntry>,
    pub sla_targets: Vec<SlaTarget>,
    pub total_tasks_completed: u64,
    pub total_tasks_failed: u64,
    pub total_tokens_used: u64,
    pub total_cost_usd: f64,
}

impl AgentProfile {
    pub fn new(agent_name: impl Into<String>, role: impl Into<String>, department: impl Into<String>, hired_date: NaiveDate) -> Self {
        Self {
            agent_name: agent_name.into(),
            role: role.into(),
            department: department.into(),
            hired_date,
            skill_matrix: HashMap::new(),
            sla_targets: Vec::new(),
            total_tasks_completed: 0,
            total_tasks_failed: 0,
            total_tokens_used: 0,
            total_cost_usd: 0.0,
        }
    }

    pub fn update_skill(&mut self, skill_name: impl Into<String>, level: SkillLevel) {
        let skill_name = skill_name.into();
        self.skill_matrix.insert(
            skill_name.clone(),
            SkillEntry { skill_name, level, updated_at: Utc::now() },
        );
    }

    pub fn record_task(&mut self, succeeded: bool, tokens_used: u64, cost_usd: f64) {
        if succeeded {
            self.total_tasks_completed += 1;
        } else {
            self.total_tasks_failed += 1;
        }
        self.total_tokens_used += tokens_used;
        self.total_cost_usd += cost_usd;
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_tasks_completed + self.total_tasks_failed;
        if total == 0 {
            1.0
        } else {
            self.total_tasks_completed as f64 / total as f64
        }
    }

    pub fn calculate_sla_compliance(&self) -> HashMap<String, bool> {
        let success_rate = self.success_rate();
        self.sla_targets
            .iter()
            .map(|target| {
                let observed = if target.metric == "success_rate" { success_rate } else { 0.0 };
                (target.metric.clone(), target.is_meeting_sla(observed))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sla_target_respects_direction() {
        let throughput = SlaTarget { metric: "success_rate".into(), target_value: 0.9, higher_is_better: true };
        assert!(throughput.is_meeting_sla(0.95));
        assert!(!throughput.is_meeting_sla(0.5));

        let latency = SlaTarget { metric: "latency_ms".into(), target_value: 500.0, higher_is_better: false };
        assert!(latency.is_meeting_sla(200.0));
        assert!(!latency.is_meeting_sla(900.0));
    }

    #[test]
    fn record_task_accumulates_totals() {
        let mut profile = AgentProfile::new("km_agent", "Knowledge Manager", "Research", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        profile.record_task(true, 120, 0.002);
        profile.record_task(false, 80, 0.0015);
        assert_eq!(profile.total_tasks_completed, 1);
        assert_eq!(profile.total_tasks_failed, 1);
        assert!((profile.success_rate() - 0.5).abs() < f64::EPSILON);
    }
}
