use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Success,
    Failed,
    Blocked,
}

/// The outcome of one EPCC cycle, persisted idempotently keyed on
/// `(agent_name, task_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub agent_name: String,
    pub task_id: String,
    pub status: SessionStatus,
    pub eval_score: Option<f64>,
    pub risk_level: RiskLevel,
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(agent_name: impl Into<String>, task_id: impl Into<String>, risk_level: RiskLevel) -> Self {
        let now = Utc::now();
        Self {
            agent_name: agent_name.into(),
            task_id: task_id.into(),
            status: SessionStatus::Blocked,
            eval_score: None,
            risk_level,
            output: None,
            created_at: now,
            updated_at: now,
        }
    }
}
