use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Strict-priority ordering for the task queue: lower numeric value runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Reachable in principle once a HITL gate blocks dispatch, but the
    /// current Dispatcher never resumes a gated task automatically — see
    /// the Open Question on approval-gated resumption.
    WaitingApproval,
}

/// A unit of work accepted by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: String,
    pub agent_name: String,
    pub instruction: String,
    #[serde(default)]
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub callback_url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_max_retries() -> u32 {
    3
}

impl QueuedTask {
    pub fn new(task_id: impl Into<String>, agent_name: impl Into<String>, instruction: impl Into<String>, priority: Priority) -> Self {
        Self {
            task_id: task_id.into(),
            agent_name: agent_name.into(),
            instruction: instruction.into(),
            priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            callback_url: None,
            metadata: HashMap::new(),
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_critical_first() {
        let mut v = vec![Priority::Low, Priority::Critical, Priority::Normal, Priority::High];
        v.sort();
        assert_eq!(v, vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn new_task_defaults_to_pending_and_retryable() {
        let task = QueuedTask::new("t-1", "km_agent", "summarize Q3", Priority::Normal);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.can_retry());
    }
}
