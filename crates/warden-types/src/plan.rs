use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Single,
    Sequential,
    Parallel,
}

/// One unit of a multi-agent execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub agent_name: String,
    pub task: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A plan produced by the Task Planner, ready for the Dispatcher to
/// execute step by step (sequential) or fan out (parallel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_type: PlanType,
    pub steps: Vec<SubTask>,
    pub merge_instruction: Option<String>,
}

impl ExecutionPlan {
    pub fn single(agent_name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            plan_type: PlanType::Single,
            steps: vec![SubTask { agent_name: agent_name.into(), task: task.into(), depends_on: Vec::new() }],
            merge_instruction: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
