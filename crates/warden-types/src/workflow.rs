use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Agent,
    Condition,
    Loop,
    Parallel,
    Merge,
}

/// One node of a [`WorkflowDefinition`]'s step graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    pub step_type: StepType,
    pub agent_name: Option<String>,
    /// `str::format`-style template rendered against the running context
    /// before being sent to the agent.
    pub task_template: Option<String>,
    /// Boolean expression evaluated against the running context; only
    /// meaningful on `Condition`/`Loop` steps.
    pub condition: Option<String>,
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub parallel_steps: Vec<WorkflowStep>,
    pub on_success: Option<String>,
    pub on_failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub initial_context: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub outcome: StepOutcome,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub succeeded: bool,
    pub step_results: Vec<StepResult>,
    pub final_context: HashMap<String, Value>,
}
