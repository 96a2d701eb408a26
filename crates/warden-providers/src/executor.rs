use async_trait::async_trait;
use serde_json::Value;

/// What a domain agent reports back after running an instruction.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub output: Value,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// Runs one instruction against a named agent. The four domain agents
/// (knowledge management, process automation, talent, decision support)
/// are host-side implementations; the fabric only ever calls through this
/// trait, keyed by `agent_name`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, agent_name: &str, instruction: &str) -> anyhow::Result<AgentOutcome>;

    /// The closed set of agent names this executor can run. Used by the
    /// planner and intent classifier to validate plans before dispatch.
    fn known_agents(&self) -> Vec<String>;
}
