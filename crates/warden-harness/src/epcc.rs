//! The Explore → Plan → Code → Commit cycle every agent invocation runs
//! through. Explore restores the agent's recent session history, Plan
//! assesses risk and gates on it, Code invokes the host executor, Commit
//! scores the output and persists it idempotently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Level;
use uuid::Uuid;
use warden_eval::{EvalEngine, LlmJudgeEvalEngine};
use warden_hitl::HitlGate;
use warden_observability::{emit_event, Component, GovernanceEvent};
use warden_profiles::ProfileManager;
use warden_providers::Executor;
use warden_risk::{RiskAssessment, RiskAssessor, SemanticRiskAssessor};
use warden_storage::SessionStore;
use warden_types::{ApprovalStatus, RiskLevel, SessionRecord, SessionStatus};

const EXPLORE_WINDOW: usize = 5;

/// Either risk assessor the host wired up. Kept as an enum rather than a
/// trait object since the two constructors take different configuration
/// and the keyword-only assessor's `assess` isn't async.
pub enum RiskEngine {
    Keyword(RiskAssessor),
    Semantic(SemanticRiskAssessor),
}

impl RiskEngine {
    async fn assess(&self, task: &str, agent_name: &str) -> RiskAssessment {
        match self {
            RiskEngine::Keyword(assessor) => assessor.assess_for(task, agent_name),
            RiskEngine::Semantic(assessor) => assessor.assess(task, agent_name).await,
        }
    }
}

/// Either eval engine the host wired up, same rationale as [`RiskEngine`].
pub enum EvalMode {
    Keyword(EvalEngine),
    LlmJudge(LlmJudgeEvalEngine),
}

impl EvalMode {
    async fn evaluate(&self, agent_name: &str, task: &str, output: &str) -> f64 {
        match self {
            EvalMode::Keyword(engine) => engine.evaluate(agent_name, task, output).score,
            EvalMode::LlmJudge(engine) => engine.evaluate(agent_name, task, output).await.score,
        }
    }
}

/// The outcome of one `run_epcc` call. Distinct from [`SessionRecord`]:
/// this is the pipeline's return value (includes `success` and a fresh
/// `task_id`), not the persisted row shape.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub task_id: String,
    pub agent_name: String,
    pub success: bool,
    pub output: String,
    pub risk_level: RiskLevel,
    pub eval_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Binds the Session Store, Risk Assessor, Eval Engine, HITL Gate and
/// Agent Profile manager into the four-phase EPCC cycle.
pub struct EpccHarness {
    sessions: Arc<SessionStore>,
    profiles: Arc<ProfileManager>,
    risk: RiskEngine,
    eval: EvalMode,
    gate: Arc<HitlGate>,
}

impl EpccHarness {
    pub fn new(sessions: Arc<SessionStore>, profiles: Arc<ProfileManager>, risk: RiskEngine, eval: EvalMode, gate: Arc<HitlGate>) -> Self {
        Self { sessions, profiles, risk, eval, gate }
    }

    /// Textual digest of an agent's most recent sessions, used as the
    /// Explore phase's restored context.
    async fn restore_context(&self, agent_name: &str) -> (Vec<SessionRecord>, String) {
        let mut history = self.sessions.list_for_agent(agent_name).await.unwrap_or_default();
        history.truncate(EXPLORE_WINDOW);
        let digest = if history.is_empty() {
            "no prior sessions".to_string()
        } else {
            format!("{} prior session(s), most recent status={:?}", history.len(), history[0].status)
        };
        (history, digest)
    }

    pub async fn run_epcc(&self, agent_name: &str, instruction: &str, executor: &dyn Executor) -> SessionResult {
        let task_id = format!("TASK-{}", Uuid::new_v4());

        // Explore
        let (_last_sessions, last_progress) = self.restore_context(agent_name).await;
        tracing::debug!(agent_name, task_id, last_progress, "explore: context restored");

        // Plan
        let risk = self.risk.assess(instruction, agent_name).await;
        tracing::info!(agent_name, task_id, ?risk.level, risk.reason, "plan: risk assessed");
        emit_event(
            Level::INFO,
            GovernanceEvent::new("risk.assessed", Component::Harness).with_task(&task_id).with_agent(agent_name).with_risk_level(risk.level.as_str()),
        );

        let approval = match self.gate.check_and_gate(instruction, agent_name, risk.level, &risk.reason).await {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(agent_name, task_id, %err, "plan: gate check failed");
                return SessionResult {
                    task_id,
                    agent_name: agent_name.to_string(),
                    success: false,
                    output: format!("execution failed: gate error: {err}"),
                    risk_level: risk.level,
                    eval_score: 0.0,
                    timestamp: Utc::now(),
                };
            }
        };

        if !matches!(approval.status, ApprovalStatus::Approved | ApprovalStatus::AutoApproved) {
            let output = match approval.status {
                ApprovalStatus::Pending => format!("awaiting approval: request {} is pending human review", approval.request_id),
                ApprovalStatus::Rejected => format!("request {} was rejected", approval.request_id),
                ApprovalStatus::Timeout => format!("request {} timed out awaiting approval", approval.request_id),
                ApprovalStatus::Approved | ApprovalStatus::AutoApproved => unreachable!(),
            };
            tracing::warn!(agent_name, task_id, request_id = %approval.request_id, ?approval.status, "plan: task gated, executor not invoked");
            return SessionResult {
                task_id,
                agent_name: agent_name.to_string(),
                success: false,
                output,
                risk_level: risk.level,
                eval_score: 0.0,
                timestamp: Utc::now(),
            };
        }

        // Code
        let (success, output, tokens_used, cost_usd) = match executor.execute(agent_name, instruction).await {
            Ok(outcome) => (true, render_output(&outcome.output), outcome.tokens_used, outcome.cost_usd),
            Err(err) => (false, format!("execution failed: {err}"), 0, 0.0),
        };

        // Commit
        let eval_score = self.eval.evaluate(agent_name, instruction, &output).await;
        tracing::info!(agent_name, task_id, success, eval_score, "commit: output evaluated");

        let mut record = SessionRecord::new(agent_name, task_id.clone(), risk.level);
        record.status = if success { SessionStatus::Success } else { SessionStatus::Failed };
        record.eval_score = Some(eval_score);
        record.output = Some(serde_json::Value::String(output.clone()));
        if let Err(err) = self.sessions.save(&record).await {
            tracing::error!(agent_name, task_id, %err, "commit: failed to persist session");
        }

        if let Err(err) = self.profiles.record_task(agent_name, success, eval_score, tokens_used, cost_usd, &task_id).await {
            tracing::warn!(agent_name, task_id, %err, "commit: failed to update agent profile");
        }

        emit_event(
            if success { Level::INFO } else { Level::WARN },
            GovernanceEvent::new("task.committed", Component::Harness)
                .with_task(&task_id)
                .with_agent(agent_name)
                .with_risk_level(risk.level.as_str())
                .with_status(if success { "success" } else { "failed" }),
        );

        SessionResult { task_id, agent_name: agent_name.to_string(), success, output, risk_level: risk.level, eval_score, timestamp: Utc::now() }
    }
}

fn render_output(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use warden_config::{EvalConfig, HitlConfig, RiskConfig};
    use warden_providers::{AgentOutcome, Notifier};
    use warden_storage::{ApprovalStore, ProfileStore};
    use warden_types::{ApprovalRequest, QueuedTask};

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, _agent_name: &str, instruction: &str) -> anyhow::Result<AgentOutcome> {
            Ok(AgentOutcome { output: serde_json::Value::String(format!("handled: {instruction}")), tokens_used: 5, cost_usd: 0.001 })
        }
        fn known_agents(&self) -> Vec<String> {
            vec!["KM_AGENT".to_string()]
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl Executor for FailingExecutor {
        async fn execute(&self, _agent_name: &str, _instruction: &str) -> anyhow::Result<AgentOutcome> {
            anyhow::bail!("boom")
        }
        fn known_agents(&self) -> Vec<String> {
            vec!["KM_AGENT".to_string()]
        }
    }

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn notify_approval_required(&self, _request: &ApprovalRequest) -> bool {
            true
        }
        async fn notify_resolved(&self, _request: &ApprovalRequest) -> bool {
            true
        }
        async fn notify_task_complete(&self, _task: &QueuedTask) -> bool {
            true
        }
    }

    fn harness(require_med: bool) -> EpccHarness {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::open(&dir.path().join("sessions.db")).unwrap());
        let profile_store = Arc::new(ProfileStore::open(&dir.path().join("profiles.db")).unwrap());
        let profiles = Arc::new(ProfileManager::new(profile_store));
        let approval_store = Arc::new(ApprovalStore::open(&dir.path().join("hitl.db")).unwrap());
        let hitl_config = HitlConfig { require_approval_for_medium: require_med, ..HitlConfig::default() };
        let gate = Arc::new(HitlGate::new(approval_store, Arc::new(NoopNotifier), &hitl_config));
        EpccHarness::new(sessions, profiles, RiskEngine::Keyword(RiskAssessor::new()), EvalMode::Keyword(EvalEngine::new(EvalConfig::default().passing_threshold)), gate)
    }

    #[tokio::test]
    async fn low_risk_task_executes_and_persists_one_session_row() {
        let harness = harness(false);
        let result = harness.run_epcc("KM_AGENT", "summarize last week's standup notes", &EchoExecutor).await;
        assert!(result.success);
        assert!(result.output.contains("handled"));

        let saved = harness.sessions.get("KM_AGENT", &result.task_id).await.unwrap().unwrap();
        assert_eq!(saved.status, SessionStatus::Success);
    }

    #[tokio::test]
    async fn high_risk_task_is_gated_and_executor_never_runs() {
        let harness = harness(false);
        let result = harness.run_epcc("KM_AGENT", "delete all customer data", &EchoExecutor).await;
        assert!(!result.success);
        assert!(result.output.contains("awaiting approval"));
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn executor_failure_is_captured_without_panicking() {
        let harness = harness(false);
        let result = harness.run_epcc("KM_AGENT", "summarize notes", &FailingExecutor).await;
        assert!(!result.success);
        assert!(result.output.starts_with("execution failed"));
    }

    #[tokio::test]
    async fn repeated_commit_for_same_task_id_stays_one_row() {
        let harness = harness(false);
        let mut record = SessionRecord::new("KM_AGENT", "TASK-fixed", RiskLevel::Low);
        record.status = SessionStatus::Success;
        harness.sessions.save(&record).await.unwrap();
        record.status = SessionStatus::Failed;
        harness.sessions.save(&record).await.unwrap();

        let all = harness.sessions.list_for_agent("KM_AGENT").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    struct StubChat(&'static str);

    #[async_trait]
    impl warden_providers::Chat for StubChat {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn semantic_risk_engine_still_gates_high_risk_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::open(&dir.path().join("sessions.db")).unwrap());
        let profile_store = Arc::new(ProfileStore::open(&dir.path().join("profiles.db")).unwrap());
        let profiles = Arc::new(ProfileManager::new(profile_store));
        let approval_store = Arc::new(ApprovalStore::open(&dir.path().join("hitl.db")).unwrap());
        let gate = Arc::new(HitlGate::new(approval_store, Arc::new(NoopNotifier), &HitlConfig::default()));
        let chat: Arc<dyn warden_providers::Chat> = Arc::new(StubChat(r#"{"level": "LOW", "confidence": 0.95}"#));
        let risk = RiskEngine::Semantic(SemanticRiskAssessor::new(chat, &RiskConfig::default()));
        let harness = EpccHarness::new(sessions, profiles, risk, EvalMode::Keyword(EvalEngine::new(EvalConfig::default().passing_threshold)), gate);

        let result = harness.run_epcc("KM_AGENT", "delete all customer data", &EchoExecutor).await;
        assert!(!result.success);
        assert_eq!(result.risk_level, RiskLevel::High);
    }
}
