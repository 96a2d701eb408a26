//! The façade a queue worker (or any caller) goes through to turn a raw
//! instruction into one or more EPCC cycles: plan, classify when needed,
//! run each sub-task through the harness, and aggregate multi-agent
//! results.

use std::sync::Arc;

use futures::future::join_all;
use warden_planner::{AgentResult, IntentClassifier, ResultAggregator, TaskPlanner};
use warden_providers::Executor;
use warden_types::PlanType;

use crate::epcc::{EpccHarness, SessionResult};

const SEQUENTIAL_DELIMITER: &str = "\n\n---\n\n";

/// What `dispatch` produced, shaped by the plan it decomposed the
/// instruction into.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The instruction matched no known agent even after classification.
    UnknownAgent { hint: String },
    Single(SessionResult),
    Sequential(Vec<SessionResult>),
    Parallel { results: Vec<SessionResult>, merged: String },
}

pub struct Dispatcher {
    classifier: IntentClassifier,
    planner: TaskPlanner,
    aggregator: ResultAggregator,
    harness: Arc<EpccHarness>,
}

impl Dispatcher {
    pub fn new(classifier: IntentClassifier, planner: TaskPlanner, aggregator: ResultAggregator, harness: Arc<EpccHarness>) -> Self {
        Self { classifier, planner, aggregator, harness }
    }

    pub async fn dispatch(&self, instruction: &str, executor: &dyn Executor) -> DispatchOutcome {
        let plan = self.planner.plan(instruction).await;

        match plan.plan_type {
            PlanType::Single => {
                let mut agent_name = plan.steps[0].agent_name.clone();
                if agent_name == "UNKNOWN" {
                    agent_name = self.classifier.classify(instruction).await.agent_name;
                }
                if agent_name == "UNKNOWN" {
                    return DispatchOutcome::UnknownAgent { hint: unknown_agent_hint() };
                }
                let result = self.harness.run_epcc(&agent_name, &plan.steps[0].task, executor).await;
                DispatchOutcome::Single(result)
            }

            PlanType::Sequential => {
                let mut results = Vec::with_capacity(plan.steps.len());
                let mut previous_output: Option<String> = None;
                for step in &plan.steps {
                    let task = match &previous_output {
                        Some(prev) => format!("{}{}{}", step.task, SEQUENTIAL_DELIMITER, prev),
                        None => step.task.clone(),
                    };
                    let result = self.harness.run_epcc(&step.agent_name, &task, executor).await;
                    previous_output = Some(result.output.clone());
                    results.push(result);
                }
                DispatchOutcome::Sequential(results)
            }

            PlanType::Parallel => {
                let branches = plan.steps.iter().map(|step| {
                    let agent_name = step.agent_name.clone();
                    let task = step.task.clone();
                    async move { self.harness.run_epcc(&agent_name, &task, executor).await }
                });
                let results: Vec<SessionResult> = join_all(branches).await;

                let agent_results: Vec<AgentResult> =
                    results.iter().map(|r| AgentResult { agent_name: r.agent_name.clone(), output: r.output.clone() }).collect();
                let merged = self.aggregator.aggregate(&agent_results, plan.merge_instruction.as_deref()).await;

                DispatchOutcome::Parallel { results, merged }
            }
        }
    }
}

fn unknown_agent_hint() -> String {
    "no agent matched this instruction; try mentioning knowledge extraction, process optimization, talent/training, or decision analysis".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use warden_config::{EvalConfig, HitlConfig};
    use warden_eval::EvalEngine;
    use warden_hitl::HitlGate;
    use warden_profiles::ProfileManager;
    use warden_providers::{AgentOutcome, Notifier};
    use warden_risk::RiskAssessor;
    use warden_storage::{ApprovalStore, ProfileStore, SessionStore};
    use warden_types::{ApprovalRequest, QueuedTask};

    use crate::epcc::{EvalMode, RiskEngine};

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, agent_name: &str, instruction: &str) -> anyhow::Result<AgentOutcome> {
            Ok(AgentOutcome { output: serde_json::Value::String(format!("[{agent_name}] handled: {instruction}")), tokens_used: 1, cost_usd: 0.0 })
        }
        fn known_agents(&self) -> Vec<String> {
            vec!["KM_AGENT".to_string(), "PROCESS_AGENT".to_string(), "TALENT_AGENT".to_string(), "DECISION_AGENT".to_string()]
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

    fn dispatcher_with_planner(planner: TaskPlanner) -> Dispatcher {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::open(&dir.path().join("sessions.db")).unwrap());
        let profile_store = Arc::new(ProfileStore::open(&dir.path().join("profiles.db")).unwrap());
        let profiles = Arc::new(ProfileManager::new(profile_store));
        let approval_store = Arc::new(ApprovalStore::open(&dir.path().join("hitl.db")).unwrap());
        let gate = Arc::new(HitlGate::new(approval_store, Arc::new(NoopNotifier), &HitlConfig::default()));
        let harness = Arc::new(EpccHarness::new(
            sessions,
            profiles,
            RiskEngine::Keyword(RiskAssessor::new()),
            EvalMode::Keyword(EvalEngine::new(EvalConfig::default().passing_threshold)),
            gate,
        ));
        Dispatcher::new(IntentClassifier::new(None), planner, ResultAggregator::new(None), harness)
    }

    fn dispatcher() -> Dispatcher {
        dispatcher_with_planner(TaskPlanner::new(None))
    }

    struct StubChat(&'static str);

    #[async_trait]
    impl warden_providers::Chat for StubChat {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn single_agent_instruction_dispatches_to_one_agent() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.dispatch("please extract the SOP from this document", &EchoExecutor).await;
        match outcome {
            DispatchOutcome::Single(result) => assert!(result.success),
            other => panic!("expected Single, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn compound_instruction_with_multiple_agents_runs_sequentially() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.dispatch("extract knowledge from the document then analyze the risk of the decision", &EchoExecutor).await;
        match outcome {
            DispatchOutcome::Sequential(results) => {
                assert!(results.len() >= 2);
                assert!(results.iter().all(|r| r.success));
            }
            other => panic!("expected Sequential, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unmatched_instruction_yields_unknown_agent_hint() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.dispatch("what's the weather like today", &EchoExecutor).await;
        assert!(matches!(outcome, DispatchOutcome::UnknownAgent { .. }));
    }

    #[tokio::test]
    async fn parallel_plan_runs_branches_concurrently_and_merges() {
        let chat: Arc<dyn warden_providers::Chat> = Arc::new(StubChat(
            r#"{"type": "parallel", "steps": [{"agent": "PROCESS_AGENT", "task": "analyze process"}, {"agent": "TALENT_AGENT", "task": "assess people"}], "merge_instruction": "combine"}"#,
        ));
        let dispatcher = dispatcher_with_planner(TaskPlanner::new(Some(chat)));
        let outcome = dispatcher.dispatch("analyze process and assess people", &EchoExecutor).await;
        match outcome {
            DispatchOutcome::Parallel { results, merged } => {
                assert_eq!(results.len(), 2);
                assert!(merged.contains("PROCESS_AGENT"));
                assert!(merged.contains("TALENT_AGENT"));
            }
            other => panic!("expected Parallel, got {other:?}"),
        }
    }
}
