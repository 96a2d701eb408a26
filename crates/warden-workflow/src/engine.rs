use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::Level;
use warden_eval::EvalEngine;
use warden_observability::{emit_event, Component, GovernanceEvent};
use warden_providers::Executor;
use warden_types::{StepOutcome, StepResult, StepType, WorkflowDefinition, WorkflowResult, WorkflowStep};

use crate::builtin::builtin_workflows;
use crate::condition;
use crate::template;

/// Executes registered [`WorkflowDefinition`]s against a host-provided
/// [`Executor`]. Ships with the three builtin workflows the reference
/// harness always registers (knowledge capture, parallel decision
/// support, quality-gated retry); callers can register more.
pub struct WorkflowEngine {
    registry: RwLock<HashMap<String, WorkflowDefinition>>,
    executor: Arc<dyn Executor>,
    eval: EvalEngine,
}

impl WorkflowEngine {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        let registry = builtin_workflows().into_iter().map(|w| (w.workflow_id.clone(), w)).collect();
        Self { registry: RwLock::new(registry), executor, eval: EvalEngine::new(0.75) }
    }

    pub async fn register(&self, workflow: WorkflowDefinition) {
        self.registry.write().await.insert(workflow.workflow_id.clone(), workflow);
    }

    pub async fn get_definition(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.registry.read().await.get(workflow_id).cloned()
    }

    /// Runs a workflow to completion. `context` seeds (and overrides) the
    /// workflow's `initial_context`; each step's output is folded back in
    /// under its `step_id`, `last_output`, and `{agent_name}_output`
    /// before the next step runs.
    pub async fn execute(&self, workflow_id: &str, context: HashMap<String, Value>) -> WorkflowResult {
        let Some(definition) = self.get_definition(workflow_id).await else {
            tracing::warn!(workflow_id, "workflow not registered");
            return WorkflowResult { workflow_id: workflow_id.to_string(), succeeded: false, step_results: Vec::new(), final_context: context };
        };

        let mut ctx = definition.initial_context.clone();
        ctx.extend(context);

        let steps_by_id: HashMap<String, WorkflowStep> = definition.steps.iter().map(|s| (s.step_id.clone(), s.clone())).collect();
        let mut step_queue = definition.steps.clone();
        let mut step_results = Vec::new();

        let mut i = 0;
        while i < step_queue.len() {
            let step = step_queue[i].clone();
            let result = self.execute_step(&step, &mut ctx).await;

            let output = result.output.clone().unwrap_or(Value::Null);
            ctx.insert(step.step_id.clone(), output.clone());
            ctx.insert("last_output".to_string(), output.clone());
            if let Some(agent_name) = &step.agent_name {
                ctx.insert(format!("{agent_name}_output"), output);
            }

            let branch_target = match result.outcome {
                StepOutcome::Success => step.on_success.as_ref(),
                StepOutcome::Failed => step.on_failure.as_ref(),
                StepOutcome::Skipped => None,
            };
            if let Some(target_id) = branch_target {
                if let Some(target) = steps_by_id.get(target_id) {
                    let already_queued = step_queue[i + 1..].iter().any(|s| &s.step_id == target_id);
                    if !already_queued {
                        step_queue.insert(i + 1, target.clone());
                    }
                }
            }

            step_results.push(result);
            i += 1;
        }

        let succeeded = !step_results.is_empty() && step_results.iter().all(|r| r.outcome != StepOutcome::Failed);
        tracing::info!(workflow_id, succeeded, steps = step_results.len(), "workflow execution finished");
        emit_event(
            if succeeded { Level::INFO } else { Level::WARN },
            GovernanceEvent::new("workflow.finished", Component::Workflow)
                .with_workflow(workflow_id)
                .with_status(if succeeded { "succeeded" } else { "failed" }),
        );

        WorkflowResult { workflow_id: workflow_id.to_string(), succeeded, step_results, final_context: ctx }
    }

    fn execute_step<'a>(&'a self, step: &'a WorkflowStep, ctx: &'a mut HashMap<String, Value>) -> BoxFuture<'a, StepResult> {
        async move {
            match step.step_type {
                StepType::Agent => self.execute_agent_step(step, &*ctx).await,
                StepType::Parallel => self.execute_parallel_step(step, ctx).await,
                StepType::Condition => {
                    let passed = step.condition.as_deref().map(|c| condition::evaluate(c, &*ctx)).unwrap_or(true);
                    StepResult {
                        step_id: step.step_id.clone(),
                        outcome: if passed { StepOutcome::Success } else { StepOutcome::Failed },
                        output: Some(Value::String(if passed { "condition_passed" } else { "condition_failed" }.to_string())),
                        error: None,
                        iterations: 1,
                    }
                }
                StepType::Loop => self.execute_loop_step(step, ctx).await,
                StepType::Merge => {
                    let merged = merge_parallel_results(&*ctx);
                    StepResult { step_id: step.step_id.clone(), outcome: StepOutcome::Success, output: Some(Value::String(merged)), error: None, iterations: 1 }
                }
            }
        }
        .boxed()
    }

    async fn execute_agent_step(&self, step: &WorkflowStep, ctx: &HashMap<String, Value>) -> StepResult {
        let task = template::render(step.task_template.as_deref().unwrap_or(""), ctx);
        let agent_name = step.agent_name.clone().unwrap_or_else(|| "UNKNOWN".to_string());
        match self.executor.execute(&agent_name, &task).await {
            Ok(outcome) => StepResult { step_id: step.step_id.clone(), outcome: StepOutcome::Success, output: Some(outcome.output), error: None, iterations: 1 },
            Err(err) => {
                tracing::warn!(step_id = %step.step_id, agent = %agent_name, %err, "agent step failed");
                StepResult { step_id: step.step_id.clone(), outcome: StepOutcome::Failed, output: None, error: Some(err.to_string()), iterations: 1 }
            }
        }
    }

    async fn execute_parallel_step(&self, step: &WorkflowStep, ctx: &mut HashMap<String, Value>) -> StepResult {
        let snapshot: HashMap<String, Value> = ctx.clone();
        let branches = step.parallel_steps.iter().map(|sub| {
            let mut local_ctx = snapshot.clone();
            async move {
                let result = self.execute_step(sub, &mut local_ctx).await;
                let agent_name = sub.agent_name.clone().unwrap_or_else(|| "UNKNOWN".to_string());
                (agent_name, result)
            }
        });
        let sub_results: Vec<(String, StepResult)> = futures::future::join_all(branches).await;

        let combined = sub_results
            .iter()
            .map(|(agent, r)| format!("[{agent}] {}", value_to_text(r.output.as_ref().unwrap_or(&Value::Null))))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let all_success = sub_results.iter().all(|(_, r)| r.outcome != StepOutcome::Failed);

        let parallel_values: Vec<Value> = sub_results
            .iter()
            .map(|(agent, r)| serde_json::json!({"agent_name": agent, "step_id": r.step_id, "output": r.output}))
            .collect();
        ctx.insert("_parallel_results".to_string(), Value::Array(parallel_values));

        StepResult {
            step_id: step.step_id.clone(),
            outcome: if all_success { StepOutcome::Success } else { StepOutcome::Failed },
            output: Some(Value::String(combined)),
            error: None,
            iterations: 1,
        }
    }

    async fn execute_loop_step(&self, step: &WorkflowStep, ctx: &mut HashMap<String, Value>) -> StepResult {
        let max_iterations = step.max_iterations.unwrap_or(3).max(1);
        let agent_name = step.agent_name.clone().unwrap_or_else(|| "UNKNOWN".to_string());
        let mut last = StepResult { step_id: step.step_id.clone(), outcome: StepOutcome::Failed, output: None, error: None, iterations: 0 };

        for iteration in 1..=max_iterations {
            let task = template::render(step.task_template.as_deref().unwrap_or(""), ctx);

            let outcome = match self.executor.execute(&agent_name, &task).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    ctx.insert("last_output".to_string(), Value::Null);
                    ctx.insert("eval_score".to_string(), Value::from(0.0));
                    ctx.insert("iteration".to_string(), Value::from(iteration));
                    last = StepResult { step_id: step.step_id.clone(), outcome: StepOutcome::Failed, output: None, error: Some(err.to_string()), iterations: iteration };
                    continue;
                }
            };

            let text = value_to_text(&outcome.output);
            let record = self.eval.evaluate(&agent_name, &task, &text);
            ctx.insert("eval_score".to_string(), Value::from(record.score));
            ctx.insert("last_output".to_string(), outcome.output.clone());
            ctx.insert("iteration".to_string(), Value::from(iteration));

            let passed = match &step.condition {
                Some(expr) => condition::evaluate(expr, ctx),
                None => self.eval.is_passing(record.score),
            };

            last = StepResult {
                step_id: step.step_id.clone(),
                outcome: if passed { StepOutcome::Success } else { StepOutcome::Failed },
                output: Some(outcome.output),
                error: None,
                iterations: iteration,
            };

            if passed {
                break;
            }
            ctx.insert("feedback".to_string(), Value::String(format!("Attempt {iteration} scored {:.2}, please improve the output.", record.score)));
        }

        last
    }
}

fn merge_parallel_results(ctx: &HashMap<String, Value>) -> String {
    match ctx.get("_parallel_results") {
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| {
                let agent = item.get("agent_name").and_then(|v| v.as_str()).unwrap_or("UNKNOWN");
                let output = item.get("output").cloned().unwrap_or(Value::Null);
                format!("[{agent}] {}", value_to_text(&output))
            })
            .collect::<Vec<_>>()
            .join("\n---\n"),
        _ => ctx.get("last_output").map(value_to_text).unwrap_or_default(),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use warden_providers::AgentOutcome;

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, agent_name: &str, instruction: &str) -> anyhow::Result<AgentOutcome> {
            Ok(AgentOutcome { output: Value::String(format!("[{agent_name}] done: {instruction}")), tokens_used: 5, cost_usd: 0.0 })
        }
        fn known_agents(&self) -> Vec<String> {
            vec!["KM_AGENT".into(), "PROCESS_AGENT".into(), "TALENT_AGENT".into(), "DECISION_AGENT".into()]
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl Executor for FailingExecutor {
        async fn execute(&self, _agent_name: &str, _instruction: &str) -> anyhow::Result<AgentOutcome> {
            anyhow::bail!("agent unreachable")
        }
        fn known_agents(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn context(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), Value::String(v.to_string()))).collect()
    }

    #[tokio::test]
    async fn sequential_workflow_threads_outputs_between_steps() {
        let engine = WorkflowEngine::new(Arc::new(EchoExecutor));
        let result = engine.execute("knowledge_immortalization", context(&[("topic", "customer onboarding SOP")])).await;
        assert!(result.succeeded);
        assert_eq!(result.step_results.len(), 3);
        let step3 = result.final_context.get("step3_talent").unwrap().as_str().unwrap();
        assert!(step3.contains("TALENT_AGENT"));
    }

    #[tokio::test]
    async fn parallel_then_merge_combines_both_branch_outputs() {
        let engine = WorkflowEngine::new(Arc::new(EchoExecutor));
        let result = engine.execute("decision_support", context(&[("topic", "should we centralize support")])).await;
        assert!(result.succeeded);
        let merged = result.final_context.get("step2_merge").unwrap().as_str().unwrap().to_string();
        assert!(merged.contains("PROCESS_AGENT"));
        assert!(merged.contains("TALENT_AGENT"));
    }

    #[tokio::test]
    async fn quality_retry_loop_passes_on_first_good_output() {
        let engine = WorkflowEngine::new(Arc::new(EchoExecutor));
        let result = engine.execute("quality_retry", context(&[("topic", "Q3 retention report"), ("feedback", "")])).await;
        assert!(result.succeeded);
        assert_eq!(result.step_results[0].iterations, 1);
    }

    #[tokio::test]
    async fn unknown_workflow_id_fails_without_panicking() {
        let engine = WorkflowEngine::new(Arc::new(EchoExecutor));
        let result = engine.execute("does_not_exist", HashMap::new()).await;
        assert!(!result.succeeded);
        assert!(result.step_results.is_empty());
    }

    #[tokio::test]
    async fn agent_failure_is_reflected_without_retry_in_sequential_flow() {
        let engine = WorkflowEngine::new(Arc::new(FailingExecutor));
        let result = engine.execute("knowledge_immortalization", context(&[("topic", "x")])).await;
        assert!(!result.succeeded);
        assert_eq!(result.step_results[0].outcome, StepOutcome::Failed);
    }
}
