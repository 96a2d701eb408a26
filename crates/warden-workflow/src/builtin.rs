use std::collections::HashMap;

use warden_types::{StepType, WorkflowDefinition, WorkflowStep};

fn agent_step(step_id: &str, agent_name: &str, task_template: &str) -> WorkflowStep {
    WorkflowStep {
        step_id: step_id.to_string(),
        step_type: StepType::Agent,
        agent_name: Some(agent_name.to_string()),
        task_template: Some(task_template.to_string()),
        condition: None,
        max_iterations: None,
        parallel_steps: Vec::new(),
        on_success: None,
        on_failure: None,
    }
}

/// Knowledge card extraction, process optimization, then training plan,
/// each step consuming the previous agent's output.
fn knowledge_immortalization() -> WorkflowDefinition {
    WorkflowDefinition {
        workflow_id: "knowledge_immortalization".to_string(),
        name: "Knowledge capture to training pipeline".to_string(),
        steps: vec![
            agent_step("step1_km", "KM_AGENT", "Extract and organize a knowledge card from: {topic}"),
            agent_step(
                "step2_process",
                "PROCESS_AGENT",
                "Based on the following knowledge card, optimize the related business process:\n{step1_km}",
            ),
            agent_step(
                "step3_talent",
                "TALENT_AGENT",
                "Based on the knowledge card and optimized process below, plan a training program:\nKnowledge card: {step1_km}\nOptimized process: {step2_process}",
            ),
        ],
        initial_context: HashMap::new(),
    }
}

/// Process and talent analysis run in parallel, merge, then a decision
/// agent synthesizes a recommendation.
fn decision_support() -> WorkflowDefinition {
    let parallel = WorkflowStep {
        step_id: "step1_parallel".to_string(),
        step_type: StepType::Parallel,
        agent_name: None,
        task_template: None,
        condition: None,
        max_iterations: None,
        parallel_steps: vec![
            agent_step("step1a_process", "PROCESS_AGENT", "Analyze this decision topic from a process perspective: {topic}"),
            agent_step("step1b_talent", "TALENT_AGENT", "Analyze this decision topic from a talent/capability perspective: {topic}"),
        ],
        on_success: None,
        on_failure: None,
    };
    let merge = WorkflowStep {
        step_id: "step2_merge".to_string(),
        step_type: StepType::Merge,
        agent_name: None,
        task_template: None,
        condition: None,
        max_iterations: None,
        parallel_steps: Vec::new(),
        on_success: None,
        on_failure: None,
    };
    let decision = agent_step(
        "step3_decision",
        "DECISION_AGENT",
        "Based on the multi-perspective analysis below, provide a comprehensive decision recommendation:\n{step2_merge}",
    );

    WorkflowDefinition {
        workflow_id: "decision_support".to_string(),
        name: "Parallel analysis with synthesized decision recommendation".to_string(),
        steps: vec![parallel, merge, decision],
        initial_context: HashMap::new(),
    }
}

/// Retries the same agent task until its output scores above the passing
/// threshold or `max_iterations` is exhausted.
fn quality_retry() -> WorkflowDefinition {
    let loop_step = WorkflowStep {
        step_id: "step1_loop".to_string(),
        step_type: StepType::Loop,
        agent_name: Some("KM_AGENT".to_string()),
        task_template: Some("Produce a high-quality report on: {topic}\n{feedback}".to_string()),
        condition: Some("eval_score >= 0.75".to_string()),
        max_iterations: Some(3),
        parallel_steps: Vec::new(),
        on_success: None,
        on_failure: None,
    };

    WorkflowDefinition {
        workflow_id: "quality_retry".to_string(),
        name: "Quality-gated retry loop".to_string(),
        steps: vec![loop_step],
        initial_context: HashMap::new(),
    }
}

pub fn builtin_workflows() -> Vec<WorkflowDefinition> {
    vec![knowledge_immortalization(), decision_support(), quality_retry()]
}
