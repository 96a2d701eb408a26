use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::Level;
use warden_observability::{emit_event, Component, GovernanceEvent};
use warden_providers::Chat;
use warden_types::{ExecutionPlan, PlanType, SubTask};

use crate::intent::default_agent_keywords;

fn plan_type_str(plan_type: PlanType) -> &'static str {
    match plan_type {
        PlanType::Single => "single",
        PlanType::Sequential => "sequential",
        PlanType::Parallel => "parallel",
    }
}

/// Triggers implying the second clause depends on the first's output —
/// "do X, then do Y".
const SEQUENTIAL_TRIGGERS: &[&str] = &["then", "and then", "after that", "afterwards", "followed by", "然後", "接著", "之後"];

/// Triggers implying independent clauses that can run side by side.
const PARALLEL_TRIGGERS: &[&str] = &["and also", "at the same time", "meanwhile", "in parallel", "同時", "並且"];

/// A compound instruction is split into at most this many sub-tasks; any
/// remaining clauses are folded into the final one rather than dropped.
const MAX_SUB_TASKS: usize = 5;

fn detect_compound_plan_type(instruction_lower: &str) -> Option<PlanType> {
    if SEQUENTIAL_TRIGGERS.iter().any(|t| instruction_lower.contains(t)) {
        Some(PlanType::Sequential)
    } else if PARALLEL_TRIGGERS.iter().any(|t| instruction_lower.contains(t)) {
        Some(PlanType::Parallel)
    } else {
        None
    }
}

/// Splits `instruction` on every occurrence of a trigger in `triggers`,
/// matching case-insensitively but slicing the original (cased) text.
fn split_on_triggers(instruction: &str, triggers: &[&str]) -> Vec<String> {
    let lower = instruction.to_lowercase();
    let mut cuts: Vec<(usize, usize)> = Vec::new();
    for trigger in triggers {
        let mut search_from = 0;
        while let Some(offset) = lower[search_from..].find(trigger) {
            let start = search_from + offset;
            let end = start + trigger.len();
            cuts.push((start, end));
            search_from = end;
        }
    }
    cuts.sort_unstable();

    let mut segments = Vec::new();
    let mut last_end = 0;
    for (start, end) in cuts {
        if start < last_end {
            continue;
        }
        segments.push(instruction[last_end..start].trim().to_string());
        last_end = end;
    }
    segments.push(instruction[last_end..].trim().to_string());
    segments.retain(|s| !s.is_empty());
    segments
}

fn best_agent_for(text_lower: &str, known: &HashMap<&'static str, Vec<&'static str>>) -> String {
    known
        .iter()
        .map(|(agent, keywords)| (*agent, keywords.iter().filter(|kw| text_lower.contains(*kw)).count()))
        .filter(|(_, score)| *score > 0)
        .max_by_key(|(_, score)| *score)
        .map(|(agent, _)| agent.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum LlmPlanVerdict {
    Single { agent: String, task: String },
    Sequential { steps: Vec<LlmStep>, #[serde(default)] merge_instruction: Option<String> },
    Parallel { steps: Vec<LlmStep>, #[serde(default)] merge_instruction: Option<String> },
}

#[derive(Debug, Deserialize)]
struct LlmStep {
    agent: String,
    task: String,
}

fn planner_prompt(instruction: &str) -> String {
    format!(
        "You are the task planner for a multi-agent enterprise system. Decide whether the \
         user's instruction needs one agent or several working together.\n\n\
         Available agents: KM_AGENT, PROCESS_AGENT, TALENT_AGENT, DECISION_AGENT.\n\n\
         If one agent suffices: {{\"type\": \"single\", \"agent\": \"NAME\", \"task\": \"...\"}}\n\
         If agents must run in order (each consuming the previous output): \
         {{\"type\": \"sequential\", \"steps\": [{{\"agent\": \"NAME\", \"task\": \"...\"}}]}}\n\
         If agents can run independently and be merged: \
         {{\"type\": \"parallel\", \"steps\": [...], \"merge_instruction\": \"...\"}}\n\n\
         Instruction: {instruction}"
    )
}

/// Breaks a user instruction into an [`ExecutionPlan`]. Tries an LLM pass
/// first; falls back to counting keyword hits per known agent (0 hits →
/// best partial match or `UNKNOWN`, 1 hit → single agent, 2+ → sequential).
pub struct TaskPlanner {
    chat: Option<Arc<dyn Chat>>,
}

impl TaskPlanner {
    pub fn new(chat: Option<Arc<dyn Chat>>) -> Self {
        Self { chat }
    }

    pub async fn plan(&self, instruction: &str) -> ExecutionPlan {
        let plan = match &self.chat {
            Some(chat) => match self.plan_with_llm(chat, instruction).await {
                Some(plan) => plan,
                None => self.plan_with_keywords(instruction),
            },
            None => self.plan_with_keywords(instruction),
        };

        emit_event(
            Level::INFO,
            GovernanceEvent::new("plan.produced", Component::Planner)
                .with_agent(&plan.steps[0].agent_name)
                .with_status(plan_type_str(plan.plan_type)),
        );
        plan
    }

    async fn plan_with_llm(&self, chat: &Arc<dyn Chat>, instruction: &str) -> Option<ExecutionPlan> {
        let response = chat.complete(&planner_prompt(instruction)).await.ok()?;
        let text = strip_code_fence(response.trim());
        let verdict: LlmPlanVerdict = serde_json::from_str(&text).ok()?;
        let known = default_agent_keywords();

        let plan = match verdict {
            LlmPlanVerdict::Single { agent, task } => {
                if !known.contains_key(agent.as_str()) {
                    return None;
                }
                ExecutionPlan { plan_type: PlanType::Single, steps: vec![SubTask { agent_name: agent, task, depends_on: Vec::new() }], merge_instruction: None }
            }
            LlmPlanVerdict::Sequential { steps, merge_instruction } => {
                let steps = filter_known_steps(steps, &known);
                if steps.is_empty() {
                    return None;
                }
                ExecutionPlan { plan_type: PlanType::Sequential, steps, merge_instruction }
            }
            LlmPlanVerdict::Parallel { steps, merge_instruction } => {
                let steps = filter_known_steps(steps, &known);
                if steps.is_empty() {
                    return None;
                }
                ExecutionPlan { plan_type: PlanType::Parallel, steps, merge_instruction }
            }
        };
        Some(plan)
    }

    fn plan_with_keywords(&self, instruction: &str) -> ExecutionPlan {
        let instruction_lower = instruction.to_lowercase();
        let known = default_agent_keywords();

        if let Some(plan_type) = detect_compound_plan_type(&instruction_lower) {
            let triggers = if plan_type == PlanType::Sequential { SEQUENTIAL_TRIGGERS } else { PARALLEL_TRIGGERS };
            let mut segments = split_on_triggers(instruction, triggers);
            segments.truncate(MAX_SUB_TASKS);

            if segments.len() >= 2 {
                let mut steps: Vec<SubTask> = segments
                    .iter()
                    .map(|segment| SubTask {
                        agent_name: best_agent_for(&segment.to_lowercase(), &known),
                        task: segment.clone(),
                        depends_on: Vec::new(),
                    })
                    .collect();

                if plan_type == PlanType::Sequential {
                    for i in 1..steps.len() {
                        let previous_agent = steps[i - 1].agent_name.clone();
                        steps[i].depends_on = vec![previous_agent];
                    }
                }

                return ExecutionPlan { plan_type, steps, merge_instruction: None };
            }
        }

        let matched: Vec<&str> = known
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|kw| instruction_lower.contains(kw)))
            .map(|(agent, _)| *agent)
            .collect();

        match matched.len() {
            0 => {
                let best = known
                    .iter()
                    .map(|(agent, keywords)| (*agent, keywords.iter().filter(|kw| instruction_lower.contains(*kw)).count()))
                    .filter(|(_, score)| *score > 0)
                    .max_by_key(|(_, score)| *score)
                    .map(|(agent, _)| agent)
                    .unwrap_or("UNKNOWN");
                ExecutionPlan::single(best, instruction)
            }
            1 => ExecutionPlan::single(matched[0], instruction),
            _ => ExecutionPlan {
                plan_type: PlanType::Sequential,
                steps: matched.into_iter().map(|agent| SubTask { agent_name: agent.to_string(), task: instruction.to_string(), depends_on: Vec::new() }).collect(),
                merge_instruction: None,
            },
        }
    }
}

fn filter_known_steps(steps: Vec<LlmStep>, known: &std::collections::HashMap<&'static str, Vec<&'static str>>) -> Vec<SubTask> {
    steps
        .into_iter()
        .filter(|s| known.contains_key(s.agent.as_str()))
        .map(|s| SubTask { agent_name: s.agent, task: s.task, depends_on: Vec::new() })
        .collect()
}

fn strip_code_fence(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    let mut parts = text.split("```");
    let _ = parts.next();
    let body = parts.next().unwrap_or("").trim();
    body.strip_prefix("json").unwrap_or(body).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_keyword_hit_yields_single_step_plan() {
        let planner = TaskPlanner::new(None);
        let plan = planner.plan("please extract the SOP from this document").await;
        assert_eq!(plan.plan_type, PlanType::Single);
        assert_eq!(plan.steps[0].agent_name, "KM_AGENT");
    }

    #[tokio::test]
    async fn multiple_keyword_hits_yield_sequential_plan() {
        let planner = TaskPlanner::new(None);
        let plan = planner.plan("extract knowledge from the document then analyze the risk of the decision").await;
        assert_eq!(plan.plan_type, PlanType::Sequential);
        assert!(plan.steps.len() >= 2);
    }

    #[tokio::test]
    async fn no_hits_falls_back_to_unknown_single() {
        let planner = TaskPlanner::new(None);
        let plan = planner.plan("what's the weather today").await;
        assert_eq!(plan.plan_type, PlanType::Single);
        assert_eq!(plan.steps[0].agent_name, "UNKNOWN");
    }

    #[tokio::test]
    async fn sequential_trigger_splits_into_dependent_steps() {
        let planner = TaskPlanner::new(None);
        let plan = planner.plan("extract knowledge from the SOP then analyze the decision risk").await;
        assert_eq!(plan.plan_type, PlanType::Sequential);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].agent_name, "KM_AGENT");
        assert!(plan.steps[0].depends_on.is_empty());
        assert_eq!(plan.steps[1].agent_name, "DECISION_AGENT");
        assert_eq!(plan.steps[1].depends_on, vec!["KM_AGENT".to_string()]);
    }

    #[tokio::test]
    async fn parallel_trigger_splits_into_independent_steps() {
        let planner = TaskPlanner::new(None);
        let plan = planner.plan("extract knowledge from the SOP and also analyze the decision risk").await;
        assert_eq!(plan.plan_type, PlanType::Parallel);
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.steps.iter().all(|s| s.depends_on.is_empty()));
    }

    #[tokio::test]
    async fn compound_plan_is_capped_at_five_sub_tasks() {
        let planner = TaskPlanner::new(None);
        let instruction = "extract knowledge then optimize the process then train talent then \
             analyze the decision then summarize the document then compare the data then publish the report";
        let plan = planner.plan(instruction).await;
        assert_eq!(plan.plan_type, PlanType::Sequential);
        assert_eq!(plan.steps.len(), MAX_SUB_TASKS);
    }
}
