//! Risk-tiered gating: a keyword rule pass always runs, an optional
//! semantic (LLM) pass may tighten the result further, and a conservative
//! combine rule means the higher of the two assessments always wins.

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use warden_config::RiskConfig;
use warden_providers::Chat;
use warden_types::RiskLevel;

const HIGH_RISK_KEYWORDS: &[&str] = &[
    "delete", "remove", "overwrite", "all records", "production", "prod",
    "customer data", "salary", "payroll", "contract", "confidential",
];

const MEDIUM_RISK_KEYWORDS: &[&str] = &[
    "modify", "update", "edit", "change", "batch", "publish", "deploy", "notify", "process change",
];

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub reason: String,
    /// `"keyword"` or `"llm"` — which pass ultimately decided the level.
    pub mode: &'static str,
}

/// One row of the in-memory assessment history: enough to reconstruct what
/// was decided and why, without keeping the full task text around.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub task_snippet: String,
    pub agent_name: String,
    pub level: RiskLevel,
    pub reason: String,
    pub mode: &'static str,
}

const AUDIT_SNIPPET_LEN: usize = 80;

fn snippet(task: &str) -> String {
    task.chars().take(AUDIT_SNIPPET_LEN).collect()
}

fn record_into(log: &Mutex<Vec<AuditEntry>>, task: &str, agent_name: &str, assessment: &RiskAssessment) {
    let entry = AuditEntry {
        task_snippet: snippet(task),
        agent_name: agent_name.to_string(),
        level: assessment.level,
        reason: assessment.reason.clone(),
        mode: assessment.mode,
    };
    log.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
}

/// Keyword-only risk assessor. Always available, never fails: every other
/// assessor in this crate falls back to this one.
#[derive(Debug, Default)]
pub struct RiskAssessor {
    audit_log: Mutex<Vec<AuditEntry>>,
}

impl RiskAssessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assess(&self, task: &str) -> RiskAssessment {
        self.assess_for(task, "")
    }

    /// Same as [`RiskAssessor::assess`] but records the agent the task was
    /// assessed for in the audit log.
    pub fn assess_for(&self, task: &str, agent_name: &str) -> RiskAssessment {
        let assessment = Self::rule_verdict(task);
        self.record(task, agent_name, &assessment);
        assessment
    }

    /// The keyword rule pass with no side effects — used standalone by
    /// [`RiskAssessor::assess_for`] and as the safety-net pass inside
    /// [`SemanticRiskAssessor`], which does its own audit logging of the
    /// combined verdict instead.
    fn rule_verdict(task: &str) -> RiskAssessment {
        let task_lower = task.to_lowercase();

        let high_matches: Vec<&str> = HIGH_RISK_KEYWORDS.iter().copied().filter(|kw| task_lower.contains(kw)).collect();
        if !high_matches.is_empty() {
            return RiskAssessment {
                level: RiskLevel::High,
                reason: format!("high risk keywords: {}", high_matches.iter().take(3).cloned().collect::<Vec<_>>().join(", ")),
                mode: "keyword",
            };
        }

        let med_matches: Vec<&str> = MEDIUM_RISK_KEYWORDS.iter().copied().filter(|kw| task_lower.contains(kw)).collect();
        if !med_matches.is_empty() {
            return RiskAssessment {
                level: RiskLevel::Medium,
                reason: format!("medium risk keywords: {}", med_matches.iter().take(3).cloned().collect::<Vec<_>>().join(", ")),
                mode: "keyword",
            };
        }

        RiskAssessment { level: RiskLevel::Low, reason: "no risk keywords detected".to_string(), mode: "keyword" }
    }

    fn record(&self, task: &str, agent_name: &str, assessment: &RiskAssessment) {
        record_into(&self.audit_log, task, agent_name, assessment);
    }

    /// The full in-memory decision history, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit_log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn requires_human_approval(level: RiskLevel) -> bool {
        matches!(level, RiskLevel::Medium | RiskLevel::High)
    }

    pub fn approval_role(level: RiskLevel) -> &'static str {
        match level {
            RiskLevel::Low => "agent autonomous execution",
            RiskLevel::Medium => "young talent monitor review",
            RiskLevel::High => "harness architect confirmation",
        }
    }
}

#[derive(Debug, Deserialize)]
struct LlmRiskVerdict {
    level: String,
    #[serde(default)]
    confidence: f64,
}

fn risk_prompt(agent_name: &str, task: &str) -> String {
    format!(
        "You are the risk assessor for an enterprise AI safety guardrail system.\n\
         Analyze the task an AI agent is about to run and classify its risk.\n\n\
         Agent: {agent_name}\n\
         Task: {task}\n\n\
         LOW: read-only or purely generative work with no destructive effect.\n\
         MEDIUM: modifications, updates, publishing or deployments that are limited in scope and reversible.\n\
         HIGH: deletion, overwriting production data, bulk changes, or anything touching customer PII, payroll or contracts.\n\n\
         Respond with strict JSON only: {{\"level\": \"LOW\"|\"MEDIUM\"|\"HIGH\", \"reason\": \"...\", \"confidence\": 0.0-1.0}}"
    )
}

fn parse_llm_verdict(response: &str) -> Option<(RiskLevel, f64)> {
    let start = response.find('{')?;
    let end = response.rfind('}')? + 1;
    let verdict: LlmRiskVerdict = serde_json::from_str(&response[start..end]).ok()?;
    let level = match verdict.level.to_uppercase().as_str() {
        "LOW" => RiskLevel::Low,
        "MEDIUM" | "MED" => RiskLevel::Medium,
        "HIGH" => RiskLevel::High,
        _ => return None,
    };
    Some((level, verdict.confidence))
}

/// Adds an LLM semantic pass in front of the keyword rule engine. The rule
/// engine always runs too; the two are combined conservatively (the higher
/// risk level wins) whenever the LLM's confidence clears the configured
/// floor, otherwise the rule engine's verdict is used outright.
pub struct SemanticRiskAssessor {
    chat: Arc<dyn Chat>,
    confidence_floor: f64,
    audit_log: Mutex<Vec<AuditEntry>>,
}

impl SemanticRiskAssessor {
    pub fn new(chat: Arc<dyn Chat>, config: &RiskConfig) -> Self {
        Self { chat, confidence_floor: config.semantic_confidence_floor, audit_log: Mutex::new(Vec::new()) }
    }

    pub async fn assess(&self, task: &str, agent_name: &str) -> RiskAssessment {
        let rule_result = RiskAssessor::rule_verdict(task);

        let llm_verdict = match self.chat.complete(&risk_prompt(agent_name, task)).await {
            Ok(response) => parse_llm_verdict(&response),
            Err(err) => {
                tracing::warn!(%err, "semantic risk assessment failed, falling back to keyword rules");
                None
            }
        };

        let assessment = match llm_verdict {
            Some((llm_level, confidence)) if confidence >= self.confidence_floor => {
                let level = std::cmp::Ord::max(llm_level, rule_result.level);
                RiskAssessment {
                    level,
                    reason: format!("semantic pass confidence={confidence:.2}, rule engine as floor"),
                    mode: "llm",
                }
            }
            Some((_, confidence)) => RiskAssessment {
                level: rule_result.level,
                reason: format!("semantic pass confidence too low ({confidence:.2}), using rule engine"),
                mode: "keyword",
            },
            None => rule_result,
        };

        record_into(&self.audit_log, task, agent_name, &assessment);
        assessment
    }

    /// The full in-memory decision history, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit_log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn high_risk_keyword_wins_over_medium() {
        let assessor = RiskAssessor::new();
        let result = assessor.assess("please delete and update the customer data");
        assert_eq!(result.level, RiskLevel::High);
    }

    #[test]
    fn no_keywords_is_low_risk() {
        let assessor = RiskAssessor::new();
        let result = assessor.assess("summarize last week's standup notes");
        assert_eq!(result.level, RiskLevel::Low);
    }

    #[test]
    fn each_assessment_is_appended_to_the_audit_log() {
        let assessor = RiskAssessor::new();
        assessor.assess_for("delete the customer data", "km_agent");
        assessor.assess_for("summarize last week's standup notes", "km_agent");

        let log = assessor.audit_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].level, RiskLevel::High);
        assert_eq!(log[0].agent_name, "km_agent");
        assert_eq!(log[1].level, RiskLevel::Low);
    }

    struct StubChat(&'static str);

    #[async_trait]
    impl Chat for StubChat {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn low_confidence_llm_falls_back_to_rules() {
        let chat: Arc<dyn Chat> = Arc::new(StubChat(r#"{"level": "LOW", "confidence": 0.2}"#));
        let assessor = SemanticRiskAssessor::new(chat, &RiskConfig::default());
        let result = assessor.assess("delete the production database", "km_agent").await;
        assert_eq!(result.level, RiskLevel::High);
        assert_eq!(result.mode, "keyword");
    }

    #[tokio::test]
    async fn confident_llm_still_cannot_downgrade_below_rules() {
        let chat: Arc<dyn Chat> = Arc::new(StubChat(r#"{"level": "LOW", "confidence": 0.95}"#));
        let assessor = SemanticRiskAssessor::new(chat, &RiskConfig::default());
        let result = assessor.assess("delete the production database", "km_agent").await;
        assert_eq!(result.level, RiskLevel::High);
        assert_eq!(result.mode, "llm");

        let log = assessor.audit_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].mode, "llm");
        assert_eq!(log[0].agent_name, "km_agent");
    }
}
