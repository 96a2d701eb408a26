//! Scores agent output quality on a 0.0–1.0 scale, either by heuristic
//! (structure, content richness, task-relevance) or, when a chat backend
//! is wired in and willing, by an LLM judge across four named dimensions.
//! The heuristic path is the judge's fallback when the LLM call fails or
//! returns something unparseable — evaluation must never hard-fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use warden_config::EvalConfig;
use warden_providers::Chat;

#[derive(Debug, Clone)]
pub struct EvalRecord {
    pub agent_name: String,
    pub task: String,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
    pub feedback: String,
    pub dimensions: HashMap<String, f64>,
    pub judge_mode: &'static str,
}

/// Rolling per-agent evaluation statistics, derived from every scored
/// output recorded so far.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentEvalStats {
    pub count: usize,
    pub avg_score: f64,
    pub pass_rate: f64,
    pub latest_score: f64,
}

/// Per-agent score history backing [`AgentEvalStats`]. Shared by
/// [`EvalEngine`] and [`LlmJudgeEvalEngine`] (the latter delegates to its
/// fallback's history so keyword and LLM-judge scores accumulate together).
#[derive(Debug, Default)]
struct ScoreHistory {
    by_agent: Mutex<HashMap<String, Vec<f64>>>,
}

impl ScoreHistory {
    fn record(&self, agent_name: &str, score: f64) {
        self.by_agent.lock().unwrap_or_else(|e| e.into_inner()).entry(agent_name.to_string()).or_default().push(score);
    }

    fn stats(&self, agent_name: &str, pass_score: f64) -> AgentEvalStats {
        let by_agent = self.by_agent.lock().unwrap_or_else(|e| e.into_inner());
        let Some(scores) = by_agent.get(agent_name).filter(|s| !s.is_empty()) else {
            return AgentEvalStats { count: 0, avg_score: 0.0, pass_rate: 0.0, latest_score: 0.0 };
        };
        let count = scores.len();
        let avg_score = scores.iter().sum::<f64>() / count as f64;
        let pass_rate = scores.iter().filter(|s| **s >= pass_score).count() as f64 / count as f64;
        AgentEvalStats { count, avg_score, pass_rate, latest_score: *scores.last().unwrap() }
    }
}

/// Heuristic quality scorer: no LLM involved, used both standalone and as
/// the LLM judge's fallback.
#[derive(Debug, Default)]
pub struct EvalEngine {
    pub pass_score: f64,
    history: ScoreHistory,
}

impl EvalEngine {
    pub fn new(pass_score: f64) -> Self {
        Self { pass_score, history: ScoreHistory::default() }
    }

    pub fn evaluate(&self, agent_name: &str, task: &str, output: &str) -> EvalRecord {
        let scores = [eval_structure(output), eval_content_richness(output), eval_relevance(task, output)];
        let final_score = scores.iter().sum::<f64>() / scores.len() as f64;
        self.history.record(agent_name, final_score);

        EvalRecord {
            agent_name: agent_name.to_string(),
            task: task.to_string(),
            score: final_score,
            timestamp: Utc::now(),
            feedback: String::new(),
            dimensions: HashMap::new(),
            judge_mode: "keyword",
        }
    }

    pub fn is_passing(&self, score: f64) -> bool {
        score >= self.pass_score
    }

    pub fn agent_stats(&self, agent_name: &str) -> AgentEvalStats {
        self.history.stats(agent_name, self.pass_score)
    }
}

fn eval_structure(output: &str) -> f64 {
    let mut score: f64 = 0.3;
    if output.contains('#') {
        score += 0.2;
    }
    if output.contains('-') || output.contains('*') {
        score += 0.2;
    }
    if output.lines().count() >= 3 {
        score += 0.15;
    }
    if output.contains(':') {
        score += 0.15;
    }
    score.min(1.0)
}

fn eval_content_richness(output: &str) -> f64 {
    let length = output.chars().count();
    if length >= 500 {
        1.0
    } else if length >= 200 {
        0.8
    } else if length >= 100 {
        0.6
    } else if length >= 50 {
        0.4
    } else {
        0.2
    }
}

fn eval_relevance(task: &str, output: &str) -> f64 {
    let task_words: std::collections::HashSet<String> =
        task.to_lowercase().replace(['\'', '"'], "").split_whitespace().map(|w| w.to_string()).collect();
    if task_words.is_empty() {
        return 0.5;
    }
    let output_lower = output.to_lowercase();
    let matches = task_words.iter().filter(|w| output_lower.contains(w.as_str())).count();
    (matches as f64 / task_words.len() as f64).min(1.0)
}

#[derive(Debug, Deserialize)]
struct LlmJudgeVerdict {
    overall_score: f64,
    #[serde(default)]
    dimensions: HashMap<String, f64>,
    #[serde(default)]
    feedback: String,
}

fn judge_prompt(agent_name: &str, task: &str, output: &str) -> String {
    format!(
        "You are a strict reviewer of AI agent output quality.\n\n\
         Task: {task}\n\
         Agent: {agent_name}\n\
         Output:\n{output}\n\n\
         Score each dimension 0.0-1.0: task_completion, accuracy, clarity, actionability. \
         Then give an overall score.\n\n\
         Respond with strict JSON only: {{\"overall_score\": 0.0, \"dimensions\": \
         {{\"task_completion\": 0.0, \"accuracy\": 0.0, \"clarity\": 0.0, \"actionability\": 0.0}}, \
         \"feedback\": \"...\", \"pass\": true}}"
    )
}

/// Multi-dimension LLM-as-judge evaluator. Falls back to [`EvalEngine`]'s
/// heuristic when no chat backend is configured, the call errors, or the
/// response cannot be parsed as the expected JSON shape.
pub struct LlmJudgeEvalEngine {
    fallback: EvalEngine,
    chat: Option<Arc<dyn Chat>>,
}

impl LlmJudgeEvalEngine {
    pub fn new(config: &EvalConfig, chat: Option<Arc<dyn Chat>>) -> Self {
        Self { fallback: EvalEngine::new(config.passing_threshold), chat: if config.use_llm_judge { chat } else { None } }
    }

    pub async fn evaluate(&self, agent_name: &str, task: &str, output: &str) -> EvalRecord {
        let Some(chat) = &self.chat else {
            return self.fallback.evaluate(agent_name, task, output);
        };

        match chat.complete(&judge_prompt(agent_name, task, output)).await {
            Ok(response) => match parse_judge_response(&response) {
                Some(verdict) => {
                    let score = verdict.overall_score.clamp(0.0, 1.0);
                    self.fallback.history.record(agent_name, score);
                    EvalRecord {
                        agent_name: agent_name.to_string(),
                        task: task.to_string(),
                        score,
                        timestamp: Utc::now(),
                        feedback: verdict.feedback,
                        dimensions: verdict.dimensions.into_iter().map(|(k, v)| (k, v.clamp(0.0, 1.0))).collect(),
                        judge_mode: "llm",
                    }
                }
                None => {
                    tracing::warn!("llm judge response did not parse, falling back to keyword eval");
                    self.fallback.evaluate(agent_name, task, output)
                }
            },
            Err(err) => {
                tracing::warn!(%err, "llm judge call failed, falling back to keyword eval");
                self.fallback.evaluate(agent_name, task, output)
            }
        }
    }

    pub fn is_passing(&self, score: f64) -> bool {
        self.fallback.is_passing(score)
    }

    pub fn agent_stats(&self, agent_name: &str) -> AgentEvalStats {
        self.fallback.agent_stats(agent_name)
    }
}

fn parse_judge_response(response: &str) -> Option<LlmJudgeVerdict> {
    serde_json::from_str(response).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn short_low_structure_output_scores_low() {
        let engine = EvalEngine::new(0.7);
        let record = engine.evaluate("km_agent", "summarize quarterly revenue", "ok");
        assert!(!engine.is_passing(record.score));
    }

    #[test]
    fn well_structured_relevant_output_scores_high() {
        let engine = EvalEngine::new(0.7);
        let task = "summarize quarterly revenue trends";
        let output = "# Quarterly Revenue Summary\n\n- Revenue: up 12%\n- Key driver: new enterprise contracts\n- Outlook: stable\n\nSummary: revenue trends remain positive across all regions this quarter.";
        let record = engine.evaluate("km_agent", task, output);
        assert!(engine.is_passing(record.score));
    }

    #[test]
    fn agent_stats_track_count_avg_and_pass_rate() {
        let engine = EvalEngine::new(0.7);
        let stats = engine.agent_stats("km_agent");
        assert_eq!(stats.count, 0);

        engine.evaluate("km_agent", "summarize revenue", "ok");
        let task = "summarize quarterly revenue trends";
        let output = "# Quarterly Revenue Summary\n\n- Revenue: up 12%\n- Key driver: new enterprise contracts\n- Outlook: stable\n\nSummary: revenue trends remain positive across all regions this quarter.";
        let record = engine.evaluate("km_agent", task, output);

        let stats = engine.agent_stats("km_agent");
        assert_eq!(stats.count, 2);
        assert_eq!(stats.latest_score, record.score);
        assert_eq!(stats.pass_rate, 0.5);
    }

    struct StubChat(&'static str);

    #[async_trait]
    impl Chat for StubChat {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn malformed_llm_response_falls_back_to_keyword_eval() {
        let config = EvalConfig { passing_threshold: 0.7, use_llm_judge: true };
        let chat: Arc<dyn Chat> = Arc::new(StubChat("not json"));
        let engine = LlmJudgeEvalEngine::new(&config, Some(chat));
        let record = engine.evaluate("km_agent", "summarize revenue", "ok").await;
        assert_eq!(record.judge_mode, "keyword");
    }

    #[tokio::test]
    async fn valid_llm_response_is_used_directly() {
        let config = EvalConfig { passing_threshold: 0.7, use_llm_judge: true };
        let chat: Arc<dyn Chat> =
            Arc::new(StubChat(r#"{"overall_score": 0.92, "dimensions": {"accuracy": 0.9}, "feedback": "solid", "pass": true}"#));
        let engine = LlmJudgeEvalEngine::new(&config, Some(chat));
        let record = engine.evaluate("km_agent", "summarize revenue", "...").await;
        assert_eq!(record.judge_mode, "llm");
        assert!((record.score - 0.92).abs() < f64::EPSILON);

        let stats = engine.agent_stats("km_agent");
        assert_eq!(stats.count, 1);
        assert!((stats.latest_score - 0.92).abs() < f64::EPSILON);
    }
}
