use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use warden_providers::Chat;

/// Keyword hints per known agent, used by the fallback classifier when no
/// chat backend is wired in or the LLM call doesn't pan out.
pub fn default_agent_keywords() -> HashMap<&'static str, Vec<&'static str>> {
    HashMap::from([
        ("KM_AGENT", vec!["extract", "knowledge", "document", "sop", "summarize"]),
        ("PROCESS_AGENT", vec!["process", "optimize", "bottleneck", "reengineering", "efficiency"]),
        ("TALENT_AGENT", vec!["talent", "skill", "training", "competency", "learning path"]),
        ("DECISION_AGENT", vec!["decision", "risk", "analyze", "compare", "data"]),
    ])
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub agent_name: String,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct LlmIntentVerdict {
    agent: String,
    #[serde(default)]
    confidence: f64,
}

fn classify_prompt(agents: &HashMap<&'static str, Vec<&'static str>>, instruction: &str) -> String {
    let catalog = agents.keys().map(|a| format!("- {a}")).collect::<Vec<_>>().join("\n");
    format!(
        "You classify which agent should handle a user instruction.\n\n\
         Available agents:\n{catalog}\n\n\
         Respond with strict JSON: {{\"agent\": \"AGENT_NAME\"|\"UNKNOWN\", \"confidence\": 0.0-1.0, \"reason\": \"...\"}}\n\n\
         Instruction: {instruction}"
    )
}

/// Picks the agent that should handle an instruction. Tries an LLM pass
/// first when a chat backend is configured; falls back to keyword
/// matching otherwise, or if the LLM names an agent outside the known set.
pub struct IntentClassifier {
    agent_keywords: HashMap<&'static str, Vec<&'static str>>,
    chat: Option<Arc<dyn Chat>>,
}

impl IntentClassifier {
    pub fn new(chat: Option<Arc<dyn Chat>>) -> Self {
        Self { agent_keywords: default_agent_keywords(), chat }
    }

    pub async fn classify(&self, instruction: &str) -> Intent {
        if let Some(chat) = &self.chat {
            if let Some(intent) = self.classify_with_llm(chat, instruction).await {
                return intent;
            }
        }
        self.classify_with_keywords(instruction)
    }

    async fn classify_with_llm(&self, chat: &Arc<dyn Chat>, instruction: &str) -> Option<Intent> {
        let response = match chat.complete(&classify_prompt(&self.agent_keywords, instruction)).await {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(%err, "intent classification LLM call failed");
                return None;
            }
        };
        let text = strip_code_fence(response.trim());
        let verdict: LlmIntentVerdict = serde_json::from_str(&text).ok()?;
        if verdict.agent != "UNKNOWN" && !self.agent_keywords.contains_key(verdict.agent.as_str()) {
            return None;
        }
        Some(Intent { agent_name: verdict.agent, confidence: verdict.confidence })
    }

    fn classify_with_keywords(&self, instruction: &str) -> Intent {
        let instruction_lower = instruction.to_lowercase();
        let mut best: Option<(&str, usize)> = None;

        for (agent, keywords) in &self.agent_keywords {
            let score = keywords.iter().filter(|kw| instruction_lower.contains(*kw)).count();
            if score > 0 && best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
                best = Some((agent, score));
            }
        }

        match best {
            Some((agent, score)) => {
                let total = self.agent_keywords[agent].len();
                Intent { agent_name: agent.to_string(), confidence: (score as f64 / total as f64).min(1.0) }
            }
            None => Intent { agent_name: "UNKNOWN".to_string(), confidence: 0.0 },
        }
    }

    pub fn mode(&self) -> &'static str {
        if self.chat.is_some() {
            "llm"
        } else {
            "keyword"
        }
    }
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
