use std::sync::Arc;

use warden_providers::Chat;

/// One agent's contribution to a multi-step plan, ready to be merged.
pub struct AgentResult {
    pub agent_name: String,
    pub output: String,
}

/// Merges multiple agents' outputs into one report. With a chat backend
/// and a merge instruction, asks the LLM to synthesize; otherwise (or if
/// the LLM call fails) falls back to simple section concatenation.
pub struct ResultAggregator {
    chat: Option<Arc<dyn Chat>>,
}

impl ResultAggregator {
    pub fn new(chat: Option<Arc<dyn Chat>>) -> Self {
        Self { chat }
    }

    pub async fn aggregate(&self, results: &[AgentResult], merge_instruction: Option<&str>) -> String {
        if results.is_empty() {
            return String::new();
        }

        if let (Some(chat), Some(instruction)) = (&self.chat, merge_instruction) {
            if let Some(merged) = self.aggregate_with_llm(chat, results, instruction).await {
                return merged;
            }
        }

        Self::aggregate_simple(results)
    }

    async fn aggregate_with_llm(&self, chat: &Arc<dyn Chat>, results: &[AgentResult], merge_instruction: &str) -> Option<String> {
        let sections = results.iter().map(|r| format!("[{}]\n{}", r.agent_name, r.output)).collect::<Vec<_>>().join("\n\n");
        let prompt = format!("{merge_instruction}\n\nHere are each agent's output:\n\n{sections}");
        match chat.complete(&prompt).await {
            Ok(merged) => Some(merged),
            Err(err) => {
                tracing::warn!(%err, "llm result aggregation failed, falling back to simple merge");
                None
            }
        }
    }

    fn aggregate_simple(results: &[AgentResult]) -> String {
        results.iter().map(|r| format!("=== {} ===\n{}", r.agent_name, r.output)).collect::<Vec<_>>().join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_results_yield_empty_string() {
        let aggregator = ResultAggregator::new(None);
        assert_eq!(aggregator.aggregate(&[], None).await, "");
    }

    #[tokio::test]
    async fn no_llm_concatenates_with_section_headers() {
        let aggregator = ResultAggregator::new(None);
        let results = vec![
            AgentResult { agent_name: "KM_AGENT".to_string(), output: "summary one".to_string() },
            AgentResult { agent_name: "DECISION_AGENT".to_string(), output: "summary two".to_string() },
        ];
        let merged = aggregator.aggregate(&results, None).await;
        assert!(merged.contains("=== KM_AGENT ==="));
        assert!(merged.contains("=== DECISION_AGENT ==="));
    }
}
