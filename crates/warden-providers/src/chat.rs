use async_trait::async_trait;

/// The LLM provider bridge. Every semantic (as opposed to keyword-rule)
/// pass in the fabric — risk assessment, eval judging, intent
/// classification, planning, result aggregation — goes through this single
/// narrow contract rather than each component knowing about a specific
/// model API. Implementation lives entirely with the host.
#[async_trait]
pub trait Chat: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}
