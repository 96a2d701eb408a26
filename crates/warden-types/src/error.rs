use thiserror::Error;

/// Unified error taxonomy for the execution and governance fabric.
///
/// Propagation policy: `Notifier` failures and LLM/JSON parse failures
/// recover locally (the caller falls back to a rule-based path); every
/// other variant surfaces to the caller carrying an identifier for
/// correlation (`task_id`, `request_id`).
#[derive(Debug, Error)]
pub enum WardenError {
    /// Unknown agent, unknown workflow id, malformed plan JSON from an
    /// LLM, or an invalid condition AST node. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The task is blocked by a non-approved HITL status.
    #[error("awaiting approval: {request_id}")]
    Gated { request_id: String },

    /// Arbitrary failure raised by the host-provided `Executor`.
    #[error("executor failed: {0}")]
    Executor(String),

    /// The backing store is unavailable or returned an unexpected error.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A webhook/notifier call failed. Logged only; never changes task
    /// or approval state.
    #[error("notifier error: {0}")]
    Notifier(String),
}

impl WardenError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }
}

impl From<rusqlite::Error> for WardenError {
    fn from(err: rusqlite::Error) -> Self {
        WardenError::Persistence(err.to_string())
    }
}

pub type WardenResult<T> = Result<T, WardenError>;
