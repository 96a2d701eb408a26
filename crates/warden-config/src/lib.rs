//! Environment-driven configuration, scaled down from the layered
//! global/project/managed merge the teacher uses for a full application
//! config: Warden is a library embedded by a host process, so there is no
//! workspace root or CLI surface of its own — only typed defaults with an
//! environment-variable override per knob, read once at construction.

use std::env;
use std::time::Duration;

/// Knobs for the [`warden-hitl`](../warden_hitl) gate. Mirrors
/// `HITLManager`'s class attributes in the reference harness.
#[derive(Debug, Clone)]
pub struct HitlConfig {
    pub db_path: String,
    pub require_approval_for_medium: bool,
    pub timeout_hours: f64,
    pub slack_webhook_url: Option<String>,
    pub generic_webhook_url: Option<String>,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/hitl.db".to_string(),
            require_approval_for_medium: false,
            timeout_hours: 24.0,
            slack_webhook_url: None,
            generic_webhook_url: None,
        }
    }
}

impl HitlConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: env_string("HITL_DB_PATH", &defaults.db_path),
            require_approval_for_medium: env_bool("HITL_REQUIRE_MED", defaults.require_approval_for_medium),
            timeout_hours: env_f64("HITL_TIMEOUT_HOURS", defaults.timeout_hours),
            slack_webhook_url: env_opt_string("SLACK_WEBHOOK_URL"),
            generic_webhook_url: env_opt_string("HITL_WEBHOOK_URL"),
        }
    }
}

/// Knobs for the [`warden-queue`](../warden_queue) worker pool.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub db_path: String,
    pub num_workers: usize,
    pub default_max_retries: u32,
    pub webhook_timeout: Duration,
    /// A `RUNNING` row older than this with no completion is treated as
    /// orphaned by a crashed worker and requeued with its retry count bumped.
    pub stale_running_reclaim: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/tasks.db".to_string(),
            num_workers: 4,
            default_max_retries: 3,
            webhook_timeout: Duration::from_secs(5),
            stale_running_reclaim: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: env_string("TASK_QUEUE_DB_PATH", &defaults.db_path),
            num_workers: env_usize("TASK_QUEUE_WORKERS", defaults.num_workers),
            default_max_retries: env_u32("TASK_QUEUE_MAX_RETRIES", defaults.default_max_retries),
            webhook_timeout: Duration::from_secs(env_u64("TASK_QUEUE_WEBHOOK_TIMEOUT_SECS", defaults.webhook_timeout.as_secs())),
            stale_running_reclaim: Duration::from_secs(env_u64("TASK_QUEUE_STALE_RECLAIM_SECS", defaults.stale_running_reclaim.as_secs())),
        }
    }
}

/// Knobs for the [`warden-eval`](../warden_eval) engine.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub passing_threshold: f64,
    pub use_llm_judge: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self { passing_threshold: 0.7, use_llm_judge: false }
    }
}

impl EvalConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            passing_threshold: env_f64("EVAL_PASS_THRESHOLD", defaults.passing_threshold),
            use_llm_judge: env_bool("EVAL_USE_LLM_JUDGE", defaults.use_llm_judge),
        }
    }
}

/// Knobs for the [`warden-risk`](../warden_risk) assessor.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub use_semantic_assessor: bool,
    /// A semantic (LLM) verdict only overrides the keyword verdict when its
    /// reported confidence meets this bar.
    pub semantic_confidence_floor: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self { use_semantic_assessor: false, semantic_confidence_floor: 0.8 }
    }
}

impl RiskConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            use_semantic_assessor: env_bool("RISK_USE_SEMANTIC", defaults.use_semantic_assessor),
            semantic_confidence_floor: env_f64("RISK_SEMANTIC_CONFIDENCE_FLOOR", defaults.semantic_confidence_floor),
        }
    }
}

/// Root configuration bundle handed to [`warden-harness`](../warden_harness)
/// at construction. Read once; Warden never hot-reloads config mid-process.
#[derive(Debug, Clone, Default)]
pub struct WardenConfig {
    pub hitl: HitlConfig,
    pub queue: QueueConfig,
    pub eval: EvalConfig,
    pub risk: RiskConfig,
    pub profiles_db_path: String,
    pub sessions_db_path: String,
}

impl WardenConfig {
    pub fn from_env() -> Self {
        Self {
            hitl: HitlConfig::from_env(),
            queue: QueueConfig::from_env(),
            eval: EvalConfig::from_env(),
            risk: RiskConfig::from_env(),
            profiles_db_path: env_string("AGENT_PROFILES_DB_PATH", "./data/agent_profiles.db"),
            sessions_db_path: env_string("SESSION_STORE_DB_PATH", "./data/sessions.db"),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_harness() {
        let hitl = HitlConfig::default();
        assert_eq!(hitl.timeout_hours, 24.0);
        assert!(!hitl.require_approval_for_medium);
    }

    #[test]
    fn env_bool_is_case_insensitive() {
        assert!(env_bool("WARDEN_CONFIG_TEST_NONEXISTENT_KEY", false) == false);
    }
}
