//! Console + rotating JSON file tracing setup, plus a small structured
//! governance-event helper layered on top of `tracing`. This is ambient,
//! cross-cutting code the fabric's other crates reach for whenever a
//! decision worth auditing happens — a risk verdict, an approval gate, a
//! workflow step outcome — rather than reinventing logging per component.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The fabric components that emit structured governance events. Used only
/// to namespace log file prefixes and the `component` field; the fabric
/// runs as a single process so there is no per-process log split.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Queue,
    Harness,
    Hitl,
    Workflow,
    Planner,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Queue => "queue",
            Component::Harness => "harness",
            Component::Hitl => "hitl",
            Component::Workflow => "workflow",
            Component::Planner => "planner",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    pub initialized_at: DateTime<Utc>,
}

/// A single governance-relevant occurrence: a task reaching the queue, a
/// risk verdict, an approval request being gated or resolved, a workflow
/// step completing, a plan being produced. Unlike a generic `detail`
/// string, the identifiers that actually correlate a decision back to the
/// task/agent/approval/workflow/plan it concerns are first-class fields —
/// every caller fills in only the ones that apply to its event and leaves
/// the rest `None`.
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceEvent<'a> {
    pub event: &'a str,
    pub component: Component,
    pub task_id: Option<&'a str>,
    pub agent_name: Option<&'a str>,
    pub approval_id: Option<&'a str>,
    pub workflow_id: Option<&'a str>,
    pub plan_id: Option<&'a str>,
    pub risk_level: Option<&'a str>,
    pub status: Option<&'a str>,
}

impl<'a> GovernanceEvent<'a> {
    /// A bare event with only the fields every emitter has: its name and
    /// which component raised it. Callers chain the `with_*` setters for
    /// whichever correlating ids their event actually carries.
    pub fn new(event: &'a str, component: Component) -> Self {
        Self {
            event,
            component,
            task_id: None,
            agent_name: None,
            approval_id: None,
            workflow_id: None,
            plan_id: None,
            risk_level: None,
            status: None,
        }
    }

    pub fn with_task(mut self, task_id: &'a str) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_agent(mut self, agent_name: &'a str) -> Self {
        self.agent_name = Some(agent_name);
        self
    }

    pub fn with_approval(mut self, approval_id: &'a str) -> Self {
        self.approval_id = Some(approval_id);
        self
    }

    pub fn with_workflow(mut self, workflow_id: &'a str) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    pub fn with_plan(mut self, plan_id: &'a str) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    pub fn with_risk_level(mut self, risk_level: &'a str) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    pub fn with_status(mut self, status: &'a str) -> Self {
        self.status = Some(status);
        self
    }
}

/// Masks free-form agent/task content before it reaches a log line,
/// keeping enough to correlate without persisting the raw text.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("[redacted len={} hash={}]", trimmed.len(), short_hash(trimmed))
}

fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub fn emit_event(level: Level, event: GovernanceEvent<'_>) {
    match level {
        Level::ERROR => tracing::error!(
            target: "warden.governance",
            component = event.component.as_str(),
            event = event.event,
            task_id = event.task_id.unwrap_or(""),
            agent_name = event.agent_name.unwrap_or(""),
            approval_id = event.approval_id.unwrap_or(""),
            workflow_id = event.workflow_id.unwrap_or(""),
            plan_id = event.plan_id.unwrap_or(""),
            risk_level = event.risk_level.unwrap_or(""),
            status = event.status.unwrap_or(""),
            "governance_event"
        ),
        Level::WARN => tracing::warn!(
            target: "warden.governance",
            component = event.component.as_str(),
            event = event.event,
            task_id = event.task_id.unwrap_or(""),
            agent_name = event.agent_name.unwrap_or(""),
            approval_id = event.approval_id.unwrap_or(""),
            workflow_id = event.workflow_id.unwrap_or(""),
            plan_id = event.plan_id.unwrap_or(""),
            risk_level = event.risk_level.unwrap_or(""),
            status = event.status.unwrap_or(""),
            "governance_event"
        ),
        _ => tracing::info!(
            target: "warden.governance",
            component = event.component.as_str(),
            event = event.event,
            task_id = event.task_id.unwrap_or(""),
            agent_name = event.agent_name.unwrap_or(""),
            approval_id = event.approval_id.unwrap_or(""),
            workflow_id = event.workflow_id.unwrap_or(""),
            plan_id = event.plan_id.unwrap_or(""),
            risk_level = event.risk_level.unwrap_or(""),
            status = event.status.unwrap_or(""),
            "governance_event"
        ),
    }
}

/// Installs a console layer (compact, human-readable) and a daily-rotating
/// JSON file layer under `logs_dir`. Safe to call more than once per
/// process (e.g. from tests); later calls are no-ops.
pub fn init_logging(logs_dir: &Path, retention_days: u64) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;
    cleanup_old_jsonl(logs_dir, retention_days)?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("warden")
        .filename_suffix("jsonl")
        .build(logs_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    let console_layer = tracing_subscriber::fmt::layer().compact().with_target(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    let info = LoggingInitInfo {
        logs_dir: logs_dir.display().to_string(),
        prefix: "warden".to_string(),
        retention_days,
        initialized_at: Utc::now(),
    };

    Ok((guard, info))
}

fn cleanup_old_jsonl(logs_dir: &Path, retention_days: u64) -> anyhow::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let prefix = "warden.";

    for entry in fs::read_dir(logs_dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if !name.starts_with(prefix) || !name.ends_with(".jsonl") {
            continue;
        }

        let date_part = name.trim_start_matches(prefix).trim_end_matches(".jsonl");
        let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };
        let Some(dt) = date.and_hms_opt(0, 0, 0) else {
            continue;
        };

        if DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc) < cutoff {
            let _ = fs::remove_file(path);
        }
    }

    Ok(())
}

pub fn canonical_logs_dir(data_root: &Path) -> PathBuf {
    data_root.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_text_masks_content() {
        let raw = "customer SSN 123-45-6789";
        let redacted = redact_text(raw);
        assert!(redacted.contains("[redacted len="));
        assert!(!redacted.contains("123-45-6789"));
    }

    #[test]
    fn canonical_logs_dir_joins_logs_folder() {
        let root = PathBuf::from("/var/lib/warden");
        assert_eq!(canonical_logs_dir(&root), PathBuf::from("/var/lib/warden/logs"));
    }

    #[test]
    fn builder_only_sets_fields_that_were_supplied() {
        let event = GovernanceEvent::new("risk.assessed", Component::Harness)
            .with_task("TASK-1")
            .with_agent("km_agent")
            .with_risk_level("high");
        assert_eq!(event.task_id, Some("TASK-1"));
        assert_eq!(event.agent_name, Some("km_agent"));
        assert_eq!(event.risk_level, Some("high"));
        assert_eq!(event.approval_id, None);
        assert_eq!(event.workflow_id, None);
        assert_eq!(event.plan_id, None);
    }
}
