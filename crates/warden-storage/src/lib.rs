//! SQLite persistence, one store per durable concern. Every store opens
//! its own connection (WAL mode, 10s busy timeout) rather than sharing a
//! single handle across unrelated schemas — mirrors how the reference
//! harness keeps `task_queue.db`, `sessions.db`, `hitl.db` and
//! `agent_profiles.db` as separate files.

mod approvals;
mod connection;
mod profiles;
mod sessions;
mod tasks;

pub use approvals::ApprovalStore;
pub use profiles::ProfileStore;
pub use sessions::SessionStore;
pub use tasks::TaskStore;

use chrono::{DateTime, Utc};

pub(crate) fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}
