//! Contracts the host process must supply: a chat completion bridge, an
//! executor that actually runs a named domain agent, and a notifier for
//! webhook delivery. None of these are implemented here — the fabric only
//! defines the seam and a default HTTP-based notifier.

mod chat;
mod executor;
mod notifier;

pub use chat::Chat;
pub use executor::{AgentOutcome, Executor};
pub use notifier::{Notifier, WebhookNotifier};
