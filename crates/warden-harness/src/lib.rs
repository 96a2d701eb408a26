//! Binds the Risk Assessor, Eval Engine, HITL Gate, Session Store and
//! Agent Profile manager into the Explore-Plan-Code-Commit session
//! pipeline (see [`epcc`]), and the Task Planner, Intent Classifier and
//! Result Aggregator into the instruction dispatcher (see [`dispatcher`])
//! that a queue worker calls per task.

mod dispatcher;
mod epcc;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use epcc::{EpccHarness, EvalMode, RiskEngine, SessionResult};
