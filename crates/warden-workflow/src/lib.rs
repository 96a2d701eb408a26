//! Multi-agent workflow orchestration: AGENT, CONDITION, LOOP, PARALLEL
//! and MERGE step types composed into a directed step graph with
//! success/failure branching, driven by a sandboxed condition expression
//! language (see [`condition`]).

mod builtin;
mod condition;
mod engine;
mod template;

pub use engine::WorkflowEngine;
