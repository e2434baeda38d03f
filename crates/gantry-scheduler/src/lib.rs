//! Trigger evaluation, DAG scheduling, and the workflow run state machine
//! for Gantry.

pub mod dag;
pub mod engine;
pub mod triggers;
pub mod version;

pub use engine::WorkflowEngine;
pub use triggers::TriggerEvaluator;
pub use version::ReleaseTagMatcher;
