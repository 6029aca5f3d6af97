//! Multi-agent orchestration
//!
//! A request is summarized, split into subtasks, mapped onto crews of
//! registered agents, executed concurrently and synthesized into one answer.

pub mod crew;
pub mod flow;
pub mod state;

pub use crew::{Crew, CrewOutcome, NO_AGENTS_OUTPUT};
pub use flow::{OrchestrationFlow, OrchestrationResult, DEGRADED_ANSWER, NO_HISTORY_SUMMARY};
pub use state::{Assignment, OrchestrationStage, OrchestrationState, SubtaskOutput};
