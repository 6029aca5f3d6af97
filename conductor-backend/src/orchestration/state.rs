use crate::error::OrchestrationError;
use crate::telemetry::Telemetry;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Position of a run in the five-stage pipeline. Only forward moves are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrchestrationStage {
    Initialized,
    Summarized,
    Planned,
    Assigned,
    Executed,
    Synthesized,
}

impl OrchestrationStage {
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Initialized => Some(Self::Summarized),
            Self::Summarized => Some(Self::Planned),
            Self::Planned => Some(Self::Assigned),
            Self::Assigned => Some(Self::Executed),
            Self::Executed => Some(Self::Synthesized),
            Self::Synthesized => None,
        }
    }
}

/// Agents chosen for one subtask
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub subtask: String,
    pub agents: Vec<String>,
}

/// What one assignment produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtaskOutput {
    pub subtask: String,
    pub output: String,
    pub agents: Vec<String>,
    /// Assigned names that did not resolve to a registered agent
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_agents: Vec<String>,
    pub telemetry: Telemetry,
}

/// Record threaded through one orchestration run
#[derive(Debug, Clone)]
pub struct OrchestrationState {
    pub chat_prompt: String,
    pub chat_history: Vec<String>,
    pub chat_history_summary: String,
    pub subtasks: Vec<String>,
    pub assignments: Vec<Assignment>,
    pub subtask_outputs: Vec<SubtaskOutput>,
    pub final_answer: Option<String>,
    stage: OrchestrationStage,
}

impl OrchestrationState {
    pub fn new(chat_prompt: impl Into<String>, chat_history: Vec<String>) -> Self {
        Self {
            chat_prompt: chat_prompt.into(),
            chat_history,
            chat_history_summary: String::new(),
            subtasks: Vec::new(),
            assignments: Vec::new(),
            subtask_outputs: Vec::new(),
            final_answer: None,
            stage: OrchestrationStage::Initialized,
        }
    }

    pub fn stage(&self) -> OrchestrationStage {
        self.stage
    }

    /// Move to the next stage; anything but the immediate successor is rejected
    pub fn advance(&mut self, to: OrchestrationStage) -> Result<(), OrchestrationError> {
        if self.stage.next() != Some(to) {
            return Err(OrchestrationError::InvalidTransition {
                from: self.stage.to_string(),
                to: to.to_string(),
            });
        }
        log::debug!("[ORCHESTRATION] {} -> {}", self.stage, to);
        self.stage = to;
        Ok(())
    }
}
