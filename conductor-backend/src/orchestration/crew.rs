//! A crew is the set of agents assigned to one subtask.
//!
//! Members run one after another; each sees the subtask, the conversation
//! summary and what earlier members produced.

use crate::agents::{Agent, AgentRegistry, ChatRequest};
use crate::context::build_task_description;
use crate::orchestration::state::Assignment;
use crate::telemetry::TokenUsage;
use std::sync::Arc;

pub const NO_AGENTS_OUTPUT: &str = "No agents available to execute this task";

pub struct Crew {
    subtask: String,
    members: Vec<Arc<dyn Agent>>,
    missing: Vec<String>,
}

/// What a crew produced
#[derive(Debug, Clone)]
pub struct CrewOutcome {
    pub output: String,
    pub token_usage: TokenUsage,
    /// Names of members that answered without error
    pub succeeded: Vec<String>,
}

impl Crew {
    /// Resolve assigned names; unknown ones are skipped and remembered
    pub fn assemble(assignment: &Assignment, registry: &AgentRegistry) -> Self {
        let mut members = Vec::new();
        let mut missing = Vec::new();
        for name in &assignment.agents {
            match registry.get(name) {
                Ok(agent) => members.push(agent),
                Err(e) => {
                    log::warn!("[CREW] Skipping agent for '{}': {}", assignment.subtask, e);
                    missing.push(name.clone());
                }
            }
        }
        Self {
            subtask: assignment.subtask.clone(),
            members,
            missing,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|a| a.name().to_string()).collect()
    }

    /// Run every member in order.
    ///
    /// The output is the last successful answer; when every member fails it
    /// lists each member's error instead.
    pub async fn execute(&self, history_summary: &str, template: &ChatRequest, max_task_length: usize) -> CrewOutcome {
        if self.members.is_empty() {
            return CrewOutcome {
                output: NO_AGENTS_OUTPUT.to_string(),
                token_usage: TokenUsage::default(),
                succeeded: Vec::new(),
            };
        }

        let mut prior_outputs: Vec<(String, String)> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        let mut token_usage = TokenUsage::default();

        for agent in &self.members {
            let task = build_task_description(&self.subtask, history_summary, &prior_outputs, max_task_length);
            let response = agent.chat(&template.with_prompt(task)).await;

            if let Some(usage) = TokenUsage::from_metadata(response.metadata.as_ref()) {
                token_usage += usage;
            }

            if response.is_error() {
                log::warn!("[CREW] {} failed on '{}': {}", agent.name(), self.subtask, response.message());
                failures.push(format!("{}: {}", agent.name(), response.message()));
            } else {
                prior_outputs.push((agent.name().to_string(), response.content));
            }
        }

        let succeeded: Vec<String> = prior_outputs.iter().map(|(name, _)| name.clone()).collect();
        let output = match prior_outputs.pop() {
            Some((_, content)) => content,
            None => format!("All agents failed for this task. {}", failures.join("; ")),
        };

        CrewOutcome {
            output,
            token_usage,
            succeeded,
        }
    }
}
