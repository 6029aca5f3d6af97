pub mod agents;
pub mod ai;
pub mod config;
pub mod context;
pub mod controllers;
pub mod delegator;
pub mod error;
pub mod orchestration;
pub mod progress;
pub mod telemetry;
pub mod tools;

#[cfg(test)]
mod test_support;

use agents::AgentRegistry;
use config::Config;
use delegator::Delegator;
use orchestration::OrchestrationFlow;
use progress::ProgressHub;
use std::sync::Arc;
use tools::ToolRegistry;

/// Shared state handed to every HTTP handler
pub struct AppState {
    pub config: Config,
    pub agent_registry: Arc<AgentRegistry>,
    pub tool_registry: Arc<ToolRegistry>,
    pub delegator: Arc<Delegator>,
    pub orchestration: Arc<OrchestrationFlow>,
    pub progress: ProgressHub,
}
