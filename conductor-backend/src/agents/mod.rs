pub mod agent;
pub mod default_agent;
pub mod registry;
pub mod tool_calling;
pub mod types;

pub use agent::{validate_prompt, Agent, InvocationStage};
pub use default_agent::DefaultAgent;
pub use registry::AgentRegistry;
pub use tool_calling::ToolCallingAgent;
pub use types::{
    AgentCatalogEntry, AgentDescriptor, AgentKind, AgentResponse, ChatRequest, ResponseType,
    GENERIC_ERROR_MESSAGE,
};

use crate::ai::LlmClient;
use crate::error::ConfigError;
use crate::tools::ToolRegistry;
use std::path::Path;
use std::sync::Arc;

/// Load agent descriptors from `agents.ron`
pub fn load_agent_descriptors(path: &Path) -> Result<Vec<AgentDescriptor>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let descriptors: Vec<AgentDescriptor> = ron::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    log::info!("[agents] Loaded {} agent descriptors from {:?}", descriptors.len(), path);
    Ok(descriptors)
}

/// Register one agent per descriptor, plus the `default` fallback if none is configured
pub fn register_all_agents(
    registry: &mut AgentRegistry,
    descriptors: Vec<AgentDescriptor>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
) {
    for descriptor in descriptors {
        let agent: Arc<dyn Agent> = match descriptor.kind {
            AgentKind::Default => Arc::new(DefaultAgent::new(descriptor, llm.clone())),
            AgentKind::ToolCalling => Arc::new(ToolCallingAgent::new(descriptor, llm.clone(), tools.clone())),
        };
        registry.register(agent);
    }

    if !registry.contains("default") {
        registry.register(Arc::new(DefaultAgent::general(llm)));
    }
}

/// Create a registry from descriptors
pub fn create_default_registry(
    descriptors: Vec<AgentDescriptor>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    register_all_agents(&mut registry, descriptors, llm, tools);
    log::info!("[REGISTRY] Registered {} agents: {:?}", registry.len(), registry.all_names());
    registry
}
