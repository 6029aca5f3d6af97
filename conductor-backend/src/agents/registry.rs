use crate::agents::agent::Agent;
use crate::agents::types::AgentCatalogEntry;
use crate::error::RegistryError;
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup from agent name to agent.
///
/// Built once during bootstrap and then shared read-only.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its descriptor name; a later registration with the same name wins
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        if self.agents.insert(name.clone(), agent).is_some() {
            log::warn!("[REGISTRY] Agent '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Agent>, RegistryError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::AgentNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Catalogue of enabled agents, sorted by name
    pub fn describe_for_llm(&self) -> Vec<AgentCatalogEntry> {
        self.all_names()
            .iter()
            .filter_map(|name| self.agents.get(name))
            .map(|agent| agent.descriptor())
            .filter(|descriptor| descriptor.enabled)
            .map(|descriptor| AgentCatalogEntry {
                name: descriptor.name.clone(),
                description: descriptor.description(),
                tools: descriptor.tools.clone(),
            })
            .collect()
    }

    /// Render catalogue entries as a markdown list for prompts
    pub fn format_catalogue(entries: &[AgentCatalogEntry]) -> String {
        entries
            .iter()
            .map(|entry| {
                if entry.tools.is_empty() {
                    format!("- **{}**: {}", entry.name, entry.description)
                } else {
                    format!(
                        "- **{}**: {} (tools: {})",
                        entry.name,
                        entry.description,
                        entry.tools.join(", ")
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Call `cleanup` on every agent, used at shutdown
    pub async fn cleanup_all(&self) {
        for name in self.all_names() {
            if let Some(agent) = self.agents.get(&name) {
                agent.cleanup().await;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
