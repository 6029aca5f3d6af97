use crate::error::{RegistryError, ToolExecutionError};
use crate::tools::types::{ToolContext, ToolDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A named, schema-described async function an agent can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. The result is free-form but conventionally carries a
    /// human-readable `message` key.
    async fn execute(&self, params: Value, context: &ToolContext) -> Result<Value, ToolExecutionError>;
}

/// Lookup from tool name to tool.
///
/// Populated once during bootstrap, then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its definition name; a later registration with the same name wins
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            log::warn!("[REGISTRY] Tool '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ToolNotFound(name.to_string()))
    }

    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for every registered tool, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.all_names()
            .iter()
            .filter_map(|name| self.tools.get(name).map(|t| t.definition()))
            .collect()
    }

    /// Resolve declared tool names to definitions, skipping unknown ones
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| match self.tools.get(name) {
                Some(tool) => Some(tool.definition()),
                None => {
                    log::warn!("[REGISTRY] Declared tool '{}' is not registered, skipping", name);
                    None
                }
            })
            .collect()
    }

    /// Look up and run a tool
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        context: &ToolContext,
    ) -> Result<Value, ToolExecutionError> {
        let tool = self
            .get(name)
            .map_err(|e| ToolExecutionError::new(name, e.to_string()))?;
        log::info!("[TOOL] Executing '{}' with params: {}", name, params);
        tool.execute(params, context).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
