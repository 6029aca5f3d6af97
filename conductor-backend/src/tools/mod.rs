pub mod builtin;
pub mod registry;
pub mod types;

pub use builtin::TokenTable;
pub use registry::{Tool, ToolRegistry};
pub use types::{PropertySchema, ToolCategory, ToolContext, ToolDefinition, ToolInputSchema};

use std::sync::Arc;

/// Register all built-in tools to a registry
pub fn register_all_tools(registry: &mut ToolRegistry, tokens: Arc<TokenTable>) {
    // Market data
    registry.register(Arc::new(builtin::TokenLookupTool::new(tokens.clone())));

    // Wallet helpers
    registry.register(Arc::new(builtin::ToRawAmountTool::new(tokens)));
}

/// Create a registry with every built-in tool
pub fn create_default_registry(tokens: Arc<TokenTable>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_all_tools(&mut registry, tokens);
    log::info!("[REGISTRY] Registered {} tools: {:?}", registry.len(), registry.all_names());
    registry
}
