use crate::agents::agent::{validate_prompt, Agent, InvocationStage};
use crate::agents::default_agent::conversation;
use crate::agents::types::{AgentDescriptor, AgentResponse, ChatRequest};
use crate::ai::{CompletionRequest, LlmClient};
use crate::error::AgentError;
use crate::tools::{ToolContext, ToolRegistry};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Descriptor-driven specialist: offers its declared tools to the model and
/// runs whichever one the model picks.
pub struct ToolCallingAgent {
    descriptor: AgentDescriptor,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
}

impl ToolCallingAgent {
    pub fn new(descriptor: AgentDescriptor, llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self { descriptor, llm, tools }
    }

    fn tool_context(request: &ChatRequest) -> ToolContext {
        let mut context = ToolContext::new()
            .with_wallet(request.wallet_address.clone(), request.chain_id.clone());
        if let Some(conversation_id) = &request.conversation_id {
            context = context.with_conversation(conversation_id.clone());
        }
        context
    }
}

#[async_trait]
impl Agent for ToolCallingAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    fn validate(&self, request: &ChatRequest) -> Option<AgentResponse> {
        if let Some(rejection) = validate_prompt(request) {
            return Some(rejection);
        }
        let has_wallet = request
            .wallet_address
            .as_deref()
            .is_some_and(|w| !w.trim().is_empty());
        if self.descriptor.requires_wallet && !has_wallet {
            return Some(AgentResponse::needs_info(
                "Please connect your wallet so I can complete this request.",
            ));
        }
        None
    }

    async fn process(&self, request: &ChatRequest) -> Result<AgentResponse, AgentError> {
        let definitions = self.tools.definitions_for(&self.descriptor.tools);
        let completion = self
            .llm
            .complete(CompletionRequest::new(conversation(&self.descriptor, request)).with_tools(definitions))
            .await
            .map_err(AgentError::internal)?;
        let usage = completion.usage.to_value();

        let response = match completion.tool_calls.into_iter().next() {
            Some(call) => {
                log::info!(
                    "[AGENT:{}] {}: model requested '{}'",
                    self.descriptor.name,
                    InvocationStage::ToolDispatch,
                    call.name
                );
                self.execute_tool(&call.name, call.arguments, request).await?
            }
            None if completion.content.trim().is_empty() => {
                return Err(AgentError::internal("model returned neither text nor a tool call"));
            }
            None => AgentResponse::success(completion.content.trim()),
        };

        Ok(response.with_metadata("token_usage", usage))
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        request: &ChatRequest,
    ) -> Result<AgentResponse, AgentError> {
        if !self.descriptor.tools.iter().any(|t| t == name) {
            return Err(AgentError::validation(format!("Unsupported tool: {}", name)));
        }

        let result = self
            .tools
            .execute(name, arguments, &Self::tool_context(request))
            .await?;

        let message = result
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| result.to_string());

        Ok(AgentResponse::success(message).with_metadata("tool_result", json!({ "tool": name, "result": result })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{ResponseType, GENERIC_ERROR_MESSAGE};
    use crate::ai::{Completion, ToolCall};
    use crate::telemetry::TokenUsage;
    use crate::test_support::ScriptedLlm;
    use crate::tools::{create_default_registry, TokenTable};

    const TOKENS: &str = r#"{ "base": { "USDC": (address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", decimals: 6, name: "USD Coin") } }"#;

    fn agent(llm: Arc<ScriptedLlm>, requires_wallet: bool) -> ToolCallingAgent {
        let tokens = Arc::new(TokenTable::from_ron_str(TOKENS).unwrap());
        let mut descriptor = AgentDescriptor::new("token_agent", "Token analyst", "Resolve tokens")
            .with_tools(&["token_lookup"]);
        descriptor.requires_wallet = requires_wallet;
        ToolCallingAgent::new(descriptor, llm, Arc::new(create_default_registry(tokens)))
    }

    fn tool_call(name: &str, arguments: Value) -> Completion {
        Completion {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments,
            }],
            usage: TokenUsage::new(20, 4, 0),
        }
    }

    #[tokio::test]
    async fn test_dispatches_model_tool_call() {
        let llm = ScriptedLlm::new(vec![Ok(tool_call("token_lookup", json!({"symbol": "usdc"})))]);
        let agent = agent(llm.clone(), false);

        let response = agent.chat(&ChatRequest::new("what is the USDC address?")).await;
        assert_eq!(response.response_type, ResponseType::Success);
        assert!(response.content.contains("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"));

        let metadata = response.metadata.as_ref().unwrap();
        assert_eq!(metadata["tool_result"]["tool"], "token_lookup");
        assert_eq!(TokenUsage::from_metadata(Some(metadata)), Some(TokenUsage::new(20, 4, 0)));

        // Only declared tools are offered
        let offered: Vec<String> = llm.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
        assert_eq!(offered, vec!["token_lookup"]);
    }

    #[tokio::test]
    async fn test_undeclared_tool_is_a_validation_error() {
        let llm = ScriptedLlm::new(vec![Ok(tool_call("to_raw_amount", json!({"amount": "1", "decimals": 6})))]);
        let response = agent(llm, false).chat(&ChatRequest::new("convert 1 usdc")).await;
        assert!(response.is_error());
        assert_eq!(response.message(), "Unsupported tool: to_raw_amount");
    }

    #[tokio::test]
    async fn test_tool_failure_is_hidden() {
        let llm = ScriptedLlm::new(vec![Ok(tool_call("token_lookup", json!({"symbol": "DOGE"})))]);
        let response = agent(llm, false).chat(&ChatRequest::new("doge address")).await;
        assert!(response.is_error());
        assert_eq!(response.message(), GENERIC_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_wallet_requirement() {
        let llm = ScriptedLlm::new(vec![Ok(Completion::text("Ready to swap"))]);
        let agent = agent(llm.clone(), true);

        let response = agent.chat(&ChatRequest::new("swap")).await;
        assert_eq!(response.response_type, ResponseType::NeedsInfo);
        assert_eq!(llm.calls(), 0);

        let response = agent.chat(&ChatRequest::new("swap").with_wallet("0xabc", None)).await;
        assert_eq!(response.content, "Ready to swap");
    }
}
