use crate::agents::types::{AgentDescriptor, AgentResponse, ChatRequest, GENERIC_ERROR_MESSAGE};
use crate::error::AgentError;
use async_trait::async_trait;
use serde_json::Value;
use strum::Display;

/// Position of a single agent invocation, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum InvocationStage {
    Received,
    Validating,
    Rejected,
    Processing,
    ToolDispatch,
    Completed,
}

/// Shared validation: the prompt must not be empty
pub fn validate_prompt(request: &ChatRequest) -> Option<AgentResponse> {
    if request.has_prompt() {
        None
    } else {
        Some(AgentResponse::error("Prompt cannot be empty"))
    }
}

/// The uniform contract every agent implements.
///
/// Callers only use [`Agent::chat`]; it runs `validate` then `process` and
/// turns every `AgentError` into a response. Validation errors are shown to
/// the user as-is, internal errors are logged and replaced with a generic
/// message.
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Return a response to reject the request, or `None` to proceed
    fn validate(&self, request: &ChatRequest) -> Option<AgentResponse> {
        validate_prompt(request)
    }

    async fn process(&self, request: &ChatRequest) -> Result<AgentResponse, AgentError>;

    /// Dispatch a tool call chosen by the model
    async fn execute_tool(
        &self,
        name: &str,
        _arguments: Value,
        _request: &ChatRequest,
    ) -> Result<AgentResponse, AgentError> {
        Err(AgentError::validation(format!("Unsupported tool: {}", name)))
    }

    async fn chat(&self, request: &ChatRequest) -> AgentResponse {
        let name = self.name().to_string();
        log::debug!("[AGENT:{}] {}", name, InvocationStage::Received);

        log::debug!("[AGENT:{}] {}", name, InvocationStage::Validating);
        if let Some(rejection) = self.validate(request) {
            log::info!(
                "[AGENT:{}] {}: {}",
                name,
                InvocationStage::Rejected,
                rejection.message()
            );
            return rejection;
        }

        log::debug!("[AGENT:{}] {}", name, InvocationStage::Processing);
        let response = match self.process(request).await {
            Ok(response) => response,
            Err(AgentError::Validation(message)) => {
                log::info!("[AGENT:{}] Validation error: {}", name, message);
                AgentResponse::error(message)
            }
            Err(AgentError::Internal(detail)) => {
                log::error!("[AGENT:{}] Internal error: {}", name, detail);
                AgentResponse::error(GENERIC_ERROR_MESSAGE)
            }
        };

        log::debug!(
            "[AGENT:{}] {} ({})",
            name,
            InvocationStage::Completed,
            response.response_type
        );
        response
    }

    /// Release held resources. Optional.
    async fn cleanup(&self) {}
}
