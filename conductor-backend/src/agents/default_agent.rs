use crate::agents::agent::Agent;
use crate::agents::types::{AgentDescriptor, AgentKind, AgentResponse, ChatRequest};
use crate::ai::{CompletionRequest, LlmClient, Message};
use crate::error::AgentError;
use async_trait::async_trait;
use std::sync::Arc;

/// General-purpose assistant answering directly from the model
pub struct DefaultAgent {
    descriptor: AgentDescriptor,
    llm: Arc<dyn LlmClient>,
}

impl DefaultAgent {
    pub fn new(descriptor: AgentDescriptor, llm: Arc<dyn LlmClient>) -> Self {
        Self { descriptor, llm }
    }

    /// The `default` fallback agent used when nothing else is configured under that name
    pub fn general(llm: Arc<dyn LlmClient>) -> Self {
        let mut descriptor = AgentDescriptor::new(
            "default",
            "General assistant",
            "Answer general questions and help when no specialist fits",
        );
        descriptor.kind = AgentKind::Default;
        Self::new(descriptor, llm)
    }
}

/// System persona, prior turns, then the prompt
pub(crate) fn conversation(descriptor: &AgentDescriptor, request: &ChatRequest) -> Vec<Message> {
    let mut messages = Vec::with_capacity(request.chat_history.len() + 2);
    messages.push(Message::system(descriptor.persona()));
    messages.extend(request.chat_history.iter().cloned());
    messages.push(request.prompt.clone());
    messages
}

#[async_trait]
impl Agent for DefaultAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn process(&self, request: &ChatRequest) -> Result<AgentResponse, AgentError> {
        let completion = self
            .llm
            .complete(CompletionRequest::new(conversation(&self.descriptor, request)))
            .await
            .map_err(AgentError::internal)?;

        if completion.content.trim().is_empty() {
            return Err(AgentError::internal("model returned an empty answer"));
        }

        Ok(AgentResponse::success(completion.content.trim())
            .with_metadata("token_usage", completion.usage.to_value()))
    }
}
