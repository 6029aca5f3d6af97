use crate::ai::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Message shown when an agent fails without a usable explanation
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred while processing your request";

/// Incoming chat request. Immutable once built; `with_request_id` returns a copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: Message,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(default)]
    pub chat_history: Vec<Message>,
    #[serde(default)]
    pub use_research: bool,
    #[serde(default)]
    pub use_multiagent: bool,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Message::user(prompt),
            conversation_id: None,
            wallet_address: None,
            chain_id: None,
            chat_history: Vec::new(),
            use_research: false,
            use_multiagent: false,
            request_id: None,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.chat_history = history;
        self
    }

    pub fn with_wallet(mut self, wallet_address: impl Into<String>, chain_id: Option<String>) -> Self {
        self.wallet_address = Some(wallet_address.into());
        self.chain_id = chain_id;
        self
    }

    /// Copy of this request correlated with a progress stream
    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..self.clone()
        }
    }

    /// Same context (wallet, conversation, flags) with a different prompt and no history
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            prompt: Message::user(prompt),
            chat_history: Vec::new(),
            ..self.clone()
        }
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt.content
    }

    pub fn has_prompt(&self) -> bool {
        !self.prompt.content.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseType {
    Success,
    Error,
    NeedsInfo,
    ActionRequired,
}

/// The one return type every agent produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub response_type: ResponseType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
}

impl AgentResponse {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Success,
            content: content.into(),
            error_message: None,
            metadata: None,
            action_type: None,
        }
    }

    /// Error response; an empty message is replaced with the generic one
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            message
        };
        Self {
            response_type: ResponseType::Error,
            content: message.clone(),
            error_message: Some(message),
            metadata: None,
            action_type: None,
        }
    }

    pub fn needs_info(content: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::NeedsInfo,
            ..Self::success(content)
        }
    }

    pub fn action_required(content: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::ActionRequired,
            action_type: Some(action_type.into()),
            ..Self::success(content)
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.get_or_insert_with(Map::new).insert(key.into(), value);
        self
    }

    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Error text for error responses, otherwise the content
    pub fn message(&self) -> &str {
        self.error_message.as_deref().unwrap_or(&self.content)
    }
}

/// Which built-in implementation backs a configured agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Default,
    #[default]
    ToolCalling,
}

fn enabled_default() -> bool {
    true
}

/// Static agent metadata, loaded from config/agents.ron
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub role: String,
    pub goal: String,
    #[serde(default)]
    pub backstory: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub kind: AgentKind,
    #[serde(default)]
    pub requires_wallet: bool,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, role: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: String::new(),
            tools: Vec::new(),
            enabled: true,
            kind: AgentKind::default(),
            requires_wallet: false,
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    /// One-line natural-language description for LLM catalogues
    pub fn description(&self) -> String {
        format!("{}. {}", self.role, self.goal)
    }

    /// System prompt persona for this agent
    pub fn persona(&self) -> String {
        let mut persona = format!("You are {}.\nYour goal: {}", self.role, self.goal);
        if !self.backstory.is_empty() {
            persona.push_str("\n\n");
            persona.push_str(&self.backstory);
        }
        persona
    }
}

/// Catalogue line shown to ranking/planning LLM calls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentCatalogEntry {
    pub name: String,
    pub description: String,
    pub tools: Vec<String>,
}
