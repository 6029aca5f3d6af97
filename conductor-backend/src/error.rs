//! Error taxonomy for the orchestration core
//!
//! Errors local to one agent or tool invocation are converted to typed
//! responses at that boundary. Only planning/summarization errors travel up
//! to the orchestration entrypoint, which turns them into a degraded answer.

use thiserror::Error;

/// Failure inside an agent's `process`/`execute_tool`.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// User-correctable problem; the message is shown to the user verbatim.
    #[error("{0}")]
    Validation(String),
    /// Anything else; the detail stays in the server log.
    #[error("internal agent failure: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn validation(message: impl Into<String>) -> Self {
        AgentError::Validation(message.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        AgentError::Internal(detail.into())
    }
}

impl From<ToolExecutionError> for AgentError {
    fn from(err: ToolExecutionError) -> Self {
        AgentError::Internal(err.to_string())
    }
}

/// Requested name is not present in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("agent '{0}' is not registered")]
    AgentNotFound(String),
    #[error("tool '{0}' is not registered")]
    ToolNotFound(String),
}

/// A tool failed while executing.
#[derive(Debug, Clone, Error)]
#[error("tool '{tool}' failed: {message}")]
pub struct ToolExecutionError {
    pub tool: String,
    pub message: String,
}

impl ToolExecutionError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// LLM output could not be turned into the requested structure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("LLM returned an empty response")]
    Empty,
    #[error("no JSON value found in LLM output")]
    NoJson,
    #[error("output does not match schema '{schema}': {reason}")]
    SchemaMismatch { schema: String, reason: String },
    #[error("failed to deserialize structured output: {0}")]
    Deserialize(String),
}

/// Delegation-level failure (ranking stage only).
#[derive(Debug, Clone, Error)]
pub enum DelegationError {
    #[error("no agents available: every candidate including 'default' has been attempted")]
    NoAgentsAvailable,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Stage failure inside the orchestration flow.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    #[error("{stage} stage LLM call failed: {message}")]
    Llm { stage: &'static str, message: String },
    #[error("{stage} stage could not parse planner output: {source}")]
    Planning {
        stage: &'static str,
        #[source]
        source: ParseError,
    },
    #[error("invalid stage transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl OrchestrationError {
    /// Name of the stage that failed, for response metadata.
    pub fn stage(&self) -> &str {
        match self {
            OrchestrationError::Llm { stage, .. } => stage,
            OrchestrationError::Planning { stage, .. } => stage,
            OrchestrationError::InvalidTransition { to, .. } => to,
        }
    }
}

/// Problem loading static bootstrap configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}
