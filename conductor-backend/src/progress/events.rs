use crate::telemetry::Telemetry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Characters of subtask output included in a result event
pub const PREVIEW_CHARS: usize = 200;

/// Progress event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FlowStart,
    SubtaskDispatch,
    SubtaskResult,
    SynthesisStart,
    SynthesisComplete,
    FinalComplete,
    StreamComplete,
    // Liveness only, never business data
    Heartbeat,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlowStart => "flow_start",
            Self::SubtaskDispatch => "subtask_dispatch",
            Self::SubtaskResult => "subtask_result",
            Self::SynthesisStart => "synthesis_start",
            Self::SynthesisComplete => "synthesis_complete",
            Self::FinalComplete => "final_complete",
            Self::StreamComplete => "stream_complete",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record on a request's progress stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl ProgressEvent {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn flow_start(prompt: &str) -> Self {
        Self::new(EventType::FlowStart, json!({ "prompt": prompt }))
    }

    pub fn subtask_dispatch(index: usize, subtask: &str, agents: &[String]) -> Self {
        Self::new(
            EventType::SubtaskDispatch,
            json!({ "index": index, "subtask": subtask, "agents": agents }),
        )
    }

    pub fn subtask_result(index: usize, subtask: &str, output: &str, telemetry: &Telemetry) -> Self {
        Self::new(
            EventType::SubtaskResult,
            json!({
                "index": index,
                "subtask": subtask,
                "preview": preview(output),
                "telemetry": telemetry,
            }),
        )
    }

    pub fn synthesis_start(subtask_count: usize) -> Self {
        Self::new(EventType::SynthesisStart, json!({ "subtask_count": subtask_count }))
    }

    pub fn synthesis_complete(final_answer: &str) -> Self {
        Self::new(EventType::SynthesisComplete, json!({ "final_answer": final_answer }))
    }

    pub fn final_complete(final_answer: &str, error_message: Option<&str>) -> Self {
        Self::new(
            EventType::FinalComplete,
            json!({ "final_answer": final_answer, "error_message": error_message }),
        )
    }

    pub fn stream_complete(reason: &str) -> Self {
        Self::new(EventType::StreamComplete, json!({ "reason": reason }))
    }

    pub fn heartbeat() -> Self {
        Self::new(EventType::Heartbeat, json!({}))
    }

    pub fn is_heartbeat(&self) -> bool {
        self.event_type == EventType::Heartbeat
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type == EventType::StreamComplete
    }

    /// Server-sent-events text frame
    pub fn to_sse_frame(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("data: {}\n\n", json),
            Err(e) => {
                log::error!("[PROGRESS] Failed to serialize {} event: {}", self.event_type, e);
                format!("data: {{\"type\":\"{}\"}}\n\n", self.event_type)
            }
        }
    }
}

/// First `PREVIEW_CHARS` characters, with an ellipsis when cut
pub fn preview(output: &str) -> String {
    if output.chars().count() <= PREVIEW_CHARS {
        output.to_string()
    } else {
        let cut: String = output.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    }
}
