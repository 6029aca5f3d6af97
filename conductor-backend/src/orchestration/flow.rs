//! Five-stage orchestration: summarize, plan, assign, run crews, synthesize.
//!
//! Stages 1-3 and 5 are sequential LLM calls sharing one backoff policy.
//! Stage 4 runs every assignment's crew concurrently and waits for all of
//! them; a failing or panicking crew yields an error-text output instead of
//! disappearing. `run` never fails: stage errors become a degraded answer
//! with diagnostics in the metadata.

use crate::agents::{validate_prompt, AgentRegistry, ChatRequest};
use crate::ai::{fill_template, parse_structured_output, with_backoff, CompletionRequest, LlmClient, Message, RetryPolicy, StructuredSchema};
use crate::error::{OrchestrationError, ParseError};
use crate::orchestration::crew::{Crew, CrewOutcome};
use crate::orchestration::state::{Assignment, OrchestrationStage, OrchestrationState, SubtaskOutput};
use crate::progress::ProgressHub;
use crate::telemetry::{dimensions, emit_metric, LogMetricsSink, MetricsSink, Stopwatch, TokenUsage};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub const NO_HISTORY_SUMMARY: &str = "No prior conversation.";
pub const DEGRADED_ANSWER: &str =
    "Your request has been processed, but I wasn't able to put together a complete answer.";
/// Default budget for one crew member's task description
pub const DEFAULT_MAX_TASK_LENGTH: usize = 4000;

const SUMMARIZE_PROMPT: &str = include_str!("prompts/summarize.md");
const PLAN_PROMPT: &str = include_str!("prompts/plan_subtasks.md");
const ASSIGN_PROMPT: &str = include_str!("prompts/assign_agents.md");
const SYNTHESIZE_PROMPT: &str = include_str!("prompts/synthesize.md");

/// What the caller gets back from a run
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub final_answer: String,
    pub subtask_outputs: Vec<SubtaskOutput>,
    pub metadata: Map<String, Value>,
}

impl OrchestrationResult {
    pub fn error_message(&self) -> Option<&str> {
        self.metadata.get("error_message").and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct SubtaskPlan {
    subtasks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AssignmentPlan {
    assignments: Vec<Assignment>,
}

pub fn subtasks_schema() -> StructuredSchema {
    StructuredSchema::string_list("subtasks", "subtasks", 1, None)
}

pub fn assignments_schema() -> StructuredSchema {
    StructuredSchema::new(
        "assignments",
        json!({
            "type": "object",
            "properties": {
                "assignments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "subtask": { "type": "string" },
                            "agents": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["subtask", "agents"]
                    }
                }
            },
            "required": ["assignments"]
        }),
    )
}

pub struct OrchestrationFlow {
    registry: Arc<AgentRegistry>,
    llm: Arc<dyn LlmClient>,
    progress: ProgressHub,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryPolicy,
    max_task_length: usize,
}

impl OrchestrationFlow {
    pub fn new(registry: Arc<AgentRegistry>, llm: Arc<dyn LlmClient>, progress: ProgressHub) -> Self {
        Self {
            registry,
            llm,
            progress,
            metrics: Arc::new(LogMetricsSink),
            retry: RetryPolicy::default(),
            max_task_length: DEFAULT_MAX_TASK_LENGTH,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_task_length(mut self, max_task_length: usize) -> Self {
        self.max_task_length = max_task_length;
        self
    }

    /// Run the full pipeline for a bare prompt and history
    pub async fn run(&self, chat_prompt: &str, chat_history: &[String], request_id: Option<&str>) -> OrchestrationResult {
        self.run_with_template(&ChatRequest::new(chat_prompt), chat_history, request_id)
            .await
    }

    /// Run the full pipeline for a chat request. Wallet and conversation
    /// context is passed on to every crew member.
    pub async fn run_for_request(&self, request: &ChatRequest) -> OrchestrationResult {
        let history: Vec<String> = request
            .chat_history
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect();
        self.run_with_template(request, &history, request.request_id.as_deref())
            .await
    }

    async fn run_with_template(
        &self,
        template: &ChatRequest,
        chat_history: &[String],
        request_id: Option<&str>,
    ) -> OrchestrationResult {
        if let Some(rejection) = validate_prompt(template) {
            return self.reject(rejection.message(), request_id);
        }

        let stopwatch = Stopwatch::start();
        let chat_prompt = template.prompt_text();
        log::info!(
            "[ORCHESTRATION] Starting run (request: {:?}, history: {} messages)",
            request_id,
            chat_history.len()
        );
        if let Some(id) = request_id {
            self.progress.emit_flow_start(id, chat_prompt);
        }
        emit_metric(self.metrics.as_ref(), "orchestration.runs", &dimensions([]), 1.0);

        let mut state = OrchestrationState::new(chat_prompt, chat_history.to_vec());
        let outcome = self.execute(&mut state, template, request_id).await;

        let mut metadata = Map::new();
        metadata.insert("subtasks".to_string(), json!(state.subtasks));
        let (final_answer, error_message) = match outcome {
            Ok(()) => {
                metadata.insert("stage".to_string(), json!(state.stage().to_string()));
                (state.final_answer.take().unwrap_or_default(), None)
            }
            Err(e) => {
                let stage = e.stage().to_string();
                log::error!("[ORCHESTRATION] Run failed at {}: {}", stage, e);
                emit_metric(
                    self.metrics.as_ref(),
                    "orchestration.errors",
                    &dimensions([("stage", stage.as_str())]),
                    1.0,
                );
                metadata.insert("stage".to_string(), json!(state.stage().to_string()));
                metadata.insert("failed_stage".to_string(), json!(stage));
                metadata.insert("error_message".to_string(), json!(e.to_string()));
                (DEGRADED_ANSWER.to_string(), Some(e.to_string()))
            }
        };

        let elapsed_ms = stopwatch.elapsed_ms();
        metadata.insert("duration_ms".to_string(), json!(elapsed_ms));
        emit_metric(self.metrics.as_ref(), "orchestration.latency_ms", &dimensions([]), elapsed_ms);

        if let Some(id) = request_id {
            self.progress
                .emit_final_complete(id, &final_answer, error_message.as_deref());
        }
        log::info!("[ORCHESTRATION] Run finished in {:.0}ms", elapsed_ms);

        OrchestrationResult {
            final_answer,
            subtask_outputs: std::mem::take(&mut state.subtask_outputs),
            metadata,
        }
    }

    /// Validation failures skip every stage; the message is the answer
    fn reject(&self, message: &str, request_id: Option<&str>) -> OrchestrationResult {
        log::info!("[ORCHESTRATION] Rejected request {:?}: {}", request_id, message);
        if let Some(id) = request_id {
            self.progress.emit_final_complete(id, message, Some(message));
        }

        let mut metadata = Map::new();
        metadata.insert("stage".to_string(), json!(OrchestrationStage::Initialized.to_string()));
        metadata.insert("failed_stage".to_string(), json!("validate"));
        metadata.insert("error_message".to_string(), json!(message));
        OrchestrationResult {
            final_answer: message.to_string(),
            subtask_outputs: Vec::new(),
            metadata,
        }
    }

    async fn execute(
        &self,
        state: &mut OrchestrationState,
        template: &ChatRequest,
        request_id: Option<&str>,
    ) -> Result<(), OrchestrationError> {
        self.summarize_history(state).await?;
        state.advance(OrchestrationStage::Summarized)?;

        self.create_subtasks(state).await?;
        state.advance(OrchestrationStage::Planned)?;

        self.assign_agents(state).await?;
        state.advance(OrchestrationStage::Assigned)?;

        self.run_crews(state, template, request_id).await;
        state.advance(OrchestrationStage::Executed)?;

        self.synthesize(state, request_id).await?;
        state.advance(OrchestrationStage::Synthesized)?;
        Ok(())
    }

    /// Stage 1: condense the history into at most four sentences
    pub(crate) async fn summarize_history(&self, state: &mut OrchestrationState) -> Result<(), OrchestrationError> {
        if state.chat_history.is_empty() {
            state.chat_history_summary = NO_HISTORY_SUMMARY.to_string();
            return Ok(());
        }

        let prompt = fill_template(SUMMARIZE_PROMPT, &[("history", state.chat_history.join("\n").as_str())]);
        state.chat_history_summary = self
            .generate("summarize_history", vec![Message::user(prompt)])
            .await?;
        Ok(())
    }

    /// Stage 2: decompose the request into a minimal list of subtasks
    pub(crate) async fn create_subtasks(&self, state: &mut OrchestrationState) -> Result<(), OrchestrationError> {
        let prompt = fill_template(
            PLAN_PROMPT,
            &[("summary", state.chat_history_summary.as_str()), ("prompt", state.chat_prompt.as_str())],
        );

        let plan: SubtaskPlan = self
            .structured("create_subtasks", vec![Message::user(prompt)], subtasks_schema(), |plan: &SubtaskPlan| {
                plan.subtasks.iter().any(|s| !s.trim().is_empty())
            })
            .await?;

        let mut seen = HashSet::new();
        state.subtasks = plan
            .subtasks
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        log::info!("[ORCHESTRATION] Planned {} subtasks: {:?}", state.subtasks.len(), state.subtasks);
        Ok(())
    }

    /// Stage 3: map each subtask to one or more agents
    pub(crate) async fn assign_agents(&self, state: &mut OrchestrationState) -> Result<(), OrchestrationError> {
        let subtask_list = state
            .subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n");
        let catalogue = AgentRegistry::format_catalogue(&self.registry.describe_for_llm());
        let prompt = fill_template(ASSIGN_PROMPT, &[("subtasks", subtask_list.as_str()), ("catalogue", catalogue.as_str())]);

        let plan: AssignmentPlan = self
            .structured("assign_agents", vec![Message::user(prompt)], assignments_schema(), |_| true)
            .await?;

        state.assignments = align_assignments(&state.subtasks, plan.assignments);
        log::info!("[ORCHESTRATION] Assignments: {:?}", state.assignments);
        Ok(())
    }

    /// Stage 4: run every assignment's crew concurrently, outputs in assignment order
    pub(crate) async fn run_crews(&self, state: &mut OrchestrationState, template: &ChatRequest, request_id: Option<&str>) {
        let summary = state.chat_history_summary.as_str();
        let crews = state
            .assignments
            .iter()
            .enumerate()
            .map(|(index, assignment)| self.run_crew(index, assignment, summary, template, request_id));

        let outputs = join_all(crews).await;
        state.subtask_outputs = outputs;
    }

    async fn run_crew(
        &self,
        index: usize,
        assignment: &Assignment,
        summary: &str,
        template: &ChatRequest,
        request_id: Option<&str>,
    ) -> SubtaskOutput {
        if let Some(id) = request_id {
            self.progress
                .emit_subtask_dispatch(id, index, &assignment.subtask, &assignment.agents);
        }

        let stopwatch = Stopwatch::start();
        let crew = Crew::assemble(assignment, &self.registry);
        let outcome = AssertUnwindSafe(crew.execute(summary, template, self.max_task_length))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                log::error!("[ORCHESTRATION] Crew for '{}' panicked", assignment.subtask);
                CrewOutcome {
                    output: format!("This task failed unexpectedly: {}", assignment.subtask),
                    token_usage: TokenUsage::default(),
                    succeeded: Vec::new(),
                }
            });
        let telemetry = stopwatch.finish(outcome.token_usage);

        if let Some(id) = request_id {
            self.progress
                .emit_subtask_result(id, index, &assignment.subtask, &outcome.output, &telemetry);
        }

        SubtaskOutput {
            subtask: assignment.subtask.clone(),
            output: outcome.output,
            agents: assignment.agents.clone(),
            skipped_agents: crew.missing().to_vec(),
            telemetry,
        }
    }

    /// Stage 5: combine subtask outputs into the final answer
    pub(crate) async fn synthesize(&self, state: &mut OrchestrationState, request_id: Option<&str>) -> Result<(), OrchestrationError> {
        if let Some(id) = request_id {
            self.progress.emit_synthesis_start(id, state.subtask_outputs.len());
        }

        let results = state
            .subtask_outputs
            .iter()
            .enumerate()
            .map(|(i, o)| format!("### {}. {}\n{}", i + 1, o.subtask, o.output))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = fill_template(SYNTHESIZE_PROMPT, &[("prompt", state.chat_prompt.as_str()), ("results", results.as_str())]);

        let answer = self.generate("synthesize", vec![Message::user(prompt)]).await?;
        if let Some(id) = request_id {
            self.progress.emit_synthesis_complete(id, &answer);
        }
        state.final_answer = Some(answer);
        Ok(())
    }

    /// Plain-text LLM call with backoff; an empty reply counts as a failure
    async fn generate(&self, stage: &'static str, messages: Vec<Message>) -> Result<String, OrchestrationError> {
        with_backoff(stage, self.retry, |_| {
            let llm = self.llm.clone();
            let messages = messages.clone();
            async move {
                let text = llm
                    .generate_text(messages)
                    .await
                    .map_err(|message| OrchestrationError::Llm { stage, message })?;
                let text = text.trim();
                if text.is_empty() {
                    return Err(OrchestrationError::Llm {
                        stage,
                        message: "model returned an empty response".to_string(),
                    });
                }
                Ok(text.to_string())
            }
        })
        .await
    }

    /// Schema-constrained LLM call with backoff. Both transport and parse
    /// failures are retried; the last error is returned.
    async fn structured<T, F>(
        &self,
        stage: &'static str,
        messages: Vec<Message>,
        schema: StructuredSchema,
        accept: F,
    ) -> Result<T, OrchestrationError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let request = CompletionRequest::new(messages).with_schema(schema.clone());
        with_backoff(stage, self.retry, |_| {
            let llm = self.llm.clone();
            let request = request.clone();
            let schema = &schema;
            let accept = &accept;
            async move {
                let completion = llm
                    .complete(request)
                    .await
                    .map_err(|message| OrchestrationError::Llm { stage, message })?;
                let parsed: T = parse_structured_output(&completion.content, schema)
                    .map_err(|source| OrchestrationError::Planning { stage, source })?;
                if !accept(&parsed) {
                    return Err(OrchestrationError::Planning {
                        stage,
                        source: ParseError::SchemaMismatch {
                            schema: schema.name.clone(),
                            reason: "no usable entries".to_string(),
                        },
                    });
                }
                Ok(parsed)
            }
        })
        .await
    }
}

/// One assignment per subtask, in subtask order. Entries are matched by
/// subtask text first (ignoring case and surrounding whitespace); leftover
/// entries then fill the unmatched subtasks in order. Subtasks still without
/// an entry get no agents.
fn align_assignments(subtasks: &[String], proposed: Vec<Assignment>) -> Vec<Assignment> {
    let normalize = |s: &str| s.trim().to_lowercase();
    let mut used = vec![false; proposed.len()];

    let mut matched: Vec<Option<usize>> = subtasks
        .iter()
        .map(|subtask| {
            let j = (0..proposed.len())
                .find(|&j| !used[j] && normalize(&proposed[j].subtask) == normalize(subtask))?;
            used[j] = true;
            Some(j)
        })
        .collect();

    for slot in matched.iter_mut().filter(|slot| slot.is_none()) {
        if let Some(j) = (0..proposed.len()).find(|&j| !used[j]) {
            used[j] = true;
            *slot = Some(j);
        }
    }

    subtasks
        .iter()
        .zip(matched)
        .map(|(subtask, slot)| {
            let agents = match slot {
                Some(j) => {
                    let mut seen = HashSet::new();
                    proposed[j]
                        .agents
                        .iter()
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty() && seen.insert(a.clone()))
                        .collect()
                }
                None => {
                    log::warn!("[ORCHESTRATION] No assignment returned for subtask '{}'", subtask);
                    Vec::new()
                }
            };
            Assignment {
                subtask: subtask.clone(),
                agents,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{EventType, ProgressEvent};
    use crate::test_support::{PanickingAgent, RecordingMetricsSink, ScriptedLlm, StaticAgent};
    use futures_util::StreamExt;
    use std::time::Duration;

    const PLAN: &str = r#"{"subtasks": ["Get the current BTC price", "Summarize today's crypto news"]}"#;
    const ASSIGN: &str = r#"{"assignments": [
        {"subtask": "Get the current BTC price", "agents": ["crypto_data"]},
        {"subtask": "Summarize today's crypto news", "agents": ["news"]}
    ]}"#;

    fn registry() -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        registry.register(StaticAgent::success("crypto_data", "BTC is trading at $64,000."));
        registry.register(StaticAgent::success("news", "Markets are calm today."));
        Arc::new(registry)
    }

    fn flow(registry: Arc<AgentRegistry>, llm: Arc<ScriptedLlm>, hub: ProgressHub) -> OrchestrationFlow {
        OrchestrationFlow::new(registry, llm, hub).with_retry_policy(RetryPolicy::immediate(3))
    }

    fn assignment(subtask: &str, agents: &[&str]) -> Assignment {
        Assignment {
            subtask: subtask.to_string(),
            agents: agents.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn state_with(assignments: Vec<Assignment>) -> OrchestrationState {
        let mut state = OrchestrationState::new("prompt", vec![]);
        state.chat_history_summary = NO_HISTORY_SUMMARY.to_string();
        state.subtasks = assignments.iter().map(|a| a.subtask.clone()).collect();
        state.assignments = assignments;
        state
    }

    async fn drain(hub: &ProgressHub, request_id: &str) -> Vec<ProgressEvent> {
        hub.event_stream(request_id)
            .map(|frame| serde_json::from_str::<ProgressEvent>(frame.trim_start_matches("data: ").trim()).unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_two_subtask_run_end_to_end() {
        let llm = ScriptedLlm::texts(&[PLAN, ASSIGN, "BTC is at $64,000 and the news is quiet."]);
        let hub = ProgressHub::default();
        let metrics = RecordingMetricsSink::new();
        let flow = flow(registry(), llm.clone(), hub.clone()).with_metrics(metrics.clone());

        let result = flow
            .run("What's the BTC price and today's crypto news?", &[], Some("req-c"))
            .await;

        assert_eq!(result.final_answer, "BTC is at $64,000 and the news is quiet.");
        assert!(result.error_message().is_none());
        assert_eq!(result.metadata["stage"], "synthesized");
        assert_eq!(result.subtask_outputs.len(), 2);
        assert_eq!(result.subtask_outputs[0].output, "BTC is trading at $64,000.");
        assert_eq!(result.subtask_outputs[1].agents, vec!["news"]);
        for output in &result.subtask_outputs {
            assert!(output.telemetry.processing_time.duration >= 0.0);
        }
        // no history means no summarization call
        assert_eq!(llm.calls(), 3);
        assert_eq!(metrics.records().iter().filter(|(name, _, _)| name == "orchestration.runs").count(), 1);

        let events = drain(&hub, "req-c").await;
        let count = |t: EventType| events.iter().filter(|e| e.event_type == t).count();
        assert_eq!(events.first().map(|e| e.event_type), Some(EventType::FlowStart));
        assert_eq!(count(EventType::SubtaskDispatch), 2);
        assert_eq!(count(EventType::SubtaskResult), 2);
        let tail: Vec<EventType> = events[events.len() - 4..].iter().map(|e| e.event_type).collect();
        assert_eq!(
            tail,
            vec![
                EventType::SynthesisStart,
                EventType::SynthesisComplete,
                EventType::FinalComplete,
                EventType::StreamComplete
            ]
        );
        assert!(!hub.has_queue("req-c"));
    }

    #[tokio::test]
    async fn test_history_is_summarized_first() {
        let llm = ScriptedLlm::texts(&["The user holds ETH on base.", PLAN, ASSIGN, "done"]);
        let flow = flow(registry(), llm.clone(), ProgressHub::default());

        let history = vec!["user: I hold 2 ETH on base".to_string(), "assistant: Noted.".to_string()];
        let result = flow.run("what is it worth?", &history, None).await;

        assert_eq!(result.final_answer, "done");
        let requests = llm.requests();
        assert!(requests[0].messages[0].content.contains("I hold 2 ETH on base"));
        assert!(requests[1].messages[0].content.contains("The user holds ETH on base."));
        assert!(requests[1].response_format.is_some());
    }

    #[tokio::test]
    async fn test_malformed_plan_degrades_gracefully() {
        let llm = ScriptedLlm::texts(&["not json", "still not json", "{\"tasks\": 3}"]);
        let hub = ProgressHub::default();
        let metrics = RecordingMetricsSink::new();
        let flow = flow(registry(), llm.clone(), hub.clone()).with_metrics(metrics.clone());

        let result = flow.run("price of btc", &[], Some("req-d")).await;

        assert_eq!(result.final_answer, DEGRADED_ANSWER);
        assert!(!result.error_message().unwrap_or_default().is_empty());
        assert_eq!(result.metadata["failed_stage"], "create_subtasks");
        assert!(result.subtask_outputs.is_empty());
        assert_eq!(llm.calls(), 3);
        assert_eq!(metrics.total("orchestration.errors", "stage", "create_subtasks"), 1.0);

        let events = drain(&hub, "req-d").await;
        let final_event = events
            .iter()
            .find(|e| e.event_type == EventType::FinalComplete)
            .unwrap();
        assert_eq!(final_event.data["final_answer"], DEGRADED_ANSWER);
        assert!(final_event.data["error_message"].is_string());
        assert_eq!(events.last().map(|e| e.event_type), Some(EventType::StreamComplete));
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected_without_llm_calls() {
        let llm = ScriptedLlm::texts(&[PLAN, ASSIGN, "Here is an answer to nothing."]);
        let hub = ProgressHub::default();
        let flow = flow(registry(), llm.clone(), hub.clone());

        let result = flow.run("   ", &[], Some("req-blank")).await;

        assert_eq!(llm.calls(), 0);
        assert_eq!(result.final_answer, "Prompt cannot be empty");
        assert_eq!(result.error_message(), Some("Prompt cannot be empty"));
        assert_eq!(result.metadata["failed_stage"], "validate");
        assert!(result.subtask_outputs.is_empty());

        let events = drain(&hub, "req-blank").await;
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::FinalComplete, EventType::StreamComplete]);
        assert_eq!(events[0].data["error_message"], "Prompt cannot be empty");
    }

    #[tokio::test]
    async fn test_placeholder_text_in_prompt_kept_verbatim() {
        let llm = ScriptedLlm::texts(&[
            r#"{"subtasks": ["Get the current BTC price"]}"#,
            r#"{"assignments": [{"subtask": "Get the current BTC price", "agents": ["crypto_data"]}]}"#,
            "It is a placeholder.",
        ]);
        let flow = flow(registry(), llm.clone(), ProgressHub::default());

        let prompt = "Explain what {results} means in my template";
        let result = flow.run(prompt, &[], None).await;
        assert_eq!(result.final_answer, "It is a placeholder.");

        let requests = llm.requests();
        assert!(requests[0].messages[0].content.contains(prompt));
        let synthesis = &requests[2].messages[0].content;
        assert!(synthesis.contains(&format!("## User request\n\n{}\n", prompt)));
        assert!(synthesis.contains("### 1. Get the current BTC price\nBTC is trading at $64,000."));
    }

    #[tokio::test]
    async fn test_empty_subtask_list_is_retried() {
        let llm = ScriptedLlm::texts(&[r#"{"subtasks": ["  "]}"#, PLAN, ASSIGN, "ok"]);
        let flow = flow(registry(), llm.clone(), ProgressHub::default());

        let result = flow.run("price of btc", &[], None).await;
        assert_eq!(result.final_answer, "ok");
        assert_eq!(result.subtask_outputs.len(), 2);
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_subtask_outputs() {
        let llm = ScriptedLlm::new(vec![
            Ok(crate::ai::Completion::text(PLAN)),
            Ok(crate::ai::Completion::text(ASSIGN)),
            Err("503 Service Unavailable".to_string()),
            Ok(crate::ai::Completion::text("   ")),
            Err("503 Service Unavailable".to_string()),
        ]);
        let flow = flow(registry(), llm, ProgressHub::default());

        let result = flow.run("price of btc", &[], None).await;
        assert_eq!(result.final_answer, DEGRADED_ANSWER);
        assert_eq!(result.metadata["failed_stage"], "synthesize");
        assert_eq!(result.subtask_outputs.len(), 2);
    }

    #[tokio::test]
    async fn test_run_crews_one_output_per_assignment() {
        let flow = flow(registry(), ScriptedLlm::texts(&[]), ProgressHub::default());

        let mut empty = state_with(vec![]);
        flow.run_crews(&mut empty, &ChatRequest::new("x"), None).await;
        assert!(empty.subtask_outputs.is_empty());

        let mut state = state_with(vec![
            assignment("price", &["crypto_data"]),
            assignment("ghost work", &["ghost"]),
            assignment("news", &["ghost", "news"]),
        ]);
        flow.run_crews(&mut state, &ChatRequest::new("x"), None).await;

        let outputs = &state.subtask_outputs;
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].output, "BTC is trading at $64,000.");
        assert_eq!(outputs[1].output, crate::orchestration::crew::NO_AGENTS_OUTPUT);
        assert_eq!(outputs[1].skipped_agents, vec!["ghost"]);
        assert_eq!(outputs[2].output, "Markets are calm today.");
        assert_eq!(outputs[2].skipped_agents, vec!["ghost"]);
    }

    #[tokio::test]
    async fn test_run_crews_preserves_assignment_order() {
        let mut registry = AgentRegistry::new();
        registry.register(StaticAgent::slow("slow", "first", Duration::from_millis(40)));
        registry.register(StaticAgent::success("fast", "second"));
        let flow = flow(Arc::new(registry), ScriptedLlm::texts(&[]), ProgressHub::default());

        let mut state = state_with(vec![assignment("a", &["slow"]), assignment("b", &["fast"])]);
        flow.run_crews(&mut state, &ChatRequest::new("x"), None).await;

        let outputs: Vec<&str> = state.subtask_outputs.iter().map(|o| o.output.as_str()).collect();
        assert_eq!(outputs, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_panicking_crew_is_contained() {
        let mut registry = AgentRegistry::new();
        registry.register(PanickingAgent::new("boom"));
        registry.register(StaticAgent::success("steady", "fine"));
        let hub = ProgressHub::default();
        let flow = flow(Arc::new(registry), ScriptedLlm::texts(&[]), hub.clone());

        let mut state = state_with(vec![assignment("explode", &["boom"]), assignment("calm", &["steady"])]);
        flow.run_crews(&mut state, &ChatRequest::new("x"), Some("req-p")).await;

        assert_eq!(state.subtask_outputs.len(), 2);
        assert!(state.subtask_outputs[0].output.contains("failed unexpectedly"));
        assert_eq!(state.subtask_outputs[1].output, "fine");

        hub.emit_stream_complete("req-p", "completed");
        let events = drain(&hub, "req-p").await;
        let results = events
            .iter()
            .filter(|e| e.event_type == EventType::SubtaskResult)
            .count();
        assert_eq!(results, 2);
    }

    #[test]
    fn test_align_assignments_by_text_then_position() {
        let subtasks = vec!["Get price".to_string(), "Get news".to_string(), "Write summary".to_string()];
        let proposed = vec![
            assignment("get news ", &["news", "news"]),
            assignment("Fetch the price", &["crypto_data"]),
        ];

        let aligned = align_assignments(&subtasks, proposed);
        assert_eq!(aligned.len(), 3);
        assert_eq!(aligned[0], assignment("Get price", &["crypto_data"]));
        assert_eq!(aligned[1], assignment("Get news", &["news"]));
        assert_eq!(aligned[2], assignment("Write summary", &[]));
    }
}
