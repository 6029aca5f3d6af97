//! Delegator: rank agents for a chat request with the LLM, then try them in
//! order until one answers.
//!
//! Ranking asks for `{"agents": [...]}` (1 to 3 names) under a JSON schema and
//! falls back to `["default"]` whenever the model cannot produce a usable
//! ranking. Trials are strictly sequential and stop at the first non-error
//! response; each attempt reports an explicit [`AttemptOutcome`] instead of
//! unwinding.

use crate::agents::{validate_prompt, AgentCatalogEntry, AgentRegistry, AgentResponse, ChatRequest};
use crate::ai::{fill_template, parse_structured_output, with_backoff, CompletionRequest, LlmClient, Message, RetryPolicy, StructuredSchema};
use crate::error::DelegationError;
use crate::telemetry::{dimensions, emit_metric, MetricsSink, Stopwatch};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use strum::Display;

/// Name of the catch-all agent used when ranking cannot pick anything
pub const DEFAULT_AGENT: &str = "default";
/// Upper bound on agents returned by one ranking
pub const MAX_RANKED_AGENTS: usize = 3;

const NO_SUITABLE_AGENTS: &str = "No suitable agents available for the request";
const ALL_AGENTS_ATTEMPTED: &str = "All agents have been attempted without success";
const RESEARCH_HINT: &str = "\nThe user enabled research mode: prefer agents that search the web, read documents or gather news whenever they fit the request.\n";

const RANKING_PROMPT: &str = include_str!("prompts/ranking.md");

/// Why a single candidate failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureCategory {
    /// The agent could not be resolved from the registry
    ConfigLoadError,
    /// The agent answered with an error response
    AgentError,
    /// The agent panicked
    Exception,
}

/// Result of trying one ranked candidate
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Succeeded(AgentResponse),
    Failed { category: FailureCategory, detail: String },
}

#[derive(Debug, Clone, Serialize)]
struct AttemptFailure {
    agent: String,
    category: FailureCategory,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct Ranking {
    agents: Vec<String>,
}

pub fn ranking_schema() -> StructuredSchema {
    StructuredSchema::string_list("agent_ranking", "agents", 1, Some(MAX_RANKED_AGENTS))
}

pub struct Delegator {
    registry: Arc<AgentRegistry>,
    llm: Arc<dyn LlmClient>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryPolicy,
    max_retries: u32,
}

impl Delegator {
    pub fn new(registry: Arc<AgentRegistry>, llm: Arc<dyn LlmClient>, metrics: Arc<dyn MetricsSink>) -> Self {
        let retry = RetryPolicy::default();
        Self {
            registry,
            llm,
            metrics,
            max_retries: retry.max_attempts,
            retry,
        }
    }

    /// Number of ranking calls before falling back to `default`
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Backoff timing between ranking calls
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Rank up to three not-yet-attempted agents for the request.
    ///
    /// Never surfaces LLM or parse failures: those end in `["default"]`. The
    /// only error is `NoAgentsAvailable`, when nothing is left to try and
    /// `default` was already attempted.
    pub async fn get_ranking(
        &self,
        request: &ChatRequest,
        attempted: &HashSet<String>,
        max_retries: u32,
    ) -> Result<Vec<String>, DelegationError> {
        let candidates: Vec<AgentCatalogEntry> = self
            .registry
            .describe_for_llm()
            .into_iter()
            .filter(|entry| !attempted.contains(&entry.name))
            .collect();

        if candidates.is_empty() {
            if attempted.contains(DEFAULT_AGENT) {
                return Err(DelegationError::NoAgentsAvailable);
            }
            log::warn!("[DELEGATOR] No candidate agents available, falling back to '{}'", DEFAULT_AGENT);
            return Ok(vec![DEFAULT_AGENT.to_string()]);
        }

        let candidate_names: HashSet<&str> = candidates.iter().map(|e| e.name.as_str()).collect();
        let schema = ranking_schema();
        let completion_request =
            CompletionRequest::new(ranking_messages(request, &candidates)).with_schema(schema.clone());
        let policy = RetryPolicy {
            max_attempts: max_retries.max(1),
            ..self.retry
        };

        let ranking = with_backoff("agent_ranking", policy, |attempt| {
            let llm = self.llm.clone();
            let completion_request = completion_request.clone();
            let schema = &schema;
            let candidate_names = &candidate_names;
            async move {
                log::debug!("[DELEGATOR] Ranking attempt {}", attempt);
                let completion = llm.complete(completion_request).await?;
                let ranking: Ranking =
                    parse_structured_output(&completion.content, schema).map_err(|e| e.to_string())?;
                let agents = filter_ranking(ranking.agents, candidate_names);
                if agents.is_empty() {
                    return Err("ranking contained no available agents".to_string());
                }
                Ok(agents)
            }
        })
        .await;

        match ranking {
            Ok(agents) => {
                log::info!("[DELEGATOR] Ranked agents: {:?}", agents);
                Ok(agents)
            }
            Err(e) => {
                log::warn!(
                    "[DELEGATOR] Ranking failed after {} attempts ({}), falling back to '{}'",
                    policy.max_attempts,
                    e,
                    DEFAULT_AGENT
                );
                Ok(vec![DEFAULT_AGENT.to_string()])
            }
        }
    }

    /// Pick and run an agent for the request. Never fails: every problem ends
    /// up as an error response.
    pub async fn delegate(&self, request: &ChatRequest) -> (Option<String>, AgentResponse) {
        if let Some(rejection) = validate_prompt(request) {
            log::info!("[DELEGATOR] Rejected request: {}", rejection.message());
            return (None, rejection);
        }

        let mut attempted: HashSet<String> = HashSet::new();
        let ranking = match self.get_ranking(request, &attempted, self.max_retries).await {
            Ok(ranking) => ranking,
            Err(e) => {
                log::warn!("[DELEGATOR] Ranking failed: {}", e);
                return (None, AgentResponse::error(NO_SUITABLE_AGENTS));
            }
        };

        let mut failures: Vec<AttemptFailure> = Vec::new();
        for name in ranking {
            if !attempted.insert(name.clone()) {
                continue;
            }

            match self.attempt(&name, request).await {
                AttemptOutcome::Succeeded(response) => {
                    log::info!("[DELEGATOR] Agent '{}' handled the request", name);
                    return (Some(name), response);
                }
                AttemptOutcome::Failed { category, detail } => {
                    log::warn!("[DELEGATOR] Agent '{}' failed ({}): {}", name, category, detail);
                    failures.push(AttemptFailure {
                        agent: name,
                        category,
                        detail,
                    });
                }
            }
        }

        let attempted_agents: Vec<&str> = failures.iter().map(|f| f.agent.as_str()).collect();
        log::warn!("[DELEGATOR] All ranked agents failed: {:?}", attempted_agents);
        let response = AgentResponse::error(ALL_AGENTS_ATTEMPTED)
            .with_metadata("attempted_agents", json!(attempted_agents))
            .with_metadata("failures", json!(failures));
        (None, response)
    }

    /// Try one candidate, recording metrics for the attempt
    async fn attempt(&self, name: &str, request: &ChatRequest) -> AttemptOutcome {
        let stopwatch = Stopwatch::start();
        emit_metric(self.metrics.as_ref(), "delegator.invocations", &dimensions([("agent", name)]), 1.0);

        let outcome = match self.registry.get(name) {
            Err(e) => AttemptOutcome::Failed {
                category: FailureCategory::ConfigLoadError,
                detail: e.to_string(),
            },
            Ok(agent) => match AssertUnwindSafe(agent.chat(request)).catch_unwind().await {
                Ok(response) if response.is_error() => AttemptOutcome::Failed {
                    category: FailureCategory::AgentError,
                    detail: response.message().to_string(),
                },
                Ok(response) => AttemptOutcome::Succeeded(response),
                Err(_) => AttemptOutcome::Failed {
                    category: FailureCategory::Exception,
                    detail: format!("agent '{}' panicked", name),
                },
            },
        };

        match &outcome {
            AttemptOutcome::Succeeded(_) => {
                emit_metric(self.metrics.as_ref(), "delegator.successes", &dimensions([("agent", name)]), 1.0);
            }
            AttemptOutcome::Failed { category, .. } => {
                let category = category.to_string();
                emit_metric(
                    self.metrics.as_ref(),
                    "delegator.errors",
                    &dimensions([("agent", name), ("error_category", category.as_str())]),
                    1.0,
                );
            }
        }
        emit_metric(
            self.metrics.as_ref(),
            "delegator.latency_ms",
            &dimensions([("agent", name)]),
            stopwatch.elapsed_ms(),
        );

        outcome
    }
}

/// System prompt with the catalogue, then the conversation, then the prompt
fn ranking_messages(request: &ChatRequest, candidates: &[AgentCatalogEntry]) -> Vec<Message> {
    let catalogue = AgentRegistry::format_catalogue(candidates);
    let research_hint = if request.use_research { RESEARCH_HINT } else { "" };
    let system = fill_template(RANKING_PROMPT, &[("catalogue", catalogue.as_str()), ("research_hint", research_hint)]);

    let mut messages = Vec::with_capacity(request.chat_history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(request.chat_history.iter().cloned());
    messages.push(request.prompt.clone());
    messages
}

/// Keep known candidates, drop duplicates, cap at three
fn filter_ranking(ranked: Vec<String>, candidates: &HashSet<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| candidates.contains(name.as_str()))
        .filter(|name| seen.insert(name.clone()))
        .take(MAX_RANKED_AGENTS)
        .collect()
}
