//! Chat endpoints
//!
//! `POST /api/chat` routes a message to the delegator, or to the orchestration
//! flow when `use_multiagent` is set. Orchestration progress is readable from
//! `GET /api/chat/stream/{request_id}` as server-sent events.

use actix_web::{web, HttpResponse, Responder};
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;

use crate::agents::ChatRequest;
use crate::ai::Message;
use crate::orchestration::DEGRADED_ANSWER;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/chat")
            .route("", web::post().to(chat))
            .route("/stream/{request_id}", web::get().to(stream)),
    );
}

/// Request body for `POST /api/chat`
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub prompt: String,
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
    /// Lets a client open the progress stream before posting
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ChatBody {
    fn into_request(self) -> ChatRequest {
        ChatRequest {
            prompt: Message::user(self.prompt),
            conversation_id: self.conversation_id,
            wallet_address: self.wallet_address,
            chain_id: self.chain_id,
            chat_history: self.chat_history,
            use_research: self.use_research,
            use_multiagent: self.use_multiagent,
            request_id: self.request_id.filter(|id| !id.trim().is_empty()),
        }
    }
}

async fn chat(state: web::Data<AppState>, body: web::Json<ChatBody>) -> impl Responder {
    let request = body.into_inner().into_request();

    if request.use_multiagent {
        orchestrate(&state, request).await
    } else {
        delegate(&state, request).await
    }
}

async fn delegate(state: &AppState, request: ChatRequest) -> HttpResponse {
    log::info!(
        "[CHAT] Delegating message ({} chars, {} history)",
        request.prompt_text().len(),
        request.chat_history.len()
    );
    let (agent, response) = state.delegator.delegate(&request).await;

    HttpResponse::Ok().json(serde_json::json!({
        "success": !response.is_error(),
        "agent": agent,
        "response": response,
    }))
}

async fn orchestrate(state: &AppState, request: ChatRequest) -> HttpResponse {
    let request_id = request
        .request_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let request = request.with_request_id(request_id.clone());
    let timeout = Duration::from_secs(state.config.orchestration_timeout_secs);
    log::info!("[CHAT] Orchestrating request {}", request_id);

    match tokio::time::timeout(timeout, state.orchestration.run_for_request(&request)).await {
        Ok(result) => HttpResponse::Ok().json(serde_json::json!({
            "success": result.error_message().is_none(),
            "request_id": request_id,
            "final_answer": result.final_answer,
            "subtask_outputs": result.subtask_outputs,
            "metadata": result.metadata,
        })),
        Err(_) => {
            let message = format!("orchestration timed out after {}s", timeout.as_secs());
            log::error!("[CHAT] Request {}: {}", request_id, message);
            state
                .progress
                .emit_final_complete(&request_id, DEGRADED_ANSWER, Some(&message));
            HttpResponse::Ok().json(serde_json::json!({
                "success": false,
                "request_id": request_id,
                "final_answer": DEGRADED_ANSWER,
                "subtask_outputs": [],
                "metadata": { "error_message": message },
            }))
        }
    }
}

async fn stream(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let request_id = path.into_inner();
    let frames = state
        .progress
        .event_stream(&request_id)
        .map(|frame| Ok::<_, actix_web::Error>(web::Bytes::from(frame)));

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRegistry;
    use crate::ai::RetryPolicy;
    use crate::config::Config;
    use crate::delegator::Delegator;
    use crate::orchestration::OrchestrationFlow;
    use crate::progress::ProgressHub;
    use crate::telemetry::LogMetricsSink;
    use crate::test_support::{ScriptedLlm, StaticAgent};
    use crate::tools::TokenTable;
    use actix_web::{test, App};
    use serde_json::Value;
    use std::sync::Arc;

    fn app_state(llm: Arc<ScriptedLlm>) -> web::Data<AppState> {
        let mut registry = AgentRegistry::new();
        registry.register(StaticAgent::success("default", "Hello there."));
        registry.register(StaticAgent::success("crypto_data", "BTC is $64,000."));
        let registry = Arc::new(registry);
        let progress = ProgressHub::default();

        web::Data::new(AppState {
            config: Config::from_env(),
            agent_registry: registry.clone(),
            tool_registry: Arc::new(crate::tools::create_default_registry(Arc::new(TokenTable::default()))),
            delegator: Arc::new(
                Delegator::new(registry.clone(), llm.clone(), Arc::new(LogMetricsSink))
                    .with_retry_policy(RetryPolicy::immediate(1)),
            ),
            orchestration: Arc::new(
                OrchestrationFlow::new(registry, llm, progress.clone())
                    .with_retry_policy(RetryPolicy::immediate(1)),
            ),
            progress,
        })
    }

    #[actix_web::test]
    async fn test_chat_delegates_to_ranked_agent() {
        let state = app_state(ScriptedLlm::texts(&[r#"{"agents": ["crypto_data"]}"#]));
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(serde_json::json!({ "prompt": "price of btc" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["agent"], "crypto_data");
        assert_eq!(body["response"]["content"], "BTC is $64,000.");
    }

    #[actix_web::test]
    async fn test_chat_rejects_empty_prompt() {
        let llm = ScriptedLlm::texts(&[]);
        let state = app_state(llm.clone());
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(serde_json::json!({ "prompt": "   " }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], false);
        assert_eq!(body["response"]["error_message"], "Prompt cannot be empty");
        assert_eq!(llm.calls(), 0);
    }

    #[actix_web::test]
    async fn test_multiagent_run_then_stream() {
        let llm = ScriptedLlm::texts(&[
            r#"{"subtasks": ["Get the BTC price"]}"#,
            r#"{"assignments": [{"subtask": "Get the BTC price", "agents": ["crypto_data"]}]}"#,
            "BTC trades at $64,000.",
        ]);
        let state = app_state(llm);
        let progress = state.progress.clone();
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(serde_json::json!({
                "prompt": "price of btc",
                "use_multiagent": true,
                "request_id": "req-http"
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["request_id"], "req-http");
        assert_eq!(body["final_answer"], "BTC trades at $64,000.");
        assert!(progress.has_queue("req-http"));

        let req = test::TestRequest::get().uri("/api/chat/stream/req-http").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let bytes = test::read_body(resp).await;
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("data: "));
        assert!(text.contains("\"type\":\"final_complete\""));
        assert!(text.trim_end().ends_with('}'));
        assert!(!progress.has_queue("req-http"));
    }
}
