use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;

use conductor_backend::agents::{self, AgentRegistry};
use conductor_backend::ai::{OpenAIClient, RetryPolicy};
use conductor_backend::config::Config;
use conductor_backend::controllers;
use conductor_backend::delegator::Delegator;
use conductor_backend::orchestration::OrchestrationFlow;
use conductor_backend::progress::{ProgressHub, DEFAULT_MAX_IDLE_HEARTBEATS};
use conductor_backend::telemetry::LogMetricsSink;
use conductor_backend::tools::{self, TokenTable};
use conductor_backend::AppState;

/// Unsubscribed progress queues older than this are dropped
const STALE_QUEUE_AGE: Duration = Duration::from_secs(15 * 60);
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn startup_error(message: String) -> std::io::Error {
    log::error!("{}", message);
    std::io::Error::other(message)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;
    log::info!("Using config directory: {:?}", config.config_dir);

    log::info!("Loading token configs from config directory");
    let tokens = TokenTable::load(&config.config_dir.join("tokens.ron")).unwrap_or_else(|e| {
        log::warn!("Token table unavailable ({}), token tools will find nothing", e);
        TokenTable::default()
    });
    let tokens = Arc::new(tokens);

    log::info!("Loading agent descriptors from config directory");
    let descriptors = agents::load_agent_descriptors(&config.config_dir.join("agents.ron"))
        .map_err(|e| startup_error(format!("Failed to load agents: {}", e)))?;

    let agent_llm = OpenAIClient::new(
        &config.llm_api_key,
        Some(&config.llm_endpoint),
        Some(&config.llm_model),
        Some(config.llm_max_tokens),
        config.llm_timeout_secs,
    )
    .map_err(startup_error)?;
    let planning_llm = OpenAIClient::new(
        &config.llm_api_key,
        Some(&config.llm_endpoint),
        Some(&config.llm_planning_model),
        Some(config.llm_max_tokens),
        config.llm_timeout_secs,
    )
    .map_err(startup_error)?;
    log::info!(
        "LLM endpoint {} (agents: {}, planning: {})",
        config.llm_endpoint,
        agent_llm.model(),
        planning_llm.model()
    );
    let agent_llm = Arc::new(agent_llm);
    let planning_llm = Arc::new(planning_llm);

    // Initialize Tool Registry with built-in tools
    log::info!("Initializing tool registry");
    let tool_registry = Arc::new(tools::create_default_registry(tokens));
    log::info!("Registered {} tools", tool_registry.len());

    log::info!("Initializing agent registry");
    let agent_registry: Arc<AgentRegistry> = Arc::new(agents::create_default_registry(
        descriptors,
        agent_llm,
        tool_registry.clone(),
    ));

    let metrics = Arc::new(LogMetricsSink);
    let progress = ProgressHub::new(
        Duration::from_secs(config.stream_heartbeat_secs.max(1)),
        DEFAULT_MAX_IDLE_HEARTBEATS,
    );

    let delegator = Arc::new(
        Delegator::new(agent_registry.clone(), planning_llm.clone(), metrics.clone())
            .with_max_retries(config.ranking_max_retries),
    );
    let orchestration = Arc::new(
        OrchestrationFlow::new(agent_registry.clone(), planning_llm, progress.clone())
            .with_metrics(metrics)
            .with_retry_policy(RetryPolicy::default()),
    );

    // Background sweep for progress queues nobody subscribed to
    let sweeper = progress.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            sweeper.purge_stale(STALE_QUEUE_AGE);
        }
    });

    log::info!("Starting Conductor server on port {}", port);
    log::info!("Progress streams available at /api/chat/stream/{{request_id}}");

    let state = web::Data::new(AppState {
        config,
        agent_registry: agent_registry.clone(),
        tool_registry,
        delegator,
        orchestration,
        progress,
    });

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::agents::config)
            .configure(controllers::chat::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    log::info!("Server stopped, cleaning up agents");
    agent_registry.cleanup_all().await;
    Ok(())
}
