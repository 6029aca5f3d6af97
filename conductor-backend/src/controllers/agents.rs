//! Read-only views of the agent and tool registries

use actix_web::{web, HttpResponse, Responder};

use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/agents").route(web::get().to(list_agents)));
    cfg.service(web::resource("/api/tools").route(web::get().to(list_tools)));
}

/// Enabled agents, as the ranking and planning prompts see them
async fn list_agents(state: web::Data<AppState>) -> impl Responder {
    let agents = state.agent_registry.describe_for_llm();
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "total": agents.len(),
        "agents": agents,
    }))
}

async fn list_tools(state: web::Data<AppState>) -> impl Responder {
    let tools = state.tool_registry.definitions();
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "total": tools.len(),
        "tools": tools,
    }))
}
