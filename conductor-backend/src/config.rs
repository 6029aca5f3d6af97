use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub llm_model: String,
    /// Model used for ranking, planning and synthesis calls
    pub llm_planning_model: String,
    pub llm_max_tokens: u32,
    pub llm_timeout_secs: u64,
    pub config_dir: PathBuf,
    pub ranking_max_retries: u32,
    pub orchestration_timeout_secs: u64,
    pub stream_heartbeat_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let llm_model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Self {
            port: parse_or("PORT", 8080),
            llm_endpoint: env::var("LLM_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            llm_api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            llm_planning_model: env::var("LLM_PLANNING_MODEL").unwrap_or_else(|_| llm_model.clone()),
            llm_model,
            llm_max_tokens: parse_or("LLM_MAX_TOKENS", 4096),
            llm_timeout_secs: parse_or("LLM_TIMEOUT_SECS", 120),
            config_dir: resolve_config_dir(env::var("CONFIG_DIR").ok()),
            ranking_max_retries: parse_or("RANKING_MAX_RETRIES", 3),
            orchestration_timeout_secs: parse_or("ORCHESTRATION_TIMEOUT_SECS", 300),
            stream_heartbeat_secs: parse_or("STREAM_HEARTBEAT_SECS", 30),
        }
    }
}

/// Read an env var and parse it, falling back to `default` when unset or invalid
fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Pick the static config directory.
/// Checks an explicit override first, then ./config, then ../config (for running from the crate dir).
fn resolve_config_dir(explicit: Option<String>) -> PathBuf {
    if let Some(dir) = explicit.filter(|d| !d.trim().is_empty()) {
        return PathBuf::from(dir);
    }
    if Path::new("./config").exists() {
        PathBuf::from("./config")
    } else {
        PathBuf::from("../config")
    }
}
