use crate::ai::{Completion, CompletionRequest, LlmClient, ToolCall};
use crate::telemetry::TokenUsage;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Client for any OpenAI-compatible chat completions endpoint
#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OpenAICompletionRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize, Clone)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Deserialize, Clone)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAICompletionResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<OpenAIPromptTokenDetails>,
}

#[derive(Debug, Deserialize)]
struct OpenAIPromptTokenDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

impl OpenAIClient {
    pub fn new(
        api_key: &str,
        endpoint: Option<&str>,
        model: Option<&str>,
        max_tokens: Option<u32>,
        timeout_secs: u64,
    ) -> Result<Self, String> {
        let endpoint_url = endpoint
            .unwrap_or("https://api.openai.com/v1/chat/completions")
            .to_string();

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        // Only add auth header if API key is provided and not empty
        if !api_key.is_empty() {
            let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?;
            headers.insert(header::AUTHORIZATION, auth_value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        let model_name = match model {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => "gpt-4o-mini".to_string(),
        };

        Ok(Self {
            client,
            endpoint: endpoint_url,
            model: model_name,
            max_tokens: max_tokens.unwrap_or(4096),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: CompletionRequest) -> OpenAICompletionRequest {
        let api_messages: Vec<OpenAIMessage> = request
            .messages
            .into_iter()
            .map(|m| OpenAIMessage {
                role: m.role.to_string(),
                content: Some(m.content),
            })
            .collect();

        let openai_tools: Option<Vec<OpenAITool>> = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        tool_type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: serde_json::to_value(&t.input_schema)
                                .unwrap_or_else(|_| json!({"type": "object", "properties": {}})),
                        },
                    })
                    .collect(),
            )
        };

        let response_format = request.response_format.as_ref().map(|schema| {
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": false
                }
            })
        });

        OpenAICompletionRequest {
            model: self.model.clone(),
            messages: api_messages,
            max_tokens: self.max_tokens,
            tool_choice: openai_tools.as_ref().map(|_| "auto".to_string()),
            tools: openai_tools,
            response_format,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, String> {
        let request = self.build_request(request);

        log::info!(
            "[OPENAI] Sending request to {} with model {}, {} tools, schema: {}",
            self.endpoint,
            self.model,
            request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            request.response_format.is_some()
        );
        log::debug!(
            "[OPENAI] Full request:\n{}",
            serde_json::to_string_pretty(&request).unwrap_or_default()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("OpenAI API request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            if let Ok(error_response) = serde_json::from_str::<OpenAIErrorResponse>(&error_text) {
                return Err(format!("OpenAI API error ({}): {}", status, error_response.error.message));
            }

            return Err(format!(
                "OpenAI API returned error status: {}, body: {}",
                status, error_text
            ));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read OpenAI response: {}", e))?;

        log::debug!("[OPENAI] Raw response:\n{}", response_text);

        parse_completion(&response_text)
    }
}

/// Convert a raw chat-completions body into a [`Completion`]
fn parse_completion(body: &str) -> Result<Completion, String> {
    let response_data: OpenAICompletionResponse = serde_json::from_str(body)
        .map_err(|e| format!("Failed to parse OpenAI response: {} - body: {}", e, body))?;

    let choice = response_data
        .choices
        .first()
        .ok_or_else(|| "OpenAI API returned no choices".to_string())?;

    log::info!(
        "[OPENAI] Response - content_len: {}, tool_calls: {}, finish_reason: {:?}",
        choice.message.content.as_ref().map(|c| c.len()).unwrap_or(0),
        choice.message.tool_calls.as_ref().map(|t| t.len()).unwrap_or(0),
        choice.finish_reason
    );

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .as_ref()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(json!({})),
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = response_data
        .usage
        .map(|u| {
            let cached = u.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0);
            TokenUsage::new(u.prompt_tokens, u.completion_tokens, cached)
        })
        .unwrap_or_default();

    Ok(Completion {
        content: choice.message.content.clone().unwrap_or_default(),
        tool_calls,
        usage,
    })
}
