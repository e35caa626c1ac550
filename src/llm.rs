//! LLM client layer
//!
//! The engine treats text generation as an opaque capability: anything that
//! can turn (system prompt, conversation, tool schemas) into one assistant
//! message satisfies `LlmClient`. The bundled implementation speaks the
//! OpenAI-compatible chat-completions protocol with tool calling, since any
//! OpenAI-compatible endpoint can be substituted via `base_url`.
//!
//! Transient HTTP errors are retried with exponential backoff; `Retry-After`
//! headers from rate-limited responses are honored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::retry::{with_retry, Attempt, RetryPolicy};

/// A string wrapper that redacts its value in Debug and Display output.
/// Prevents API keys from leaking into logs and error messages.
#[derive(Clone, Default)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Access the secret value (use sparingly — only for HTTP headers)
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Public Types
// ============================================================================

/// Tool definition advertised to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub parameters: serde_json::Value,
}

/// Message content types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: Option<bool>,
    },
}

/// Message in conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        }
    }

    pub fn assistant(text: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        }
    }

    pub fn tool_result(tool_use_id: &str, content: &str, is_error: bool) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.to_string(),
                content: content.to_string(),
                is_error: Some(is_error),
            }],
        }
    }

    /// Extract text content from message
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| {
                if let ContentBlock::Text { text } = block {
                    Some(text.clone())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract tool calls from message
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| {
                if let ContentBlock::ToolUse { id, name, input } = block {
                    Some(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        args: input.clone(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

/// LLM response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub message: Message,
    pub usage: TokenUsage,
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.message.tool_calls()
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Accumulate another usage record into this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Tool call from LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// LLM client trait — the engine's opaque text-completion capability
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a conversation, producing one assistant message
    async fn complete(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse>;
}

// ============================================================================
// HTTP Utilities
// ============================================================================

/// HTTP status codes that warrant a retry
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 529];

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    RETRYABLE_STATUS.contains(&status.as_u16())
}

/// Normalize base URL by stripping trailing /v1
fn normalize_base_url(base_url: &str) -> String {
    base_url
        .trim_end_matches('/')
        .trim_end_matches("/v1")
        .trim_end_matches('/')
        .to_string()
}

/// POST a JSON body, returning (status, Retry-After header, body text)
async fn http_post_json(
    client: &reqwest::Client,
    url: &str,
    headers: Vec<(&str, &str)>,
    body: &serde_json::Value,
) -> Result<(reqwest::StatusCode, Option<String>, String)> {
    let mut request = client.post(url);
    for (key, value) in headers {
        request = request.header(key, value);
    }
    request = request.json(body);

    let response = request
        .send()
        .await
        .context(format!("Failed to send request to {}", url))?;

    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let body = response.text().await?;

    Ok((status, retry_after, body))
}

// ============================================================================
// OpenAI-compatible Client
// ============================================================================

/// Chat-completions client for OpenAI-compatible endpoints
pub struct OpenAiClient {
    api_key: SecretString,
    model: String,
    base_url: String,
    client: reqwest::Client,
    retry_policy: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<SecretString>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.openai.com".to_string(),
            client: reqwest::Client::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<serde_json::Value> {
        let mut converted = Vec::new();
        for msg in messages {
            // Tool results use the dedicated "tool" role
            let mut is_tool_result = false;
            for block in &msg.content {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = block
                {
                    converted.push(serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    }));
                    is_tool_result = true;
                }
            }
            if is_tool_result {
                continue;
            }

            let tool_calls = msg.tool_calls();
            if msg.role == "assistant" && !tool_calls.is_empty() {
                converted.push(serde_json::json!({
                    "role": "assistant",
                    "content": msg.text(),
                    "tool_calls": tool_calls.iter().map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.args.to_string(),
                            }
                        })
                    }).collect::<Vec<_>>(),
                }));
                continue;
            }

            converted.push(serde_json::json!({
                "role": msg.role,
                "content": msg.text(),
            }));
        }
        converted
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let span = tracing::info_span!(
            "llm.completion",
            "llm.model" = %self.model,
            "llm.messages" = messages.len(),
        );
        async {
        let mut chat_messages = Vec::new();
        if let Some(sys) = system {
            chat_messages.push(serde_json::json!({
                "role": "system",
                "content": sys,
            }));
        }
        chat_messages.extend(self.convert_messages(messages));

        let mut request = serde_json::json!({
            "model": self.model,
            "messages": chat_messages,
        });
        if !tools.is_empty() {
            request["tools"] = serde_json::json!(self.convert_tools(tools));
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let auth_header = format!("Bearer {}", self.api_key.expose());

        let body = with_retry(&self.retry_policy, |_attempt| {
            let client = &self.client;
            let url = &url;
            let auth_header = &auth_header;
            let request = &request;
            async move {
                match http_post_json(
                    client,
                    url,
                    vec![("Authorization", auth_header.as_str())],
                    request,
                )
                .await
                {
                    Ok((status, retry_after, body)) => {
                        if status.is_success() {
                            Attempt::Done(body)
                        } else if is_retryable_status(status) {
                            Attempt::Again {
                                reason: format!("HTTP {}: {}", status, body),
                                retry_after: RetryPolicy::parse_retry_after(
                                    retry_after.as_deref(),
                                ),
                            }
                        } else {
                            Attempt::Abort(anyhow::anyhow!(
                                "LLM API error at {} ({}): {}",
                                url,
                                status,
                                body
                            ))
                        }
                    }
                    Err(e) => Attempt::Abort(e),
                }
            }
        })
        .await?;

        let response: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse chat-completions response")?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .context("No choices in LLM response")?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content.push(ContentBlock::Text { text });
            }
        }
        if let Some(tool_calls) = choice.message.tool_calls {
            for tc in tool_calls {
                content.push(ContentBlock::ToolUse {
                    id: tc.id,
                    name: tc.function.name.clone(),
                    input: serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                        tracing::warn!(
                            tool = tc.function.name.as_str(),
                            "Failed to parse tool arguments JSON: {}",
                            e
                        );
                        serde_json::Value::default()
                    }),
                });
            }
        }

        let usage = response.usage.unwrap_or_default();
        let llm_response = LlmResponse {
            message: Message {
                role: "assistant".to_string(),
                content,
            },
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            stop_reason: choice.finish_reason,
        };

        tracing::info!(
            prompt_tokens = llm_response.usage.prompt_tokens,
            completion_tokens = llm_response.usage.completion_tokens,
            stop_reason = llm_response.stop_reason.as_deref().unwrap_or("unknown"),
            "LLM completion finished"
        );

        Ok(llm_response)
        }
        .instrument(span)
        .await
    }
}

// Chat-completions API response types
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunction,
}

#[derive(Debug, Deserialize)]
struct ChatFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}
