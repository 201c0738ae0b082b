//! Direct Anthropic API client — the subprocess-free fast path.
//!
//! Used by conductor-role agents that want structured output without paying
//! the CLI spawn cost. Structured responses go through a resilient
//! extraction policy: strict parse, then a fenced ```json block, then the
//! first balanced object, then a validation error. 429 responses map to the
//! retryable `RateLimited` error.

use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use async_trait::async_trait;

use crate::domain::models::provider::TokenUsage;
use crate::domain::ports::errors::OrchestratorError;
use crate::domain::ports::provider::{DirectApiClient, DirectApiRequest, DirectApiResponse};

use super::models::ModelTable;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Thinking budget per reasoning effort tier.
fn thinking_budget(effort: &str) -> u64 {
    match effort {
        "high" => 16_384,
        "medium" => 8_192,
        _ => 2_048,
    }
}

/// Direct API client over `reqwest`.
pub struct AnthropicApiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    table: ModelTable,
}

impl AnthropicApiClient {
    /// Build a client from a captured API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            table: ModelTable::anthropic_api(),
        }
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(&self, request: &DirectApiRequest) -> Value {
        let resolved = self.table.resolve(request.level);
        let mut body = json!({
            "model": resolved.model_id,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": [{"role": "user", "content": request.context}],
        });
        if let Some(effort) = resolved.reasoning_effort {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": thinking_budget(&effort),
            });
        }
        body
    }
}

#[async_trait]
impl DirectApiClient for AnthropicApiClient {
    #[instrument(skip(self, request), fields(level = request.level.as_str()))]
    async fn complete(
        &self,
        request: DirectApiRequest,
    ) -> Result<DirectApiResponse, OrchestratorError> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| OrchestratorError::TransientProviderFailure(format!("request: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let detail = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::RateLimited(detail));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::TransientProviderFailure(format!(
                "api status {status}: {detail}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| OrchestratorError::TransientProviderFailure(format!("body: {e}")))?;

        let text = body
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = TokenUsage {
            input_tokens: body
                .pointer("/usage/input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: body
                .pointer("/usage/output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        };

        let structured = match request.schema {
            Some(ref schema) => {
                let value = extract_json(&text)?;
                validate_required(&value, schema)?;
                Some(value)
            }
            None => None,
        };

        debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            structured = structured.is_some(),
            "Direct API completion finished"
        );

        Ok(DirectApiResponse {
            text,
            structured,
            usage,
        })
    }
}

/// Resilient JSON extraction: strict parse, fenced block, balanced object.
pub fn extract_json(text: &str) -> Result<Value, OrchestratorError> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(value);
    }

    if let Some(block) = fenced_json_block(text) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            return Ok(value);
        }
    }

    if let Some(candidate) = first_balanced_object(text) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Ok(value);
        }
    }

    Err(OrchestratorError::TransientProviderFailure(
        "response contained no parseable JSON object".to_string(),
    ))
}

/// The body of the first ```json fenced code block, if any.
fn fenced_json_block(text: &str) -> Option<&str> {
    let start = text.find("```json").map(|i| i + "```json".len())?;
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// The first balanced `{...}` span, tracking strings and escapes.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Check the extracted object against the schema's top-level `required`
/// list. Full JSON-Schema validation is out of scope for the fast path.
pub fn validate_required(value: &Value, schema: &Value) -> Result<(), OrchestratorError> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    for key in required.iter().filter_map(Value::as_str) {
        if value.get(key).is_none() {
            return Err(OrchestratorError::TransientProviderFailure(format!(
                "structured output missing required property '{key}'"
            )));
        }
    }
    Ok(())
}
