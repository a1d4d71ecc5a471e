//! Claude Messages client — the single point of entry for all model calls
//! in Gapwise.
//!
//! ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
//! The extraction pipeline only ever consumes text replies, so `call`
//! returns the reply text rather than the raw response envelope; `call_json`
//! layers schema parsing on top. The model is chosen per call because the
//! extraction cache keys on the model that actually produced the output.

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
/// Default extraction model; overridable per request via
/// `extraction.extractor_model`.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const MAX_OUTPUT_TOKENS: u32 = 4096;
/// Attempts per call for transient failures (connection errors, 429, 5xx).
const TRANSPORT_ATTEMPTS: u32 = 3;
/// First retry delay; doubles on each further attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
/// Hard cap on a single model call. Malformed output is handled by the
/// extractor's reask loop, not by waiting longer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,
}

/// Transient failures worth another attempt: network-level errors, rate
/// limiting, and server-side 5xx. Everything else is final.
fn is_retryable(e: &LlmError) -> bool {
    match e {
        LlmError::Http(_) => true,
        LlmError::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

// ── Messages API wire shapes ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserTurn<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ReplyBlock>,
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct ReplyBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct TokenUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Pulls a human-readable message out of an Anthropic error body, falling
/// back to the raw body when it is not the documented shape.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiError {
        error: ApiErrorDetail,
    }
    #[derive(Deserialize)]
    struct ApiErrorDetail {
        message: String,
    }

    serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

/// The single LLM client used by the extraction pipeline.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
        }
    }

    /// Sends one user turn and returns the model's text reply.
    ///
    /// Transient failures are retried with doubling delays up to the attempt
    /// budget; non-retryable failures surface immediately.
    pub async fn call(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
    ) -> Result<String, LlmError> {
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 1;

        loop {
            match self.send(model, prompt, system).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < TRANSPORT_ATTEMPTS && is_retryable(&e) => {
                    warn!(
                        attempt,
                        "Claude call failed ({e}); retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One request/response round trip, no retries.
    async fn send(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        let body = MessagesRequest {
            model,
            max_tokens: MAX_OUTPUT_TOKENS,
            system,
            messages: [UserTurn {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_message(&raw),
            });
        }

        let reply: MessagesReply = response.json().await?;
        debug!(
            input_tokens = reply.usage.input_tokens,
            output_tokens = reply.usage.output_tokens,
            model,
            "Claude call succeeded"
        );

        let text: String = reply
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();
        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(text)
    }

    /// Calls the model and parses the reply as JSON. The prompt must
    /// instruct the model to return JSON only.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
    ) -> Result<T, LlmError> {
        let reply = self.call(model, prompt, system).await?;
        serde_json::from_str(unfence(&reply)).map_err(LlmError::Parse)
    }
}

/// Models sometimes wrap JSON in a markdown fence despite instructions.
/// Peels one layer of ``` fencing, tolerating a `json` language tag and a
/// missing closing fence.
fn unfence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_carries_selected_model() {
        let body = MessagesRequest {
            model: "claude-haiku-4-5",
            max_tokens: 64,
            system: "be terse",
            messages: [UserTurn {
                role: "user",
                content: "hello",
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], json!("claude-haiku-4-5"));
        assert_eq!(value["messages"][0]["role"], json!("user"));
        assert_eq!(value["messages"][0]["content"], json!("hello"));
    }

    #[test]
    fn test_retryable_classification() {
        let rate_limited = LlmError::Api {
            status: 429,
            message: String::new(),
        };
        let overloaded = LlmError::Api {
            status: 529,
            message: String::new(),
        };
        let bad_request = LlmError::Api {
            status: 400,
            message: String::new(),
        };
        assert!(is_retryable(&rate_limited));
        assert!(is_retryable(&overloaded));
        assert!(!is_retryable(&bad_request));
        assert!(!is_retryable(&LlmError::EmptyContent));
    }

    #[test]
    fn test_error_message_prefers_documented_shape() {
        let body = r#"{"error": {"type": "overloaded_error", "message": "Overloaded"}}"#;
        assert_eq!(error_message(body), "Overloaded");
        assert_eq!(error_message("upstream exploded"), "upstream exploded");
    }

    #[test]
    fn test_unfence_peels_tagged_and_bare_fences() {
        assert_eq!(unfence("```json\n{\"k\": 1}\n```"), "{\"k\": 1}");
        assert_eq!(unfence("```\n[1, 2]\n```"), "[1, 2]");
    }

    #[test]
    fn test_unfence_tolerates_missing_closing_fence() {
        assert_eq!(unfence("```json\n{\"k\": 1}"), "{\"k\": 1}");
    }

    #[test]
    fn test_unfence_leaves_plain_json_untouched() {
        assert_eq!(unfence("  {\"k\": 1} "), "{\"k\": 1}");
    }

    #[test]
    fn test_reply_text_blocks_only() {
        let reply: MessagesReply = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "{\"skills\": []}"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();
        let text: String = reply
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(text, "{\"skills\": []}");
    }
}
