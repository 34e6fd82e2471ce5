//! OpenAI-compatible chat completions client (OpenRouter by default).
//!
//! Rendered images travel as `image_url` content parts holding base64
//! `data:` URIs, the format OpenRouter and OpenAI vision models accept.
//! Rate limits and server errors are retried with exponential backoff.

use super::{ChatMessage, ImageAttachment, LlmClient, LlmConfig, Role};
use crate::error::AutoscadError;
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Base backoff delay in milliseconds for retry attempts.
pub const RETRY_BACKOFF_BASE_MS: u64 = 2000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Multiplier for exponential backoff.
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Calculate exponential backoff delay for a given attempt number (1-indexed).
///
/// ```
/// use autoscad::llm::openrouter::calculate_backoff;
/// use std::time::Duration;
///
/// assert_eq!(calculate_backoff(1), Duration::from_millis(2000));
/// assert_eq!(calculate_backoff(3), Duration::from_millis(8000));
/// ```
#[must_use]
pub fn calculate_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier = BACKOFF_MULTIPLIER.saturating_pow(exponent);
    let delay = RETRY_BACKOFF_BASE_MS.saturating_mul(multiplier);
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

// =============================================================================
// API Errors
// =============================================================================

/// Errors from the chat completions endpoint.
#[derive(Error, Debug)]
pub enum LlmApiError {
    /// Rate limit exceeded - should retry with backoff.
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Authentication failed - check API key.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Invalid request - check prompt/parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Server error - may be transient.
    #[error("Server error: {message}")]
    ServerError { message: String },

    /// Network/connection error.
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// Invalid response from API.
    #[error("Invalid API response: {message}")]
    InvalidResponse { message: String },
}

impl LlmApiError {
    /// Check if this error indicates the request should be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::ConnectionError { .. }
        )
    }

    /// Delay before retrying, honoring a server-provided hint.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Duration::from_secs(*secs).min(Duration::from_millis(MAX_BACKOFF_MS)),
            _ => calculate_backoff(attempt),
        }
    }

    /// Classify an error from HTTP status code and response body.
    pub fn from_response(status_code: u16, body: &str) -> Self {
        let message = error_message(body);
        match status_code {
            429 => Self::RateLimited {
                retry_after_secs: extract_retry_after(body),
                message,
            },
            401 | 403 => Self::AuthenticationFailed { message },
            400 | 404 | 413 | 422 => Self::InvalidRequest { message },
            500..=599 => Self::ServerError { message },
            _ => Self::InvalidResponse {
                message: format!("HTTP {}: {}", status_code, message),
            },
        }
    }
}

/// Pull `error.message` out of a JSON error body, or return the body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn retry_after_hint() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:retry.?after|wait)[:\s]+(\d+)").expect("valid retry hint regex")
    })
}

fn extract_retry_after(body: &str) -> Option<u64> {
    let secs: u64 = retry_after_hint().captures(body)?.get(1)?.as_str().parse().ok()?;
    (secs > 0 && secs < 300).then_some(secs)
}

// =============================================================================
// Wire Format
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: Role,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Convert a conversation to wire messages, attaching images to the last
/// user message.
fn to_wire(messages: &[ChatMessage], images: &[ImageAttachment]) -> Vec<WireMessage> {
    let image_target = if images.is_empty() {
        None
    } else {
        messages.iter().rposition(|m| m.role == Role::User)
    };

    messages
        .iter()
        .enumerate()
        .map(|(idx, message)| {
            let content = if Some(idx) == image_target {
                let mut parts = vec![ContentPart::Text {
                    text: message.content.clone(),
                }];
                for image in images {
                    parts.push(ContentPart::Text {
                        text: format!("View: {}", image.label),
                    });
                    parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_uri(),
                        },
                    });
                }
                WireContent::Parts(parts)
            } else {
                WireContent::Text(message.content.clone())
            };
            WireMessage {
                role: message.role,
                content,
            }
        })
        .collect()
}

// =============================================================================
// Client
// =============================================================================

/// Chat completions client for OpenRouter and OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl ChatCompletionsClient {
    /// Create a client with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: LlmConfig, api_key: String) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("autoscad/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AutoscadError::llm(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    fn build_request(&self, messages: &[ChatMessage], images: &[ImageAttachment]) -> ChatRequest {
        let images = if self.config.vision { images } else { &[] };
        ChatRequest {
            model: self.config.model.clone(),
            messages: to_wire(messages, images),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        }
    }

    async fn send_once(&self, request: &ChatRequest) -> std::result::Result<String, LlmApiError> {
        let response = self
            .http
            .post(&self.config.base_url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/asmundstavdahl/AutoSCAD")
            .header("X-Title", "AutoSCAD")
            .json(request)
            .send()
            .await
            .map_err(|e| LlmApiError::ConnectionError {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmApiError::ConnectionError {
                message: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(LlmApiError::from_response(status.as_u16(), &body));
        }

        // Some providers report failures with a 200 and an `error` object
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            if value.get("error").is_some() {
                return Err(LlmApiError::from_response(
                    value["error"]["code"].as_u64().unwrap_or(500) as u16,
                    &body,
                ));
            }
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmApiError::InvalidResponse {
                message: format!("{}: {}", e, body),
            })?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmApiError::InvalidResponse {
                message: "response contained no choices".to_string(),
            })?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, messages: &[ChatMessage], images: &[ImageAttachment]) -> Result<String> {
        let request = self.build_request(messages, images);
        debug!(
            model = %self.config.model,
            messages = messages.len(),
            images = images.len(),
            "sending chat completion"
        );

        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(content) => {
                    debug!(chars = content.len(), "chat completion received");
                    return Ok(content);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = err.retry_delay(attempt);
                    warn!(
                        "{} - retrying in {:?} (attempt {}/{})",
                        err, delay, attempt, self.config.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn supports_images(&self) -> bool {
        self.config.vision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(vision: bool) -> ChatCompletionsClient {
        let config = LlmConfig {
            vision,
            ..LlmConfig::default()
        };
        ChatCompletionsClient::new(config, "test-key".to_string()).unwrap()
    }

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(1), Duration::from_millis(2000));
        assert_eq!(calculate_backoff(2), Duration::from_millis(4000));
        assert_eq!(calculate_backoff(20), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn test_from_response_classification() {
        assert!(matches!(
            LlmApiError::from_response(429, "slow down"),
            LlmApiError::RateLimited { .. }
        ));
        assert!(matches!(
            LlmApiError::from_response(401, r#"{"error": {"message": "bad key"}}"#),
            LlmApiError::AuthenticationFailed { ref message } if message == "bad key"
        ));
        assert!(matches!(
            LlmApiError::from_response(400, "{}"),
            LlmApiError::InvalidRequest { .. }
        ));
        assert!(matches!(
            LlmApiError::from_response(502, "bad gateway"),
            LlmApiError::ServerError { .. }
        ));
        assert!(matches!(
            LlmApiError::from_response(302, "moved"),
            LlmApiError::InvalidResponse { .. }
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(LlmApiError::from_response(429, "").is_retryable());
        assert!(LlmApiError::from_response(503, "").is_retryable());
        assert!(!LlmApiError::from_response(401, "").is_retryable());
        assert!(!LlmApiError::from_response(400, "").is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = LlmApiError::from_response(429, "Please retry after 7 seconds");
        assert_eq!(err.retry_delay(1), Duration::from_secs(7));

        let err = LlmApiError::from_response(429, "no hint");
        assert_eq!(err.retry_delay(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_retry_after_hint_regex_is_shared() {
        assert!(std::ptr::eq(retry_after_hint(), retry_after_hint()));
        assert_eq!(extract_retry_after("Retry-After: 12"), Some(12));
        assert_eq!(extract_retry_after("wait 0 seconds"), None);
        assert_eq!(extract_retry_after("retry after 900"), None);
    }

    #[test]
    fn test_text_only_request() {
        let request = client(true).build_request(
            &[ChatMessage::system("sys"), ChatMessage::user("hello")],
            &[],
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "google/gemma-3-27b-it");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["stream"], false);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_images_attach_to_last_user_message() {
        let images = vec![
            ImageAttachment::png("front", vec![0xff]),
            ImageAttachment::png("top", vec![0x00]),
        ];
        let request = client(true).build_request(
            &[
                ChatMessage::system("sys"),
                ChatMessage::user("first"),
                ChatMessage::assistant("ok"),
                ChatMessage::user("look"),
            ],
            &images,
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][1]["content"], "first");

        let parts = json["messages"][3]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "look");
        assert_eq!(parts[1]["text"], "View: front");
        assert_eq!(parts[2]["type"], "image_url");
        assert_eq!(parts[2]["image_url"]["url"], "data:image/png;base64,/w==");
        assert_eq!(parts[3]["text"], "View: top");
    }

    #[test]
    fn test_images_dropped_without_vision() {
        let images = vec![ImageAttachment::png("front", vec![1])];
        let request = client(false).build_request(&[ChatMessage::user("look")], &images);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["content"], "look");
        assert!(!client(false).supports_images());
    }

    #[test]
    fn test_response_parsing() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "YES"}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("YES"));

        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
