//! Language model client abstraction.
//!
//! The refinement loop talks to the model through the [`LlmClient`] trait:
//! an ordered conversation of `{role, content}` messages goes in, optionally
//! with rendered images attached to the last user message, and free-form
//! text comes out.
//!
//! # Architecture
//!
//! - **Object-safe**: the loop holds an `Arc<dyn LlmClient>`
//! - **Thread-safe**: `Send + Sync` so one client can serve concurrent runs
//! - **Async-first**: every call is a non-blocking request-response
//!
//! [`ChatCompletionsClient`] implements the trait for OpenRouter and other
//! OpenAI-compatible endpoints. Tests use
//! [`MockLlmClient`](crate::testing::MockLlmClient).
//!
//! # Example
//!
//! ```rust,ignore
//! use autoscad::llm::{create_llm_client, ChatMessage, LlmConfig};
//!
//! let client = create_llm_client(&LlmConfig::default())?;
//! let reply = client
//!     .complete(&[ChatMessage::user("Say YES")], &[])
//!     .await?;
//! ```

pub mod openrouter;

pub use openrouter::{ChatCompletionsClient, LlmApiError};

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::AutoscadError;

/// Abstraction for language model calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a conversation and return the model's text reply.
    ///
    /// `images` are attached to the last user message. Clients that cannot
    /// accept images ignore them; the loop only passes images when
    /// [`supports_images`](Self::supports_images) is true.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is unreachable, authentication fails,
    /// or the response cannot be decoded.
    async fn complete(&self, messages: &[ChatMessage], images: &[ImageAttachment]) -> Result<String>;

    /// Human-readable model identifier.
    fn model_name(&self) -> &str;

    /// Whether the model accepts image input.
    fn supports_images(&self) -> bool;
}

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An image attached to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Label shown to the model (the camera view name).
    pub label: String,
    /// MIME type of `data`.
    pub mime: String,
    /// Raw image bytes.
    pub data: Vec<u8>,
}

impl ImageAttachment {
    /// Create a PNG attachment.
    pub fn png(label: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            mime: "image/png".to_string(),
            data,
        }
    }

    /// Encode as a `data:` URI.
    #[must_use]
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.data))
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

/// Configuration for the chat-completions backend.
///
/// Loaded from the `llm` section of the settings file.
///
/// ```json
/// {
///   "llm": {
///     "model": "google/gemma-3-27b-it",
///     "api_key_env": "OPENROUTER_API_KEY",
///     "vision": true
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier sent to the endpoint.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Chat completions endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Whether rendered images are sent with evaluation and planning calls.
    #[serde(default = "default_true")]
    pub vision: bool,

    /// Maximum tokens in a reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature, if overridden.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Retries on rate limits and server errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_model() -> String {
    "google/gemma-3-27b-it".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_retries() -> u32 {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            vision: true,
            max_tokens: default_max_tokens(),
            temperature: None,
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::MissingApiKey`] if the variable is unset or empty.
    pub fn api_key(&self) -> crate::Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(AutoscadError::MissingApiKey {
                env_var: self.api_key_env.clone(),
            }),
        }
    }

    /// Validate the configuration, returning human-readable problems.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.model.trim().is_empty() {
            problems.push("llm.model must not be empty".to_string());
        }
        if self.api_key_env.trim().is_empty() {
            problems.push("llm.api_key_env must not be empty".to_string());
        }
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            problems.push(format!(
                "llm.base_url must be an http(s) URL (got '{}')",
                self.base_url
            ));
        }
        if self.max_tokens == 0 {
            problems.push("llm.max_tokens must be positive".to_string());
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                problems.push(format!("llm.temperature must be within 0.0..=2.0 (got {})", t));
            }
        }
        problems
    }
}

/// Create an LLM client from configuration.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the API key is missing.
pub fn create_llm_client(config: &LlmConfig) -> crate::Result<Box<dyn LlmClient>> {
    if let Some(problem) = config.problems().into_iter().next() {
        return Err(AutoscadError::InvalidConfig {
            field: "llm".to_string(),
            reason: problem,
        });
    }
    let api_key = config.api_key()?;
    Ok(Box::new(ChatCompletionsClient::new(config.clone(), api_key)?))
}
