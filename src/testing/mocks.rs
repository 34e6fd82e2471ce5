//! Scriptable test doubles for the loop's collaborators.
//!
//! Every mock is thread-safe and records what it was asked, so tests can
//! assert both on the run outcome and on the exact calls made.

use crate::error::AutoscadError;
use crate::events::{ProgressEvent, ProgressSink};
use crate::llm::{ChatMessage, ImageAttachment, LlmClient};
use crate::prompt::PromptKind;
use crate::render::{RenderOutcome, RenderService, RenderedViews, ViewSet};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Mock LLM Client
// =============================================================================

/// A scripted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    Error(String),
}

/// One recorded call to [`MockLlmClient`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: Option<PromptKind>,
    pub messages: Vec<ChatMessage>,
    pub image_count: usize,
}

impl RecordedCall {
    /// Content of the last user message.
    pub fn user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::llm::Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Mock language model that answers per conversation kind.
///
/// Replies queued with [`with_reply`](Self::with_reply) are consumed in
/// order; once a queue is empty the kind's default reply is used.
///
/// # Example
///
/// ```rust,ignore
/// let llm = MockLlmClient::new()
///     .with_reply(PromptKind::Evaluate, "NO\nThe cube is missing")
///     .with_reply(PromptKind::Evaluate, "YES\nLooks right")
///     .with_reply(PromptKind::Codegen, "cube(10);");
///
/// assert_eq!(llm.call_count(), 0);
/// ```
#[derive(Debug)]
pub struct MockLlmClient {
    model: String,
    images_supported: bool,
    delay: Option<Duration>,
    defaults: HashMap<PromptKind, String>,
    queues: Mutex<HashMap<PromptKind, VecDeque<ScriptedReply>>>,
    failures: HashMap<PromptKind, String>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicU32,
}

impl Clone for MockLlmClient {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            images_supported: self.images_supported,
            delay: self.delay,
            defaults: self.defaults.clone(),
            queues: Mutex::new(locked(&self.queues).clone()),
            failures: self.failures.clone(),
            calls: Mutex::new(locked(&self.calls).clone()),
            call_count: AtomicU32::new(self.call_count.load(Ordering::SeqCst)),
        }
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        let defaults = HashMap::from([
            (PromptKind::Evaluate, "NO\nThe model does not match yet.".to_string()),
            (
                PromptKind::Plan,
                r#"[{"action": "modify", "description": "adjust the geometry"}]"#.to_string(),
            ),
            (PromptKind::Codegen, "cube(10);".to_string()),
            (PromptKind::Repair, "cube(10);".to_string()),
        ]);
        Self {
            model: "mock-model".to_string(),
            images_supported: false,
            delay: None,
            defaults,
            queues: Mutex::new(HashMap::new()),
            failures: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }
}

impl MockLlmClient {
    /// Create a new mock with default replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next call of `kind`.
    #[must_use]
    pub fn with_reply(self, kind: PromptKind, reply: &str) -> Self {
        locked(&self.queues)
            .entry(kind)
            .or_default()
            .push_back(ScriptedReply::Text(reply.to_string()));
        self
    }

    /// Queue a failure for the next call of `kind`.
    #[must_use]
    pub fn with_error_reply(self, kind: PromptKind, error: &str) -> Self {
        locked(&self.queues)
            .entry(kind)
            .or_default()
            .push_back(ScriptedReply::Error(error.to_string()));
        self
    }

    /// Reply used once the queue for `kind` is empty.
    #[must_use]
    pub fn with_default_reply(mut self, kind: PromptKind, reply: &str) -> Self {
        self.defaults.insert(kind, reply.to_string());
        self
    }

    /// Make every call of `kind` fail.
    #[must_use]
    pub fn with_failure(mut self, kind: PromptKind, error: &str) -> Self {
        self.failures.insert(kind, error.to_string());
        self
    }

    /// Sleep before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report image support.
    #[must_use]
    pub fn with_images_support(mut self, supported: bool) -> Self {
        self.images_supported = supported;
        self
    }

    /// Set the model name.
    #[must_use]
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model = name.to_string();
        self
    }

    /// Total number of calls.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        locked(&self.calls).clone()
    }

    /// Recorded calls of one kind, in order.
    pub fn calls_of(&self, kind: PromptKind) -> Vec<RecordedCall> {
        locked(&self.calls)
            .iter()
            .filter(|c| c.kind == Some(kind))
            .cloned()
            .collect()
    }

    /// Number of calls of one kind.
    pub fn count_of(&self, kind: PromptKind) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| c.kind == Some(kind))
            .count()
    }

    fn next_reply(&self, kind: Option<PromptKind>) -> ScriptedReply {
        let Some(kind) = kind else {
            return ScriptedReply::Text(String::new());
        };
        if let Some(error) = self.failures.get(&kind) {
            return ScriptedReply::Error(error.clone());
        }
        if let Some(reply) = locked(&self.queues)
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        ScriptedReply::Text(self.defaults.get(&kind).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[ChatMessage], images: &[ImageAttachment]) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let kind = PromptKind::of(messages);
        locked(&self.calls).push(RecordedCall {
            kind,
            messages: messages.to_vec(),
            image_count: images.len(),
        });
        let reply = self.next_reply(kind);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Error(error) => bail!("{}", error),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_images(&self) -> bool {
        self.images_supported
    }
}

// =============================================================================
// Mock Renderer
// =============================================================================

/// Placeholder bytes returned for each successfully rendered view.
pub const MOCK_PNG: &[u8] = b"\x89PNG\r\n\x1a\nmock";

/// Mock renderer with scripted outcomes.
///
/// Queued outcomes are consumed first. After that a source is rejected if
/// it contains a registered failure pattern, and otherwise renders one
/// [`MOCK_PNG`] per view.
///
/// # Example
///
/// ```rust,ignore
/// let renderer = MockRenderer::new()
///     .with_failing_pattern("syntax_error", "ERROR: Parser error");
/// ```
#[derive(Debug)]
pub struct MockRenderer {
    queue: Mutex<VecDeque<Result<RenderOutcome, String>>>,
    failing_patterns: Vec<(String, String)>,
    always_fail: Option<String>,
    error: Option<String>,
    missing_tool: Option<String>,
    delay: Option<Duration>,
    sources: Mutex<Vec<String>>,
    call_count: AtomicU32,
}

impl Clone for MockRenderer {
    fn clone(&self) -> Self {
        Self {
            queue: Mutex::new(locked(&self.queue).clone()),
            failing_patterns: self.failing_patterns.clone(),
            always_fail: self.always_fail.clone(),
            error: self.error.clone(),
            missing_tool: self.missing_tool.clone(),
            delay: self.delay,
            sources: Mutex::new(locked(&self.sources).clone()),
            call_count: AtomicU32::new(self.call_count.load(Ordering::SeqCst)),
        }
    }
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            failing_patterns: Vec::new(),
            always_fail: None,
            error: None,
            missing_tool: None,
            delay: None,
            sources: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }
}

impl MockRenderer {
    /// Create a renderer that renders everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next render.
    #[must_use]
    pub fn with_outcome(self, outcome: RenderOutcome) -> Self {
        locked(&self.queue).push_back(Ok(outcome));
        self
    }

    /// Queue a render failure with `diagnostic` for the next render.
    #[must_use]
    pub fn with_failure(self, diagnostic: &str) -> Self {
        self.with_outcome(RenderOutcome::failure(diagnostic))
    }

    /// Queue a renderer error (the renderer could not run) for the next render.
    #[must_use]
    pub fn with_error_once(self, error: &str) -> Self {
        locked(&self.queue).push_back(Err(error.to_string()));
        self
    }

    /// Fail any source containing `pattern` with `diagnostic`.
    #[must_use]
    pub fn with_failing_pattern(mut self, pattern: &str, diagnostic: &str) -> Self {
        self.failing_patterns
            .push((pattern.to_string(), diagnostic.to_string()));
        self
    }

    /// Fail every render with `diagnostic`.
    #[must_use]
    pub fn always_failing(mut self, diagnostic: &str) -> Self {
        self.always_fail = Some(diagnostic.to_string());
        self
    }

    /// Return an error from every render.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Fail every render as if the renderer binary were not installed.
    #[must_use]
    pub fn with_missing_tool(mut self, tool: &str) -> Self {
        self.missing_tool = Some(tool.to_string());
        self
    }

    /// Sleep before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of render calls.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Sources passed to `render`, in order.
    pub fn rendered_sources(&self) -> Vec<String> {
        locked(&self.sources).clone()
    }

    fn outcome_for(&self, source: &str, views: &ViewSet) -> Result<RenderOutcome> {
        if let Some(scripted) = locked(&self.queue).pop_front() {
            return scripted.map_err(|e| anyhow::anyhow!(e));
        }
        if let Some(tool) = &self.missing_tool {
            return Err(AutoscadError::MissingTool { tool: tool.clone() }.into());
        }
        if let Some(error) = &self.error {
            bail!("{}", error);
        }
        if let Some(diagnostic) = &self.always_fail {
            return Ok(RenderOutcome::failure(diagnostic.clone()));
        }
        if let Some((_, diagnostic)) = self
            .failing_patterns
            .iter()
            .find(|(pattern, _)| source.contains(pattern.as_str()))
        {
            return Ok(RenderOutcome::failure(diagnostic.clone()));
        }

        let mut images = RenderedViews::new();
        for view in views.iter() {
            images.push(view.name.clone(), MOCK_PNG.to_vec());
        }
        Ok(RenderOutcome::Images(images))
    }
}

#[async_trait]
impl RenderService for MockRenderer {
    async fn render(&self, source: &str, views: &ViewSet) -> Result<RenderOutcome> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        locked(&self.sources).push(source.to_string());
        let outcome = self.outcome_for(source, views);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Progress sink that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        locked(&self.events).clone()
    }

    /// Event `type` tags, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        locked(&self.events).iter().map(ProgressEvent::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        locked(&self.events)
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    pub fn last(&self) -> Option<ProgressEvent> {
        locked(&self.events).last().cloned()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: &ProgressEvent) {
        locked(&self.events).push(event.clone());
    }
}
