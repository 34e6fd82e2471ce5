//! Testing infrastructure for AutoSCAD.
//!
//! Test doubles for the renderer, the language model and the progress sink,
//! plus assertions over run events. They let the refinement loop be driven
//! through any scripted scenario without OpenSCAD or network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use autoscad::prompt::PromptKind;
//! use autoscad::testing::{MockLlmClient, MockRenderer, RecordingSink};
//!
//! let llm = MockLlmClient::new().with_reply(PromptKind::Evaluate, "YES\nDone");
//! let renderer = MockRenderer::new();
//! let sink = RecordingSink::new();
//! ```

pub mod assertions;
pub mod mocks;

pub use assertions::*;
pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ProgressEvent, ProgressSink};
    use crate::llm::{ChatMessage, ImageAttachment, LlmClient};
    use crate::prompt::{self, PromptKind};
    use crate::render::{RenderOutcome, RenderService, ViewSet};

    // =========================================================================
    // Mock LLM Client Tests
    // =========================================================================

    #[tokio::test]
    async fn test_mock_llm_default_replies_by_kind() {
        let llm = MockLlmClient::new();
        let reply = llm
            .complete(&prompt::evaluation("spec", "", &[]), &[])
            .await
            .unwrap();
        assert!(reply.starts_with("NO"));

        let reply = llm.complete(&prompt::codegen("spec", "", "plan"), &[]).await.unwrap();
        assert_eq!(reply, "cube(10);");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_llm_queue_then_default() {
        let llm = MockLlmClient::new()
            .with_reply(PromptKind::Evaluate, "YES\nfirst")
            .with_error_reply(PromptKind::Evaluate, "boom");
        let messages = prompt::evaluation("spec", "", &[]);

        assert_eq!(llm.complete(&messages, &[]).await.unwrap(), "YES\nfirst");
        assert!(llm.complete(&messages, &[]).await.is_err());
        assert!(llm.complete(&messages, &[]).await.unwrap().starts_with("NO"));
    }

    #[tokio::test]
    async fn test_mock_llm_persistent_failure() {
        let llm = MockLlmClient::new()
            .with_reply(PromptKind::Plan, "ignored")
            .with_failure(PromptKind::Plan, "planner offline");
        let err = llm
            .complete(&prompt::planning("spec", "", "why", &[]), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("planner offline"));
    }

    #[tokio::test]
    async fn test_mock_llm_records_calls() {
        let llm = MockLlmClient::new().with_images_support(true);
        let images = vec![ImageAttachment::png("default", vec![1])];
        llm.complete(&prompt::evaluation("spec", "cube(1);", &[]), &images)
            .await
            .unwrap();
        llm.complete(&[ChatMessage::user("hello")], &[]).await.unwrap();

        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].kind, Some(PromptKind::Evaluate));
        assert_eq!(calls[0].image_count, 1);
        assert!(calls[0].user_text().contains("cube(1);"));
        assert_eq!(calls[1].kind, None);
        assert_eq!(llm.count_of(PromptKind::Evaluate), 1);
        assert!(llm.supports_images());
    }

    #[test]
    fn test_mock_llm_clone_preserves_count() {
        let llm = MockLlmClient::new().with_model_name("scripted");
        let clone = llm.clone();
        assert_eq!(clone.model_name(), "scripted");
        assert_eq!(clone.call_count(), 0);
    }

    // =========================================================================
    // Mock Renderer Tests
    // =========================================================================

    #[tokio::test]
    async fn test_mock_renderer_renders_every_view() {
        let renderer = MockRenderer::new();
        match renderer.render("cube(1);", &ViewSet::standard()).await.unwrap() {
            RenderOutcome::Images(images) => {
                assert_eq!(images.len(), 7);
                assert_eq!(images.get("front"), Some(MOCK_PNG));
            }
            other => panic!("expected images, got {:?}", other),
        }
        assert_eq!(renderer.rendered_sources(), vec!["cube(1);"]);
    }

    #[tokio::test]
    async fn test_mock_renderer_queue_and_patterns() {
        let renderer = MockRenderer::new()
            .with_failure("first fails")
            .with_error_once("renderer crashed")
            .with_failing_pattern("broken", "ERROR: broken");
        let views = ViewSet::single();

        assert_eq!(
            renderer.render("cube(1);", &views).await.unwrap(),
            RenderOutcome::failure("first fails")
        );
        assert!(renderer.render("cube(1);", &views).await.is_err());
        assert_eq!(
            renderer.render("broken(", &views).await.unwrap(),
            RenderOutcome::failure("ERROR: broken")
        );
        assert!(renderer.render("cube(1);", &views).await.unwrap().is_success());
        assert_eq!(renderer.call_count(), 4);
    }

    #[tokio::test]
    async fn test_mock_renderer_always_failing() {
        let renderer = MockRenderer::new().always_failing("nope");
        assert!(!renderer
            .render("cube(1);", &ViewSet::single())
            .await
            .unwrap()
            .is_success());
    }

    // =========================================================================
    // Recording Sink and Assertion Tests
    // =========================================================================

    fn happy_events() -> Vec<ProgressEvent> {
        vec![
            ProgressEvent::IterationStarted {
                iteration: 1,
                max_iterations: 1,
            },
            ProgressEvent::RenderAttemptFailed {
                iteration: 1,
                attempt: 0,
                max_attempts: 3,
                diagnostic: "err".to_string(),
            },
            ProgressEvent::Rendered {
                iteration: 1,
                views: vec!["default".to_string()],
                repaired: true,
                final_pass: false,
            },
            ProgressEvent::Evaluated {
                iteration: 1,
                fulfilled: true,
                explanation: String::new(),
                raw: "YES".to_string(),
                final_pass: false,
            },
            ProgressEvent::Fulfilled { iterations_run: 1 },
        ]
    }

    #[test]
    fn test_recording_sink_collects_events() {
        let sink = RecordingSink::new();
        for event in happy_events() {
            sink.emit(&event);
        }
        assert_eq!(sink.events().len(), 5);
        assert_eq!(sink.count("rendered"), 1);
        assert_eq!(sink.kinds()[0], "iteration_started");
        assert_eq!(sink.last(), Some(ProgressEvent::Fulfilled { iterations_run: 1 }));
    }

    #[test]
    fn test_event_assertions_accept_valid_sequence() {
        let events = happy_events();
        assert_single_terminal(&events);
        assert_event_order(&events);
    }

    #[test]
    #[should_panic(expected = "Unexpected 'planned'")]
    fn test_event_order_rejects_plan_before_evaluation() {
        let events = vec![
            ProgressEvent::IterationStarted {
                iteration: 1,
                max_iterations: 1,
            },
            ProgressEvent::Planned {
                iteration: 1,
                plan: serde_json::Value::Null,
                raw: String::new(),
            },
        ];
        assert_event_order(&events);
    }

    #[test]
    #[should_panic(expected = "exactly one terminal event")]
    fn test_single_terminal_rejects_missing_terminal() {
        assert_single_terminal(&happy_events()[..4]);
    }
}
