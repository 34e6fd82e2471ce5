//! AutoSCAD - LLM-driven OpenSCAD refinement
//!
//! Turns a natural-language description of a part into OpenSCAD source by
//! repeatedly rendering the model, asking a vision-capable LLM whether the
//! render satisfies the description, and regenerating the source from a plan
//! when it does not.
//!
//! # Architecture
//!
//! - [`refine`] - The refinement loop, render-repair sub-loop and run outcome
//! - [`render`] - Renderer trait, camera views and the OpenSCAD CLI renderer
//! - [`llm`] - LLM client trait and the OpenAI-compatible chat-completions client
//! - [`prompt`] - Prompt construction for each phase
//! - [`parser`] - Extraction of code, verdicts and plans from LLM replies
//! - [`events`] - Progress events and sinks
//! - [`store`] - File-backed projects and stored runs
//! - [`config`] - Layered configuration loading and validation
//! - [`error`] - Error types
//! - [`testing`] - Scripted mocks for the renderer, LLM and event sink
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use autoscad::config::AutoscadConfig;
//! use autoscad::events::TracingSink;
//! use autoscad::refine::{RefinementLoop, RunOptions};
//! use autoscad::render::OpenScadRenderer;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = AutoscadConfig::load(Path::new("."))?;
//! let llm = autoscad::llm::create_llm_client(&config.llm)?;
//! let refinement = RefinementLoop::new(
//!     Arc::new(OpenScadRenderer::new(config.render.clone())),
//!     Arc::from(llm),
//! )
//! .with_config(config.refine_config());
//!
//! let outcome = refinement
//!     .run("A 10mm cube", "", &RunOptions::new(3), &TracingSink, &CancellationToken::new())
//!     .await?;
//! println!("{}", outcome.final_source);
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod parser;
pub mod prompt;
pub mod refine;
pub mod render;
pub mod store;
pub mod testing;

// Re-export commonly used types
pub use error::{AutoscadError, Result};

pub use config::{AutoscadConfig, ConfigLoader, ConfigValidator, ValidationReport};

pub use events::{
    ChannelSink, JsonlSink, MultiSink, NullSink, ProgressEvent, ProgressSink, TracingSink,
};

pub use llm::{create_llm_client, ChatMessage, ImageAttachment, LlmClient, LlmConfig};

pub use parser::{extract_code, extract_plan, extract_verdict, EvaluationVerdict, Plan};

pub use refine::{
    AbortReason, RefineConfig, RefinementLoop, RunOptions, RunOutcome, Termination,
};

pub use render::{
    CameraView, OpenScadRenderer, RenderConfig, RenderOutcome, RenderService, RenderedViews,
    ViewPreset, ViewSet,
};

pub use store::{IterationRecord, Project, ProjectStore};
