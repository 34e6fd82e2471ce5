//! The render → evaluate → plan → regenerate loop.
//!
//! A run owns exactly one live model source. Phases run strictly in
//! sequence and the source is only replaced after a phase completes, so
//! cancellation or a timeout never leaves a half-written source behind.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::limits::{validate_inputs, InputLimits, PhaseTimeouts};
use super::state::{source_digest, AbortReason, RunOutcome, Termination};
use crate::error::{AutoscadError, Result};
use crate::events::{ProgressEvent, ProgressSink};
use crate::llm::LlmClient;
use crate::parser::{extract_code, extract_plan, extract_verdict, EvaluationVerdict};
use crate::prompt;
use crate::render::{RenderOutcome, RenderService, RenderedViews, ViewSet};

/// Loop-level settings shared by every run.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    /// Repair attempts after a failed render, per render phase.
    pub max_render_attempts: u32,
    pub views: ViewSet,
    pub timeouts: PhaseTimeouts,
    pub limits: InputLimits,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_render_attempts: 3,
            views: ViewSet::single(),
            timeouts: PhaseTimeouts::default(),
            limits: InputLimits::default(),
        }
    }
}

impl RefineConfig {
    #[must_use]
    pub fn with_max_render_attempts(mut self, attempts: u32) -> Self {
        self.max_render_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_views(mut self, views: ViewSet) -> Self {
        self.views = views;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: InputLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Per-run options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Planning and codegen cycles allowed before the final check.
    pub max_iterations: u32,
    /// Directory receiving every successful render as
    /// `iteration_<n>_<view>.png` (or `final_<view>.png`).
    pub render_archive: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            render_archive: None,
        }
    }
}

impl RunOptions {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_render_archive(mut self, dir: impl Into<PathBuf>) -> Self {
        self.render_archive = Some(dir.into());
        self
    }
}

/// Drives refinement runs against a renderer and a language model.
///
/// # Example
///
/// ```rust,ignore
/// use autoscad::refine::{RefinementLoop, RunOptions};
/// use autoscad::events::TracingSink;
/// use tokio_util::sync::CancellationToken;
///
/// let refine = RefinementLoop::new(renderer, llm);
/// let outcome = refine
///     .run("A 10mm cube", "", &RunOptions::new(3), &TracingSink, &CancellationToken::new())
///     .await?;
/// println!("{}", outcome.final_source);
/// ```
pub struct RefinementLoop {
    pub(super) renderer: Arc<dyn RenderService>,
    pub(super) llm: Arc<dyn LlmClient>,
    pub(super) config: RefineConfig,
}

impl RefinementLoop {
    pub fn new(renderer: Arc<dyn RenderService>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            renderer,
            llm,
            config: RefineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RefineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// Refine `initial_source` until the model judges it to satisfy
    /// `specification`, the budget runs out, or the run aborts.
    ///
    /// Collaborator failures end the run with [`Termination::Aborted`]; they
    /// are not returned as errors. Exactly one terminal event is emitted.
    ///
    /// # Errors
    ///
    /// Returns an input error (see [`validate_inputs`]) before any
    /// collaborator is called.
    pub async fn run(
        &self,
        specification: &str,
        initial_source: &str,
        options: &RunOptions,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        validate_inputs(
            specification,
            initial_source,
            options.max_iterations,
            &self.config.limits,
        )?;

        info!(
            model = self.llm.model_name(),
            max_iterations = options.max_iterations,
            views = self.config.views.len(),
            "starting refinement run"
        );

        let mut run = RunContext {
            refine: self,
            options,
            sink,
            cancel,
            specification,
            source: initial_source.to_string(),
            iterations_run: 0,
            last_verdict: None,
        };

        let termination = match run.drive().await {
            Ok(termination) => termination,
            Err(abort) => Termination::Aborted {
                reason: abort.reason,
                detail: abort.detail,
            },
        };

        let terminal = match &termination {
            Termination::Fulfilled => ProgressEvent::Fulfilled {
                iterations_run: run.iterations_run,
            },
            Termination::MaxIterationsReached => ProgressEvent::IterationExhausted {
                iterations_run: run.iterations_run,
                explanation: run
                    .last_verdict
                    .as_ref()
                    .map(|v| v.explanation.clone())
                    .unwrap_or_default(),
            },
            Termination::Aborted { reason, detail } => ProgressEvent::Aborted {
                reason: *reason,
                detail: detail.clone(),
                iterations_run: run.iterations_run,
            },
        };
        sink.emit(&terminal);
        info!(
            iterations_run = run.iterations_run,
            "refinement run ended: {}",
            termination.label()
        );

        Ok(RunOutcome {
            fulfilled: termination == Termination::Fulfilled,
            final_source: run.source,
            iterations_run: run.iterations_run,
            termination,
            final_verdict: run.last_verdict,
        })
    }
}

// =============================================================================
// Run Internals
// =============================================================================

/// A phase ended the run.
#[derive(Debug)]
pub(super) struct Abort {
    pub(super) reason: AbortReason,
    pub(super) detail: String,
}

impl Abort {
    pub(super) fn new(reason: AbortReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub(super) fn cancelled() -> Self {
        Self::new(AbortReason::Cancelled, "run cancelled")
    }
}

/// Why a guarded collaborator call produced no value.
#[derive(Debug)]
pub(super) enum PhaseError {
    Cancelled,
    TimedOut(Duration),
    Failed(anyhow::Error),
}

impl PhaseError {
    pub(super) fn into_abort(self, reason: AbortReason) -> Abort {
        match self {
            Self::Cancelled => Abort::cancelled(),
            other => Abort::new(reason, other.to_string()),
        }
    }
}

impl std::fmt::Display for PhaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
            Self::Failed(e) => write!(f, "{:#}", e),
        }
    }
}

fn is_missing_tool(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<AutoscadError>(),
        Some(AutoscadError::MissingTool { .. })
    )
}

/// Mutable state of one run.
pub(super) struct RunContext<'a> {
    pub(super) refine: &'a RefinementLoop,
    pub(super) options: &'a RunOptions,
    pub(super) sink: &'a dyn ProgressSink,
    pub(super) cancel: &'a CancellationToken,
    pub(super) specification: &'a str,
    pub(super) source: String,
    pub(super) iterations_run: u32,
    pub(super) last_verdict: Option<EvaluationVerdict>,
}

impl RunContext<'_> {
    /// Race a collaborator call against cancellation and a timeout.
    pub(super) async fn guarded<T, F>(
        &self,
        limit: Duration,
        call: F,
    ) -> std::result::Result<T, PhaseError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(PhaseError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PhaseError::Cancelled),
            result = tokio::time::timeout(limit, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(PhaseError::Failed(e)),
                Err(_) => Err(PhaseError::TimedOut(limit)),
            },
        }
    }

    /// Render `source` once. Renderer errors and timeouts become failures,
    /// except a missing renderer binary, which no repair can fix.
    pub(super) async fn render_once(
        &self,
        source: &str,
    ) -> std::result::Result<RenderOutcome, Abort> {
        let refine = self.refine;
        let call = refine.renderer.render(source, &refine.config.views);
        match self.guarded(refine.config.timeouts.render(), call).await {
            Ok(outcome) => Ok(outcome),
            Err(PhaseError::Cancelled) => Err(Abort::cancelled()),
            Err(PhaseError::Failed(e)) if is_missing_tool(&e) => Err(Abort::new(
                AbortReason::RenderUnrecoverable,
                format!("Renderer failed: {:#}", e),
            )),
            Err(e) => Ok(RenderOutcome::failure(format!("Renderer failed: {}", e))),
        }
    }

    async fn drive(&mut self) -> std::result::Result<Termination, Abort> {
        let max_iterations = self.options.max_iterations;

        for iteration in 1..=max_iterations {
            self.iterations_run = iteration;
            self.sink.emit(&ProgressEvent::IterationStarted {
                iteration,
                max_iterations,
            });

            let views = self.render_phase(iteration, false).await?;
            let verdict = self.evaluate_phase(iteration, &views, false).await?;
            if verdict.fulfilled {
                return Ok(Termination::Fulfilled);
            }

            let plan = self.plan_phase(iteration, &views, &verdict.explanation).await?;
            self.codegen_phase(iteration, &plan).await?;
        }

        // Final check of the last generated source. Its verdict is reported,
        // but the budget is spent either way.
        debug!("budget spent, verifying last source");
        let views = self.render_phase(max_iterations, true).await?;
        let verdict = self.evaluate_phase(max_iterations, &views, true).await?;
        debug!(fulfilled = verdict.fulfilled, "final check evaluated");
        Ok(Termination::MaxIterationsReached)
    }

    async fn render_phase(
        &mut self,
        iteration: u32,
        final_pass: bool,
    ) -> std::result::Result<RenderedViews, Abort> {
        let outcome = self.render_once(&self.source).await?;
        let (views, repaired) = match outcome {
            RenderOutcome::Images(views) => (views, false),
            RenderOutcome::Failure { diagnostic } => {
                self.sink.emit(&ProgressEvent::RenderAttemptFailed {
                    iteration,
                    attempt: 0,
                    max_attempts: self.refine.config.max_render_attempts,
                    diagnostic: diagnostic.clone(),
                });
                let (fixed, views) = self.repair(iteration, diagnostic).await?;
                self.source = fixed;
                (views, true)
            }
        };

        self.sink.emit(&ProgressEvent::Rendered {
            iteration,
            views: views.names(),
            repaired,
            final_pass,
        });
        self.archive(iteration, final_pass, &views).await;
        Ok(views)
    }

    async fn evaluate_phase(
        &mut self,
        iteration: u32,
        views: &RenderedViews,
        final_pass: bool,
    ) -> std::result::Result<EvaluationVerdict, Abort> {
        let refine = self.refine;
        let llm = &refine.llm;
        let (images, names) = if llm.supports_images() {
            (views.to_attachments(), views.names())
        } else {
            (Vec::new(), Vec::new())
        };
        let messages = prompt::evaluation(self.specification, &self.source, &names);

        let raw = self
            .guarded(
                refine.config.timeouts.evaluate(),
                llm.complete(&messages, &images),
            )
            .await
            .map_err(|e| e.into_abort(AbortReason::EvaluationFailed))?;

        let verdict = extract_verdict(&raw);
        debug!(iteration, fulfilled = verdict.fulfilled, "evaluation parsed");
        self.sink.emit(&ProgressEvent::Evaluated {
            iteration,
            fulfilled: verdict.fulfilled,
            explanation: verdict.explanation.clone(),
            raw,
            final_pass,
        });
        self.last_verdict = Some(verdict.clone());
        Ok(verdict)
    }

    async fn plan_phase(
        &self,
        iteration: u32,
        views: &RenderedViews,
        explanation: &str,
    ) -> std::result::Result<String, Abort> {
        let llm = &self.refine.llm;
        let (images, names) = if llm.supports_images() {
            (views.to_attachments(), views.names())
        } else {
            (Vec::new(), Vec::new())
        };
        let messages = prompt::planning(self.specification, &self.source, explanation, &names);

        let raw = self
            .guarded(
                self.refine.config.timeouts.plan(),
                llm.complete(&messages, &images),
            )
            .await
            .map_err(|e| e.into_abort(AbortReason::PlanningFailed))?;

        let plan = extract_plan(&raw);
        debug!(iteration, steps = ?plan.step_count(), "plan parsed");
        self.sink.emit(&ProgressEvent::Planned {
            iteration,
            plan: plan.to_value(),
            raw,
        });
        Ok(plan.as_prompt_text())
    }

    async fn codegen_phase(&mut self, iteration: u32, plan: &str) -> std::result::Result<(), Abort> {
        let refine = self.refine;
        let messages = prompt::codegen(self.specification, &self.source, plan);

        let raw = self
            .guarded(
                refine.config.timeouts.codegen(),
                refine.llm.complete(&messages, &[]),
            )
            .await
            .map_err(|e| e.into_abort(AbortReason::CodegenFailed))?;

        let code = extract_code(&raw);
        if code.is_empty() {
            return Err(Abort::new(
                AbortReason::CodegenFailed,
                "code generation reply contained no code",
            ));
        }

        let digest = source_digest(&code);
        info!(iteration, digest = %digest, "new model source generated");
        self.sink.emit(&ProgressEvent::CodeGenerated {
            iteration,
            source: code.clone(),
            digest,
        });
        self.source = code;
        Ok(())
    }

    /// Copy rendered images into the archive directory, if one is set.
    async fn archive(&self, iteration: u32, final_pass: bool, views: &RenderedViews) {
        let Some(dir) = &self.options.render_archive else {
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("failed to create render archive {}: {}", dir.display(), e);
            return;
        }
        for view in views.iter() {
            let name = if final_pass {
                format!("final_{}.png", view.name)
            } else {
                format!("iteration_{}_{}.png", iteration, view.name)
            };
            let path = dir.join(name);
            if let Err(e) = tokio::fs::write(&path, &view.png).await {
                warn!("failed to archive render {}: {}", path.display(), e);
            }
        }
    }
}
