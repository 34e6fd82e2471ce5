//! Render-repair sub-loop.
//!
//! Entered when a render fails. Each attempt sends the failing source and
//! the latest diagnostic to the model, cleans the reply and re-renders it.
//! The live source is only replaced once a fix renders.

use tracing::{debug, warn};

use super::manager::{Abort, PhaseError, RunContext};
use super::state::AbortReason;
use crate::events::ProgressEvent;
use crate::parser::extract_code;
use crate::prompt;
use crate::render::{RenderOutcome, RenderedViews};

impl RunContext<'_> {
    /// Try to make the current source render.
    ///
    /// Returns the repaired source and its images, or
    /// [`AbortReason::RenderUnrecoverable`] once every attempt is spent.
    /// A failed or empty repair reply consumes its attempt and leaves the
    /// diagnostic unchanged.
    pub(super) async fn repair(
        &self,
        iteration: u32,
        diagnostic: String,
    ) -> Result<(String, RenderedViews), Abort> {
        let refine = self.refine;
        let max_attempts = refine.config.max_render_attempts;
        let mut candidate = self.source.clone();
        let mut diagnostic = diagnostic;

        for attempt in 1..=max_attempts {
            debug!(iteration, attempt, max_attempts, "requesting render fix");
            let messages = prompt::repair(self.specification, &candidate, &diagnostic, attempt);

            let reply = self
                .guarded(
                    refine.config.timeouts.repair(),
                    refine.llm.complete(&messages, &[]),
                )
                .await;

            let fixed = match reply {
                Ok(reply) => extract_code(&reply),
                Err(PhaseError::Cancelled) => return Err(Abort::cancelled()),
                Err(e) => {
                    warn!(iteration, attempt, "repair request failed: {}", e);
                    self.report_failure(
                        iteration,
                        attempt,
                        format!("repair request failed: {}\n{}", e, diagnostic),
                    );
                    continue;
                }
            };

            if fixed.is_empty() {
                self.report_failure(
                    iteration,
                    attempt,
                    format!("repair reply contained no code\n{}", diagnostic),
                );
                continue;
            }

            candidate = fixed;
            match self.render_once(&candidate).await? {
                RenderOutcome::Images(views) => {
                    debug!(iteration, attempt, "render repaired");
                    return Ok((candidate, views));
                }
                RenderOutcome::Failure { diagnostic: latest } => {
                    self.report_failure(iteration, attempt, latest.clone());
                    diagnostic = latest;
                }
            }
        }

        Err(Abort::new(AbortReason::RenderUnrecoverable, diagnostic))
    }

    fn report_failure(&self, iteration: u32, attempt: u32, diagnostic: String) {
        self.sink.emit(&ProgressEvent::RenderAttemptFailed {
            iteration,
            attempt,
            max_attempts: self.refine.config.max_render_attempts,
            diagnostic,
        });
    }
}
