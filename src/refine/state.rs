//! Run outcome types.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::parser::EvaluationVerdict;

/// Why a run stopped before fulfilling or exhausting its budget.
///
/// # Example
///
/// ```
/// use autoscad::refine::AbortReason;
///
/// assert_eq!(AbortReason::RenderUnrecoverable.to_string(), "render_unrecoverable");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Every repair attempt still failed to render.
    RenderUnrecoverable,
    /// The evaluation call failed or timed out.
    EvaluationFailed,
    /// The planning call failed or timed out.
    PlanningFailed,
    /// The codegen call failed, timed out, or returned no code.
    CodegenFailed,
    /// The cancellation token fired.
    Cancelled,
}

impl AbortReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RenderUnrecoverable => "render_unrecoverable",
            Self::EvaluationFailed => "evaluation_failed",
            Self::PlanningFailed => "planning_failed",
            Self::CodegenFailed => "codegen_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended. Every run ends in exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Termination {
    Fulfilled,
    MaxIterationsReached,
    Aborted { reason: AbortReason, detail: String },
}

impl Termination {
    /// Short label for display and storage.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fulfilled => "fulfilled",
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::Aborted { reason, .. } => reason.as_str(),
        }
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::Aborted { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aborted { reason, detail } => write!(f, "aborted ({}): {}", reason, detail),
            other => f.write_str(other.label()),
        }
    }
}

/// Result of a refinement run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// The last live model source. Unchanged input if nothing replaced it.
    pub final_source: String,
    pub fulfilled: bool,
    /// Iterations whose render phase was entered. The final verification
    /// pass is not counted.
    pub iterations_run: u32,
    pub termination: Termination,
    /// The most recent verdict, if any evaluation completed.
    pub final_verdict: Option<EvaluationVerdict>,
}

impl RunOutcome {
    pub fn source_digest(&self) -> String {
        source_digest(&self.final_source)
    }
}

/// Short SHA-256 hex digest identifying a model source.
///
/// ```
/// use autoscad::refine::source_digest;
///
/// assert_eq!(source_digest("cube(10);").len(), 16);
/// assert_eq!(source_digest("cube(10);"), source_digest("cube(10);"));
/// ```
#[must_use]
pub fn source_digest(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_reason_labels_match_serde() {
        for reason in [
            AbortReason::RenderUnrecoverable,
            AbortReason::EvaluationFailed,
            AbortReason::PlanningFailed,
            AbortReason::CodegenFailed,
            AbortReason::Cancelled,
        ] {
            let json = serde_json::to_value(reason).unwrap();
            assert_eq!(json, reason.as_str());
        }
    }

    #[test]
    fn test_termination_labels() {
        assert_eq!(Termination::Fulfilled.label(), "fulfilled");
        assert_eq!(
            Termination::MaxIterationsReached.label(),
            "max_iterations_reached"
        );
        let aborted = Termination::Aborted {
            reason: AbortReason::Cancelled,
            detail: "stopped".to_string(),
        };
        assert_eq!(aborted.label(), "cancelled");
        assert_eq!(aborted.abort_reason(), Some(AbortReason::Cancelled));
        assert_eq!(aborted.to_string(), "aborted (cancelled): stopped");
        assert_eq!(Termination::Fulfilled.abort_reason(), None);
    }

    #[test]
    fn test_termination_serialization() {
        let json = serde_json::to_value(Termination::Aborted {
            reason: AbortReason::CodegenFailed,
            detail: "empty".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["reason"], "codegen_failed");
    }

    #[test]
    fn test_source_digest_differs() {
        assert_ne!(source_digest("cube(10);"), source_digest("cube(11);"));
        assert_eq!(source_digest("").len(), 16);
    }
}
