//! Input limits and per-phase timeouts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AutoscadError, Result};

/// Size limits applied to caller input before a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLimits {
    #[serde(default = "default_max_specification_bytes")]
    pub max_specification_bytes: usize,
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
}

fn default_max_specification_bytes() -> usize {
    16 * 1024
}

fn default_max_source_bytes() -> usize {
    256 * 1024
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_specification_bytes: default_max_specification_bytes(),
            max_source_bytes: default_max_source_bytes(),
        }
    }
}

/// Check caller input. No external call is made before this passes.
///
/// # Errors
///
/// - [`AutoscadError::EmptySpecification`] for a blank specification
/// - [`AutoscadError::InputTooLarge`] when a limit is exceeded
/// - [`AutoscadError::InvalidMaxIterations`] for a zero budget
///
/// # Example
///
/// ```
/// use autoscad::refine::{validate_inputs, InputLimits};
///
/// assert!(validate_inputs("A 10mm cube", "", 3, &InputLimits::default()).is_ok());
/// assert!(validate_inputs("   ", "", 3, &InputLimits::default()).is_err());
/// ```
pub fn validate_inputs(
    specification: &str,
    initial_source: &str,
    max_iterations: u32,
    limits: &InputLimits,
) -> Result<()> {
    if specification.trim().is_empty() {
        return Err(AutoscadError::EmptySpecification);
    }
    if specification.len() > limits.max_specification_bytes {
        return Err(AutoscadError::InputTooLarge {
            field: "specification",
            actual: specification.len(),
            limit: limits.max_specification_bytes,
        });
    }
    if initial_source.len() > limits.max_source_bytes {
        return Err(AutoscadError::InputTooLarge {
            field: "initial source",
            actual: initial_source.len(),
            limit: limits.max_source_bytes,
        });
    }
    if max_iterations == 0 {
        return Err(AutoscadError::InvalidMaxIterations {
            value: max_iterations,
        });
    }
    Ok(())
}

/// Upper bounds on each phase, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimeouts {
    #[serde(default = "default_render_secs")]
    pub render_secs: u64,
    #[serde(default = "default_llm_secs")]
    pub evaluate_secs: u64,
    #[serde(default = "default_llm_secs")]
    pub plan_secs: u64,
    #[serde(default = "default_llm_secs")]
    pub codegen_secs: u64,
    #[serde(default = "default_llm_secs")]
    pub repair_secs: u64,
}

fn default_render_secs() -> u64 {
    120
}

fn default_llm_secs() -> u64 {
    180
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            render_secs: default_render_secs(),
            evaluate_secs: default_llm_secs(),
            plan_secs: default_llm_secs(),
            codegen_secs: default_llm_secs(),
            repair_secs: default_llm_secs(),
        }
    }
}

impl PhaseTimeouts {
    /// Same timeout for every phase.
    #[must_use]
    pub fn uniform(duration: Duration) -> Self {
        let secs = duration.as_secs().max(1);
        Self {
            render_secs: secs,
            evaluate_secs: secs,
            plan_secs: secs,
            codegen_secs: secs,
            repair_secs: secs,
        }
    }

    pub fn render(&self) -> Duration {
        Duration::from_secs(self.render_secs)
    }

    pub fn evaluate(&self) -> Duration {
        Duration::from_secs(self.evaluate_secs)
    }

    pub fn plan(&self) -> Duration {
        Duration::from_secs(self.plan_secs)
    }

    pub fn codegen(&self) -> Duration {
        Duration::from_secs(self.codegen_secs)
    }

    pub fn repair(&self) -> Duration {
        Duration::from_secs(self.repair_secs)
    }

    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        [
            ("render_secs", self.render_secs),
            ("evaluate_secs", self.evaluate_secs),
            ("plan_secs", self.plan_secs),
            ("codegen_secs", self.codegen_secs),
            ("repair_secs", self.repair_secs),
        ]
        .into_iter()
        .filter(|(_, secs)| *secs == 0)
        .map(|(name, _)| format!("refine.timeouts.{} must be positive", name))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_inputs_accepts_empty_source() {
        assert!(validate_inputs("A 10mm cube", "", 1, &InputLimits::default()).is_ok());
    }

    #[test]
    fn test_validate_inputs_rejects_blank_specification() {
        let err = validate_inputs(" \n\t", "cube(1);", 3, &InputLimits::default()).unwrap_err();
        assert!(matches!(err, AutoscadError::EmptySpecification));
    }

    #[test]
    fn test_validate_inputs_rejects_zero_budget() {
        let err = validate_inputs("cube", "", 0, &InputLimits::default()).unwrap_err();
        assert!(matches!(err, AutoscadError::InvalidMaxIterations { value: 0 }));
    }

    #[test]
    fn test_validate_inputs_enforces_limits() {
        let limits = InputLimits {
            max_specification_bytes: 8,
            max_source_bytes: 4,
        };
        let err = validate_inputs("a long specification", "", 3, &limits).unwrap_err();
        assert!(matches!(
            err,
            AutoscadError::InputTooLarge {
                field: "specification",
                ..
            }
        ));

        let err = validate_inputs("cube", "cube(10);", 3, &limits).unwrap_err();
        assert!(matches!(
            err,
            AutoscadError::InputTooLarge {
                field: "initial source",
                actual: 9,
                limit: 4
            }
        ));
    }

    #[test]
    fn test_timeouts_defaults_and_problems() {
        let timeouts: PhaseTimeouts = serde_json::from_str(r#"{"render_secs": 5}"#).unwrap();
        assert_eq!(timeouts.render(), Duration::from_secs(5));
        assert_eq!(timeouts.plan(), Duration::from_secs(180));
        assert!(timeouts.problems().is_empty());

        let timeouts = PhaseTimeouts {
            codegen_secs: 0,
            ..PhaseTimeouts::default()
        };
        assert_eq!(timeouts.problems().len(), 1);
    }

    #[test]
    fn test_uniform_timeouts() {
        let timeouts = PhaseTimeouts::uniform(Duration::from_secs(2));
        assert_eq!(timeouts.repair(), Duration::from_secs(2));
        assert_eq!(PhaseTimeouts::uniform(Duration::ZERO).render_secs, 1);
    }
}
