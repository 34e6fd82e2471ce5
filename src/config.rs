//! Configuration management for AutoSCAD.
//!
//! Settings are JSON with four sections plus an optional store location:
//!
//! ```json
//! {
//!   "llm": { "model": "google/gemma-3-27b-it", "vision": true },
//!   "render": { "binary": "openscad", "width": 512, "height": 512 },
//!   "refine": { "max_iterations": 3, "max_render_attempts": 3, "views": "single" },
//!   "limits": { "max_specification_bytes": 16384 }
//! }
//! ```
//!
//! See [`ConfigLoader`] for how user and project files are layered.

pub mod resolution;
pub mod validation;

pub use resolution::{ConfigLevel, ConfigLoader, ConfigSource, InheritanceChain};
pub use validation::{ConfigValidator, ValidationReport};

use crate::error::{AutoscadError, Result};
use crate::llm::LlmConfig;
use crate::refine::{InputLimits, PhaseTimeouts, RefineConfig};
use crate::render::{RenderConfig, ViewPreset, ViewSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding project-level settings and the default store.
pub const PROJECT_DIR_NAME: &str = ".autoscad";

/// Refinement loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefineSettings {
    /// Planning and codegen cycles per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Repair attempts after a failed render.
    #[serde(default = "default_max_render_attempts")]
    pub max_render_attempts: u32,

    /// Camera views sent to the model.
    #[serde(default)]
    pub views: ViewPreset,

    #[serde(default)]
    pub timeouts: PhaseTimeouts,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_max_render_attempts() -> u32 {
    3
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_render_attempts: default_max_render_attempts(),
            views: ViewPreset::default(),
            timeouts: PhaseTimeouts::default(),
        }
    }
}

/// Top-level configuration loaded from settings files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoscadConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub refine: RefineSettings,

    #[serde(default)]
    pub limits: InputLimits,

    /// Project store location. Relative paths resolve against the project
    /// directory; defaults to `.autoscad/store`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
}

impl AutoscadConfig {
    /// Load layered configuration for a project directory.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::Config`] if a settings file cannot be parsed.
    pub fn load(project_dir: &Path) -> Result<Self> {
        ConfigLoader::new().load(project_dir)
    }

    /// Path of the project settings file.
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(PROJECT_DIR_NAME).join("settings.json")
    }

    /// Resolved project store directory.
    pub fn store_root(&self, project_dir: &Path) -> PathBuf {
        match &self.store_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => project_dir.join(dir),
            None => project_dir.join(PROJECT_DIR_NAME).join("store"),
        }
    }

    /// All field problems, in section order.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = self.llm.problems();
        problems.extend(self.render.problems());
        if self.refine.max_iterations == 0 {
            problems.push("refine.max_iterations must be at least 1".to_string());
        }
        problems.extend(self.refine.timeouts.problems());
        if self.limits.max_specification_bytes == 0 || self.limits.max_source_bytes == 0 {
            problems.push("limits must be positive".to_string());
        }
        problems
    }

    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::InvalidConfig`] for the first problem found.
    pub fn validate(&self) -> Result<()> {
        match self.problems().into_iter().next() {
            Some(reason) => Err(AutoscadError::InvalidConfig {
                field: reason
                    .split_whitespace()
                    .next()
                    .unwrap_or("config")
                    .to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Loop settings derived from this configuration.
    #[must_use]
    pub fn refine_config(&self) -> RefineConfig {
        RefineConfig::default()
            .with_max_render_attempts(self.refine.max_render_attempts)
            .with_views(ViewSet::from_preset(self.refine.views))
            .with_timeouts(self.refine.timeouts)
            .with_limits(self.limits)
    }
}
