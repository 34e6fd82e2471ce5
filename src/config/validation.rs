//! Configuration validation for `autoscad config validate`.
//!
//! # Example
//!
//! ```rust,ignore
//! use autoscad::config::ConfigValidator;
//! use std::path::Path;
//!
//! let report = ConfigValidator::new(Path::new(".")).validate();
//! if !report.is_valid() {
//!     eprintln!("{}", report.verbose_report());
//!     std::process::exit(report.exit_code());
//! }
//! ```

use std::path::{Path, PathBuf};

use super::{AutoscadConfig, ConfigLoader, InheritanceChain};

/// Errors and warnings found while validating configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Problems that make the configuration unusable.
    pub errors: Vec<String>,
    /// Problems that only matter for some commands.
    pub warnings: Vec<String>,
    pub inheritance_chain: InheritanceChain,
}

impl ValidationReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings do not affect validity.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// 0 if valid, 7 (configuration error) otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_valid() {
            0
        } else {
            7
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_valid() {
            if self.warnings.is_empty() {
                "Configuration is valid.".to_string()
            } else {
                format!(
                    "Configuration is valid with {} warning(s).",
                    self.warnings.len()
                )
            }
        } else {
            format!(
                "Configuration is invalid with {} error(s).",
                self.errors.len()
            )
        }
    }

    /// Full report with the inheritance chain, errors and warnings.
    #[must_use]
    pub fn verbose_report(&self) -> String {
        let mut lines = vec![
            "Configuration Validation Report".to_string(),
            "\u{2500}".repeat(50),
            String::new(),
            self.inheritance_chain.describe(),
        ];

        if !self.errors.is_empty() {
            lines.push(String::new());
            lines.push(format!("Errors ({}):", self.errors.len()));
            for error in &self.errors {
                lines.push(format!("  \u{2717} {}", error));
            }
        }

        if !self.warnings.is_empty() {
            lines.push(String::new());
            lines.push(format!("Warnings ({}):", self.warnings.len()));
            for warning in &self.warnings {
                lines.push(format!("  \u{26a0} {}", warning));
            }
        }

        lines.push(String::new());
        lines.push(format!("Status: {}", self.summary()));
        lines.join("\n")
    }
}

/// Validates the layered configuration of a project directory.
#[derive(Debug, Clone)]
pub struct ConfigValidator {
    project_dir: PathBuf,
    loader: ConfigLoader,
}

impl ConfigValidator {
    #[must_use]
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            loader: ConfigLoader::new(),
        }
    }

    /// Validate with a specific loader (custom user config path).
    #[must_use]
    pub fn with_loader(mut self, loader: ConfigLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Load, check fields, and check the environment the config points at.
    ///
    /// Never fails: every problem ends up in the report.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::new();

        let config: AutoscadConfig = match self.loader.load_with_chain(&self.project_dir) {
            Ok((config, chain)) => {
                report.inheritance_chain = chain;
                config
            }
            Err(e) => {
                report.errors.push(e.to_string());
                return report;
            }
        };

        report.errors.extend(config.problems());

        if config.llm.api_key().is_err() {
            report.warnings.push(format!(
                "{} is not set; runs will fail until it is",
                config.llm.api_key_env
            ));
        }
        if which::which(&config.render.binary).is_err() {
            report.warnings.push(format!(
                "renderer '{}' was not found on PATH",
                config.render.binary
            ));
        }

        report
    }
}
