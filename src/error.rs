//! Custom error types for AutoSCAD.
//!
//! Only caller-facing failures live here. Failures of the collaborators
//! during a run (renderer crashes, LLM outages) never surface as an
//! `AutoscadError`; the refinement loop turns them into an
//! [`AbortReason`](crate::refine::AbortReason) on the run outcome instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for AutoSCAD operations
#[derive(Error, Debug)]
pub enum AutoscadError {
    // =========================================================================
    // Caller Input Errors
    // =========================================================================
    /// The specification is empty or whitespace only
    #[error("Specification must not be empty")]
    EmptySpecification,

    /// An input exceeds its configured size limit
    #[error("{field} is too large: {actual} bytes (limit: {limit})")]
    InputTooLarge {
        field: &'static str,
        actual: usize,
        limit: usize,
    },

    /// Iteration budget must be positive
    #[error("max_iterations must be at least 1 (got {value})")]
    InvalidMaxIterations { value: u32 },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// API key environment variable not set
    #[error("API key not available: set the {env_var} environment variable")]
    MissingApiKey { env_var: String },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Missing required tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    /// Renderer could not be executed
    #[error("Renderer error: {message}")]
    Render { message: String },

    /// Language model call failed
    #[error("Language model error: {message}")]
    Llm { message: String },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Project does not exist
    #[error("Project not found: {id}")]
    ProjectNotFound { id: String },

    /// Iteration does not exist
    #[error("Iteration not found: {id}")]
    IterationNotFound { id: String },

    /// Project name rejected
    #[error("Project name cannot be empty")]
    EmptyProjectName,

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AutoscadError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a renderer error
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }

    /// Create a language model error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    /// Check if this error was caused by the caller's input.
    ///
    /// Input errors are raised before any external call is made.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptySpecification | Self::InputTooLarge { .. } | Self::InvalidMaxIterations { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::EmptySpecification
            | Self::InputTooLarge { .. }
            | Self::InvalidMaxIterations { .. } => 2,
            Self::MissingTool { .. } | Self::MissingApiKey { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::ProjectNotFound { .. }
            | Self::IterationNotFound { .. }
            | Self::EmptyProjectName => 8,
            _ => 1,
        }
    }
}

/// Type alias for AutoSCAD results
pub type Result<T> = std::result::Result<T, AutoscadError>;
