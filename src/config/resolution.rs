//! Layered configuration loading.
//!
//! Configurations are loaded from two levels with increasing priority:
//!
//! 1. **User** - `{config_dir}/autoscad/config.json` (e.g. `~/.config/autoscad/config.json`)
//! 2. **Project** - `.autoscad/settings.json` in the project directory
//!
//! Both files are parsed as JSON and deep-merged, so a project file only
//! needs the keys it overrides. Missing files are skipped.
//!
//! # Example
//!
//! ```rust,ignore
//! use autoscad::config::ConfigLoader;
//! use std::path::Path;
//!
//! let (config, chain) = ConfigLoader::new().load_with_chain(Path::new("."))?;
//! println!("{}", chain.describe());
//! ```

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::AutoscadConfig;
use crate::error::{AutoscadError, Result};

// ============================================================================
// Configuration Level
// ============================================================================

/// Configuration level in the inheritance hierarchy.
///
/// ```rust
/// use autoscad::config::ConfigLevel;
///
/// assert!(ConfigLevel::User < ConfigLevel::Project);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigLevel {
    /// User-specific configuration.
    User,
    /// Project-specific configuration (highest priority).
    Project,
}

impl std::fmt::Display for ConfigLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Project => write!(f, "project"),
        }
    }
}

// ============================================================================
// Inheritance Chain
// ============================================================================

/// A file that was (or could have been) loaded.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub level: ConfigLevel,
    pub path: PathBuf,
    /// `false` when the file does not exist.
    pub loaded: bool,
}

impl ConfigSource {
    #[must_use]
    pub fn new(level: ConfigLevel, path: PathBuf, loaded: bool) -> Self {
        Self {
            level,
            path,
            loaded,
        }
    }
}

/// The files checked during loading, in priority order.
#[derive(Debug, Clone, Default)]
pub struct InheritanceChain {
    pub sources: Vec<ConfigSource>,
}

impl InheritanceChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, level: ConfigLevel, path: PathBuf, loaded: bool) {
        self.sources.push(ConfigSource::new(level, path, loaded));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of files actually loaded.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.sources.iter().filter(|s| s.loaded).count()
    }

    /// Multi-line description for logs and `config show`.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut lines = vec!["Configuration inheritance chain:".to_string()];
        for source in &self.sources {
            let status = if source.loaded { "+" } else { "-" };
            lines.push(format!(
                "  {} [{}] {}",
                status,
                source.level,
                source.path.display()
            ));
        }
        lines.join("\n")
    }
}

// ============================================================================
// Config Loader
// ============================================================================

/// Loads and merges user and project settings.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader using the platform user config directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_config_path: Self::default_user_path(),
        }
    }

    /// `{config_dir}/autoscad/config.json`, if the platform has a config dir.
    #[must_use]
    pub fn default_user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("autoscad").join("config.json"))
    }

    /// Use a specific user config file.
    #[must_use]
    pub fn with_user_config_path(mut self, path: PathBuf) -> Self {
        self.user_config_path = Some(path);
        self
    }

    /// Skip the user level entirely.
    #[must_use]
    pub fn without_user_config(mut self) -> Self {
        self.user_config_path = None;
        self
    }

    #[must_use]
    pub fn user_config_path(&self) -> Option<&PathBuf> {
        self.user_config_path.as_ref()
    }

    /// Load the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing settings file cannot be read or parsed.
    pub fn load(&self, project_dir: &Path) -> Result<AutoscadConfig> {
        let (config, chain) = self.load_with_chain(project_dir)?;
        debug!("{}", chain.describe());
        Ok(config)
    }

    /// Load the merged configuration and report which files were used.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing settings file cannot be read or parsed.
    pub fn load_with_chain(&self, project_dir: &Path) -> Result<(AutoscadConfig, InheritanceChain)> {
        let mut chain = InheritanceChain::new();
        let mut merged = Value::Object(serde_json::Map::new());

        if let Some(ref user_path) = self.user_config_path {
            let loaded = load_and_merge(&mut merged, user_path)?;
            chain.add_source(ConfigLevel::User, user_path.clone(), loaded);
        }

        let project_path = AutoscadConfig::settings_path(project_dir);
        let loaded = load_and_merge(&mut merged, &project_path)?;
        chain.add_source(ConfigLevel::Project, project_path, loaded);

        let config: AutoscadConfig = serde_json::from_value(merged).map_err(|e| {
            AutoscadError::config(format!("invalid settings after merging: {}", e))
        })?;

        Ok((config, chain))
    }
}

/// Merge a settings file into `accumulated`. Returns false if it does not exist.
fn load_and_merge(accumulated: &mut Value, path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        AutoscadError::config_with_path(format!("cannot read settings: {}", e), path.to_path_buf())
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        AutoscadError::config_with_path(
            format!(
                "{}: syntax error at line {}, column {}: {}",
                path.display(),
                e.line(),
                e.column(),
                e
            ),
            path.to_path_buf(),
        )
    })?;
    if !value.is_object() {
        return Err(AutoscadError::config_with_path(
            format!("{}: settings must be a JSON object", path.display()),
            path.to_path_buf(),
        ));
    }

    deep_merge(accumulated, value);
    Ok(true)
}

/// Deep merge two JSON values, with `child` overriding `parent`.
///
/// Objects merge key by key; anything else is replaced.
pub(crate) fn deep_merge(parent: &mut Value, child: Value) {
    match (parent, child) {
        (Value::Object(parent_map), Value::Object(child_map)) => {
            for (key, child_value) in child_map {
                match parent_map.get_mut(&key) {
                    Some(parent_value) => deep_merge(parent_value, child_value),
                    None => {
                        parent_map.insert(key, child_value);
                    }
                }
            }
        }
        (parent, child) => {
            *parent = child;
        }
    }
}
