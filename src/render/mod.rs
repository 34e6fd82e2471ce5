//! Rendering of model source into images.
//!
//! The refinement loop only sees the [`RenderService`] trait. A render
//! either produces one PNG per requested camera view or fails with the
//! renderer's diagnostic text, which the loop feeds back to the model.
//!
//! [`OpenScadRenderer`] drives the `openscad` binary. Tests use
//! [`MockRenderer`](crate::testing::MockRenderer).

pub mod openscad;

pub use openscad::OpenScadRenderer;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::ImageAttachment;

/// Renders model source for a set of camera views.
#[async_trait]
pub trait RenderService: Send + Sync {
    /// Render `source` once per view in `views`.
    ///
    /// A script that does not compile is reported as
    /// [`RenderOutcome::Failure`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error only when the renderer itself could not run.
    async fn render(&self, source: &str, views: &ViewSet) -> Result<RenderOutcome>;
}

/// A named camera position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraView {
    pub name: String,
    /// OpenSCAD `--camera` argument; `None` uses the renderer's default view.
    pub camera: Option<String>,
}

impl CameraView {
    /// The renderer's default view.
    pub fn default_view() -> Self {
        Self {
            name: "default".to_string(),
            camera: None,
        }
    }

    /// A view rotated by `(rx, ry, rz)` degrees around the model.
    pub fn rotated(name: impl Into<String>, rx: i32, ry: i32, rz: i32) -> Self {
        Self {
            name: name.into(),
            camera: Some(format!("0,0,0,{},{},{},0", rx, ry, rz)),
        }
    }
}

/// Which set of views to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewPreset {
    /// The default view only.
    #[default]
    Single,
    /// Default plus the six axis-aligned views.
    Standard,
}

impl std::str::FromStr for ViewPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "standard" => Ok(Self::Standard),
            other => Err(format!("unknown view preset '{}' (expected single or standard)", other)),
        }
    }
}

impl std::fmt::Display for ViewPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Standard => write!(f, "standard"),
        }
    }
}

/// Ordered list of camera views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSet {
    views: Vec<CameraView>,
}

impl ViewSet {
    /// Only the default view.
    #[must_use]
    pub fn single() -> Self {
        Self {
            views: vec![CameraView::default_view()],
        }
    }

    /// Default, front, back, left, right, top and bottom.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            views: vec![
                CameraView::default_view(),
                CameraView::rotated("front", 90, 0, 0),
                CameraView::rotated("back", 90, 0, 180),
                CameraView::rotated("left", 90, 0, 270),
                CameraView::rotated("right", 90, 0, 90),
                CameraView::rotated("top", 0, 0, 0),
                CameraView::rotated("bottom", 180, 0, 0),
            ],
        }
    }

    /// Build a view set from a preset.
    #[must_use]
    pub fn from_preset(preset: ViewPreset) -> Self {
        match preset {
            ViewPreset::Single => Self::single(),
            ViewPreset::Standard => Self::standard(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CameraView> {
        self.views.iter()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.views.iter().map(|v| v.name.clone()).collect()
    }
}

impl Default for ViewSet {
    fn default() -> Self {
        Self::single()
    }
}

/// One rendered image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedView {
    pub name: String,
    pub png: Vec<u8>,
}

/// Images for every requested view, in view order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedViews {
    views: Vec<RenderedView>,
}

impl RenderedViews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, png: Vec<u8>) {
        self.views.push(RenderedView {
            name: name.into(),
            png,
        });
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.views
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.png.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderedView> {
        self.views.iter()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.views.iter().map(|v| v.name.clone()).collect()
    }

    /// Convert to image attachments for a model call.
    #[must_use]
    pub fn to_attachments(&self) -> Vec<ImageAttachment> {
        self.views
            .iter()
            .map(|v| ImageAttachment::png(v.name.clone(), v.png.clone()))
            .collect()
    }
}

/// Result of one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Images(RenderedViews),
    Failure { diagnostic: String },
}

impl RenderOutcome {
    /// Create a failure outcome.
    pub fn failure(diagnostic: impl Into<String>) -> Self {
        Self::Failure {
            diagnostic: diagnostic.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Images(_))
    }
}

// =============================================================================
// Render Configuration
// =============================================================================

/// Settings for the OpenSCAD renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Path or name of the openscad binary.
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Image width in pixels.
    #[serde(default = "default_image_size")]
    pub width: u32,

    /// Image height in pixels.
    #[serde(default = "default_image_size")]
    pub height: u32,
}

fn default_binary() -> String {
    "openscad".to_string()
}

fn default_image_size() -> u32 {
    512
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            width: default_image_size(),
            height: default_image_size(),
        }
    }
}

impl RenderConfig {
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.binary.trim().is_empty() {
            problems.push("render.binary must not be empty".to_string());
        }
        if self.width == 0 || self.height == 0 {
            problems.push(format!(
                "render image size must be positive (got {}x{})",
                self.width, self.height
            ));
        }
        problems
    }
}
