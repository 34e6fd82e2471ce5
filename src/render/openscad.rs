//! OpenSCAD command-line renderer.
//!
//! Every call writes the source into its own temporary directory and runs
//! `openscad -o <view>.png` once per camera view. A non-zero exit status or
//! a missing image is a render failure whose diagnostic is the renderer's
//! captured output.

use super::{RenderConfig, RenderOutcome, RenderService, RenderedViews, ViewSet};
use crate::error::AutoscadError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

const MODEL_FILE: &str = "model.scad";

/// Renders models with the `openscad` binary.
#[derive(Debug, Clone, Default)]
pub struct OpenScadRenderer {
    config: RenderConfig,
}

impl OpenScadRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Resolve the configured binary on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::MissingTool`] if the binary cannot be found.
    pub fn locate(&self) -> crate::Result<PathBuf> {
        which::which(&self.config.binary).map_err(|_| AutoscadError::MissingTool {
            tool: self.config.binary.clone(),
        })
    }

    /// Report the renderer version (`openscad --version`).
    ///
    /// # Errors
    ///
    /// Returns [`AutoscadError::MissingTool`] if the binary cannot be run.
    pub async fn version(&self) -> crate::Result<String> {
        let output = AsyncCommand::new(&self.config.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|_| AutoscadError::MissingTool {
                tool: self.config.binary.clone(),
            })?;

        if !output.status.success() {
            return Err(AutoscadError::render(format!(
                "{} --version exited with {}",
                self.config.binary, output.status
            )));
        }

        // OpenSCAD prints its version on stderr
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr)
        } else {
            String::from_utf8_lossy(&output.stdout)
        };
        Ok(text.trim().to_string())
    }

    fn command(&self, model: &Path, image: &Path, camera: Option<&str>) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.config.binary);
        cmd.arg("-o")
            .arg(image)
            .arg(format!("--imgsize={},{}", self.config.width, self.config.height))
            .arg("--viewall")
            .arg("--autocenter");
        if let Some(camera) = camera {
            cmd.arg(format!("--camera={}", camera));
        }
        cmd.arg(model)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn diagnostic(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(stdout);
    if !stdout.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stdout.trim());
    }
    format!("OpenSCAD Errors:\n{}", text)
}

#[async_trait]
impl RenderService for OpenScadRenderer {
    async fn render(&self, source: &str, views: &ViewSet) -> Result<RenderOutcome> {
        let workdir = tempfile::Builder::new()
            .prefix("autoscad-render-")
            .tempdir()
            .context("failed to create render directory")?;
        let model = workdir.path().join(MODEL_FILE);
        tokio::fs::write(&model, source)
            .await
            .with_context(|| format!("failed to write {}", model.display()))?;

        let mut images = RenderedViews::new();
        for view in views.iter() {
            let image = workdir.path().join(format!("{}.png", view.name));
            debug!(view = %view.name, "running {}", self.config.binary);

            let output = match self.command(&model, &image, view.camera.as_deref()).output().await {
                Ok(output) => output,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(AutoscadError::MissingTool {
                        tool: self.config.binary.clone(),
                    }
                    .into());
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to run {}", self.config.binary));
                }
            };

            if !output.status.success() {
                return Ok(RenderOutcome::failure(diagnostic(&output.stdout, &output.stderr)));
            }

            match tokio::fs::read(&image).await {
                Ok(png) if !png.is_empty() => images.push(view.name.clone(), png),
                _ => {
                    let mut text = diagnostic(&output.stdout, &output.stderr);
                    text.push_str(&format!("\nno image was produced for view '{}'", view.name));
                    return Ok(RenderOutcome::failure(text));
                }
            }
        }

        Ok(RenderOutcome::Images(images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_prefix() {
        let text = diagnostic(b"", b"ERROR: Parser error in line 3\n");
        assert_eq!(text, "OpenSCAD Errors:\nERROR: Parser error in line 3");

        let text = diagnostic(b"trace", b"ERROR: x");
        assert_eq!(text, "OpenSCAD Errors:\nERROR: x\ntrace");
    }

    #[test]
    fn test_locate_missing_binary() {
        let renderer = OpenScadRenderer::new(RenderConfig {
            binary: "autoscad-no-such-renderer".to_string(),
            ..RenderConfig::default()
        });
        assert!(matches!(
            renderer.locate(),
            Err(AutoscadError::MissingTool { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let renderer = OpenScadRenderer::new(RenderConfig {
            binary: "autoscad-no-such-renderer".to_string(),
            ..RenderConfig::default()
        });
        assert!(renderer.render("cube(1);", &ViewSet::single()).await.is_err());
        assert!(matches!(
            renderer.version().await,
            Err(AutoscadError::MissingTool { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_render_with_stand_in_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fake-openscad");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             out=\"\"\n\
             model=\"\"\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 --version) echo 'OpenSCAD version 2021.01' >&2; exit 0;;\n\
                 -o) out=\"$2\"; shift 2;;\n\
                 *) model=\"$1\"; shift;;\n\
               esac\n\
             done\n\
             if grep -q 'broken' \"$model\"; then\n\
               echo 'ERROR: Parser error in file model.scad, line 1' >&2\n\
               exit 1\n\
             fi\n\
             printf 'PNG' > \"$out\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let renderer = OpenScadRenderer::new(RenderConfig {
            binary: script.display().to_string(),
            ..RenderConfig::default()
        });

        assert_eq!(renderer.version().await.unwrap(), "OpenSCAD version 2021.01");

        match renderer.render("cube(10);", &ViewSet::standard()).await.unwrap() {
            RenderOutcome::Images(images) => {
                assert_eq!(images.len(), 7);
                assert_eq!(images.get("top"), Some(&b"PNG"[..]));
            }
            other => panic!("expected images, got {:?}", other),
        }

        match renderer.render("broken(", &ViewSet::single()).await.unwrap() {
            RenderOutcome::Failure { diagnostic } => {
                assert!(diagnostic.starts_with("OpenSCAD Errors:"));
                assert!(diagnostic.contains("Parser error"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
