//! Headless replay of a recorded editing session.
//!
//! A script is a JSON object with a `steps` array. Each step is either a bare
//! string (`"undo"`, `"redo"`, `"crop"`, `"download"`) or a single-key object:
//!
//! ```json
//! { "steps": [
//!     { "upload": { "path": "portrait.png" } },
//!     { "viewport": { "width": 400, "height": 600 } },
//!     { "tab": "retouch" },
//!     { "click": { "x": 120, "y": 80 } },
//!     { "submit": { "kind": "retouch", "instruction": "remove the mark" } },
//!     "undo",
//!     "download"
//! ] }
//! ```

use std::path::{Path, PathBuf};

use futures::executor::block_on;
use serde::Deserialize;

use crate::crop::{CropPreset, CropRegion};
use crate::error::{AppError, AppResult};
use crate::generator::{GenerativeKind, ImageGenerator};
use crate::geometry::{RenderedPoint, RenderedSize};
use crate::handles::HandleRegistry;
use crate::session::EditorTab;
use crate::studio::Studio;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionScript {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Relative paths resolve against the script's directory.
    Upload {
        path: PathBuf,
    },
    Viewport {
        width: f64,
        height: f64,
    },
    Tab(EditorTab),
    Click {
        x: f64,
        y: f64,
    },
    CropPreset(CropPreset),
    CropRegion {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Submit {
        kind: GenerativeKind,
        instruction: String,
    },
    Crop,
    Chat {
        message: String,
    },
    Undo,
    Redo,
    Download,
}

impl Step {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Upload { .. } => "upload",
            Self::Viewport { .. } => "viewport",
            Self::Tab(_) => "tab",
            Self::Click { .. } => "click",
            Self::CropPreset(_) => "crop_preset",
            Self::CropRegion { .. } => "crop_region",
            Self::Submit { .. } => "submit",
            Self::Crop => "crop",
            Self::Chat { .. } => "chat",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Download => "download",
        }
    }
}

impl SessionScript {
    pub fn from_json(json: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> AppResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| AppError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub index: usize,
    pub step: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub failures: Vec<StepFailure>,
    pub downloads: Vec<PathBuf>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs every step in order. A failing step is recorded and replay continues,
/// the same way a user keeps working after an error banner.
pub fn replay<G, R>(
    studio: &Studio<G, R>,
    script: &SessionScript,
    base_dir: &Path,
) -> ReplayReport
where
    G: ImageGenerator,
    R: HandleRegistry,
{
    let mut report = ReplayReport::default();
    for (index, step) in script.steps.iter().enumerate() {
        tracing::debug!(index, step = step.name(), "replaying step");
        match run_step(studio, step, base_dir) {
            Ok(download) => {
                report.applied += 1;
                report.downloads.extend(download);
            }
            Err(err) => {
                tracing::warn!(index, step = step.name(), %err, "step failed");
                report.failures.push(StepFailure {
                    index,
                    step: step.name(),
                    error: err.to_string(),
                });
            }
        }
    }
    report
}

fn run_step<G, R>(
    studio: &Studio<G, R>,
    step: &Step,
    base_dir: &Path,
) -> AppResult<Option<PathBuf>>
where
    G: ImageGenerator,
    R: HandleRegistry,
{
    match step {
        Step::Upload { path } => {
            studio.upload_file(&base_dir.join(path))?;
        }
        Step::Viewport { width, height } => {
            studio.set_viewport(RenderedSize::new(*width, *height));
        }
        Step::Tab(tab) => studio.select_tab(*tab),
        Step::Click { x, y } => {
            let outcome = studio.click(RenderedPoint::new(*x, *y))?;
            tracing::info!(?outcome, "click");
        }
        Step::CropPreset(preset) => studio.set_crop_preset(*preset),
        Step::CropRegion {
            x,
            y,
            width,
            height,
        } => studio.set_crop_region(CropRegion::new(*x, *y, *width, *height)),
        Step::Submit { kind, instruction } => {
            block_on(studio.submit(*kind, instruction.as_str()))?;
        }
        Step::Crop => {
            block_on(studio.submit_crop())?;
        }
        Step::Chat { message } => {
            let reply = block_on(studio.send_chat(message.as_str()))?;
            tracing::info!(%reply, "assistant replied");
        }
        Step::Undo => {
            studio.undo()?;
        }
        Step::Redo => {
            studio.redo()?;
        }
        Step::Download => return studio.download().map(Some),
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crop::tests::coordinate_png;
    use crate::dispatch::tests::ScriptedGenerator;
    use crate::handles::ObjectUrlRegistry;
    use crate::storage::DownloadStorage;
    use crate::studio::StudioSettings;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "retoucher-script-{}-{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    fn parses_bare_and_keyed_steps() {
        let script = SessionScript::from_json(
            r#"{ "steps": [
                { "upload": { "path": "a.png" } },
                { "tab": "crop" },
                { "crop_preset": "1:1" },
                { "submit": { "kind": "background", "instruction": "beach" } },
                "undo",
                "crop"
            ] }"#,
        )
        .expect("script should parse");

        assert_eq!(
            script.steps,
            vec![
                Step::Upload {
                    path: PathBuf::from("a.png")
                },
                Step::Tab(EditorTab::Crop),
                Step::CropPreset(CropPreset::Ratio1x1),
                Step::Submit {
                    kind: GenerativeKind::Background,
                    instruction: "beach".to_string()
                },
                Step::Undo,
                Step::Crop,
            ]
        );
    }

    #[test]
    fn unknown_step_is_a_script_error() {
        let err = SessionScript::from_json(r#"{ "steps": ["rotate"] }"#)
            .expect_err("unknown step should fail");
        assert!(matches!(err, AppError::Script(_)));
    }

    #[test]
    fn replay_drives_the_studio_and_records_failures() {
        let dir = scratch_dir("replay");
        std::fs::write(dir.join("input.png"), coordinate_png(100, 200)).expect("write input");
        let generator = ScriptedGenerator::default();
        generator.reply_image(Ok(coordinate_png(100, 200)));
        let studio = Studio::new(
            generator.clone(),
            ObjectUrlRegistry::new(),
            DownloadStorage::with_dir(dir.join("out")),
            StudioSettings::default(),
        );
        let script = SessionScript::from_json(
            r#"{ "steps": [
                "undo",
                { "upload": { "path": "input.png" } },
                { "viewport": { "width": 50, "height": 100 } },
                { "tab": "retouch" },
                { "submit": { "kind": "retouch", "instruction": "fix" } },
                { "click": { "x": 25, "y": 50 } },
                { "submit": { "kind": "retouch", "instruction": "fix" } },
                "undo",
                "redo",
                "download"
            ] }"#,
        )
        .expect("script should parse");

        let report = replay(&studio, &script, &dir);

        let failed: Vec<_> = report.failures.iter().map(|f| (f.index, f.step)).collect();
        assert_eq!(failed, [(0, "undo"), (4, "submit")]);
        assert_eq!(report.applied, 8);
        assert_eq!(report.downloads.len(), 1);
        assert!(report.downloads[0].exists());
        assert_eq!(studio.session().history().len(), 2);
        assert_eq!(studio.session().history().cursor(), Some(1));
        assert_eq!(
            generator.requests.borrow()[0].hotspot,
            Some(crate::geometry::NaturalPoint::new(50, 100))
        );
        let _ = std::fs::remove_dir_all(dir);
    }
}
