//! The boundary a front end drives: one session, its dispatcher and the
//! display handles that follow the history.

use std::cell::{Ref, RefCell};
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::crop::{CropPreset, CropRegion};
use crate::dispatch::{Dispatcher, EditRequest};
use crate::error::{AppError, AppResult};
use crate::generator::{GenerativeKind, ImageGenerator};
use crate::geometry::{RenderedPoint, RenderedSize};
use crate::handles::{DisplayHandle, DisplayHandles, HandleRegistry};
use crate::history::VersionId;
use crate::session::{ClickOutcome, EditResult, EditorTab, Session};
use crate::storage::DownloadStorage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudioSettings {
    pub pixel_density: f64,
    pub crop_preset: CropPreset,
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            pixel_density: 1.0,
            crop_preset: CropPreset::default(),
        }
    }
}

impl From<&AppConfig> for StudioSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            pixel_density: config.effective_pixel_density(),
            crop_preset: config.default_crop_preset,
        }
    }
}

pub struct Studio<G, R: HandleRegistry> {
    session: RefCell<Session>,
    dispatcher: Dispatcher<G>,
    handles: RefCell<DisplayHandles<R>>,
    storage: DownloadStorage,
}

impl<G: ImageGenerator, R: HandleRegistry> Studio<G, R> {
    pub fn new(
        generator: G,
        registry: R,
        storage: DownloadStorage,
        settings: StudioSettings,
    ) -> Self {
        Self {
            session: RefCell::new(Session::with_crop_preset(settings.crop_preset)),
            dispatcher: Dispatcher::new(generator, settings.pixel_density),
            handles: RefCell::new(DisplayHandles::new(registry)),
            storage,
        }
    }

    /// Read access to the session. Do not hold it across `submit`/`send_chat`.
    pub fn session(&self) -> Ref<'_, Session> {
        self.session.borrow()
    }

    pub fn handles(&self) -> Ref<'_, DisplayHandles<R>> {
        self.handles.borrow()
    }

    pub fn generator(&self) -> &G {
        self.dispatcher.generator()
    }

    pub fn upload(&self, payload: Vec<u8>) -> EditResult<VersionId> {
        let result = self.session.borrow_mut().upload(payload);
        self.sync_handles();
        result
    }

    pub fn upload_file(&self, path: &Path) -> AppResult<VersionId> {
        let payload = std::fs::read(path).map_err(|source| AppError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.upload(payload)?)
    }

    pub fn set_viewport(&self, rendered: RenderedSize) {
        self.session.borrow_mut().set_viewport(rendered);
    }

    pub fn select_tab(&self, tab: EditorTab) {
        self.session.borrow_mut().select_tab(tab);
    }

    pub fn click(&self, point: RenderedPoint) -> EditResult<ClickOutcome> {
        self.session.borrow_mut().click(point)
    }

    pub fn set_crop_preset(&self, preset: CropPreset) {
        self.session.borrow_mut().set_crop_preset(preset);
    }

    pub fn set_crop_region(&self, region: CropRegion) {
        self.session.borrow_mut().set_crop_region(region);
    }

    pub fn clear_crop_region(&self) {
        self.session.borrow_mut().clear_crop_region();
    }

    pub fn undo(&self) -> EditResult<usize> {
        let result = self.session.borrow_mut().undo();
        self.sync_handles();
        result
    }

    pub fn redo(&self) -> EditResult<usize> {
        let result = self.session.borrow_mut().redo();
        self.sync_handles();
        result
    }

    pub async fn submit(
        &self,
        kind: GenerativeKind,
        instruction: impl Into<String>,
    ) -> EditResult<VersionId> {
        self.dispatch(EditRequest::generate(kind, instruction)).await
    }

    pub async fn submit_crop(&self) -> EditResult<VersionId> {
        self.dispatch(EditRequest::Crop).await
    }

    async fn dispatch(&self, request: EditRequest) -> EditResult<VersionId> {
        let result = self.dispatcher.submit(&self.session, request).await;
        self.sync_handles();
        result
    }

    pub async fn send_chat(&self, message: impl Into<String>) -> EditResult<String> {
        self.dispatcher.send_chat(&self.session, message.into()).await
    }

    /// Writes the current version to the download directory.
    pub fn download(&self) -> AppResult<PathBuf> {
        let session = self.session.borrow();
        let version = session.current_version().ok_or(AppError::NothingToShow)?;
        Ok(self.storage.save_version(version)?)
    }

    /// URL of the active version for a full-screen view.
    pub fn fullscreen(&self) -> AppResult<String> {
        self.active_handle().ok_or(AppError::NothingToShow)
    }

    pub fn active_handle(&self) -> Option<String> {
        self.handles
            .borrow()
            .active()
            .map(|handle| handle.url().to_string())
    }

    pub fn original_handle(&self) -> Option<String> {
        self.handles
            .borrow()
            .original()
            .map(|handle| handle.url().to_string())
    }

    /// Releases every display handle. The session itself stays usable.
    pub fn teardown(&self) {
        self.handles.borrow_mut().teardown();
    }

    fn sync_handles(&self) {
        let session = self.session.borrow();
        self.handles.borrow_mut().sync(session.history());
    }
}

impl<G, R: HandleRegistry> std::fmt::Debug for Studio<G, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Studio")
            .field("session", &self.session)
            .field("active", &self.handles.borrow().active().map(DisplayHandle::url))
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::crop::tests::coordinate_png;
    use crate::dispatch::tests::ScriptedGenerator;
    use crate::dispatch::{DispatchState, OperationKind};
    use crate::generator::GeneratorError;
    use crate::handles::ObjectUrlRegistry;
    use crate::session::EditError;

    type TestStudio = Studio<ScriptedGenerator, ObjectUrlRegistry>;

    fn studio_in(dir: PathBuf) -> (TestStudio, ScriptedGenerator) {
        let generator = ScriptedGenerator::default();
        let studio = Studio::new(
            generator.clone(),
            ObjectUrlRegistry::new(),
            DownloadStorage::with_dir(dir),
            StudioSettings::default(),
        );
        (studio, generator)
    }

    fn loaded_studio() -> (TestStudio, ScriptedGenerator) {
        let (studio, generator) = studio_in(std::env::temp_dir().join("retoucher-studio-unused"));
        studio
            .upload(coordinate_png(100, 200))
            .expect("upload should succeed");
        studio.set_viewport(RenderedSize::new(50.0, 100.0));
        (studio, generator)
    }

    #[test]
    fn upload_mints_active_and_original_handles() {
        let (studio, _) = loaded_studio();
        let active = studio.active_handle().expect("active handle");
        let original = studio.original_handle().expect("original handle");
        assert_ne!(active, original);
        assert_eq!(studio.fullscreen().expect("fullscreen"), active);
        assert_eq!(studio.handles().registry().live_count(), 2);
    }

    #[test]
    fn retouch_then_undo_redo_moves_the_active_handle() {
        let (studio, generator) = loaded_studio();
        studio.select_tab(EditorTab::Retouch);
        studio
            .click(RenderedPoint::new(25.0, 50.0))
            .expect("click should map");
        let first_active = studio.active_handle();
        let original = studio.original_handle();

        generator.reply_image(Ok(coordinate_png(100, 200)));
        let edited = block_on(studio.submit(GenerativeKind::Retouch, "remove mark"))
            .expect("retouch should succeed");

        let after_edit = studio.active_handle();
        assert_ne!(after_edit, first_active);
        assert_eq!(studio.original_handle(), original);
        assert_eq!(
            studio.handles().active().map(DisplayHandle::version),
            Some(edited)
        );

        studio.undo().expect("undo");
        let after_undo = studio.active_handle();
        assert_ne!(after_undo, after_edit);

        studio.redo().expect("redo");
        assert_ne!(studio.active_handle(), after_undo);
        assert_eq!(
            studio.handles().active().map(DisplayHandle::version),
            Some(edited)
        );
        assert_eq!(studio.handles().registry().live_count(), 2);
    }

    #[test]
    fn failed_edit_leaves_handles_alone() {
        let (studio, generator) = loaded_studio();
        let active = studio.active_handle();

        generator.reply_image(Err(GeneratorError::Rejected("quota".to_string())));
        let err = block_on(studio.submit(GenerativeKind::Filter, "sepia"))
            .expect_err("failure should surface");
        assert!(matches!(
            err,
            EditError::Collaborator {
                kind: OperationKind::Filter,
                ..
            }
        ));
        assert_eq!(studio.active_handle(), active);
        assert_eq!(studio.session().dispatch_state(), DispatchState::Idle);
    }

    #[test]
    fn crop_submits_through_the_studio() {
        let (studio, _) = loaded_studio();
        studio.select_tab(EditorTab::Crop);
        studio.set_crop_region(CropRegion::new(0.0, 0.0, 25.0, 50.0));

        block_on(studio.submit_crop()).expect("crop should succeed");

        let session = studio.session();
        let current = session.current_version().expect("cropped version");
        assert_eq!((current.bounds().width, current.bounds().height), (50, 100));
        assert!(session.crop_region().is_none());
    }

    #[test]
    fn chat_transcript_survives_upload() {
        let (studio, generator) = loaded_studio();
        generator.reply_chat(Ok("Try a warmer filter.".to_string()));
        let reply = block_on(studio.send_chat("any ideas?")).expect("chat reply");
        assert_eq!(reply, "Try a warmer filter.");

        studio
            .upload(coordinate_png(10, 10))
            .expect("second upload");
        assert_eq!(studio.session().transcript().len(), 2);
    }

    #[test]
    fn download_writes_current_version_without_touching_history() {
        let dir = std::env::temp_dir().join(format!(
            "retoucher-studio-{}-download",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let (studio, _) = studio_in(dir.clone());

        assert!(matches!(studio.download(), Err(AppError::NothingToShow)));
        assert!(matches!(studio.fullscreen(), Err(AppError::NothingToShow)));

        let payload = coordinate_png(8, 8);
        studio.upload(payload.clone()).expect("upload");
        let path = studio.download().expect("download");

        assert_eq!(std::fs::read(&path).expect("read back"), payload);
        assert_eq!(studio.session().history().len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn upload_file_reports_missing_path() {
        let (studio, _) = studio_in(std::env::temp_dir());
        let err = studio
            .upload_file(Path::new("/nonexistent/retoucher/input.png"))
            .expect_err("missing file");
        assert!(matches!(err, AppError::Read { .. }));
        assert!(studio.session().current_version().is_none());
    }

    #[test]
    fn teardown_releases_everything() {
        let (studio, _) = loaded_studio();
        studio.teardown();
        assert!(studio.active_handle().is_none());
        assert_eq!(studio.handles().registry().live_count(), 0);
        assert_eq!(
            studio.handles().registry().minted(),
            studio.handles().registry().released()
        );
    }
}
