//! The per-image edit session: history, hotspot, crop and dispatch state.

mod error;

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::crop::{output_dimensions, resolve_crop, AspectRatio, CropPreset, CropRegion};
use crate::dispatch::{
    DispatchEvent, DispatchMachine, DispatchRejection, DispatchState, EditRequest, OperationKind,
};
use crate::generator::{GenerationRequest, GenerativeKind};
use crate::geometry::{CoordinateMapper, NaturalPoint, NaturalRect, RenderedPoint, RenderedSize};
use crate::history::{History, HistoryResult, ImageVersion, VersionId, VersionIds, VersionOrigin};

pub use error::{EditError, EditResult, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Retouch target, kept in both pixel spaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hotspot {
    pub natural: NaturalPoint,
    pub display: RenderedPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorTab {
    #[default]
    Retouch,
    Adjust,
    Filters,
    Background,
    Freestyle,
    Crop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClickOutcome {
    HotspotSet(Hotspot),
    PreviewRequested(VersionId),
    /// The crop tab drags a region instead of reacting to clicks.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

/// What a pending edit has to do between `begin_edit` and `finish_edit`.
#[derive(Debug, Clone)]
pub enum EditWork {
    Generate(GenerationRequest),
    Crop {
        payload: Arc<[u8]>,
        rect: NaturalRect,
        density: f64,
    },
}

/// Proof that an edit passed validation and holds the pending slot.
#[derive(Debug)]
pub struct EditTicket {
    session: SessionId,
    kind: OperationKind,
    source: VersionId,
    work: EditWork,
}

impl EditTicket {
    pub const fn session(&self) -> SessionId {
        self.session
    }

    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    pub const fn source(&self) -> VersionId {
        self.source
    }

    pub const fn work(&self) -> &EditWork {
        &self.work
    }
}

#[derive(Debug)]
pub struct ChatTicket {
    _private: (),
}

/// Single owned context for one loaded image.
///
/// Only the dispatcher's completion path and explicit undo/redo touch the
/// history. An upload replaces everything except the chat transcript.
#[derive(Debug, Default)]
pub struct Session {
    id: SessionId,
    version_ids: VersionIds,
    history: History,
    hotspot: Option<Hotspot>,
    crop: Option<CropRegion>,
    crop_preset: CropPreset,
    tab: EditorTab,
    viewport: Option<RenderedSize>,
    dispatch: DispatchMachine,
    last_error: Option<EditError>,
    transcript: Vec<ChatMessage>,
    chat_pending: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crop_preset(crop_preset: CropPreset) -> Self {
        Self {
            crop_preset,
            ..Self::default()
        }
    }

    pub const fn id(&self) -> SessionId {
        self.id
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn current_version(&self) -> Option<&ImageVersion> {
        self.history.current()
    }

    pub fn hotspot(&self) -> Option<Hotspot> {
        self.hotspot
    }

    pub fn crop_region(&self) -> Option<CropRegion> {
        self.crop
    }

    pub fn crop_preset(&self) -> CropPreset {
        self.crop_preset
    }

    pub fn tab(&self) -> EditorTab {
        self.tab
    }

    pub fn viewport(&self) -> Option<RenderedSize> {
        self.viewport
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatch.state()
    }

    pub fn is_busy(&self) -> bool {
        self.dispatch.is_pending()
    }

    pub fn last_error(&self) -> Option<&EditError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn is_chat_pending(&self) -> bool {
        self.chat_pending
    }

    /// Starts a fresh session around `payload`. Anything in flight becomes stale.
    pub fn upload(&mut self, payload: Vec<u8>) -> EditResult<VersionId> {
        let id = self.version_ids.next_id();
        let version = match ImageVersion::from_encoded(id, VersionOrigin::Upload, payload) {
            Ok(version) => version,
            Err(err) => return self.fail(err.into()),
        };
        if let DispatchState::Pending(kind) = self.dispatch.state() {
            tracing::info!(
                session = %self.id,
                %kind,
                "upload replaces session with an edit in flight"
            );
        }
        self.id = SessionId(self.id.0 + 1);
        self.history.reset(version);
        self.hotspot = None;
        self.crop = None;
        self.viewport = None;
        self.dispatch.reset();
        self.last_error = None;

        tracing::info!(
            session = %self.id,
            version = %id,
            bounds = ?self.history.current().map(ImageVersion::bounds),
            "image uploaded"
        );
        Ok(id)
    }

    /// Records the rendered size. A drawn crop region follows the resize so it
    /// still resolves to the rectangle the user picked.
    pub fn set_viewport(&mut self, rendered: RenderedSize) {
        let previous = self.viewport.replace(rendered);
        let (Some(from), Some(region)) = (previous, self.crop) else {
            return;
        };
        if from == rendered {
            return;
        }
        self.crop = region
            .rescale(from, rendered)
            .map(|region| region.enforce_aspect().clamp_to(rendered));
        tracing::debug!(?from, to = ?rendered, crop = ?self.crop, "viewport resized");
    }

    pub fn select_tab(&mut self, tab: EditorTab) {
        tracing::debug!(from = ?self.tab, to = ?tab, "tab selected");
        self.tab = tab;
    }

    /// Coordinate mapping for the current version as it is rendered now.
    pub fn mapper(&self) -> EditResult<CoordinateMapper> {
        let version = self.history.current().ok_or(ValidationError::MissingImage)?;
        let rendered = self.viewport.unwrap_or(RenderedSize::new(0.0, 0.0));
        Ok(CoordinateMapper::new(version.bounds(), rendered)?)
    }

    pub fn click(&mut self, point: RenderedPoint) -> EditResult<ClickOutcome> {
        let Some(current) = self.history.current().map(ImageVersion::id) else {
            return self.fail(ValidationError::MissingImage.into());
        };

        match self.tab {
            EditorTab::Retouch => {
                let mapper = match self.mapper() {
                    Ok(mapper) => mapper,
                    Err(err) => return self.fail(err),
                };
                let natural = mapper.clamp_natural(mapper.to_natural(point));
                let hotspot = Hotspot {
                    natural,
                    display: point,
                };
                tracing::debug!(?natural, "hotspot set");
                self.hotspot = Some(hotspot);
                Ok(ClickOutcome::HotspotSet(hotspot))
            }
            EditorTab::Crop => Ok(ClickOutcome::Ignored),
            _ => Ok(ClickOutcome::PreviewRequested(current)),
        }
    }

    pub fn clear_hotspot(&mut self) {
        self.hotspot = None;
    }

    /// Changes the aspect lock and re-fits any region already drawn.
    pub fn set_crop_preset(&mut self, preset: CropPreset) {
        self.crop_preset = preset;
        let aspect = self.crop_aspect();
        if let Some(region) = self.crop.as_mut() {
            *region = region.with_aspect(aspect).enforce_aspect();
        }
    }

    /// Stores a region drawn on screen. It takes the current preset's aspect
    /// lock and is clamped into the rendered image, but is not reshaped.
    pub fn set_crop_region(&mut self, region: CropRegion) {
        let mut region = region.with_aspect(self.crop_aspect());
        if let Some(viewport) = self.viewport {
            region = region.clamp_to(viewport);
        }
        self.crop = Some(region);
    }

    pub fn clear_crop_region(&mut self) {
        self.crop = None;
    }

    fn crop_aspect(&self) -> Option<AspectRatio> {
        let bounds = self.history.current().map(ImageVersion::bounds)?;
        self.crop_preset.resolve_ratio(bounds)
    }

    pub fn undo(&mut self) -> EditResult<usize> {
        self.step_history(History::undo)
    }

    pub fn redo(&mut self) -> EditResult<usize> {
        self.step_history(History::redo)
    }

    fn step_history(
        &mut self,
        step: fn(&mut History) -> HistoryResult<usize>,
    ) -> EditResult<usize> {
        if let DispatchState::Pending(pending) = self.dispatch.state() {
            return self.fail(EditError::HistoryLocked { pending });
        }
        match step(&mut self.history) {
            Ok(cursor) => {
                tracing::debug!(cursor, "history cursor moved");
                self.last_error = None;
                Ok(cursor)
            }
            Err(err) => self.fail(err.into()),
        }
    }

    /// Validates `request` and moves the dispatcher to Pending.
    pub fn begin_edit(&mut self, request: &EditRequest, density: f64) -> EditResult<EditTicket> {
        let ticket = match self.prepare_edit(request, density) {
            Ok(ticket) => ticket,
            Err(err) => return self.fail(err),
        };
        if let Err(rejection) = self.dispatch.transition(DispatchEvent::Begin(ticket.kind)) {
            let pending = match rejection {
                DispatchRejection::Busy { pending } => pending,
                DispatchRejection::NothingPending => ticket.kind,
            };
            return self.fail(EditError::Busy {
                requested: ticket.kind,
                pending,
            });
        }
        Ok(ticket)
    }

    fn prepare_edit(&self, request: &EditRequest, density: f64) -> EditResult<EditTicket> {
        let kind = request.kind();
        let source = self.history.current().ok_or(ValidationError::MissingImage)?;
        if let DispatchState::Pending(pending) = self.dispatch.state() {
            return Err(EditError::Busy {
                requested: kind,
                pending,
            });
        }

        let work = match request {
            EditRequest::Generate {
                kind: generative,
                instruction,
            } => {
                let instruction = instruction.trim();
                if instruction.is_empty() {
                    return Err(ValidationError::EmptyInstruction { kind }.into());
                }
                let hotspot = match generative {
                    GenerativeKind::Retouch => {
                        Some(self.hotspot.ok_or(ValidationError::MissingHotspot)?.natural)
                    }
                    _ => None,
                };
                EditWork::Generate(GenerationRequest {
                    kind: *generative,
                    source: source.shared_payload(),
                    instruction: instruction.to_string(),
                    hotspot,
                })
            }
            EditRequest::Crop => {
                let region = self.crop.ok_or(ValidationError::MissingCropRegion)?;
                if !region.has_area() {
                    return Err(ValidationError::ZeroAreaCrop.into());
                }
                if !region.matches_aspect() {
                    return Err(ValidationError::AspectMismatch.into());
                }
                let rect = resolve_crop(&self.mapper()?, &region)?;
                output_dimensions(rect, density)?;
                EditWork::Crop {
                    payload: source.shared_payload(),
                    rect,
                    density,
                }
            }
        };

        Ok(EditTicket {
            session: self.id,
            kind,
            source: source.id(),
            work,
        })
    }

    /// Applies the outcome of a pending edit.
    ///
    /// Results for a session that has since been replaced are dropped without
    /// touching the new session.
    pub fn finish_edit(
        &mut self,
        ticket: EditTicket,
        outcome: EditResult<Vec<u8>>,
    ) -> EditResult<VersionId> {
        let kind = ticket.kind;
        if ticket.session != self.id {
            tracing::warn!(
                stale = %ticket.session,
                current = %self.id,
                %kind,
                "discarding stale edit result"
            );
            return Err(EditError::StaleResponse {
                kind,
                session: ticket.session,
            });
        }

        if let Err(DispatchRejection::NothingPending) =
            self.dispatch.transition(DispatchEvent::Complete)
        {
            tracing::warn!(%kind, "edit finished with nothing pending");
        }

        let bytes = match outcome {
            Ok(bytes) => bytes,
            Err(err) => return self.fail(err),
        };
        let origin = kind.origin().unwrap_or(VersionOrigin::Freestyle);
        let version = match ImageVersion::from_encoded(self.version_ids.next_id(), origin, bytes) {
            Ok(version) => version,
            Err(err) if kind == OperationKind::Crop => return self.fail(err.into()),
            Err(err) => {
                return self.fail(EditError::Collaborator {
                    kind,
                    reason: format!("unusable result: {err}"),
                })
            }
        };

        let id = version.id();
        let cursor = self.history.append(version);
        match kind {
            OperationKind::Retouch => self.hotspot = None,
            OperationKind::Crop => self.crop = None,
            _ => {}
        }
        self.last_error = None;
        tracing::info!(
            session = %self.id,
            %kind,
            version = %id,
            source = %ticket.source,
            cursor,
            "edit applied"
        );
        Ok(id)
    }

    /// Frees the pending slot of an edit whose result will never arrive.
    ///
    /// An image edit from a session that has since been replaced leaves the
    /// new session alone. Chat survives uploads, so its flag is always cleared.
    pub fn abandon_edit(&mut self, session: SessionId, kind: OperationKind) {
        if kind == OperationKind::Chat {
            self.chat_pending = false;
        } else if session != self.id {
            tracing::debug!(stale = %session, current = %self.id, %kind, "abandoned stale edit");
            return;
        } else if self.dispatch.transition(DispatchEvent::Complete).is_err() {
            return;
        }
        tracing::warn!(session = %self.id, %kind, "pending edit abandoned");
    }

    pub fn begin_chat(&mut self, message: &str) -> EditResult<ChatTicket> {
        if message.trim().is_empty() {
            return self.fail(ValidationError::EmptyMessage.into());
        }
        if self.chat_pending {
            return self.fail(EditError::Busy {
                requested: OperationKind::Chat,
                pending: OperationKind::Chat,
            });
        }
        self.chat_pending = true;
        self.transcript.push(ChatMessage {
            role: ChatRole::User,
            text: message.to_string(),
        });
        Ok(ChatTicket { _private: () })
    }

    pub fn finish_chat(
        &mut self,
        _ticket: ChatTicket,
        reply: EditResult<String>,
    ) -> EditResult<String> {
        self.chat_pending = false;
        match reply {
            Ok(text) => {
                self.transcript.push(ChatMessage {
                    role: ChatRole::Assistant,
                    text: text.clone(),
                });
                Ok(text)
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail<T>(&mut self, err: EditError) -> EditResult<T> {
        tracing::warn!(session = %self.id, error = %err, "edit session error");
        self.last_error = Some(err.clone());
        Err(err)
    }
}
