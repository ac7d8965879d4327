//! Single-flight orchestration of edits against the image generator.

mod machine;

use std::cell::RefCell;
use std::fmt;

use crate::crop::extract_crop;
use crate::generator::{GenerativeKind, ImageGenerator};
use crate::history::{VersionId, VersionOrigin};
use crate::session::{EditError, EditResult, EditWork, Session, SessionId};

pub use machine::{DispatchEvent, DispatchMachine, DispatchRejection, DispatchState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Retouch,
    Filter,
    Adjust,
    Background,
    Freestyle,
    Crop,
    Chat,
}

impl OperationKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Retouch => "retouch",
            Self::Filter => "filter",
            Self::Adjust => "adjust",
            Self::Background => "background",
            Self::Freestyle => "freestyle",
            Self::Crop => "crop",
            Self::Chat => "chat",
        }
    }

    /// Origin tag for the version this operation produces, if any.
    pub const fn origin(self) -> Option<VersionOrigin> {
        match self {
            Self::Retouch => Some(VersionOrigin::Retouch),
            Self::Filter => Some(VersionOrigin::Filter),
            Self::Adjust => Some(VersionOrigin::Adjust),
            Self::Background => Some(VersionOrigin::Background),
            Self::Freestyle => Some(VersionOrigin::Freestyle),
            Self::Crop => Some(VersionOrigin::Crop),
            Self::Chat => None,
        }
    }
}

impl From<GenerativeKind> for OperationKind {
    fn from(kind: GenerativeKind) -> Self {
        match kind {
            GenerativeKind::Retouch => Self::Retouch,
            GenerativeKind::Filter => Self::Filter,
            GenerativeKind::Adjust => Self::Adjust,
            GenerativeKind::Background => Self::Background,
            GenerativeKind::Freestyle => Self::Freestyle,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A user-submitted image edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditRequest {
    Generate {
        kind: GenerativeKind,
        instruction: String,
    },
    /// Commits the session's current crop region.
    Crop,
}

impl EditRequest {
    pub fn generate(kind: GenerativeKind, instruction: impl Into<String>) -> Self {
        Self::Generate {
            kind,
            instruction: instruction.into(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Generate { kind, .. } => (*kind).into(),
            Self::Crop => OperationKind::Crop,
        }
    }
}

/// Runs edits and chat exchanges against `G`.
///
/// The session is borrowed only on either side of the single await point, so
/// a second submit made while one is in flight sees the pending state and is
/// rejected as busy.
#[derive(Debug)]
pub struct Dispatcher<G> {
    generator: G,
    pixel_density: f64,
}

impl<G: ImageGenerator> Dispatcher<G> {
    pub fn new(generator: G, pixel_density: f64) -> Self {
        Self {
            generator,
            pixel_density,
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub async fn submit(
        &self,
        session: &RefCell<Session>,
        request: EditRequest,
    ) -> EditResult<VersionId> {
        let ticket = session.borrow_mut().begin_edit(&request, self.pixel_density)?;
        let kind = ticket.kind();
        tracing::info!(%kind, session = %ticket.session(), "edit dispatched");
        let guard = PendingGuard::new(session, ticket.session(), kind);

        let outcome = match ticket.work() {
            EditWork::Generate(request) => self
                .generator
                .generate(request.clone())
                .await
                .map_err(|err| EditError::Collaborator {
                    kind,
                    reason: err.to_string(),
                }),
            EditWork::Crop {
                payload,
                rect,
                density,
            } => extract_crop(payload, *rect, *density).map_err(EditError::from),
        };

        guard.disarm();
        session.borrow_mut().finish_edit(ticket, outcome)
    }

    /// Sends a chat message. The user's message stays in the transcript even
    /// when the reply fails.
    pub async fn send_chat(
        &self,
        session: &RefCell<Session>,
        message: String,
    ) -> EditResult<String> {
        let ticket = session.borrow_mut().begin_chat(&message)?;
        let id = session.borrow().id();
        let guard = PendingGuard::new(session, id, OperationKind::Chat);
        let reply = self
            .generator
            .chat(message)
            .await
            .map_err(|err| EditError::Collaborator {
                kind: OperationKind::Chat,
                reason: err.to_string(),
            });
        guard.disarm();
        session.borrow_mut().finish_chat(ticket, reply)
    }
}

/// Releases the pending slot when a submit future is dropped mid-flight.
struct PendingGuard<'a> {
    session: &'a RefCell<Session>,
    id: SessionId,
    kind: OperationKind,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(session: &'a RefCell<Session>, id: SessionId, kind: OperationKind) -> Self {
        Self {
            session,
            id,
            kind,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.session.try_borrow_mut() {
            Ok(mut session) => session.abandon_edit(self.id, self.kind),
            Err(_) => tracing::warn!(kind = %self.kind, "session busy; pending slot not released"),
        }
    }
}
