use std::sync::Arc;

use thiserror::Error;

use super::SessionId;
use crate::crop::CropError;
use crate::dispatch::OperationKind;
use crate::geometry::GeometryError;
use crate::history::HistoryError;

pub type EditResult<T> = std::result::Result<T, EditError>;

/// Precondition failures. Reported before anything is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no image loaded")]
    MissingImage,
    #[error("{kind} needs an instruction")]
    EmptyInstruction { kind: OperationKind },
    #[error("retouch needs a hotspot; click the image first")]
    MissingHotspot,
    #[error("no crop region selected")]
    MissingCropRegion,
    #[error("crop region has no area")]
    ZeroAreaCrop,
    #[error("crop region does not match the locked aspect ratio")]
    AspectMismatch,
    #[error("chat message is empty")]
    EmptyMessage,
}

#[derive(Debug, Clone, Error)]
pub enum EditError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{requested} rejected while {pending} is in flight")]
    Busy {
        requested: OperationKind,
        pending: OperationKind,
    },
    #[error("undo/redo unavailable while {pending} is in flight")]
    HistoryLocked { pending: OperationKind },
    #[error("{kind} failed: {reason}")]
    Collaborator { kind: OperationKind, reason: String },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("unreadable image: {0}")]
    Image(Arc<image::ImageError>),
    #[error("{kind} result arrived after session {session} was replaced")]
    StaleResponse {
        kind: OperationKind,
        session: SessionId,
    },
}

impl EditError {
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::HistoryLocked { .. })
    }
}

impl From<image::ImageError> for EditError {
    fn from(err: image::ImageError) -> Self {
        Self::Image(Arc::new(err))
    }
}

impl From<CropError> for EditError {
    fn from(err: CropError) -> Self {
        match err {
            CropError::Geometry(err) => Self::Geometry(err),
            CropError::Image(err) => Self::from(err),
        }
    }
}
