//! Immutable image versions and the cursor-based history over them.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use thiserror::Error;

use crate::geometry::ImageBounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
}

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionId(u64);

impl VersionId {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Hands out strictly increasing version ids.
#[derive(Debug, Default)]
pub struct VersionIds {
    next: u64,
}

impl VersionIds {
    pub fn next_id(&mut self) -> VersionId {
        self.next += 1;
        VersionId(self.next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrigin {
    Upload,
    Retouch,
    Filter,
    Adjust,
    Background,
    Freestyle,
    Crop,
}

impl VersionOrigin {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Retouch => "retouch",
            Self::Filter => "filter",
            Self::Adjust => "adjust",
            Self::Background => "background",
            Self::Freestyle => "freestyle",
            Self::Crop => "crop",
        }
    }
}

/// One encoded image in the history. Cloning shares the payload.
#[derive(Debug, Clone)]
pub struct ImageVersion {
    id: VersionId,
    origin: VersionOrigin,
    bounds: ImageBounds,
    payload: Arc<[u8]>,
}

impl ImageVersion {
    /// Wraps an encoded raster image, reading its dimensions from the header.
    pub fn from_encoded(
        id: VersionId,
        origin: VersionOrigin,
        payload: Vec<u8>,
    ) -> Result<Self, image::ImageError> {
        let (width, height) = image::ImageReader::new(Cursor::new(payload.as_slice()))
            .with_guessed_format()?
            .into_dimensions()?;
        Ok(Self {
            id,
            origin,
            bounds: ImageBounds::new(width, height),
            payload: payload.into(),
        })
    }

    pub const fn id(&self) -> VersionId {
        self.id
    }

    pub const fn origin(&self) -> VersionOrigin {
        self.origin
    }

    pub const fn bounds(&self) -> ImageBounds {
        self.bounds
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn shared_payload(&self) -> Arc<[u8]> {
        Arc::clone(&self.payload)
    }
}

/// Ordered versions with a cursor. Index 0 is the original upload.
#[derive(Debug, Default)]
pub struct History {
    versions: Vec<ImageVersion>,
    cursor: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops everything after the cursor, then appends and moves to the new tail.
    pub fn append(&mut self, version: ImageVersion) -> usize {
        if !self.versions.is_empty() {
            let discarded = self.versions.len() - (self.cursor + 1);
            if discarded > 0 {
                tracing::debug!(discarded, cursor = self.cursor, "branch cut");
            }
            self.versions.truncate(self.cursor + 1);
        }
        self.versions.push(version);
        self.cursor = self.versions.len() - 1;
        self.cursor
    }

    pub fn undo(&mut self) -> HistoryResult<usize> {
        if !self.can_undo() {
            return Err(HistoryError::NothingToUndo);
        }
        self.cursor -= 1;
        Ok(self.cursor)
    }

    pub fn redo(&mut self) -> HistoryResult<usize> {
        if !self.can_redo() {
            return Err(HistoryError::NothingToRedo);
        }
        self.cursor += 1;
        Ok(self.cursor)
    }

    pub fn reset(&mut self, version: ImageVersion) {
        self.versions.clear();
        self.versions.push(version);
        self.cursor = 0;
    }

    pub fn current(&self) -> Option<&ImageVersion> {
        self.versions.get(self.cursor)
    }

    pub fn original(&self) -> Option<&ImageVersion> {
        self.versions.first()
    }

    pub fn cursor(&self) -> Option<usize> {
        (!self.versions.is_empty()).then_some(self.cursor)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        !self.versions.is_empty() && self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.versions.len()
    }

    pub fn versions(&self) -> &[ImageVersion] {
        &self.versions
    }
}
