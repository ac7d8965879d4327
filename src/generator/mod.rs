//! The external generative image service, seen from the editor.

mod command;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde::Deserialize;
use thiserror::Error;

use crate::geometry::NaturalPoint;

pub use command::CommandGenerator;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("no generator command configured")]
    NotConfigured,
    #[error("failed to run generator command {command}: {source}")]
    CommandIo {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("generator exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("generator timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("generator returned an empty response")]
    EmptyResponse,
    #[error("generator reply is not valid UTF-8")]
    InvalidReply(#[from] std::string::FromUtf8Error),
    #[error("failed to encode conversation: {0}")]
    Conversation(#[from] serde_json::Error),
    #[error("generator worker stopped before replying")]
    WorkerGone,
    #[error("{0}")]
    Rejected(String),
}

pub type GeneratorResult<T> = std::result::Result<T, GeneratorError>;

/// The five image-producing operations the service offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerativeKind {
    Retouch,
    Filter,
    Adjust,
    Background,
    Freestyle,
}

impl GenerativeKind {
    pub const ALL: [GenerativeKind; 5] = [
        Self::Retouch,
        Self::Filter,
        Self::Adjust,
        Self::Background,
        Self::Freestyle,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Retouch => "retouch",
            Self::Filter => "filter",
            Self::Adjust => "adjust",
            Self::Background => "background",
            Self::Freestyle => "freestyle",
        }
    }
}

impl fmt::Display for GenerativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: GenerativeKind,
    pub source: Arc<[u8]>,
    pub instruction: String,
    /// Natural-pixel target, only present for retouch.
    pub hotspot: Option<NaturalPoint>,
}

/// Opaque image service. Every call resolves exactly once.
pub trait ImageGenerator {
    /// Produces a new encoded image from `request.source`.
    fn generate(&self, request: GenerationRequest) -> LocalBoxFuture<'_, GeneratorResult<Vec<u8>>>;

    /// Text-only exchange. The implementation keeps its own conversation.
    fn chat(&self, message: String) -> LocalBoxFuture<'_, GeneratorResult<String>>;
}
