//! Error types for the geotiles library.

use geotiles_decode::{ContentKind, DecodeError};
use thiserror::Error;

/// Result type for geotiles operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, selecting or processing tiles.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed tileset document or payload container.
    #[error("malformed content at {uri}: {reason}")]
    Format { uri: String, reason: String },

    /// Content whose type cannot be rendered or followed.
    #[error("unsupported content at {uri} ({kind})")]
    UnsupportedFormat { uri: String, kind: String },

    /// Failed to fetch a document or payload.
    #[error("failed to fetch {uri}: {reason}")]
    Transport { uri: String, reason: String },

    /// Masking or trimming failed on one object.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// Payload decoding failed.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Dataset endpoint resolution failed.
    #[error("endpoint error: {0}")]
    Endpoint(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn format(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Format {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn transport(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unsupported(uri: impl Into<String>, kind: Option<ContentKind>) -> Self {
        Self::UnsupportedFormat {
            uri: uri.into(),
            kind: kind.map_or_else(|| "unknown".to_string(), |k| k.to_string()),
        }
    }

    /// Whether the error can be contained to the subtree or tile that caused
    /// it, letting traversal continue with its siblings.
    #[must_use]
    pub fn is_subtree_local(&self) -> bool {
        matches!(
            self,
            Self::Format { .. } | Self::UnsupportedFormat { .. } | Self::Decode(_)
        )
    }
}
