//! Error types for payload decoding.

use thiserror::Error;

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors that can occur while decoding a tile payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The container does not start with the expected 4-byte tag.
    #[error("invalid magic: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        expected: &'static str,
        found: [u8; 4],
    },

    /// A declared length does not agree with the buffer.
    #[error("{what}: declared {declared} bytes, buffer has {actual}")]
    LengthMismatch {
        what: &'static str,
        declared: usize,
        actual: usize,
    },

    /// The buffer ends before a required structure.
    #[error("truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// Structurally invalid glTF content.
    #[error("invalid glTF: {0}")]
    Gltf(String),

    /// Embedded JSON could not be parsed.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
