//! Error types for data parsing in wta-types.

use thiserror::Error;

/// Errors that can occur when decoding records received from a WTA controller.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in wta-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A live telemetry line was malformed or failed range validation.
    #[error("Malformed telemetry: {0}")]
    MalformedTelemetry(String),

    /// A history sub-entry was malformed or carried an invalid calendar date.
    #[error("Malformed history entry: {0}")]
    MalformedHistoryEntry(String),
}

impl ParseError {
    /// Create a malformed telemetry error.
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::MalformedTelemetry(message.into())
    }

    /// Create a malformed history entry error.
    pub fn history(message: impl Into<String>) -> Self {
        Self::MalformedHistoryEntry(message.into())
    }
}

/// Result type alias using wta-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
