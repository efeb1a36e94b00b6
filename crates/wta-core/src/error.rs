//! Error types for wta-core.
//!
//! This module defines every failure the session engine can report. None of
//! them is fatal: each one either drops the offending unit of data or returns
//! the session to a well-defined prior state.
//!
//! # Recovery Behavior
//!
//! | Error Type | Effect on the session |
//! |------------|-----------------------|
//! | [`Error::TransportUnavailable`] | Scan/connect blocked until the adapter powers on |
//! | [`Error::ConnectionThrottled`] | Connect request dropped; retry after the cooldown |
//! | [`Error::ConnectionTimeout`] | Back to `Disconnected`, scanning restarts |
//! | [`Error::ConnectionFailed`] | Back to `Disconnected`, scanning restarts |
//! | [`Error::Parse`] | Offending record dropped, prior state kept |
//! | [`Error::DuplicateHistoryEntry`] | Entry rejected, store unchanged |
//! | [`Error::ExportTimeout`] | Export forced to completion, no retry |
//! | [`Error::NotConnected`] | Command dropped |
//! | [`Error::InvalidSetpoint`] | Command dropped, nothing written |
//! | [`Error::CharacteristicNotFound`] | Link dropped, scanning restarts |
//!
//! Nothing is retried automatically except the rescan that follows an
//! unexpected disconnect.

use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use wta_types::{ParseError, PeerId};

/// Errors that can occur when talking to a WTA controller.
///
/// The type is `Clone` so that it can travel inside broadcast
/// [`SessionEvent`](crate::events::SessionEvent)s; transport errors are
/// therefore captured by message.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error reported by the platform stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),

    /// The radio is not ready (no adapter, or adapter powered off).
    #[error("Bluetooth transport unavailable")]
    TransportUnavailable,

    /// A connect request arrived before the cooldown elapsed.
    #[error("Connection attempt throttled, retry in {retry_in:?}")]
    ConnectionThrottled {
        /// Time left until a new attempt is accepted.
        retry_in: Duration,
    },

    /// The connection attempt did not complete in time.
    #[error("Connection attempt timed out after {duration:?}")]
    ConnectionTimeout {
        /// The timeout that elapsed.
        duration: Duration,
    },

    /// The transport reported a failed connection attempt.
    #[error("Connection to {peer} failed: {reason}")]
    ConnectionFailed {
        /// The peer that was targeted.
        peer: PeerId,
        /// Transport supplied reason.
        reason: String,
    },

    /// A command was issued without a ready link.
    #[error("Not connected to controller")]
    NotConnected,

    /// The requested setpoint lies outside the accepted range.
    #[error("Setpoint {value} °C outside accepted range 30-40 °C")]
    InvalidSetpoint {
        /// The rejected value.
        value: f32,
    },

    /// A record could not be decoded.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A history entry with the same second already exists.
    #[error("Duplicate history entry at {timestamp}")]
    DuplicateHistoryEntry {
        /// Timestamp of the rejected entry.
        timestamp: OffsetDateTime,
    },

    /// The history export did not finish in time.
    #[error("History export timed out after {duration:?}")]
    ExportTimeout {
        /// The timeout that elapsed.
        duration: Duration,
    },

    /// Required GATT characteristic not found on the controller.
    #[error("Characteristic not found: {uuid} ({available} characteristics discovered)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of characteristics that were discovered.
        available: usize,
    },

    /// Write operation failed.
    #[error("Write failed to characteristic {uuid}: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The session task has shut down.
    #[error("Session closed")]
    SessionClosed,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a connection timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::ConnectionTimeout { duration }
    }

    /// Create a connection failure for a peer.
    pub fn connection_failed(peer: PeerId, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            peer,
            reason: reason.into(),
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, available: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            available,
        }
    }

    /// Create a write failure error.
    pub fn write_failed(uuid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            uuid: uuid.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the error only concerns a single dropped unit of data.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::DuplicateHistoryEntry { .. })
    }
}

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        Error::Bluetooth(err.to_string())
    }
}

/// Result type alias using wta-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to controller");

        let err = Error::ConnectionThrottled {
            retry_in: Duration::from_secs(3),
        };
        assert!(err.to_string().contains("3s"));

        let err = Error::timeout(Duration::from_secs(10));
        assert!(err.to_string().contains("10s"));

        let err = Error::characteristic_not_found("6e400002", 4);
        assert!(err.to_string().contains("6e400002"));
        assert!(err.to_string().contains("4 characteristics"));

        let err = Error::connection_failed(PeerId::new("AA:BB"), "rejected");
        assert!(err.to_string().contains("AA:BB"));
        assert!(err.to_string().contains("rejected"));
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = ParseError::telemetry("bad line").into();
        assert!(matches!(err, Error::Parse(ParseError::MalformedTelemetry(_))));
        assert_eq!(err.to_string(), "Malformed telemetry: bad line");
        assert!(err.is_data_error());
    }

    #[test]
    fn test_invalid_setpoint_display() {
        let err = Error::InvalidSetpoint { value: 45.0 };
        assert!(err.to_string().contains("45"));
        assert!(!err.is_data_error());
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();

        let err: Error = btleplug::Error::DeviceNotFound.into();
        assert!(matches!(err, Error::Bluetooth(_)));
    }

    #[test]
    fn test_error_is_clone() {
        let err = Error::ExportTimeout {
            duration: Duration::from_secs(60),
        };
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
