//! Platform-agnostic types for WTA chamber controllers.
//!
//! This crate provides the domain values shared by the session engine
//! (wta-core) and any front end built on top of it.
//!
//! # Features
//!
//! - Live measurement snapshots and historical log entries
//! - Peer identifiers and connection states
//! - UUID constants for the controller's GATT service
//! - Error types for record decoding
//!
//! # Example
//!
//! ```
//! use wta_types::{ConnectionState, LogEntry, MeasurementSnapshot};
//!
//! let state = ConnectionState::default();
//! assert_eq!(state, ConnectionState::Disconnected);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    CHAMBER_TEMPERATURE_RANGE, ConnectionState, EXTERNAL_TEMPERATURE_RANGE, LogEntry,
    LogEntryBuilder, MAX_BATTERY, MeasurementSnapshot, PeerId, SETPOINT_RANGE, StatusFlags,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    // --- MeasurementSnapshot tests ---

    #[test]
    fn test_snapshot_in_range() {
        let snapshot = MeasurementSnapshot {
            chamber_temperature: 32.5,
            external_temperature: 25.1,
            setpoint: 33.0,
            battery: 100,
        };
        assert!(snapshot.is_in_range());
    }

    #[test]
    fn test_snapshot_range_boundaries_inclusive() {
        let low = MeasurementSnapshot {
            chamber_temperature: 0.0,
            external_temperature: -20.0,
            setpoint: 30.0,
            battery: 0,
        };
        let high = MeasurementSnapshot {
            chamber_temperature: 50.0,
            external_temperature: 50.0,
            setpoint: 40.0,
            battery: 100,
        };
        assert!(low.is_in_range());
        assert!(high.is_in_range());
    }

    #[test]
    fn test_snapshot_out_of_range() {
        let snapshot = MeasurementSnapshot {
            chamber_temperature: 32.5,
            external_temperature: 25.1,
            setpoint: 41.0,
            battery: 80,
        };
        assert!(!snapshot.is_in_range());
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = MeasurementSnapshot {
            chamber_temperature: 32.5,
            external_temperature: 25.1,
            setpoint: 33.0,
            battery: 87,
        };
        let text = snapshot.to_string();
        assert!(text.contains("32.50"));
        assert!(text.contains("87%"));
    }

    // --- LogEntry tests ---

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::builder()
            .timestamp(datetime!(2024-06-15 14:30:00 UTC))
            .chamber_temperature(32.5)
            .external_temperature(25.1)
            .setpoint(33.0)
            .battery(0.8)
            .flags(StatusFlags {
                primary: Some(1),
                secondary: None,
            })
            .build();

        assert!((entry.chamber_temperature - 32.5).abs() < 0.001);
        assert_eq!(entry.flags.primary, Some(1));
        assert_eq!(entry.timestamp.year(), 2024);
    }

    #[test]
    fn test_dedup_key_truncates_to_second() {
        let a = LogEntry::builder()
            .timestamp(datetime!(2024-06-15 14:30:00.100 UTC))
            .build();
        let b = LogEntry::builder()
            .timestamp(datetime!(2024-06-15 14:30:00.900 UTC))
            .build();
        let c = LogEntry::builder()
            .timestamp(datetime!(2024-06-15 14:30:01 UTC))
            .build();

        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_dedup_key_ignores_offset_representation() {
        let utc = LogEntry::builder()
            .timestamp(datetime!(2024-06-15 12:00:00 UTC))
            .build();
        let cest = LogEntry::builder()
            .timestamp(datetime!(2024-06-15 14:00:00 +2))
            .build();
        assert_eq!(utc.dedup_key(), cest.dedup_key());
    }

    // --- PeerId / ConnectionState tests ---

    #[test]
    fn test_peer_id_display_and_conversions() {
        let from_str: PeerId = "AA:BB:CC:DD:EE:FF".into();
        let from_string: PeerId = String::from("AA:BB:CC:DD:EE:FF").into();
        assert_eq!(from_str, from_string);
        assert_eq!(from_str.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(from_str.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_connection_state_default_and_display() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
    }

    // --- ParseError tests ---

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::telemetry("expected 4 fields, got 3");
        assert_eq!(
            err.to_string(),
            "Malformed telemetry: expected 4 fields, got 3"
        );

        let err = ParseError::history("invalid date");
        assert_eq!(err.to_string(), "Malformed history entry: invalid date");
    }

    // --- Serialization tests ---

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = MeasurementSnapshot {
            chamber_temperature: 32.5,
            external_temperature: 25.1,
            setpoint: 33.0,
            battery: 87,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"battery\":87"));
        assert!(json.contains("\"setpoint\":33.0"));
    }

    #[test]
    fn test_connection_state_serialization() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connecting).unwrap(),
            "\"connecting\""
        );
    }

    #[test]
    fn test_peer_id_serializes_transparently() {
        let peer = PeerId::new("peer-1");
        assert_eq!(serde_json::to_string(&peer).unwrap(), "\"peer-1\"");
    }
}
