//! Core types for WTA controller data.

use core::fmt;
use core::ops::RangeInclusive;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Accepted chamber temperature range in °C for live telemetry.
pub const CHAMBER_TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=50.0;

/// Accepted external temperature range in °C for live telemetry.
pub const EXTERNAL_TEMPERATURE_RANGE: RangeInclusive<f32> = -20.0..=50.0;

/// Accepted setpoint range in °C, both for telemetry and for outgoing commands.
pub const SETPOINT_RANGE: RangeInclusive<f32> = 30.0..=40.0;

/// Maximum battery level in percent.
pub const MAX_BATTERY: u8 = 100;

/// Identifier of a peripheral as reported by the transport.
///
/// On Linux/Windows this is typically the Bluetooth MAC address, on macOS
/// the CoreBluetooth UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Connection lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionState {
    /// No peripheral is targeted.
    #[default]
    Disconnected,
    /// A connect request is pending on the transport.
    Connecting,
    /// The link is up (characteristics may still be under discovery).
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// A validated live reading from the controller.
///
/// Each new valid telemetry line supersedes the previous snapshot wholesale.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeasurementSnapshot {
    /// Chamber temperature in °C.
    pub chamber_temperature: f32,
    /// External (ambient) temperature in °C.
    pub external_temperature: f32,
    /// Target chamber temperature in °C.
    pub setpoint: f32,
    /// Battery level percentage (0-100).
    pub battery: u8,
}

impl MeasurementSnapshot {
    /// Whether every field lies inside its accepted range.
    #[must_use]
    pub fn is_in_range(&self) -> bool {
        CHAMBER_TEMPERATURE_RANGE.contains(&self.chamber_temperature)
            && EXTERNAL_TEMPERATURE_RANGE.contains(&self.external_temperature)
            && SETPOINT_RANGE.contains(&self.setpoint)
            && self.battery <= MAX_BATTERY
    }
}

impl fmt::Display for MeasurementSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chamber {:.2} °C, external {:.2} °C, setpoint {:.1} °C, battery {}%",
            self.chamber_temperature, self.external_temperature, self.setpoint, self.battery
        )
    }
}

/// Device-reported status bits attached to a history entry.
///
/// The controller currently reports one flag per entry; a second one is
/// accepted when present. Neither is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusFlags {
    pub primary: Option<i32>,
    pub secondary: Option<i32>,
}

/// One historical sample downloaded from the controller log.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogEntry {
    /// Sample time (device local calendar time).
    pub timestamp: OffsetDateTime,
    /// Chamber temperature in °C.
    pub chamber_temperature: f32,
    /// External temperature in °C.
    pub external_temperature: f32,
    /// Setpoint in °C at sample time.
    pub setpoint: f32,
    /// Battery level in percent.
    pub battery: f32,
    /// Raw status flags.
    #[cfg_attr(feature = "serde", serde(default))]
    pub flags: StatusFlags,
}

impl Default for LogEntry {
    fn default() -> Self {
        Self {
            timestamp: OffsetDateTime::UNIX_EPOCH,
            chamber_temperature: 0.0,
            external_temperature: 0.0,
            setpoint: 0.0,
            battery: 0.0,
            flags: StatusFlags::default(),
        }
    }
}

impl LogEntry {
    /// Identity used for deduplication: the timestamp truncated to the second.
    #[must_use]
    pub fn dedup_key(&self) -> i64 {
        self.timestamp.unix_timestamp()
    }

    /// Create a builder for constructing a `LogEntry`.
    pub fn builder() -> LogEntryBuilder {
        LogEntryBuilder::default()
    }
}

/// Builder for constructing `LogEntry` values.
#[derive(Debug, Default)]
#[must_use]
pub struct LogEntryBuilder {
    entry: LogEntry,
}

impl LogEntryBuilder {
    /// Set the timestamp.
    pub fn timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.entry.timestamp = timestamp;
        self
    }

    /// Set the chamber temperature.
    pub fn chamber_temperature(mut self, temp: f32) -> Self {
        self.entry.chamber_temperature = temp;
        self
    }

    /// Set the external temperature.
    pub fn external_temperature(mut self, temp: f32) -> Self {
        self.entry.external_temperature = temp;
        self
    }

    /// Set the setpoint.
    pub fn setpoint(mut self, setpoint: f32) -> Self {
        self.entry.setpoint = setpoint;
        self
    }

    /// Set the battery level.
    pub fn battery(mut self, battery: f32) -> Self {
        self.entry.battery = battery;
        self
    }

    /// Set the status flags.
    pub fn flags(mut self, flags: StatusFlags) -> Self {
        self.entry.flags = flags;
        self
    }

    /// Build the `LogEntry`.
    #[must_use]
    pub fn build(self) -> LogEntry {
        self.entry
    }
}
