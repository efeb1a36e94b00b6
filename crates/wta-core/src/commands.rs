//! BLE command encoding for WTA controllers.
//!
//! Outgoing commands are short ASCII payloads written to the controller's
//! write characteristic.

use bytes::Bytes;
use wta_types::SETPOINT_RANGE;

use crate::error::{Error, Result};

/// Activation pulse. The controller only applies a new setpoint after it
/// receives this byte, and it also starts live telemetry after subscription.
/// Format: `[ACTIVATE]`
pub const ACTIVATE: u8 = 0x33;

/// History export request.
/// Format: `[REQUEST_HISTORY]`
pub const REQUEST_HISTORY: u8 = 0x35;

/// Setpoint command prefix.
/// Format: ASCII `s<int>` where `<int>` is the setpoint in °C × 10.
pub const SET_SETPOINT: u8 = b's';

/// A command ready to be written to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Change the target chamber temperature (°C).
    SetSetpoint(f32),
    /// Send the activation pulse.
    Activate,
    /// Ask the controller to stream its history log.
    RequestHistory,
}

impl Command {
    /// Encode the command into its wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSetpoint`] if a setpoint lies outside 30-40 °C.
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Command::SetSetpoint(value) => encode_setpoint(*value),
            Command::Activate => Ok(Bytes::from_static(&[ACTIVATE])),
            Command::RequestHistory => Ok(Bytes::from_static(&[REQUEST_HISTORY])),
        }
    }
}

/// Validate a setpoint against the accepted range.
pub fn validate_setpoint(value: f32) -> Result<()> {
    if value.is_finite() && SETPOINT_RANGE.contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidSetpoint { value })
    }
}

/// Encode a setpoint command (`s` followed by tenths of a degree).
pub fn encode_setpoint(value: f32) -> Result<Bytes> {
    validate_setpoint(value)?;
    let tenths = (value * 10.0).round() as i32;
    let mut payload = Vec::with_capacity(4);
    payload.push(SET_SETPOINT);
    payload.extend_from_slice(tenths.to_string().as_bytes());
    Ok(Bytes::from(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_values() {
        assert_eq!(ACTIVATE, 0x33);
        assert_eq!(REQUEST_HISTORY, 0x35);
        assert_eq!(SET_SETPOINT, b's');
    }

    #[test]
    fn test_encode_setpoint() {
        assert_eq!(encode_setpoint(35.0).unwrap().as_ref(), b"s350");
        assert_eq!(encode_setpoint(37.5).unwrap().as_ref(), b"s375");
        assert_eq!(encode_setpoint(30.0).unwrap().as_ref(), b"s300");
        assert_eq!(encode_setpoint(40.0).unwrap().as_ref(), b"s400");
    }

    #[test]
    fn test_encode_setpoint_rounds_to_tenths() {
        assert_eq!(encode_setpoint(36.66).unwrap().as_ref(), b"s367");
    }

    #[test]
    fn test_encode_setpoint_out_of_range() {
        assert!(matches!(
            encode_setpoint(29.9),
            Err(Error::InvalidSetpoint { .. })
        ));
        assert!(matches!(
            encode_setpoint(40.1),
            Err(Error::InvalidSetpoint { .. })
        ));
        assert!(encode_setpoint(f32::NAN).is_err());
    }

    #[test]
    fn test_single_byte_commands() {
        assert_eq!(Command::Activate.encode().unwrap().as_ref(), &[0x33]);
        assert_eq!(Command::RequestHistory.encode().unwrap().as_ref(), &[0x35]);
        assert_ne!(
            Command::Activate.encode().unwrap(),
            Command::RequestHistory.encode().unwrap()
        );
    }
}
