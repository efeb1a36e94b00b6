//! Live telemetry decoding.
//!
//! While no history export is running, every notification from the
//! controller carries one or more live readings of the form
//! `chamber×100,external×100,setpoint×100,battery`.
//!
//! # Validation
//!
//! A reading is only accepted when every value lies in its accepted range:
//!
//! | Field | Range |
//! |-------|-------|
//! | Chamber temperature | 0 to 50 °C |
//! | External temperature | -20 to 50 °C |
//! | Setpoint | 30 to 40 °C |
//!
//! Battery is clamped into 0-100 rather than rejected.

use wta_types::{
    CHAMBER_TEMPERATURE_RANGE, EXTERNAL_TEMPERATURE_RANGE, MAX_BATTERY, MeasurementSnapshot,
    ParseError, ParseResult, SETPOINT_RANGE,
};

use crate::commands::{ACTIVATE, REQUEST_HISTORY};

/// Number of comma-separated fields in a live reading.
pub const TELEMETRY_FIELDS: usize = 4;

/// Scale factor applied by the controller to temperatures.
pub const TEMPERATURE_SCALE: f32 = 100.0;

/// Single-token lines the controller sends back as acknowledgements.
pub const CONTROL_MESSAGES: [u32; 2] = [(ACTIVATE - b'0') as u32, (REQUEST_HISTORY - b'0') as u32];

/// Outcome of decoding one telemetry line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Telemetry {
    /// A validated live reading.
    Reading(MeasurementSnapshot),
    /// A benign control acknowledgement, to be ignored.
    Control(u32),
}

/// Decode one telemetry line.
///
/// # Errors
///
/// Returns [`ParseError::MalformedTelemetry`] when the line does not hold
/// exactly four numeric fields, or when a value is out of range. The caller
/// keeps its previous snapshot in that case.
pub fn decode_telemetry(line: &str) -> ParseResult<Telemetry> {
    let tokens: Vec<&str> = line
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();

    if let [token] = tokens.as_slice()
        && let Ok(value) = token.parse::<u32>()
        && CONTROL_MESSAGES.contains(&value)
    {
        return Ok(Telemetry::Control(value));
    }

    if tokens.len() != TELEMETRY_FIELDS {
        return Err(ParseError::telemetry(format!(
            "expected {} fields, got {} in {:?}",
            TELEMETRY_FIELDS,
            tokens.len(),
            line.trim()
        )));
    }

    let mut values = [0f32; TELEMETRY_FIELDS];
    for (slot, token) in values.iter_mut().zip(&tokens) {
        *slot = token
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ParseError::telemetry(format!("non-numeric field {:?}", token)))?;
    }

    let snapshot = MeasurementSnapshot {
        chamber_temperature: values[0] / TEMPERATURE_SCALE,
        external_temperature: values[1] / TEMPERATURE_SCALE,
        setpoint: values[2] / TEMPERATURE_SCALE,
        battery: values[3].clamp(0.0, MAX_BATTERY as f32) as u8,
    };

    check_range("chamber temperature", snapshot.chamber_temperature, &CHAMBER_TEMPERATURE_RANGE)?;
    check_range(
        "external temperature",
        snapshot.external_temperature,
        &EXTERNAL_TEMPERATURE_RANGE,
    )?;
    check_range("setpoint", snapshot.setpoint, &SETPOINT_RANGE)?;

    Ok(Telemetry::Reading(snapshot))
}

fn check_range(
    field: &str,
    value: f32,
    range: &std::ops::RangeInclusive<f32>,
) -> ParseResult<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ParseError::telemetry(format!(
            "{} {:.2} outside {:?}",
            field, value, range
        )))
    }
}

/// Split a notification payload into candidate telemetry lines.
pub fn telemetry_lines(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Every in-range line decodes to the scaled values.
        #[test]
        fn in_range_lines_decode(
            chamber in 0i32..=5000,
            external in -2000i32..=5000,
            setpoint in 3000i32..=4000,
            battery in 0i32..=1000,
        ) {
            let line = format!("{chamber},{external},{setpoint},{battery}");
            let Telemetry::Reading(snapshot) = decode_telemetry(&line).unwrap() else {
                panic!("expected a reading for {line}");
            };
            prop_assert!((snapshot.chamber_temperature - chamber as f32 / 100.0).abs() < 0.001);
            prop_assert!((snapshot.external_temperature - external as f32 / 100.0).abs() < 0.001);
            prop_assert!((snapshot.setpoint - setpoint as f32 / 100.0).abs() < 0.001);
            prop_assert_eq!(snapshot.battery as i32, battery.min(100));
        }

        /// A setpoint outside 30-40 °C is always rejected.
        #[test]
        fn out_of_range_setpoint_rejected(
            setpoint in prop_oneof![0i32..3000, 4001i32..10000],
        ) {
            let line = format!("3250,2510,{setpoint},80");
            prop_assert!(decode_telemetry(&line).is_err());
        }

        /// Decoding arbitrary text never panics.
        #[test]
        fn decode_never_panics(line in ".*") {
            let _ = decode_telemetry(&line);
        }
    }
}
