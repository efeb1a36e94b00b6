//! History log decoding.
//!
//! The controller streams its log as records reassembled by the
//! [`FrameBuffer`](crate::framing::FrameBuffer). Each record bundles one or
//! more entries of the form:
//!
//! ```text
//! chamber×100,external×100,battery×100,setpoint×100,DD,MM,YY,HH,MM,SS,flag[,flag]
//! ```
//!
//! The timestamp carries no zone. It is interpreted in the device's local
//! time, which the caller passes as a [`UtcOffset`]. Two-digit years map to
//! `2000 + YY`.
//!
//! A malformed entry only fails itself: the remaining entries of the record
//! still decode.

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tracing::warn;
use wta_types::{LogEntry, ParseError, ParseResult, StatusFlags};

use crate::framing::Record;

/// Minimum number of fields in a history entry.
pub const MIN_HISTORY_FIELDS: usize = 11;

/// Scale factor for temperature, setpoint and battery fields.
pub const HISTORY_SCALE: f32 = 100.0;

/// Base added to the two-digit year.
pub const YEAR_BASE: i32 = 2000;

/// Decode a single history entry.
///
/// # Errors
///
/// Returns [`ParseError::MalformedHistoryEntry`] if fewer than 11 fields are
/// present, a field is not numeric, or the date-time does not exist.
pub fn decode_entry(entry: &str, offset: UtcOffset) -> ParseResult<LogEntry> {
    let fields: Vec<&str> = entry
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .collect();

    if fields.len() < MIN_HISTORY_FIELDS {
        return Err(ParseError::history(format!(
            "expected at least {} fields, got {} in {:?}",
            MIN_HISTORY_FIELDS,
            fields.len(),
            entry.trim()
        )));
    }

    let chamber = scaled(fields[0], "chamber temperature")?;
    let external = scaled(fields[1], "external temperature")?;
    let battery = scaled(fields[2], "battery")?;
    let setpoint = scaled(fields[3], "setpoint")?;

    let day: u8 = integer(fields[4], "day")?;
    let month: u8 = integer(fields[5], "month")?;
    let year: u16 = integer(fields[6], "year")?;
    let hour: u8 = integer(fields[7], "hour")?;
    let minute: u8 = integer(fields[8], "minute")?;
    let second: u8 = integer(fields[9], "second")?;

    let flags = StatusFlags {
        primary: Some(integer(fields[10], "flag")?),
        secondary: fields
            .get(11)
            .map(|field| integer(field, "secondary flag"))
            .transpose()?,
    };

    let timestamp = local_timestamp(
        YEAR_BASE + i32::from(year),
        month,
        day,
        hour,
        minute,
        second,
        offset,
    )?;

    Ok(LogEntry {
        timestamp,
        chamber_temperature: chamber,
        external_temperature: external,
        setpoint,
        battery,
        flags,
    })
}

/// Decode every entry bundled in a record.
///
/// Failed entries are logged and returned as errors in place so that the
/// caller can count them; the sentinel yields nothing.
pub fn decode_record(record: &Record, offset: UtcOffset) -> Vec<ParseResult<LogEntry>> {
    record
        .entries()
        .map(|entry| {
            let result = decode_entry(entry, offset);
            if let Err(ref e) = result {
                warn!(entry, error = %e, "Skipping malformed history entry");
            }
            result
        })
        .collect()
}

fn scaled(field: &str, name: &str) -> ParseResult<f32> {
    field
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v / HISTORY_SCALE)
        .ok_or_else(|| ParseError::history(format!("invalid {} {:?}", name, field)))
}

fn integer<T: std::str::FromStr>(field: &str, name: &str) -> ParseResult<T> {
    field
        .parse::<T>()
        .map_err(|_| ParseError::history(format!("invalid {} {:?}", name, field)))
}

fn local_timestamp(
    year: i32,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    offset: UtcOffset,
) -> ParseResult<OffsetDateTime> {
    let month = Month::try_from(month)
        .map_err(|e| ParseError::history(format!("invalid month: {}", e)))?;
    let date = Date::from_calendar_date(year, month, day)
        .map_err(|e| ParseError::history(format!("invalid date: {}", e)))?;
    let time = Time::from_hms(hour, minute, second)
        .map_err(|e| ParseError::history(format!("invalid time: {}", e)))?;
    Ok(PrimitiveDateTime::new(date, time).assume_offset(offset))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Valid entries keep the year offset and the /100 scaling.
        #[test]
        fn valid_entries_decode(
            chamber in -5000i32..10000,
            external in -5000i32..10000,
            battery in 0i32..10000,
            setpoint in 0i32..10000,
            day in 1u8..=28,
            month in 1u8..=12,
            year in 0u8..=99,
            hour in 0u8..24,
            minute in 0u8..60,
            second in 0u8..60,
            flag in 0i32..2,
        ) {
            let line = format!(
                "{chamber},{external},{battery},{setpoint},{day:02},{month:02},{year:02},{hour:02},{minute:02},{second:02},{flag}"
            );
            let entry = decode_entry(&line, UtcOffset::UTC).unwrap();

            prop_assert_eq!(entry.timestamp.year(), 2000 + i32::from(year));
            prop_assert_eq!(u8::from(entry.timestamp.month()), month);
            prop_assert_eq!(entry.timestamp.day(), day);
            prop_assert!((entry.chamber_temperature - chamber as f32 / 100.0).abs() < 0.001);
            prop_assert!((entry.external_temperature - external as f32 / 100.0).abs() < 0.001);
            prop_assert!((entry.battery - battery as f32 / 100.0).abs() < 0.001);
            prop_assert!((entry.setpoint - setpoint as f32 / 100.0).abs() < 0.001);
            prop_assert_eq!(entry.flags.primary, Some(flag));
        }

        /// Decoding arbitrary text never panics.
        #[test]
        fn decode_never_panics(line in ".*") {
            let _ = decode_entry(&line, UtcOffset::UTC);
        }
    }
}
