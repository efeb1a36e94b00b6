//! Output formatting utilities for text and JSON output.

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use wta_core::{DiscoveredPeer, ExportEnd, ExportSummary, LogEntry, MeasurementSnapshot};

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool, compact: bool) -> Self {
        Self { no_color, compact }
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }
}

fn rfc3339(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.to_string())
}

fn short_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_else(|_| timestamp.to_string())
}

// ============================================================================
// Scan
// ============================================================================

pub fn format_scan_text(peers: &[DiscoveredPeer], opts: &FormatOptions) -> String {
    #[derive(Tabled)]
    struct PeerRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Signal")]
        signal: String,
        #[tabled(rename = "Identifier")]
        identifier: String,
    }

    if peers.is_empty() {
        return "No WTA controllers found.\n".to_string();
    }

    let count = if opts.no_color {
        peers.len().to_string()
    } else {
        peers.len().to_string().green().bold().to_string()
    };

    let rows = peers.iter().map(|p| PeerRow {
        name: p.name.clone().unwrap_or_else(|| "Unknown".to_string()),
        signal: p
            .rssi
            .map_or_else(|| "-".to_string(), |rssi| format!("{} dBm", rssi)),
        identifier: p.peer.to_string(),
    });

    format!(
        "Found {} WTA controller(s)\n\n{}\n",
        count,
        Table::new(rows)
    )
}

pub fn format_scan_json(peers: &[DiscoveredPeer], opts: &FormatOptions) -> Result<String> {
    #[derive(Serialize)]
    struct ScanJson<'a> {
        count: usize,
        controllers: &'a [DiscoveredPeer],
    }

    opts.as_json(&ScanJson {
        count: peers.len(),
        controllers: peers,
    })
}

// ============================================================================
// Live readings
// ============================================================================

/// One line of `watch` output.
pub fn format_measurement_line(
    snapshot: &MeasurementSnapshot,
    at: OffsetDateTime,
    opts: &FormatOptions,
) -> String {
    let chamber = format!("{:.2}°C", snapshot.chamber_temperature);
    let chamber = if opts.no_color {
        chamber
    } else {
        chamber.cyan().bold().to_string()
    };
    format!(
        "[{}] chamber {}  external {:.2}°C  setpoint {:.1}°C  battery {}%\n",
        short_timestamp(at),
        chamber,
        snapshot.external_temperature,
        snapshot.setpoint,
        snapshot.battery
    )
}

#[derive(Serialize)]
struct MeasurementJson<'a> {
    timestamp: String,
    device: &'a str,
    chamber_temperature: f32,
    external_temperature: f32,
    setpoint: f32,
    battery: u8,
}

/// One JSON object per reading, always on a single line.
pub fn format_measurement_json(
    snapshot: &MeasurementSnapshot,
    device: &str,
    at: OffsetDateTime,
) -> Result<String> {
    let json = serde_json::to_string(&MeasurementJson {
        timestamp: rfc3339(at),
        device,
        chamber_temperature: snapshot.chamber_temperature,
        external_temperature: snapshot.external_temperature,
        setpoint: snapshot.setpoint,
        battery: snapshot.battery,
    })?;
    Ok(json + "\n")
}

// ============================================================================
// History
// ============================================================================

pub fn format_history_text(history: &[LogEntry], opts: &FormatOptions) -> String {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Timestamp")]
        timestamp: String,
        #[tabled(rename = "Chamber (C)")]
        chamber: String,
        #[tabled(rename = "External (C)")]
        external: String,
        #[tabled(rename = "Setpoint (C)")]
        setpoint: String,
        #[tabled(rename = "Battery")]
        battery: String,
    }

    if history.is_empty() {
        return "No history entries found.\n".to_string();
    }

    let heading = format!("History ({} entries):", history.len());
    let heading = if opts.no_color {
        heading
    } else {
        heading.bold().to_string()
    };

    let rows = history.iter().map(|entry| HistoryRow {
        timestamp: short_timestamp(entry.timestamp),
        chamber: format!("{:.2}", entry.chamber_temperature),
        external: format!("{:.2}", entry.external_temperature),
        setpoint: format!("{:.2}", entry.setpoint),
        battery: format!("{:.2}", entry.battery),
    });

    format!("{}\n\n{}\n", heading, Table::new(rows))
}

#[derive(Serialize)]
struct HistoryEntryJson {
    timestamp: String,
    chamber_temperature: f32,
    external_temperature: f32,
    setpoint: f32,
    battery: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    flag: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secondary_flag: Option<i32>,
}

impl From<&LogEntry> for HistoryEntryJson {
    fn from(entry: &LogEntry) -> Self {
        Self {
            timestamp: rfc3339(entry.timestamp),
            chamber_temperature: entry.chamber_temperature,
            external_temperature: entry.external_temperature,
            setpoint: entry.setpoint,
            battery: entry.battery,
            flag: entry.flags.primary,
            secondary_flag: entry.flags.secondary,
        }
    }
}

pub fn format_history_json(
    history: &[LogEntry],
    end: ExportEnd,
    summary: &ExportSummary,
    opts: &FormatOptions,
) -> Result<String> {
    #[derive(Serialize)]
    struct HistoryJson<'a> {
        export: ExportEnd,
        summary: &'a ExportSummary,
        count: usize,
        entries: Vec<HistoryEntryJson>,
    }

    opts.as_json(&HistoryJson {
        export: end,
        summary,
        count: history.len(),
        entries: history.iter().map(HistoryEntryJson::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use wta_core::{PeerId, StatusFlags};

    fn plain() -> FormatOptions {
        FormatOptions::new(true, false)
    }

    fn snapshot() -> MeasurementSnapshot {
        MeasurementSnapshot {
            chamber_temperature: 32.5,
            external_temperature: 25.1,
            setpoint: 33.0,
            battery: 80,
        }
    }

    fn entry() -> LogEntry {
        LogEntry::builder()
            .timestamp(datetime!(2024-06-15 14:30:00 UTC))
            .chamber_temperature(32.5)
            .external_temperature(25.1)
            .setpoint(33.0)
            .battery(0.8)
            .flags(StatusFlags {
                primary: Some(1),
                secondary: None,
            })
            .build()
    }

    #[test]
    fn test_scan_text_empty() {
        assert_eq!(format_scan_text(&[], &plain()), "No WTA controllers found.\n");
    }

    #[test]
    fn test_scan_text_lists_peers() {
        let peers = vec![DiscoveredPeer {
            peer: PeerId::new("AA:BB:CC:DD:EE:FF"),
            name: Some("WTA-Chamber".to_string()),
            rssi: Some(-60),
        }];
        let text = format_scan_text(&peers, &plain());
        assert!(text.starts_with("Found 1 WTA controller(s)"));
        assert!(text.contains("WTA-Chamber"));
        assert!(text.contains("-60 dBm"));
        assert!(text.contains("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_scan_json() {
        let peers = vec![DiscoveredPeer {
            peer: PeerId::new("AA:BB"),
            name: None,
            rssi: None,
        }];
        let json = format_scan_json(&peers, &FormatOptions::new(true, true)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["controllers"][0]["peer"], "AA:BB");
        assert!(!json.trim_end().contains('\n'));
    }

    #[test]
    fn test_measurement_line() {
        let line = format_measurement_line(
            &snapshot(),
            datetime!(2024-06-15 14:30:00 UTC),
            &plain(),
        );
        assert_eq!(
            line,
            "[2024-06-15 14:30:00] chamber 32.50°C  external 25.10°C  setpoint 33.0°C  battery 80%\n"
        );
    }

    #[test]
    fn test_measurement_json() {
        let json =
            format_measurement_json(&snapshot(), "AA:BB", datetime!(2024-06-15 14:30:00 UTC))
                .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["timestamp"], "2024-06-15T14:30:00Z");
        assert_eq!(value["device"], "AA:BB");
        assert_eq!(value["battery"], 80);
    }

    #[test]
    fn test_history_text() {
        let text = format_history_text(&[entry()], &plain());
        assert!(text.starts_with("History (1 entries):"));
        assert!(text.contains("2024-06-15 14:30:00"));
        assert!(text.contains("32.50"));
        assert_eq!(format_history_text(&[], &plain()), "No history entries found.\n");
    }

    #[test]
    fn test_history_json() {
        let summary = ExportSummary {
            accepted: 1,
            duplicates: 2,
            malformed: 0,
        };
        let json =
            format_history_json(&[entry()], ExportEnd::Sentinel, &summary, &plain()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["export"], "sentinel");
        assert_eq!(value["summary"]["duplicates"], 2);
        assert_eq!(value["count"], 1);
        assert_eq!(value["entries"][0]["timestamp"], "2024-06-15T14:30:00Z");
        assert_eq!(value["entries"][0]["flag"], 1);
        assert!(value["entries"][0].get("secondary_flag").is_none());
    }
}
