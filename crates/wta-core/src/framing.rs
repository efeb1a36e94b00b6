//! Reassembly of delimiter-terminated records from notification fragments.
//!
//! The controller streams its history log as ASCII text split across BLE
//! notifications at arbitrary byte boundaries. Records are terminated by
//! CR+LF; inside a record, several log entries may be bundled and separated
//! by a bare CR. A record consisting solely of `f` marks the end of the
//! transfer.

use tracing::debug;

/// Record separator.
pub const RECORD_SEPARATOR: &str = "\r\n";

/// Separator between log entries bundled in one record.
pub const ENTRY_SEPARATOR: char = '\r';

/// Content of the record that terminates a history transfer.
pub const END_OF_HISTORY: &str = "f";

/// A complete record emitted by the [`FrameBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A data record, possibly bundling several log entries.
    Data(String),
    /// The end-of-history sentinel.
    EndOfHistory,
}

impl Record {
    fn classify(segment: &str) -> Option<Self> {
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed == END_OF_HISTORY {
            Some(Record::EndOfHistory)
        } else {
            Some(Record::Data(segment.to_string()))
        }
    }

    /// The log entries bundled in this record, blank ones skipped.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        let text = match self {
            Record::Data(text) => text.as_str(),
            Record::EndOfHistory => "",
        };
        text.split(ENTRY_SEPARATOR)
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
    }
}

/// Accumulates text fragments and yields complete records in arrival order.
#[derive(Debug, Default, Clone)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    /// Create an empty frame buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every record it completed.
    ///
    /// The trailing, not yet terminated part of the buffer is kept for the
    /// next call. Whitespace-only segments are dropped.
    pub fn push(&mut self, fragment: &str) -> Vec<Record> {
        self.pending.push_str(fragment);

        let Some(last_separator) = self.pending.rfind(RECORD_SEPARATOR) else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_separator + RECORD_SEPARATOR.len());
        let complete = std::mem::replace(&mut self.pending, rest);

        let records: Vec<Record> = complete
            .split(RECORD_SEPARATOR)
            .filter_map(Record::classify)
            .collect();

        debug!(
            records = records.len(),
            pending = self.pending.len(),
            "Reassembled fragment"
        );
        records
    }

    /// Bytes received but not yet terminated.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Whether a partial record is waiting for more data.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discard any partial record.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_record() {
        let mut buffer = FrameBuffer::new();
        let records = buffer.push("3250,2510,80,3300,15,06,24,14,30,00,1\r\n");

        assert_eq!(records.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_record_split_across_fragments() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push("3250,2510,80,33").is_empty());
        assert!(buffer.push("00,15,06,24,14,30,00,1\r").is_empty());
        let records = buffer.push("\n3260,");

        assert_eq!(
            records,
            vec![Record::Data(
                "3250,2510,80,3300,15,06,24,14,30,00,1".to_string()
            )]
        );
        assert_eq!(buffer.pending(), "3260,");
    }

    #[test]
    fn test_multiple_records_in_order() {
        let mut buffer = FrameBuffer::new();
        let records = buffer.push("a\r\nb\r\nc");

        assert_eq!(
            records,
            vec![Record::Data("a".to_string()), Record::Data("b".to_string())]
        );
        assert_eq!(buffer.pending(), "c");
    }

    #[test]
    fn test_blank_segments_dropped() {
        let mut buffer = FrameBuffer::new();
        let records = buffer.push("\r\n  \r\nx\r\n\r\n");
        assert_eq!(records, vec![Record::Data("x".to_string())]);
    }

    #[test]
    fn test_sentinel_record() {
        let mut buffer = FrameBuffer::new();
        let records = buffer.push("f\r\n");
        assert_eq!(records, vec![Record::EndOfHistory]);
    }

    #[test]
    fn test_sentinel_needs_whole_record() {
        let mut buffer = FrameBuffer::new();
        let records = buffer.push("fx\r\n");
        assert_eq!(records, vec![Record::Data("fx".to_string())]);
    }

    #[test]
    fn test_bundled_entries() {
        let record = Record::Data("one\rtwo\r\r three ".to_string());
        let entries: Vec<&str> = record.entries().collect();
        assert_eq!(entries, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_sentinel_has_no_entries() {
        assert_eq!(Record::EndOfHistory.entries().count(), 0);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut buffer = FrameBuffer::new();
        buffer.push("partial");
        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.push("\r\n"), Vec::new());
    }

    #[test]
    fn test_separator_split_between_cr_and_lf() {
        let mut buffer = FrameBuffer::new();
        let first = buffer.push("a\rb\r");
        assert!(first.is_empty());
        let second = buffer.push("\n");
        assert_eq!(second, vec![Record::Data("a\rb".to_string())]);
    }
}
