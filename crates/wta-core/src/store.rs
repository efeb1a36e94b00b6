//! In-memory history store.
//!
//! Entries are keyed by their timestamp truncated to the second, so the
//! store can never hold two entries for the same second and always iterates
//! in ascending time order. The display view is computed from the full set
//! on every call and is never stored separately.

use std::collections::BTreeMap;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::debug;
use wta_types::LogEntry;

use crate::error::{Error, Result};

/// Default display window (48 hours).
pub const DEFAULT_DISPLAY_WINDOW: Duration = Duration::from_secs(48 * 60 * 60);

/// Deduplicated, time-ordered set of history entries.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: BTreeMap<i64, LogEntry>,
    display_window: time::Duration,
    revision: u64,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_WINDOW)
    }
}

impl HistoryStore {
    /// Create an empty store with the given display window.
    pub fn new(display_window: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            display_window: time::Duration::try_from(display_window)
                .unwrap_or(time::Duration::MAX),
            revision: 0,
        }
    }

    /// Insert an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHistoryEntry`] if an entry for the same
    /// second is already stored. The stored entry is kept unchanged.
    pub fn add_entry(&mut self, entry: LogEntry) -> Result<()> {
        let key = entry.dedup_key();
        if self.entries.contains_key(&key) {
            debug!(timestamp = %entry.timestamp, "Rejecting duplicate history entry");
            return Err(Error::DuplicateHistoryEntry {
                timestamp: entry.timestamp,
            });
        }
        self.entries.insert(key, entry);
        self.revision += 1;
        Ok(())
    }

    /// All entries, ascending by timestamp.
    pub fn all_entries(&self) -> Vec<LogEntry> {
        self.entries.values().cloned().collect()
    }

    /// Iterate over all entries in ascending order without cloning.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.entries.values()
    }

    /// Entries newer than `now` minus the display window, newest first.
    pub fn display_entries(&self, now: OffsetDateTime) -> Vec<LogEntry> {
        display_projection(self.entries.values(), now, self.display_window)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.revision += 1;
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The configured display window.
    pub fn display_window(&self) -> time::Duration {
        self.display_window
    }
}

/// Filter ascending entries to those newer than `now - window`, newest first.
pub fn display_projection<'a>(
    entries: impl DoubleEndedIterator<Item = &'a LogEntry>,
    now: OffsetDateTime,
    window: time::Duration,
) -> Vec<LogEntry> {
    let cutoff = now.checked_sub(window);
    entries
        .rev()
        .filter(|entry| cutoff.is_none_or(|cutoff| entry.timestamp > cutoff))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn entry(timestamp: OffsetDateTime, chamber: f32) -> LogEntry {
        LogEntry::builder()
            .timestamp(timestamp)
            .chamber_temperature(chamber)
            .build()
    }

    #[test]
    fn test_add_and_order() {
        let mut store = HistoryStore::default();
        store.add_entry(entry(datetime!(2024-06-15 14:30:10 UTC), 2.0)).unwrap();
        store.add_entry(entry(datetime!(2024-06-15 14:30:00 UTC), 1.0)).unwrap();
        store.add_entry(entry(datetime!(2024-06-15 14:30:20 UTC), 3.0)).unwrap();

        let all = store.all_entries();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_duplicate_rejected_first_wins() {
        let mut store = HistoryStore::default();
        store.add_entry(entry(datetime!(2024-06-15 14:30:00 UTC), 1.0)).unwrap();
        let revision = store.revision();

        let err = store
            .add_entry(entry(datetime!(2024-06-15 14:30:00.500 UTC), 9.0))
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateHistoryEntry { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.revision(), revision);
        assert!((store.all_entries()[0].chamber_temperature - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_display_window_and_order() {
        let now = datetime!(2024-06-17 12:00:00 UTC);
        let mut store = HistoryStore::default();
        store.add_entry(entry(datetime!(2024-06-14 12:00:00 UTC), 1.0)).unwrap();
        store.add_entry(entry(datetime!(2024-06-15 12:00:00 UTC), 2.0)).unwrap();
        store.add_entry(entry(datetime!(2024-06-15 12:00:01 UTC), 3.0)).unwrap();
        store.add_entry(entry(datetime!(2024-06-17 11:00:00 UTC), 4.0)).unwrap();

        let display = store.display_entries(now);

        // exactly 48 h old is excluded
        assert_eq!(display.len(), 2);
        assert_eq!(display[0].timestamp, datetime!(2024-06-17 11:00:00 UTC));
        assert_eq!(display[1].timestamp, datetime!(2024-06-15 12:00:01 UTC));
        // full set untouched
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_custom_display_window() {
        let now = datetime!(2024-06-17 12:00:00 UTC);
        let mut store = HistoryStore::new(Duration::from_secs(3600));
        store.add_entry(entry(datetime!(2024-06-17 10:00:00 UTC), 1.0)).unwrap();
        store.add_entry(entry(datetime!(2024-06-17 11:30:00 UTC), 2.0)).unwrap();

        assert_eq!(store.display_entries(now).len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut store = HistoryStore::default();
        store.add_entry(entry(datetime!(2024-06-15 14:30:00 UTC), 1.0)).unwrap();
        store.clear();

        assert!(store.is_empty());
        assert!(store.all_entries().is_empty());
        assert!(store.display_entries(datetime!(2024-06-15 15:00:00 UTC)).is_empty());
        // previously duplicate entry is accepted again
        store.add_entry(entry(datetime!(2024-06-15 14:30:00 UTC), 1.0)).unwrap();
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const BASE: i64 = 1_718_400_000;

    fn entry_at(offset_secs: i64) -> LogEntry {
        LogEntry::builder()
            .timestamp(OffsetDateTime::from_unix_timestamp(BASE + offset_secs).unwrap())
            .build()
    }

    proptest! {
        /// The full set is ascending and duplicate-free whatever the insertion order.
        #[test]
        fn all_entries_sorted_and_unique(offsets in proptest::collection::vec(0i64..500_000, 0..60)) {
            let mut store = HistoryStore::default();
            for offset in &offsets {
                let _ = store.add_entry(entry_at(*offset));
            }

            let all = store.all_entries();
            prop_assert!(all.windows(2).all(|w| w[0].dedup_key() < w[1].dedup_key()));

            let mut unique = offsets.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(all.len(), unique.len());
        }

        /// Adding the same entry twice leaves the count unchanged.
        #[test]
        fn add_is_idempotent(offset in 0i64..500_000) {
            let mut store = HistoryStore::default();
            store.add_entry(entry_at(offset)).unwrap();
            prop_assert!(store.add_entry(entry_at(offset)).is_err());
            prop_assert_eq!(store.len(), 1);
        }

        /// The display view is a descending projection within the window.
        #[test]
        fn display_is_windowed_and_descending(
            offsets in proptest::collection::vec(0i64..500_000, 0..60),
            now_offset in 0i64..600_000,
        ) {
            let mut store = HistoryStore::default();
            for offset in &offsets {
                let _ = store.add_entry(entry_at(*offset));
            }
            let now = OffsetDateTime::from_unix_timestamp(BASE + now_offset).unwrap();
            let cutoff = now - time::Duration::hours(48);

            let display = store.display_entries(now);
            prop_assert!(display.iter().all(|e| e.timestamp > cutoff));
            prop_assert!(display.windows(2).all(|w| w[0].timestamp > w[1].timestamp));

            let expected = store.iter().filter(|e| e.timestamp > cutoff).count();
            prop_assert_eq!(display.len(), expected);
        }
    }
}
