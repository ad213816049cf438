//! Translation rows

use chrono::{DateTime, Utc};

/// One cached translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Recognized text, unique across live entries
    pub original_text: String,

    /// Translation of `original_text`
    pub translated_text: String,

    /// Reads since the last write, starting at 1
    pub access_count: u32,

    /// Time of the last read or write
    pub last_accessed: DateTime<Utc>,

    /// Time the key was first stored
    pub created: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a freshly written entry
    pub fn new(original_text: impl Into<String>, translated_text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            original_text: original_text.into(),
            translated_text: translated_text.into(),
            access_count: 1,
            last_accessed: now,
            created: now,
        }
    }

    /// Record a read at `now`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = now;
    }
}

/// Timestamps are stored as unix milliseconds
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}
