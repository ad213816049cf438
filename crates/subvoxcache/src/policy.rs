//! Frequency + recency eviction policy
//!
//! One pass, two rules:
//! 1. Age: drop entries idle longer than `stale_after` with fewer than
//!    `min_hits_when_stale` accesses, and every entry idle longer than `expire_after`.
//! 2. Rank: of the rest keep the top `max_entries` by
//!    (access_count desc, last_accessed desc, original_text asc).

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use subvoxdb::CacheEntry;

/// Maximum number of live entries after an eviction pass
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Completed lookups between automatic eviction passes
pub const DEFAULT_EVICT_EVERY: u32 = 50;

/// Tunable eviction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Live entries kept by the rank rule
    pub max_entries: usize,

    /// Idle time after which rarely used entries are dropped
    pub stale_after: Duration,

    /// Access count an idle entry needs to survive `stale_after`
    pub min_hits_when_stale: u32,

    /// Idle time after which every entry is dropped
    pub expire_after: Duration,

    /// Lookups between automatic passes
    pub evict_every: u32,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            stale_after: Duration::days(1),
            min_hits_when_stale: 3,
            expire_after: Duration::days(7),
            evict_every: DEFAULT_EVICT_EVERY,
        }
    }
}

impl EvictionPolicy {
    /// Check whether the age rule removes `entry` at `now`
    pub fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let idle_since = entry.last_accessed;
        idle_since < now - self.expire_after
            || (idle_since < now - self.stale_after && entry.access_count < self.min_hits_when_stale)
    }

    /// Pick the keys to delete from `entries` at `now`
    pub fn select_victims<'a, I>(&self, entries: I, now: DateTime<Utc>) -> Vec<String>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        let mut victims = Vec::new();
        let mut survivors = Vec::new();

        for entry in entries {
            if self.is_expired(entry, now) {
                victims.push(entry.original_text.clone());
            } else {
                survivors.push(entry);
            }
        }

        if survivors.len() > self.max_entries {
            survivors.sort_by(|a, b| rank(a, b));
            victims.extend(
                survivors
                    .drain(self.max_entries..)
                    .map(|entry| entry.original_text.clone()),
            );
        }

        victims
    }
}

/// Eviction score ordering, best first
pub fn rank(a: &CacheEntry, b: &CacheEntry) -> Ordering {
    b.access_count
        .cmp(&a.access_count)
        .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        .then_with(|| a.original_text.cmp(&b.original_text))
}
