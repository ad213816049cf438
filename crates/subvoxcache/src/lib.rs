//! # subvoxcache
//!
//! Translation cache layer for Subvox.
//!
//! ## Architecture
//! - **HashMap**: AHash index of every live translation (O(1) lookups)
//! - **Write-through**: each mutation lands in `subvoxdb` before memory
//! - **Eviction**: periodic frequency + recency pass, bounded to `max_entries`

#![warn(missing_docs)]

mod cache;
mod policy;
mod stats;

pub use cache::TranslationCache;
pub use policy::{rank, EvictionPolicy, DEFAULT_EVICT_EVERY, DEFAULT_MAX_ENTRIES};
pub use stats::CacheStats;
