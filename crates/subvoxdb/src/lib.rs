//! # subvoxdb
//!
//! Embedded translation table for Subvox.
//!
//! ## Layout
//! - One SQLite table keyed by the recognized (original) text
//! - Columns: translated text, access count, last access, creation time
//! - Older single-timestamp tables are upgraded in place, rows preserved

#![warn(missing_docs)]

mod entry;
mod error;
mod schema;
mod storage;

pub use entry::CacheEntry;
pub use error::{Error, Result};
pub use schema::SCHEMA_VERSION;
pub use storage::TranslationDb;
