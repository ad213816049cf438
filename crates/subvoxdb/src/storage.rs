//! Storage engine implementation
//!
//! A single SQLite file in WAL mode. One connection, serialized behind a mutex;
//! every write is a single statement or a single transaction.

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use crate::entry::{from_millis, to_millis, CacheEntry};
use crate::error::{Error, Result};
use crate::schema;

/// TranslationDb is the main database handle
pub struct TranslationDb {
    /// Database file, `None` for in-memory databases
    path: Option<PathBuf>,

    /// Connection, taken on close
    conn: Mutex<Option<Connection>>,
}

impl TranslationDb {
    /// Open or create a database file at the given path
    ///
    /// # Arguments
    /// * `path` - Database file; parent directories are created
    ///
    /// # Returns
    /// * `Result<TranslationDb>` - Database handle with an up-to-date schema
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, None)
    }

    fn with_connection(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        schema::migrate(&mut conn, to_millis(Utc::now()))?;

        Ok(TranslationDb {
            path,
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(Error::Closed),
        }
    }

    /// Database file path, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get the entry stored for `original_text`
    pub fn get(&self, original_text: &str) -> Result<Option<CacheEntry>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT original_text, translated_text, access_count, last_accessed, created
                     FROM translations WHERE original_text = ?1",
                    [original_text],
                    read_row,
                )
                .optional()?;

            match row {
                Some(raw) => raw.into_entry().map(Some),
                None => Ok(None),
            }
        })
    }

    /// Load every valid row
    ///
    /// Rows that cannot be represented as a [`CacheEntry`] are logged and
    /// deleted in the same transaction, so they never linger outside the
    /// reach of eviction.
    pub fn load_all(&self) -> Result<Vec<CacheEntry>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut entries = Vec::new();
            let mut unreadable = Vec::new();

            {
                let mut stmt = tx.prepare(
                    "SELECT original_text, translated_text, access_count, last_accessed, created, rowid
                     FROM translations",
                )?;
                let rows = stmt.query_map([], |row| Ok((read_row(row)?, row.get::<_, i64>(5)?)))?;

                for row in rows {
                    let (raw, rowid) = row?;
                    match raw.into_entry() {
                        Ok(entry) => entries.push(entry),
                        Err(e) => {
                            warn!("Dropping translation row {}: {}", rowid, e);
                            unreadable.push(rowid);
                        }
                    }
                }
            }

            if !unreadable.is_empty() {
                let mut delete = tx.prepare("DELETE FROM translations WHERE rowid = ?1")?;
                for rowid in &unreadable {
                    delete.execute(params![rowid])?;
                }
            }

            tx.commit()?;
            Ok(entries)
        })
    }

    /// Insert or replace the row for `entry.original_text`
    pub fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO translations (original_text, translated_text, access_count, last_accessed, created)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(original_text) DO UPDATE SET
                     translated_text = excluded.translated_text,
                     access_count = excluded.access_count,
                     last_accessed = excluded.last_accessed,
                     created = excluded.created",
                params![
                    entry.original_text,
                    entry.translated_text,
                    entry.access_count,
                    to_millis(entry.last_accessed),
                    to_millis(entry.created),
                ],
            )?;
            Ok(())
        })
    }

    /// Persist the read counters of an existing row
    ///
    /// # Returns
    /// * `Result<bool>` - false if the row does not exist
    pub fn touch(&self, entry: &CacheEntry) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE translations SET access_count = ?2, last_accessed = ?3 WHERE original_text = ?1",
                params![
                    entry.original_text,
                    entry.access_count,
                    to_millis(entry.last_accessed),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Delete the given keys in one transaction
    ///
    /// # Returns
    /// * `Result<usize>` - Number of rows removed; nothing is removed on error
    pub fn delete_many(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare_cached("DELETE FROM translations WHERE original_text = ?1")?;
                for key in keys {
                    removed += stmt.execute([key])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    /// Remove every row
    pub fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM translations", [])?;
            Ok(())
        })
    }

    /// Get the number of rows in the table
    pub fn len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM translations", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Check if the database has been closed
    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }

    /// Close the database and checkpoint the WAL
    ///
    /// Closing twice is not an error.
    pub fn close(&self) -> Result<()> {
        let conn = match self.conn.lock().take() {
            Some(conn) => conn,
            None => return Ok(()),
        };

        if self.path.is_some() {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        conn.close().map_err(|(_, e)| Error::Database(e))
    }
}

/// Columns as stored, before validation
struct RawRow {
    original_text: Option<String>,
    translated_text: Option<String>,
    access_count: i64,
    last_accessed: i64,
    created: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        original_text: row.get(0)?,
        translated_text: row.get(1)?,
        access_count: row.get(2)?,
        last_accessed: row.get(3)?,
        created: row.get(4)?,
    })
}

impl RawRow {
    fn into_entry(self) -> Result<CacheEntry> {
        let original_text = self
            .original_text
            .ok_or_else(|| Error::Corrupt("row without original_text".to_string()))?;
        let translated_text = self
            .translated_text
            .ok_or_else(|| Error::Corrupt(format!("no translation for {:?}", original_text)))?;
        let last_accessed = from_millis(self.last_accessed)
            .ok_or_else(|| Error::Corrupt(format!("bad last_accessed for {:?}", original_text)))?;
        let created = from_millis(self.created)
            .ok_or_else(|| Error::Corrupt(format!("bad created for {:?}", original_text)))?;

        Ok(CacheEntry {
            original_text,
            translated_text,
            access_count: self.access_count.clamp(1, u32::MAX as i64) as u32,
            last_accessed,
            created,
        })
    }
}
