//! Table layout and in-place upgrades
//!
//! Current layout (`PRAGMA user_version = 2`):
//! ```text
//! translations(
//!     original_text   TEXT PRIMARY KEY,
//!     translated_text TEXT NOT NULL,
//!     access_count    INTEGER NOT NULL DEFAULT 1,
//!     last_accessed   INTEGER NOT NULL,     -- unix millis
//!     created         INTEGER NOT NULL      -- unix millis
//! )
//! ```
//!
//! Version 1 tables carry only `id`, `original_text UNIQUE`, `translated_text`
//! and a `timestamp DATETIME`. They are upgraded by adding the missing columns;
//! existing rows are kept.

use rusqlite::{Connection, Transaction};

use crate::error::{Error, Result};

/// Schema version written to `PRAGMA user_version`
pub const SCHEMA_VERSION: i32 = 2;

const TABLE: &str = "translations";

/// Bring the database up to [`SCHEMA_VERSION`]
pub(crate) fn migrate(conn: &mut Connection, now_ms: i64) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version == SCHEMA_VERSION {
        return Ok(());
    }
    if version > SCHEMA_VERSION {
        return Err(Error::Corrupt(format!(
            "schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    let tx = conn.transaction()?;
    if table_exists(&tx)? {
        upgrade_legacy(&tx, now_ms)?;
    } else {
        create_tables(&tx)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn create_tables(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE translations (
            original_text   TEXT PRIMARY KEY,
            translated_text TEXT NOT NULL,
            access_count    INTEGER NOT NULL DEFAULT 1,
            last_accessed   INTEGER NOT NULL,
            created         INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_translations_rank
            ON translations(access_count DESC, last_accessed DESC);
        "#,
    )?;
    Ok(())
}

/// Add whatever columns an older table lacks
fn upgrade_legacy(tx: &Transaction<'_>, now_ms: i64) -> Result<()> {
    let columns = table_columns(tx)?;
    let has = |name: &str| columns.iter().any(|c| c == name);

    if !has("original_text") || !has("translated_text") {
        return Err(Error::Corrupt(format!(
            "table {} lacks original_text/translated_text columns",
            TABLE
        )));
    }

    if !has("access_count") {
        tx.execute_batch(
            "ALTER TABLE translations ADD COLUMN access_count INTEGER NOT NULL DEFAULT 1;",
        )?;
    }

    if !has("last_accessed") {
        tx.execute_batch(
            "ALTER TABLE translations ADD COLUMN last_accessed INTEGER NOT NULL DEFAULT 0;",
        )?;
        tx.execute("UPDATE translations SET last_accessed = ?1", [now_ms])?;
    }

    if !has("created") {
        tx.execute_batch("ALTER TABLE translations ADD COLUMN created INTEGER NOT NULL DEFAULT 0;")?;
        if has("timestamp") {
            // CURRENT_TIMESTAMP text, e.g. "2024-03-01 12:00:00"
            tx.execute(
                "UPDATE translations SET created = COALESCE(CAST(strftime('%s', timestamp) AS INTEGER) * 1000, ?1)",
                [now_ms],
            )?;
        } else {
            tx.execute("UPDATE translations SET created = ?1", [now_ms])?;
        }
    }

    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_translations_rank
            ON translations(access_count DESC, last_accessed DESC);",
    )?;

    Ok(())
}

fn table_exists(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [TABLE],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn table_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([TABLE], |row| row.get::<_, String>(0))?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}
