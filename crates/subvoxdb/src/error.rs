//! Error types for subvoxdb

use std::fmt;
use std::io;

/// Result type alias for subvoxdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for database operations
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// SQLite error
    Database(rusqlite::Error),

    /// Stored data violates the table layout
    Corrupt(String),

    /// Database is closed
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Corrupt(msg) => write!(f, "Corrupt translation table: {}", msg),
            Error::Closed => write!(f, "Database is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err)
    }
}
